use thiserror::Error;

use crate::observer::Field;

#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("unit {0} does not exist")]
    UnknownUnit(usize),
    #[error("connection {0} does not exist")]
    UnknownConnection(usize),
    #[error("unit {unit} has no forward step left to propagate back through")]
    EmptyHistory { unit: usize },
    #[error("unit {0} is not an input unit")]
    NotAnInput(usize),
    #[error("unit {0} is not an output unit")]
    NotAnOutput(usize),
    #[error("unit {from} already sends to unit {to}")]
    DuplicateOutput { from: usize, to: usize },
    #[error("unit {unit} has {len} outputs, no output at position {index}")]
    OutputIndex { unit: usize, index: usize, len: usize },
    #[error("no field named `{0}`")]
    UnknownField(String),
    #[error("field `{0}` does not apply here")]
    UnsupportedField(Field),
    #[error("field `{0}` is read-only")]
    ReadOnly(Field),
    #[error("field `{0}` was given a value of the wrong kind")]
    FieldType(Field),
    #[error("no nonlinearity named `{0}`")]
    UnknownNonlinearity(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, NetworkError>;
