use num_traits::Float;
use std::{fmt, str::FromStr};

use crate::engine::{ConnectionId, UnitId};
use crate::error::NetworkError;

/// What a change notification is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subject {
    Unit(UnitId),
    Connection(ConnectionId),
}

/// A named, externally observable attribute of a unit or connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Logit,
    FrozenLogit,
    Output,
    Delta,
    OutDelta,
    /// Top of the derivative stack, zero when empty.
    Derivative,
    Dropout,
    Frozen,
    Recurrent,
    Target,
    CostVal,
    Value,
    Plasticity,
    Momentum,
    Decay,
    Moment,
    DeltaAccumulator,
    PreviousDelta,
}

impl Field {
    pub const UNIT: [Field; 11] = [
        Field::Logit,
        Field::FrozenLogit,
        Field::Output,
        Field::Delta,
        Field::OutDelta,
        Field::Derivative,
        Field::Dropout,
        Field::Frozen,
        Field::Recurrent,
        Field::Target,
        Field::CostVal,
    ];

    pub const CONNECTION: [Field; 7] = [
        Field::Value,
        Field::Plasticity,
        Field::Momentum,
        Field::Decay,
        Field::Moment,
        Field::DeltaAccumulator,
        Field::PreviousDelta,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Field::Logit => "logit",
            Field::FrozenLogit => "frozenlogit",
            Field::Output => "output",
            Field::Delta => "delta",
            Field::OutDelta => "outdelta",
            Field::Derivative => "_derivative",
            Field::Dropout => "dropout",
            Field::Frozen => "frozen",
            Field::Recurrent => "recurrent",
            Field::Target => "target",
            Field::CostVal => "cost_val",
            Field::Value => "value",
            Field::Plasticity => "plasticity",
            Field::Momentum => "momentum",
            Field::Decay => "decay",
            Field::Moment => "moment",
            Field::DeltaAccumulator => "delta_accumulator",
            Field::PreviousDelta => "previous_delta",
        }
    }
}

impl FromStr for Field {
    type Err = NetworkError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Field::UNIT
            .iter()
            .chain(Field::CONNECTION.iter())
            .copied()
            .find(|field| field.name() == name)
            .or(match name {
                "derivative" => Some(Field::Derivative),
                _ => None,
            })
            .ok_or_else(|| NetworkError::UnknownField(name.to_string()))
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue<T> {
    Scalar(T),
    Flag(bool),
}

impl<T: Float> FieldValue<T> {
    pub fn scalar(&self) -> Option<T> {
        match self {
            FieldValue::Scalar(v) => Some(*v),
            FieldValue::Flag(_) => None,
        }
    }

    pub fn flag(&self) -> Option<bool> {
        match self {
            FieldValue::Flag(b) => Some(*b),
            FieldValue::Scalar(_) => None,
        }
    }
}

impl<T: fmt::Display> fmt::Display for FieldValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FieldValue::Scalar(v) => write!(f, "{:.4}", v),
            FieldValue::Flag(b) => write!(f, "{}", b),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Change<T> {
    pub subject: Subject,
    pub field: Field,
    pub value: FieldValue<T>,
}

/// Receives every observable state change made through a `Network`.
pub trait Observer<T> {
    fn on_change(&mut self, change: &Change<T>);
}

impl<T, F> Observer<T> for F
where
    F: FnMut(&Change<T>),
{
    fn on_change(&mut self, change: &Change<T>) {
        self(change)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(pub(crate) usize);

/// Forwards changes to `tracing` at TRACE level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl<T: fmt::Display> Observer<T> for LogObserver {
    fn on_change(&mut self, change: &Change<T>) {
        match change.subject {
            Subject::Unit(id) => tracing::trace!(
                unit = id.index(),
                field = change.field.name(),
                "{}",
                change.value
            ),
            Subject::Connection(id) => tracing::trace!(
                connection = id.index(),
                field = change.field.name(),
                "{}",
                change.value
            ),
        }
    }
}
