//! A small scalar neural-network engine: units joined by weighted
//! connections, stepped forward and backward by hand.
//!
//! ```
//! use unitnet::{Network, Nonlinearity, UnitSpec, WeightInit};
//!
//! let mut net = Network::<f64>::new();
//! let input = net.add_unit(UnitSpec::input()).unwrap();
//! let output = net
//!     .add_unit(UnitSpec::output().nonlinearity(Nonlinearity::Linear))
//!     .unwrap();
//! net.add_output(input, output, WeightInit::Value(2.0)).unwrap();
//!
//! net.update(input, 3.0).unwrap();
//! net.go(input).unwrap();
//! net.forward(output).unwrap();
//! assert_eq!(net.unit(output).unwrap().output(), 6.0);
//! ```

pub mod config;
pub mod connection;
pub mod engine;
pub mod error;
pub mod nn;
pub mod nonlinearity;
pub mod observer;

pub use config::{ConnectionConfig, NetworkConfig};
pub use connection::{Connection, UpdateMode, UpdateOptions};
pub use engine::{ConnectionId, Network, UnitId, WeightInit};
pub use error::{NetworkError, Result};
pub use nn::{Group, Role, Unit, UnitSpec};
pub use nonlinearity::{CostFunction, Nonlinearity};
pub use observer::{Change, Field, FieldValue, LogObserver, Observer, ObserverId, Subject};

use num_traits::Float;

/// Bound on every connection's value and pending gradient.
pub const MAX_MAGNITUDE: f64 = 10.0;

pub(crate) fn cast<T: Float>(x: f64) -> T {
    T::from(x).expect("f64 literal must be representable in T")
}

pub(crate) fn clip<T: Float>(value: T, min: T, max: T) -> T {
    value.max(min).min(max)
}

// `Float::signum` maps zero to one, which would turn an empty gradient into a step.
pub(crate) fn sign<T: Float>(value: T) -> T {
    if value == T::zero() {
        T::zero()
    } else if value < T::zero() {
        -T::one()
    } else {
        T::one()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_of_zero_is_zero() {
        assert_eq!(sign(0.0_f64), 0.0);
        assert_eq!(sign(-3.5_f64), -1.0);
        assert_eq!(sign(0.25_f32), 1.0);
    }

    #[test]
    fn clip_saturates_both_ends() {
        assert_eq!(clip(12.0, -10.0, 10.0), 10.0);
        assert_eq!(clip(-12.0, -10.0, 10.0), -10.0);
        assert_eq!(clip(4.0, -10.0, 10.0), 4.0);
    }
}
