use num_traits::Float;

use crate::cast;
use crate::connection::UpdateOptions;

/// Hyperparameters given to every freshly created connection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConnectionConfig<T> {
    /// Learning rate.
    pub plasticity: T,
    /// Decay factor of the momentum accumulator, in `[0, 1]`.
    pub momentum: T,
    /// L2 weight-decay coefficient.
    pub decay: T,
}

impl<T: Float> Default for ConnectionConfig<T> {
    fn default() -> Self {
        Self {
            plasticity: cast(0.01),
            momentum: cast(0.6),
            decay: T::zero(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NetworkConfig<T> {
    pub connection: ConnectionConfig<T>,
    /// Options handed to `Connection::update` during backprop. `commit` is
    /// replaced by the flag passed to each backprop call.
    pub update: UpdateOptions,
    /// Seed for random weight initialisation; entropy when `None`.
    pub seed: Option<u64>,
}

impl<T: Float> Default for NetworkConfig<T> {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            update: UpdateOptions::default(),
            seed: None,
        }
    }
}

impl<T: Float> NetworkConfig<T> {
    pub fn seeded(seed: u64) -> Self {
        Self {
            seed: Some(seed),
            ..Self::default()
        }
    }
}
