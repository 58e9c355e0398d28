use num_traits::Float;
use std::{fmt, ops::Mul};

use crate::config::ConnectionConfig;
use crate::error::{NetworkError, Result};
use crate::observer::{Field, FieldValue};
use crate::{cast, clip, sign, MAX_MAGNITUDE};

/// How a committed gradient moves the weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdateMode {
    /// `value -= plasticity * (moment + gradient + decay * value)`
    #[default]
    Momentum,
    /// `value -= plasticity * sign(gradient)`
    Prop,
    /// `value -= plasticity * gradient`
    Plain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateOptions {
    /// Apply the accumulated gradient. When false the delta is only summed.
    pub commit: bool,
    pub mode: UpdateMode,
    pub adaptive_rate: bool,
    /// Saturate the accumulator at `MAX_MAGNITUDE`.
    pub clip: bool,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            commit: true,
            mode: UpdateMode::Momentum,
            adaptive_rate: false,
            clip: true,
        }
    }
}

impl UpdateOptions {
    /// Sum the delta into the accumulator without touching the weight.
    pub fn accumulate() -> Self {
        Self {
            commit: false,
            ..Self::default()
        }
    }

    pub fn with_commit(self, commit: bool) -> Self {
        Self { commit, ..self }
    }

    pub fn with_mode(self, mode: UpdateMode) -> Self {
        Self { mode, ..self }
    }
}

/// A scalar weight with its own SGD-with-momentum state.
#[derive(Debug, Clone, PartialEq)]
pub struct Connection<T> {
    value: T,
    plasticity: T,
    momentum: T,
    decay: T,
    moment: T,
    delta_accumulator: T,
    previous_delta: T,
}

impl<T> Connection<T>
where
    T: Float + fmt::Display,
{
    pub fn new(value: T, config: &ConnectionConfig<T>) -> Self {
        Self {
            value: Self::saturate(value),
            plasticity: config.plasticity,
            momentum: config.momentum,
            decay: config.decay,
            moment: T::zero(),
            delta_accumulator: T::zero(),
            previous_delta: T::zero(),
        }
    }

    /// A connection with the default hyperparameters.
    pub fn with_value(value: T) -> Self {
        Self::new(value, &ConnectionConfig::default())
    }

    fn saturate(value: T) -> T {
        let bound = cast::<T>(MAX_MAGNITUDE);
        clip(value, -bound, bound)
    }

    pub fn update(&mut self, delta: T, options: UpdateOptions) {
        self.delta_accumulator = self.delta_accumulator + delta;
        if options.clip {
            self.delta_accumulator = Self::saturate(self.delta_accumulator);
        }
        if !options.commit {
            return;
        }

        if options.adaptive_rate {
            // The reduce test compares the previous delta's sign with itself, so it
            // never fires and the rate only grows.
            self.plasticity = clip(self.plasticity + cast(0.05), T::zero(), T::one());
        }

        match options.mode {
            UpdateMode::Momentum => {
                self.value = self.value
                    - self.plasticity
                        * (self.moment + self.delta_accumulator + self.decay * self.value);
                self.moment = (self.moment + self.delta_accumulator) * self.momentum;
            }
            UpdateMode::Prop => {
                self.value = self.value - self.plasticity * sign(self.delta_accumulator);
            }
            UpdateMode::Plain => {
                self.value = self.value - self.plasticity * self.delta_accumulator;
            }
        }

        self.previous_delta = self.delta_accumulator;
        self.delta_accumulator = T::zero();
        self.value = Self::saturate(self.value);
    }

    /// Lets momentum and decay keep draining with no new gradient.
    pub fn commit(&mut self) {
        self.update(T::zero(), UpdateOptions::default());
    }

    /// Momentum-only step, independent of the accumulator.
    pub fn nesterov(&mut self) {
        self.value = self.value - self.plasticity * self.moment;
        self.moment = self.moment * self.momentum;
    }

    pub fn value(&self) -> T {
        self.value
    }

    pub fn set_value(&mut self, value: T) {
        self.value = Self::saturate(value);
    }

    pub fn plasticity(&self) -> T {
        self.plasticity
    }

    pub fn set_plasticity(&mut self, plasticity: T) {
        self.plasticity = plasticity;
    }

    pub fn momentum(&self) -> T {
        self.momentum
    }

    pub fn set_momentum(&mut self, momentum: T) {
        self.momentum = momentum;
    }

    pub fn decay(&self) -> T {
        self.decay
    }

    pub fn set_decay(&mut self, decay: T) {
        self.decay = decay;
    }

    pub fn moment(&self) -> T {
        self.moment
    }

    pub fn set_moment(&mut self, moment: T) {
        self.moment = moment;
    }

    pub fn delta_accumulator(&self) -> T {
        self.delta_accumulator
    }

    pub fn previous_delta(&self) -> T {
        self.previous_delta
    }

    pub fn read(&self, field: Field) -> Option<FieldValue<T>> {
        let value = match field {
            Field::Value => self.value,
            Field::Plasticity => self.plasticity,
            Field::Momentum => self.momentum,
            Field::Decay => self.decay,
            Field::Moment => self.moment,
            Field::DeltaAccumulator => self.delta_accumulator,
            Field::PreviousDelta => self.previous_delta,
            _ => return None,
        };
        Some(FieldValue::Scalar(value))
    }

    pub(crate) fn write(&mut self, field: Field, value: FieldValue<T>) -> Result<()> {
        let scalar = || value.scalar().ok_or(NetworkError::FieldType(field));
        match field {
            Field::Value => self.set_value(scalar()?),
            Field::Plasticity => self.plasticity = scalar()?,
            Field::Momentum => self.momentum = scalar()?,
            Field::Decay => self.decay = scalar()?,
            Field::Moment => self.moment = scalar()?,
            Field::DeltaAccumulator | Field::PreviousDelta => {
                return Err(NetworkError::ReadOnly(field))
            }
            _ => return Err(NetworkError::UnsupportedField(field)),
        }
        Ok(())
    }
}

impl<T> Mul<T> for &Connection<T>
where
    T: Float,
{
    type Output = T;

    fn mul(self, rhs: T) -> T {
        self.value * rhs
    }
}

impl<T> fmt::Display for Connection<T>
where
    T: Float + fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Weight {:.4}", self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(plasticity: f64, momentum: f64, decay: f64) -> ConnectionConfig<f64> {
        ConnectionConfig {
            plasticity,
            momentum,
            decay,
        }
    }

    #[test]
    fn positive_gradient_lowers_weight() {
        let mut w = Connection::new(1.0, &config(0.1, 0.6, 0.0));
        w.update(0.5, UpdateOptions::default());
        assert!(w.value() < 1.0);
        assert!((w.value() - 0.95).abs() < 1e-12);
        assert!((w.moment() - 0.3).abs() < 1e-12);
        assert_eq!(w.delta_accumulator(), 0.0);
        assert_eq!(w.previous_delta(), 0.5);
    }

    #[test]
    fn accumulate_only_leaves_value() {
        let mut w = Connection::new(1.0, &config(0.1, 0.6, 0.0));
        w.update(0.5, UpdateOptions::accumulate());
        w.update(0.25, UpdateOptions::accumulate());
        assert_eq!(w.value(), 1.0);
        assert_eq!(w.delta_accumulator(), 0.75);

        w.update(0.0, UpdateOptions::default());
        assert!((w.value() - (1.0 - 0.1 * 0.75)).abs() < 1e-12);
    }

    #[test]
    fn value_and_accumulator_stay_bounded() {
        let mut w = Connection::new(9.5, &config(1.0, 0.9, 0.0));
        for _ in 0..50 {
            w.update(-1e6, UpdateOptions::accumulate());
            assert!(w.delta_accumulator().abs() <= 10.0);
        }
        for step in 0..200 {
            let delta = if step % 3 == 0 { 1e9 } else { -1e9 };
            w.update(delta, UpdateOptions::default());
            assert!(w.value().abs() <= 10.0);
            assert!(w.delta_accumulator().abs() <= 10.0);
        }
    }

    #[test]
    fn unclipped_accumulator_may_exceed_bound() {
        let mut w = Connection::with_value(0.0);
        let options = UpdateOptions {
            clip: false,
            ..UpdateOptions::accumulate()
        };
        w.update(25.0, options);
        assert_eq!(w.delta_accumulator(), 25.0);
    }

    #[test]
    fn prop_mode_steps_by_sign() {
        let mut w = Connection::new(0.0, &config(0.2, 0.6, 0.0));
        let options = UpdateOptions::default().with_mode(UpdateMode::Prop);
        w.update(-7.0, options);
        assert!((w.value() - 0.2).abs() < 1e-12);
        w.update(0.0, options);
        assert!((w.value() - 0.2).abs() < 1e-12);
        assert_eq!(w.moment(), 0.0);
    }

    #[test]
    fn plain_mode_ignores_momentum() {
        let mut w = Connection::new(1.0, &config(0.5, 0.6, 0.3));
        w.update(1.0, UpdateOptions::default().with_mode(UpdateMode::Plain));
        assert!((w.value() - 0.5).abs() < 1e-12);
        assert_eq!(w.moment(), 0.0);
    }

    #[test]
    fn decay_pulls_towards_zero() {
        let mut w = Connection::new(2.0, &config(0.1, 0.0, 0.5));
        w.commit();
        assert!((w.value() - 1.9).abs() < 1e-12);
    }

    #[test]
    fn commit_drains_momentum() {
        let mut w = Connection::new(0.0, &config(0.1, 0.5, 0.0));
        w.update(1.0, UpdateOptions::default());
        let after_gradient = w.value();
        w.commit();
        assert!(w.value() < after_gradient);
        assert!((w.moment() - 0.25).abs() < 1e-12);
    }

    #[test]
    fn nesterov_uses_only_moment() {
        let mut w = Connection::new(1.0, &config(0.1, 0.5, 0.0));
        w.set_moment(2.0);
        w.update(3.0, UpdateOptions::accumulate());
        w.nesterov();
        assert!((w.value() - 0.8).abs() < 1e-12);
        assert_eq!(w.moment(), 1.0);
        assert_eq!(w.delta_accumulator(), 3.0);
    }

    #[test]
    fn adaptive_rate_only_grows() {
        let mut w = Connection::new(0.0, &config(0.98, 0.0, 0.0));
        let options = UpdateOptions {
            adaptive_rate: true,
            ..UpdateOptions::default()
        };
        w.update(1.0, options);
        assert_eq!(w.plasticity(), 1.0);
        w.update(-1.0, options);
        assert_eq!(w.plasticity(), 1.0);
    }

    #[test]
    fn multiplication_scales_value() {
        let w = Connection::with_value(-1.5_f32);
        assert_eq!(&w * 2.0, -3.0);
    }

    #[test]
    fn named_fields() {
        let mut w = Connection::with_value(1.0);
        w.write(Field::Value, FieldValue::Scalar(-30.0)).unwrap();
        assert_eq!(w.read(Field::Value), Some(FieldValue::Scalar(-10.0)));
        assert!(matches!(
            w.write(Field::DeltaAccumulator, FieldValue::Scalar(1.0)),
            Err(NetworkError::ReadOnly(Field::DeltaAccumulator))
        ));
        assert!(matches!(
            w.write(Field::Plasticity, FieldValue::Flag(true)),
            Err(NetworkError::FieldType(Field::Plasticity))
        ));
        assert_eq!(w.read(Field::Logit), None);
    }

    #[test]
    fn construction_saturates() {
        let w = Connection::with_value(42.0);
        assert_eq!(w.value(), 10.0);
    }
}
