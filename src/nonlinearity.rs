use num_traits::Float;
use std::{fmt, str::FromStr};

use crate::error::NetworkError;
use crate::clip;

/// Activation catalog. Derivatives are expressed in terms of the activation's
/// *output*: for `y = f(x)`, `dy/dx = derivative(y)`.
#[derive(Debug, Clone, Copy)]
pub enum Nonlinearity<T> {
    Sigmoid,
    Tanh,
    Linear,
    RectifiedLinear,
    Custom {
        name: &'static str,
        forward: fn(T) -> T,
        derivative: fn(T) -> T,
        lower: Option<T>,
        upper: Option<T>,
    },
}

impl<T: Float> Default for Nonlinearity<T> {
    fn default() -> Self {
        Nonlinearity::Sigmoid
    }
}

impl<T: Float> Nonlinearity<T> {
    pub const CATALOG: [&'static str; 4] = ["sigmoid", "tanh", "linear", "rectified_linear"];

    pub fn apply(&self, x: T) -> T {
        match self {
            Nonlinearity::Sigmoid => T::one() / (T::one() + (-x).exp()),
            Nonlinearity::Tanh => x.tanh(),
            Nonlinearity::Linear => x,
            Nonlinearity::RectifiedLinear => x.max(T::zero()),
            Nonlinearity::Custom { forward, .. } => forward(x),
        }
    }

    pub fn derivative(&self, y: T) -> T {
        match self {
            Nonlinearity::Sigmoid => y * (T::one() - y),
            Nonlinearity::Tanh => T::one() - y * y,
            Nonlinearity::Linear => T::one(),
            Nonlinearity::RectifiedLinear => {
                if y != T::zero() {
                    T::one()
                } else {
                    T::zero()
                }
            }
            Nonlinearity::Custom { derivative, .. } => derivative(y),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Nonlinearity::Sigmoid => "sigmoid",
            Nonlinearity::Tanh => "tanh",
            Nonlinearity::Linear => "linear",
            Nonlinearity::RectifiedLinear => "rectified_linear",
            Nonlinearity::Custom { name, .. } => *name,
        }
    }

    /// Output range as `(lower, upper)`; `None` means unbounded on that side.
    pub fn bounds(&self) -> (Option<T>, Option<T>) {
        match self {
            Nonlinearity::Sigmoid => (Some(T::zero()), Some(T::one())),
            Nonlinearity::Tanh => (Some(-T::one()), Some(T::one())),
            Nonlinearity::Linear => (None, None),
            Nonlinearity::RectifiedLinear => (Some(T::zero()), None),
            Nonlinearity::Custom { lower, upper, .. } => (*lower, *upper),
        }
    }

    /// Pulls a value into the output range, e.g. a target typed in by hand.
    pub fn clamp(&self, value: T) -> T {
        let (lower, upper) = self.bounds();
        clip(
            value,
            lower.unwrap_or_else(T::neg_infinity),
            upper.unwrap_or_else(T::infinity),
        )
    }
}

impl<T: Float> FromStr for Nonlinearity<T> {
    type Err = NetworkError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name {
            "sigmoid" => Ok(Nonlinearity::Sigmoid),
            "tanh" => Ok(Nonlinearity::Tanh),
            "linear" => Ok(Nonlinearity::Linear),
            "rectified_linear" | "relu" => Ok(Nonlinearity::RectifiedLinear),
            other => Err(NetworkError::UnknownNonlinearity(other.to_string())),
        }
    }
}

// Custom variants are told apart by name and bounds, not by function address.
impl<T: PartialEq> PartialEq for Nonlinearity<T> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (
                Nonlinearity::Custom {
                    name, lower, upper, ..
                },
                Nonlinearity::Custom {
                    name: other_name,
                    lower: other_lower,
                    upper: other_upper,
                    ..
                },
            ) => name == other_name && lower == other_lower && upper == other_upper,
            _ => std::mem::discriminant(self) == std::mem::discriminant(other),
        }
    }
}

impl<T: Float> fmt::Display for Nonlinearity<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Loss of an output unit against its target, with its derivative in the output.
#[derive(Debug, Clone, Copy)]
pub enum CostFunction<T> {
    /// `(y - t)^2`; the derivative drops the factor two: `y - t`.
    SquaredError,
    Custom {
        name: &'static str,
        cost: fn(T, T) -> T,
        derivative: fn(T, T) -> T,
    },
}

impl<T: Float> Default for CostFunction<T> {
    fn default() -> Self {
        CostFunction::SquaredError
    }
}

impl<T: Float> CostFunction<T> {
    pub fn cost(&self, output: T, target: T) -> T {
        match self {
            CostFunction::SquaredError => (output - target).powi(2),
            CostFunction::Custom { cost, .. } => cost(output, target),
        }
    }

    pub fn derivative(&self, output: T, target: T) -> T {
        match self {
            CostFunction::SquaredError => output - target,
            CostFunction::Custom { derivative, .. } => derivative(output, target),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CostFunction::SquaredError => "squared_error",
            CostFunction::Custom { name, .. } => *name,
        }
    }
}

impl<T> PartialEq for CostFunction<T> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (CostFunction::SquaredError, CostFunction::SquaredError) => true,
            (CostFunction::Custom { name, .. }, CostFunction::Custom { name: other_name, .. }) => {
                name == other_name
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numeric_slope(n: Nonlinearity<f64>, x: f64) -> f64 {
        let h = 1e-6;
        (n.apply(x + h) - n.apply(x - h)) / (2.0 * h)
    }

    #[test]
    fn derivatives_take_the_output() {
        for n in [
            Nonlinearity::Sigmoid,
            Nonlinearity::Tanh,
            Nonlinearity::Linear,
            Nonlinearity::RectifiedLinear,
        ] {
            for x in [-2.0, -0.3, 0.7, 1.9] {
                let analytic = n.derivative(n.apply(x));
                assert!(
                    (analytic - numeric_slope(n, x)).abs() < 1e-5,
                    "{} at {}",
                    n,
                    x
                );
            }
        }
    }

    #[test]
    fn catalog_names_round_trip() {
        for name in Nonlinearity::<f64>::CATALOG {
            let n: Nonlinearity<f64> = name.parse().unwrap();
            assert_eq!(n.name(), name);
        }
        assert!("softmax".parse::<Nonlinearity<f64>>().is_err());
    }

    #[test]
    fn bounds_clamp_targets() {
        assert_eq!(Nonlinearity::<f64>::Sigmoid.clamp(1.5), 1.0);
        assert_eq!(Nonlinearity::<f64>::Tanh.clamp(-3.0), -1.0);
        assert_eq!(Nonlinearity::<f64>::RectifiedLinear.clamp(-3.0), 0.0);
        assert_eq!(Nonlinearity::<f64>::RectifiedLinear.clamp(300.0), 300.0);
        assert_eq!(Nonlinearity::<f64>::Linear.clamp(-300.0), -300.0);
    }

    #[test]
    fn custom_pair_is_used() {
        let square = Nonlinearity::<f64>::Custom {
            name: "square",
            forward: |x| x * x,
            derivative: |y| 2.0 * y.sqrt(),
            lower: Some(0.0),
            upper: None,
        };
        assert_eq!(square.apply(3.0), 9.0);
        assert_eq!(square.derivative(9.0), 6.0);
        assert_eq!(square.name(), "square");
    }

    #[test]
    fn squared_error_matches_closed_form() {
        let c = CostFunction::<f64>::SquaredError;
        assert_eq!(c.cost(6.0, 4.0), 4.0);
        assert_eq!(c.derivative(6.0, 4.0), 2.0);
    }

    #[test]
    fn custom_variants_compare_by_name_and_bounds() {
        let relu_like = |upper| Nonlinearity::<f64>::Custom {
            name: "clipped",
            forward: |x| x.max(0.0),
            derivative: |y| if y > 0.0 { 1.0 } else { 0.0 },
            lower: Some(0.0),
            upper,
        };
        assert_eq!(relu_like(Some(6.0)), relu_like(Some(6.0)));
        assert_ne!(relu_like(Some(6.0)), relu_like(None));
        assert_ne!(relu_like(None), Nonlinearity::RectifiedLinear);
        assert_eq!(Nonlinearity::<f64>::Tanh, Nonlinearity::Tanh);
        assert_ne!(Nonlinearity::<f64>::Tanh, Nonlinearity::Sigmoid);

        let absolute = CostFunction::<f64>::Custom {
            name: "absolute_error",
            cost: |y, t| (y - t).abs(),
            derivative: |y, t| (y - t).signum(),
        };
        let copied = absolute;
        assert_eq!(absolute, copied);
        assert_ne!(absolute, CostFunction::SquaredError);
    }
}
