//! Filling the gap between two control values.

use std::str::FromStr;

/// Curve used from one control point up to the next.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Interpolation {
    /// Hold the starting value.
    #[default]
    Constant,
    /// Evenly spaced steps, excluding the target.
    Linear,
    /// Geometric spacing bending towards the start.
    LeftExp,
    /// Geometric spacing bending towards the target.
    RightExp,
}

/// Exponent of the base-2 curve behind `leftexp`/`rightexp`.
const EXP_DEGREE: f64 = 5.0;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown interpolation '{0}'")]
pub struct UnknownInterpolation(pub String);

impl FromStr for Interpolation {
    type Err = UnknownInterpolation;

    fn from_str(token: &str) -> Result<Self, Self::Err> {
        match token.to_ascii_lowercase().as_str() {
            "constant" => Ok(Self::Constant),
            "linear" => Ok(Self::Linear),
            "leftexp" => Ok(Self::LeftExp),
            "rightexp" => Ok(Self::RightExp),
            _ => Err(UnknownInterpolation(token.to_string())),
        }
    }
}

impl Interpolation {
    /// Parse a row's trailing kind token, holding the value if it is unknown.
    pub fn parse_lenient(token: &str) -> Self {
        token.parse().unwrap_or_else(|err| {
            log::warn!("{err}, holding value instead");
            Self::Constant
        })
    }
}

/// Values that can be interpolated component-wise.
pub trait Interpolate: Clone {
    /// `steps` values walking from `self` towards `target`, excluding `target`.
    fn interpolate(&self, target: &Self, steps: usize, kind: Interpolation) -> Vec<Self>;
}

impl Interpolate for f64 {
    fn interpolate(&self, target: &Self, steps: usize, kind: Interpolation) -> Vec<Self> {
        match kind {
            Interpolation::Constant => vec![*self; steps],
            Interpolation::Linear => linspace(*self, *target, steps),
            Interpolation::LeftExp => expspace(*self, *target, EXP_DEGREE, steps),
            Interpolation::RightExp => expspace(*self, *target, -EXP_DEGREE, steps),
        }
    }
}

impl<const N: usize> Interpolate for [f64; N] {
    fn interpolate(&self, target: &Self, steps: usize, kind: Interpolation) -> Vec<Self> {
        let columns: Vec<Vec<f64>> = (0..N)
            .map(|i| self[i].interpolate(&target[i], steps, kind))
            .collect();
        (0..steps)
            .map(|step| std::array::from_fn(|i| columns[i][step]))
            .collect()
    }
}

/// `steps` evenly spaced values from `a` towards `b`, `b` excluded.
pub fn linspace(a: f64, b: f64, steps: usize) -> Vec<f64> {
    (0..steps)
        .map(|i| a + (b - a) * i as f64 / steps as f64)
        .collect()
}

/// `steps` values from `a` towards `b` on a base-2 curve, `b` excluded.
///
/// The sign of the exponent follows the direction of travel, so a falling
/// `leftexp` bends the same way a rising `rightexp` does.
pub fn expspace(a: f64, b: f64, exp: f64, steps: usize) -> Vec<f64> {
    let delta = b - a;
    let sign = if delta > 0.0 {
        1.0
    } else if delta < 0.0 {
        -1.0
    } else {
        0.0
    };
    let degree = 2f64.powf(sign * exp);
    if degree == 1.0 {
        return vec![a; steps];
    }

    (0..steps)
        .map(|i| {
            let t = i as f64 / steps as f64;
            let factor = (degree.powf(t) - 1.0) / (degree - 1.0);
            a + factor * delta
        })
        .collect()
}
