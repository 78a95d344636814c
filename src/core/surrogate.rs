//! Smooth stand-ins for the derivative of the spike step.
//!
//! The forward pass always uses the exact Heaviside step ([`crate::lif::fire`]).
//! A surrogate only shapes the gradient that flows back through it.

use std::f32::consts::PI;

/// Derivative used in place of `d spike / d mem` during backpropagation.
///
/// `x` is the distance of the pre-reset membrane potential from the threshold.
pub trait SurrogateGradient: Send + Sync {
    fn derivative(&self, x: f32) -> f32;
}

/// `1 / (1 + k|x|)^2`, the derivative of the fast sigmoid `x / (1 + k|x|)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FastSigmoid {
    pub slope: f32,
}

impl Default for FastSigmoid {
    fn default() -> Self {
        Self { slope: 25.0 }
    }
}

impl SurrogateGradient for FastSigmoid {
    #[inline]
    fn derivative(&self, x: f32) -> f32 {
        let d = 1.0 + self.slope * x.abs();
        1.0 / (d * d)
    }
}

/// Derivative of `atan(pi * alpha * x / 2) / pi + 1/2`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Arctan {
    pub alpha: f32,
}

impl Default for Arctan {
    fn default() -> Self {
        Self { alpha: 2.0 }
    }
}

impl SurrogateGradient for Arctan {
    #[inline]
    fn derivative(&self, x: f32) -> f32 {
        let z = PI * self.alpha * x / 2.0;
        self.alpha / (2.0 * (1.0 + z * z))
    }
}
