//! Covariance kernels for stationary Gaussian random fields.
//!
//! Each kernel is a pure function `(variance, transformed_lag) -> value`
//! evaluated on the lag after the [`AnisotropyMap`] has been applied, so the
//! kernels themselves are parameter-free apart from the variance. The
//! `whiteNoise` kernel yields the identity covariance and exercises the same
//! sampling pipeline as every other kernel.
//!
//! # Example
//!
//! ```rust
//! use randfield_kernels::Kernel;
//!
//! let kernel: Kernel = "matern32".parse().unwrap();
//! let at_zero = kernel.evaluate(2.0, &[0.0, 0.0]);
//! assert!((at_zero - 2.0).abs() < 1e-15);
//! ```

pub mod anisotropy;
pub mod error;

pub use anisotropy::AnisotropyMap;
pub use error::{Error, Result};

use std::str::FromStr;

const SQRT_3: f64 = 1.732_050_807_568_877_2;
const SQRT_5: f64 = 2.236_067_977_499_79;

/// The supported covariance structures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kernel {
    Exponential,
    Gaussian,
    Spherical,
    SeparableExponential,
    Matern32,
    Matern52,
    DampedOscillation,
    Cauchy,
    Cubic,
    WhiteNoise,
}

impl FromStr for Kernel {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self> {
        match name {
            "exponential" => Ok(Self::Exponential),
            "gaussian" => Ok(Self::Gaussian),
            "spherical" => Ok(Self::Spherical),
            "separableExponential" => Ok(Self::SeparableExponential),
            "matern32" => Ok(Self::Matern32),
            "matern52" => Ok(Self::Matern52),
            "dampedOscillation" => Ok(Self::DampedOscillation),
            "cauchy" => Ok(Self::Cauchy),
            "cubic" => Ok(Self::Cubic),
            "whiteNoise" => Ok(Self::WhiteNoise),
            other => Err(Error::UnknownKernel(other.into())),
        }
    }
}

impl Kernel {
    /// The configuration name of this kernel.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Exponential => "exponential",
            Self::Gaussian => "gaussian",
            Self::Spherical => "spherical",
            Self::SeparableExponential => "separableExponential",
            Self::Matern32 => "matern32",
            Self::Matern52 => "matern52",
            Self::DampedOscillation => "dampedOscillation",
            Self::Cauchy => "cauchy",
            Self::Cubic => "cubic",
            Self::WhiteNoise => "whiteNoise",
        }
    }

    /// Evaluate the kernel on an anisotropy-transformed lag.
    pub fn evaluate(&self, variance: f64, lag: &[f64]) -> f64 {
        let h = norm(lag);
        match self {
            Self::Exponential => variance * (-h).exp(),
            Self::Gaussian => variance * (-h * h).exp(),
            Self::Spherical => {
                if h > 1.0 {
                    0.0
                } else {
                    variance * (1.0 - 1.5 * h + 0.5 * h * h * h)
                }
            }
            Self::SeparableExponential => {
                let sum: f64 = lag.iter().map(|l| l.abs()).sum();
                variance * (-sum).exp()
            }
            Self::Matern32 => variance * (1.0 + SQRT_3 * h) * (-SQRT_3 * h).exp(),
            Self::Matern52 => {
                variance * (1.0 + SQRT_5 * h + 5.0 * h * h / 3.0) * (-SQRT_5 * h).exp()
            }
            Self::DampedOscillation => variance * (-h).exp() * h.cos(),
            Self::Cauchy => variance / (1.0 + h * h),
            Self::Cubic => {
                if h > 1.0 {
                    0.0
                } else {
                    let h2 = h * h;
                    let h3 = h2 * h;
                    variance
                        * (1.0 - 7.0 * h2 + 8.75 * h3 - 3.5 * h3 * h2 + 0.75 * h3 * h3 * h)
                }
            }
            Self::WhiteNoise => {
                if lag.iter().all(|l| l.abs() < 1e-10) {
                    variance
                } else {
                    0.0
                }
            }
        }
    }
}

fn norm(lag: &[f64]) -> f64 {
    lag.iter().map(|l| l * l).sum::<f64>().sqrt()
}
