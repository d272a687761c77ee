//! Anisotropy lag maps.
//!
//! The covariance kernels are evaluated on a *transformed* lag: a linear map
//! applied to the geometric lag folds the correlation structure into the
//! kernel argument. Three variants exist, selected by the
//! `stochastic.anisotropy` key:
//!
//! - `none` - scaled identity, one correlation length for all axes
//! - `axiparallel` - diagonal, one correlation length per axis
//! - `geometric` - a general dim×dim matrix

use randfield_core::config::StochasticConfig;

use crate::error::{Error, Result};

/// Linear map applied to the lag before kernel evaluation.
#[derive(Debug, Clone)]
pub enum AnisotropyMap {
    /// τᵢ ↦ τᵢ / ℓ with a single correlation length ℓ.
    ScaledIdentity { inv_length: f64 },
    /// τᵢ ↦ τᵢ / ℓᵢ with per-axis correlation lengths.
    Diagonal { inv_lengths: Vec<f64> },
    /// τ ↦ A·τ with a general row-major matrix A.
    General { rows: Vec<Vec<f64>> },
}

impl AnisotropyMap {
    /// Build the map selected by the configuration for a `dim`-dimensional
    /// domain.
    pub fn from_config(config: &StochasticConfig, dim: usize) -> Result<Self> {
        match config.anisotropy.as_str() {
            "none" => {
                let length = *config.corr_length.first().ok_or_else(|| {
                    Error::InvalidParameters("corr_length must have at least one entry".into())
                })?;
                if length <= 0.0 {
                    return Err(Error::InvalidParameters(
                        "correlation length must be positive".into(),
                    ));
                }
                Ok(Self::ScaledIdentity {
                    inv_length: 1.0 / length,
                })
            }
            "axiparallel" => {
                if config.corr_length.len() != dim {
                    return Err(Error::InvalidParameters(format!(
                        "axiparallel anisotropy needs {dim} correlation lengths, got {}",
                        config.corr_length.len()
                    )));
                }
                if config.corr_length.iter().any(|&l| l <= 0.0) {
                    return Err(Error::InvalidParameters(
                        "correlation lengths must be positive".into(),
                    ));
                }
                Ok(Self::Diagonal {
                    inv_lengths: config.corr_length.iter().map(|&l| 1.0 / l).collect(),
                })
            }
            "geometric" => {
                if config.anisotropy_rows.len() != dim
                    || config.anisotropy_rows.iter().any(|r| r.len() != dim)
                {
                    return Err(Error::InvalidParameters(format!(
                        "geometric anisotropy needs a {dim}x{dim} matrix"
                    )));
                }
                Ok(Self::General {
                    rows: config.anisotropy_rows.clone(),
                })
            }
            other => Err(Error::UnknownAnisotropy(other.into())),
        }
    }

    /// Apply the map: `out = A·lag`.
    pub fn transform(&self, lag: &[f64], out: &mut [f64]) {
        match self {
            Self::ScaledIdentity { inv_length } => {
                for (o, &l) in out.iter_mut().zip(lag) {
                    *o = l * inv_length;
                }
            }
            Self::Diagonal { inv_lengths } => {
                for i in 0..lag.len() {
                    out[i] = lag[i] * inv_lengths[i];
                }
            }
            Self::General { rows } => {
                for (i, row) in rows.iter().enumerate() {
                    out[i] = row.iter().zip(lag).map(|(&a, &l)| a * l).sum();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(anisotropy: &str, corr_length: Vec<f64>, rows: Vec<Vec<f64>>) -> StochasticConfig {
        StochasticConfig {
            variance: 1.0,
            covariance: "exponential".into(),
            anisotropy: anisotropy.into(),
            corr_length,
            anisotropy_rows: rows,
        }
    }

    #[test]
    fn scaled_identity_divides_by_length() {
        let map = AnisotropyMap::from_config(&config("none", vec![0.5], vec![]), 2).unwrap();
        let mut out = [0.0; 2];
        map.transform(&[1.0, -0.25], &mut out);
        assert!((out[0] - 2.0).abs() < 1e-15);
        assert!((out[1] + 0.5).abs() < 1e-15);
    }

    #[test]
    fn diagonal_uses_per_axis_lengths() {
        let map =
            AnisotropyMap::from_config(&config("axiparallel", vec![0.5, 2.0], vec![]), 2).unwrap();
        let mut out = [0.0; 2];
        map.transform(&[1.0, 1.0], &mut out);
        assert!((out[0] - 2.0).abs() < 1e-15);
        assert!((out[1] - 0.5).abs() < 1e-15);
    }

    #[test]
    fn general_matrix_mixes_axes() {
        let rows = vec![vec![1.0, 1.0], vec![0.0, 2.0]];
        let map = AnisotropyMap::from_config(&config("geometric", vec![], rows), 2).unwrap();
        let mut out = [0.0; 2];
        map.transform(&[1.0, 3.0], &mut out);
        assert!((out[0] - 4.0).abs() < 1e-15);
        assert!((out[1] - 6.0).abs() < 1e-15);
    }

    #[test]
    fn unknown_variant_is_rejected() {
        let err = AnisotropyMap::from_config(&config("sheared", vec![1.0], vec![]), 2).unwrap_err();
        assert!(matches!(err, Error::UnknownAnisotropy(_)));
    }

    #[test]
    fn axiparallel_length_count_must_match_dim() {
        let err =
            AnisotropyMap::from_config(&config("axiparallel", vec![1.0], vec![]), 3).unwrap_err();
        assert!(matches!(err, Error::InvalidParameters(_)));
    }
}
