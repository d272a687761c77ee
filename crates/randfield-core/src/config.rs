//! Configuration types for random field construction.
//!
//! These mirror the recognized configuration keys one-to-one; parsing a
//! configuration *file* into them is left to the embedding application.

use serde::{Deserialize, Serialize};

/// Physical domain geometry: `grid.extensions` and `grid.cells`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridConfig {
    /// Physical size of the domain per dimension.
    pub extensions: Vec<f64>,
    /// Global cell count per dimension; must be compatible with the process
    /// grid (see the domain descriptor invariants).
    pub cells: Vec<usize>,
}

/// Stochastic model: variance, covariance kernel and anisotropy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StochasticConfig {
    /// Variance σ² of the field (`stochastic.variance`).
    pub variance: f64,
    /// Covariance kernel name (`stochastic.covariance`), e.g. `exponential`.
    pub covariance: String,
    /// Anisotropy variant (`stochastic.anisotropy`):
    /// `none`, `axiparallel` or `geometric`.
    #[serde(default = "default_anisotropy")]
    pub anisotropy: String,
    /// Correlation length(s) (`stochastic.corrLength`): a single entry for
    /// `none`, one per axis for `axiparallel`.
    #[serde(default = "default_corr_length")]
    pub corr_length: Vec<f64>,
    /// Row-major dim×dim lag transformation for `geometric` anisotropy.
    #[serde(default)]
    pub anisotropy_rows: Vec<Vec<f64>>,
}

fn default_anisotropy() -> String {
    "none".into()
}

fn default_corr_length() -> Vec<f64> {
    vec![1.0]
}

/// Engine options under the `randomField.*` keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomFieldOptions {
    /// Periodic boundary conditions; forces `embedding_factor = 1`.
    #[serde(default)]
    pub periodic: bool,
    /// Permit clamping of large-magnitude negative spectral entries instead
    /// of failing with a non-positive spectrum.
    #[serde(default)]
    pub approximate: bool,
    /// Emit progress reports on rank 0.
    #[serde(default)]
    pub verbose: bool,
    /// Iteration cap of the conjugate gradient loop behind the inverse.
    #[serde(default = "default_cg_iterations")]
    pub cg_iterations: usize,
    /// Keep a cached `C^{-1}·x` companion next to each realization.
    #[serde(default = "default_true")]
    pub cache_inv_matvec: bool,
    /// Keep a cached `C^{-1/2}·x` companion next to each realization.
    #[serde(default)]
    pub cache_inv_root_matvec: bool,
    /// Torus embedding factor `m`; the extended domain has `m·cells` cells
    /// per dimension.
    #[serde(default = "default_embedding_factor")]
    pub embedding_factor: usize,
}

fn default_cg_iterations() -> usize {
    100
}

fn default_embedding_factor() -> usize {
    2
}

fn default_true() -> bool {
    true
}

impl Default for RandomFieldOptions {
    fn default() -> Self {
        Self {
            periodic: false,
            approximate: false,
            verbose: false,
            cg_iterations: default_cg_iterations(),
            cache_inv_matvec: true,
            cache_inv_root_matvec: false,
            embedding_factor: default_embedding_factor(),
        }
    }
}

/// Complete configuration of a single random field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldConfig {
    pub grid: GridConfig,
    pub stochastic: StochasticConfig,
    #[serde(default)]
    pub random_field: RandomFieldOptions,
}

/// Configuration of a list of named random fields.
///
/// `types` gives the ordered sub-field names; the leading `active` of them
/// participate in calculus operations (all of them by default).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListConfig {
    pub types: Vec<String>,
    #[serde(default)]
    pub active: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_defaults() {
        let opts = RandomFieldOptions::default();
        assert!(!opts.periodic);
        assert!(!opts.approximate);
        assert!(!opts.verbose);
        assert_eq!(opts.cg_iterations, 100);
        assert!(opts.cache_inv_matvec);
        assert!(!opts.cache_inv_root_matvec);
        assert_eq!(opts.embedding_factor, 2);
    }

    #[test]
    fn stochastic_defaults_from_minimal_input() {
        let cfg: StochasticConfig = serde_json::from_str(
            r#"{"variance": 1.0, "covariance": "exponential"}"#,
        )
        .unwrap();
        assert_eq!(cfg.anisotropy, "none");
        assert_eq!(cfg.corr_length, vec![1.0]);
        assert!(cfg.anisotropy_rows.is_empty());
    }
}
