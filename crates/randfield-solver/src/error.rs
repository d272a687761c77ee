//! Error types for randfield-solver.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(
        "negative eigenvalues in covariance matrix ({negative} entries, smallest {smallest:e}); \
         consider increasing the embedding factor, or alternatively allow generation of \
         approximate samples"
    )]
    NonPositiveSpectrum { negative: usize, smallest: f64 },

    #[error("conjugate gradients stalled after {iterations} iterations")]
    CgStalled { iterations: usize },

    #[error(transparent)]
    Kernel(#[from] randfield_kernels::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
