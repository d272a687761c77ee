//! Error types for randfield-kernels.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("covariance structure {0:?} not known")]
    UnknownKernel(String),

    #[error("anisotropy must be \"none\", \"axiparallel\" or \"geometric\", got {0:?}")]
    UnknownAnisotropy(String),

    #[error("anisotropy parameters invalid: {0}")]
    InvalidParameters(String),
}

pub type Result<T> = std::result::Result<T, Error>;
