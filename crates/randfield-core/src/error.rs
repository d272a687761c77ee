//! Error types for randfield-core.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("geometry mismatch: {0}")]
    GeometryMismatch(String),

    #[error("unsupported topology: {0}")]
    UnsupportedTopology(String),
}

pub type Result<T> = std::result::Result<T, Error>;
