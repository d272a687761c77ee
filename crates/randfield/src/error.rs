//! Error type of the randfield facade.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] randfield_core::Error),

    #[error(transparent)]
    Kernel(#[from] randfield_kernels::Error),

    #[error(transparent)]
    Solver(#[from] randfield_solver::Error),

    #[error("file is missing: {0}")]
    MissingFile(String),

    #[error("random field lists don't match: {0}")]
    ListMismatch(String),

    #[error(
        "generation of inconsistent fields prevented, pass allow_non_world = true \
         if you really want this"
    )]
    NonWorldComm,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
