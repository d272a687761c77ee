//! # randfield
//!
//! Stationary Gaussian random fields on structured Cartesian grids in 1D,
//! 2D or 3D, generated by circulant embedding: the covariance is
//! diagonalized by a distributed Fourier transform on an embedded torus,
//! samples are drawn with the prescribed spectrum, and the covariance
//! operator itself is exposed for outer algorithms (`C·x`, `C^{1/2}·x`,
//! `C^{-1}·x` via preconditioned conjugate gradients).
//!
//! ## Quick start
//!
//! ```rust
//! use std::sync::Arc;
//! use randfield::prelude::*;
//!
//! let config = FieldConfig {
//!     grid: GridConfig {
//!         extensions: vec![1.0, 1.0],
//!         cells: vec![32, 32],
//!     },
//!     stochastic: StochasticConfig {
//!         variance: 1.0,
//!         covariance: "exponential".into(),
//!         anisotropy: "none".into(),
//!         corr_length: vec![0.1],
//!         anisotropy_rows: vec![],
//!     },
//!     random_field: RandomFieldOptions::default(),
//! };
//!
//! let mut field = RandomField::new(config, Arc::new(SelfComm::new())).unwrap();
//! field.generate(42, false).unwrap();
//! let value = field.evaluate(&[0.5, 0.5]);
//! assert!(value.is_finite());
//! ```
//!
//! ## Parallel execution
//!
//! The engine is single-program-multiple-data over a
//! [`Communicator`]; [`LocalWorld::run`] executes a rank group on threads
//! of the current process. Geometry is constrained by the two
//! decompositions: the last axis must split evenly across all ranks (slab),
//! and the rank count must be a perfect `dim`-th power (block).

pub mod error;
pub mod field;
mod io;
pub mod list;

pub use error::{Error, Result};
pub use field::RandomField;
pub use list::RandomFieldList;

// Re-export the component crates.
pub use randfield_core as core;
pub use randfield_field as field_storage;
pub use randfield_kernels as kernels;
pub use randfield_solver as solver;

// Convenient re-exports of the commonly used types.
pub use randfield_core::comm::{Communicator, LocalComm, LocalWorld, SelfComm};
pub use randfield_core::config::{
    FieldConfig, GridConfig, ListConfig, RandomFieldOptions, StochasticConfig,
};
pub use randfield_core::grid::DomainDescriptor;
pub use randfield_field::StochasticField;
pub use randfield_kernels::{AnisotropyMap, Kernel};
pub use randfield_solver::{CovarianceOperator, RngBackend};

/// Prelude module containing the commonly used types.
///
/// ```rust
/// use randfield::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        Communicator, CovarianceOperator, DomainDescriptor, FieldConfig, GridConfig, LocalWorld,
        RandomField, RandomFieldList, RandomFieldOptions, RngBackend, SelfComm, StochasticConfig,
        StochasticField,
    };
}

#[cfg(test)]
mod tests {
    use super::prelude::*;
    use std::sync::Arc;

    fn config(cells: Vec<usize>) -> FieldConfig {
        FieldConfig {
            grid: GridConfig {
                extensions: vec![1.0; cells.len()],
                cells,
            },
            stochastic: StochasticConfig {
                variance: 1.0,
                covariance: "exponential".into(),
                anisotropy: "none".into(),
                corr_length: vec![0.1],
                anisotropy_rows: vec![],
            },
            random_field: RandomFieldOptions::default(),
        }
    }

    #[test]
    fn construct_and_generate() {
        let mut field = RandomField::new(config(vec![16, 16]), Arc::new(SelfComm::new())).unwrap();
        field.generate(1, false).unwrap();
        assert!(field.two_norm() > 0.0);
        assert_eq!(field.dofs(), 256);
    }

    #[test]
    fn non_world_communicator_is_refused() {
        let mut field =
            RandomField::new(config(vec![16]), Arc::new(SelfComm::non_world())).unwrap();
        assert!(matches!(
            field.generate(1, false),
            Err(crate::Error::NonWorldComm)
        ));
        field.generate(1, true).unwrap();
    }

    #[test]
    fn prelude_exposes_the_surface() {
        let _ = RngBackend::Counter;
        let comm: Arc<dyn Communicator> = Arc::new(SelfComm::new());
        assert_eq!(comm.size(), 1);
    }
}
