//! FFT-based covariance operator engine for randfield.
//!
//! This crate holds the circulant-embedding machinery:
//!
//! - [`DistributedFft`](dfft::DistributedFft) - slab-distributed complex DFT
//! - [`DftMatrixBackend`](matrix_backend::DftMatrixBackend) - storage and
//!   transform of the spectral symbol on the embedded torus
//! - [`DftFieldBackend`](field_backend::DftFieldBackend) - working field
//!   buffer with embed/extract redistribution and the spare-field extraction
//! - [`RandomSource`](rng::RandomSource) backends producing per-rank streams
//!   of standard normals
//! - [`CovarianceOperator`] - sampling, `C·x`, `C^{1/2}·x` and the
//!   conjugate-gradient-backed `C^{-1}·x`
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use randfield_core::comm::SelfComm;
//! use randfield_core::config::{GridConfig, RandomFieldOptions, StochasticConfig};
//! use randfield_core::grid::DomainDescriptor;
//! use randfield_field::StochasticField;
//! use randfield_solver::CovarianceOperator;
//!
//! let grid = GridConfig { extensions: vec![1.0], cells: vec![64] };
//! let stochastic = StochasticConfig {
//!     variance: 1.0,
//!     covariance: "exponential".into(),
//!     anisotropy: "none".into(),
//!     corr_length: vec![0.1],
//!     anisotropy_rows: vec![],
//! };
//! let options = RandomFieldOptions::default();
//! let desc = DomainDescriptor::new(&grid, &options, Arc::new(SelfComm::new())).unwrap();
//! let mut operator = CovarianceOperator::new(&desc, &stochastic, &options).unwrap();
//! let mut sample = StochasticField::new(&desc);
//! operator.generate_field(42, &mut sample).unwrap();
//! assert!(sample.two_norm() > 0.0);
//! ```

pub mod dfft;
pub mod error;
pub mod field_backend;
pub mod matrix_backend;
pub mod operator;
pub mod rng;

pub use dfft::DistributedFft;
pub use error::{Error, Result};
pub use field_backend::DftFieldBackend;
pub use matrix_backend::DftMatrixBackend;
pub use operator::CovarianceOperator;
pub use rng::{CounterSource, EngineSource, RandomSource, RngBackend};
