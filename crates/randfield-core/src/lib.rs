//! Core infrastructure for the randfield workspace.
//!
//! This crate provides the pieces every other randfield crate builds on:
//!
//! - [`Communicator`] - the SPMD communication surface, with the
//!   single-rank [`SelfComm`] and the in-process multi-rank
//!   [`LocalComm`]/[`LocalWorld`] implementations
//! - [`DomainDescriptor`](grid::DomainDescriptor) - grid geometry, torus
//!   embedding, slab and block decompositions, index math
//! - configuration types mirroring the recognized configuration keys
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use randfield_core::comm::SelfComm;
//! use randfield_core::config::{GridConfig, RandomFieldOptions};
//! use randfield_core::grid::DomainDescriptor;
//!
//! let grid = GridConfig {
//!     extensions: vec![1.0, 1.0],
//!     cells: vec![16, 16],
//! };
//! let desc = DomainDescriptor::new(
//!     &grid,
//!     &RandomFieldOptions::default(),
//!     Arc::new(SelfComm::new()),
//! )
//! .unwrap();
//! assert_eq!(desc.extended_cells(), &[32, 32]);
//! ```

pub mod comm;
pub mod config;
pub mod error;
pub mod grid;

pub use comm::{Communicator, LocalComm, LocalWorld, SelfComm};
pub use config::{FieldConfig, GridConfig, ListConfig, RandomFieldOptions, StochasticConfig};
pub use error::{Error, Result};
pub use grid::{indices_to_linear, linear_to_indices, DomainDescriptor};
