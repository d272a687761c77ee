//! Distributed stochastic field storage for randfield.
//!
//! Provides [`StochasticField`], the per-rank portion of a random field
//! realization: vector arithmetic with global reductions, lazy conversion
//! between the FFT-compatible slab layout and the block layout used for
//! pointwise evaluation, ghost-panel exchange, refinement/coarsening and
//! localization.

mod layout;
pub mod stochastic;

pub use stochastic::StochasticField;
