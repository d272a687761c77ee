//! Index permutations between the slab and block layouts.
//!
//! The slab layout splits the last axis across all ranks (the layout of the
//! distributed transform); the block layout splits every axis by
//! `p = P^{1/dim}`. The conversion is a deterministic all-to-all among the
//! `p^{dim-1}` ranks that share a slab group; these functions give the local
//! pre-permutation of slab slices before the exchange.

/// Resorted position of slab slice `i` in 2D; `nz_local` is the slab height.
pub(crate) fn resort_index_2d(i: usize, p: usize, nz_local: usize) -> usize {
    i / p + (i % p) * nz_local
}

/// Resorted position of slab slice `i` in 3D; `ny` is the full middle axis,
/// `nz_local` the slab height.
pub(crate) fn resort_index_3d(i: usize, p: usize, ny: usize, nz_local: usize) -> usize {
    let dy = ny / p;
    (i % p) * (dy * nz_local)
        + ((i / (dy * p) * dy) % ny) * (nz_local * p)
        + i / (ny * p) * dy
        + (i / p) % dy
}
