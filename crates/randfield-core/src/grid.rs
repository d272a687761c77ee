//! Domain descriptor: grid geometry, process layout and index math.
//!
//! The descriptor is the single source of truth for the structured grid, the
//! torus embedding and the two parallel decompositions used by the engine:
//!
//! - the **slab** decomposition, a 1D split of the last axis across all
//!   ranks, matching the layout of the distributed Fourier transform;
//! - the **block** decomposition, a `dim`-dimensional split into per-rank
//!   rectangular blocks used for pointwise evaluation, which requires the
//!   rank count to be a perfect `dim`-th power.
//!
//! All derived quantities are recomputed by `update()` after construction,
//! refinement or coarsening; every other component copies what it needs and
//! refreshes those copies through its own `update`.

use std::sync::Arc;

use crate::comm::Communicator;
use crate::config::{GridConfig, RandomFieldOptions};
use crate::error::{Error, Result};

/// Convert an index tuple into a flat index, with `indices[0]` varying
/// fastest.
pub fn indices_to_linear(indices: &[usize], bound: &[usize]) -> usize {
    debug_assert_eq!(indices.len(), bound.len());
    let mut index = 0;
    for i in (0..indices.len()).rev() {
        debug_assert!(indices[i] < bound[i]);
        index = index * bound[i] + indices[i];
    }
    index
}

/// Inverse of [`indices_to_linear`].
pub fn linear_to_indices(mut index: usize, bound: &[usize], indices: &mut [usize]) {
    for i in 0..bound.len() {
        indices[i] = index % bound[i];
        index /= bound[i];
    }
}

/// Pick a process grid for `size` cells on `procs` ranks by minimizing the
/// maximum per-axis slab width; axes that do not split evenly are penalized
/// threefold.
pub(crate) fn load_balance(size: &[usize], procs: usize) -> Vec<usize> {
    let dim = size.len();
    let mut dims = vec![1; dim];
    let mut trydims = vec![1; dim];
    let mut opt = f64::INFINITY;
    optimize_dims(dim - 1, size, procs, &mut dims, &mut trydims, &mut opt);
    dims
}

fn optimize_dims(
    axis: usize,
    size: &[usize],
    procs: usize,
    dims: &mut Vec<usize>,
    trydims: &mut Vec<usize>,
    opt: &mut f64,
) {
    if axis > 0 {
        for k in 1..=procs {
            if procs % k == 0 {
                trydims[axis] = k;
                optimize_dims(axis - 1, size, procs / k, dims, trydims, opt);
            }
        }
    } else {
        trydims[0] = procs;

        let mut widest = -1.0;
        for k in 0..size.len() {
            let mut width = size[k] as f64 / trydims[k] as f64;
            if size[k] % trydims[k] != 0 {
                width *= 3.0;
            }
            if width > widest {
                widest = width;
            }
        }
        if widest < *opt {
            *opt = widest;
            dims.clone_from(trydims);
        }
    }
}

/// Geometry and decomposition data shared by every engine component.
#[derive(Clone)]
pub struct DomainDescriptor {
    comm: Arc<dyn Communicator>,
    dim: usize,
    extensions: Vec<f64>,
    cells: Vec<usize>,
    meshsize: Vec<f64>,
    cell_volume: f64,
    level: u32,
    periodic: bool,
    embedding_factor: usize,
    verbose: bool,

    proc_per_dim: Vec<usize>,
    eval_procs: usize,

    extended_cells: Vec<usize>,
    domain_size: usize,
    extended_size: usize,

    alloc_local: usize,
    local_n0: usize,
    local_0_start: usize,

    local_cells: Vec<usize>,
    local_offset: Vec<usize>,
    local_domain_size: usize,
    local_extended_cells: Vec<usize>,
    local_extended_offset: Vec<usize>,
    local_extended_size: usize,

    local_eval_cells: Vec<usize>,
    local_eval_offset: Vec<usize>,
}

impl DomainDescriptor {
    /// Build a descriptor from the grid configuration and engine options.
    ///
    /// Fails with [`Error::GeometryMismatch`] when the cell counts are
    /// incompatible with the rank count and with
    /// [`Error::UnsupportedTopology`] when the block decomposition is not
    /// realizable.
    pub fn new(
        grid: &GridConfig,
        options: &RandomFieldOptions,
        comm: Arc<dyn Communicator>,
    ) -> Result<Self> {
        let dim = grid.cells.len();
        if !(1..=3).contains(&dim) {
            return Err(Error::GeometryMismatch(format!(
                "dimension must be 1, 2 or 3, got {dim}"
            )));
        }
        if grid.extensions.len() != dim {
            return Err(Error::GeometryMismatch(format!(
                "{} extensions given for {dim} cell axes",
                grid.extensions.len()
            )));
        }
        if grid.extensions.iter().any(|&e| e <= 0.0) {
            return Err(Error::GeometryMismatch(
                "extensions must be positive".into(),
            ));
        }
        if grid.cells.iter().any(|&c| c == 0) {
            return Err(Error::GeometryMismatch("cell counts must be positive".into()));
        }

        let mut embedding_factor = options.embedding_factor.max(1);
        if options.periodic && embedding_factor != 1 {
            if options.verbose && comm.rank() == 0 {
                log::info!(
                    "periodic boundary conditions are synonymous with embedding factor 1, \
                     enforcing consistency"
                );
            }
            embedding_factor = 1;
        }

        let proc_per_dim = load_balance(&grid.cells, comm.size());

        let mut descriptor = Self {
            comm,
            dim,
            extensions: grid.extensions.clone(),
            cells: grid.cells.clone(),
            meshsize: vec![0.0; dim],
            cell_volume: 0.0,
            level: 0,
            periodic: options.periodic,
            embedding_factor,
            verbose: options.verbose,
            proc_per_dim,
            eval_procs: 0,
            extended_cells: vec![0; dim],
            domain_size: 0,
            extended_size: 0,
            alloc_local: 0,
            local_n0: 0,
            local_0_start: 0,
            local_cells: vec![0; dim],
            local_offset: vec![0; dim],
            local_domain_size: 0,
            local_extended_cells: vec![0; dim],
            local_extended_offset: vec![0; dim],
            local_extended_size: 0,
            local_eval_cells: vec![0; dim],
            local_eval_offset: vec![0; dim],
        };
        descriptor.update()?;
        Ok(descriptor)
    }

    /// Recompute all derived quantities after construction or a level change.
    fn update(&mut self) -> Result<()> {
        let procs = self.comm.size();
        let rank = self.comm.rank();

        // The distributed transform splits the last axis equally.
        if self.cells[self.dim - 1] % procs != 0 {
            return Err(Error::GeometryMismatch(format!(
                "number of cells in last dimension ({}) must be a multiple of the rank count ({procs})",
                self.cells[self.dim - 1]
            )));
        }
        if self.dim == 1 && self.cells[0] % (procs * procs) != 0 {
            return Err(Error::GeometryMismatch(format!(
                "in 1D the number of cells ({}) must be a multiple of the rank count squared ({})",
                self.cells[0],
                procs * procs
            )));
        }

        // Block decomposition: equal split per axis, so the rank count has to
        // be a perfect dim-th power and every axis must divide evenly.
        let mut eval_procs = 1;
        while pow_dim(eval_procs, self.dim) < procs {
            eval_procs += 1;
        }
        if pow_dim(eval_procs, self.dim) != procs {
            return Err(Error::UnsupportedTopology(format!(
                "{procs} ranks cannot form a {}-dimensional block decomposition",
                self.dim
            )));
        }
        self.eval_procs = eval_procs;
        for i in 0..self.dim {
            if self.cells[i] % eval_procs != 0 {
                return Err(Error::GeometryMismatch(format!(
                    "cells[{i}] = {} does not split across {} blocks per axis",
                    self.cells[i], eval_procs
                )));
            }
        }

        for i in 0..self.dim {
            self.meshsize[i] = self.extensions[i] / self.cells[i] as f64;
            self.extended_cells[i] = self.embedding_factor * self.cells[i];
        }

        // Slab sizes of the distributed transform: the last (extended) axis
        // splits equally across ranks.
        self.local_n0 = self.extended_cells[self.dim - 1] / procs;
        self.local_0_start = rank * self.local_n0;
        self.alloc_local = self.extended_cells[..self.dim - 1]
            .iter()
            .product::<usize>()
            * self.local_n0;

        for i in 0..self.dim - 1 {
            self.local_extended_cells[i] = self.extended_cells[i];
            self.local_extended_offset[i] = 0;
            self.local_cells[i] = self.cells[i];
            self.local_offset[i] = 0;
        }
        self.local_extended_cells[self.dim - 1] = self.local_n0;
        self.local_extended_offset[self.dim - 1] = self.local_0_start;
        self.local_cells[self.dim - 1] = self.local_n0 / self.embedding_factor;
        self.local_offset[self.dim - 1] = self.local_0_start / self.embedding_factor;

        self.domain_size = self.cells.iter().product();
        self.extended_size = self.extended_cells.iter().product();
        self.local_domain_size = self.local_cells.iter().product();
        self.local_extended_size = self.local_extended_cells.iter().product();
        self.cell_volume = self.meshsize.iter().product();

        for i in 0..self.dim {
            self.local_eval_cells[i] = self.cells[i] / eval_procs;
        }
        match self.dim {
            3 => {
                let p = eval_procs;
                self.local_eval_offset[0] = (rank % (p * p)) % p * self.local_eval_cells[0];
                self.local_eval_offset[1] = (rank % (p * p)) / p * self.local_eval_cells[1];
                self.local_eval_offset[2] = rank / (p * p) * self.local_eval_cells[2];
            }
            2 => {
                let p = eval_procs;
                self.local_eval_offset[0] = rank % p * self.local_eval_cells[0];
                self.local_eval_offset[1] = rank / p * self.local_eval_cells[1];
            }
            _ => {
                self.local_eval_offset[0] = rank * self.local_eval_cells[0];
            }
        }

        if self.verbose && rank == 0 {
            log::info!(
                "random field: {} global cells, {} local, cell volume {:.3e}, level {}",
                self.domain_size,
                self.local_domain_size,
                self.cell_volume,
                self.level
            );
        }

        Ok(())
    }

    /// Double the resolution in every dimension.
    pub fn refine(&mut self) -> Result<()> {
        for c in &mut self.cells {
            *c *= 2;
        }
        self.level += 1;
        self.update()
    }

    /// Halve the resolution in every dimension; fails on odd cell counts.
    pub fn coarsen(&mut self) -> Result<()> {
        if self.cells.iter().any(|&c| c % 2 != 0) {
            return Err(Error::GeometryMismatch(
                "cannot coarsen an odd number of cells".into(),
            ));
        }
        for c in &mut self.cells {
            *c /= 2;
        }
        self.level -= 1;
        self.update()
    }

    /// Convert spatial coordinates into block-local integer indices relative
    /// to `offset`; entries may be negative or one past the end for
    /// coordinates adjacent to the local block.
    pub fn coords_to_indices(&self, location: &[f64], offset: &[usize]) -> Vec<isize> {
        (0..self.dim)
            .map(|i| {
                let global =
                    (location[i] * (self.cells[i] as f64 + 1e-6) / self.extensions[i]).floor();
                global as isize - offset[i] as isize
            })
            .collect()
    }

    /// Convert local integer indices relative to `offset` into the cell
    /// center coordinates.
    pub fn indices_to_coords(&self, indices: &[usize], offset: &[usize]) -> Vec<f64> {
        (0..self.dim)
            .map(|i| ((indices[i] + offset[i]) as f64 + 0.5) * self.meshsize[i])
            .collect()
    }

    pub fn comm(&self) -> &Arc<dyn Communicator> {
        &self.comm
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn extensions(&self) -> &[f64] {
        &self.extensions
    }

    pub fn cells(&self) -> &[usize] {
        &self.cells
    }

    pub fn meshsize(&self) -> &[f64] {
        &self.meshsize
    }

    pub fn cell_volume(&self) -> f64 {
        self.cell_volume
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn periodic(&self) -> bool {
        self.periodic
    }

    pub fn embedding_factor(&self) -> usize {
        self.embedding_factor
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }

    /// Process grid chosen by the load balancer.
    pub fn proc_per_dim(&self) -> &[usize] {
        &self.proc_per_dim
    }

    /// Ranks per axis of the block decomposition (`p` with `p^dim` ranks).
    pub fn eval_procs(&self) -> usize {
        self.eval_procs
    }

    pub fn extended_cells(&self) -> &[usize] {
        &self.extended_cells
    }

    pub fn domain_size(&self) -> usize {
        self.domain_size
    }

    pub fn extended_size(&self) -> usize {
        self.extended_size
    }

    /// Local buffer length of the distributed transform.
    pub fn alloc_local(&self) -> usize {
        self.alloc_local
    }

    /// Local slab height along the last extended axis.
    pub fn local_n0(&self) -> usize {
        self.local_n0
    }

    /// First owned row along the last extended axis.
    pub fn local_0_start(&self) -> usize {
        self.local_0_start
    }

    pub fn local_cells(&self) -> &[usize] {
        &self.local_cells
    }

    pub fn local_offset(&self) -> &[usize] {
        &self.local_offset
    }

    pub fn local_domain_size(&self) -> usize {
        self.local_domain_size
    }

    pub fn local_extended_cells(&self) -> &[usize] {
        &self.local_extended_cells
    }

    pub fn local_extended_offset(&self) -> &[usize] {
        &self.local_extended_offset
    }

    pub fn local_extended_size(&self) -> usize {
        self.local_extended_size
    }

    pub fn local_eval_cells(&self) -> &[usize] {
        &self.local_eval_cells
    }

    pub fn local_eval_offset(&self) -> &[usize] {
        &self.local_eval_offset
    }
}

fn pow_dim(base: usize, dim: usize) -> usize {
    let mut result = 1;
    for _ in 0..dim {
        result *= base;
    }
    result
}
