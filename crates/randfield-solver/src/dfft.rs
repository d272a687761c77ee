//! Distributed multidimensional Fourier transform.
//!
//! Complex DFT over the extended torus, slab-split along the last axis.
//! All axes except the last are rank-local and run as `rustfft` line
//! transforms. The last axis is distributed: on the fast path the pencils
//! (the product of the other axes) are split evenly across ranks via an
//! all-to-all transpose, each rank transforms full last-axis lines, and the
//! transpose is reversed. When the pencil count does not divide the rank
//! count (always the case in 1D with more than one rank) an allgather
//! fallback assembles the full axis locally.
//!
//! Transforms are unnormalized in both directions; callers apply whatever
//! scaling their convention requires.

use std::sync::Arc;

use num_complex::Complex64;
use rustfft::{Fft, FftPlanner};

use randfield_core::comm::Communicator;

const TRANSPOSE_TAG: u32 = 64;
const UNTRANSPOSE_TAG: u32 = 65;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Inverse,
}

/// Slab-distributed DFT plan for a fixed extended geometry.
pub struct DistributedFft {
    comm: Arc<dyn Communicator>,
    dims: Vec<usize>,
    local_last: usize,
    forward: Vec<Arc<dyn Fft<f64>>>,
    inverse: Vec<Arc<dyn Fft<f64>>>,
}

impl DistributedFft {
    /// Plan transforms for the extended cells `dims` (axis 0 fastest) with
    /// `local_last` slab rows per rank.
    pub fn new(comm: Arc<dyn Communicator>, dims: &[usize], local_last: usize) -> Self {
        let mut planner = FftPlanner::new();
        let forward = dims.iter().map(|&n| planner.plan_fft_forward(n)).collect();
        let inverse = dims.iter().map(|&n| planner.plan_fft_inverse(n)).collect();
        Self {
            comm,
            dims: dims.to_vec(),
            local_last,
            forward,
            inverse,
        }
    }

    /// Length of the local slab buffer.
    pub fn local_len(&self) -> usize {
        self.pencils() * self.local_last
    }

    fn dim(&self) -> usize {
        self.dims.len()
    }

    /// Product of all axes except the last.
    fn pencils(&self) -> usize {
        self.dims[..self.dim() - 1].iter().product()
    }

    fn plan(&self, axis: usize, direction: Direction) -> &Arc<dyn Fft<f64>> {
        match direction {
            Direction::Forward => &self.forward[axis],
            Direction::Inverse => &self.inverse[axis],
        }
    }

    /// In-place unnormalized forward transform of the local slab.
    pub fn forward(&self, buffer: &mut [Complex64]) {
        self.transform(buffer, Direction::Forward);
    }

    /// In-place unnormalized inverse transform of the local slab.
    pub fn inverse(&self, buffer: &mut [Complex64]) {
        self.transform(buffer, Direction::Inverse);
    }

    fn transform(&self, buffer: &mut [Complex64], direction: Direction) {
        assert_eq!(buffer.len(), self.local_len(), "slab buffer length");

        for axis in 0..self.dim() - 1 {
            self.transform_local_axis(buffer, axis, direction);
        }

        if self.comm.size() == 1 {
            self.transform_local_axis(buffer, self.dim() - 1, direction);
        } else if self.pencils() % self.comm.size() == 0 {
            self.transform_last_axis_transposed(buffer, direction);
        } else {
            self.transform_last_axis_gathered(buffer, direction);
        }
    }

    /// Line transforms along a rank-local axis.
    fn transform_local_axis(&self, buffer: &mut [Complex64], axis: usize, direction: Direction) {
        let n = self.dims[axis];
        let plan = Arc::clone(self.plan(axis, direction));
        if n == 1 {
            return;
        }

        let inner_stride: usize = self.dims[..axis].iter().product();
        if inner_stride == 1 {
            for line in buffer.chunks_exact_mut(n) {
                plan.process(line);
            }
            return;
        }

        let line_block = inner_stride * n;
        let mut scratch = vec![Complex64::ZERO; n];
        for block in buffer.chunks_exact_mut(line_block) {
            for lane in 0..inner_stride {
                for (k, value) in scratch.iter_mut().enumerate() {
                    *value = block[lane + k * inner_stride];
                }
                plan.process(&mut scratch);
                for (k, value) in scratch.iter().enumerate() {
                    block[lane + k * inner_stride] = *value;
                }
            }
        }
    }

    /// Fast path: all-to-all transpose, local line transforms, reverse
    /// transpose.
    fn transform_last_axis_transposed(&self, buffer: &mut [Complex64], direction: Direction) {
        let size = self.comm.size();
        let rank = self.comm.rank();
        let n_last = self.dims[self.dim() - 1];
        let h = self.local_last;
        let pencils = self.pencils();
        let pencils_local = pencils / size;
        let plan = Arc::clone(self.plan(self.dim() - 1, direction));

        // Exchange slab blocks so this rank owns full lines for its pencil
        // range; blocks travel [z][pencil]-ordered.
        let mut own_block = Vec::new();
        for dest in 0..size {
            let mut block = Vec::with_capacity(2 * h * pencils_local);
            for z in 0..h {
                for q in dest * pencils_local..(dest + 1) * pencils_local {
                    let value = buffer[q + pencils * z];
                    block.push(value.re);
                    block.push(value.im);
                }
            }
            if dest == rank {
                own_block = block;
            } else {
                self.comm.send(dest, TRANSPOSE_TAG, &block);
            }
        }

        let mut columns = vec![Complex64::ZERO; n_last * pencils_local];
        for src in 0..size {
            let block = if src == rank {
                std::mem::take(&mut own_block)
            } else {
                self.comm.recv(src, TRANSPOSE_TAG)
            };
            for z in 0..h {
                for q_local in 0..pencils_local {
                    let at = 2 * (q_local + pencils_local * z);
                    columns[(src * h + z) + n_last * q_local] =
                        Complex64::new(block[at], block[at + 1]);
                }
            }
        }

        for line in columns.chunks_exact_mut(n_last) {
            plan.process(line);
        }

        // Reverse exchange back into the slab layout.
        let mut own_back = Vec::new();
        for dest in 0..size {
            let mut block = Vec::with_capacity(2 * h * pencils_local);
            for z in dest * h..(dest + 1) * h {
                for q_local in 0..pencils_local {
                    let value = columns[z + n_last * q_local];
                    block.push(value.re);
                    block.push(value.im);
                }
            }
            if dest == rank {
                own_back = block;
            } else {
                self.comm.send(dest, UNTRANSPOSE_TAG, &block);
            }
        }

        for src in 0..size {
            let block = if src == rank {
                std::mem::take(&mut own_back)
            } else {
                self.comm.recv(src, UNTRANSPOSE_TAG)
            };
            for z in 0..h {
                for q_local in 0..pencils_local {
                    let at = 2 * (q_local + pencils_local * z);
                    buffer[(src * pencils_local + q_local) + pencils * z] =
                        Complex64::new(block[at], block[at + 1]);
                }
            }
        }

        self.comm.barrier();
    }

    /// Fallback: gather the whole torus, transform the last axis locally and
    /// keep the owned slab.
    fn transform_last_axis_gathered(&self, buffer: &mut [Complex64], direction: Direction) {
        let rank = self.comm.rank();
        let n_last = self.dims[self.dim() - 1];
        let h = self.local_last;
        let pencils = self.pencils();
        let plan = Arc::clone(self.plan(self.dim() - 1, direction));

        let mut packed = Vec::with_capacity(2 * buffer.len());
        for value in buffer.iter() {
            packed.push(value.re);
            packed.push(value.im);
        }
        let full = self.comm.all_gather(&packed);

        // Rank slabs concatenate to the global array in flat order.
        let mut line = vec![Complex64::ZERO; n_last];
        for q in 0..pencils {
            for z in 0..n_last {
                let at = 2 * (q + pencils * z);
                line[z] = Complex64::new(full[at], full[at + 1]);
            }
            plan.process(&mut line);
            for z_local in 0..h {
                buffer[q + pencils * z_local] = line[rank * h + z_local];
            }
        }
    }
}
