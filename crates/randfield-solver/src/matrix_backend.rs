//! Spectral-symbol backend.
//!
//! Stores the covariance row of the embedded circulant on the local portion
//! of the extended torus and turns it into the spectral symbol λ with one
//! forward transform. The full complex DFT layout is used, which is valid in
//! every dimension and matches the field backend cell-for-cell, so symbol
//! lookups during multiplication are direct index reads. Entries of the
//! transformed symbol are real (the covariance row is centro-symmetric);
//! `get`/`eval` expose the real part.

use std::sync::Arc;

use num_complex::Complex64;

use randfield_core::comm::Communicator;
use randfield_core::grid::DomainDescriptor;

use crate::dfft::DistributedFft;

pub struct DftMatrixBackend {
    comm: Arc<dyn Communicator>,
    local_cells: Vec<usize>,
    local_offset: Vec<usize>,
    local_size: usize,
    fft: DistributedFft,
    buffer: Vec<Complex64>,
    valid: bool,
}

impl DftMatrixBackend {
    pub fn new(descriptor: &DomainDescriptor) -> Self {
        let comm = Arc::clone(descriptor.comm());
        let fft = DistributedFft::new(
            Arc::clone(&comm),
            descriptor.extended_cells(),
            descriptor.local_n0(),
        );
        let mut backend = Self {
            comm,
            local_cells: Vec::new(),
            local_offset: Vec::new(),
            local_size: 0,
            fft,
            buffer: Vec::new(),
            valid: false,
        };
        backend.update(descriptor);
        backend
    }

    /// Refresh the layout after a geometry change; invalidates the symbol.
    pub fn update(&mut self, descriptor: &DomainDescriptor) {
        self.local_cells = descriptor.local_extended_cells().to_vec();
        self.local_offset = descriptor.local_extended_offset().to_vec();
        self.local_size = descriptor.local_extended_size();
        self.fft = DistributedFft::new(
            Arc::clone(&self.comm),
            descriptor.extended_cells(),
            descriptor.local_n0(),
        );
        self.buffer = Vec::new();
        self.valid = false;
    }

    /// Allocate (or reset) the symbol buffer before a fill.
    pub fn allocate(&mut self) {
        self.buffer = vec![Complex64::ZERO; self.local_size];
    }

    pub fn local_matrix_size(&self) -> usize {
        self.local_size
    }

    /// Extended cells owned by this rank, slab layout.
    pub fn local_matrix_cells(&self) -> &[usize] {
        &self.local_cells
    }

    /// Global offset of the owned extended cells.
    pub fn local_matrix_offset(&self) -> &[usize] {
        &self.local_offset
    }

    pub fn set(&mut self, index: usize, value: f64) {
        self.buffer[index] = Complex64::new(value, 0.0);
    }

    pub fn get(&self, index: usize) -> f64 {
        self.buffer[index].re
    }

    /// Symbol lookup during multiplication; same layout as the field
    /// backend.
    pub fn eval(&self, index: usize) -> f64 {
        self.buffer[index].re
    }

    /// Transform the covariance row into the spectral symbol (unnormalized,
    /// so the entries are the circulant eigenvalues).
    pub fn forward_transform(&mut self) {
        self.fft.forward(&mut self.buffer);
    }

    pub fn valid(&self) -> bool {
        self.valid
    }

    pub fn set_valid(&mut self, valid: bool) {
        self.valid = valid;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use randfield_core::comm::SelfComm;
    use randfield_core::config::{GridConfig, RandomFieldOptions};

    fn descriptor(cells: &[usize]) -> DomainDescriptor {
        let grid = GridConfig {
            extensions: vec![1.0; cells.len()],
            cells: cells.to_vec(),
        };
        DomainDescriptor::new(
            &grid,
            &RandomFieldOptions::default(),
            Arc::new(SelfComm::new()),
        )
        .unwrap()
    }

    #[test]
    fn impulse_row_gives_flat_symbol() {
        let desc = descriptor(&[8]);
        let mut backend = DftMatrixBackend::new(&desc);
        backend.allocate();
        backend.set(0, 2.5);
        backend.forward_transform();
        for i in 0..backend.local_matrix_size() {
            assert!((backend.eval(i) - 2.5).abs() < 1e-12);
        }
    }

    #[test]
    fn symmetric_row_gives_real_symbol() {
        let desc = descriptor(&[8]);
        let mut backend = DftMatrixBackend::new(&desc);
        backend.allocate();
        // Even sequence on the 16-cell torus.
        let n = backend.local_matrix_size();
        for i in 0..n {
            let d = i.min(n - i) as f64;
            backend.set(i, (-d / 4.0).exp());
        }
        backend.forward_transform();
        for value in &backend.buffer {
            assert!(value.im.abs() < 1e-12);
        }
        // The exponential row has a strictly positive symbol.
        for i in 0..n {
            assert!(backend.eval(i) > 0.0);
        }
    }

    #[test]
    fn update_invalidates_symbol() {
        let mut desc = descriptor(&[8]);
        let mut backend = DftMatrixBackend::new(&desc);
        backend.allocate();
        backend.set_valid(true);
        desc.refine().unwrap();
        backend.update(&desc);
        assert!(!backend.valid());
        assert_eq!(backend.local_matrix_size(), 32);
    }
}
