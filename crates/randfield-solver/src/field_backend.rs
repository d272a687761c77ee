//! Working-field backend on the embedded torus.
//!
//! Holds the complex DFT buffer a field is pushed through during sampling
//! and multiplication. `field_to_extended` redistributes a physical slab
//! (cells split over all ranks along the last axis) into the extended slab
//! (m·cells split the same way), zero-padding the embedded region;
//! `extended_to_field` is the exact reverse. Because one complex inverse
//! transform of an independently filled spectrum yields two independent real
//! fields, the imaginary extraction (`which = 1`) is a free spare sample and
//! `has_spare_field` reports true.

use std::sync::Arc;

use num_complex::Complex64;

use randfield_core::comm::Communicator;
use randfield_core::grid::{indices_to_linear, linear_to_indices, DomainDescriptor};

use crate::dfft::DistributedFft;

const EMBED_TAG: u32 = 80;
const EXTRACT_TAG: u32 = 81;

pub struct DftFieldBackend {
    comm: Arc<dyn Communicator>,
    dim: usize,
    embedding_factor: usize,
    local_rows: usize,
    local_domain_size: usize,
    local_extended_size: usize,
    extended_size: usize,
    phys_pencils: usize,
    ext_pencils: usize,
    pencil_map: Vec<usize>,
    fft: DistributedFft,
    buffer: Vec<Complex64>,
}

impl DftFieldBackend {
    pub fn new(descriptor: &DomainDescriptor) -> Self {
        let comm = Arc::clone(descriptor.comm());
        let fft = DistributedFft::new(
            Arc::clone(&comm),
            descriptor.extended_cells(),
            descriptor.local_n0(),
        );
        let mut backend = Self {
            comm,
            dim: descriptor.dim(),
            embedding_factor: 0,
            local_rows: 0,
            local_domain_size: 0,
            local_extended_size: 0,
            extended_size: 0,
            phys_pencils: 0,
            ext_pencils: 0,
            pencil_map: Vec::new(),
            fft,
            buffer: Vec::new(),
        };
        backend.update(descriptor);
        backend
    }

    /// Refresh all layout data after a geometry change.
    pub fn update(&mut self, descriptor: &DomainDescriptor) {
        self.dim = descriptor.dim();
        self.embedding_factor = descriptor.embedding_factor();
        self.local_rows = descriptor.local_cells()[self.dim - 1];
        self.local_domain_size = descriptor.local_domain_size();
        self.local_extended_size = descriptor.local_extended_size();
        self.extended_size = descriptor.extended_size();
        self.phys_pencils = descriptor.cells()[..self.dim - 1].iter().product();
        self.ext_pencils = descriptor.extended_cells()[..self.dim - 1].iter().product();
        self.fft = DistributedFft::new(
            Arc::clone(&self.comm),
            descriptor.extended_cells(),
            descriptor.local_n0(),
        );

        // Inner-axis embedding: physical pencil index -> extended pencil
        // index, used when padding rows into the torus.
        let phys_bound = &descriptor.cells()[..self.dim - 1];
        let ext_bound = &descriptor.extended_cells()[..self.dim - 1];
        let mut indices = [0usize; 3];
        self.pencil_map = (0..self.phys_pencils)
            .map(|q| {
                linear_to_indices(q, phys_bound, &mut indices[..self.dim - 1]);
                indices_to_linear(&indices[..self.dim - 1], ext_bound)
            })
            .collect();

        self.buffer = vec![Complex64::ZERO; self.local_extended_size];
    }

    /// Reset the working buffer.
    pub fn allocate(&mut self) {
        self.buffer.fill(Complex64::ZERO);
    }

    pub fn local_field_size(&self) -> usize {
        self.local_extended_size
    }

    /// Whether the backend yields a free second sample per inverse
    /// transform.
    pub fn has_spare_field(&self) -> bool {
        true
    }

    /// Layout hook for transforms with transposed distributions; the DFT
    /// buffer already matches the slab layout.
    pub fn transpose_if_needed(&mut self) {}

    /// Write a spectral sample: `√λ·(r1 + i·r2)`, scaled so the
    /// unnormalized inverse transform yields unit-variance noise times √λ.
    pub fn set(&mut self, index: usize, lambda: f64, rand1: f64, rand2: f64) {
        let scale = lambda.sqrt() / (self.extended_size as f64).sqrt();
        self.buffer[index] = Complex64::new(rand1 * scale, rand2 * scale);
    }

    /// Scale one spectral bin.
    pub fn mult(&mut self, index: usize, factor: f64) {
        self.buffer[index] *= factor;
    }

    /// Forward transform; includes the 1/N normalization of the symbol
    /// convention.
    pub fn forward_transform(&mut self) {
        self.fft.forward(&mut self.buffer);
        let inv_n = 1.0 / self.extended_size as f64;
        for value in &mut self.buffer {
            *value *= inv_n;
        }
    }

    /// Unnormalized backward transform.
    pub fn backward_transform(&mut self) {
        self.fft.inverse(&mut self.buffer);
    }

    /// Copy a slab-layout physical field into the torus buffer, zero-padding
    /// the embedded region.
    ///
    /// The physical block of rank `r` lands wholly on extended-owner rank
    /// `r / m` at row slot `r mod m`; inner axes pad through the pencil map.
    pub fn field_to_extended(&mut self, input: &[f64]) {
        assert_eq!(input.len(), self.local_domain_size);
        self.buffer.fill(Complex64::ZERO);

        let m = self.embedding_factor;
        let rank = self.comm.rank();
        let size = self.comm.size();
        let rows = self.local_rows;

        if size == 1 {
            for z in 0..rows {
                for q in 0..self.phys_pencils {
                    self.buffer[self.pencil_map[q] + self.ext_pencils * z] =
                        Complex64::new(input[q + self.phys_pencils * z], 0.0);
                }
            }
            return;
        }

        let dest = rank / m;
        if dest == rank {
            self.place_rows(input, rank % m);
        } else {
            self.comm.send(dest, EMBED_TAG, input);
        }

        for slot in 0..m {
            let src = rank * m + slot;
            if src >= size {
                break;
            }
            if src == rank {
                continue; // placed above
            }
            let chunk = self.comm.recv(src, EMBED_TAG);
            self.place_rows(&chunk, slot);
        }
        self.comm.barrier();
    }

    fn place_rows(&mut self, chunk: &[f64], slot: usize) {
        let rows = self.local_rows;
        for z in 0..rows {
            for q in 0..self.phys_pencils {
                self.buffer[self.pencil_map[q] + self.ext_pencils * (slot * rows + z)] =
                    Complex64::new(chunk[q + self.phys_pencils * z], 0.0);
            }
        }
    }

    /// Extract the physical subregion; `which = 0` reads the real part,
    /// `which = 1` the imaginary spare field.
    pub fn extended_to_field(&self, output: &mut [f64], which: usize) {
        assert_eq!(output.len(), self.local_domain_size);
        assert!(which < 2, "DFT backend carries exactly two fields");

        let m = self.embedding_factor;
        let rank = self.comm.rank();
        let size = self.comm.size();
        let rows = self.local_rows;

        if size == 1 {
            for z in 0..rows {
                for q in 0..self.phys_pencils {
                    output[q + self.phys_pencils * z] =
                        self.pick(self.pencil_map[q] + self.ext_pencils * z, which);
                }
            }
            return;
        }

        let mut own_chunk = Vec::new();
        for slot in 0..m {
            let dest = rank * m + slot;
            if dest >= size {
                break;
            }
            let mut chunk = Vec::with_capacity(self.local_domain_size);
            for z in 0..rows {
                for q in 0..self.phys_pencils {
                    chunk.push(
                        self.pick(self.pencil_map[q] + self.ext_pencils * (slot * rows + z), which),
                    );
                }
            }
            if dest == rank {
                own_chunk = chunk;
            } else {
                self.comm.send(dest, EXTRACT_TAG, &chunk);
            }
        }

        let src = rank / m;
        if src == rank {
            output.copy_from_slice(&own_chunk);
        } else {
            let chunk = self.comm.recv(src, EXTRACT_TAG);
            output.copy_from_slice(&chunk);
        }
        self.comm.barrier();
    }

    fn pick(&self, index: usize, which: usize) -> f64 {
        if which == 0 {
            self.buffer[index].re
        } else {
            self.buffer[index].im
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use randfield_core::comm::{LocalWorld, SelfComm};
    use randfield_core::config::{GridConfig, RandomFieldOptions};

    fn descriptor(cells: &[usize], comm: Arc<dyn Communicator>) -> DomainDescriptor {
        let grid = GridConfig {
            extensions: vec![1.0; cells.len()],
            cells: cells.to_vec(),
        };
        DomainDescriptor::new(&grid, &RandomFieldOptions::default(), comm).unwrap()
    }

    #[test]
    fn serial_embed_extract_round_trip() {
        let comm: Arc<dyn Communicator> = Arc::new(SelfComm::new());
        let desc = descriptor(&[4, 4], comm);
        let mut backend = DftFieldBackend::new(&desc);

        let input: Vec<f64> = (0..16).map(|i| i as f64 + 1.0).collect();
        backend.field_to_extended(&input);

        // Embedded region is zero-padded.
        let nonzero = backend.buffer.iter().filter(|v| v.norm() > 0.0).count();
        assert_eq!(nonzero, 16);

        let mut output = vec![0.0; 16];
        backend.extended_to_field(&mut output, 0);
        assert_eq!(output, input);

        let mut spare = vec![0.0; 16];
        backend.extended_to_field(&mut spare, 1);
        assert!(spare.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn embed_places_values_at_matching_global_cells() {
        let comm: Arc<dyn Communicator> = Arc::new(SelfComm::new());
        let desc = descriptor(&[4, 4], comm);
        let mut backend = DftFieldBackend::new(&desc);

        let mut input = vec![0.0; 16];
        input[1 + 4 * 2] = 5.0; // cell (1, 2)
        backend.field_to_extended(&input);

        // Extended torus is 8x8; the value sits at (1, 2) there as well.
        assert_eq!(backend.buffer[1 + 8 * 2], Complex64::new(5.0, 0.0));
    }

    #[test]
    fn parallel_embed_extract_round_trip() {
        LocalWorld::run(4, |comm| {
            let rank = comm.rank();
            let comm: Arc<dyn Communicator> = Arc::new(comm);
            let desc = descriptor(&[8, 8], Arc::clone(&comm));
            let mut backend = DftFieldBackend::new(&desc);

            let input: Vec<f64> = (0..desc.local_domain_size())
                .map(|i| (rank * 100 + i) as f64)
                .collect();
            backend.field_to_extended(&input);

            let mut output = vec![0.0; input.len()];
            backend.extended_to_field(&mut output, 0);
            assert_eq!(output, input);
        });
    }

    #[test]
    fn parallel_embed_matches_serial_layout() {
        // Serial reference: embed the same global field on one rank.
        let global: Vec<f64> = (0..64).map(|i| i as f64).collect();
        let serial_buffer = {
            let comm: Arc<dyn Communicator> = Arc::new(SelfComm::new());
            let desc = descriptor(&[8, 8], comm);
            let mut backend = DftFieldBackend::new(&desc);
            backend.field_to_extended(&global);
            backend.buffer.clone()
        };

        let global_ref = &global;
        let serial_ref = &serial_buffer;
        LocalWorld::run(4, move |comm| {
            let rank = comm.rank();
            let comm: Arc<dyn Communicator> = Arc::new(comm);
            let desc = descriptor(&[8, 8], Arc::clone(&comm));
            let mut backend = DftFieldBackend::new(&desc);

            // Physical slab of this rank: rows [rank*2, rank*2+2).
            let slab: Vec<f64> = global_ref[rank * 16..(rank + 1) * 16].to_vec();
            backend.field_to_extended(&slab);

            // Extended slab of this rank: rows [rank*4, rank*4+4) of 16.
            for (i, value) in backend.buffer.iter().enumerate() {
                let expected = serial_ref[rank * 64 + i];
                assert_eq!(*value, expected, "rank {rank} entry {i}");
            }
        });
    }

    #[test]
    fn spectral_set_scales_by_sqrt_lambda() {
        let comm: Arc<dyn Communicator> = Arc::new(SelfComm::new());
        let desc = descriptor(&[4], comm);
        let mut backend = DftFieldBackend::new(&desc);
        backend.allocate();
        backend.set(0, 4.0, 1.0, -1.0);

        // sqrt(4) / sqrt(8 extended cells)
        let expected = 2.0 / 8f64.sqrt();
        assert!((backend.buffer[0].re - expected).abs() < 1e-15);
        assert!((backend.buffer[0].im + expected).abs() < 1e-15);
    }
}
