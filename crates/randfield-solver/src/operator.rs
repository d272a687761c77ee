//! The covariance operator.
//!
//! Ties the matrix, field and RNG backends together over one domain
//! descriptor and implements the circulant-embedding machinery: sampling
//! with prescribed spectrum, multiplication by C and C^{1/2}, and the
//! preconditioned conjugate-gradient loop behind C^{-1}.
//!
//! The spectral symbol is materialized lazily the first time a sample or a
//! multiplication needs it. All three multiplications share one pipeline:
//! extend the field onto the torus with zero padding, transform, scale every
//! bin, transform back, extract. The direct spectral inverse is exact only
//! on the torus, so it serves as the preconditioner and initial iterate of
//! the CG loop; the CG result is the user-visible inverse.

use std::sync::Arc;

use nalgebra::DVector;

use randfield_core::comm::Communicator;
use randfield_core::config::{RandomFieldOptions, StochasticConfig};
use randfield_core::grid::{linear_to_indices, DomainDescriptor};
use randfield_field::StochasticField;
use randfield_kernels::{AnisotropyMap, Kernel};

use crate::error::{Error, Result};
use crate::field_backend::DftFieldBackend;
use crate::matrix_backend::DftMatrixBackend;
use crate::rng::{RandomSource, RngBackend};

#[derive(Clone, Copy)]
enum SpectralScale {
    Symbol,
    Root,
    Inverse,
}

pub struct CovarianceOperator {
    comm: Arc<dyn Communicator>,
    dim: usize,
    variance: f64,
    kernel: Kernel,
    anisotropy: AnisotropyMap,
    extensions: Vec<f64>,
    meshsize: Vec<f64>,
    embedding_factor: usize,
    approximate: bool,
    verbose: bool,
    cg_iterations: usize,
    local_domain_size: usize,

    matrix: DftMatrixBackend,
    field: DftFieldBackend,
    rng: Box<dyn RandomSource>,
    spare: Option<DVector<f64>>,
}

impl CovarianceOperator {
    /// Construct the operator for a given geometry and stochastic model.
    ///
    /// Fails when the kernel or anisotropy names are outside the supported
    /// sets.
    pub fn new(
        descriptor: &DomainDescriptor,
        stochastic: &StochasticConfig,
        options: &RandomFieldOptions,
    ) -> Result<Self> {
        let kernel: Kernel = stochastic.covariance.parse()?;
        let anisotropy = AnisotropyMap::from_config(stochastic, descriptor.dim())?;

        let mut operator = Self {
            comm: Arc::clone(descriptor.comm()),
            dim: descriptor.dim(),
            variance: stochastic.variance,
            kernel,
            anisotropy,
            extensions: Vec::new(),
            meshsize: Vec::new(),
            embedding_factor: 0,
            approximate: options.approximate,
            verbose: options.verbose,
            cg_iterations: options.cg_iterations,
            local_domain_size: 0,
            matrix: DftMatrixBackend::new(descriptor),
            field: DftFieldBackend::new(descriptor),
            rng: RngBackend::default().build(0),
            spare: None,
        };
        operator.update(descriptor);
        Ok(operator)
    }

    /// Select the RNG backend at construction.
    pub fn with_rng(mut self, backend: RngBackend) -> Self {
        self.set_rng(backend);
        self
    }

    /// Swap the RNG backend; the stream is reseeded on the next generation.
    pub fn set_rng(&mut self, backend: RngBackend) {
        self.rng = backend.build(0);
    }

    /// Refresh after a geometry change; invalidates the symbol and the
    /// spare-field cache.
    pub fn update(&mut self, descriptor: &DomainDescriptor) {
        self.extensions = descriptor.extensions().to_vec();
        self.meshsize = descriptor.meshsize().to_vec();
        self.embedding_factor = descriptor.embedding_factor();
        self.local_domain_size = descriptor.local_domain_size();
        self.matrix.update(descriptor);
        self.field.update(descriptor);
        self.spare = None;
    }

    pub fn variance(&self) -> f64 {
        self.variance
    }

    /// Draw a correlated sample with the prescribed covariance.
    ///
    /// Every rank seeds its stream with `seed + rank`. One complex inverse
    /// transform yields two independent real fields; the second is cached
    /// and consumed, without transforming, by the next call.
    pub fn generate_field(&mut self, seed: u64, output: &mut StochasticField) -> Result<()> {
        if !self.matrix.valid() {
            self.fill_transformed_matrix()?;
        }
        self.field.allocate();

        if let Some(spare) = self.spare.take() {
            output.data_mut().copy_from(&spare);
            return Ok(());
        }

        self.rng
            .reseed(seed.wrapping_add(self.comm.rank() as u64));
        self.field.transpose_if_needed();

        for index in 0..self.field.local_field_size() {
            let lambda = self.matrix.eval(index);
            let rand1 = self.rng.sample();
            let rand2 = self.rng.sample();
            self.field.set(index, lambda, rand1, rand2);
        }

        self.field.backward_transform();
        self.field
            .extended_to_field(output.data_mut().as_mut_slice(), 0);

        if self.field.has_spare_field() {
            let mut spare = DVector::zeros(self.local_domain_size);
            self.field.extended_to_field(spare.as_mut_slice(), 1);
            self.spare = Some(spare);
        }

        Ok(())
    }

    /// Fill the output with i.i.d. N(0, 1) noise.
    pub fn generate_uncorrelated_field(&mut self, seed: u64, output: &mut StochasticField) {
        self.rng
            .reseed(seed.wrapping_add(self.comm.rank() as u64));
        for value in output.data_mut().iter_mut() {
            *value = self.rng.sample();
        }
    }

    /// Set the output to the constant variance.
    pub fn set_variance_as_field(&self, output: &mut StochasticField) {
        output.data_mut().fill(self.variance);
    }

    /// `C · x`.
    pub fn multiply(&mut self, input: &StochasticField) -> Result<StochasticField> {
        let mut output = input.clone();
        self.multiply_extended(output.data_mut(), SpectralScale::Symbol)?;
        Ok(output)
    }

    /// `C^{1/2} · x`, exact up to torus boundary effects.
    pub fn multiply_root(&mut self, input: &StochasticField) -> Result<StochasticField> {
        let mut output = input.clone();
        self.multiply_extended(output.data_mut(), SpectralScale::Root)?;
        Ok(output)
    }

    /// `C^{-1} · x` via preconditioned conjugate gradients.
    ///
    /// The spectral inverse provides the initial iterate and the
    /// preconditioner. When the energy criterion is not met within the
    /// iteration cap, the best iterate is returned unless `strict` requests
    /// the stall to surface as an error.
    pub fn multiply_inverse(
        &mut self,
        input: &StochasticField,
        strict: bool,
    ) -> Result<StochasticField> {
        let locally_zero = input.data().iter().all(|v| v.abs() <= 1e-10);
        let mut output = input.clone();
        if self.comm.all_reduce_all(locally_zero) {
            return Ok(output);
        }

        self.multiply_extended(output.data_mut(), SpectralScale::Inverse)?;
        self.inner_cg(&mut output, input, strict)?;
        Ok(output)
    }

    /// Compute the covariance row on the embedded torus, transform it and
    /// audit the spectrum.
    fn fill_transformed_matrix(&mut self) -> Result<()> {
        self.matrix.allocate();

        let cells = self.matrix.local_matrix_cells().to_vec();
        let offset = self.matrix.local_matrix_offset().to_vec();
        let mut indices = [0usize; 3];
        let mut lag = [0.0f64; 3];
        let mut transformed = [0.0f64; 3];

        for index in 0..self.matrix.local_matrix_size() {
            linear_to_indices(index, &cells, &mut indices[..self.dim]);
            for i in 0..self.dim {
                let period = self.extensions[i] * self.embedding_factor as f64;
                let mut coord = (indices[i] + offset[i]) as f64 * self.meshsize[i];
                if coord > 0.5 * period {
                    coord -= period;
                }
                lag[i] = coord;
            }
            self.anisotropy
                .transform(&lag[..self.dim], &mut transformed[..self.dim]);
            self.matrix
                .set(index, self.kernel.evaluate(self.variance, &transformed[..self.dim]));
        }

        self.matrix.forward_transform();

        let mut small = 0usize;
        let mut small_negative = 0usize;
        let mut negative = 0usize;
        let mut smallest = f64::MAX;
        for index in 0..self.matrix.local_matrix_size() {
            let value = self.matrix.get(index);
            if value < smallest {
                smallest = value;
            }
            if value < 1e-6 {
                if value < 1e-10 {
                    if value > -1e-10 {
                        small_negative += 1;
                    } else {
                        negative += 1;
                    }
                } else {
                    small += 1;
                }
            }
            if value < 0.0 {
                self.matrix.set(index, 0.0);
            }
        }

        let small = self.comm.all_reduce_count(small);
        let small_negative = self.comm.all_reduce_count(small_negative);
        let negative = self.comm.all_reduce_count(negative);
        let smallest = self.comm.all_reduce_min(smallest);

        if self.verbose && self.comm.rank() == 0 {
            log::info!(
                "{small} small, {small_negative} small negative and {negative} large negative \
                 eigenvalues in covariance matrix, smallest {smallest:e}"
            );
        }

        if negative > 0 && !self.approximate {
            if self.comm.rank() == 0 {
                log::error!(
                    "negative eigenvalues in covariance matrix, consider increasing the \
                     embedding factor, or alternatively allow generation of approximate samples"
                );
            }
            return Err(Error::NonPositiveSpectrum { negative, smallest });
        }

        self.matrix.set_valid(true);
        Ok(())
    }

    /// The shared extended-domain pipeline behind C, C^{1/2} and the
    /// spectral inverse.
    fn multiply_extended(&mut self, data: &mut DVector<f64>, scale: SpectralScale) -> Result<()> {
        if !self.matrix.valid() {
            self.fill_transformed_matrix()?;
        }

        self.field.field_to_extended(data.as_slice());
        self.field.forward_transform();

        for index in 0..self.field.local_field_size() {
            let lambda = self.matrix.eval(index);
            let factor = match scale {
                SpectralScale::Symbol => lambda,
                SpectralScale::Root => lambda.sqrt(),
                // Clamped bins act as a pseudo-inverse; the symbol is only a
                // preconditioner here.
                SpectralScale::Inverse => {
                    if lambda > 0.0 {
                        1.0 / lambda
                    } else {
                        0.0
                    }
                }
            };
            self.field.mult(index, factor);
        }

        self.field.backward_transform();
        self.field.extended_to_field(data.as_mut_slice(), 0);
        Ok(())
    }

    /// Preconditioned conjugate gradients for `C · iterate = rhs`.
    ///
    /// Inner products reduce over the communicator; convergence uses the
    /// quadratic energy `ϕ = iterate · (½·C·iterate − rhs)`, stopping when
    /// the energy delta relative to the total descent falls below 1e-16.
    fn inner_cg(
        &mut self,
        iterate: &mut StochasticField,
        rhs: &StochasticField,
        strict: bool,
    ) -> Result<()> {
        let rhs_data = rhs.data();

        let mut mat_iter = iterate.data().clone();
        self.multiply_extended(&mut mat_iter, SpectralScale::Symbol)?;

        let mut residual = rhs_data - &mat_iter;
        let mut preconditioned = residual.clone();
        self.multiply_extended(&mut preconditioned, SpectralScale::Inverse)?;
        let mut direction = preconditioned.clone();

        let mut scalar_prod = self
            .comm
            .all_reduce_sum(preconditioned.dot(&residual));
        let residual_sq = self.comm.all_reduce_sum(residual.dot(&residual));
        let mut converged = residual_sq.abs().sqrt() < 1e-6;

        let first_value = self
            .comm
            .all_reduce_sum(energy_local(iterate.data(), &mat_iter, rhs_data));

        let mut count = 0;
        while !converged && count < self.cg_iterations {
            let mut mat_direction = direction.clone();
            self.multiply_extended(&mut mat_direction, SpectralScale::Symbol)?;

            let alpha_denominator = self
                .comm
                .all_reduce_sum(direction.dot(&mat_direction));
            let alpha = scalar_prod / alpha_denominator;

            let old_value = self
                .comm
                .all_reduce_sum(energy_local(iterate.data(), &mat_iter, rhs_data));

            iterate.data_mut().axpy(alpha, &direction, 1.0);
            mat_iter.axpy(alpha, &mat_direction, 1.0);

            let value = self
                .comm
                .all_reduce_sum(energy_local(iterate.data(), &mat_iter, rhs_data));

            residual = rhs_data - &mat_iter;
            preconditioned = residual.clone();
            self.multiply_extended(&mut preconditioned, SpectralScale::Inverse)?;

            let new_scalar_prod = self
                .comm
                .all_reduce_sum(preconditioned.dot(&residual));
            let beta = new_scalar_prod / scalar_prod;
            scalar_prod = new_scalar_prod;

            direction *= beta;
            direction += &preconditioned;

            // Guard against the zero total descent of the first step.
            if value != first_value
                && (value - old_value).abs() / (value - first_value).abs() < 1e-16
            {
                converged = true;
            }

            count += 1;
        }

        if self.verbose && self.comm.rank() == 0 {
            log::info!("{count} CG iterations");
        }

        if !converged {
            if self.comm.rank() == 0 {
                log::warn!("conjugate gradients did not converge within {count} iterations");
            }
            if strict {
                return Err(Error::CgStalled { iterations: count });
            }
        }

        Ok(())
    }
}

fn energy_local(iterate: &DVector<f64>, mat_iter: &DVector<f64>, rhs: &DVector<f64>) -> f64 {
    iterate
        .iter()
        .zip(mat_iter.iter())
        .zip(rhs.iter())
        .map(|((x, ax), b)| x * (0.5 * ax - b))
        .sum()
}
