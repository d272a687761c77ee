//! The user-facing random field.
//!
//! Combines the domain descriptor, the covariance operator and the
//! stochastic field, and manages the optional cached companions
//! `C^{-1}·x` and `C^{-1/2}·x`. When a cache is valid, refinement and
//! coarsening reconstruct the field through the operator
//! (`x_new = C · refine(C^{-1}·x)` with a 2^{±dim} rescale) instead of
//! interpolating `x` directly, which preserves covariance consistency
//! across levels. Mutations that break cache validity clear the flag
//! without discarding the storage.

use std::ops::{AddAssign, MulAssign, SubAssign};
use std::sync::Arc;

use randfield_core::comm::Communicator;
use randfield_core::config::FieldConfig;
use randfield_core::grid::DomainDescriptor;
use randfield_field::StochasticField;
use randfield_solver::{CovarianceOperator, RngBackend};

use crate::error::{Error, Result};
use crate::io;

pub struct RandomField {
    config: FieldConfig,
    descriptor: DomainDescriptor,
    operator: CovarianceOperator,
    stochastic: StochasticField,

    cache_inv_matvec: bool,
    cache_inv_root_matvec: bool,
    inv_matvec: Option<StochasticField>,
    inv_matvec_valid: bool,
    inv_root_matvec: Option<StochasticField>,
    inv_root_matvec_valid: bool,
}

impl RandomField {
    /// Construct a homogeneous (zero) field from a configuration.
    pub fn new(config: FieldConfig, comm: Arc<dyn Communicator>) -> Result<Self> {
        let descriptor = DomainDescriptor::new(&config.grid, &config.random_field, comm)?;
        let operator =
            CovarianceOperator::new(&descriptor, &config.stochastic, &config.random_field)?;
        let stochastic = StochasticField::new(&descriptor);

        let cache_inv_matvec = config.random_field.cache_inv_matvec;
        let cache_inv_root_matvec = config.random_field.cache_inv_root_matvec;
        let inv_matvec = cache_inv_matvec.then(|| stochastic.clone());
        let inv_root_matvec = cache_inv_root_matvec.then(|| stochastic.clone());

        Ok(Self {
            config,
            descriptor,
            operator,
            stochastic,
            cache_inv_matvec,
            cache_inv_root_matvec,
            inv_matvec,
            inv_matvec_valid: false,
            inv_root_matvec,
            inv_root_matvec_valid: false,
        })
    }

    /// Construct from a configuration and load the cell values from the
    /// persisted store at `base`.
    pub fn load(config: FieldConfig, base: &str, comm: Arc<dyn Communicator>) -> Result<Self> {
        let mut field = Self::new(config, comm)?;
        let cells = field.descriptor.cells().to_vec();
        io::read_field_data(
            field.descriptor.comm(),
            base,
            &cells,
            field.stochastic.data_mut().as_mut_slice(),
        )?;
        Ok(field)
    }

    /// Select the RNG backend.
    pub fn with_rng(mut self, backend: RngBackend) -> Self {
        self.operator.set_rng(backend);
        self
    }

    pub fn config(&self) -> &FieldConfig {
        &self.config
    }

    pub fn descriptor(&self) -> &DomainDescriptor {
        &self.descriptor
    }

    pub fn stochastic(&self) -> &StochasticField {
        &self.stochastic
    }

    /// Mutable access to the stochastic part for outer algorithms;
    /// invalidates the cached inverse applications.
    pub fn stochastic_mut(&mut self) -> &mut StochasticField {
        self.inv_matvec_valid = false;
        self.inv_root_matvec_valid = false;
        &mut self.stochastic
    }

    pub fn cell_volume(&self) -> f64 {
        self.descriptor.cell_volume()
    }

    /// Number of degrees of freedom.
    pub fn dofs(&self) -> usize {
        self.stochastic.dofs()
    }

    fn check_world(&self, allow_non_world: bool) -> Result<()> {
        if !self.descriptor.comm().is_world() && !allow_non_world {
            return Err(Error::NonWorldComm);
        }
        Ok(())
    }

    /// Draw a sample with the configured correlation structure.
    pub fn generate(&mut self, seed: u64, allow_non_world: bool) -> Result<()> {
        self.check_world(allow_non_world)?;
        if self.config.random_field.verbose && self.descriptor.comm().rank() == 0 {
            log::info!("generating field with seed {seed}");
        }
        self.operator.generate_field(seed, &mut self.stochastic)?;
        self.inv_matvec_valid = false;
        self.inv_root_matvec_valid = false;
        Ok(())
    }

    /// Fill the field with uncorrelated noise.
    pub fn generate_uncorrelated(&mut self, seed: u64, allow_non_world: bool) -> Result<()> {
        self.check_world(allow_non_world)?;
        self.operator
            .generate_uncorrelated_field(seed, &mut self.stochastic);
        self.inv_matvec_valid = false;
        self.inv_root_matvec_valid = false;
        Ok(())
    }

    /// Evaluate the field at a spatial coordinate.
    pub fn evaluate(&self, location: &[f64]) -> f64 {
        self.stochastic.evaluate(location)
    }

    /// Persist the field: cell store, configuration echo and XML
    /// descriptor.
    pub fn write_to_file(&self, base: &str) -> Result<()> {
        let comm = self.descriptor.comm();
        io::write_field_data(
            comm,
            base,
            self.descriptor.cells(),
            self.stochastic.data().as_slice(),
        )?;

        let mut local_error = None;
        if comm.rank() == 0 {
            let result = io::write_config_echo(&format!("{base}.field"), &self.config).and_then(
                |_| {
                    io::write_xdmf(
                        &format!("{base}.xdmf"),
                        &io::data_path(base),
                        "stochastic",
                        self.descriptor.cells(),
                        self.descriptor.extensions(),
                    )
                },
            );
            if let Err(err) = result {
                local_error = Some(err);
            }
        }
        if !comm.all_reduce_all(local_error.is_none()) {
            return Err(match local_error {
                Some(err) => Error::Io(err),
                None => Error::Io(std::io::Error::other(
                    "write aborted after failure on rank 0",
                )),
            });
        }
        Ok(())
    }

    /// Make the field homogeneous; the caches become (validly) zero.
    pub fn zero(&mut self) {
        self.stochastic.zero();
        if let Some(inv) = &mut self.inv_matvec {
            inv.zero();
            self.inv_matvec_valid = true;
        }
        if let Some(root) = &mut self.inv_root_matvec {
            root.zero();
            self.inv_root_matvec_valid = true;
        }
    }

    /// Double the resolution of the covariance matrix geometry.
    pub fn refine_matrix(&mut self) -> Result<()> {
        self.descriptor.refine()?;
        self.operator.update(&self.descriptor);
        Ok(())
    }

    /// Halve the resolution of the covariance matrix geometry.
    pub fn coarsen_matrix(&mut self) -> Result<()> {
        self.descriptor.coarsen()?;
        self.operator.update(&self.descriptor);
        Ok(())
    }

    /// Double the resolution of the field values; requires a prior
    /// [`refine_matrix`](Self::refine_matrix).
    ///
    /// With a valid inverse cache the refined field is reconstructed as
    /// `C · refine(C^{-1}·x)` and rescaled by 2^dim.
    pub fn refine(&mut self) -> Result<()> {
        let scale = (2.0f64).powi(self.descriptor.dim() as i32);

        if self.cache_inv_matvec && self.inv_matvec_valid {
            let inv = self.inv_matvec.as_mut().expect("cache enabled");
            inv.refine(&self.descriptor);
            self.stochastic = self
                .operator
                .multiply(self.inv_matvec.as_ref().expect("cache enabled"))?;

            self.stochastic *= scale;
            *self.inv_matvec.as_mut().expect("cache enabled") *= scale;

            if self.cache_inv_root_matvec {
                let mut root = self
                    .operator
                    .multiply_root(self.inv_matvec.as_ref().expect("cache enabled"))?;
                root *= scale;
                self.inv_root_matvec = Some(root);
                self.inv_root_matvec_valid = true;
            }
        } else if self.cache_inv_root_matvec && self.inv_root_matvec_valid {
            let root = self.inv_root_matvec.as_mut().expect("cache enabled");
            root.refine(&self.descriptor);
            self.stochastic = self
                .operator
                .multiply_root(self.inv_root_matvec.as_ref().expect("cache enabled"))?;

            self.stochastic *= scale;
            *self.inv_root_matvec.as_mut().expect("cache enabled") *= scale;

            if self.cache_inv_matvec {
                self.inv_matvec = Some(self.stochastic.clone());
                self.inv_matvec_valid = false;
            }
        } else {
            self.stochastic.refine(&self.descriptor);
            if let Some(inv) = &mut self.inv_matvec {
                inv.refine(&self.descriptor);
            }
            if let Some(root) = &mut self.inv_root_matvec {
                root.refine(&self.descriptor);
            }
        }
        Ok(())
    }

    /// Halve the resolution of the field values; requires a prior
    /// [`coarsen_matrix`](Self::coarsen_matrix).
    pub fn coarsen(&mut self) -> Result<()> {
        let scale = (0.5f64).powi(self.descriptor.dim() as i32);

        if self.cache_inv_matvec && self.inv_matvec_valid {
            let inv = self.inv_matvec.as_mut().expect("cache enabled");
            inv.coarsen(&self.descriptor);
            self.stochastic = self
                .operator
                .multiply(self.inv_matvec.as_ref().expect("cache enabled"))?;

            self.stochastic *= scale;
            *self.inv_matvec.as_mut().expect("cache enabled") *= scale;

            if self.cache_inv_root_matvec {
                let mut root = self
                    .operator
                    .multiply_root(self.inv_matvec.as_ref().expect("cache enabled"))?;
                root *= scale;
                self.inv_root_matvec = Some(root);
                self.inv_root_matvec_valid = true;
            }
        } else if self.cache_inv_root_matvec && self.inv_root_matvec_valid {
            let root = self.inv_root_matvec.as_mut().expect("cache enabled");
            root.coarsen(&self.descriptor);
            self.stochastic = self
                .operator
                .multiply_root(self.inv_root_matvec.as_ref().expect("cache enabled"))?;

            self.stochastic *= scale;
            *self.inv_root_matvec.as_mut().expect("cache enabled") *= scale;

            if self.cache_inv_matvec {
                self.inv_matvec = Some(self.stochastic.clone());
                self.inv_matvec_valid = false;
            }
        } else {
            self.stochastic.coarsen(&self.descriptor);
            if let Some(inv) = &mut self.inv_matvec {
                inv.coarsen(&self.descriptor);
            }
            if let Some(root) = &mut self.inv_root_matvec {
                root.coarsen(&self.descriptor);
            }
        }
        Ok(())
    }

    /// Scaled addition `self += alpha · other`.
    pub fn axpy(&mut self, alpha: f64, other: &Self) {
        self.stochastic.axpy(alpha, &other.stochastic);

        if self.cache_inv_matvec {
            if other.cache_inv_matvec {
                self.inv_matvec
                    .as_mut()
                    .expect("cache enabled")
                    .axpy(alpha, other.inv_matvec.as_ref().expect("cache enabled"));
                self.inv_matvec_valid = self.inv_matvec_valid && other.inv_matvec_valid;
            } else {
                self.inv_matvec_valid = false;
            }
        }
        if self.cache_inv_root_matvec {
            if other.cache_inv_root_matvec {
                self.inv_root_matvec
                    .as_mut()
                    .expect("cache enabled")
                    .axpy(alpha, other.inv_root_matvec.as_ref().expect("cache enabled"));
                self.inv_root_matvec_valid =
                    self.inv_root_matvec_valid && other.inv_root_matvec_valid;
            } else {
                self.inv_root_matvec_valid = false;
            }
        }
    }

    /// Global inner product.
    pub fn dot(&self, other: &Self) -> f64 {
        self.stochastic.dot(&other.stochastic)
    }

    pub fn one_norm(&self) -> f64 {
        self.stochastic.one_norm()
    }

    pub fn two_norm(&self) -> f64 {
        self.stochastic.two_norm()
    }

    pub fn inf_norm(&self) -> f64 {
        self.stochastic.inf_norm()
    }

    /// Multiply the field with the covariance matrix.
    pub fn times_matrix(&mut self) -> Result<()> {
        if self.cache_inv_matvec {
            *self.inv_matvec.as_mut().expect("cache enabled") = self.stochastic.clone();
            self.inv_matvec_valid = true;
        }
        if self.cache_inv_root_matvec {
            *self.inv_root_matvec.as_mut().expect("cache enabled") =
                self.operator.multiply_root(&self.stochastic)?;
            self.inv_root_matvec_valid = true;
        }
        self.stochastic = self.operator.multiply(&self.stochastic)?;
        Ok(())
    }

    /// Multiply the field with the inverse of the covariance matrix.
    ///
    /// A valid inverse cache short-circuits the conjugate-gradient solve.
    pub fn times_inverse_matrix(&mut self) -> Result<()> {
        if self.cache_inv_matvec && self.inv_matvec_valid {
            if self.cache_inv_root_matvec {
                *self.inv_root_matvec.as_mut().expect("cache enabled") = self
                    .operator
                    .multiply_root(self.inv_matvec.as_ref().expect("cache enabled"))?;
                self.inv_root_matvec_valid = true;
            }
            self.stochastic = self.inv_matvec.as_ref().expect("cache enabled").clone();
            self.inv_matvec_valid = false;
        } else {
            self.stochastic = self.operator.multiply_inverse(&self.stochastic, false)?;
            if self.cache_inv_matvec {
                self.inv_matvec_valid = false;
            }
            if self.cache_inv_root_matvec {
                self.inv_root_matvec_valid = false;
            }
        }
        Ok(())
    }

    /// Multiply the field with the root of the covariance matrix.
    pub fn times_matrix_root(&mut self) -> Result<()> {
        if self.cache_inv_matvec && self.cache_inv_root_matvec {
            *self.inv_matvec.as_mut().expect("cache enabled") = self
                .inv_root_matvec
                .as_ref()
                .expect("cache enabled")
                .clone();
            self.inv_matvec_valid = self.inv_root_matvec_valid;
        }
        if self.cache_inv_root_matvec {
            *self.inv_root_matvec.as_mut().expect("cache enabled") = self.stochastic.clone();
            self.inv_root_matvec_valid = true;
        }
        self.stochastic = self.operator.multiply_root(&self.stochastic)?;
        Ok(())
    }

    /// Multiply the field with the inverse root of the covariance matrix.
    pub fn times_inv_mat_root(&mut self) -> Result<()> {
        if self.cache_inv_root_matvec && self.inv_root_matvec_valid {
            self.stochastic = self
                .inv_root_matvec
                .as_ref()
                .expect("cache enabled")
                .clone();
            self.inv_root_matvec_valid = false;

            if self.cache_inv_matvec {
                *self.inv_root_matvec.as_mut().expect("cache enabled") =
                    self.inv_matvec.as_ref().expect("cache enabled").clone();
                self.inv_root_matvec_valid = self.inv_matvec_valid;
                self.inv_matvec_valid = false;
            }
        } else {
            self.stochastic = self.operator.multiply_inverse(&self.stochastic, false)?;
            if self.cache_inv_root_matvec {
                *self.inv_root_matvec.as_mut().expect("cache enabled") = self.stochastic.clone();
                self.inv_root_matvec_valid = true;
            }
            self.stochastic = self.operator.multiply_root(&self.stochastic)?;
            if self.cache_inv_matvec {
                self.inv_matvec_valid = false;
            }
        }
        Ok(())
    }

    /// Multiply by a Gaussian bump; invalidates the inverse caches.
    pub fn localize(&mut self, center: &[f64], radius: f64) {
        self.stochastic.localize(center, radius);
        if self.cache_inv_matvec {
            self.inv_matvec_valid = false;
        }
        if self.cache_inv_root_matvec {
            self.inv_root_matvec_valid = false;
        }
    }
}

impl AddAssign<&RandomField> for RandomField {
    fn add_assign(&mut self, other: &RandomField) {
        self.stochastic += &other.stochastic;

        if self.cache_inv_matvec {
            if other.cache_inv_matvec {
                *self.inv_matvec.as_mut().expect("cache enabled") +=
                    other.inv_matvec.as_ref().expect("cache enabled");
                self.inv_matvec_valid = self.inv_matvec_valid && other.inv_matvec_valid;
            } else {
                self.inv_matvec_valid = false;
            }
        }
        if self.cache_inv_root_matvec {
            if other.cache_inv_root_matvec {
                *self.inv_root_matvec.as_mut().expect("cache enabled") +=
                    other.inv_root_matvec.as_ref().expect("cache enabled");
                self.inv_root_matvec_valid =
                    self.inv_root_matvec_valid && other.inv_root_matvec_valid;
            } else {
                self.inv_root_matvec_valid = false;
            }
        }
    }
}

impl SubAssign<&RandomField> for RandomField {
    fn sub_assign(&mut self, other: &RandomField) {
        self.stochastic -= &other.stochastic;

        if self.cache_inv_matvec {
            if other.cache_inv_matvec {
                *self.inv_matvec.as_mut().expect("cache enabled") -=
                    other.inv_matvec.as_ref().expect("cache enabled");
                self.inv_matvec_valid = self.inv_matvec_valid && other.inv_matvec_valid;
            } else {
                self.inv_matvec_valid = false;
            }
        }
        if self.cache_inv_root_matvec {
            if other.cache_inv_root_matvec {
                *self.inv_root_matvec.as_mut().expect("cache enabled") -=
                    other.inv_root_matvec.as_ref().expect("cache enabled");
                self.inv_root_matvec_valid =
                    self.inv_root_matvec_valid && other.inv_root_matvec_valid;
            } else {
                self.inv_root_matvec_valid = false;
            }
        }
    }
}

impl MulAssign<f64> for RandomField {
    fn mul_assign(&mut self, alpha: f64) {
        self.stochastic *= alpha;
        if let Some(inv) = &mut self.inv_matvec {
            *inv *= alpha;
        }
        if let Some(root) = &mut self.inv_root_matvec {
            *root *= alpha;
        }
    }
}

impl PartialEq for RandomField {
    fn eq(&self, other: &Self) -> bool {
        self.stochastic == other.stochastic
    }
}
