//! Lists of named random fields.
//!
//! A [`RandomFieldList`] multiplexes the random field surface across named
//! sub-fields. The leading `active` names participate in calculus
//! operations; generation and persistence always cover every field.
//! Arithmetic between two lists requires the right-hand side to carry every
//! active name of the left-hand side, otherwise the operation fails with a
//! list mismatch.

use std::collections::BTreeMap;
use std::sync::Arc;

use randfield_core::comm::Communicator;
use randfield_core::config::{FieldConfig, ListConfig};

use crate::error::{Error, Result};
use crate::field::RandomField;

/// Seed spacing between sub-fields of one list generation.
const FIELD_SEED_STRIDE: u64 = 0x9e3779b9;

pub struct RandomFieldList {
    field_names: Vec<String>,
    active_names: Vec<String>,
    fields: BTreeMap<String, RandomField>,
}

impl RandomFieldList {
    /// Build a list of homogeneous fields from per-name configurations.
    pub fn new(
        configs: Vec<(String, FieldConfig)>,
        active: Option<usize>,
        comm: Arc<dyn Communicator>,
    ) -> Result<Self> {
        Self::build(configs, active, comm, None)
    }

    /// Build a list from a [`ListConfig`]: the named `types` in order, the
    /// leading `active` of them participating in calculus.
    pub fn from_list_config(
        list: &ListConfig,
        mut field_config: impl FnMut(&str) -> FieldConfig,
        comm: Arc<dyn Communicator>,
    ) -> Result<Self> {
        let configs = list
            .types
            .iter()
            .map(|name| (name.clone(), field_config(name)))
            .collect();
        Self::build(configs, list.active, comm, None)
    }

    /// Build a list and load every sub-field from `<base>.<name>` stores.
    pub fn load(
        configs: Vec<(String, FieldConfig)>,
        base: &str,
        active: Option<usize>,
        comm: Arc<dyn Communicator>,
    ) -> Result<Self> {
        Self::build(configs, active, comm, Some(base))
    }

    fn build(
        configs: Vec<(String, FieldConfig)>,
        active: Option<usize>,
        comm: Arc<dyn Communicator>,
        base: Option<&str>,
    ) -> Result<Self> {
        if configs.is_empty() {
            return Err(Error::ListMismatch(
                "list of random field types is empty".into(),
            ));
        }

        let mut field_names = Vec::with_capacity(configs.len());
        let mut fields = BTreeMap::new();
        for (name, config) in configs {
            let field = match base {
                Some(base) => RandomField::load(
                    config,
                    &format!("{base}.{name}"),
                    Arc::clone(&comm),
                )?,
                None => RandomField::new(config, Arc::clone(&comm))?,
            };
            field_names.push(name.clone());
            fields.insert(name, field);
        }

        let mut list = Self {
            field_names,
            active_names: Vec::new(),
            fields,
        };
        let count = active.unwrap_or(list.field_names.len());
        list.activate_fields(count)?;
        Ok(list)
    }

    /// Insert an additional field into the list.
    pub fn insert(&mut self, name: &str, field: RandomField, activate: bool) {
        self.field_names.push(name.to_string());
        if activate {
            self.active_names.push(name.to_string());
        }
        self.fields.insert(name.to_string(), field);
    }

    /// Define the leading subset of fields that participates in calculus
    /// operations.
    pub fn activate_fields(&mut self, count: usize) -> Result<()> {
        if count > self.field_names.len() {
            return Err(Error::ListMismatch(format!(
                "cannot activate {count} of {} fields",
                self.field_names.len()
            )));
        }
        self.active_names = self.field_names[..count].to_vec();
        Ok(())
    }

    /// Names of the currently active fields.
    pub fn types(&self) -> &[String] {
        &self.active_names
    }

    /// Access one sub-field.
    pub fn get(&self, name: &str) -> Option<&RandomField> {
        self.fields.get(name)
    }

    /// Degrees of freedom of the active fields.
    pub fn dofs(&self) -> usize {
        self.active_names
            .iter()
            .map(|name| self.fields[name].dofs())
            .sum()
    }

    /// Generate every field, each from its own derived seed.
    pub fn generate(&mut self, seed: u64, allow_non_world: bool) -> Result<()> {
        for (index, name) in self.field_names.iter().enumerate() {
            let field_seed = seed.wrapping_add(index as u64 * FIELD_SEED_STRIDE);
            self.fields
                .get_mut(name)
                .expect("name registered")
                .generate(field_seed, allow_non_world)?;
        }
        Ok(())
    }

    /// Fill every field with uncorrelated noise.
    pub fn generate_uncorrelated(&mut self, seed: u64, allow_non_world: bool) -> Result<()> {
        for (index, name) in self.field_names.iter().enumerate() {
            let field_seed = seed.wrapping_add(index as u64 * FIELD_SEED_STRIDE);
            self.fields
                .get_mut(name)
                .expect("name registered")
                .generate_uncorrelated(field_seed, allow_non_world)?;
        }
        Ok(())
    }

    /// Persist every field plus one aggregate configuration echo.
    pub fn write_to_file(&self, base: &str) -> Result<()> {
        let mut comm = None;
        for name in &self.field_names {
            let field = &self.fields[name];
            field.write_to_file(&format!("{base}.{name}"))?;
            comm.get_or_insert_with(|| Arc::clone(field.descriptor().comm()));
        }

        let comm = comm.expect("nonempty list");
        let mut local_error = None;
        if comm.rank() == 0 {
            if let Err(err) = self.write_list_echo(&format!("{base}.fieldList")) {
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

    fn write_list_echo(&self, path: &str) -> std::io::Result<()> {
        use std::io::Write;
        let mut writer = std::io::BufWriter::new(std::fs::File::create(path)?);
        writeln!(writer, "randomField.types = {}", self.field_names.join(" "))?;
        writeln!(writer, "randomField.active = {}", self.active_names.len())?;
        writer.flush()
    }

    /// Set the active fields to zero.
    pub fn zero(&mut self) {
        for name in &self.active_names {
            self.fields.get_mut(name).expect("name registered").zero();
        }
    }

    pub fn refine_matrix(&mut self) -> Result<()> {
        self.for_each_active(|field| field.refine_matrix())
    }

    pub fn coarsen_matrix(&mut self) -> Result<()> {
        self.for_each_active(|field| field.coarsen_matrix())
    }

    pub fn refine(&mut self) -> Result<()> {
        self.for_each_active(|field| field.refine())
    }

    pub fn coarsen(&mut self) -> Result<()> {
        self.for_each_active(|field| field.coarsen())
    }

    pub fn times_matrix(&mut self) -> Result<()> {
        self.for_each_active(|field| field.times_matrix())
    }

    pub fn times_inverse_matrix(&mut self) -> Result<()> {
        self.for_each_active(|field| field.times_inverse_matrix())
    }

    pub fn times_matrix_root(&mut self) -> Result<()> {
        self.for_each_active(|field| field.times_matrix_root())
    }

    pub fn times_inv_mat_root(&mut self) -> Result<()> {
        self.for_each_active(|field| field.times_inv_mat_root())
    }

    fn for_each_active(
        &mut self,
        mut op: impl FnMut(&mut RandomField) -> Result<()>,
    ) -> Result<()> {
        for name in &self.active_names {
            op(self.fields.get_mut(name).expect("name registered"))?;
        }
        Ok(())
    }

    fn partner<'o>(&self, other: &'o Self, name: &str, op: &str) -> Result<&'o RandomField> {
        other.fields.get(name).ok_or_else(|| {
            Error::ListMismatch(format!("{name:?} missing from right-hand side of {op}"))
        })
    }

    /// Elementwise addition over the active fields.
    pub fn add_assign(&mut self, other: &Self) -> Result<()> {
        for name in &self.active_names {
            let rhs = self.partner(other, name, "add_assign")?;
            *self.fields.get_mut(name).expect("name registered") += rhs;
        }
        Ok(())
    }

    /// Elementwise subtraction over the active fields.
    pub fn sub_assign(&mut self, other: &Self) -> Result<()> {
        for name in &self.active_names {
            let rhs = self.partner(other, name, "sub_assign")?;
            *self.fields.get_mut(name).expect("name registered") -= rhs;
        }
        Ok(())
    }

    /// Scale the active fields.
    pub fn scale(&mut self, alpha: f64) {
        for name in &self.active_names {
            *self.fields.get_mut(name).expect("name registered") *= alpha;
        }
    }

    /// Scaled addition over the active fields.
    pub fn axpy(&mut self, alpha: f64, other: &Self) -> Result<()> {
        for name in &self.active_names {
            let rhs = self.partner(other, name, "axpy")?;
            self.fields
                .get_mut(name)
                .expect("name registered")
                .axpy(alpha, rhs);
        }
        Ok(())
    }

    /// Inner product over the active fields.
    pub fn dot(&self, other: &Self) -> Result<f64> {
        let mut sum = 0.0;
        for name in &self.active_names {
            sum += self.fields[name].dot(self.partner(other, name, "dot")?);
        }
        Ok(sum)
    }

    pub fn one_norm(&self) -> f64 {
        self.active_names
            .iter()
            .map(|name| self.fields[name].one_norm())
            .sum()
    }

    pub fn two_norm(&self) -> f64 {
        self.active_names
            .iter()
            .map(|name| self.fields[name].two_norm().powi(2))
            .sum::<f64>()
            .sqrt()
    }

    pub fn inf_norm(&self) -> f64 {
        self.active_names
            .iter()
            .map(|name| self.fields[name].inf_norm())
            .fold(0.0, f64::max)
    }

    /// Exact equality over all named fields.
    pub fn equals(&self, other: &Self) -> Result<bool> {
        for name in &self.field_names {
            let rhs = self.partner(other, name, "equals")?;
            if self.fields[name] != *rhs {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Localize the active fields around a center.
    pub fn localize(&mut self, center: &[f64], radius: f64) {
        for name in &self.active_names {
            self.fields
                .get_mut(name)
                .expect("name registered")
                .localize(center, radius);
        }
    }
}
