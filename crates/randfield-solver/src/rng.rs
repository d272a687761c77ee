//! Parallel streams of i.i.d. standard normals.
//!
//! Each rank seeds its source with `user_seed + rank`, which keeps
//! independently parameterized ranks on distinct streams and makes
//! generation bit-reproducible for a fixed (seed, rank count) pair.
//!
//! Two backends exist: [`EngineSource`], the stateful engine-backed stream,
//! and [`CounterSource`], a stateless SplitMix64 hash with a Box–Muller
//! transform. The counter source trades a little speed for guaranteed
//! stream separation under pathological seed choices.

use std::f64::consts::PI;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

/// A reseedable stream of i.i.d. N(0, 1) samples.
pub trait RandomSource: Send {
    fn reseed(&mut self, seed: u64);
    fn sample(&mut self) -> f64;
}

/// Standard-engine backend: `StdRng` driving a normal distribution.
pub struct EngineSource {
    rng: StdRng,
}

impl EngineSource {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl RandomSource for EngineSource {
    fn reseed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    fn sample(&mut self) -> f64 {
        self.rng.sample(StandardNormal)
    }
}

/// SplitMix64 mixing function.
#[inline]
fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9e3779b97f4a7c15);
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d049bb133111eb);
    x ^ (x >> 31)
}

/// Uniform in [0, 1) from hash coordinates; upper 53 bits for full mantissa
/// precision.
#[inline]
fn uniform(seed: u64, index: u64) -> f64 {
    let hash = splitmix64(seed ^ index.wrapping_mul(0x517cc1b727220a95));
    (hash >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
}

/// Counter-based backend: every draw is a pure function of (seed, counter).
pub struct CounterSource {
    seed: u64,
    counter: u64,
}

impl CounterSource {
    pub fn new(seed: u64) -> Self {
        Self { seed, counter: 0 }
    }
}

impl RandomSource for CounterSource {
    fn reseed(&mut self, seed: u64) {
        self.seed = seed;
        self.counter = 0;
    }

    fn sample(&mut self) -> f64 {
        let u1 = uniform(self.seed, self.counter.wrapping_mul(2)).max(1e-12);
        let u2 = uniform(self.seed, self.counter.wrapping_mul(2).wrapping_add(1));
        self.counter += 1;
        (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
    }
}

/// Which RNG backend the operator should construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RngBackend {
    #[default]
    Engine,
    Counter,
}

impl RngBackend {
    pub(crate) fn build(self, seed: u64) -> Box<dyn RandomSource> {
        match self {
            Self::Engine => Box::new(EngineSource::new(seed)),
            Self::Counter => Box::new(CounterSource::new(seed)),
        }
    }
}
