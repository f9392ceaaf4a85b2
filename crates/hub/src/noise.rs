//! Injectable randomness for the simulation.
//!
//! Every random perturbation in the kernel (occupancy jitter, weather noise,
//! sensor noise) is drawn through [`Noise`], so a seeded generator gives a
//! repeatable run and [`Silent`] gives an exact one.

/// Source of bounded uniform noise.
pub trait Noise: Send + Sync {
    /// Sample uniformly from `[lo, hi)`.
    fn uniform(&mut self, lo: f64, hi: f64) -> f64;
}

impl Noise for fastrand::Rng {
    fn uniform(&mut self, lo: f64, hi: f64) -> f64 {
        lo + (hi - lo) * self.f64()
    }
}

/// Noise source that always answers the midpoint of the requested range.
#[derive(Debug, Default, Clone, Copy)]
pub struct Silent;

impl Noise for Silent {
    fn uniform(&mut self, lo: f64, hi: f64) -> f64 {
        (lo + hi) / 2.0
    }
}

/// Build the noise source selected by configuration.
///
/// `enabled = false` yields [`Silent`]; otherwise a `fastrand` generator,
/// seeded when `seed` is given and entropy-seeded when it is not.
pub fn from_settings(enabled: bool, seed: Option<u64>) -> Box<dyn Noise> {
    if !enabled {
        return Box::new(Silent);
    }
    match seed {
        Some(seed) => Box::new(fastrand::Rng::with_seed(seed)),
        None => Box::new(fastrand::Rng::new()),
    }
}

// ===========================================================================
// Tests
// ===========================================================================
