use std::f64::consts::PI;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Shortest pause ever taken between two page requests, in seconds.
pub const MIN_DELAY_SECS: f64 = 0.1;
/// Longest pause ever taken between two page requests, in seconds.
pub const MAX_DELAY_SECS: f64 = 3600.0;

/// Normally distributed pause between page requests with a ±20% multiplicative jitter.
#[derive(Debug, Clone)]
pub struct RandomDelay {
    mean_secs: f64,
    std_dev_secs: f64,
    rng: StdRng,
}

impl RandomDelay {
    pub fn new(mean_secs: f64, std_dev_secs: f64) -> Self {
        Self::with_rng(mean_secs, std_dev_secs, StdRng::from_entropy())
    }

    /// Same draws for the same seed.
    pub fn seeded(mean_secs: f64, std_dev_secs: f64, seed: u64) -> Self {
        Self::with_rng(mean_secs, std_dev_secs, StdRng::seed_from_u64(seed))
    }

    fn with_rng(mean_secs: f64, std_dev_secs: f64, rng: StdRng) -> Self {
        Self {
            mean_secs,
            std_dev_secs,
            rng,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        // `gen` draws from [0, 1), flip it so the logarithm never sees 0.
        let u1 = 1.0 - self.rng.gen::<f64>();
        let u2 = self.rng.gen::<f64>();
        let u3 = self.rng.gen::<f64>();
        Duration::from_secs_f64(sample_delay_secs(
            self.mean_secs,
            self.std_dev_secs,
            u1,
            u2,
            u3,
        ))
    }
}

/// Box–Muller sample scaled to `mean_secs`/`std_dev_secs`, multiplied by `0.8 + 0.4 * u3`
/// and kept within [`MIN_DELAY_SECS`]..=[`MAX_DELAY_SECS`].
///
/// `u1` must lie in (0, 1], `u2` and `u3` in [0, 1).
pub fn sample_delay_secs(mean_secs: f64, std_dev_secs: f64, u1: f64, u2: f64, u3: f64) -> f64 {
    let z0 = (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos();
    let delay = (z0 * std_dev_secs + mean_secs) * (0.8 + u3 * 0.4);
    // `f64::max` ignores a NaN operand, so NaN lands on the floor.
    delay.max(MIN_DELAY_SECS).min(MAX_DELAY_SECS)
}
