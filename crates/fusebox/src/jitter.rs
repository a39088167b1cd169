//! Randomness capability for the half-open backoff.
//!
//! The backoff multiplier is injected rather than drawn from a global RNG so
//! tests can pin it to a known value.

use rand::Rng;

use crate::constants::{JITTER_MAX, JITTER_MIN};

/// Source of the randomized backoff multiplier.
///
/// Each half-open failure draws one multiplier in `[0.80, 1.25)` and scales
/// the doubled recovery window by it, de-synchronizing retries across breaker
/// instances that protect the same dependency.
pub trait JitterSource: Send + Sync {
    /// Draw a multiplier in `[JITTER_MIN, JITTER_MAX)`.
    fn backoff_multiplier(&self) -> f64;
}

/// Default jitter source backed by the thread-local RNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadRngJitter;

impl JitterSource for ThreadRngJitter {
    fn backoff_multiplier(&self) -> f64 {
        rand::thread_rng().gen_range(JITTER_MIN..JITTER_MAX)
    }
}

/// Jitter source that always returns the same multiplier.
///
/// Values outside `[JITTER_MIN, JITTER_MAX)` are clamped at draw time by the
/// decision engine, so a `FixedJitter(1.0)` gives undithered doubling.
#[derive(Debug, Clone, Copy)]
pub struct FixedJitter(pub f64);

impl JitterSource for FixedJitter {
    fn backoff_multiplier(&self) -> f64 {
        self.0
    }
}
