//! Breaker state record and the transition function that mutates it.
//!
//! `update` is the single place state changes: both wrappers funnel every
//! classified outcome through it, under a lock or on the worker task, and
//! fan the returned [`StateDelta`] out to listeners afterwards.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::BreakerConfig;
use crate::constants::{EMA_CHANGE_EPSILON, JITTER_MAX, JITTER_MIN, MAX_BACKOFF_SHIFT};
use crate::jitter::JitterSource;
use crate::listener::StateChangeListener;

/// Mutable health record of one breaker instance.
///
/// Has exactly one writer at a time; the wrappers enforce that with a mutex
/// or a serialized worker.
#[derive(Debug, Clone)]
pub(crate) struct BreakerState {
    /// `false` is closed; `true` is open or half-open depending on whether
    /// `now` has reached `next_try_at`.
    pub(crate) is_broken: bool,
    /// While broken, calls before this instant are rejected outright.
    pub(crate) next_try_at: Instant,
    /// Exponential moving average of failure (1) vs success (0) outcomes,
    /// maintained only while the circuit is closed.
    pub(crate) failures_proportion_ema: f64,
    /// Consecutive failed half-open probes since the circuit opened.
    pub(crate) tries: u32,
}

impl BreakerState {
    pub(crate) fn new(now: Instant) -> Self {
        Self { is_broken: false, next_try_at: now, failures_proportion_ema: 0.0, tries: 0 }
    }

    /// Whether a call arriving at `now` must be rejected without invoking
    /// the protected operation.
    pub(crate) fn is_open(&self, now: Instant) -> bool {
        self.is_broken && now < self.next_try_at
    }

    /// Fold one classified outcome into the state.
    ///
    /// `now` is the instant captured before the attempt started. Open-state
    /// calls never reach this function with a real outcome; the wrappers
    /// reject them first. A stale outcome can still arrive with the circuit
    /// already re-opened by a concurrent caller, in which case a failure
    /// inside the open window changes nothing.
    pub(crate) fn update(
        &mut self,
        config: &BreakerConfig,
        now: Instant,
        has_failed: bool,
        jitter: &dyn JitterSource,
    ) -> StateDelta {
        let before = Snapshot::of(self);

        if has_failed && self.is_broken {
            if now >= self.next_try_at {
                // Failed half-open probe: widen the recovery window to
                // initial_recover * 2^tries, dithered to [80%, 125%) so
                // instances guarding the same dependency don't retry in
                // lockstep. The EMA is left untouched while broken.
                self.tries = self.tries.saturating_add(1);
                let delay = backoff_delay(config.initial_recover, self.tries, jitter);
                self.next_try_at = now + delay;
                debug!(tries = self.tries, ?delay, "half-open probe failed, backing off");
            }
        } else if self.is_broken {
            // Successful probe: close immediately. The EMA may still sit
            // above the threshold; recovery pacing belongs to `tries`, not
            // to the smoothed failure signal.
            self.is_broken = false;
            self.tries = 0;
            info!("circuit closed after successful half-open probe");
        } else {
            self.failures_proportion_ema = self.failures_proportion_ema * (1.0 - config.alfa)
                + if has_failed { config.alfa } else { 0.0 };
            if has_failed && self.failures_proportion_ema > config.break_threshold {
                self.is_broken = true;
                self.next_try_at = now + config.initial_recover;
                warn!(
                    ema = self.failures_proportion_ema,
                    threshold = config.break_threshold,
                    "circuit opened"
                );
            }
        }

        before.delta_to(self)
    }
}

/// Recovery delay for the `tries`-th consecutive half-open failure.
///
/// The shift is clamped so the doubling cannot overflow, and the multiplier
/// is clamped to its documented range in case a custom [`JitterSource`]
/// misbehaves. The nanosecond product saturates instead of panicking.
fn backoff_delay(initial_recover: Duration, tries: u32, jitter: &dyn JitterSource) -> Duration {
    let shift = tries.min(MAX_BACKOFF_SHIFT);
    let nominal = initial_recover.saturating_mul(1u32 << shift);
    let multiplier = jitter.backoff_multiplier().clamp(JITTER_MIN, JITTER_MAX);
    let nanos = nominal.as_nanos() as f64 * multiplier;
    // `as` saturates at u64::MAX for out-of-range floats
    Duration::from_nanos(nanos as u64)
}

/// Pre-update copy of the observable fields.
#[derive(Debug, Clone, Copy)]
struct Snapshot {
    is_broken: bool,
    failures_proportion_ema: f64,
    tries: u32,
}

impl Snapshot {
    fn of(state: &BreakerState) -> Self {
        Self {
            is_broken: state.is_broken,
            failures_proportion_ema: state.failures_proportion_ema,
            tries: state.tries,
        }
    }

    fn delta_to(self, after: &BreakerState) -> StateDelta {
        StateDelta {
            broken_state_changed: after.is_broken != self.is_broken,
            failures_proportion_changed: (after.failures_proportion_ema
                - self.failures_proportion_ema)
                .abs()
                > EMA_CHANGE_EPSILON,
            tries_changed: after.tries != self.tries,
            is_broken: after.is_broken,
            failures_proportion: after.failures_proportion_ema,
            tries: after.tries,
        }
    }
}

/// Observable outcome of one `update` call.
///
/// Carries the post-update values and which of them count as changed under
/// the listener firing rules (the EMA uses a one-percentage-point hysteresis
/// to avoid listener spam).
#[derive(Debug, Clone, Copy)]
pub struct StateDelta {
    /// The broken flag flipped.
    pub broken_state_changed: bool,
    /// The EMA moved by more than [`EMA_CHANGE_EPSILON`].
    pub failures_proportion_changed: bool,
    /// The half-open failure count changed.
    pub tries_changed: bool,
    /// Post-update broken flag.
    pub is_broken: bool,
    /// Post-update EMA value.
    pub failures_proportion: f64,
    /// Post-update half-open failure count.
    pub tries: u32,
}

impl StateDelta {
    /// Fire the listener callbacks this delta calls for.
    ///
    /// Wrappers invoke this only after releasing the state lock (or off the
    /// worker task).
    pub(crate) fn notify(&self, listener: &dyn StateChangeListener) {
        if self.broken_state_changed {
            listener.broken_state_changed(self.is_broken);
        }
        if self.failures_proportion_changed {
            listener.failures_proportion_changed(self.failures_proportion);
        }
        if self.tries_changed {
            listener.tries_changed(self.tries);
        }
    }
}

/// Point-in-time view of a breaker's observable state.
#[derive(Debug, Clone, Copy)]
pub struct BreakerSnapshot {
    /// Whether the circuit is open or half-open.
    pub is_broken: bool,
    /// Current smoothed failure proportion.
    pub failures_proportion: f64,
    /// Consecutive failed half-open probes.
    pub tries: u32,
}

impl BreakerSnapshot {
    pub(crate) fn of(state: &BreakerState) -> Self {
        Self {
            is_broken: state.is_broken,
            failures_proportion: state.failures_proportion_ema,
            tries: state.tries,
        }
    }
}
