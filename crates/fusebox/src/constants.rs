//! Tuning constants for the breaker engine.

use std::time::Duration;

/// Listener hysteresis: `failures_proportion_changed` fires only when the
/// EMA moved by more than one percentage point in a single update.
pub const EMA_CHANGE_EPSILON: f64 = 0.01;

/// Cap applied to `tries` when computing the `2^tries` backoff factor.
///
/// `tries` itself keeps counting past this value; only the shift is clamped
/// so the doubling never overflows during a very long outage.
pub const MAX_BACKOFF_SHIFT: u32 = 30;

/// Lower bound of the randomized backoff multiplier.
pub const JITTER_MIN: f64 = 0.80;

/// Upper bound (exclusive) of the randomized backoff multiplier.
pub const JITTER_MAX: f64 = 1.25;

/// Default EMA level that trips the breaker.
pub const DEFAULT_BREAK_THRESHOLD: f64 = 0.5;

/// Default cooling-off period after the breaker first opens.
pub const DEFAULT_INITIAL_RECOVER: Duration = Duration::from_millis(100);

/// Default EMA smoothing coefficient.
pub const DEFAULT_ALFA: f64 = 0.3;

/// Depth of the command queue feeding the async breaker's worker task.
pub const WORKER_QUEUE_DEPTH: usize = 64;
