//! Observer interface for breaker state transitions.

/// Callbacks fired after a state update, once per observable delta.
///
/// Purely informational: a listener never influences the breaker's decision.
/// Callbacks are always invoked after the state lock is released (or off the
/// worker task), so a slow or reentrant listener cannot stall the breaker.
pub trait StateChangeListener: Send + Sync {
    /// The broken flag flipped.
    fn broken_state_changed(&self, _is_broken: bool) {}

    /// The failure-proportion EMA moved by more than one percentage point.
    fn failures_proportion_changed(&self, _new_value: f64) {}

    /// The consecutive half-open failure count changed.
    fn tries_changed(&self, _new_value: u32) {}
}

/// Listener that ignores every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopListener;

impl StateChangeListener for NoopListener {}
