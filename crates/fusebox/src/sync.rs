//! Lock-based synchronous execution wrapper.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

use tracing::{debug, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::BreakerConfig;
use crate::error::ConfigResult;
use crate::jitter::{JitterSource, ThreadRngJitter};
use crate::listener::StateChangeListener;
use crate::state::{BreakerSnapshot, BreakerState, StateDelta};

/// Circuit breaker whose bookkeeping runs under a mutex on the caller's
/// thread.
///
/// The common case during a sustained outage, rejecting a call against an
/// open circuit, is served from two atomics mirroring the open window, so
/// concurrent callers are not serialized on the lock just to be turned away.
pub struct SyncBreaker<C: Clock = SystemClock, J: JitterSource = ThreadRngJitter> {
    config: BreakerConfig,
    state: Mutex<BreakerState>,
    /// Lock-free mirror of `state.is_broken` for the rejection fast path.
    broken_hint: AtomicBool,
    /// Lock-free mirror of `state.next_try_at`, as nanoseconds past `epoch`.
    next_try_hint: AtomicU64,
    /// Reference instant for encoding `next_try_at` into an atomic.
    epoch: Instant,
    clock: C,
    jitter: J,
}

impl SyncBreaker<SystemClock, ThreadRngJitter> {
    /// Breaker on the system clock with thread-local jitter.
    pub fn new(config: BreakerConfig) -> ConfigResult<Self> {
        Self::with_parts(config, SystemClock, ThreadRngJitter)
    }
}

impl<C: Clock> SyncBreaker<C, ThreadRngJitter> {
    /// Breaker on a custom clock (deterministic tests).
    pub fn with_clock(config: BreakerConfig, clock: C) -> ConfigResult<Self> {
        Self::with_parts(config, clock, ThreadRngJitter)
    }
}

impl<C: Clock, J: JitterSource> SyncBreaker<C, J> {
    /// Breaker with every capability supplied explicitly.
    pub fn with_parts(config: BreakerConfig, clock: C, jitter: J) -> ConfigResult<Self> {
        config.validate()?;
        let epoch = clock.now();
        Ok(Self {
            config,
            state: Mutex::new(BreakerState::new(epoch)),
            broken_hint: AtomicBool::new(false),
            next_try_hint: AtomicU64::new(0),
            epoch,
            clock,
            jitter,
        })
    }

    /// Run `op` through the breaker.
    ///
    /// Returns `Ok(None)` when the circuit is open and `op` was not invoked.
    /// Otherwise invokes `op`; an `Err` is recorded as a failure and
    /// propagated unchanged, an `Ok(value)` is classified by `is_ok(&value)`
    /// and returned as `Ok(Some(value))` regardless of the classification.
    /// Listener callbacks fire after the state lock is released.
    pub fn execute<T, E, F, P>(
        &self,
        op: F,
        is_ok: P,
        listener: &dyn StateChangeListener,
    ) -> Result<Option<T>, E>
    where
        F: FnOnce() -> Result<T, E>,
        P: FnOnce(&T) -> bool,
    {
        let now = self.clock.now();

        // Fast path: during a sustained outage almost every call lands here
        // and must not contend on the lock.
        if self.broken_hint.load(Ordering::Acquire)
            && self.nanos_past_epoch(now) < self.next_try_hint.load(Ordering::Acquire)
        {
            debug!("rejecting call against open circuit (fast path)");
            return Ok(None);
        }

        // The hints may be stale in either direction; re-check under the
        // lock before letting the call through.
        {
            let state = self.lock_state();
            if state.is_open(now) {
                debug!("rejecting call against open circuit");
                return Ok(None);
            }
        }

        match op() {
            Ok(value) => {
                let delta = self.record(now, !is_ok(&value));
                delta.notify(listener);
                Ok(Some(value))
            }
            Err(err) => {
                let delta = self.record(now, true);
                delta.notify(listener);
                Err(err)
            }
        }
    }

    /// Wrap `op` into a reusable guarded closure.
    ///
    /// Each invocation of the returned closure goes through [`execute`]
    /// against this breaker's then-current state.
    ///
    /// [`execute`]: Self::execute
    pub fn apply<'a, T, E, F, P, L>(
        &'a self,
        op: F,
        is_ok: P,
        listener: L,
    ) -> impl Fn() -> Result<Option<T>, E> + 'a
    where
        F: Fn() -> Result<T, E> + 'a,
        P: Fn(&T) -> bool + 'a,
        L: StateChangeListener + 'a,
    {
        move || self.execute(&op, &is_ok, &listener)
    }

    /// Whether the circuit is currently open or half-open.
    pub fn is_broken(&self) -> bool {
        self.lock_state().is_broken
    }

    /// Current smoothed failure proportion.
    pub fn failures_proportion(&self) -> f64 {
        self.lock_state().failures_proportion_ema
    }

    /// Consecutive failed half-open probes since the circuit opened.
    pub fn tries(&self) -> u32 {
        self.lock_state().tries
    }

    /// Consistent view of the observable state.
    pub fn snapshot(&self) -> BreakerSnapshot {
        BreakerSnapshot::of(&self.lock_state())
    }

    /// Apply one outcome under the lock and refresh the fast-path mirror.
    fn record(&self, now: Instant, has_failed: bool) -> StateDelta {
        let mut state = self.lock_state();
        let delta = state.update(&self.config, now, has_failed, &self.jitter);
        self.broken_hint.store(state.is_broken, Ordering::Release);
        self.next_try_hint.store(self.nanos_past_epoch(state.next_try_at), Ordering::Release);
        delta
    }

    fn lock_state(&self) -> MutexGuard<'_, BreakerState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                // A panicked listener never holds this lock, so the inner
                // data is a complete, consistent record. Keep going with it.
                warn!("breaker state lock poisoned, recovering inner state");
                poisoned.into_inner()
            }
        }
    }

    fn nanos_past_epoch(&self, instant: Instant) -> u64 {
        let nanos = instant.saturating_duration_since(self.epoch).as_nanos();
        nanos.min(u128::from(u64::MAX)) as u64
    }
}

impl<C: Clock, J: JitterSource> std::fmt::Debug for SyncBreaker<C, J> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.snapshot();
        f.debug_struct("SyncBreaker")
            .field("config", &self.config)
            .field("is_broken", &snapshot.is_broken)
            .field("failures_proportion", &snapshot.failures_proportion)
            .field("tries", &snapshot.tries)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;
    use std::sync::Mutex;

    use super::*;
    use crate::clock::MockClock;
    use crate::jitter::FixedJitter;
    use crate::listener::NoopListener;

    #[derive(Default)]
    struct RecordingListener {
        broken: Mutex<Vec<bool>>,
        proportions: Mutex<Vec<f64>>,
        tries: Mutex<Vec<u32>>,
    }

    impl StateChangeListener for RecordingListener {
        fn broken_state_changed(&self, is_broken: bool) {
            self.broken.lock().unwrap().push(is_broken);
        }

        fn failures_proportion_changed(&self, new_value: f64) {
            self.proportions.lock().unwrap().push(new_value);
        }

        fn tries_changed(&self, new_value: u32) {
            self.tries.lock().unwrap().push(new_value);
        }
    }

    fn breaker(
        threshold: f64,
        recover_millis: u64,
        alfa: f64,
        clock: MockClock,
    ) -> SyncBreaker<MockClock, FixedJitter> {
        let config = BreakerConfig::builder()
            .break_threshold(threshold)
            .initial_recover_millis(recover_millis)
            .alfa(alfa)
            .build()
            .unwrap();
        SyncBreaker::with_parts(config, clock, FixedJitter(1.0)).unwrap()
    }

    #[test]
    fn invalid_config_is_rejected_at_construction() {
        let config = BreakerConfig { break_threshold: 2.0, ..BreakerConfig::default() };
        assert!(SyncBreaker::new(config).is_err());
    }

    #[test]
    fn closed_breaker_passes_value_through() {
        let breaker = breaker(0.5, 100, 0.5, MockClock::new());

        let result: Result<Option<i32>, std::io::Error> =
            breaker.execute(|| Ok(42), |v| *v > 0, &NoopListener);

        assert_eq!(result.unwrap(), Some(42));
        assert!(!breaker.is_broken());
    }

    #[test]
    fn operation_error_is_propagated_unchanged() {
        let breaker = breaker(0.9, 100, 0.1, MockClock::new());

        let result: Result<Option<i32>, std::io::Error> =
            breaker.execute(|| Err(std::io::Error::other("boom")), |_| true, &NoopListener);

        let err = result.unwrap_err();
        assert_eq!(err.to_string(), "boom");
        assert!(breaker.failures_proportion() > 0.0, "failure must be recorded");
    }

    #[test]
    fn failed_predicate_counts_as_failure_but_returns_value() {
        let breaker = breaker(0.9, 100, 0.5, MockClock::new());

        let result: Result<Option<i32>, std::io::Error> =
            breaker.execute(|| Ok(-1), |v| *v > 0, &NoopListener);

        assert_eq!(result.unwrap(), Some(-1));
        assert_eq!(breaker.failures_proportion(), 0.5);
    }

    #[test]
    fn open_circuit_rejects_without_invoking_operation() {
        let clock = MockClock::new();
        let breaker = breaker(0.5, 100, 0.5, clock.clone());
        let calls = AtomicU32::new(0);

        let fail = || -> Result<Option<i32>, std::io::Error> {
            breaker.execute(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(std::io::Error::other("down"))
                },
                |_| true,
                &NoopListener,
            )
        };

        assert!(fail().is_err());
        assert!(fail().is_err());
        assert!(breaker.is_broken());
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // Inside the open window: rejected, op not invoked
        clock.advance_millis(50);
        let rejected = fail().unwrap();
        assert_eq!(rejected, None);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn half_open_success_closes_and_next_call_is_not_rejected() {
        let clock = MockClock::new();
        let breaker = breaker(0.5, 100, 0.5, clock.clone());

        for _ in 0..2 {
            let _ = breaker.execute(
                || Err::<i32, _>(std::io::Error::other("down")),
                |_| true,
                &NoopListener,
            );
        }
        assert!(breaker.is_broken());

        clock.advance_millis(150);
        let probe: Result<Option<i32>, std::io::Error> =
            breaker.execute(|| Ok(1), |_| true, &NoopListener);
        assert_eq!(probe.unwrap(), Some(1));
        assert!(!breaker.is_broken());
        assert_eq!(breaker.tries(), 0);

        // No stale rejection after closing
        let next: Result<Option<i32>, std::io::Error> =
            breaker.execute(|| Ok(2), |_| true, &NoopListener);
        assert_eq!(next.unwrap(), Some(2));
    }

    #[test]
    fn scenario_from_break_to_backoff() {
        // threshold 0.5, recover 100ms, alfa 0.5
        let clock = MockClock::new();
        let breaker = breaker(0.5, 100, 0.5, clock.clone());
        let listener = RecordingListener::default();

        // failure, failure -> ema 0.75 > 0.5 -> opens
        for _ in 0..2 {
            let _ = breaker.execute(
                || Err::<i32, _>(std::io::Error::other("down")),
                |_| true,
                &listener,
            );
        }
        let snapshot = breaker.snapshot();
        assert!(snapshot.is_broken);
        assert_eq!(snapshot.failures_proportion, 0.75);

        // +50ms: rejected
        clock.advance_millis(50);
        let rejected: Result<Option<i32>, std::io::Error> =
            breaker.execute(|| Ok(0), |_| true, &listener);
        assert_eq!(rejected.unwrap(), None);

        // +150ms: half-open probe fails, tries -> 1, window 200ms nominal
        clock.advance_millis(100);
        let _ = breaker
            .execute(|| Err::<i32, _>(std::io::Error::other("down")), |_| true, &listener);
        assert_eq!(breaker.tries(), 1);

        // Still rejected 199ms into the new window, allowed at 201ms
        clock.advance_millis(199);
        let rejected: Result<Option<i32>, std::io::Error> =
            breaker.execute(|| Ok(0), |_| true, &listener);
        assert_eq!(rejected.unwrap(), None);

        clock.advance_millis(2);
        let probe: Result<Option<i32>, std::io::Error> =
            breaker.execute(|| Ok(0), |_| true, &listener);
        assert_eq!(probe.unwrap(), Some(0));
        assert!(!breaker.is_broken());

        assert_eq!(*listener.broken.lock().unwrap(), vec![true, false]);
        assert_eq!(*listener.tries.lock().unwrap(), vec![1, 0]);
    }

    #[test]
    fn listener_ema_callback_respects_hysteresis() {
        let clock = MockClock::new();
        let listener = RecordingListener::default();

        // alfa 0.5: every closed-state outcome moves the EMA well past 1%
        let breaker = breaker(0.99, 100, 0.5, clock.clone());
        let _ = breaker.execute(
            || Err::<i32, _>(std::io::Error::other("down")),
            |_| true,
            &listener,
        );
        assert_eq!(*listener.proportions.lock().unwrap(), vec![0.5]);

        // alfa 0.005: single-step movement stays under the hysteresis
        let quiet = breaker_with_alfa(0.005, clock);
        let _ =
            quiet.execute(|| Err::<i32, _>(std::io::Error::other("down")), |_| true, &listener);
        assert_eq!(listener.proportions.lock().unwrap().len(), 1);
    }

    fn breaker_with_alfa(alfa: f64, clock: MockClock) -> SyncBreaker<MockClock, FixedJitter> {
        breaker(0.99, 100, alfa, clock)
    }

    #[test]
    fn apply_returns_reusable_guarded_closure() {
        let clock = MockClock::new();
        let breaker = breaker(0.5, 100, 0.5, clock.clone());

        let guarded = breaker.apply(
            || Err::<i32, _>(std::io::Error::other("down")),
            |_| true,
            NoopListener,
        );

        assert!(guarded().is_err());
        assert!(guarded().is_err());

        // Third call hits the now-open circuit
        let rejected = guarded().unwrap();
        assert_eq!(rejected, None);
    }
}
