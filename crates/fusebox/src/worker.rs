//! Worker-serialized asynchronous execution wrapper.
//!
//! Instead of a lock, all state reads and mutations are funneled through a
//! single spawned task that owns the [`BreakerState`] outright. Callers are
//! never blocked: they exchange messages with the worker and await the
//! protected operation's own future on their own task.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::BreakerConfig;
use crate::constants::WORKER_QUEUE_DEPTH;
use crate::error::{AsyncBreakerError, ConfigResult};
use crate::jitter::{JitterSource, ThreadRngJitter};
use crate::listener::StateChangeListener;
use crate::state::{BreakerSnapshot, BreakerState, StateDelta};

/// Messages understood by the bookkeeping worker.
enum Command {
    /// Is the circuit open at `now`? Replies before any state change.
    Probe { now: Instant, reply: oneshot::Sender<bool> },
    /// Fold one classified outcome into the state; replies with the delta.
    Record { now: Instant, has_failed: bool, reply: oneshot::Sender<StateDelta> },
    /// Report the observable state without changing it.
    Inspect { reply: oneshot::Sender<BreakerSnapshot> },
    /// Stop the worker; every subsequent submission fails.
    Shutdown,
}

/// Circuit breaker whose state lives on a single serialized worker task.
///
/// Cloning the handle shares the breaker: all clones talk to the same
/// worker, so their updates are linearized without any lock.
///
/// Must be constructed inside a tokio runtime (the worker is spawned at
/// construction).
pub struct AsyncBreaker<C: Clock = SystemClock> {
    commands: mpsc::Sender<Command>,
    clock: Arc<C>,
}

impl<C: Clock> Clone for AsyncBreaker<C> {
    fn clone(&self) -> Self {
        Self { commands: self.commands.clone(), clock: Arc::clone(&self.clock) }
    }
}

impl AsyncBreaker<SystemClock> {
    /// Breaker on the system clock with thread-local jitter.
    pub fn new(config: BreakerConfig) -> ConfigResult<Self> {
        Self::with_parts(config, SystemClock, ThreadRngJitter)
    }
}

impl<C: Clock> AsyncBreaker<C> {
    /// Breaker with every capability supplied explicitly.
    pub fn with_parts<J>(config: BreakerConfig, clock: C, jitter: J) -> ConfigResult<Self>
    where
        J: JitterSource + 'static,
    {
        config.validate()?;
        let clock = Arc::new(clock);
        let state = BreakerState::new(clock.now());
        let (commands, inbox) = mpsc::channel(WORKER_QUEUE_DEPTH);
        tokio::spawn(run_worker(inbox, config, state, jitter));
        Ok(Self { commands, clock })
    }

    /// Run the future produced by `op` through the breaker.
    ///
    /// Resolves to `Ok(None)` when the circuit is open and `op` was never
    /// invoked. Otherwise awaits `op()`'s future on the caller's task; an
    /// `Err` is recorded as a failure and passed through as
    /// [`AsyncBreakerError::Operation`], an `Ok(value)` is classified by
    /// `is_ok(&value)` and resolves to `Ok(Some(value))`.
    ///
    /// [`AsyncBreakerError::WorkerUnavailable`] means the worker rejected
    /// the initial submission; it is distinct from a circuit-open rejection.
    pub async fn execute<T, E, F, Fut, P>(
        &self,
        op: F,
        is_ok: P,
        listener: &dyn StateChangeListener,
    ) -> Result<Option<T>, AsyncBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: FnOnce(&T) -> bool,
        E: std::error::Error + Send + Sync + 'static,
    {
        let now = self.clock.now();

        let (reply, answer) = oneshot::channel();
        self.commands
            .send(Command::Probe { now, reply })
            .await
            .map_err(|_| AsyncBreakerError::WorkerUnavailable)?;
        let open = answer.await.map_err(|_| AsyncBreakerError::WorkerUnavailable)?;
        if open {
            debug!("rejecting call against open circuit");
            return Ok(None);
        }

        match op().await {
            Ok(value) => {
                let failed = !is_ok(&value);
                if let Some(delta) = self.record(now, failed).await {
                    delta.notify(listener);
                }
                Ok(Some(value))
            }
            Err(err) => {
                if let Some(delta) = self.record(now, true).await {
                    delta.notify(listener);
                }
                Err(AsyncBreakerError::Operation(err))
            }
        }
    }

    /// Stop the worker. Every in-flight and subsequent call observes
    /// [`AsyncBreakerError::WorkerUnavailable`] on its next submission.
    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown).await;
    }

    /// Whether the worker is still accepting submissions.
    pub fn is_alive(&self) -> bool {
        !self.commands.is_closed()
    }

    /// Observable state as the worker sees it, or `None` once the worker is
    /// gone.
    pub async fn snapshot(&self) -> Option<BreakerSnapshot> {
        let (reply, answer) = oneshot::channel();
        self.commands.send(Command::Inspect { reply }).await.ok()?;
        answer.await.ok()
    }

    /// Submit the post-operation bookkeeping to the worker.
    ///
    /// The operation already ran, so a vanished worker must not mask its
    /// outcome; the update is dropped with a warning instead.
    async fn record(&self, now: Instant, has_failed: bool) -> Option<StateDelta> {
        let (reply, answer) = oneshot::channel();
        let sent = self.commands.send(Command::Record { now, has_failed, reply }).await;
        if sent.is_err() {
            warn!("breaker worker gone, outcome not recorded");
            return None;
        }
        answer.await.ok()
    }
}

impl<C: Clock> std::fmt::Debug for AsyncBreaker<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncBreaker").field("alive", &self.is_alive()).finish()
    }
}

/// Owns the state; processes commands strictly one at a time.
async fn run_worker<J: JitterSource>(
    mut inbox: mpsc::Receiver<Command>,
    config: BreakerConfig,
    mut state: BreakerState,
    jitter: J,
) {
    while let Some(command) = inbox.recv().await {
        match command {
            Command::Probe { now, reply } => {
                let _ = reply.send(state.is_open(now));
            }
            Command::Record { now, has_failed, reply } => {
                let delta = state.update(&config, now, has_failed, &jitter);
                let _ = reply.send(delta);
            }
            Command::Inspect { reply } => {
                let _ = reply.send(BreakerSnapshot::of(&state));
            }
            Command::Shutdown => break,
        }
    }
    debug!("breaker worker stopped");
}
