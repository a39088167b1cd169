//! EMA-driven circuit breaker with two execution wrappers.
//!
//! A breaker decorates an unreliable operation (typically a remote call),
//! tracks the exponential moving average of its failure proportion, and once
//! that average rises above a threshold stops invoking the operation for a
//! cooling-off period, answering `Ok(None)` instead. Recovery is probed
//! through half-open attempts paced by a doubling, jittered backoff.
//!
//! Two wrappers share one decision engine:
//! - [`SyncBreaker`] guards its state with a mutex and blocks the calling
//!   thread for the duration of the protected operation;
//! - [`AsyncBreaker`] serializes all bookkeeping onto a single worker task
//!   and never blocks the caller.
//!
//! Time and randomness are injected capabilities ([`Clock`],
//! [`JitterSource`]), so every decision is reproducible in tests.
//!
//! ```
//! use fusebox::{BreakerConfig, NoopListener, SyncBreaker};
//!
//! let breaker = SyncBreaker::new(BreakerConfig::default())?;
//! let result: Result<Option<u32>, std::io::Error> =
//!     breaker.execute(|| Ok(200), |status| *status < 500, &NoopListener);
//! assert_eq!(result?, Some(200));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod clock;
pub mod config;
pub mod constants;
pub mod error;
pub mod jitter;
pub mod listener;
mod state;
pub mod sync;
pub mod worker;

pub use clock::{Clock, MockClock, SystemClock};
pub use config::{BreakerConfig, BreakerConfigBuilder};
pub use error::{AsyncBreakerError, ConfigError, ConfigResult};
pub use jitter::{FixedJitter, JitterSource, ThreadRngJitter};
pub use listener::{NoopListener, StateChangeListener};
pub use state::{BreakerSnapshot, StateDelta};
pub use sync::SyncBreaker;
pub use worker::AsyncBreaker;
