//! Bounded retry for Playlink.
//!
//! Several parts of the system poll something flaky until it works or a
//! bound is hit:
//!
//! - capture acquisition waits for the rendering surface to come up,
//! - lobby listing retries transient directory failures,
//! - the signaling manager waits between failover cycles,
//! - the host republishes its signaling id after a failed write.
//!
//! They all share [`retry`], parameterized by a [`Backoff`] schedule and a
//! [`RetryPolicy`] bound.
//!
//! ```ignore
//! let policy = RetryPolicy::new(Backoff::exponential(ms(250), 2.0, secs(2)), 8);
//! let stream = retry(&policy, "capture", |_| source.capture(&surface, 60), |e| e.is_not_ready()).await?;
//! ```

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// Backoff
// ---------------------------------------------------------------------------

/// How a delay grows with the attempt number.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Schedule {
    /// Same delay every time.
    Fixed,
    /// `base * (attempt + 1)`.
    Linear,
    /// `base * growth^attempt`.
    Exponential { growth: f64 },
}

/// A delay schedule: `min(schedule(base, attempt), cap) + jitter`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Backoff {
    pub schedule: Schedule,
    pub base: Duration,
    pub cap: Duration,
    /// Upper bound of uniformly random extra delay. Zero disables jitter.
    #[serde(default)]
    pub jitter: Duration,
}

impl Backoff {
    /// Growth factors are clamped to this range by [`validated`](Self::validated).
    pub const MAX_GROWTH: f64 = 10.0;

    pub fn fixed(delay: Duration) -> Self {
        Self {
            schedule: Schedule::Fixed,
            base: delay,
            cap: delay,
            jitter: Duration::ZERO,
        }
    }

    pub fn linear(step: Duration, cap: Duration) -> Self {
        Self {
            schedule: Schedule::Linear,
            base: step,
            cap,
            jitter: Duration::ZERO,
        }
    }

    pub fn exponential(base: Duration, growth: f64, cap: Duration) -> Self {
        Self {
            schedule: Schedule::Exponential { growth },
            base,
            cap,
            jitter: Duration::ZERO,
        }
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Clamp and fix any out-of-range values.
    ///
    /// - `growth` below 1.0 would shrink delays; it is raised to 1.0.
    /// - `growth` above [`Self::MAX_GROWTH`] is lowered to it.
    /// - `cap` is raised to at least `base`.
    pub fn validated(mut self) -> Self {
        if let Schedule::Exponential { growth } = &mut self.schedule {
            if !growth.is_finite() || *growth < 1.0 {
                warn!(growth = *growth, "backoff growth below 1.0, clamping");
                *growth = 1.0;
            } else if *growth > Self::MAX_GROWTH {
                warn!(
                    growth = *growth,
                    max = Self::MAX_GROWTH,
                    "backoff growth too large, clamping"
                );
                *growth = Self::MAX_GROWTH;
            }
        }
        if self.cap < self.base {
            warn!(cap = ?self.cap, base = ?self.base, "backoff cap below base, raising");
            self.cap = self.base;
        }
        self
    }

    /// Delay before retry number `attempt` (0 = the first retry), without
    /// jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let raw = match self.schedule {
            Schedule::Fixed => self.base,
            Schedule::Linear => self.base.saturating_mul(attempt.saturating_add(1)),
            Schedule::Exponential { growth } => {
                let factor = growth.powi(attempt.min(i32::MAX as u32) as i32);
                let secs = self.base.as_secs_f64() * factor;
                if secs.is_finite() && secs < self.cap.as_secs_f64() {
                    Duration::from_secs_f64(secs)
                } else {
                    self.cap
                }
            }
        };
        raw.min(self.cap)
    }

    /// Delay before retry number `attempt`, jitter included.
    pub fn delay(&self, attempt: u32) -> Duration {
        let delay = self.base_delay(attempt);
        if self.jitter.is_zero() {
            return delay;
        }
        let extra = rand::rng().random_range(0..=self.jitter.as_millis() as u64);
        delay + Duration::from_millis(extra)
    }
}

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

/// A schedule plus a bound on total attempts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub backoff: Backoff,
    /// Total attempts including the first one. At least 1.
    pub max_attempts: u32,
}

impl RetryPolicy {
    pub fn new(backoff: Backoff, max_attempts: u32) -> Self {
        Self {
            backoff,
            max_attempts,
        }
    }

    /// A single attempt, no retries.
    pub fn once() -> Self {
        Self::new(Backoff::fixed(Duration::ZERO), 1)
    }

    pub fn validated(mut self) -> Self {
        if self.max_attempts == 0 {
            warn!("max_attempts of 0 would never run, using 1");
            self.max_attempts = 1;
        }
        self.backoff = self.backoff.validated();
        self
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Why [`retry`] gave up.
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    /// Every allowed attempt failed with a retryable error.
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },

    /// An attempt failed with an error the caller classed as permanent.
    #[error("attempt {attempt} failed permanently: {error}")]
    Aborted { attempt: u32, error: E },
}

impl<E> RetryError<E> {
    /// Number of attempts made, the failing one included.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Exhausted { attempts, .. } => *attempts,
            Self::Aborted { attempt, .. } => *attempt,
        }
    }

    /// The last underlying error.
    pub fn into_inner(self) -> E {
        match self {
            Self::Exhausted { last, .. } => last,
            Self::Aborted { error, .. } => error,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }
}

/// The per-attempt deadline elapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("timed out after {0:?}")]
pub struct Elapsed(pub Duration);

// ---------------------------------------------------------------------------
// retry
// ---------------------------------------------------------------------------

/// Runs `op` until it succeeds, fails permanently, or runs out of attempts.
///
/// `op` receives the zero-based attempt number. After a failure for which
/// `is_retryable` returns `true`, the task sleeps for
/// `policy.backoff.delay(attempt)` and tries again. Dropping the returned
/// future cancels the loop, sleep included.
///
/// # Errors
/// - `RetryError::Aborted` as soon as `is_retryable` returns `false`.
/// - `RetryError::Exhausted` after `policy.max_attempts` retryable failures.
pub async fn retry<T, E, Op, Fut, P>(
    policy: &RetryPolicy,
    label: &str,
    mut op: Op,
    mut is_retryable: P,
) -> Result<T, RetryError<E>>
where
    Op: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: FnMut(&E) -> bool,
    E: Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        let error = match op(attempt).await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(label, attempts = attempt + 1, "succeeded after retry");
                }
                return Ok(value);
            }
            Err(error) => error,
        };

        let made = attempt + 1;
        if !is_retryable(&error) {
            return Err(RetryError::Aborted {
                attempt: made,
                error,
            });
        }
        if made >= max_attempts {
            warn!(label, attempts = made, error = %error, "retry budget exhausted");
            return Err(RetryError::Exhausted {
                attempts: made,
                last: error,
            });
        }

        let delay = policy.backoff.delay(attempt);
        debug!(label, attempt = made, ?delay, error = %error, "retrying");
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

/// Bounds a future by `limit`.
///
/// # Errors
/// Returns [`Elapsed`] if `fut` does not finish in time.
pub async fn with_timeout<F: Future>(limit: Duration, fut: F) -> Result<F::Output, Elapsed> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| Elapsed(limit))
}
