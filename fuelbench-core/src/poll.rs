//! Bounded polling for asynchronous state changes.
//!
//! Boot completion, console readiness and power-off are all observed the same
//! way: evaluate a predicate, sleep a fixed interval, re-evaluate, until the
//! predicate holds or the deadline passes. Predicate errors count as "not yet";
//! the deadline always surfaces as the caller's designated error.
//!
//! # Example
//!
//! ```ignore
//! use fuelbench_core::poll::{poll_until, PollSpec};
//!
//! poll_until(&PollSpec::power_off(), "master power-off", || async {
//!     Ok(!provider.is_active(site, "master").await?)
//! }, || BenchError::fuel_server("Shutdown fuel master timeout")).await?;
//! ```

use crate::error::{BenchError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Interval and deadline for one kind of wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSpec {
    pub interval: Duration,
    pub timeout: Duration,
}

impl PollSpec {
    pub const fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    /// Waiting for the management node to finish its bootstrap.
    pub const fn operational() -> Self {
        Self::new(Duration::from_secs(5), Duration::from_secs(45 * 60))
    }

    /// Waiting for the console API to answer.
    pub const fn readiness() -> Self {
        Self::new(Duration::from_secs(20), Duration::from_secs(15 * 60))
    }

    /// Waiting for a VM to report inactive.
    pub const fn power_off() -> Self {
        Self::new(Duration::from_secs(5), Duration::from_secs(5 * 60))
    }

    pub const fn with_timeout(self, timeout: Duration) -> Self {
        Self { timeout, ..self }
    }
}

/// Block until `predicate` yields `Ok(true)` or `spec.timeout` elapses.
///
/// The first evaluation happens immediately. On timeout the error built by
/// `on_timeout` is returned, never a swallowed predicate error.
pub async fn poll_until<F, Fut, E>(
    spec: &PollSpec,
    what: &str,
    mut predicate: F,
    on_timeout: E,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
    E: FnOnce() -> BenchError,
{
    let start = Instant::now();
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        match predicate().await {
            Ok(true) => {
                debug!(wait = %what, attempt, elapsed_ms = start.elapsed().as_millis(), "Condition met");
                return Ok(());
            }
            Ok(false) => {
                debug!(wait = %what, attempt, "Condition not met yet");
            }
            Err(e) => {
                warn!(wait = %what, attempt, error = %e, "Condition check failed, retrying");
            }
        }

        if start.elapsed() >= spec.timeout {
            metrics::counter!("fuelbench_poll_timeouts_total", "wait" => what.to_string())
                .increment(1);
            warn!(wait = %what, attempt, timeout_secs = spec.timeout.as_secs(), "Wait timed out");
            return Err(on_timeout());
        }

        tokio::time::sleep(spec.interval).await;
    }
}
