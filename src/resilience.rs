//! Retry and backoff policies shared by both backends
//!
//! The REST chain retries each stage with jittered exponential backoff; the
//! streaming backend reuses the same schedule shape for reconnection.

use anyhow::Result;
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::clock::Clock;

/// Exponential backoff schedule
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub initial_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    /// Retries after the first attempt (reconnects count attempts directly)
    pub max_retries: u32,
    /// Symmetric jitter fraction, e.g. 0.2 for +/-20%
    pub jitter_pct: f64,
}

impl BackoffPolicy {
    /// Per-stage policy for the REST chain: 3 retries, 1 s, x2, cap 10 s, +/-20%
    pub const fn rest_stage() -> Self {
        Self {
            initial_delay_ms: 1_000,
            multiplier: 2.0,
            max_delay_ms: 10_000,
            max_retries: 3,
            jitter_pct: 0.2,
        }
    }

    /// Streaming reconnect policy: 5 attempts, 1 s, x2, cap 30 s, no jitter
    pub const fn reconnect() -> Self {
        Self {
            initial_delay_ms: 1_000,
            multiplier: 2.0,
            max_delay_ms: 30_000,
            max_retries: 5,
            jitter_pct: 0.0,
        }
    }

    /// Deterministic delay for the given attempt (1-based), capped
    pub fn base_delay_ms(&self, attempt: u32) -> u64 {
        let exp = attempt.saturating_sub(1);
        let delay = self.initial_delay_ms as f64 * self.multiplier.powi(exp as i32);
        (delay as u64).min(self.max_delay_ms)
    }

    /// Delay with jitter applied
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay_ms(attempt) as f64;
        if self.jitter_pct <= 0.0 {
            return Duration::from_millis(base as u64);
        }
        let spread = base * self.jitter_pct;
        let jittered = rand::thread_rng().gen_range(base - spread..=base + spread);
        Duration::from_millis(jittered.max(0.0) as u64)
    }
}

/// Whether an error is worth retrying: network-level failures, throttling,
/// and server-side 5xx responses.
pub fn is_transient(error: &str) -> bool {
    let lower = error.to_lowercase();

    const NETWORK: &[&str] = &[
        "econnreset",
        "etimedout",
        "enotfound",
        "connection reset",
        "connection refused",
        "timed out",
        "timeout",
        "dns error",
    ];
    const STATUS: &[&str] = &["408", "429", "500", "502", "503", "504"];
    const PROVIDER: &[&str] = &["overloaded", "rate limit", "too many requests", "server_error"];

    NETWORK.iter().any(|p| lower.contains(p))
        || STATUS.iter().any(|p| lower.contains(p))
        || PROVIDER.iter().any(|p| lower.contains(p))
}

/// Run `op`, retrying per `policy` when `classify` marks the error
/// retryable. `on_retry(attempt, delay)` fires before each scheduled wait.
/// Non-retryable errors propagate immediately.
pub async fn with_retry<T, F, Fut>(
    label: &str,
    policy: &BackoffPolicy,
    clock: &Arc<dyn Clock>,
    classify: impl Fn(&anyhow::Error) -> bool,
    mut on_retry: impl FnMut(u32, Duration),
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                attempt += 1;
                if attempt > policy.max_retries || !classify(&err) {
                    return Err(err);
                }
                let delay = policy.delay_for(attempt);
                warn!(
                    stage = %label,
                    attempt = attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying after transient failure"
                );
                on_retry(attempt, delay);
                clock.sleep(delay).await;
            }
        }
    }
}
