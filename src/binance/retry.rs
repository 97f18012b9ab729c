// =============================================================================
// Retry layer — bounded backoff for transient exchange failures
// =============================================================================
//
// Network-level failures (connect, timeout, 5xx, 429) are retried on a fixed
// 15/30/60/120 s ladder, five attempts total, ~225 s of waiting at most. When
// the ladder is exhausted an alarm record is written and the last error
// propagates. Business and validation errors pass through untouched — the
// exchange already gave a definitive answer.
// =============================================================================

use std::future::Future;
use std::time::Duration;

use tracing::{error, warn};

use crate::audit::AuditLog;
use crate::error::BotResult;

/// Backoff schedule between attempts. `delays.len() + 1` attempts are made.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    delays: Vec<Duration>,
}

impl RetryPolicy {
    /// Production ladder: 15/30/60/120 s between five attempts.
    pub fn network() -> Self {
        Self {
            delays: [15, 30, 60, 120].iter().map(|s| Duration::from_secs(*s)).collect(),
        }
    }

    /// Zero-delay ladder for tests.
    #[cfg(test)]
    pub fn immediate(attempts: usize) -> Self {
        Self { delays: vec![Duration::ZERO; attempts.saturating_sub(1)] }
    }

    pub fn max_attempts(&self) -> usize {
        self.delays.len() + 1
    }

    fn delay_before(&self, next_attempt: usize) -> Duration {
        // next_attempt is 2-based (the delay taken before attempt N).
        self.delays
            .get(next_attempt.saturating_sub(2))
            .copied()
            .unwrap_or_else(|| *self.delays.last().unwrap_or(&Duration::ZERO))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::network()
    }
}

/// Run `op` until it succeeds, returns a non-transient error, or the retry
/// ladder is exhausted. On exhaustion an alarm record is emitted.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    audit: &AuditLog,
    op_name: &str,
    mut op: F,
) -> BotResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = BotResult<T>>,
{
    let max_attempts = policy.max_attempts();
    let mut attempt = 1usize;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < max_attempts => {
                let wait = policy.delay_before(attempt + 1);
                warn!(
                    op = op_name,
                    attempt,
                    max_attempts,
                    wait_secs = wait.as_secs(),
                    error = %e,
                    "transient failure — retrying"
                );
                tokio::time::sleep(wait).await;
                attempt += 1;
            }
            Err(e) => {
                if e.is_transient() {
                    error!(op = op_name, attempts = attempt, error = %e, "retries exhausted");
                    audit.alarm(&format!("retries exhausted for {op_name}: {e}"));
                }
                return Err(e);
            }
        }
    }
}
