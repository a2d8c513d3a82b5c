//! Timeout and retry wrapper for capability calls.
//!
//! Every embedding and generation call goes through [`with_retry`]: each
//! attempt is bounded by `timeout`, and transient failures
//! ([`CapabilityError::is_transient`]) are retried up to `max_retries`
//! times with exponential backoff (`backoff`, `2 × backoff`, ...).
//! Permanent failures return immediately.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::CapabilityError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub timeout: Duration,
    pub max_retries: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 1,
            backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    fn delay(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(1 << attempt.min(5))
    }
}

/// Run `op` under the policy's timeout, retrying transient failures.
///
/// `label` names the call in log output (e.g. `"embed"`, `"generate"`).
pub async fn with_retry<T, F, Fut>(
    label: &str,
    policy: &RetryPolicy,
    mut op: F,
) -> Result<T, CapabilityError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CapabilityError>>,
{
    let mut attempt = 0u32;
    loop {
        let result = match tokio::time::timeout(policy.timeout, op()).await {
            Ok(r) => r,
            Err(_) => Err(CapabilityError::Timeout(policy.timeout)),
        };

        match result {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < policy.max_retries => {
                let delay = policy.delay(attempt);
                warn!(
                    call = label,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "capability call failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
