use std::future::Future;
use std::time::Duration;

use conduit_config::shared::RetryConfig;
use rand::Rng;
use tracing::warn;

use crate::error::ConduitResult;

/// Runs `operation` until it succeeds or `config.max_attempts` attempts failed.
///
/// Delays grow exponentially per [`RetryConfig::delay_for`] and carry up to 50%
/// of random jitter on top. The error of the last attempt is returned.
pub async fn retry_with_backoff<T, F, Fut>(
    config: &RetryConfig,
    operation_name: &'static str,
    mut operation: F,
) -> ConduitResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ConduitResult<T>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt >= max_attempts => return Err(err),
            Err(err) => {
                let delay = with_jitter(config.delay_for(attempt));
                warn!(
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "{operation_name} failed, retrying"
                );

                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

fn with_jitter(delay: Duration) -> Duration {
    let max_jitter_ms = delay.as_millis() as u64 / 2;
    if max_jitter_ms == 0 {
        return delay;
    }

    delay + Duration::from_millis(rand::rng().random_range(0..=max_jitter_ms))
}
