//! Bounded retry with exponential backoff at the gateway boundary

use crate::config::RetryConfig;
use crate::error::{PersistenceError, Result};
use std::future::Future;
use tokio::time::sleep;
use tracing::warn;

/// Run `f` until it succeeds, fails with a non-transient error, or the
/// attempt budget runs out.
pub async fn with_retry<F, Fut, T>(retry_config: &RetryConfig, what: &str, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut delay = retry_config.initial_delay();
    let max_attempts = retry_config.max_attempts.max(1);

    for attempt in 1..=max_attempts {
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) if !e.is_transient() => return Err(e),
            Err(e) => {
                if attempt == max_attempts {
                    return Err(PersistenceError::RetriesExhausted {
                        attempts: attempt,
                        last_error: e.to_string(),
                    });
                }

                warn!("{} attempt {} failed: {}, retrying in {:?}", what, attempt, e, delay);
                sleep(delay).await;

                // Exponential backoff
                delay = retry_config.next_delay(delay);
            }
        }
    }

    Err(PersistenceError::generic(format!("{what}: no attempts made")))
}
