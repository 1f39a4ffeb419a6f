use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::Result;

const MAX_ATTEMPTS: u32 = 3;
const BASE_DELAY_MS: u64 = 500;

/// Retry `f` with bounded exponential backoff on transient transport
/// failures. Only use for idempotent operations (list, read, destroy);
/// non-transient errors and the final attempt surface immediately.
pub async fn with_backoff<T, F, Fut>(operation: &str, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut delay = Duration::from_millis(BASE_DELAY_MS);
    let mut attempt = 1;

    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < MAX_ATTEMPTS => {
                warn!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
