use tokio::time::{Instant, sleep};
use tracing::debug;

use super::store::StoreHandle;
use crate::config::PollConfig;
use crate::error::TimedOut;

/// Poll the store for `id` with exponential backoff until the signature
/// appears or `poll.max_elapsed` has passed.
///
/// The store is checked once more at the deadline before giving up.
pub async fn await_signature(
    store: &StoreHandle,
    id: &str,
    poll: &PollConfig,
) -> Result<String, TimedOut> {
    let started = Instant::now();
    let deadline = started + poll.max_elapsed();
    let mut attempt = 0;

    loop {
        if let Some(signature) = store.get(id).await {
            debug!(job_id = %id, attempt, "signature available");
            return Ok(signature);
        }

        let now = Instant::now();
        if now >= deadline {
            let waited_ms = now.duration_since(started).as_millis() as u64;
            debug!(job_id = %id, waited_ms, "signature not ready, deferring");
            return Err(TimedOut { waited_ms });
        }

        attempt += 1;
        sleep(poll.delay_for_attempt(attempt).min(deadline - now)).await;
    }
}
