//! Best-effort synced flush before a data node stops

use std::time::Duration;

use tracing::{info, warn};

use crate::client::ClusterControlClient;
use crate::error::Result;

/// Synced flushes fail benignly under concurrent writes; reissue a few times
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for FlushPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            backoff: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushOutcome {
    pub attempts: u32,
    /// Shard copies that failed on the last attempt
    pub failed_shards: u64,
}

impl FlushOutcome {
    pub fn is_clean(&self) -> bool {
        self.failed_shards == 0
    }
}

/// Synced flush of `index_pattern`, retried while shard copies report failures
///
/// Exhausting the attempts on shard failures is not an error: the flush only
/// speeds up the later recovery. Retryable request errors use up attempts the
/// same way and are returned if the last attempt fails too; other errors are
/// returned at once.
pub async fn flush_synced_with_retry(
    client: &dyn ClusterControlClient,
    index_pattern: &str,
    policy: FlushPolicy,
) -> Result<FlushOutcome> {
    let attempts = policy.attempts.max(1);
    let mut failed_shards = 0;

    for attempt in 1..=attempts {
        let response = match client.flush_synced(index_pattern).await {
            Ok(response) => response,
            Err(e) if e.is_retryable() && attempt < attempts => {
                warn!(
                    "Synced flush of {} failed, attempt {}/{}: {}",
                    index_pattern, attempt, attempts, e
                );
                tokio::time::sleep(policy.backoff).await;
                continue;
            }
            Err(e) => return Err(e),
        };
        failed_shards = response.shards.failed;

        if failed_shards == 0 {
            info!(
                "Synced flush of {} succeeded on attempt {} ({} shards)",
                index_pattern, attempt, response.shards.successful
            );
            return Ok(FlushOutcome {
                attempts: attempt,
                failed_shards,
            });
        }

        warn!(
            "Synced flush of {} failed on {} shard copies, attempt {}/{}",
            index_pattern, failed_shards, attempt, attempts
        );
        if attempt < attempts {
            tokio::time::sleep(policy.backoff).await;
        }
    }

    warn!(
        "Giving up on synced flush of {} with {} failed shard copies",
        index_pattern, failed_shards
    );
    Ok(FlushOutcome {
        attempts,
        failed_shards,
    })
}
