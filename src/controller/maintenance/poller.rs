//! Stability polling against live cluster state
//!
//! A single converged reading is not enough: shard counters drop to zero
//! between one recovery batch finishing and the next starting. A wait only
//! succeeds after [`STABILITY_COUNT`] consecutive converged readings.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Consecutive converged readings required before a wait succeeds
pub const STABILITY_COUNT: u32 = 5;
pub const SHARD_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const MEMBERSHIP_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// What a poller is waiting for; selects the poll interval and timeout error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitCondition {
    NodeMembership { node: String },
    NoDelayedUnassignedShards,
    NoRelocatingOrInitializingShards,
}

impl WaitCondition {
    fn default_poll_interval(&self) -> Duration {
        match self {
            WaitCondition::NodeMembership { .. } => MEMBERSHIP_POLL_INTERVAL,
            _ => SHARD_POLL_INTERVAL,
        }
    }

    fn timeout_error(&self, elapsed: Duration, timeout: Duration) -> Error {
        match self {
            WaitCondition::NodeMembership { node } => Error::MembershipTimeout {
                node: node.clone(),
                elapsed,
                timeout,
            },
            _ => Error::ConvergenceTimeout {
                condition: self.to_string(),
                elapsed,
                timeout,
            },
        }
    }
}

impl fmt::Display for WaitCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitCondition::NodeMembership { node } => write!(f, "node {node} to join the cluster"),
            WaitCondition::NoDelayedUnassignedShards => f.write_str("delayed unassigned shards"),
            WaitCondition::NoRelocatingOrInitializingShards => {
                f.write_str("relocating or initializing shards")
            }
        }
    }
}

/// Outcome of a successful wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Convergence {
    pub polls: u32,
    pub elapsed: Duration,
}

#[derive(Debug, Clone)]
pub struct ConvergencePoller {
    condition: WaitCondition,
    stability_count: u32,
    poll_interval: Duration,
    timeout: Duration,
}

impl ConvergencePoller {
    pub fn new(condition: WaitCondition, timeout: Duration) -> Self {
        Self {
            poll_interval: condition.default_poll_interval(),
            condition,
            stability_count: STABILITY_COUNT,
            timeout,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_stability_count(mut self, stability_count: u32) -> Self {
        self.stability_count = stability_count.max(1);
        self
    }

    /// Poll `pending` until it reports false `stability_count` times in a row
    ///
    /// `pending` must fetch fresh state on every call and return true while
    /// the condition has not converged. A true reading resets the streak.
    /// Errors from `pending` abort the wait.
    pub async fn wait_until_stable<F, Fut>(&self, mut pending: F) -> Result<Convergence>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<bool>>,
    {
        let started = Instant::now();
        let mut streak = 0u32;
        let mut polls = 0u32;

        loop {
            polls += 1;
            if pending().await? {
                if streak > 0 {
                    debug!("Still waiting for {} (streak of {} reset)", self.condition, streak);
                }
                streak = 0;
            } else {
                streak += 1;
                debug!(
                    "Converged reading {}/{} for {}",
                    streak, self.stability_count, self.condition
                );
            }

            if streak >= self.stability_count {
                let elapsed = started.elapsed();
                info!(
                    "Done waiting for {} after {} polls ({:?})",
                    self.condition, polls, elapsed
                );
                return Ok(Convergence { polls, elapsed });
            }

            let elapsed = started.elapsed();
            if elapsed > self.timeout {
                return Err(self.condition.timeout_error(elapsed, self.timeout));
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Replays `readings` (true = pending), repeating the last one
    fn script(readings: &[bool]) -> impl FnMut() -> std::future::Ready<Result<bool>> {
        let mut queue = readings.iter().copied().collect::<VecDeque<_>>();
        let mut last = true;
        move || {
            if let Some(next) = queue.pop_front() {
                last = next;
            }
            std::future::ready(Ok(last))
        }
    }

    fn shard_poller(timeout_secs: u64) -> ConvergencePoller {
        ConvergencePoller::new(
            WaitCondition::NoRelocatingOrInitializingShards,
            Duration::from_secs(timeout_secs),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_five_consecutive_converged_polls() {
        let result = shard_poller(60)
            .wait_until_stable(script(&[false; 5]))
            .await
            .unwrap();
        assert_eq!(result.polls, 5);
        // Four sleeps of two seconds between five polls
        assert_eq!(result.elapsed, Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_reading_resets_streak() {
        let readings = [false, false, false, false, true, false, false, false, false, false];
        let result = shard_poller(60)
            .wait_until_stable(script(&readings))
            .await
            .unwrap();
        assert_eq!(result.polls, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_four_converged_readings_are_not_enough() {
        let readings = [false, false, false, false, true];
        let err = shard_poller(10)
            .wait_until_stable(script(&readings))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ConvergenceTimeout { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_with_configured_timeout() {
        let err = shard_poller(10)
            .wait_until_stable(script(&[true]))
            .await
            .unwrap_err();

        match err {
            Error::ConvergenceTimeout {
                condition,
                elapsed,
                timeout,
            } => {
                assert_eq!(condition, "relocating or initializing shards");
                assert_eq!(timeout, Duration::from_secs(10));
                assert!(elapsed > timeout);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_streak_completing_just_inside_the_deadline_succeeds() {
        // Converges from the first poll; the fifth poll lands at t=8s.
        // At t=6s elapsed equals the timeout, which is not yet exceeded.
        let result = shard_poller(6).wait_until_stable(script(&[false])).await;
        assert_eq!(result.unwrap().elapsed, Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn test_streak_completing_just_past_the_deadline_fails() {
        // Same readings, but at t=6s the 5s deadline has passed
        let err = shard_poller(5)
            .wait_until_stable(script(&[false]))
            .await
            .unwrap_err();
        assert_eq!(err.timeout(), Some(Duration::from_secs(5)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_membership_timeout_names_node() {
        let poller = ConvergencePoller::new(
            WaitCondition::NodeMembership {
                node: "es-data-3".to_string(),
            },
            Duration::from_secs(3),
        );
        let started = Instant::now();
        let err = poller.wait_until_stable(script(&[true])).await.unwrap_err();

        match err {
            Error::MembershipTimeout { node, timeout, .. } => {
                assert_eq!(node, "es-data-3");
                assert_eq!(timeout, Duration::from_secs(3));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        // One-second membership polls: t=0..4, deadline exceeded at t=4
        assert_eq!(started.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_predicate_error_aborts_wait() {
        let mut calls = 0;
        let err = shard_poller(60)
            .wait_until_stable(|| {
                calls += 1;
                std::future::ready(Err(Error::ConfigError("health unavailable".to_string())))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ConfigError(_)));
        assert_eq!(calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_stability_count() {
        let result = shard_poller(60)
            .with_stability_count(1)
            .with_poll_interval(Duration::from_millis(100))
            .wait_until_stable(script(&[true, true, false]))
            .await
            .unwrap();
        assert_eq!(result.polls, 3);
        assert_eq!(result.elapsed, Duration::from_millis(200));
    }
}
