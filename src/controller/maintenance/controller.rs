//! Maintenance mode state machine
//!
//! Sequences settings changes and convergence waits for one lifecycle event
//! of a data node. Each (mode, phase) pair is a fixed list of steps run in
//! order; the first failing step aborts the transition.

use std::fmt;
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use tracing::{info, instrument, warn};

use super::flush::{flush_synced_with_retry, FlushOutcome, FlushPolicy};
use super::poller::{ConvergencePoller, WaitCondition};
use super::settings::{
    SettingTarget, SettingsLog, SettingsManager, ALLOCATION_ENABLE, ALLOCATION_EXCLUDE_NAME,
    ALL_INDICES, DELAYED_TIMEOUT,
};
use crate::client::{is_node_in_cluster, ClusterControlClient, SettingScope};
use crate::config::{HookConfig, MaintenanceMode, Timeouts, Tunable};
use crate::error::Result;

/// Pause between the delayed-timeout update and the flush, so the two do not
/// conflict on index metadata
pub const SETTLE_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    PreStop,
    PostStart,
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecyclePhase::PreStop => f.write_str("pre-stop"),
            LifecyclePhase::PostStart => f.write_str("post-start"),
        }
    }
}

/// Everything one transition needs, resolved from the hook configuration
#[derive(Debug, Clone)]
pub struct TransitionContext {
    pub mode: MaintenanceMode,
    pub phase: LifecyclePhase,
    pub node_name: String,
    pub tunables: Vec<Tunable>,
    pub delayed_unassigned_timeout: Option<String>,
    pub timeouts: Timeouts,
    pub flush_policy: FlushPolicy,
    pub settle_delay: Duration,
}

impl TransitionContext {
    pub fn new(config: &HookConfig, phase: LifecyclePhase) -> Result<Self> {
        // Without a maintenance mode the node name is never used
        let node_name = match config.mode {
            MaintenanceMode::None => config.node_name.clone().unwrap_or_default(),
            _ => config.require_node_name()?.to_string(),
        };

        Ok(Self {
            mode: config.mode,
            phase,
            node_name,
            tunables: config.recovery.tunables(),
            delayed_unassigned_timeout: config.delayed_unassigned_timeout.clone(),
            timeouts: config.timeouts,
            flush_policy: FlushPolicy::default(),
            settle_delay: SETTLE_DELAY,
        })
    }
}

/// Summary of a finished transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionReport {
    pub mode: MaintenanceMode,
    pub phase: LifecyclePhase,
    pub node_name: String,
    pub settings: SettingsLog,
    pub flush: Option<FlushOutcome>,
    pub elapsed: Duration,
}

impl TransitionReport {
    pub fn summary(&self) -> String {
        if self.mode == MaintenanceMode::None {
            return "No maintenance mode set".to_string();
        }

        let mut summary = format!(
            "{} {} for {} in {:?}: {} override(s) applied, {} reverted",
            self.mode,
            self.phase,
            self.node_name,
            self.elapsed,
            self.settings.applied.len(),
            self.settings.reverted.len(),
        );
        if !self.settings.handed_off.is_empty() {
            let keys: Vec<_> = self.settings.handed_off.iter().map(|t| t.key()).collect();
            summary.push_str(&format!(", left in place: {}", keys.join(", ")));
        }
        if let Some(flush) = &self.flush {
            summary.push_str(&format!(
                ", synced flush {} after {} attempt(s)",
                if flush.is_clean() { "clean" } else { "partial" },
                flush.attempts
            ));
        }
        summary
    }
}

pub struct ModeController<'a> {
    client: &'a dyn ClusterControlClient,
    ctx: TransitionContext,
    settings: SettingsManager<'a>,
    flush: Option<FlushOutcome>,
}

impl<'a> ModeController<'a> {
    pub fn new(client: &'a dyn ClusterControlClient, ctx: TransitionContext) -> Self {
        Self {
            client,
            ctx,
            settings: SettingsManager::new(client),
            flush: None,
        }
    }

    /// Drive the transition to completion
    ///
    /// On failure every temporary override still outstanding is reverted
    /// before the original error is returned. Hand-offs stay in place.
    #[instrument(skip(self), fields(mode = %self.ctx.mode, phase = %self.ctx.phase, node = %self.ctx.node_name))]
    pub async fn run(mut self) -> Result<TransitionReport> {
        let started = Instant::now();

        let outcome = match (self.ctx.mode, self.ctx.phase) {
            (MaintenanceMode::None, _) => {
                info!("No maintenance mode set");
                Ok(())
            }
            (mode, LifecyclePhase::PostStart) => self.post_start(mode).await,
            (MaintenanceMode::Allocation, LifecyclePhase::PreStop) => {
                self.pre_stop_allocation().await
            }
            (MaintenanceMode::DelayedAllocation, LifecyclePhase::PreStop) => {
                self.pre_stop_delayed_allocation().await
            }
            (MaintenanceMode::Drain, LifecyclePhase::PreStop) => self.pre_stop_drain().await,
        };

        if let Err(e) = outcome {
            self.restore_after_failure().await;
            return Err(e);
        }

        if !self.settings.outstanding().is_empty() {
            warn!(
                "{} override(s) still outstanding at the end of the transition",
                self.settings.outstanding().len()
            );
            self.restore_after_failure().await;
        }

        Ok(TransitionReport {
            mode: self.ctx.mode,
            phase: self.ctx.phase,
            node_name: self.ctx.node_name,
            settings: self.settings.into_log(),
            flush: self.flush,
            elapsed: started.elapsed(),
        })
    }

    async fn post_start(&mut self, mode: MaintenanceMode) -> Result<()> {
        info!("Wait for node {} to join the cluster", self.ctx.node_name);
        self.wait_for_node_in_cluster().await?;

        info!("Set recovery settings");
        self.settings.apply_tunables(&self.ctx.tunables).await?;

        if mode == MaintenanceMode::Drain {
            info!("UnDrain local node {}", self.ctx.node_name);
            self.settings
                .release(SettingTarget::cluster(
                    SettingScope::Transient,
                    ALLOCATION_EXCLUDE_NAME,
                ))
                .await?;
        } else {
            info!("Enable shard allocation");
            self.settings
                .release(SettingTarget::cluster(SettingScope::Transient, ALLOCATION_ENABLE))
                .await?;
        }

        self.wait_for_shards_to_settle().await?;

        if mode != MaintenanceMode::Drain && self.ctx.delayed_unassigned_timeout.is_some() {
            info!("Reset {} on all indices", DELAYED_TIMEOUT);
            self.settings
                .release(SettingTarget::index(ALL_INDICES, DELAYED_TIMEOUT))
                .await?;
        }

        info!("Reset recovery settings");
        self.settings.revert_tunables(&self.ctx.tunables).await?;
        Ok(())
    }

    async fn pre_stop_allocation(&mut self) -> Result<()> {
        info!("Disabling shard allocation");
        self.settings
            .hand_off(
                SettingTarget::cluster(SettingScope::Transient, ALLOCATION_ENABLE),
                Value::String("none".to_string()),
                false,
            )
            .await?;

        self.synced_flush().await
    }

    async fn pre_stop_delayed_allocation(&mut self) -> Result<()> {
        if let Some(timeout) = self.ctx.delayed_unassigned_timeout.clone() {
            info!("Setting {} to {} on all indices", DELAYED_TIMEOUT, timeout);
            self.settings
                .hand_off(
                    SettingTarget::index(ALL_INDICES, DELAYED_TIMEOUT),
                    Value::String(timeout),
                    true,
                )
                .await?;
            tokio::time::sleep(self.ctx.settle_delay).await;
        }

        self.synced_flush().await
    }

    async fn pre_stop_drain(&mut self) -> Result<()> {
        info!("Setting recovery settings during drain operation");
        self.settings.apply_tunables(&self.ctx.tunables).await?;

        info!("Drain local node {}", self.ctx.node_name);
        self.settings
            .hand_off(
                SettingTarget::cluster(SettingScope::Transient, ALLOCATION_EXCLUDE_NAME),
                Value::String(self.ctx.node_name.clone()),
                false,
            )
            .await?;

        self.wait_for_shards_to_settle().await?;

        info!("Reset recovery settings");
        self.settings.revert_tunables(&self.ctx.tunables).await?;
        Ok(())
    }

    async fn synced_flush(&mut self) -> Result<()> {
        info!("Perform a synced flush");
        let outcome =
            flush_synced_with_retry(self.client, ALL_INDICES, self.ctx.flush_policy).await?;
        self.flush = Some(outcome);
        Ok(())
    }

    async fn wait_for_node_in_cluster(&self) -> Result<()> {
        let client = self.client;
        let node = self.ctx.node_name.as_str();

        ConvergencePoller::new(
            WaitCondition::NodeMembership {
                node: node.to_string(),
            },
            self.ctx.timeouts.node_join,
        )
        .wait_until_stable(|| async move {
            is_node_in_cluster(client, node)
                .await
                .map(|joined| !joined)
        })
        .await?;
        Ok(())
    }

    /// Delayed unassigned shards first, then relocating and initializing ones
    async fn wait_for_shards_to_settle(&self) -> Result<()> {
        let client = self.client;

        info!("Wait for delayed unassigned shards to drop to 0");
        ConvergencePoller::new(
            WaitCondition::NoDelayedUnassignedShards,
            self.ctx.timeouts.delayed_unassigned,
        )
        .wait_until_stable(|| async move {
            client
                .health()
                .await
                .map(|health| health.has_delayed_unassigned_shards())
        })
        .await?;

        info!("Wait for RELOCATING and INITIALIZING shards to drop to 0");
        ConvergencePoller::new(
            WaitCondition::NoRelocatingOrInitializingShards,
            self.ctx.timeouts.relocation,
        )
        .wait_until_stable(|| async move {
            client
                .health()
                .await
                .map(|health| health.has_moving_shards())
        })
        .await?;
        Ok(())
    }

    async fn restore_after_failure(&mut self) {
        let outstanding = self.settings.outstanding().len();
        if outstanding == 0 {
            return;
        }

        warn!("Reverting {} temporary override(s)", outstanding);
        let failures = self.settings.revert_all().await;
        if !failures.is_empty() {
            warn!(
                "{} override(s) could not be reverted and are still in effect",
                failures.len()
            );
        }
    }
}
