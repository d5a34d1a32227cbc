//! Cluster and index settings applied during a transition
//!
//! Temporary overrides go through [`SettingsManager::apply`] and are tracked
//! until reverted. Settings that must survive into the next lifecycle phase
//! (allocation disabled across a restart, a drained node's exclusion) go
//! through [`SettingsManager::hand_off`] and are never reverted by the
//! transition that set them.

use std::fmt;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::client::{ClusterControlClient, SettingScope, SettingsResponse};
use crate::config::Tunable;
use crate::error::{Error, Result};

pub const ALLOCATION_ENABLE: &str = "cluster.routing.allocation.enable";
pub const ALLOCATION_EXCLUDE_NAME: &str = "cluster.routing.allocation.exclude._name";
pub const DELAYED_TIMEOUT: &str = "index.unassigned.node_left.delayed_timeout";
pub const ALL_INDICES: &str = "_all";

/// Where a setting lives
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SettingTarget {
    Cluster { scope: SettingScope, key: String },
    Index { pattern: String, key: String },
}

impl SettingTarget {
    pub fn cluster(scope: SettingScope, key: &str) -> Self {
        SettingTarget::Cluster {
            scope,
            key: key.to_string(),
        }
    }

    pub fn index(pattern: &str, key: &str) -> Self {
        SettingTarget::Index {
            pattern: pattern.to_string(),
            key: key.to_string(),
        }
    }

    pub fn key(&self) -> &str {
        match self {
            SettingTarget::Cluster { key, .. } | SettingTarget::Index { key, .. } => key,
        }
    }
}

impl fmt::Display for SettingTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingTarget::Cluster { scope, key } => write!(f, "{scope} {key}"),
            SettingTarget::Index { pattern, key } => write!(f, "{key} on {pattern}"),
        }
    }
}

/// Record of every settings mutation made by one transition
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsLog {
    pub applied: Vec<SettingTarget>,
    pub reverted: Vec<SettingTarget>,
    pub handed_off: Vec<SettingTarget>,
    pub released: Vec<SettingTarget>,
}

pub struct SettingsManager<'a> {
    client: &'a dyn ClusterControlClient,
    /// Temporary overrides not reverted yet, in application order
    outstanding: Vec<SettingTarget>,
    log: SettingsLog,
}

impl<'a> SettingsManager<'a> {
    pub fn new(client: &'a dyn ClusterControlClient) -> Self {
        Self {
            client,
            outstanding: Vec::new(),
            log: SettingsLog::default(),
        }
    }

    /// Temporary overrides still waiting to be reverted
    pub fn outstanding(&self) -> &[SettingTarget] {
        &self.outstanding
    }

    pub fn log(&self) -> &SettingsLog {
        &self.log
    }

    pub fn into_log(self) -> SettingsLog {
        self.log
    }

    pub async fn apply(&mut self, scope: SettingScope, key: &str, value: Value) -> Result<()> {
        let target = SettingTarget::cluster(scope, key);
        self.put(&target, Some(&value), false).await?;
        self.track(target);
        Ok(())
    }

    pub async fn revert(&mut self, scope: SettingScope, key: &str) -> Result<()> {
        let target = SettingTarget::cluster(scope, key);
        self.put(&target, None, false).await?;
        self.untrack(target);
        Ok(())
    }

    /// Override a setting on every index matching `pattern`
    ///
    /// With `preserve_existing` the value only lands on indices that do not
    /// set it explicitly, so overrides from index templates survive.
    pub async fn apply_index_setting(
        &mut self,
        pattern: &str,
        key: &str,
        value: Value,
        preserve_existing: bool,
    ) -> Result<()> {
        let target = SettingTarget::index(pattern, key);
        self.put(&target, Some(&value), preserve_existing).await?;
        self.track(target);
        Ok(())
    }

    pub async fn revert_index_setting(&mut self, pattern: &str, key: &str) -> Result<()> {
        let target = SettingTarget::index(pattern, key);
        self.put(&target, None, false).await?;
        self.untrack(target);
        Ok(())
    }

    /// Set a value meant to outlive this transition
    pub async fn hand_off(
        &mut self,
        target: SettingTarget,
        value: Value,
        preserve_existing: bool,
    ) -> Result<()> {
        self.put(&target, Some(&value), preserve_existing).await?;
        self.log.handed_off.push(target);
        Ok(())
    }

    /// Clear a value handed off by the previous lifecycle phase
    pub async fn release(&mut self, target: SettingTarget) -> Result<()> {
        self.put(&target, None, false).await?;
        self.log.released.push(target);
        Ok(())
    }

    /// Apply every configured tunable, skipping the rest
    pub async fn apply_tunables(&mut self, tunables: &[Tunable]) -> Result<usize> {
        let mut applied = 0;
        for tunable in tunables {
            match tunable.configured_value() {
                Some(value) => {
                    info!("Setting {} = {}", tunable.key, value);
                    self.apply(tunable.scope, tunable.key, value).await?;
                    applied += 1;
                }
                None => debug!("{} not configured, leaving {} alone", tunable.name, tunable.key),
            }
        }
        Ok(applied)
    }

    /// Revert exactly the tunables [`apply_tunables`](Self::apply_tunables) applied
    pub async fn revert_tunables(&mut self, tunables: &[Tunable]) -> Result<usize> {
        let mut reverted = 0;
        for tunable in tunables.iter().filter(|t| t.is_configured()) {
            info!("Resetting {}", tunable.key);
            self.revert(tunable.scope, tunable.key).await?;
            reverted += 1;
        }
        Ok(reverted)
    }

    /// Best-effort revert of every outstanding override, newest first
    ///
    /// Failures are logged and returned; the remaining overrides are still
    /// attempted.
    pub async fn revert_all(&mut self) -> Vec<Error> {
        let mut failures = Vec::new();
        let pending: Vec<_> = self.outstanding.iter().rev().cloned().collect();

        for target in pending {
            let result = match &target {
                SettingTarget::Cluster { scope, key } => self.revert(*scope, key).await,
                SettingTarget::Index { pattern, key } => {
                    self.revert_index_setting(pattern, key).await
                }
            };
            if let Err(e) = result {
                warn!("Failed to revert {}: {}", target, e);
                failures.push(e);
            }
        }
        failures
    }

    async fn put(
        &self,
        target: &SettingTarget,
        value: Option<&Value>,
        preserve_existing: bool,
    ) -> Result<()> {
        let response = match target {
            SettingTarget::Cluster { scope, key } => {
                self.client.put_cluster_setting(*scope, key, value).await?
            }
            SettingTarget::Index { pattern, key } => {
                self.client
                    .put_index_setting(pattern, key, value, preserve_existing)
                    .await?
            }
        };
        check_acknowledged(target, value, response)
    }

    fn track(&mut self, target: SettingTarget) {
        if !self.outstanding.contains(&target) {
            self.outstanding.push(target.clone());
        }
        self.log.applied.push(target);
    }

    fn untrack(&mut self, target: SettingTarget) {
        let before = self.outstanding.len();
        self.outstanding.retain(|t| *t != target);
        if self.outstanding.len() == before {
            debug!("{} was not overridden by this transition", target);
        }
        self.log.reverted.push(target);
    }
}

fn check_acknowledged(
    target: &SettingTarget,
    value: Option<&Value>,
    response: SettingsResponse,
) -> Result<()> {
    if response.is_acknowledged() {
        return Ok(());
    }

    let value = value.map_or_else(|| "null".to_string(), Value::to_string);
    Err(Error::SettingsRejected {
        target: format!("{target} to {value}"),
        raw: response.raw.to_string(),
    })
}
