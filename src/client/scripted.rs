//! Scripted in-memory cluster for driving transitions in tests

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::types::{ClusterHealth, FlushResponse, FlushShards, Node, SettingScope, SettingsResponse};
use super::ClusterControlClient;
use crate::error::{Error, Result};

/// A request the controller issued against the cluster
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Call {
    Health,
    Nodes,
    ClusterSetting {
        scope: SettingScope,
        key: String,
        value: Option<Value>,
    },
    IndexSetting {
        pattern: String,
        key: String,
        value: Option<Value>,
        preserve_existing: bool,
    },
    FlushSynced {
        pattern: String,
    },
    ClusterSettings,
}

/// Scripted answer to one synced flush
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FlushReply {
    /// Shard summary with this many failed copies out of ten
    FailedShards(u64),
    /// Error response without a shard summary
    Status(u16),
}

#[derive(Default)]
struct Script {
    health: VecDeque<ClusterHealth>,
    last_health: ClusterHealth,
    rosters: VecDeque<Vec<String>>,
    last_roster: Vec<String>,
    flush_replies: VecDeque<FlushReply>,
    rejected_keys: HashSet<String>,
    failing_keys: HashSet<String>,
    settings: Value,
    calls: Vec<Call>,
}

/// Replays scripted health and roster observations, repeating the last one
/// once a script runs out, and records every call it receives.
#[derive(Default)]
pub(crate) struct ScriptedCluster {
    script: Mutex<Script>,
}

pub(crate) fn health(relocating: u32, initializing: u32, delayed_unassigned: u32) -> ClusterHealth {
    ClusterHealth {
        cluster_name: "scripted".to_string(),
        status: "yellow".to_string(),
        relocating_shards: relocating,
        initializing_shards: initializing,
        delayed_unassigned_shards: delayed_unassigned,
        ..Default::default()
    }
}

impl ScriptedCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_health(self, snapshots: impl IntoIterator<Item = ClusterHealth>) -> Self {
        self.script.lock().unwrap().health.extend(snapshots);
        self
    }

    pub fn with_rosters<I, R, S>(self, rosters: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.script
            .lock()
            .unwrap()
            .rosters
            .extend(rosters.into_iter().map(|r| r.into_iter().map(Into::into).collect()));
        self
    }

    pub fn with_flush_failures(self, failures: impl IntoIterator<Item = u64>) -> Self {
        self.with_flush_replies(failures.into_iter().map(FlushReply::FailedShards))
    }

    pub fn with_flush_replies(self, replies: impl IntoIterator<Item = FlushReply>) -> Self {
        self.script.lock().unwrap().flush_replies.extend(replies);
        self
    }

    /// Answer updates of `key` with `acknowledged: false`
    pub fn rejecting(self, key: &str) -> Self {
        self.script
            .lock()
            .unwrap()
            .rejected_keys
            .insert(key.to_string());
        self
    }

    /// Fail updates of `key` at the transport level
    pub fn failing(self, key: &str) -> Self {
        self.script
            .lock()
            .unwrap()
            .failing_keys
            .insert(key.to_string());
        self
    }

    pub fn with_settings(self, settings: Value) -> Self {
        self.script.lock().unwrap().settings = settings;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.script.lock().unwrap().calls.clone()
    }

    pub fn count(&self, wanted: &Call) -> usize {
        self.calls().iter().filter(|c| *c == wanted).count()
    }

    pub fn health_polls(&self) -> usize {
        self.count(&Call::Health)
    }

    pub fn node_polls(&self) -> usize {
        self.count(&Call::Nodes)
    }

    /// Cluster settings given a value, in call order
    pub fn set_keys(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::ClusterSetting {
                    key,
                    value: Some(_),
                    ..
                } => Some(key),
                _ => None,
            })
            .collect()
    }

    /// Cluster settings cleared back to their default, in call order
    pub fn unset_keys(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::ClusterSetting {
                    key, value: None, ..
                } => Some(key),
                _ => None,
            })
            .collect()
    }

    /// Calls that mutate the cluster
    pub fn mutations(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| !matches!(c, Call::Health | Call::Nodes | Call::ClusterSettings))
            .collect()
    }

    fn settings_response(script: &Script, key: &str) -> Result<SettingsResponse> {
        if script.failing_keys.contains(key) {
            return Err(Error::IoError(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                format!("scripted transport failure for {key}"),
            )));
        }
        if script.rejected_keys.contains(key) {
            return Ok(SettingsResponse::from_value(json!({
                "acknowledged": false,
                "reason": format!("scripted rejection of {key}")
            })));
        }
        Ok(SettingsResponse::acknowledged())
    }
}

#[async_trait]
impl ClusterControlClient for ScriptedCluster {
    async fn health(&self) -> Result<ClusterHealth> {
        let mut script = self.script.lock().unwrap();
        script.calls.push(Call::Health);
        if let Some(next) = script.health.pop_front() {
            script.last_health = next;
        }
        Ok(script.last_health.clone())
    }

    async fn nodes(&self) -> Result<Vec<Node>> {
        let mut script = self.script.lock().unwrap();
        script.calls.push(Call::Nodes);
        if let Some(next) = script.rosters.pop_front() {
            script.last_roster = next;
        }
        Ok(script
            .last_roster
            .iter()
            .enumerate()
            .map(|(i, name)| Node {
                id: format!("node-{i}"),
                name: name.clone(),
            })
            .collect())
    }

    async fn put_cluster_setting(
        &self,
        scope: SettingScope,
        key: &str,
        value: Option<&Value>,
    ) -> Result<SettingsResponse> {
        let mut script = self.script.lock().unwrap();
        script.calls.push(Call::ClusterSetting {
            scope,
            key: key.to_string(),
            value: value.cloned(),
        });
        Self::settings_response(&script, key)
    }

    async fn put_index_setting(
        &self,
        index_pattern: &str,
        key: &str,
        value: Option<&Value>,
        preserve_existing: bool,
    ) -> Result<SettingsResponse> {
        let mut script = self.script.lock().unwrap();
        script.calls.push(Call::IndexSetting {
            pattern: index_pattern.to_string(),
            key: key.to_string(),
            value: value.cloned(),
            preserve_existing,
        });
        Self::settings_response(&script, key)
    }

    async fn flush_synced(&self, index_pattern: &str) -> Result<FlushResponse> {
        let mut script = self.script.lock().unwrap();
        script.calls.push(Call::FlushSynced {
            pattern: index_pattern.to_string(),
        });
        let failed = match script
            .flush_replies
            .pop_front()
            .unwrap_or(FlushReply::FailedShards(0))
        {
            FlushReply::FailedShards(failed) => failed,
            FlushReply::Status(status) => {
                return Err(Error::FlushFailed {
                    target: format!("{index_pattern}/_flush/synced"),
                    status,
                    raw: format!(r#"{{"status":{status}}}"#),
                })
            }
        };
        Ok(FlushResponse {
            shards: FlushShards {
                total: 10,
                successful: 10 - failed.min(10),
                failed,
            },
        })
    }

    async fn cluster_settings(&self) -> Result<Value> {
        let mut script = self.script.lock().unwrap();
        script.calls.push(Call::ClusterSettings);
        Ok(script.settings.clone())
    }
}
