//! Wire types for the Elasticsearch cluster API

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifetime of a cluster setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettingScope {
    /// Cleared on a full cluster restart
    Transient,
    /// Survives a full cluster restart
    Persistent,
}

impl SettingScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettingScope::Transient => "transient",
            SettingScope::Persistent => "persistent",
        }
    }
}

impl fmt::Display for SettingScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Subset of `GET _cluster/health`
///
/// Shard counters are the only fields the hook acts on; the rest is carried
/// for log output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ClusterHealth {
    #[serde(default)]
    pub cluster_name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub number_of_nodes: u32,
    #[serde(default)]
    pub number_of_data_nodes: u32,
    #[serde(default)]
    pub relocating_shards: u32,
    #[serde(default)]
    pub initializing_shards: u32,
    #[serde(default)]
    pub unassigned_shards: u32,
    #[serde(default)]
    pub delayed_unassigned_shards: u32,
}

impl ClusterHealth {
    /// True while any shard is relocating or initializing
    pub fn has_moving_shards(&self) -> bool {
        self.relocating_shards != 0 || self.initializing_shards != 0
    }

    /// True while shards are held back by `index.unassigned.node_left.delayed_timeout`
    pub fn has_delayed_unassigned_shards(&self) -> bool {
        self.delayed_unassigned_shards != 0
    }
}

/// A cluster member as reported by `GET _nodes`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct NodesInfoResponse {
    #[serde(default)]
    pub nodes: BTreeMap<String, NodeInfo>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct NodeInfo {
    pub name: String,
}

impl NodesInfoResponse {
    pub fn into_nodes(self) -> Vec<Node> {
        self.nodes
            .into_iter()
            .map(|(id, info)| Node {
                id,
                name: info.name,
            })
            .collect()
    }
}

/// Response of a settings update, kept raw for diagnostics
#[derive(Debug, Clone, PartialEq)]
pub struct SettingsResponse {
    pub acknowledged: Option<bool>,
    pub raw: Value,
}

impl SettingsResponse {
    pub fn from_value(raw: Value) -> Self {
        let acknowledged = raw.get("acknowledged").and_then(Value::as_bool);
        Self { acknowledged, raw }
    }

    pub fn acknowledged() -> Self {
        Self::from_value(serde_json::json!({ "acknowledged": true }))
    }

    /// Absent and `false` are both treated as a rejection
    pub fn is_acknowledged(&self) -> bool {
        self.acknowledged == Some(true)
    }
}

/// Shard summary of a synced flush
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct FlushShards {
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub successful: u64,
    #[serde(default)]
    pub failed: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct FlushResponse {
    #[serde(rename = "_shards")]
    pub shards: FlushShards,
}
