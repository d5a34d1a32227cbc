//! Cluster control plane client
//!
//! The maintenance controller only talks to the cluster through
//! [`ClusterControlClient`], so transitions can be driven against a real
//! Elasticsearch endpoint or a scripted cluster in tests.

pub mod elasticsearch;
#[cfg(test)]
pub(crate) mod scripted;
pub mod types;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

pub use elasticsearch::ElasticsearchClient;
pub use types::{ClusterHealth, FlushResponse, Node, SettingScope, SettingsResponse};

/// Operations the lifecycle hook needs from the cluster
#[async_trait]
pub trait ClusterControlClient: Send + Sync {
    /// Fresh cluster health; never cached between calls
    async fn health(&self) -> Result<ClusterHealth>;

    async fn nodes(&self) -> Result<Vec<Node>>;

    /// Update a cluster setting. `None` clears it back to the default.
    async fn put_cluster_setting(
        &self,
        scope: SettingScope,
        key: &str,
        value: Option<&Value>,
    ) -> Result<SettingsResponse>;

    /// Update a setting on every index matching `index_pattern`
    async fn put_index_setting(
        &self,
        index_pattern: &str,
        key: &str,
        value: Option<&Value>,
        preserve_existing: bool,
    ) -> Result<SettingsResponse>;

    async fn flush_synced(&self, index_pattern: &str) -> Result<FlushResponse>;

    async fn cluster_settings(&self) -> Result<Value>;
}

/// True iff a node named `name` appears in the current node listing
pub async fn is_node_in_cluster(client: &dyn ClusterControlClient, name: &str) -> Result<bool> {
    let nodes = client.nodes().await?;
    Ok(nodes.iter().any(|n| n.name == name))
}
