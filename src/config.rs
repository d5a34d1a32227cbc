//! Hook configuration
//!
//! Everything is read once at process start from command-line flags with
//! environment fallbacks (the pod spec sets the environment), then passed by
//! reference into the controller.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde_json::Value;
use tracing::warn;

use crate::client::SettingScope;
use crate::error::{Error, Result};

/// Lifecycle action requested by the pod spec
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum HookAction {
    PostStartData,
    PreStopData,
    PostStartMaster,
    PreStopMaster,
    PersistentSettings,
}

impl HookAction {
    /// Data node actions are the only ones driven by the maintenance mode
    pub fn is_data_node(&self) -> bool {
        matches!(self, HookAction::PostStartData | HookAction::PreStopData)
    }
}

impl fmt::Display for HookAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HookAction::PostStartData => "post-start-data",
            HookAction::PreStopData => "pre-stop-data",
            HookAction::PostStartMaster => "post-start-master",
            HookAction::PreStopMaster => "pre-stop-master",
            HookAction::PersistentSettings => "persistent-settings",
        };
        f.write_str(name)
    }
}

/// Strategy used to keep data available while a data node restarts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MaintenanceMode {
    /// Disable shard allocation cluster-wide for the restart
    Allocation,
    /// Rely on delayed allocation of shards from the departed node
    DelayedAllocation,
    /// Move every shard off the node before it stops
    Drain,
    /// The pod is stopped without any coordination
    #[default]
    None,
}

impl FromStr for MaintenanceMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| !matches!(c, '-' | '_'))
            .collect::<String>()
            .to_ascii_lowercase();

        match normalized.as_str() {
            "allocation" => Ok(MaintenanceMode::Allocation),
            "delayedallocation" => Ok(MaintenanceMode::DelayedAllocation),
            "drain" => Ok(MaintenanceMode::Drain),
            "" | "none" => Ok(MaintenanceMode::None),
            _ => Err(Error::ConfigError(format!(
                "Unsupported maintenance mode {s:?} (expected Allocation, DelayedAllocation, Drain or None)"
            ))),
        }
    }
}

impl fmt::Display for MaintenanceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MaintenanceMode::Allocation => "Allocation",
            MaintenanceMode::DelayedAllocation => "DelayedAllocation",
            MaintenanceMode::Drain => "Drain",
            MaintenanceMode::None => "None",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Command-line flags and their environment fallbacks
#[derive(Parser, Debug, Clone)]
pub struct HookArgs {
    /// Elasticsearch endpoint, e.g. `elasticsearch-discovery:9200`
    #[arg(long, env = "DISCOVERY_SERVICE")]
    pub discovery_service: String,

    /// Name of the local Elasticsearch node (defaults to the pod hostname)
    #[arg(long, env = "NODE_NAME")]
    pub node_name: Option<String>,

    /// Allocation, DelayedAllocation, Drain or None
    #[arg(long, env = "MAINTENANCE_MODE")]
    pub maintenance_mode: Option<String>,

    /// Transient `indices.recovery.max_bytes_per_sec` during recoveries
    #[arg(long, env = "MAX_BYTES")]
    pub max_bytes: Option<String>,

    /// Transient `cluster.routing.allocation.node_concurrent_incoming_recoveries`
    #[arg(long, env = "NODE_CONCURRENT_INCOMING_RECOVERIES")]
    pub node_concurrent_incoming_recoveries: Option<String>,

    /// Transient `cluster.routing.allocation.node_concurrent_outgoing_recoveries`
    #[arg(long, env = "NODE_CONCURRENT_OUTGOING_RECOVERIES")]
    pub node_concurrent_outgoing_recoveries: Option<String>,

    /// Transient `cluster.routing.allocation.node_initial_primaries_recoveries`
    #[arg(long, env = "NODE_INITIAL_PRIMARIES_RECOVERIES")]
    pub node_initial_primaries_recoveries: Option<String>,

    /// Persistent `cluster.routing.allocation.cluster_concurrent_rebalance`
    #[arg(long, env = "CLUSTER_CONCURRENT_REBALANCE")]
    pub cluster_concurrent_rebalance: Option<String>,

    /// Per-index `index.unassigned.node_left.delayed_timeout` during a restart, e.g. `5m`
    #[arg(long, env = "DELAYED_UNASSIGNED_TIMEOUT")]
    pub delayed_unassigned_timeout: Option<String>,

    /// JSON file with persistent cluster settings
    #[arg(long, env = "PERSISTENT_SETTINGS_FILE_PATH")]
    pub persistent_settings_file_path: Option<PathBuf>,

    /// Misspelled variable name read by older pod specs
    #[arg(long, env = "PERSITENT_SETTINGS_FILE_PATH", hide = true)]
    pub persitent_settings_file_path: Option<PathBuf>,

    #[arg(long, env = "CONNECT_TIMEOUT_SECS", default_value_t = 30)]
    pub connect_timeout_secs: u64,

    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    pub request_timeout_secs: u64,

    #[arg(long, env = "NODE_JOIN_TIMEOUT_SECS", default_value_t = 180)]
    pub node_join_timeout_secs: u64,

    #[arg(long, env = "DELAYED_UNASSIGNED_WAIT_TIMEOUT_SECS", default_value_t = 1800)]
    pub delayed_unassigned_wait_timeout_secs: u64,

    #[arg(long, env = "RELOCATION_TIMEOUT_SECS", default_value_t = 1800)]
    pub relocation_timeout_secs: u64,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

/// Deadlines for the blocking parts of a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub connect: Duration,
    pub request: Duration,
    pub node_join: Duration,
    pub delayed_unassigned: Duration,
    pub relocation: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(30),
            request: Duration::from_secs(30),
            node_join: Duration::from_secs(180),
            delayed_unassigned: Duration::from_secs(1800),
            relocation: Duration::from_secs(1800),
        }
    }
}

/// A cluster setting the hook overrides only when the operator configured it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tunable {
    pub name: &'static str,
    pub scope: SettingScope,
    pub key: &'static str,
    pub value: Option<String>,
}

impl Tunable {
    /// Unset and blank values both mean "leave the cluster default alone"
    pub fn is_configured(&self) -> bool {
        self.configured_value().is_some()
    }

    pub fn configured_value(&self) -> Option<Value> {
        self.value
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| Value::String(v.to_string()))
    }
}

/// Recovery throttles applied while shards move after a restart
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoverySettings {
    pub max_bytes_per_sec: Option<String>,
    pub node_concurrent_incoming_recoveries: Option<String>,
    pub node_concurrent_outgoing_recoveries: Option<String>,
    pub node_initial_primaries_recoveries: Option<String>,
}

impl RecoverySettings {
    /// Table of every recovery tunable, configured or not
    pub fn tunables(&self) -> Vec<Tunable> {
        let table = [
            (
                "max_bytes",
                "indices.recovery.max_bytes_per_sec",
                &self.max_bytes_per_sec,
            ),
            (
                "node_concurrent_incoming_recoveries",
                "cluster.routing.allocation.node_concurrent_incoming_recoveries",
                &self.node_concurrent_incoming_recoveries,
            ),
            (
                "node_concurrent_outgoing_recoveries",
                "cluster.routing.allocation.node_concurrent_outgoing_recoveries",
                &self.node_concurrent_outgoing_recoveries,
            ),
            (
                "node_initial_primaries_recoveries",
                "cluster.routing.allocation.node_initial_primaries_recoveries",
                &self.node_initial_primaries_recoveries,
            ),
        ];

        table
            .into_iter()
            .map(|(name, key, value)| Tunable {
                name,
                scope: SettingScope::Transient,
                key,
                value: value.clone(),
            })
            .collect()
    }
}

/// Resolved configuration for one hook invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookConfig {
    pub endpoint: String,
    pub node_name: Option<String>,
    pub mode: MaintenanceMode,
    pub recovery: RecoverySettings,
    pub cluster_concurrent_rebalance: Option<String>,
    pub delayed_unassigned_timeout: Option<String>,
    pub persistent_settings_file: Option<PathBuf>,
    pub timeouts: Timeouts,
    pub log_format: LogFormat,
}

impl HookConfig {
    /// Resolve `args` for `action`
    ///
    /// An unknown maintenance mode only fails the data node actions; the
    /// other actions never read it.
    pub fn from_args(args: HookArgs, action: HookAction) -> Result<Self> {
        let mode: MaintenanceMode = match args.maintenance_mode.as_deref() {
            Some(raw) if action.is_data_node() => raw.parse()?,
            Some(raw) => raw.parse().unwrap_or_else(|e| {
                warn!("Ignoring maintenance mode for {}: {}", action, e);
                MaintenanceMode::None
            }),
            None => MaintenanceMode::None,
        };

        let persistent_settings_file = match (
            args.persistent_settings_file_path,
            args.persitent_settings_file_path,
        ) {
            (Some(path), _) => Some(path),
            (None, Some(legacy)) => {
                warn!(
                    "PERSITENT_SETTINGS_FILE_PATH is deprecated, use PERSISTENT_SETTINGS_FILE_PATH"
                );
                Some(legacy)
            }
            (None, None) => None,
        };

        let node_name = non_empty(args.node_name).or_else(local_hostname);

        Ok(Self {
            endpoint: args.discovery_service,
            node_name,
            mode,
            recovery: RecoverySettings {
                max_bytes_per_sec: args.max_bytes,
                node_concurrent_incoming_recoveries: args.node_concurrent_incoming_recoveries,
                node_concurrent_outgoing_recoveries: args.node_concurrent_outgoing_recoveries,
                node_initial_primaries_recoveries: args.node_initial_primaries_recoveries,
            },
            cluster_concurrent_rebalance: args.cluster_concurrent_rebalance,
            delayed_unassigned_timeout: non_empty(args.delayed_unassigned_timeout),
            persistent_settings_file,
            timeouts: Timeouts {
                connect: Duration::from_secs(args.connect_timeout_secs),
                request: Duration::from_secs(args.request_timeout_secs),
                node_join: Duration::from_secs(args.node_join_timeout_secs),
                delayed_unassigned: Duration::from_secs(args.delayed_unassigned_wait_timeout_secs),
                relocation: Duration::from_secs(args.relocation_timeout_secs),
            },
            log_format: args.log_format,
        })
    }

    /// Minimal configuration for `endpoint`; every optional setting unset
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            node_name: None,
            mode: MaintenanceMode::None,
            recovery: RecoverySettings::default(),
            cluster_concurrent_rebalance: None,
            delayed_unassigned_timeout: None,
            persistent_settings_file: None,
            timeouts: Timeouts::default(),
            log_format: LogFormat::Text,
        }
    }

    pub fn require_node_name(&self) -> Result<&str> {
        self.node_name.as_deref().ok_or_else(|| {
            Error::ConfigError("NODE_NAME is not set and the hostname is unknown".to_string())
        })
    }

    /// Persistent rebalance throttle applied by the persistent-settings action
    pub fn rebalance_tunable(&self) -> Tunable {
        Tunable {
            name: "cluster_concurrent_rebalance",
            scope: SettingScope::Persistent,
            key: "cluster.routing.allocation.cluster_concurrent_rebalance",
            value: self.cluster_concurrent_rebalance.clone(),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn local_hostname() -> Option<String> {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .or_else(|| hostname::get().ok().and_then(|h| h.into_string().ok()))
}
