//! Error types for the maintenance hook

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// The cluster never reported any health status within the connect window
    #[error("Elasticsearch connection timed out after {timeout:?} ({endpoint})")]
    ConnectTimeout { endpoint: String, timeout: Duration },

    /// A settings mutation was not acknowledged by the master node
    #[error("Failed to set {target}: response was not acknowledged\n{raw}")]
    SettingsRejected { target: String, raw: String },

    /// The local node did not show up in the node listing in time
    #[error("Node {node} not in cluster after {elapsed:?} (timeout {timeout:?})")]
    MembershipTimeout {
        node: String,
        elapsed: Duration,
        timeout: Duration,
    },

    /// A shard-state condition never stabilised in time
    #[error("Timed out waiting for {condition} after {elapsed:?} (timeout {timeout:?})")]
    ConvergenceTimeout {
        condition: String,
        elapsed: Duration,
        timeout: Duration,
    },

    /// A synced flush failed outright instead of reporting per-shard results
    #[error("Synced flush {target} failed with HTTP {status}\n{raw}")]
    FlushFailed {
        target: String,
        status: u16,
        raw: String,
    },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Not implemented yet: {0}")]
    Unimplemented(String),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl Error {
    /// Transport failures may succeed when reissued; everything else is terminal
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::HttpError(_) | Error::ConnectTimeout { .. } => true,
            // Cluster blocks and unavailable masters clear up; a 4xx will not
            Error::FlushFailed { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Timeout reported by a deadline-driven wait, if this is one
    pub fn timeout(&self) -> Option<Duration> {
        match self {
            Error::ConnectTimeout { timeout, .. }
            | Error::MembershipTimeout { timeout, .. }
            | Error::ConvergenceTimeout { timeout, .. } => Some(*timeout),
            _ => None,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
