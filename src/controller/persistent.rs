//! Persistent cluster settings applied once per cluster lifetime
//!
//! Settings come from an operator supplied JSON file plus the optional
//! rebalance throttle. They are left in place; nothing here is reverted.

use std::path::Path;

use serde_json::{Map, Value};
use tracing::{info, instrument, warn};

use super::maintenance::{SettingTarget, SettingsLog, SettingsManager};
use crate::client::{ClusterControlClient, SettingScope};
use crate::config::HookConfig;
use crate::error::{Error, Result};

const PERSISTENT_WRAPPER: &str = "persistent";
const TRANSIENT_WRAPPER: &str = "transient";

/// Read a settings file into a flat key/value map
///
/// Top-level entries are settings. Entries nested under `persistent` are
/// lifted to the top level; a `transient` block is dropped because these
/// settings must survive a full cluster restart.
pub async fn load_settings_file(path: &Path) -> Result<Map<String, Value>> {
    let content = tokio::fs::read_to_string(path).await.map_err(|e| {
        Error::ConfigError(format!(
            "Failed to read settings file {}: {}",
            path.display(),
            e
        ))
    })?;

    let document: Value = serde_json::from_str(&content).map_err(|e| {
        Error::ConfigError(format!(
            "Invalid JSON in settings file {}: {}",
            path.display(),
            e
        ))
    })?;

    let Value::Object(entries) = document else {
        return Err(Error::ConfigError(format!(
            "Settings file {} must contain a JSON object",
            path.display()
        )));
    };

    let mut settings = Map::new();
    for (key, value) in entries {
        match key.as_str() {
            PERSISTENT_WRAPPER => match value {
                Value::Object(nested) => settings.extend(nested),
                other => {
                    return Err(Error::ConfigError(format!(
                        "\"persistent\" in {} must be an object, found {}",
                        path.display(),
                        other
                    )))
                }
            },
            TRANSIENT_WRAPPER => {
                warn!(
                    "Ignoring transient block in {}; only persistent settings are applied",
                    path.display()
                );
            }
            _ => {
                settings.insert(key, value);
            }
        }
    }
    Ok(settings)
}

/// Log the current cluster settings, then apply the persistent ones
#[instrument(skip(client, config))]
pub async fn apply_persistent_settings(
    client: &dyn ClusterControlClient,
    config: &HookConfig,
) -> Result<SettingsLog> {
    let current = client.cluster_settings().await?;
    info!("Current settings: {}", current);

    let mut settings = SettingsManager::new(client);

    let rebalance = config.rebalance_tunable();
    if let Some(value) = rebalance.configured_value() {
        info!("Setting {} = {}", rebalance.key, value);
        settings
            .hand_off(
                SettingTarget::cluster(rebalance.scope, rebalance.key),
                value,
                false,
            )
            .await?;
    }

    match &config.persistent_settings_file {
        Some(path) => {
            let entries = load_settings_file(path).await?;
            info!(
                "Applying {} persistent setting(s) from {}",
                entries.len(),
                path.display()
            );
            for (key, value) in entries {
                settings
                    .hand_off(
                        SettingTarget::cluster(SettingScope::Persistent, &key),
                        value,
                        false,
                    )
                    .await?;
            }
        }
        None => info!("No persistent settings file available - skipping"),
    }

    Ok(settings.into_log())
}
