//! Dispatch of a lifecycle action to the matching controller

use tracing::info;

use super::maintenance::{
    LifecyclePhase, ModeController, SettingsLog, TransitionContext, TransitionReport,
};
use super::persistent::apply_persistent_settings;
use crate::client::ClusterControlClient;
use crate::config::{HookAction, HookConfig};
use crate::error::{Error, Result};

/// What a completed hook did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookOutcome {
    Transition(TransitionReport),
    PersistentSettings(SettingsLog),
}

impl HookOutcome {
    pub fn summary(&self) -> String {
        match self {
            HookOutcome::Transition(report) => report.summary(),
            HookOutcome::PersistentSettings(log) => {
                format!("{} persistent setting(s) applied", log.handed_off.len())
            }
        }
    }
}

pub async fn run_hook(
    action: HookAction,
    config: &HookConfig,
    client: &dyn ClusterControlClient,
) -> Result<HookOutcome> {
    info!("Running {} hook against {}", action, config.endpoint);

    let phase = match action {
        HookAction::PostStartData => LifecyclePhase::PostStart,
        HookAction::PreStopData => LifecyclePhase::PreStop,
        HookAction::PostStartMaster | HookAction::PreStopMaster => {
            return Err(Error::Unimplemented(format!("{action} hook")));
        }
        HookAction::PersistentSettings => {
            let log = apply_persistent_settings(client, config).await?;
            return Ok(HookOutcome::PersistentSettings(log));
        }
    };

    let ctx = TransitionContext::new(config, phase)?;
    let report = ModeController::new(client, ctx).run().await?;
    Ok(HookOutcome::Transition(report))
}
