//! Maintenance mode transitions for Elasticsearch data nodes
//!
//! Puts the cluster into the right state before a data node stops and
//! restores it after the node comes back.

pub mod controller;
pub mod flush;
pub mod poller;
pub mod settings;

pub use controller::{LifecyclePhase, ModeController, TransitionContext, TransitionReport};
pub use flush::{flush_synced_with_retry, FlushOutcome, FlushPolicy};
pub use poller::{Convergence, ConvergencePoller, WaitCondition, STABILITY_COUNT};
pub use settings::{SettingTarget, SettingsLog, SettingsManager};
