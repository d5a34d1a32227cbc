//! Lifecycle hook controllers
//!
//! `maintenance` drives data node transitions, `persistent` applies
//! cluster-wide persistent settings, `hook` maps an action onto either.

mod hook;
pub mod maintenance;
pub mod persistent;

pub use hook::{run_hook, HookOutcome};
pub use maintenance::{LifecyclePhase, ModeController, TransitionContext, TransitionReport};
pub use persistent::{apply_persistent_settings, load_settings_file};
