//! es-maintenance-hook: lifecycle hooks for Elasticsearch pods on Kubernetes
//!
//! Runs as a container `preStop`/`postStart` hook. Before a data node stops
//! it prepares the cluster according to the configured maintenance mode;
//! after the node is back it waits for the node to rejoin, lets shards
//! recover and restores the cluster settings.

pub mod client;
pub mod config;
pub mod controller;
pub mod error;

pub use crate::error::{Error, Result};
