//! # Conductor Server
//!
//! Standalone host for the ordered event conductor. Loads configuration,
//! connects the configured message source and registers the logging and HTTP
//! forwarding stages before handing control to
//! [`conductor_core::EventConductor`].

pub mod config;
pub mod source;
pub mod stages;

use std::sync::Arc;

use conductor_core::ReactionRegistry;
use tracing::info;

use crate::config::Config;
use crate::stages::{HttpForwardStage, LoggingStage};

/// Registry holding the stages described by `config`, in configuration order.
///
/// The logging stage, when enabled, always runs first. Disabled HTTP stages are
/// left out entirely.
pub fn build_registry(config: &Config) -> Result<ReactionRegistry, reqwest::Error> {
    let registry = ReactionRegistry::new();

    if config.log_notifications {
        registry.register(Arc::new(LoggingStage));
    }

    for stage in config.stages.iter().filter(|s| s.enabled) {
        let forward = HttpForwardStage::new(stage)?;
        info!(
            target: "conductor::registry",
            stage = %stage.name,
            url = %forward.url(),
            "registering HTTP forwarding stage"
        );
        registry.register(Arc::new(forward));
    }

    Ok(registry)
}
