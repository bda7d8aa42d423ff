//! ---
//! berth_section: "01-core-functionality"
//! berth_subsection: "module"
//! berth_type: "source"
//! berth_scope: "code"
//! berth_description: "Shared primitives and utilities for the reconciler runtime."
//! berth_version: "v0.0.0-prealpha"
//! berth_owner: "tbd"
//! ---
//! Shared primitives for the Berth workspace.
//! This crate exposes configuration loading and tracing initialisation
//! consumed by the reconciler core and the operator CLI.

pub mod config;
pub mod logging;

pub use config::{
    AppConfig, LoadedAppConfig, LoggingConfig, ReconcileConfig, RuntimeConfig,
    FALLBACK_DOCKER_HOST, MIGRATION_SUFFIX_RANGE,
};
pub use logging::{init_tracing, LogFormat};
