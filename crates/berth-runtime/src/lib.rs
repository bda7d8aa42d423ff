//! ---
//! berth_section: "05-external-interfaces"
//! berth_subsection: "module"
//! berth_type: "source"
//! berth_scope: "code"
//! berth_description: "Container runtime control-plane capability."
//! berth_version: "v0.0.0-prealpha"
//! berth_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! The [`RuntimeClient`] capability consumed by the reconcilers, the value types
//! exchanged with it, and [`EngineClient`], an HTTP adapter for the Docker Engine API.

pub mod client;
pub mod engine;
pub mod error;
pub mod types;
mod wire;

pub use client::{RuntimeClient, SharedRuntime};
pub use engine::EngineClient;
pub use error::{ResourceKind, Result, RuntimeError};
pub use types::{
    AttachedNetwork, ContainerConfig, ContainerInspect, ContainerSummary, EndpointConfig,
    HostConfig, ListOptions, NetworkCreateOptions, NetworkInspect, PortBinding, PortMap,
    RemoveOptions, StopOptions,
};
