//! ---
//! berth_section: "03-logging"
//! berth_subsection: "module"
//! berth_type: "source"
//! berth_scope: "code"
//! berth_description: "Structured logging adapters for reconciliation events."
//! berth_version: "v0.0.0-prealpha"
//! berth_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Uniform operation events emitted by the reconcilers.

use tracing::Level;
use tracing_subscriber::{fmt as subscriber_fmt, prelude::*, EnvFilter, Registry};

/// Initialize a baseline tracing subscriber suitable for tests and development.
pub fn init() {
    let _ = Registry::default()
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(subscriber_fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

/// Structured context attached to every reconciliation event.
#[derive(Debug, Default, Clone)]
pub struct OperationContext<'a> {
    /// Resource kind (`container`, `network`).
    pub kind: Option<&'a str>,
    /// Runtime identifier of the resource, when known.
    pub id: Option<&'a str>,
    /// Declared resource name, when known.
    pub name: Option<&'a str>,
    /// Operation verb (`create`, `read`, `update`, `delete`, `migrate`).
    pub operation: Option<&'a str>,
}

impl<'a> OperationContext<'a> {
    /// Create a context for the given resource kind and operation.
    pub fn new(kind: &'a str, operation: &'a str) -> Self {
        Self {
            kind: Some(kind),
            operation: Some(operation),
            ..Self::default()
        }
    }

    /// Attach a runtime identifier.
    pub fn with_id(mut self, id: &'a str) -> Self {
        self.id = Some(id);
        self
    }

    /// Attach a declared resource name.
    pub fn with_name(mut self, name: &'a str) -> Self {
        self.name = Some(name);
        self
    }
}

/// Outcome recorded for a reconciliation event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationOutcome {
    /// The operation converged.
    Success,
    /// The resource was already in the requested state.
    AlreadyConverged,
    /// The operation failed and an error was returned to the caller.
    Fault,
}

impl OperationOutcome {
    /// Stable label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationOutcome::Success => "success",
            OperationOutcome::AlreadyConverged => "converged",
            OperationOutcome::Fault => "fault",
        }
    }

    fn level(&self) -> Level {
        match self {
            OperationOutcome::Success | OperationOutcome::AlreadyConverged => Level::INFO,
            OperationOutcome::Fault => Level::WARN,
        }
    }
}

/// Emit a standardized reconciliation event.
pub fn log_operation(context: &OperationContext, message: &str, outcome: OperationOutcome) {
    match outcome.level() {
        Level::WARN => tracing::event!(
            Level::WARN,
            kind = context.kind.unwrap_or(""),
            id = context.id.unwrap_or(""),
            name = context.name.unwrap_or(""),
            operation = context.operation.unwrap_or(""),
            outcome = outcome.as_str(),
            message = %message
        ),
        _ => tracing::event!(
            Level::INFO,
            kind = context.kind.unwrap_or(""),
            id = context.id.unwrap_or(""),
            name = context.name.unwrap_or(""),
            operation = context.operation.unwrap_or(""),
            outcome = outcome.as_str(),
            message = %message
        ),
    }
}
