//! The error taxonomy from `spec.md` §7.
//!
//! None of these are meant to terminate the monitoring loop on their own;
//! the orchestrator is responsible for catching, logging, and continuing.
//! `thiserror` is used here the way `metrics-exporter-prometheus` and
//! `metrics-exporter-dogstatsd` use it for their public error enums, in
//! place of the hand-rolled `Display`/`Error` impls the older
//! `metrics-runtime::builder` module wrote out by hand.
use thiserror::Error;

/// Malformed or contradictory configuration.
///
/// Non-fatal at `init()` (the orchestrator degrades to `configured` and
/// logs a warning); fatal only to the `start()` call that surfaced it, which
/// also degrades back to `configured`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("configuration error: {0}")]
pub struct ConfigError(pub String);

/// Errors raised by a [`Registry`](crate::registry::Registry).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// A metric with this name was already registered in this registry.
    #[error("a metric named `{0}` is already registered in this registry")]
    DuplicateName(String),
}

/// Errors raised while binding a declaratively-built [`Source`](crate::source::Source)
/// via the source builder.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SourceBuilderError {
    /// The builder never had a metric declared against it.
    #[error("source builder produced no metrics: declare at least one counter, gauge, or stat")]
    NoMetricAnnotation,

    /// An existing source implementation was supplied along with declared
    /// metrics, but no registry was given to deposit them into.
    #[error(
        "source implements `Source` and has declared metrics, but no registry was supplied to bind them into"
    )]
    HybridWithoutRegistry,
}

/// Raised by a sink's `put_metrics`/`flush`; handled entirely by the sink
/// adapter's retry state machine and never propagates past it.
#[derive(Debug, Error)]
#[error("sink delivery failed: {0}")]
pub struct DeliveryError(pub String);

/// Any error from a `Source::get_metrics` call; caught by the source
/// adapter, which yields zero records for that source on this pass.
#[derive(Debug, Error)]
#[error("source `{source}` failed to snapshot its metrics: {reason}")]
pub struct SourceSnapshotError {
    /// The offending source's registered name.
    pub source: String,
    /// A human-readable description of the failure.
    pub reason: String,
}

/// Any error from a lifecycle [`Callback`](crate::callback::Callback); suppressed and logged.
#[derive(Debug, Error)]
#[error("lifecycle callback failed: {0}")]
pub struct CallbackError(pub String);
