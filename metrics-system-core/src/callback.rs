//! The lifecycle callback contract from `spec.md` §3/§4.7.
//!
//! `spec.md` §9 flags the teacher's original dynamic-proxy-wrapped callback
//! as needing re-architecture: in Rust, that proxy is just a trait plus a
//! thin wrapper that swallows errors (see `metrics-system::callback` for the
//! wrapper); this module only carries the trait itself.

/// Pre/post start and pre/post stop lifecycle hooks.
///
/// Implementations are invoked synchronously, in registration order.
/// Exceptions (`Err` returns) are logged and swallowed by the caller --
/// see `metrics-system::callback::CallbackGuard` -- a misbehaving callback
/// must never break orchestrator lifecycle.
pub trait Callback: Send + Sync {
    /// Invoked just before the orchestrator's sources/sinks are started.
    fn pre_start(&self) -> Result<(), String> {
        Ok(())
    }

    /// Invoked just after the orchestrator's sources/sinks are started.
    fn post_start(&self) -> Result<(), String> {
        Ok(())
    }

    /// Invoked just before the orchestrator's sources/sinks are stopped.
    fn pre_stop(&self) -> Result<(), String> {
        Ok(())
    }

    /// Invoked just after the orchestrator's sources/sinks are stopped.
    fn post_stop(&self) -> Result<(), String> {
        Ok(())
    }
}
