//! The lifecycle callback wrapper (`spec.md` §9).
//!
//! The teacher's original design routed callbacks through a dynamic proxy
//! that logged and swallowed exceptions on its caller's behalf; Rust has no
//! proxies, so `CallbackGuard` is the plain wrapper that does the same job:
//! invoke the wrapped `Callback`, and turn any `Err` into a logged warning
//! rather than letting it propagate into orchestrator lifecycle code.
use metrics_system_core::callback::Callback;
use std::sync::Arc;

/// Wraps a `Callback`, never letting its errors escape.
pub(crate) struct CallbackGuard {
    name: String,
    inner: Arc<dyn Callback>,
}

impl CallbackGuard {
    pub(crate) fn new(name: impl Into<String>, inner: Arc<dyn Callback>) -> Self {
        Self {
            name: name.into(),
            inner,
        }
    }

    pub(crate) fn pre_start(&self) {
        self.run("pre_start", || self.inner.pre_start());
    }

    pub(crate) fn post_start(&self) {
        self.run("post_start", || self.inner.post_start());
    }

    pub(crate) fn pre_stop(&self) {
        self.run("pre_stop", || self.inner.pre_stop());
    }

    pub(crate) fn post_stop(&self) {
        self.run("post_stop", || self.inner.post_stop());
    }

    fn run(&self, phase: &str, f: impl FnOnce() -> Result<(), String>) {
        if let Err(reason) = f() {
            log::warn!(
                "lifecycle callback `{}` failed during `{}`: {}",
                self.name,
                phase,
                reason
            );
        }
    }
}
