//! The process-wide registry of orchestrators, keyed by prefix
//! (`spec.md` §9).
use crate::orchestrator::Orchestrator;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

struct Registered {
    orchestrator: Arc<Orchestrator>,
    unique_counters: HashMap<String, AtomicU64>,
}

static SYSTEMS: Lazy<Mutex<HashMap<String, Registered>>> = Lazy::new(|| Mutex::new(HashMap::new()));

/// Process-wide lookup table of one [`Orchestrator`] per metrics prefix.
///
/// Mirrors the teacher's global-facade pattern (`metrics::set_recorder`)
/// generalized to "one registry per prefix" instead of "one process-wide
/// recorder", since this system supports multiple independently-lifecycled
/// prefixes (e.g. `"dfs"`, `"yarn"`) within the same process.
pub struct DefaultMetricsSystem;

impl DefaultMetricsSystem {
    /// Returns the orchestrator for `prefix`, creating one if this is the
    /// first request for it.
    pub fn instance_or_init(prefix: &str) -> Arc<Orchestrator> {
        let mut systems = SYSTEMS.lock();
        systems
            .entry(prefix.to_string())
            .or_insert_with(|| Registered {
                orchestrator: Orchestrator::new(prefix),
                unique_counters: HashMap::new(),
            })
            .orchestrator
            .clone()
    }

    /// Returns the orchestrator for `prefix` if one has already been created.
    pub fn instance(prefix: &str) -> Option<Arc<Orchestrator>> {
        SYSTEMS.lock().get(prefix).map(|r| r.orchestrator.clone())
    }

    /// Removes and shuts down the orchestrator registered for `prefix`, if any.
    pub fn shutdown(prefix: &str) {
        if let Some(registered) = SYSTEMS.lock().remove(prefix) {
            registered.orchestrator.stop();
        }
    }

    /// Derives a source name, appending a monotonically increasing suffix
    /// when `unique` is requested, so that repeated registrations of the
    /// same logical name (e.g. per-connection sources) don't collide.
    pub fn source_name(prefix: &str, name: &str, unique: bool) -> String {
        if !unique {
            return name.to_string();
        }

        let mut systems = SYSTEMS.lock();
        let registered = systems
            .entry(prefix.to_string())
            .or_insert_with(|| Registered {
                orchestrator: Orchestrator::new(prefix),
                unique_counters: HashMap::new(),
            });
        let counter = registered
            .unique_counters
            .entry(name.to_string())
            .or_insert_with(|| AtomicU64::new(0));
        let suffix = counter.fetch_add(1, Ordering::Relaxed);
        format!("{name}{suffix}")
    }
}
