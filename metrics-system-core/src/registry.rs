//! The per-source registry from `spec.md` §4.2.
use crate::error::RegistryError;
use crate::intern::{MetricInfo, Tag};
use crate::metric::{MutableMetric, MutableStat};
use indexmap::IndexMap;
use std::sync::Arc;

/// Well-known info for the context tag every source's records carry.
fn context_info() -> MetricInfo {
    MetricInfo::new("Context", "Metrics context")
}

/// An ordered, per-source `name -> MutableMetric` container.
///
/// Chosen as an `IndexMap` (rather than the teacher's lock-free persistent
/// `im::HashMap`) because `spec.md` requires insertion-order iteration on
/// `snapshot`, and because `spec.md` §4.2 requires that registration never
/// race a snapshot -- the orchestrator serializes those on its monitor (see
/// `spec.md` §5), so there's no need to pay for a concurrent map here.
#[derive(Debug)]
pub struct Registry {
    info: MetricInfo,
    metrics: IndexMap<String, Arc<MutableMetric>>,
    context: Option<Tag>,
}

impl Registry {
    /// Creates a new, empty registry identified by `info`.
    pub fn new(info: MetricInfo) -> Self {
        Self {
            info,
            metrics: IndexMap::new(),
            context: None,
        }
    }

    /// The registry's own info (used as the synthesized source's record info).
    pub fn info(&self) -> &MetricInfo {
        &self.info
    }

    /// Sets the context tag appended to every record emitted from this
    /// source, used as a sink-side routing/filter key.
    pub fn set_context(&mut self, value: impl Into<String>) {
        self.context = Some(Tag::new(context_info(), value));
    }

    /// The registry's context tag, if one was set.
    pub fn context_tag(&self) -> Option<&Tag> {
        self.context.as_ref()
    }

    /// Registers a pre-built metric under `name`.
    ///
    /// Fails with `DuplicateName` if a metric is already registered under
    /// that name; the registry is left unchanged.
    pub fn add(&mut self, name: impl Into<String>, metric: Arc<MutableMetric>) -> Result<Arc<MutableMetric>, RegistryError> {
        let name = name.into();
        if self.metrics.contains_key(&name) {
            return Err(RegistryError::DuplicateName(name));
        }
        self.metrics.insert(name, metric.clone());
        Ok(metric)
    }

    /// Creates and registers a new counter metric.
    pub fn new_counter_int(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        initial: i32,
    ) -> Result<Arc<MutableMetric>, RegistryError> {
        let name = name.into();
        let metric = Arc::new(MutableMetric::counter_int(
            MetricInfo::new(name.clone(), description),
            initial,
        ));
        self.add(name, metric)
    }

    /// Creates and registers a new counter metric.
    pub fn new_counter_long(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        initial: i64,
    ) -> Result<Arc<MutableMetric>, RegistryError> {
        let name = name.into();
        let metric = Arc::new(MutableMetric::counter_long(
            MetricInfo::new(name.clone(), description),
            initial,
        ));
        self.add(name, metric)
    }

    /// Creates and registers a new gauge metric.
    pub fn new_gauge_int(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        initial: i32,
    ) -> Result<Arc<MutableMetric>, RegistryError> {
        let name = name.into();
        let metric = Arc::new(MutableMetric::gauge_int(
            MetricInfo::new(name.clone(), description),
            initial,
        ));
        self.add(name, metric)
    }

    /// Creates and registers a new gauge metric.
    pub fn new_gauge_long(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        initial: i64,
    ) -> Result<Arc<MutableMetric>, RegistryError> {
        let name = name.into();
        let metric = Arc::new(MutableMetric::gauge_long(
            MetricInfo::new(name.clone(), description),
            initial,
        ));
        self.add(name, metric)
    }

    /// Creates and registers a new gauge metric.
    pub fn new_gauge_float(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        initial: f32,
    ) -> Result<Arc<MutableMetric>, RegistryError> {
        let name = name.into();
        let metric = Arc::new(MutableMetric::gauge_float(
            MetricInfo::new(name.clone(), description),
            initial,
        ));
        self.add(name, metric)
    }

    /// Creates and registers a new gauge metric.
    pub fn new_gauge_double(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        initial: f64,
    ) -> Result<Arc<MutableMetric>, RegistryError> {
        let name = name.into();
        let metric = Arc::new(MutableMetric::gauge_double(
            MetricInfo::new(name.clone(), description),
            initial,
        ));
        self.add(name, metric)
    }

    /// Creates and registers a new rolling-stat metric.
    #[allow(clippy::too_many_arguments)]
    pub fn new_stat(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        sample_name: impl Into<String>,
        value_name: impl Into<String>,
        extended: bool,
        reset_on_snapshot: bool,
    ) -> Result<Arc<MutableMetric>, RegistryError> {
        let name = name.into();
        let stat = MutableStat::new(
            MetricInfo::new(name.clone(), description),
            sample_name,
            value_name,
            extended,
            reset_on_snapshot,
        );
        let metric = Arc::new(MutableMetric::stat(stat));
        self.add(name, metric)
    }

    /// Looks up a previously registered metric by name.
    pub fn get(&self, name: &str) -> Option<Arc<MutableMetric>> {
        self.metrics.get(name).cloned()
    }

    /// Appends every metric's current sample to `builder`, in registration order.
    ///
    /// `all = false` only emits metrics changed since the last `all = false`
    /// snapshot (`spec.md` §8 invariant 3); `all = true` emits everything and
    /// also clears the `changed` flag (`spec.md` §9 open question, pinned in
    /// `DESIGN.md`).
    pub fn snapshot(&self, builder: &mut dyn FnMut(crate::metric::AbstractMetric), all: bool) {
        for metric in self.metrics.values() {
            metric.snapshot(builder, all);
        }
    }

    /// Number of metrics currently registered.
    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    /// Whether the registry has no registered metrics.
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_name_is_rejected() {
        let mut registry = Registry::new(MetricInfo::named("test"));
        registry.new_counter_long("requests", "request count", 0).unwrap();
        let err = registry
            .new_counter_long("requests", "a different one", 0)
            .unwrap_err();
        assert_eq!(err, RegistryError::DuplicateName("requests".into()));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn snapshot_preserves_insertion_order() {
        let mut registry = Registry::new(MetricInfo::named("test"));
        registry.new_counter_long("first", "first", 1).unwrap();
        registry.new_counter_long("second", "second", 2).unwrap();
        registry.new_counter_long("third", "third", 3).unwrap();

        let mut names = Vec::new();
        registry.snapshot(
            &mut |m| {
                names.push(m.info().name().to_string());
            },
            true,
        );
        assert_eq!(names, vec!["first", "second", "third"]);
    }

    #[test]
    fn context_tag_round_trips() {
        let mut registry = Registry::new(MetricInfo::named("test"));
        assert!(registry.context_tag().is_none());
        registry.set_context("testctx");
        assert_eq!(registry.context_tag().unwrap().value(), "testctx");
    }
}
