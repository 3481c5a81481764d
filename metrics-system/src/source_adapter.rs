//! Owns one source through its lifecycle (`spec.md` §4.4).
use metrics_system_core::collector::{Collector, Record};
use metrics_system_core::intern::Tag;
use metrics_system_core::source::Source;
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A source adapter's lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    /// Registered but not yet started.
    New,
    /// Bound in and eligible to be sampled.
    Started,
    /// Torn down; will not be sampled again.
    Stopped,
}

/// Hook point standing in for the out-of-scope management-bean surface
/// (`spec.md` §4.4). Nothing in this crate registers a bean with any real
/// JMX-like facility; consumers that do have one adapt this themselves.
pub trait MetricsBean: Send + Sync {
    /// The bean's stable name, `"<prefix>:name=<sourceName>[,sub=...]"`.
    fn bean_name(&self) -> &str;

    /// Returns the current (possibly cached) attribute view.
    fn snapshot_attributes(&self) -> Vec<(String, String)>;
}

/// Owns one [`Source`], its name/description, its lifecycle state, and the
/// cached management-bean snapshot.
pub struct SourceAdapter {
    name: String,
    description: String,
    source: Arc<dyn Source>,
    state: Mutex<AdapterState>,
    cache: Mutex<Option<(Instant, Vec<(String, String)>)>>,
    cache_ttl: Duration,
}

impl SourceAdapter {
    /// Creates an adapter in the `New` state.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        source: Arc<dyn Source>,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            source,
            state: Mutex::new(AdapterState::New),
            cache: Mutex::new(None),
            cache_ttl,
        }
    }

    /// The source's registered name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The source's description.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Current lifecycle state.
    pub fn state(&self) -> AdapterState {
        *self.state.lock()
    }

    /// Transitions `New`/`Stopped` -> `Started`.
    pub fn start(&self) {
        *self.state.lock() = AdapterState::Started;
    }

    /// Transitions to `Stopped`; a stopped adapter still answers
    /// `get_metrics` (so a final drain can complete) but is no longer
    /// scheduled by the orchestrator's timer.
    pub fn stop(&self) {
        *self.state.lock() = AdapterState::Stopped;
    }

    /// Samples this source into finalized records.
    ///
    /// 1. Clears `collector`.
    /// 2. Invokes the wrapped `Source::get_metrics`, catching any panic and
    ///    logging it, yielding an empty result for this pass rather than
    ///    ever propagating (`spec.md` §4.4 step 2).
    /// 3. Stamps `context_tags` onto every record this source produced.
    /// 4. Finalizes and returns the records.
    pub fn get_metrics(
        &self,
        collector: &mut Collector,
        all: bool,
        timestamp_millis: i64,
        context_tags: &[Tag],
    ) -> Vec<Record> {
        collector.clear();

        let source = self.source.clone();
        let result = catch_unwind(AssertUnwindSafe(|| {
            source.get_metrics(collector, all);
        }));
        if let Err(panic) = result {
            let reason = panic_message(&panic);
            log::error!(
                "source `{}` failed to snapshot its metrics: {}",
                self.name,
                reason
            );
            collector.clear();
            return Vec::new();
        }

        collector.tag_all(context_tags);
        let records = collector.get_records(timestamp_millis);

        if all {
            self.refresh_cache(&records);
        }

        records
    }

    fn refresh_cache(&self, records: &[Record]) {
        let mut attributes = Vec::new();
        for record in records {
            for metric in record.metrics() {
                attributes.push((metric.info().name().to_string(), format_metric(metric)));
            }
        }
        *self.cache.lock() = Some((Instant::now(), attributes));
    }
}

impl MetricsBean for SourceAdapter {
    fn bean_name(&self) -> &str {
        &self.name
    }

    /// Returns the cached attribute view if it is younger than `cache_ttl`;
    /// otherwise forces an `all=true` snapshot and caches the result,
    /// bounding the cost of rapid external polling (`spec.md` §4.4).
    fn snapshot_attributes(&self) -> Vec<(String, String)> {
        {
            let cache = self.cache.lock();
            if let Some((taken_at, attributes)) = cache.as_ref() {
                if taken_at.elapsed() < self.cache_ttl {
                    return attributes.clone();
                }
            }
        }

        let mut collector = Collector::new();
        let records = self.get_metrics(&mut collector, true, 0, &[]);
        let mut attributes = Vec::new();
        for record in &records {
            for metric in record.metrics() {
                attributes.push((metric.info().name().to_string(), format_metric(metric)));
            }
        }
        attributes
    }
}

fn format_metric(metric: &metrics_system_core::metric::AbstractMetric) -> String {
    use metrics_system_core::metric::AbstractMetric;
    match metric {
        AbstractMetric::CounterInt(_, v) => v.to_string(),
        AbstractMetric::CounterLong(_, v) => v.to_string(),
        AbstractMetric::GaugeInt(_, v) => v.to_string(),
        AbstractMetric::GaugeLong(_, v) => v.to_string(),
        AbstractMetric::GaugeFloat(_, v) => v.to_string(),
        AbstractMetric::GaugeDouble(_, v) => v.to_string(),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_system_core::intern::MetricInfo;

    struct CountingSource;
    impl Source for CountingSource {
        fn get_metrics(&self, collector: &mut Collector, _all: bool) {
            collector
                .add_record_named("counting")
                .add_counter_long(MetricInfo::named("requests"), 3);
        }
    }

    struct PanickingSource;
    impl Source for PanickingSource {
        fn get_metrics(&self, _collector: &mut Collector, _all: bool) {
            panic!("boom");
        }
    }

    #[test]
    fn basic_round_trip_applies_context_tags() {
        let adapter = SourceAdapter::new(
            "counting",
            "a counting source",
            Arc::new(CountingSource),
            Duration::from_secs(10),
        );
        adapter.start();
        let mut collector = Collector::new();
        let context_tag = Tag::new(MetricInfo::named("Hostname"), "localhost");
        let records = adapter.get_metrics(&mut collector, true, 1000, &[context_tag]);

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].tags()[0].value(), "localhost");
        assert_eq!(records[0].metrics().len(), 1);
    }

    #[test]
    fn panicking_source_yields_empty_result() {
        let adapter = SourceAdapter::new(
            "bad",
            "a panicking source",
            Arc::new(PanickingSource),
            Duration::from_secs(10),
        );
        let mut collector = Collector::new();
        let records = adapter.get_metrics(&mut collector, false, 0, &[]);
        assert!(records.is_empty());
    }

    #[test]
    fn mgmt_bean_cache_is_reused_within_ttl() {
        let adapter = SourceAdapter::new(
            "counting",
            "a counting source",
            Arc::new(CountingSource),
            Duration::from_secs(300),
        );
        let first = adapter.snapshot_attributes();
        let second = adapter.snapshot_attributes();
        assert_eq!(first, second);
        assert!(!first.is_empty());
    }
}
