//! The collector / record builder pipeline from `spec.md` §4.3.
//!
//! A `Collector` is transient, non-thread-safe staging for exactly one
//! source's turn during one sampling pass; it is never retained past the
//! `Source::get_metrics` call that received it.
use crate::filter::Filter;
use crate::intern::{MetricInfo, Tag};
use crate::metric::AbstractMetric;
use std::sync::Arc;

fn context_info() -> MetricInfo {
    MetricInfo::new("Context", "Metrics context")
}

/// An immutable named group of tags and metric samples produced by one
/// source in one pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    info: MetricInfo,
    timestamp_millis: i64,
    tags: Vec<Tag>,
    metrics: Vec<AbstractMetric>,
}

impl Record {
    /// The record's info.
    pub fn info(&self) -> &MetricInfo {
        &self.info
    }

    /// Milliseconds since the Unix epoch when this record was finalized.
    pub fn timestamp_millis(&self) -> i64 {
        self.timestamp_millis
    }

    /// This record's tags, in the order they were added.
    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }

    /// This record's metric samples, in the order they were added.
    pub fn metrics(&self) -> &[AbstractMetric] {
        &self.metrics
    }

    /// Projects this record through a metric-name filter, producing a new
    /// record with only the metrics that pass. Used by a sink adapter to
    /// apply its own `metricFilter` at delivery time, independent of
    /// whatever filtering already happened at collection time
    /// (`spec.md` §4.7's `DELIVER` step).
    pub fn with_metrics_filtered(&self, filter: &dyn Filter) -> Record {
        Record {
            info: self.info.clone(),
            timestamp_millis: self.timestamp_millis,
            tags: self.tags.clone(),
            metrics: self
                .metrics
                .iter()
                .filter(|m| filter.accepts_name(m.info().name()))
                .cloned()
                .collect(),
        }
    }
}

/// A transient builder accumulating tags and metrics for one record.
///
/// `Noop` is returned instead of `Real` when the owning `Collector`'s
/// `record_filter` rejected the record's name at `add_record` time; it
/// accepts every call and retains nothing, so source code never needs to
/// branch on whether its record survived filtering.
pub enum RecordBuilder {
    /// A builder that is actually accumulating state.
    Real {
        info: MetricInfo,
        tags: Vec<Tag>,
        metrics: Vec<AbstractMetric>,
        metric_filter: Option<Arc<dyn Filter>>,
    },
    /// A builder whose record was rejected by the collector's `record_filter`.
    Noop,
}

impl RecordBuilder {
    fn metric_accepted(&self, info: &MetricInfo) -> bool {
        match self {
            RecordBuilder::Real { metric_filter, .. } => metric_filter
                .as_ref()
                .map(|f| f.accepts_name(info.name()))
                .unwrap_or(true),
            RecordBuilder::Noop => false,
        }
    }

    /// Appends a tag to this record.
    pub fn tag(&mut self, info: MetricInfo, value: impl Into<String>) -> &mut Self {
        self.add_tag(Tag::new(info, value))
    }

    /// Appends a pre-built tag to this record.
    pub fn add_tag(&mut self, tag: Tag) -> &mut Self {
        if let RecordBuilder::Real { tags, .. } = self {
            tags.push(tag);
        }
        self
    }

    /// Sets the context tag for this record, equivalent to
    /// `tag(context_info(), value)`.
    pub fn set_context(&mut self, value: impl Into<String>) -> &mut Self {
        self.tag(context_info(), value)
    }

    /// Appends a pre-built metric sample, subject to the per-metric filter.
    pub fn add(&mut self, metric: AbstractMetric) -> &mut Self {
        if self.metric_accepted(metric.info()) {
            if let RecordBuilder::Real { metrics, .. } = self {
                metrics.push(metric);
            }
        }
        self
    }

    /// Appends a 32-bit counter sample.
    pub fn add_counter_int(&mut self, info: MetricInfo, value: i32) -> &mut Self {
        self.add(AbstractMetric::CounterInt(info, value))
    }

    /// Appends a 64-bit counter sample.
    pub fn add_counter_long(&mut self, info: MetricInfo, value: i64) -> &mut Self {
        self.add(AbstractMetric::CounterLong(info, value))
    }

    /// Appends a 32-bit gauge sample.
    pub fn add_gauge_int(&mut self, info: MetricInfo, value: i32) -> &mut Self {
        self.add(AbstractMetric::GaugeInt(info, value))
    }

    /// Appends a 64-bit gauge sample.
    pub fn add_gauge_long(&mut self, info: MetricInfo, value: i64) -> &mut Self {
        self.add(AbstractMetric::GaugeLong(info, value))
    }

    /// Appends a 32-bit floating point gauge sample.
    pub fn add_gauge_float(&mut self, info: MetricInfo, value: f32) -> &mut Self {
        self.add(AbstractMetric::GaugeFloat(info, value))
    }

    /// Appends a 64-bit floating point gauge sample.
    pub fn add_gauge_double(&mut self, info: MetricInfo, value: f64) -> &mut Self {
        self.add(AbstractMetric::GaugeDouble(info, value))
    }

    fn finalize(self, timestamp_millis: i64, record_filter: Option<&Arc<dyn Filter>>) -> Option<Record> {
        match self {
            RecordBuilder::Noop => None,
            RecordBuilder::Real {
                info,
                tags,
                metrics,
                ..
            } => {
                if let Some(filter) = record_filter {
                    if !filter.accepts_tags(&tags) {
                        return None;
                    }
                }
                Some(Record {
                    info,
                    timestamp_millis,
                    tags,
                    metrics,
                })
            }
        }
    }
}

/// Transient staging area assembling record builders during one sampling pass.
///
/// Holds the pass's optional `record_filter`/`metric_filter`; cleared
/// between sources within a pass so each source's records are isolated
/// (`spec.md` §3).
pub struct Collector {
    builders: Vec<RecordBuilder>,
    record_filter: Option<Arc<dyn Filter>>,
    metric_filter: Option<Arc<dyn Filter>>,
}

impl Collector {
    /// Creates a collector with no filters configured.
    pub fn new() -> Self {
        Self {
            builders: Vec::new(),
            record_filter: None,
            metric_filter: None,
        }
    }

    /// Creates a collector with the given record/metric filters.
    pub fn with_filters(
        record_filter: Option<Arc<dyn Filter>>,
        metric_filter: Option<Arc<dyn Filter>>,
    ) -> Self {
        Self {
            builders: Vec::new(),
            record_filter,
            metric_filter,
        }
    }

    /// Starts a new record, returning its builder.
    ///
    /// Evaluates `record_filter` on `info.name()`; if rejected, a no-op
    /// builder is returned so source code need not branch (`spec.md` §4.3).
    pub fn add_record(&mut self, info: MetricInfo) -> &mut RecordBuilder {
        let accepted = self
            .record_filter
            .as_ref()
            .map(|f| f.accepts_name(info.name()))
            .unwrap_or(true);

        let builder = if accepted {
            RecordBuilder::Real {
                info,
                tags: Vec::new(),
                metrics: Vec::new(),
                metric_filter: self.metric_filter.clone(),
            }
        } else {
            RecordBuilder::Noop
        };

        self.builders.push(builder);
        self.builders.last_mut().expect("just pushed")
    }

    /// Convenience over `add_record`, synthesizing `info(name, name + " record")`.
    pub fn add_record_named(&mut self, name: impl Into<String>) -> &mut RecordBuilder {
        let name = name.into();
        let description = format!("{} record", name);
        self.add_record(MetricInfo::new(name, description))
    }

    /// Finalizes every accumulated builder into a `Record`, dropping those
    /// rejected by `record_filter` at finalize time, and clears the collector.
    pub fn get_records(&mut self, timestamp_millis: i64) -> Vec<Record> {
        let builders = std::mem::take(&mut self.builders);
        builders
            .into_iter()
            .filter_map(|b| b.finalize(timestamp_millis, self.record_filter.as_ref()))
            .collect()
    }

    /// Drops any accumulated, unfinalized builders without producing records.
    pub fn clear(&mut self) {
        self.builders.clear();
    }

    /// Inserts `tags` into every builder accumulated so far that is still
    /// real, immediately after that builder's context tag (if any), rather
    /// than appending them at the end.
    ///
    /// Used by a source adapter to stamp orchestrator-injected tags (e.g.
    /// `Hostname`) onto every record a source produced, after
    /// `Source::get_metrics` returns and before `get_records` finalizes them
    /// (`spec.md` §4.4 step 3). The resulting tag order is `contextTag,
    /// orchestratorInjectedTags, recordBuilderTags` (`spec.md` invariant 1):
    /// a source's own context tag (if set) is always first, these
    /// orchestrator tags come next, and any further tags the source added
    /// itself end up after them rather than before.
    pub fn tag_all(&mut self, tags: &[Tag]) {
        for builder in &mut self.builders {
            if let RecordBuilder::Real { tags: existing, .. } = builder {
                let insert_at = existing.len().min(1);
                for (offset, tag) in tags.iter().cloned().enumerate() {
                    existing.insert(insert_at + offset, tag);
                }
            }
        }
    }
}

impl Default for Collector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::NameSet;

    #[test]
    fn record_filter_rejects_at_build_time() {
        let mut collector =
            Collector::with_filters(Some(Arc::new(NameSet::with_prefixes(["good"]))), None);
        collector.add_record_named("bad1").add_counter_long(
            MetricInfo::named("requests"),
            1,
        );
        collector
            .add_record_named("good1")
            .add_counter_long(MetricInfo::named("requests"), 2);

        let records = collector.get_records(0);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].info().name(), "good1");
    }

    #[test]
    fn metric_filter_drops_individual_metrics() {
        let mut collector =
            Collector::with_filters(None, Some(Arc::new(NameSet::with_prefixes(["allowed"]))));
        collector
            .add_record_named("source")
            .add_counter_long(MetricInfo::named("allowed_metric"), 1)
            .add_counter_long(MetricInfo::named("blocked_metric"), 2);

        let records = collector.get_records(0);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].metrics().len(), 1);
        assert_eq!(records[0].metrics()[0].info().name(), "allowed_metric");
    }

    #[test]
    fn clear_drops_unfinalized_builders() {
        let mut collector = Collector::new();
        collector.add_record_named("a");
        collector.clear();
        assert!(collector.get_records(0).is_empty());
    }

    #[test]
    fn tag_all_stamps_every_open_builder() {
        let mut collector = Collector::new();
        collector.add_record_named("a");
        collector.add_record_named("b");
        collector.tag_all(&[Tag::new(MetricInfo::named("Hostname"), "host1")]);

        let records = collector.get_records(0);
        assert_eq!(records.len(), 2);
        for record in &records {
            assert_eq!(record.tags()[0].name(), "Hostname");
        }
    }

    #[test]
    fn tag_all_inserts_after_context_tag_ahead_of_builder_tags() {
        let mut collector = Collector::new();
        collector
            .add_record_named("source")
            .set_context("testctx")
            .tag(MetricInfo::named("Region"), "us-east");
        collector.tag_all(&[Tag::new(MetricInfo::named("Hostname"), "host1")]);

        let records = collector.get_records(0);
        assert_eq!(records.len(), 1);
        let tags = records[0].tags();
        assert_eq!(tags[0].name(), "Context");
        assert_eq!(tags[1].name(), "Hostname");
        assert_eq!(tags[2].name(), "Region");
    }

    #[test]
    fn tags_and_context_are_preserved_in_order() {
        let mut collector = Collector::new();
        collector
            .add_record_named("source")
            .set_context("testctx")
            .tag(MetricInfo::named("Hostname"), "localhost");

        let records = collector.get_records(42);
        assert_eq!(records.len(), 1);
        let tags = records[0].tags();
        assert_eq!(tags[0].name(), "Context");
        assert_eq!(tags[0].value(), "testctx");
        assert_eq!(tags[1].name(), "Hostname");
        assert_eq!(records[0].timestamp_millis(), 42);
    }
}
