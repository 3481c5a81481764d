//! The orchestrator: registry of sources and sinks, sampling timer, and
//! self-reporting (`spec.md` §4.7).
use crate::callback::CallbackGuard;
use crate::config::Config;
use crate::sink_adapter::{Buffer, SinkAdapter, SinkAdapterConfig};
use crate::source_adapter::{AdapterState, SourceAdapter};
use indexmap::IndexMap;
use metrics_system_core::callback::Callback;
use metrics_system_core::collector::Collector;
use metrics_system_core::error::ConfigError;
use metrics_system_core::filter::{AcceptAll, Filter};
use metrics_system_core::intern::{MetricInfo, Tag};
use metrics_system_core::metric::MutableStat;
use metrics_system_core::sink::Sink;
use metrics_system_core::source::Source;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// The orchestrator's lifecycle state (`spec.md` §4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    /// Never initialized.
    Unconfigured,
    /// Configuration loaded, timer not running (`STANDBY` mode, or a
    /// `ConfigError` that kept `start()` from completing).
    Configured,
    /// Timer running; sources are sampled and buffers published each tick.
    Monitoring,
    /// Torn down after having been `Monitoring`.
    Stopped,
}

fn gcd(a: u64, b: u64) -> u64 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

struct Inner {
    state: OrchestratorState,
    refcount: u32,
    config: Config,
    period: Duration,
    logical_time_millis: i64,
    sources: IndexMap<String, Arc<SourceAdapter>>,
    sinks: IndexMap<String, SinkAdapter>,
    callbacks: Vec<CallbackGuard>,
    context_tags: Vec<Tag>,
    source_filter: Arc<dyn Filter>,
    snapshot_stat: MutableStat,
    publish_stat: MutableStat,
    dropped_pub_all: AtomicU64,
    timer_stop: Option<crossbeam_channel::Sender<()>>,
    timer: Option<std::thread::JoinHandle<()>>,
}

/// One per metrics prefix: the registry of sources/sinks, the sampling
/// timer, and a refcount tolerating nested `init`/`shutdown` calls in
/// test/mini-cluster style harnesses.
pub struct Orchestrator {
    prefix: String,
    inner: Mutex<Inner>,
}

impl Orchestrator {
    /// Creates a new, `Unconfigured` orchestrator for `prefix`.
    pub fn new(prefix: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            prefix: prefix.into(),
            inner: Mutex::new(Inner {
                state: OrchestratorState::Unconfigured,
                refcount: 0,
                config: Config::new(),
                period: Duration::from_secs(crate::config::DEFAULT_PERIOD_SECS),
                logical_time_millis: 0,
                sources: IndexMap::new(),
                sinks: IndexMap::new(),
                callbacks: Vec::new(),
                context_tags: vec![Tag::new(
                    MetricInfo::new("Hostname", "the local hostname"),
                    local_hostname(),
                )],
                source_filter: Arc::new(AcceptAll),
                snapshot_stat: MutableStat::new(
                    MetricInfo::new("SnapshotStat", "time spent sampling sources, ms"),
                    "ops",
                    "ms",
                    true,
                    false,
                ),
                publish_stat: MutableStat::new(
                    MetricInfo::new("PublishStat", "time spent publishing buffers, ms"),
                    "ops",
                    "ms",
                    true,
                    false,
                ),
                dropped_pub_all: AtomicU64::new(0),
                timer_stop: None,
                timer: None,
            }),
        })
    }

    /// The prefix this orchestrator was created under.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Current lifecycle state.
    pub fn state(&self) -> OrchestratorState {
        self.inner.lock().state
    }

    /// Idempotent: increments the refcount. On the first call, loads
    /// `config` and starts monitoring, unless `METRICS_SYSTEM_INIT_MODE`
    /// is `STANDBY` (case-insensitive), in which case it stays `Configured`
    /// until an explicit `start()` (`spec.md` §4.7/§6).
    pub fn init(self: &Arc<Self>, config: Config) {
        let standby = {
            let mut inner = self.inner.lock();
            inner.refcount += 1;
            if inner.refcount > 1 {
                return;
            }
            inner.config = config;
            std::env::var("METRICS_SYSTEM_INIT_MODE")
                .map(|v| v.eq_ignore_ascii_case("STANDBY"))
                .unwrap_or(false)
        };

        if standby {
            self.inner.lock().state = OrchestratorState::Configured;
        } else {
            self.start();
        }
    }

    /// Loads config, computes the sampling period, injects the host tag,
    /// runs `pre_start`/`post_start` callbacks, and schedules the timer.
    /// Idempotent while already `Monitoring`.
    pub fn start(self: &Arc<Self>) {
        {
            let inner = self.inner.lock();
            if inner.state == OrchestratorState::Monitoring {
                return;
            }
        }

        if let Err(err) = self.try_start() {
            log::warn!("orchestrator `{}` failed to start: {}", self.prefix, err);
            self.inner.lock().state = OrchestratorState::Configured;
        }
    }

    fn try_start(self: &Arc<Self>) -> Result<(), ConfigError> {
        let period = {
            let inner = self.inner.lock();
            compute_period(&inner.config, &inner.sinks)
        };

        {
            let mut inner = self.inner.lock();
            inner.period = period;
            inner.state = OrchestratorState::Monitoring;
            for guard in &inner.callbacks {
                guard.pre_start();
            }
            for adapter in inner.sources.values() {
                adapter.start();
            }
            for sink in inner.sinks.values_mut() {
                sink.start();
            }
            for guard in &inner.callbacks {
                guard.post_start();
            }
        }

        self.schedule_timer(period);
        Ok(())
    }

    fn schedule_timer(self: &Arc<Self>, period: Duration) {
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let orchestrator = self.clone();
        let handle = std::thread::Builder::new()
            .name(format!("metrics-timer-{}", self.prefix))
            .spawn(move || loop {
                crossbeam_channel::select! {
                    recv(stop_rx) -> _ => break,
                    default(period) => {
                        orchestrator.tick();
                    }
                }
            })
            .expect("failed to spawn the sampling timer thread");

        let mut inner = self.inner.lock();
        inner.timer_stop = Some(stop_tx);
        inner.timer = Some(handle);
    }

    /// One timer tick: samples every started source plus the self-source,
    /// then publishes the resulting buffer to every sink with a
    /// non-blocking, drop-head offer (`spec.md` §4.7).
    fn tick(self: &Arc<Self>) {
        let mut inner = self.inner.lock();
        inner.logical_time_millis += inner.period.as_millis() as i64;
        if inner.sinks.is_empty() {
            return;
        }
        let timestamp_millis = inner.logical_time_millis;
        let buffer = self.sample_metrics_locked(&mut inner, timestamp_millis);
        self.publish_metrics_locked(&mut inner, buffer, false);
    }

    fn sample_metrics_locked(&self, inner: &mut Inner, timestamp_millis: i64) -> Buffer {
        let mut collector = Collector::new();
        let mut buffer = Buffer::new();

        let source_filter = inner.source_filter.clone();
        let context_tags = inner.context_tags.clone();
        for (name, adapter) in inner.sources.iter() {
            if adapter.state() != AdapterState::Started {
                continue;
            }
            if !source_filter.accepts_name(name) {
                continue;
            }
            let started = Instant::now();
            let records = adapter.get_metrics(&mut collector, true, timestamp_millis, &context_tags);
            inner
                .snapshot_stat
                .add(started.elapsed().as_secs_f64() * 1000.0);
            buffer.push((name.clone(), records));
        }

        buffer.push((
            "orchestrator".to_string(),
            self.self_source_records(inner, &mut collector, timestamp_millis),
        ));

        buffer
    }

    fn self_source_records(
        &self,
        inner: &Inner,
        collector: &mut Collector,
        timestamp_millis: i64,
    ) -> Vec<metrics_system_core::collector::Record> {
        collector.clear();
        let builder = collector.add_record_named("orchestrator");
        let active_sources = inner
            .sources
            .values()
            .filter(|a| a.state() == AdapterState::Started)
            .count() as i64;
        builder
            .add_gauge_long(MetricInfo::named("NumActiveSources"), active_sources)
            .add_gauge_long(MetricInfo::named("NumAllSources"), inner.sources.len() as i64)
            .add_gauge_long(MetricInfo::named("NumActiveSinks"), inner.sinks.len() as i64)
            .add_gauge_long(MetricInfo::named("NumAllSinks"), inner.sinks.len() as i64)
            .add_gauge_long(
                MetricInfo::named("DroppedPubAll"),
                inner.dropped_pub_all.load(Ordering::Relaxed) as i64,
            );
        for (name, sink) in inner.sinks.iter() {
            builder.add_gauge_long(
                MetricInfo::named(format!("{name}.dropped")),
                sink.dropped() as i64,
            );
            builder.add_gauge_long(
                MetricInfo::named(format!("{name}.qsize")),
                sink.qsize() as i64,
            );
        }
        collector.get_records(timestamp_millis)
    }

    fn publish_metrics_locked(&self, inner: &mut Inner, buffer: Buffer, immediate: bool) {
        let started = Instant::now();
        let mut dropped = 0u64;
        for sink in inner.sinks.values() {
            let accepted = if immediate {
                sink.put_metrics_immediate(buffer.clone(), inner.period)
            } else {
                sink.put_metrics(buffer.clone())
            };
            if !accepted {
                dropped += 1;
            }
        }
        inner
            .publish_stat
            .add(started.elapsed().as_secs_f64() * 1000.0);
        inner.dropped_pub_all.fetch_add(dropped, Ordering::Relaxed);
    }

    /// Triggers an immediate sample and publish using the bounded-wait
    /// enqueue variant.
    pub fn publish_metrics_now(&self) {
        let mut inner = self.inner.lock();
        if inner.state != OrchestratorState::Monitoring {
            return;
        }
        inner.logical_time_millis += inner.period.as_millis() as i64;
        let timestamp_millis = inner.logical_time_millis;
        let buffer = self.sample_metrics_locked(&mut inner, timestamp_millis);
        self.publish_metrics_locked(&mut inner, buffer, true);
    }

    /// Reverses `start()`: runs pre/post stop callbacks, cancels the timer,
    /// stops every source adapter, and joins every sink worker.
    pub fn stop(&self) {
        let mut inner = self.inner.lock();
        if inner.state != OrchestratorState::Monitoring {
            return;
        }
        for guard in &inner.callbacks {
            guard.pre_stop();
        }
        if let Some(stop_tx) = inner.timer_stop.take() {
            let _ = stop_tx.send(());
        }
        if let Some(handle) = inner.timer.take() {
            let _ = handle.join();
        }
        for adapter in inner.sources.values() {
            adapter.stop();
        }
        let period = inner.period;
        for sink in inner.sinks.values_mut() {
            sink.stop(period);
        }
        for guard in &inner.callbacks {
            guard.post_stop();
        }
        inner.state = OrchestratorState::Stopped;
    }

    /// Decrements the refcount; on reaching zero, calls `stop()`. Returns
    /// `true` if this call actually performed the shutdown.
    pub fn shutdown(&self) -> bool {
        let should_stop = {
            let mut inner = self.inner.lock();
            if inner.refcount == 0 {
                return false;
            }
            inner.refcount -= 1;
            inner.refcount == 0
        };
        if should_stop {
            self.stop();
        }
        should_stop
    }

    /// Registers a source, starting it immediately if already monitoring.
    pub fn register_source(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        source: Arc<dyn Source>,
    ) -> Arc<SourceAdapter> {
        let name = name.into();
        let mut inner = self.inner.lock();
        let cache_ttl = inner.period;
        let adapter = Arc::new(SourceAdapter::new(name.clone(), description, source, cache_ttl));
        if inner.state == OrchestratorState::Monitoring {
            adapter.start();
        }
        inner.sources.insert(name, adapter.clone());
        adapter
    }

    /// Stops and removes a previously registered source.
    pub fn unregister_source(&self, name: &str) {
        let mut inner = self.inner.lock();
        if let Some(adapter) = inner.sources.shift_remove(name) {
            adapter.stop();
        }
    }

    /// Registers a sink, spawning its worker thread immediately.
    pub fn register_sink(&self, name: impl Into<String>, sink: Box<dyn Sink>) {
        let name = name.into();
        let mut inner = self.inner.lock();
        let sink_config = inner.config.section(&format!("sink.{name}"));
        let adapter_config = SinkAdapterConfig::from_config(&sink_config);
        let adapter = SinkAdapter::spawn(name.clone(), sink, &sink_config, adapter_config);
        inner.sinks.insert(name, adapter);
        inner.period = compute_period(&inner.config, &inner.sinks);
    }

    /// Registers an unnamed lifecycle callback.
    pub fn register_callback(&self, name: impl Into<String>, callback: Arc<dyn Callback>) {
        self.inner
            .lock()
            .callbacks
            .push(CallbackGuard::new(name, callback));
    }

    /// Replaces the source-name filter used during sampling.
    pub fn set_source_filter(&self, filter: Arc<dyn Filter>) {
        self.inner.lock().source_filter = filter;
    }

    /// Current sampling period.
    pub fn period(&self) -> Duration {
        self.inner.lock().period
    }

    /// Total buffers dropped across every sink's publish attempts so far.
    pub fn dropped_pub_all(&self) -> u64 {
        self.inner.lock().dropped_pub_all.load(Ordering::Relaxed)
    }
}

fn compute_period(config: &Config, sinks: &IndexMap<String, SinkAdapter>) -> Duration {
    let default_period = config.get_duration_secs("period", crate::config::DEFAULT_PERIOD_SECS);
    if sinks.is_empty() {
        return default_period;
    }

    let mut acc = default_period.as_secs();
    for name in sinks.keys() {
        let section = config.section(&format!("sink.{name}"));
        let sink_period = section
            .get_duration_secs("period", crate::config::DEFAULT_PERIOD_SECS)
            .as_secs();
        acc = gcd(acc, sink_period);
    }
    if acc == 0 {
        default_period
    } else {
        Duration::from_secs(acc)
    }
}

fn local_hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_system_core::collector::Record;
    use metrics_system_core::error::DeliveryError;
    use metrics_system_core::intern::MetricInfo;
    use parking_lot::Mutex as PMutex;

    struct CountingSource;
    impl Source for CountingSource {
        fn get_metrics(&self, collector: &mut Collector, _all: bool) {
            collector
                .add_record_named("counting")
                .add_counter_long(MetricInfo::named("requests"), 3);
        }
    }

    struct RecordingSink(Arc<PMutex<Vec<Record>>>);
    impl Sink for RecordingSink {
        fn configure(&mut self, _config: &dyn metrics_system_core::sink::SinkConfig) {}
        fn put_metrics(&mut self, record: &Record) -> Result<(), DeliveryError> {
            self.0.lock().push(record.clone());
            Ok(())
        }
        fn flush(&mut self) -> Result<(), DeliveryError> {
            Ok(())
        }
    }

    #[test]
    fn init_shutdown_refcount_round_trips() {
        let orchestrator = Orchestrator::new("test");
        orchestrator.init(Config::new());
        orchestrator.init(Config::new());
        assert!(!orchestrator.shutdown());
        assert_eq!(orchestrator.state(), OrchestratorState::Monitoring);
        assert!(orchestrator.shutdown());
        assert_eq!(orchestrator.state(), OrchestratorState::Stopped);
    }

    #[test]
    fn publish_now_delivers_to_registered_sink() {
        let orchestrator = Orchestrator::new("test");
        let mut config = Config::new();
        config.set("period", "1");
        orchestrator.init(config);

        let delivered = Arc::new(PMutex::new(Vec::new()));
        orchestrator.register_sink("recorder", Box::new(RecordingSink(delivered.clone())));
        orchestrator.register_source("counting", "a counting source", Arc::new(CountingSource));

        orchestrator.publish_metrics_now();
        std::thread::sleep(Duration::from_millis(200));

        assert!(!delivered.lock().is_empty());
        orchestrator.shutdown();
    }
}
