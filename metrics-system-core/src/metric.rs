//! Metric values: the primitive accumulators and their immutable snapshots.
//!
//! `spec.md` §4.1 allows the implementer to pick linearizable updates via
//! atomics or a short critical section; counters and integer gauges use
//! atomics directly, float gauges and stats use a short `parking_lot::Mutex`
//! critical section, matching the teacher's own mix of `AtomicU64`/`AtomicI64`
//! (`metrics-runtime::common::ValueState`) for the cheap cases.
use crate::intern::MetricInfo;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, Ordering};

/// An immutable, point-in-time sample of a metric, as it appears in a `Record`.
#[derive(Debug, Clone, PartialEq)]
pub enum AbstractMetric {
    /// A monotonic 32-bit counter.
    CounterInt(MetricInfo, i32),
    /// A monotonic 64-bit counter.
    CounterLong(MetricInfo, i64),
    /// A 32-bit gauge.
    GaugeInt(MetricInfo, i32),
    /// A 64-bit gauge.
    GaugeLong(MetricInfo, i64),
    /// A 32-bit floating point gauge.
    GaugeFloat(MetricInfo, f32),
    /// A 64-bit floating point gauge.
    GaugeDouble(MetricInfo, f64),
}

impl AbstractMetric {
    /// The metric's info.
    pub fn info(&self) -> &MetricInfo {
        match self {
            AbstractMetric::CounterInt(info, _)
            | AbstractMetric::CounterLong(info, _)
            | AbstractMetric::GaugeInt(info, _)
            | AbstractMetric::GaugeLong(info, _)
            | AbstractMetric::GaugeFloat(info, _)
            | AbstractMetric::GaugeDouble(info, _) => info,
        }
    }
}

/// A point-in-time summary of a `MutableStat`'s rolling window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatSnapshot {
    /// Number of samples seen.
    pub count: u64,
    /// Arithmetic mean of the samples seen (0.0 if `count == 0`).
    pub avg: f64,
    /// Minimum sample seen.
    pub min: f64,
    /// Maximum sample seen.
    pub max: f64,
}

#[derive(Debug, Default)]
struct StatState {
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
    sum_sq: f64,
}

impl StatState {
    fn add_sample(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.count += 1;
        self.sum += value;
        self.sum_sq += value * value;
    }

    fn snapshot(&self) -> StatSnapshot {
        let avg = if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        };
        StatSnapshot {
            count: self.count,
            avg,
            min: self.min,
            max: self.max,
        }
    }

    fn reset(&mut self) {
        *self = StatState::default();
    }
}

/// A rolling statistical accumulator: count/sum/min/max/sum-of-squares.
///
/// Resolves the "stat reset-on-snapshot" open question from `spec.md` §9:
/// pinned per-instance via `reset_on_snapshot`. Cumulative (the default) is
/// the Hadoop Metrics2 default behavior; rolling-window stats opt in
/// explicitly.
#[derive(Debug)]
pub struct MutableStat {
    info: MetricInfo,
    sample_name: String,
    value_name: String,
    extended: bool,
    reset_on_snapshot: bool,
    state: Mutex<StatState>,
}

impl MutableStat {
    /// Creates a new stat accumulator.
    pub fn new(
        info: MetricInfo,
        sample_name: impl Into<String>,
        value_name: impl Into<String>,
        extended: bool,
        reset_on_snapshot: bool,
    ) -> Self {
        Self {
            info,
            sample_name: sample_name.into(),
            value_name: value_name.into(),
            extended,
            reset_on_snapshot,
            state: Mutex::new(StatState::default()),
        }
    }

    /// The stat's info.
    pub fn info(&self) -> &MetricInfo {
        &self.info
    }

    /// The unit describing one sample (e.g. "ops"), for sinks that want it.
    pub fn sample_name(&self) -> &str {
        &self.sample_name
    }

    /// The unit describing the accumulated value (e.g. "ms"), for sinks that want it.
    pub fn value_name(&self) -> &str {
        &self.value_name
    }

    /// Whether this stat should also expose min/max in its snapshot.
    pub fn is_extended(&self) -> bool {
        self.extended
    }

    /// Adds a sample to the rolling window.
    pub fn add(&self, value: f64) {
        self.state.lock().add_sample(value);
    }

    /// Produces a point-in-time snapshot, resetting the window afterward if
    /// `reset_on_snapshot` was set at construction.
    pub fn snapshot(&self) -> StatSnapshot {
        let mut state = self.state.lock();
        let snapshot = state.snapshot();
        if self.reset_on_snapshot {
            state.reset();
        }
        snapshot
    }
}

/// A mutable metric instance living inside a `Registry`.
///
/// Each variant owns its own linearizable update path; `snapshot` never
/// blocks on anything but its own short critical section and never panics.
#[derive(Debug)]
pub enum MutableMetric {
    /// A monotonic 32-bit counter, saturating on overflow (`spec.md` §8
    /// boundary property: saturate rather than wrap, since a counter that
    /// wraps would look like it went backwards).
    CounterInt(MetricInfo, AtomicI32, AtomicBool),
    /// A monotonic 64-bit counter, saturating on overflow.
    CounterLong(MetricInfo, AtomicI64, AtomicBool),
    /// A 32-bit gauge.
    GaugeInt(MetricInfo, AtomicI32, AtomicBool),
    /// A 64-bit gauge.
    GaugeLong(MetricInfo, AtomicI64, AtomicBool),
    /// A 32-bit floating point gauge.
    GaugeFloat(MetricInfo, Mutex<f32>, AtomicBool),
    /// A 64-bit floating point gauge.
    GaugeDouble(MetricInfo, Mutex<f64>, AtomicBool),
    /// A rolling statistical summary.
    Stat(MutableStat, AtomicBool),
}

impl MutableMetric {
    /// Creates a fresh counter metric.
    pub fn counter_int(info: MetricInfo, initial: i32) -> Self {
        MutableMetric::CounterInt(info, AtomicI32::new(initial), AtomicBool::new(true))
    }

    /// Creates a fresh counter metric.
    pub fn counter_long(info: MetricInfo, initial: i64) -> Self {
        MutableMetric::CounterLong(info, AtomicI64::new(initial), AtomicBool::new(true))
    }

    /// Creates a fresh gauge metric.
    pub fn gauge_int(info: MetricInfo, initial: i32) -> Self {
        MutableMetric::GaugeInt(info, AtomicI32::new(initial), AtomicBool::new(true))
    }

    /// Creates a fresh gauge metric.
    pub fn gauge_long(info: MetricInfo, initial: i64) -> Self {
        MutableMetric::GaugeLong(info, AtomicI64::new(initial), AtomicBool::new(true))
    }

    /// Creates a fresh gauge metric.
    pub fn gauge_float(info: MetricInfo, initial: f32) -> Self {
        MutableMetric::GaugeFloat(info, Mutex::new(initial), AtomicBool::new(true))
    }

    /// Creates a fresh gauge metric.
    pub fn gauge_double(info: MetricInfo, initial: f64) -> Self {
        MutableMetric::GaugeDouble(info, Mutex::new(initial), AtomicBool::new(true))
    }

    /// Creates a fresh stat metric.
    pub fn stat(stat: MutableStat) -> Self {
        MutableMetric::Stat(stat, AtomicBool::new(true))
    }

    /// The metric's info.
    pub fn info(&self) -> &MetricInfo {
        match self {
            MutableMetric::CounterInt(info, ..)
            | MutableMetric::CounterLong(info, ..)
            | MutableMetric::GaugeInt(info, ..)
            | MutableMetric::GaugeLong(info, ..)
            | MutableMetric::GaugeFloat(info, ..)
            | MutableMetric::GaugeDouble(info, ..) => info,
            MutableMetric::Stat(stat, _) => stat.info(),
        }
    }

    fn changed_flag(&self) -> &AtomicBool {
        match self {
            MutableMetric::CounterInt(_, _, c)
            | MutableMetric::CounterLong(_, _, c)
            | MutableMetric::GaugeInt(_, _, c)
            | MutableMetric::GaugeLong(_, _, c)
            | MutableMetric::GaugeFloat(_, _, c)
            | MutableMetric::GaugeDouble(_, _, c)
            | MutableMetric::Stat(_, c) => c,
        }
    }

    /// Increments a counter by `n` (`n >= 0`); the only mutation counters support.
    ///
    /// Both counter widths share the same monotonicity policy: a negative
    /// `n` is clamped to zero (a no-op) rather than decrementing, since
    /// counters are documented as monotonic.
    ///
    /// Panics if called on a non-counter variant -- callers obtain typed
    /// handles (see `metrics-system`'s `SourceBuilder`) and never need to
    /// mismatch kinds in practice.
    pub fn incr(&self, n: i64) {
        match self {
            MutableMetric::CounterInt(_, v, changed) => {
                let delta = n.clamp(0, i32::MAX as i64) as i32;
                v.fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
                    Some(cur.saturating_add(delta))
                })
                .ok();
                changed.store(true, Ordering::Release);
            }
            MutableMetric::CounterLong(_, v, changed) => {
                let delta = n.max(0);
                v.fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
                    Some(cur.saturating_add(delta))
                })
                .ok();
                changed.store(true, Ordering::Release);
            }
            _ => unreachable!("incr() called on a non-counter metric"),
        }
    }

    /// Sets a gauge to an integer value.
    pub fn set_int(&self, value: i64) {
        match self {
            MutableMetric::GaugeInt(_, v, changed) => {
                v.store(value as i32, Ordering::Release);
                changed.store(true, Ordering::Release);
            }
            MutableMetric::GaugeLong(_, v, changed) => {
                v.store(value, Ordering::Release);
                changed.store(true, Ordering::Release);
            }
            _ => unreachable!("set_int() called on a non-integer-gauge metric"),
        }
    }

    /// Sets a gauge to a floating point value.
    pub fn set_float(&self, value: f64) {
        match self {
            MutableMetric::GaugeFloat(_, v, changed) => {
                *v.lock() = value as f32;
                changed.store(true, Ordering::Release);
            }
            MutableMetric::GaugeDouble(_, v, changed) => {
                *v.lock() = value;
                changed.store(true, Ordering::Release);
            }
            _ => unreachable!("set_float() called on a non-float-gauge metric"),
        }
    }

    /// Adds a sample to a stat metric.
    pub fn add_sample(&self, value: f64) {
        match self {
            MutableMetric::Stat(stat, changed) => {
                stat.add(value);
                changed.store(true, Ordering::Release);
            }
            _ => unreachable!("add_sample() called on a non-stat metric"),
        }
    }

    /// Appends this metric's current sample(s) to `builder` if it passed the
    /// `changed`/`all` gate, then (for `all=false`) clears the `changed` flag.
    ///
    /// `spec.md` §9 pins `all=true` to also clear `changed`, so a mgmt-bean
    /// poll that forces a full snapshot doesn't cause the very next
    /// `all=false` tick to re-emit everything.
    pub fn snapshot(&self, builder: &mut dyn FnMut(AbstractMetric), all: bool) {
        let changed = self.changed_flag();
        if !all && !changed.load(Ordering::Acquire) {
            return;
        }

        match self {
            MutableMetric::CounterInt(info, v, _) => {
                builder(AbstractMetric::CounterInt(info.clone(), v.load(Ordering::Acquire)))
            }
            MutableMetric::CounterLong(info, v, _) => {
                builder(AbstractMetric::CounterLong(info.clone(), v.load(Ordering::Acquire)))
            }
            MutableMetric::GaugeInt(info, v, _) => {
                builder(AbstractMetric::GaugeInt(info.clone(), v.load(Ordering::Acquire)))
            }
            MutableMetric::GaugeLong(info, v, _) => {
                builder(AbstractMetric::GaugeLong(info.clone(), v.load(Ordering::Acquire)))
            }
            MutableMetric::GaugeFloat(info, v, _) => {
                builder(AbstractMetric::GaugeFloat(info.clone(), *v.lock()))
            }
            MutableMetric::GaugeDouble(info, v, _) => {
                builder(AbstractMetric::GaugeDouble(info.clone(), *v.lock()))
            }
            MutableMetric::Stat(stat, _) => {
                let snap = stat.snapshot();
                let name = stat.info().name().to_string();
                let description = stat.info().description().to_string();
                builder(AbstractMetric::GaugeLong(
                    MetricInfo::new(format!("{name}Num"), format!("{description} (sample count)")),
                    snap.count as i64,
                ));
                builder(AbstractMetric::GaugeDouble(
                    MetricInfo::new(format!("{name}Avg"), format!("{description} (average)")),
                    snap.avg,
                ));
                builder(AbstractMetric::GaugeDouble(
                    MetricInfo::new(format!("{name}Min"), format!("{description} (minimum)")),
                    snap.min,
                ));
                builder(AbstractMetric::GaugeDouble(
                    MetricInfo::new(format!("{name}Max"), format!("{description} (maximum)")),
                    snap.max,
                ));
            }
        }

        changed.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot_one(metric: &MutableMetric, all: bool) -> Option<AbstractMetric> {
        let mut out = None;
        metric.snapshot(
            &mut |m| {
                out = Some(m);
            },
            all,
        );
        out
    }

    #[test]
    fn counter_increments_and_saturates() {
        let metric = MutableMetric::counter_long(MetricInfo::named("requests"), 0);
        metric.incr(3);
        match snapshot_one(&metric, true) {
            Some(AbstractMetric::CounterLong(_, v)) => assert_eq!(v, 3),
            other => panic!("unexpected snapshot: {other:?}"),
        }

        let metric = MutableMetric::counter_long(MetricInfo::named("near_max"), i64::MAX - 1);
        metric.incr(2);
        match snapshot_one(&metric, true) {
            Some(AbstractMetric::CounterLong(_, v)) => assert_eq!(v, i64::MAX),
            other => panic!("unexpected snapshot: {other:?}"),
        }
    }

    #[test]
    fn negative_incr_is_a_no_op_for_both_counter_widths() {
        let int_metric = MutableMetric::counter_int(MetricInfo::named("int_requests"), 5);
        int_metric.incr(-3);
        match snapshot_one(&int_metric, true) {
            Some(AbstractMetric::CounterInt(_, v)) => assert_eq!(v, 5),
            other => panic!("unexpected snapshot: {other:?}"),
        }

        let long_metric = MutableMetric::counter_long(MetricInfo::named("long_requests"), 5);
        long_metric.incr(-3);
        match snapshot_one(&long_metric, true) {
            Some(AbstractMetric::CounterLong(_, v)) => assert_eq!(v, 5),
            other => panic!("unexpected snapshot: {other:?}"),
        }
    }

    #[test]
    fn changed_flag_gates_snapshot_when_not_all() {
        let metric = MutableMetric::gauge_long(MetricInfo::named("offset"), 0);
        // Freshly constructed metrics start out `changed`.
        assert!(snapshot_one(&metric, false).is_some());
        // Snapshot with all=false cleared the flag; a second one sees nothing new.
        assert!(snapshot_one(&metric, false).is_none());

        metric.set_int(42);
        assert!(snapshot_one(&metric, false).is_some());
    }

    #[test]
    fn all_true_also_clears_changed() {
        let metric = MutableMetric::gauge_int(MetricInfo::named("temp"), 5);
        assert!(snapshot_one(&metric, true).is_some());
        assert!(snapshot_one(&metric, false).is_none());
    }

    #[test]
    fn stat_accumulates_cumulative_by_default() {
        let stat = MutableStat::new(MetricInfo::named("latency"), "ops", "ms", true, false);
        stat.add(10.0);
        stat.add(20.0);
        let snap = stat.snapshot();
        assert_eq!(snap.count, 2);
        assert_eq!(snap.avg, 15.0);
        assert_eq!(snap.min, 10.0);
        assert_eq!(snap.max, 20.0);

        // Cumulative: another snapshot without new samples is unchanged.
        let snap2 = stat.snapshot();
        assert_eq!(snap2.count, 2);
    }

    #[test]
    fn stat_resets_when_configured() {
        let stat = MutableStat::new(MetricInfo::named("latency"), "ops", "ms", true, true);
        stat.add(10.0);
        let snap = stat.snapshot();
        assert_eq!(snap.count, 1);

        let snap2 = stat.snapshot();
        assert_eq!(snap2.count, 0);
    }

    #[test]
    fn stat_snapshot_expands_into_four_named_sub_metrics() {
        let stat = MutableStat::new(MetricInfo::named("latency"), "ops", "ms", true, false);
        stat.add(10.0);
        stat.add(20.0);
        let metric = MutableMetric::stat(stat);

        let mut emitted = Vec::new();
        metric.snapshot(&mut |m| emitted.push(m), true);

        assert_eq!(emitted.len(), 4);
        match &emitted[0] {
            AbstractMetric::GaugeLong(info, v) => {
                assert_eq!(info.name(), "latencyNum");
                assert_eq!(*v, 2);
            }
            other => panic!("unexpected: {other:?}"),
        }
        match &emitted[1] {
            AbstractMetric::GaugeDouble(info, v) => {
                assert_eq!(info.name(), "latencyAvg");
                assert_eq!(*v, 15.0);
            }
            other => panic!("unexpected: {other:?}"),
        }
        match &emitted[2] {
            AbstractMetric::GaugeDouble(info, v) => {
                assert_eq!(info.name(), "latencyMin");
                assert_eq!(*v, 10.0);
            }
            other => panic!("unexpected: {other:?}"),
        }
        match &emitted[3] {
            AbstractMetric::GaugeDouble(info, v) => {
                assert_eq!(info.name(), "latencyMax");
                assert_eq!(*v, 20.0);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
