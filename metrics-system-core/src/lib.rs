//! Foundational data model for `metrics-system`.
//!
//! This crate holds the pieces that are shared between the orchestrator
//! (`metrics-system`) and anything that plugs into it: the metric value
//! types, the `MetricInfo`/`Tag` interning pool, the per-source `Registry`,
//! the `Collector`/`RecordBuilder` pipeline that assembles a `Record` during
//! one sampling pass, and the `Source`/`Sink`/`Filter`/`Callback` contracts
//! that external collaborators implement.
//!
//! # Metrics
//!
//! Counters, gauges, and stats are the three kinds of metric a `Registry`
//! can hold. Counters are monotonic; gauges can move up or down; stats
//! accumulate a rolling count/sum/min/max over a set of samples.
//!
//! # Records, buffers, and snapshots
//!
//! A sampling pass produces a buffer: an ordered list of `(source name,
//! records)` entries, assembled by the orchestrator crate. Each `Record` is
//! a named group of tags and metric samples, produced by a `RecordBuilder`
//! during that source's turn at the `Collector`.
#![deny(missing_docs)]
#![warn(unused_extern_crates)]

pub mod callback;
pub mod collector;
pub mod error;
pub mod filter;
pub mod intern;
pub mod metric;
pub mod registry;
pub mod sink;
pub mod source;

pub use callback::Callback;
pub use collector::{Collector, Record, RecordBuilder};
pub use error::{
    CallbackError, ConfigError, DeliveryError, RegistryError, SourceBuilderError,
    SourceSnapshotError,
};
pub use filter::{AcceptAll, Filter, NameSet};
pub use intern::{MetricInfo, Tag};
pub use metric::{AbstractMetric, MutableMetric, MutableStat, StatSnapshot};
pub use registry::Registry;
pub use sink::Sink;
pub use source::Source;
