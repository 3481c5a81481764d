//! Orchestrator for a pluggable, in-process metrics collection and
//! publishing subsystem.
//!
//! Application code declares counters, gauges, and statistical summaries
//! through [`metrics_system_core`]; this crate periodically samples them
//! and delivers point-in-time snapshots to one or more pluggable output
//! destinations at possibly differing cadences, surviving slow or failing
//! destinations without blocking producers.
//!
//! # Orchestrator
//!
//! An [`Orchestrator`] owns the registry of sources and sinks for one
//! metrics prefix, a single sampling timer, and a self-reporting source
//! exposing its own health (`NumActiveSources`, a per-sink `dropped`
//! gauge, and so on). [`DefaultMetricsSystem`] keeps one orchestrator per
//! prefix alive for the life of the process, the way a logging facade
//! keeps one logger per module path.
//!
//! ```no_run
//! use metrics_system::{Config, DefaultMetricsSystem};
//!
//! let orchestrator = DefaultMetricsSystem::instance_or_init("myapp");
//! orchestrator.init(Config::new());
//! ```
//!
//! # Sources and sinks
//!
//! A source contributes metric samples when asked; a sink receives and
//! externalizes them. Neither trait depends on this crate's orchestration
//! machinery -- see [`metrics_system_core::Source`] and
//! [`metrics_system_core::Sink`].
//!
//! # Declarative-style sources
//!
//! [`SourceBuilder`] replaces the annotation-driven binding this kind of
//! system traditionally uses with an explicit builder chain, since Rust has
//! no runtime reflection to walk:
//!
//! ```
//! use metrics_system::SourceBuilder;
//! use metrics_system_core::intern::MetricInfo;
//!
//! let (source, info) = SourceBuilder::new(MetricInfo::named("widgets"))
//!     .counter_long("requests", "request count", 0)
//!     .build()
//!     .expect("at least one metric was declared");
//! assert_eq!(info.name(), "widgets");
//! ```
#![deny(missing_docs)]
#![warn(unused_extern_crates)]

pub mod callback;
pub mod config;
pub mod default_system;
pub mod orchestrator;
pub mod sink_adapter;
pub mod source_adapter;
pub mod source_builder;

pub use config::Config;
pub use default_system::DefaultMetricsSystem;
pub use orchestrator::{Orchestrator, OrchestratorState};
pub use sink_adapter::{Buffer, SinkAdapter, SinkAdapterConfig};
pub use source_adapter::{AdapterState, MetricsBean, SourceAdapter};
pub use source_builder::SourceBuilder;
