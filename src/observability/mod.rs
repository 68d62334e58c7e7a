//! Observability for the rule cache
//!
//! - Counters and histograms per cache map via the `metrics` facade
//! - Optional Prometheus exporter

pub mod metrics;
pub mod recorder;

pub use self::metrics::{LoadKind, LookupOutcome};
pub use recorder::install_prometheus_recorder;
