//! Prometheus-style metrics for the rule cache
//!
//! Label cardinality is bounded by construction: the `cache` label is one of
//! the three static cache names and the remaining labels are fixed enums.
//! Keys (filters, usernames) never appear in labels.
//!
//! Without an installed recorder every call here is a no-op.

use std::time::Duration;

use metrics::{counter, histogram};

/// Outcome of a cache lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupOutcome {
    Hit,
    Miss,
}

impl LookupOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            LookupOutcome::Hit => "hit",
            LookupOutcome::Miss => "miss",
        }
    }
}

/// Why the loader was called
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadKind {
    /// Synchronous load on a miss or expired entry
    Load,
    /// Background reload of a stale entry
    Refresh,
}

impl LoadKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadKind::Load => "load",
            LoadKind::Refresh => "refresh",
        }
    }
}

pub fn record_lookup(cache: &'static str, outcome: LookupOutcome) {
    counter!(
        "rule_cache_requests_total",
        "cache" => cache,
        "result" => outcome.as_str()
    ).increment(1);
}

pub fn record_load(cache: &'static str, kind: LoadKind, success: bool, duration: Duration) {
    let status = if success { "success" } else { "error" };

    counter!(
        "rule_cache_loads_total",
        "cache" => cache,
        "kind" => kind.as_str(),
        "status" => status
    ).increment(1);

    histogram!(
        "rule_cache_load_duration_seconds",
        "cache" => cache,
        "kind" => kind.as_str()
    ).record(duration.as_secs_f64());
}

pub fn record_eviction(cache: &'static str) {
    counter!("rule_cache_evictions_total", "cache" => cache).increment(1);
}
