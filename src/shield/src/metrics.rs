//! Prometheus metrics for shield observability

use crate::cache::CacheLookup;
use crate::types::OutcomeKind;
use parking_lot::RwLock;
use std::time::Duration;

/// Shield metrics snapshot
#[derive(Debug, Clone, Default)]
pub struct ShieldMetrics {
    /// Guarded field resolutions
    pub total_fields: u64,

    /// Fields allowed through to their resolver
    pub allowed_fields: u64,

    /// Fields rejected as forbidden
    pub denied_fields: u64,

    /// Fields rejected by input validation
    pub validation_failures: u64,

    /// Fields with no binding (resolved unguarded)
    pub unguarded_fields: u64,

    /// Rule outcomes served from the request cache
    pub cache_hits: u64,

    /// Rule outcomes shared with an in-flight evaluation
    pub cache_joins: u64,

    /// Rule outcomes computed
    pub cache_misses: u64,

    /// Rule faults (errors, panics, timeouts)
    pub rule_faults: u64,

    /// Authorization latency percentiles, computed when a snapshot is taken
    pub latency_p50_ms: f64,
    pub latency_p90_ms: f64,
    pub latency_p95_ms: f64,
    pub latency_p99_ms: f64,

    /// Average latency
    pub avg_latency_ms: f64,
}

impl ShieldMetrics {
    /// Share of cached lookups that did not evaluate the rule
    pub fn cache_hit_rate(&self) -> f64 {
        let saved = self.cache_hits + self.cache_joins;
        let total = saved + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            saved as f64 / total as f64
        }
    }

    /// Share of guarded fields that were allowed
    pub fn allow_rate(&self) -> f64 {
        if self.total_fields == 0 {
            0.0
        } else {
            self.allowed_fields as f64 / self.total_fields as f64
        }
    }
}

/// Metrics collector with Prometheus-compatible export
///
/// Shared by every request of a [`Shield`](crate::Shield).
pub struct MetricsCollector {
    metrics: RwLock<ShieldMetrics>,

    /// Recent latency samples (ms) for percentile calculation
    latency_samples: RwLock<Vec<f64>>,

    max_samples: usize,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            metrics: RwLock::new(ShieldMetrics::default()),
            latency_samples: RwLock::new(Vec::with_capacity(10_000)),
            max_samples: 10_000,
        }
    }

    /// Record the final outcome of a guarded field
    pub fn record_outcome(&self, kind: OutcomeKind, validation: bool) {
        let mut metrics = self.metrics.write();
        metrics.total_fields += 1;

        match kind {
            OutcomeKind::Allow => metrics.allowed_fields += 1,
            OutcomeKind::Deny if validation => metrics.validation_failures += 1,
            OutcomeKind::Deny | OutcomeKind::Error => metrics.denied_fields += 1,
        }
    }

    /// Record a field that had no binding
    pub fn record_unguarded(&self) {
        self.metrics.write().unguarded_fields += 1;
    }

    pub fn record_cache_lookup(&self, lookup: CacheLookup) {
        let mut metrics = self.metrics.write();
        match lookup {
            CacheLookup::Hit => metrics.cache_hits += 1,
            CacheLookup::Joined => metrics.cache_joins += 1,
            CacheLookup::Computed => metrics.cache_misses += 1,
        }
    }

    pub fn record_fault(&self) {
        self.metrics.write().rule_faults += 1;
    }

    /// Record authorization latency for one field
    pub fn record_latency(&self, latency: Duration) {
        let latency_ms = latency.as_secs_f64() * 1000.0;

        let mut samples = self.latency_samples.write();
        samples.push(latency_ms);

        if samples.len() > self.max_samples {
            samples.drain(0..1_000);
        }
    }

    /// Current metrics snapshot, with latency percentiles over the retained
    /// samples
    pub fn get_metrics(&self) -> ShieldMetrics {
        let mut metrics = self.metrics.read().clone();

        let mut sorted = self.latency_samples.read().clone();
        if sorted.is_empty() {
            return metrics;
        }
        sorted.sort_by(|a, b| a.total_cmp(b));

        metrics.avg_latency_ms = sorted.iter().sum::<f64>() / sorted.len() as f64;
        metrics.latency_p50_ms = Self::percentile(&sorted, 0.50);
        metrics.latency_p90_ms = Self::percentile(&sorted, 0.90);
        metrics.latency_p95_ms = Self::percentile(&sorted, 0.95);
        metrics.latency_p99_ms = Self::percentile(&sorted, 0.99);
        metrics
    }

    /// Number of retained latency samples
    pub fn latency_samples(&self) -> usize {
        self.latency_samples.read().len()
    }

    pub fn reset(&self) {
        *self.metrics.write() = ShieldMetrics::default();
        self.latency_samples.write().clear();
    }

    /// Export metrics in Prometheus text format
    pub fn export_prometheus(&self) -> String {
        let metrics = self.get_metrics();

        format!(
            r#"# HELP shield_fields_total Guarded field resolutions
# TYPE shield_fields_total counter
shield_fields_total {}

# HELP shield_allowed_total Fields allowed
# TYPE shield_allowed_total counter
shield_allowed_total {}

# HELP shield_denied_total Fields rejected as forbidden
# TYPE shield_denied_total counter
shield_denied_total {}

# HELP shield_validation_failures_total Fields rejected by input validation
# TYPE shield_validation_failures_total counter
shield_validation_failures_total {}

# HELP shield_unguarded_total Fields resolved without a binding
# TYPE shield_unguarded_total counter
shield_unguarded_total {}

# HELP shield_cache_hits_total Rule outcomes served from the request cache
# TYPE shield_cache_hits_total counter
shield_cache_hits_total {}

# HELP shield_cache_joins_total Rule outcomes shared with an in-flight evaluation
# TYPE shield_cache_joins_total counter
shield_cache_joins_total {}

# HELP shield_cache_misses_total Rule outcomes computed
# TYPE shield_cache_misses_total counter
shield_cache_misses_total {}

# HELP shield_rule_faults_total Rule errors, panics and timeouts
# TYPE shield_rule_faults_total counter
shield_rule_faults_total {}

# HELP shield_latency_seconds Authorization latency percentiles
# TYPE shield_latency_seconds summary
shield_latency_seconds{{quantile="0.5"}} {}
shield_latency_seconds{{quantile="0.9"}} {}
shield_latency_seconds{{quantile="0.95"}} {}
shield_latency_seconds{{quantile="0.99"}} {}
"#,
            metrics.total_fields,
            metrics.allowed_fields,
            metrics.denied_fields,
            metrics.validation_failures,
            metrics.unguarded_fields,
            metrics.cache_hits,
            metrics.cache_joins,
            metrics.cache_misses,
            metrics.rule_faults,
            metrics.latency_p50_ms / 1000.0,
            metrics.latency_p90_ms / 1000.0,
            metrics.latency_p95_ms / 1000.0,
            metrics.latency_p99_ms / 1000.0,
        )
    }

    fn percentile(sorted: &[f64], p: f64) -> f64 {
        if sorted.is_empty() {
            return 0.0;
        }

        let idx = ((sorted.len() as f64) * p) as usize;
        sorted[idx.min(sorted.len() - 1)]
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
