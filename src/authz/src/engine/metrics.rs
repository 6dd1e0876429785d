//! Prometheus-style metrics for authorization checks

use std::time::Duration;

use parking_lot::RwLock;

/// Authorization check metrics
#[derive(Debug, Clone, Default)]
pub struct EngineMetrics {
    /// Total number of access checks
    pub total_checks: u64,

    /// Number of allowed decisions
    pub allowed_decisions: u64,

    /// Number of denied decisions
    pub denied_decisions: u64,

    /// Access entries found in the cache
    pub cache_hits: u64,

    /// Access entries that had to be loaded
    pub cache_misses: u64,

    /// Loads restarted after a cache conflict
    pub load_retries: u64,

    /// Latency percentiles (p50, p90, p99)
    pub latency_p50_ms: f64,
    pub latency_p90_ms: f64,
    pub latency_p99_ms: f64,

    /// Average latency
    pub avg_latency_ms: f64,

    /// Checks that failed with an error
    pub error_count: u64,
}

impl EngineMetrics {
    /// Calculate cache hit rate
    pub fn cache_hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 / total as f64
        }
    }

    /// Calculate allow rate
    pub fn allow_rate(&self) -> f64 {
        let total = self.allowed_decisions + self.denied_decisions;
        if total == 0 {
            0.0
        } else {
            self.allowed_decisions as f64 / total as f64
        }
    }
}

/// Collects check metrics from many threads
pub struct AuthorizationMetrics {
    metrics: RwLock<EngineMetrics>,

    /// Recent latency samples for percentile calculation
    latency_samples: RwLock<Vec<f64>>,

    max_samples: usize,

    enabled: bool,
}

impl AuthorizationMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::with_enabled(true)
    }

    /// Create a collector that records nothing when `enabled` is false
    pub fn with_enabled(enabled: bool) -> Self {
        Self {
            metrics: RwLock::new(EngineMetrics::default()),
            latency_samples: RwLock::new(Vec::new()),
            max_samples: 10_000,
            enabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn record_cache_hit(&self) {
        self.update(|m| m.cache_hits += 1);
    }

    pub fn record_cache_miss(&self) {
        self.update(|m| m.cache_misses += 1);
    }

    pub fn record_load_retry(&self) {
        self.update(|m| m.load_retries += 1);
    }

    pub fn record_error(&self) {
        self.update(|m| m.error_count += 1);
    }

    /// Record the outcome of one check
    pub fn record_decision(&self, allowed: bool) {
        self.update(|m| {
            m.total_checks += 1;
            if allowed {
                m.allowed_decisions += 1;
            } else {
                m.denied_decisions += 1;
            }
        });
    }

    /// Record check latency
    pub fn record_latency(&self, latency: Duration) {
        if !self.enabled {
            return;
        }
        let latency_ms = latency.as_secs_f64() * 1000.0;

        let mut sorted = {
            let mut samples = self.latency_samples.write();
            samples.push(latency_ms);
            if samples.len() > self.max_samples {
                samples.drain(0..self.max_samples / 10);
            }
            samples.clone()
        };
        sorted.sort_by(f64::total_cmp);

        let mut metrics = self.metrics.write();
        metrics.avg_latency_ms = sorted.iter().sum::<f64>() / sorted.len() as f64;
        metrics.latency_p50_ms = percentile(&sorted, 0.50);
        metrics.latency_p90_ms = percentile(&sorted, 0.90);
        metrics.latency_p99_ms = percentile(&sorted, 0.99);
    }

    /// Current metrics snapshot
    pub fn snapshot(&self) -> EngineMetrics {
        self.metrics.read().clone()
    }

    /// Reset all metrics
    pub fn reset(&self) {
        *self.metrics.write() = EngineMetrics::default();
        self.latency_samples.write().clear();
    }

    /// Export metrics in Prometheus text format
    pub fn export_prometheus(&self) -> String {
        let metrics = self.metrics.read();

        format!(
            r#"# HELP wikisec_checks_total Total number of access checks
# TYPE wikisec_checks_total counter
wikisec_checks_total {}

# HELP wikisec_allowed_total Number of allowed decisions
# TYPE wikisec_allowed_total counter
wikisec_allowed_total {}

# HELP wikisec_denied_total Number of denied decisions
# TYPE wikisec_denied_total counter
wikisec_denied_total {}

# HELP wikisec_cache_hits_total Access cache hits
# TYPE wikisec_cache_hits_total counter
wikisec_cache_hits_total {}

# HELP wikisec_cache_misses_total Access cache misses
# TYPE wikisec_cache_misses_total counter
wikisec_cache_misses_total {}

# HELP wikisec_load_retries_total Cache loads restarted after a conflict
# TYPE wikisec_load_retries_total counter
wikisec_load_retries_total {}

# HELP wikisec_check_latency_seconds Check latency percentiles
# TYPE wikisec_check_latency_seconds summary
wikisec_check_latency_seconds{{quantile="0.5"}} {}
wikisec_check_latency_seconds{{quantile="0.9"}} {}
wikisec_check_latency_seconds{{quantile="0.99"}} {}

# HELP wikisec_errors_total Checks that failed with an error
# TYPE wikisec_errors_total counter
wikisec_errors_total {}
"#,
            metrics.total_checks,
            metrics.allowed_decisions,
            metrics.denied_decisions,
            metrics.cache_hits,
            metrics.cache_misses,
            metrics.load_retries,
            metrics.latency_p50_ms / 1000.0,
            metrics.latency_p90_ms / 1000.0,
            metrics.latency_p99_ms / 1000.0,
            metrics.error_count,
        )
    }

    fn update(&self, f: impl FnOnce(&mut EngineMetrics)) {
        if self.enabled {
            f(&mut *self.metrics.write());
        }
    }
}

impl Default for AuthorizationMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Percentile of already sorted samples
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() as f64) * p) as usize;
    sorted[idx.min(sorted.len() - 1)]
}
