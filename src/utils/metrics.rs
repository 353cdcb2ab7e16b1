use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Latency samples kept per upstream before the oldest are dropped
const MAX_LATENCY_SAMPLES: usize = 4096;

/// Global metrics collector for the application.
///
/// Tracks scans, cache performance, quota rejections, upstream latency and
/// reminder outcomes. Thread-safe and cheap to clone.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    // Analysis
    scans_total: AtomicUsize,
    scans_limited: AtomicUsize,
    cache_hits: AtomicUsize,
    cache_misses: AtomicUsize,
    interpretation_fallbacks: AtomicUsize,

    // Upstream calls
    upstream_calls_success: AtomicUsize,
    upstream_calls_failed: AtomicUsize,
    upstream_tokens: AtomicU64,
    upstream_latency_ms: RwLock<Vec<u64>>,

    // Reminders
    reminder_runs: AtomicUsize,
    notifications_sent: AtomicUsize,
    notifications_skipped: AtomicUsize,
    notifications_failed: AtomicUsize,
    tokens_cleared: AtomicUsize,

    // Per-endpoint request counters
    endpoint_counters: DashMap<String, AtomicUsize>,

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                scans_total: AtomicUsize::new(0),
                scans_limited: AtomicUsize::new(0),
                cache_hits: AtomicUsize::new(0),
                cache_misses: AtomicUsize::new(0),
                interpretation_fallbacks: AtomicUsize::new(0),
                upstream_calls_success: AtomicUsize::new(0),
                upstream_calls_failed: AtomicUsize::new(0),
                upstream_tokens: AtomicU64::new(0),
                upstream_latency_ms: RwLock::new(Vec::new()),
                reminder_runs: AtomicUsize::new(0),
                notifications_sent: AtomicUsize::new(0),
                notifications_skipped: AtomicUsize::new(0),
                notifications_failed: AtomicUsize::new(0),
                tokens_cleared: AtomicUsize::new(0),
                endpoint_counters: DashMap::new(),
                start_time: Instant::now(),
            }),
        }
    }

    // Analysis
    /// Counted once the payload is present, before the quota decides
    pub fn record_scan(&self) {
        self.inner.scans_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_scan_limited(&self) {
        self.inner.scans_limited.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.inner.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.inner.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_interpretation_fallback(&self) {
        self.inner.interpretation_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    // Upstream
    pub fn record_upstream_call(&self, success: bool, duration: Duration, tokens: u64) {
        if success {
            self.inner.upstream_calls_success.fetch_add(1, Ordering::Relaxed);
        } else {
            self.inner.upstream_calls_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.inner.upstream_tokens.fetch_add(tokens, Ordering::Relaxed);

        let mut samples = self.inner.upstream_latency_ms.write();
        if samples.len() >= MAX_LATENCY_SAMPLES {
            samples.remove(0);
        }
        samples.push(duration.as_millis() as u64);
    }

    // Reminders
    pub fn record_reminder_run(&self) {
        self.inner.reminder_runs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_notification_sent(&self) {
        self.inner.notifications_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_notification_skipped(&self) {
        self.inner.notifications_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_notification_failed(&self) {
        self.inner.notifications_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_token_cleared(&self) {
        self.inner.tokens_cleared.fetch_add(1, Ordering::Relaxed);
    }

    // Endpoint Metrics
    pub fn record_endpoint_request(&self, endpoint: &str) {
        self.inner
            .endpoint_counters
            .entry(endpoint.to_string())
            .or_insert_with(|| AtomicUsize::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    // Get snapshot for reporting
    pub fn snapshot(&self) -> MetricsSnapshot {
        let latency = self.inner.upstream_latency_ms.read();
        let upstream_latency_avg_ms = avg(&latency);
        let upstream_latency_p95_ms = percentile(&latency, 0.95);
        drop(latency);

        let cache_hits = self.inner.cache_hits.load(Ordering::Relaxed);
        let cache_misses = self.inner.cache_misses.load(Ordering::Relaxed);
        let cache_total = cache_hits + cache_misses;
        let cache_hit_rate = if cache_total > 0 {
            cache_hits as f64 / cache_total as f64
        } else {
            0.0
        };

        let mut endpoint_requests: Vec<(String, usize)> = self
            .inner
            .endpoint_counters
            .iter()
            .map(|e| (e.key().clone(), e.value().load(Ordering::Relaxed)))
            .collect();
        endpoint_requests.sort();

        MetricsSnapshot {
            scans_total: self.inner.scans_total.load(Ordering::Relaxed),
            scans_limited: self.inner.scans_limited.load(Ordering::Relaxed),
            cache_hits,
            cache_misses,
            cache_hit_rate,
            interpretation_fallbacks: self.inner.interpretation_fallbacks.load(Ordering::Relaxed),
            upstream_calls_success: self.inner.upstream_calls_success.load(Ordering::Relaxed),
            upstream_calls_failed: self.inner.upstream_calls_failed.load(Ordering::Relaxed),
            upstream_tokens: self.inner.upstream_tokens.load(Ordering::Relaxed),
            upstream_latency_avg_ms,
            upstream_latency_p95_ms,
            reminder_runs: self.inner.reminder_runs.load(Ordering::Relaxed),
            notifications_sent: self.inner.notifications_sent.load(Ordering::Relaxed),
            notifications_skipped: self.inner.notifications_skipped.load(Ordering::Relaxed),
            notifications_failed: self.inner.notifications_failed.load(Ordering::Relaxed),
            tokens_cleared: self.inner.tokens_cleared.load(Ordering::Relaxed),
            endpoint_requests,
            uptime_seconds: self.inner.start_time.elapsed().as_secs(),
        }
    }

    /// Generate Prometheus-format metrics
    pub fn to_prometheus(&self) -> String {
        let snapshot = self.snapshot();
        let mut out = format!(
            r#"# HELP drink_scans_total Drink scans attempted, including ones refused by the quota
# TYPE drink_scans_total counter
drink_scans_total {{}} {}

# HELP drink_scans_limited_total Scans refused by the daily quota
# TYPE drink_scans_limited_total counter
drink_scans_limited_total {{}} {}

# HELP analysis_cache_hit_rate Analysis cache hit rate (0.0 to 1.0)
# TYPE analysis_cache_hit_rate gauge
analysis_cache_hit_rate {{}} {}

# HELP interpretation_fallbacks_total LLM responses replaced by the default result
# TYPE interpretation_fallbacks_total counter
interpretation_fallbacks_total {{}} {}

# HELP upstream_calls_total Remote service calls
# TYPE upstream_calls_total counter
upstream_calls_total {{outcome="success"}} {}
upstream_calls_total {{outcome="failure"}} {}

# HELP upstream_latency_avg_ms Average remote call latency in milliseconds
# TYPE upstream_latency_avg_ms gauge
upstream_latency_avg_ms {{}} {}

# HELP notifications_total Reminder outcomes
# TYPE notifications_total counter
notifications_total {{outcome="sent"}} {}
notifications_total {{outcome="skipped"}} {}
notifications_total {{outcome="failed"}} {}

# HELP push_tokens_cleared_total Invalid device tokens removed
# TYPE push_tokens_cleared_total counter
push_tokens_cleared_total {{}} {}

# HELP uptime_seconds Application uptime in seconds
# TYPE uptime_seconds counter
uptime_seconds {{}} {}
"#,
            snapshot.scans_total,
            snapshot.scans_limited,
            snapshot.cache_hit_rate,
            snapshot.interpretation_fallbacks,
            snapshot.upstream_calls_success,
            snapshot.upstream_calls_failed,
            snapshot.upstream_latency_avg_ms,
            snapshot.notifications_sent,
            snapshot.notifications_skipped,
            snapshot.notifications_failed,
            snapshot.tokens_cleared,
            snapshot.uptime_seconds,
        );

        if !snapshot.endpoint_requests.is_empty() {
            out.push_str("\n# HELP http_requests_total Requests per endpoint\n");
            out.push_str("# TYPE http_requests_total counter\n");
            for (endpoint, count) in &snapshot.endpoint_requests {
                out.push_str(&format!(
                    "http_requests_total {{endpoint=\"{}\"}} {}\n",
                    endpoint, count
                ));
            }
        }

        out
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub scans_total: usize,
    pub scans_limited: usize,
    pub cache_hits: usize,
    pub cache_misses: usize,
    pub cache_hit_rate: f64,
    pub interpretation_fallbacks: usize,
    pub upstream_calls_success: usize,
    pub upstream_calls_failed: usize,
    pub upstream_tokens: u64,
    pub upstream_latency_avg_ms: u64,
    pub upstream_latency_p95_ms: u64,
    pub reminder_runs: usize,
    pub notifications_sent: usize,
    pub notifications_skipped: usize,
    pub notifications_failed: usize,
    pub tokens_cleared: usize,
    pub endpoint_requests: Vec<(String, usize)>,
    pub uptime_seconds: u64,
}

fn percentile(values: &[u64], p: f64) -> u64 {
    if values.is_empty() {
        return 0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let idx = ((values.len() as f64 - 1.0) * p) as usize;
    sorted[idx]
}

fn avg(values: &[u64]) -> u64 {
    if values.is_empty() {
        return 0;
    }
    values.iter().sum::<u64>() / values.len() as u64
}
