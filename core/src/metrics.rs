use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, Default)]
pub struct ExpansionMetrics {
    pub total_expands: u64,
    pub cache_hits: u64,
    pub remote_fetches: u64,
    pub failed_expands: u64,
    pub latencies: VecDeque<u64>, // microseconds
}

#[derive(Debug, Clone, Default)]
pub struct CollapseMetrics {
    pub total_collapses: u64,
    pub cleared: u64,
    pub nodes_hidden: u64,
    pub nodes_deleted: u64,
}

#[derive(Clone)]
pub struct MetricsCollector {
    state: Arc<Mutex<MetricsState>>,
}

struct MetricsState {
    expansion: ExpansionMetrics,
    collapse: CollapseMetrics,
    max_history: usize,
}

impl MetricsCollector {
    pub fn new(max_history: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(MetricsState {
                expansion: ExpansionMetrics::default(),
                collapse: CollapseMetrics::default(),
                max_history,
            })),
        }
    }

    // A poisoned lock only means a panic mid-update of plain counters.
    fn lock(&self) -> MutexGuard<'_, MetricsState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn record_expand(&self, latency_us: u64, is_cache_hit: bool) {
        let mut state = self.lock();
        state.expansion.total_expands += 1;
        if is_cache_hit {
            state.expansion.cache_hits += 1;
        } else {
            state.expansion.remote_fetches += 1;
        }
        state.expansion.latencies.push_back(latency_us);
        if state.expansion.latencies.len() > state.max_history {
            state.expansion.latencies.pop_front();
        }
    }

    pub fn record_failed_expand(&self) {
        self.lock().expansion.failed_expands += 1;
    }

    pub fn record_collapse(&self, hidden: usize, deleted: usize, cleared: bool) {
        let mut state = self.lock();
        state.collapse.total_collapses += 1;
        if cleared {
            state.collapse.cleared += 1;
        }
        state.collapse.nodes_hidden += hidden as u64;
        state.collapse.nodes_deleted += deleted as u64;
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let state = self.lock();
        let e = &state.expansion;
        let c = &state.collapse;

        let mut sorted_latencies: Vec<u64> = e.latencies.iter().copied().collect();
        sorted_latencies.sort_unstable();

        let p50 = percentile(&sorted_latencies, 50.0);
        let p95 = percentile(&sorted_latencies, 95.0);
        let p99 = percentile(&sorted_latencies, 99.0);

        let hit_rate = if e.total_expands > 0 {
            e.cache_hits as f32 / e.total_expands as f32
        } else {
            0.0
        };

        MetricsSnapshot {
            total_expands: e.total_expands,
            cache_hits: e.cache_hits,
            remote_fetches: e.remote_fetches,
            failed_expands: e.failed_expands,
            hit_rate,
            p50,
            p95,
            p99,
            history_count: e.latencies.len(),
            total_collapses: c.total_collapses,
            cleared_collapses: c.cleared,
            nodes_hidden: c.nodes_hidden,
            nodes_deleted: c.nodes_deleted,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new(1024)
    }
}

fn percentile(sorted: &[u64], p: f32) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let idx = ((p / 100.0) * (sorted.len() as f32)).ceil() as usize;
    sorted[idx.saturating_sub(1).min(sorted.len() - 1)]
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MetricsSnapshot {
    pub total_expands: u64,
    pub cache_hits: u64,
    pub remote_fetches: u64,
    pub failed_expands: u64,
    pub hit_rate: f32,
    pub p50: u64,
    pub p95: u64,
    pub p99: u64,
    pub history_count: usize,
    pub total_collapses: u64,
    pub cleared_collapses: u64,
    pub nodes_hidden: u64,
    pub nodes_deleted: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate_and_history_window() {
        let metrics = MetricsCollector::new(2);
        metrics.record_expand(10, false);
        metrics.record_expand(20, true);
        metrics.record_expand(30, true);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_expands, 3);
        assert_eq!(snapshot.remote_fetches, 1);
        assert_eq!(snapshot.cache_hits, 2);
        assert_eq!(snapshot.history_count, 2);
        assert!((snapshot.hit_rate - 2.0 / 3.0).abs() < 1e-6);
        assert_eq!(snapshot.p99, 30);
    }

    #[test]
    fn test_collapse_counters() {
        let metrics = MetricsCollector::default();
        metrics.record_collapse(3, 0, false);
        metrics.record_collapse(2, 2, true);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_collapses, 2);
        assert_eq!(snapshot.cleared_collapses, 1);
        assert_eq!(snapshot.nodes_hidden, 5);
        assert_eq!(snapshot.nodes_deleted, 2);
    }
}
