// ============================================
// RXCACHE - Cache & Quota Metrics
// ============================================

use std::collections::{BTreeMap, VecDeque};
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// Timing samples kept per name; older samples are dropped
const MAX_TIMING_SAMPLES: usize = 1000;

/// In-process counters and timings, owned by the composition root and shared
/// by the services through `Arc`.
pub struct Metrics {
    timers: RwLock<BTreeMap<String, VecDeque<Duration>>>,
    counters: RwLock<BTreeMap<String, u64>>,
    start_time: Instant,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            timers: RwLock::new(BTreeMap::new()),
            counters: RwLock::new(BTreeMap::new()),
            start_time: Instant::now(),
        }
    }

    pub fn record_time(&self, name: &str, duration: Duration) {
        if let Ok(mut timers) = self.timers.write() {
            let samples = timers.entry(name.to_string()).or_default();
            if samples.len() >= MAX_TIMING_SAMPLES {
                samples.pop_front();
            }
            samples.push_back(duration);
        }
    }

    /// Time an async operation and record the duration
    pub async fn time_async<F, Fut, T>(&self, name: &str, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        let start = Instant::now();
        let result = f().await;
        self.record_time(name, start.elapsed());
        result
    }

    pub fn increment(&self, name: &str) {
        if let Ok(mut counters) = self.counters.write() {
            *counters.entry(name.to_string()).or_insert(0) += 1;
        }
    }

    pub fn get_counter(&self, name: &str) -> u64 {
        self.counters
            .read()
            .ok()
            .and_then(|c| c.get(name).copied())
            .unwrap_or(0)
    }

    /// Share of lookups answered from the cache, exact or fuzzy
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.get_counter("cache.exact_hit") + self.get_counter("cache.fuzzy_hit");
        let total = hits + self.get_counter("cache.miss") + self.get_counter("cache.error");
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    pub fn get_timing_stats(&self, name: &str) -> Option<TimingStats> {
        let timers = self.timers.read().ok()?;
        let durations = timers.get(name)?;
        if durations.is_empty() {
            return None;
        }

        let mut sorted: Vec<Duration> = durations.iter().copied().collect();
        sorted.sort();
        let count = sorted.len();
        let total: Duration = sorted.iter().sum();

        Some(TimingStats {
            count,
            avg: total / count as u32,
            min: sorted[0],
            max: sorted[count - 1],
            p95: sorted[((count as f64 * 0.95) as usize).min(count - 1)],
        })
    }

    pub fn summary(&self) -> MetricsSummary {
        let names: Vec<String> = self
            .timers
            .read()
            .map(|t| t.keys().cloned().collect())
            .unwrap_or_default();

        MetricsSummary {
            uptime: self.start_time.elapsed(),
            timings: names
                .into_iter()
                .filter_map(|k| self.get_timing_stats(&k).map(|s| (k, s)))
                .collect(),
            counters: self.counters.read().map(|c| c.clone()).unwrap_or_default(),
            hit_ratio: self.hit_ratio(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TimingStats {
    pub count: usize,
    pub avg: Duration,
    pub min: Duration,
    pub max: Duration,
    pub p95: Duration,
}

#[derive(Debug)]
pub struct MetricsSummary {
    pub uptime: Duration,
    pub timings: BTreeMap<String, TimingStats>,
    pub counters: BTreeMap<String, u64>,
    pub hit_ratio: f64,
}

impl std::fmt::Display for MetricsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Uptime: {:?}", self.uptime)?;
        writeln!(f, "Cache hit ratio: {:.1}%", self.hit_ratio * 100.0)?;

        for (name, value) in &self.counters {
            writeln!(f, "  {}: {}", name, value)?;
        }
        for (name, stats) in &self.timings {
            writeln!(
                f,
                "  {}: count={}, avg={:?}, min={:?}, max={:?}, p95={:?}",
                name, stats.count, stats.avg, stats.min, stats.max, stats.p95
            )?;
        }
        Ok(())
    }
}
