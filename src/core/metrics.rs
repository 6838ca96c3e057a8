use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use parking_lot::RwLock;

/// Telemetry surface consumed by the core. Implementations are optional;
/// the store runs against `NullMetricsSink` when nobody is watching.
pub trait MetricsSink: Send + Sync {
    fn increment_counter(&self, name: &str);
    fn record_timer(&self, name: &str, nanos: u64);
    fn register_gauge(&self, name: &str, supplier: GaugeFn);
}

pub type GaugeFn = Box<dyn Fn() -> f64 + Send + Sync>;

/// Metric names the store emits.
pub mod names {
    pub const DOCUMENT_INSERT_COUNT: &str = "document.insert.count";
    pub const DOCUMENT_INSERT_LATENCY: &str = "document.insert.latency";
    pub const DOCUMENT_REMOVE_COUNT: &str = "document.remove.count";
    pub const DOCUMENT_REMOVE_LATENCY: &str = "document.remove.latency";
    pub const SEARCH_COUNT: &str = "search.count";
    pub const SEARCH_LATENCY: &str = "search.latency";
    pub const DOCUMENT_INSERT_QUEUE: &str = "document.insert.queue";
    pub const DOCUMENT_COUNT: &str = "document.count";
}

/// Discards everything.
pub struct NullMetricsSink;

impl MetricsSink for NullMetricsSink {
    fn increment_counter(&self, _name: &str) {}
    fn record_timer(&self, _name: &str, _nanos: u64) {}
    fn register_gauge(&self, _name: &str, _supplier: GaugeFn) {}
}

/// In-memory sink for tests and embedders that poll.
#[derive(Default)]
pub struct AtomicMetricsSink {
    counters: RwLock<HashMap<String, AtomicU64>>,
    timers: RwLock<HashMap<String, AtomicU64>>,
    gauges: RwLock<HashMap<String, GaugeFn>>,
}

impl AtomicMetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.counters
            .read()
            .get(name)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Total nanoseconds recorded under `name`.
    pub fn timer_total(&self, name: &str) -> u64 {
        self.timers
            .read()
            .get(name)
            .map(|t| t.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn gauge(&self, name: &str) -> Option<f64> {
        self.gauges.read().get(name).map(|g| g())
    }
}

impl MetricsSink for AtomicMetricsSink {
    fn increment_counter(&self, name: &str) {
        {
            let counters = self.counters.read();
            if let Some(counter) = counters.get(name) {
                counter.fetch_add(1, Ordering::Relaxed);
                return;
            }
        }
        let mut counters = self.counters.write();
        counters
            .entry(name.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    fn record_timer(&self, name: &str, nanos: u64) {
        {
            let timers = self.timers.read();
            if let Some(timer) = timers.get(name) {
                timer.fetch_add(nanos, Ordering::Relaxed);
                return;
            }
        }
        let mut timers = self.timers.write();
        timers
            .entry(name.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(nanos, Ordering::Relaxed);
    }

    fn register_gauge(&self, name: &str, supplier: GaugeFn) {
        self.gauges.write().insert(name.to_string(), supplier);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_and_timers_accumulate() {
        let sink = AtomicMetricsSink::new();
        sink.increment_counter("x");
        sink.increment_counter("x");
        sink.record_timer("t", 5);
        sink.record_timer("t", 7);
        assert_eq!(sink.counter("x"), 2);
        assert_eq!(sink.timer_total("t"), 12);
        assert_eq!(sink.counter("missing"), 0);
    }

    #[test]
    fn gauges_read_live_values() {
        let sink = AtomicMetricsSink::new();
        sink.register_gauge("g", Box::new(|| 4.5));
        assert_eq!(sink.gauge("g"), Some(4.5));
        assert_eq!(sink.gauge("missing"), None);
    }
}
