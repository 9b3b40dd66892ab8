use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use pf_core::{EventType, MachineEvent};

/// Process-wide counters shared between the orchestrator and its observers.
#[derive(Clone, Default)]
pub struct MetricsRegistry {
    inner: Arc<MetricsInner>,
}

#[derive(Default)]
struct MetricsInner {
    ticks: AtomicU64,
    machine_events: AtomicU64,
    sensor_metrics: AtomicU64,
    quality_events: AtomicU64,
    anomalies_injected: AtomicU64,
    anomalies_ended: AtomicU64,
    publish_deferred: AtomicU64,
    rejected_transitions: AtomicU64,
    slowest_tick_us: AtomicU64,
}

impl MetricsRegistry {
    pub fn inc_ticks(&self, delta: u64) {
        self.inner.ticks.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn inc_machine_events(&self, delta: u64) {
        self.inner.machine_events.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn inc_sensor_metrics(&self, delta: u64) {
        self.inner.sensor_metrics.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn inc_quality_events(&self, delta: u64) {
        self.inner.quality_events.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn inc_publish_deferred(&self, delta: u64) {
        self.inner.publish_deferred.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn inc_rejected_transitions(&self, delta: u64) {
        self.inner.rejected_transitions.fetch_add(delta, Ordering::Relaxed);
    }

    /// Counts anomaly boundaries found among `events`.
    pub fn observe_anomalies(&self, events: &[MachineEvent]) {
        for ev in events {
            match ev.event_type {
                EventType::AnomalyInjected => {
                    self.inner.anomalies_injected.fetch_add(1, Ordering::Relaxed);
                }
                EventType::AnomalyEnded => {
                    self.inner.anomalies_ended.fetch_add(1, Ordering::Relaxed);
                }
                EventType::StatusChange | EventType::CycleComplete => {}
            }
        }
    }

    pub fn record_tick_duration(&self, elapsed: Duration) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.inner.slowest_tick_us.fetch_max(micros, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            ticks: self.inner.ticks.load(Ordering::Relaxed),
            machine_events: self.inner.machine_events.load(Ordering::Relaxed),
            sensor_metrics: self.inner.sensor_metrics.load(Ordering::Relaxed),
            quality_events: self.inner.quality_events.load(Ordering::Relaxed),
            anomalies_injected: self.inner.anomalies_injected.load(Ordering::Relaxed),
            anomalies_ended: self.inner.anomalies_ended.load(Ordering::Relaxed),
            publish_deferred: self.inner.publish_deferred.load(Ordering::Relaxed),
            rejected_transitions: self.inner.rejected_transitions.load(Ordering::Relaxed),
            slowest_tick_us: self.inner.slowest_tick_us.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub ticks: u64,
    pub machine_events: u64,
    pub sensor_metrics: u64,
    pub quality_events: u64,
    pub anomalies_injected: u64,
    pub anomalies_ended: u64,
    pub publish_deferred: u64,
    pub rejected_transitions: u64,
    pub slowest_tick_us: u64,
}

impl MetricsSnapshot {
    pub fn records(&self) -> u64 {
        self.machine_events + self.sensor_metrics + self.quality_events
    }

    pub fn to_json_line(&self, label: &str, elapsed: Option<Duration>) -> String {
        #[derive(Serialize)]
        struct Snapshot<'a> {
            label: &'a str,
            #[serde(flatten)]
            counters: &'a MetricsSnapshot,
            elapsed_ms: Option<u128>,
        }

        let payload = Snapshot {
            label,
            counters: self,
            elapsed_ms: elapsed.map(|d| d.as_millis()),
        };
        serde_json::to_string(&payload).unwrap_or_else(|_| String::from("{}"))
    }
}

pub struct EpochTimer {
    start: Instant,
}

impl EpochTimer {
    pub fn start() -> Self {
        Self { start: Instant::now() }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_counters() {
        let metrics = MetricsRegistry::default();
        let observer = metrics.clone();
        metrics.inc_ticks(2);
        metrics.inc_sensor_metrics(10);
        metrics.inc_machine_events(3);
        metrics.record_tick_duration(Duration::from_micros(40));
        metrics.record_tick_duration(Duration::from_micros(15));

        let snap = observer.snapshot();
        assert_eq!(snap.ticks, 2);
        assert_eq!(snap.records(), 13);
        assert_eq!(snap.slowest_tick_us, 40);
    }

    #[test]
    fn json_line_is_flat() {
        let metrics = MetricsRegistry::default();
        metrics.inc_publish_deferred(4);
        let line = metrics
            .snapshot()
            .to_json_line("final", Some(Duration::from_millis(1_500)));
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["label"], "final");
        assert_eq!(value["publish_deferred"], 4);
        assert_eq!(value["elapsed_ms"], 1_500);
    }
}
