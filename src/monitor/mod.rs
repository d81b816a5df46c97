//! System resource monitoring.
//!
//! A background sampler snapshots cpu, memory, and disk utilization into a
//! ring buffer and derives a health score consumed by the throttling
//! controller. Sampler failures are logged and never propagate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::utils::config::MonitorSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Cpu,
    Memory,
    Disk,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    Warning,
    Critical,
    Emergency,
}

/// Complete resource snapshot at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub timestamp: DateTime<Utc>,
    pub cpu_percent: f64,
    pub cpu_count: usize,
    pub memory_percent: f64,
    pub memory_total_kb: u64,
    pub memory_available_kb: u64,
    pub disk_percent: f64,
    pub network_sent_bytes: u64,
    pub network_recv_bytes: u64,
    pub process_count: u64,
    pub load_average: Option<[f64; 3]>,
}

impl ResourceSnapshot {
    /// Weighted health score in [0, 100]; higher is healthier.
    #[must_use]
    pub fn health_score(&self) -> f64 {
        let cpu_score = (100.0 - self.cpu_percent).max(0.0);
        let memory_score = (100.0 - self.memory_percent).max(0.0);
        let disk_score = (100.0 - self.disk_percent).max(0.0);
        (cpu_score * 0.4 + memory_score * 0.4 + disk_score * 0.2).clamp(0.0, 100.0)
    }
}

/// Sampler closure so tests can inject synthetic readings.
pub type ResourceSampler = Arc<dyn Fn() -> ResourceSnapshot + Send + Sync>;

type AlertCallback = Arc<dyn Fn(ResourceKind, AlertLevel, f64) + Send + Sync>;

/// Live system resource monitor with a bounded history.
pub struct SystemResourceMonitor {
    config: MonitorSettings,
    sampler: ResourceSampler,
    history: Mutex<VecDeque<ResourceSnapshot>>,
    alert_callbacks: Mutex<Vec<AlertCallback>>,
    running: AtomicBool,
}

impl SystemResourceMonitor {
    #[must_use]
    pub fn new(config: MonitorSettings) -> Self {
        Self::with_sampler(config, Arc::new(collect_system_snapshot))
    }

    /// Build a monitor with a custom sampler; used by tests and stubbed
    /// deployments.
    #[must_use]
    pub fn with_sampler(config: MonitorSettings, sampler: ResourceSampler) -> Self {
        Self {
            config,
            sampler,
            history: Mutex::new(VecDeque::new()),
            alert_callbacks: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
        }
    }

    /// Take a fresh snapshot without touching the history.
    #[must_use]
    pub fn current_snapshot(&self) -> ResourceSnapshot {
        (self.sampler)()
    }

    /// Health score of a fresh snapshot.
    #[must_use]
    pub fn health_score(&self) -> f64 {
        self.current_snapshot().health_score()
    }

    /// Overloaded iff any resource is at or past its critical threshold.
    #[must_use]
    pub fn is_overloaded(&self) -> bool {
        let snapshot = self.current_snapshot();
        snapshot.cpu_percent >= self.config.cpu_critical
            || snapshot.memory_percent >= self.config.memory_critical
            || snapshot.disk_percent >= self.config.disk_critical
    }

    pub async fn add_alert_callback<F>(&self, callback: F)
    where
        F: Fn(ResourceKind, AlertLevel, f64) + Send + Sync + 'static,
    {
        self.alert_callbacks.lock().await.push(Arc::new(callback));
    }

    pub async fn history(&self, samples: usize) -> Vec<ResourceSnapshot> {
        let history = self.history.lock().await;
        history.iter().rev().take(samples).rev().cloned().collect()
    }

    /// Start the background sampler loop.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("resource monitor already running");
            return;
        }
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            monitor.sampling_loop().await;
        });
        info!("resource monitoring started");
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        info!("resource monitoring stopped");
    }

    async fn sampling_loop(self: Arc<Self>) {
        let interval = Duration::from_secs_f64(self.config.sampling_interval_secs.max(0.1));
        let mut ticker = tokio::time::interval(interval);

        while self.running.load(Ordering::SeqCst) {
            ticker.tick().await;

            let snapshot = self.current_snapshot();
            self.check_alerts(&snapshot).await;

            let mut history = self.history.lock().await;
            if history.len() >= self.config.history_size {
                history.pop_front();
            }
            history.push_back(snapshot);
        }
    }

    async fn check_alerts(&self, snapshot: &ResourceSnapshot) {
        let checks = [
            (
                ResourceKind::Cpu,
                snapshot.cpu_percent,
                self.config.cpu_warning,
                self.config.cpu_critical,
                self.config.cpu_emergency,
            ),
            (
                ResourceKind::Memory,
                snapshot.memory_percent,
                self.config.memory_warning,
                self.config.memory_critical,
                self.config.memory_emergency,
            ),
            (
                ResourceKind::Disk,
                snapshot.disk_percent,
                self.config.disk_warning,
                self.config.disk_critical,
                self.config.disk_emergency,
            ),
        ];

        let callbacks = self.alert_callbacks.lock().await.clone();
        for (kind, value, warning, critical, emergency) in checks {
            let level = if value >= emergency {
                Some(AlertLevel::Emergency)
            } else if value >= critical {
                Some(AlertLevel::Critical)
            } else if value >= warning {
                Some(AlertLevel::Warning)
            } else {
                None
            };

            if let Some(level) = level {
                debug!(?kind, ?level, value, "resource threshold crossed");
                for callback in &callbacks {
                    callback(kind, level, value);
                }
            }
        }
    }
}

/// Probe the running system. Every probe failure degrades to a neutral
/// reading rather than propagating.
fn collect_system_snapshot() -> ResourceSnapshot {
    let cpu_count = num_cpus::get();

    let load_average = sys_info::loadavg()
        .map(|load| [load.one, load.five, load.fifteen])
        .map_err(|e| error!(error = %e, "loadavg probe failed"))
        .ok();
    let cpu_percent = load_average
        .map(|load| (load[0] / cpu_count.max(1) as f64 * 100.0).clamp(0.0, 100.0))
        .unwrap_or(0.0);

    let (memory_percent, memory_total_kb, memory_available_kb) = match sys_info::mem_info() {
        Ok(mem) => {
            let total = mem.total.max(1);
            let available = mem.avail;
            let used = total.saturating_sub(available);
            ((used as f64 / total as f64) * 100.0, total, available)
        }
        Err(e) => {
            error!(error = %e, "memory probe failed");
            (0.0, 0, 0)
        }
    };

    let disk_percent = match sys_info::disk_info() {
        Ok(disk) => {
            let total = disk.total.max(1);
            let used = total.saturating_sub(disk.free);
            (used as f64 / total as f64) * 100.0
        }
        Err(e) => {
            error!(error = %e, "disk probe failed");
            0.0
        }
    };

    let process_count = sys_info::proc_total().unwrap_or(0);

    ResourceSnapshot {
        timestamp: Utc::now(),
        cpu_percent,
        cpu_count,
        memory_percent,
        memory_total_kb,
        memory_available_kb,
        disk_percent,
        // No portable byte counters here; publish zeros rather than guesses.
        network_sent_bytes: 0,
        network_recv_bytes: 0,
        process_count,
        load_average,
    }
}

/// Synthetic snapshot for tests and stubbed deployments.
#[must_use]
pub fn synthetic_snapshot(cpu: f64, memory: f64, disk: f64) -> ResourceSnapshot {
    ResourceSnapshot {
        timestamp: Utc::now(),
        cpu_percent: cpu,
        cpu_count: 4,
        memory_percent: memory,
        memory_total_kb: 8_000_000,
        memory_available_kb: 4_000_000,
        disk_percent: disk,
        network_sent_bytes: 0,
        network_recv_bytes: 0,
        process_count: 100,
        load_average: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::AtomicUsize;

    fn stub_monitor(cpu: f64, memory: f64, disk: f64) -> SystemResourceMonitor {
        SystemResourceMonitor::with_sampler(
            MonitorSettings::default(),
            Arc::new(move || synthetic_snapshot(cpu, memory, disk)),
        )
    }

    #[test]
    fn health_score_weights_cpu_memory_disk() {
        let snapshot = synthetic_snapshot(50.0, 50.0, 50.0);
        assert_eq!(snapshot.health_score(), 50.0);

        let healthy = synthetic_snapshot(0.0, 0.0, 0.0);
        assert_eq!(healthy.health_score(), 100.0);

        let dying = synthetic_snapshot(100.0, 100.0, 100.0);
        assert_eq!(dying.health_score(), 0.0);

        // 0.4 * 20 + 0.4 * 40 + 0.2 * 100 = 44.
        let mixed = synthetic_snapshot(80.0, 60.0, 0.0);
        assert!((mixed.health_score() - 44.0).abs() < 1e-9);
    }

    #[test]
    fn overload_requires_a_critical_threshold() {
        assert!(!stub_monitor(80.0, 80.0, 50.0).is_overloaded());
        assert!(stub_monitor(86.0, 10.0, 10.0).is_overloaded());
        assert!(stub_monitor(10.0, 91.0, 10.0).is_overloaded());
        assert!(stub_monitor(10.0, 10.0, 95.0).is_overloaded());
    }

    #[tokio::test]
    async fn alert_callbacks_fire_per_level() {
        let monitor = stub_monitor(96.0, 76.0, 10.0);
        let fired = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&fired);
        monitor
            .add_alert_callback(move |kind, level, value| {
                let sink = Arc::clone(&sink);
                tokio::spawn(async move {
                    sink.lock().await.push((kind, level, value));
                });
            })
            .await;

        let snapshot = monitor.current_snapshot();
        monitor.check_alerts(&snapshot).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let fired = fired.lock().await;
        assert!(fired
            .iter()
            .any(|(k, l, _)| *k == ResourceKind::Cpu && *l == AlertLevel::Emergency));
        assert!(fired
            .iter()
            .any(|(k, l, _)| *k == ResourceKind::Memory && *l == AlertLevel::Warning));
        assert_eq!(fired.len(), 2);
    }

    #[tokio::test]
    async fn sampler_fills_bounded_history() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut config = MonitorSettings::default();
        config.sampling_interval_secs = 0.5;
        config.history_size = 2;

        let monitor = Arc::new(SystemResourceMonitor::with_sampler(
            config,
            Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                synthetic_snapshot(10.0, 10.0, 10.0)
            }),
        ));
        monitor.start();
        tokio::time::sleep(Duration::from_millis(1300)).await;
        monitor.stop();

        let history = monitor.history(10).await;
        assert!(history.len() <= 2);
        assert!(!history.is_empty());
        assert!(calls.load(Ordering::SeqCst) >= 2);
    }

    #[test]
    fn live_probe_never_panics() {
        let snapshot = collect_system_snapshot();
        assert!(snapshot.cpu_percent >= 0.0);
        assert!((0.0..=100.0).contains(&snapshot.health_score()));
    }
}
