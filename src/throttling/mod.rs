//! Adaptive throttling.
//!
//! Every adjustment cycle samples the resource monitor and the queue, maps
//! the readings to a load level, computes a target concurrency with
//! predictive and queue-pressure overlays, smooths it against recent
//! targets, and steps the live limit toward it by at most two per cycle.
//! The chosen value is pushed into both the request queue and the task
//! engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::engine::AsyncTaskEngine;
use crate::monitor::SystemResourceMonitor;
use crate::queue::RequestQueue;
use crate::utils::config::ThrottlingSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThrottleAction {
    ScaleUp,
    ScaleDown,
    Maintain,
    EmergencyStop,
}

impl fmt::Display for ThrottleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::ScaleUp => "scale_up",
            Self::ScaleDown => "scale_down",
            Self::Maintain => "maintain",
            Self::EmergencyStop => "emergency_stop",
        };
        write!(f, "{label}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadLevel {
    Low,
    Normal,
    High,
    Critical,
    Emergency,
}

/// One record per adjustment cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottlingSample {
    pub timestamp: DateTime<Utc>,
    pub health_score: f64,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub active_requests: usize,
    pub queue_size: usize,
    pub current_concurrency: usize,
    pub target_concurrency: usize,
    pub action: ThrottleAction,
    pub load_level: LoadLevel,
}

/// Linear-trend predictor over recent combined-load samples.
struct LoadPredictor {
    window: VecDeque<(Instant, f64)>,
    capacity: usize,
}

impl LoadPredictor {
    fn new(capacity: usize) -> Self {
        Self {
            window: VecDeque::new(),
            capacity,
        }
    }

    fn add_sample(&mut self, value: f64) {
        if self.window.len() >= self.capacity {
            self.window.pop_front();
        }
        self.window.push_back((Instant::now(), value));
    }

    /// Predict the combined load `horizon_secs` ahead with a least-squares
    /// line over the window, clamped to [0, 100].
    fn predict(&self, horizon_secs: f64) -> f64 {
        if self.window.len() < 3 {
            return self.window.back().map_or(50.0, |(_, v)| *v);
        }

        let origin = self.window[0].0;
        let times: Vec<f64> = self
            .window
            .iter()
            .map(|(t, _)| t.duration_since(origin).as_secs_f64())
            .collect();
        let values: Vec<f64> = self.window.iter().map(|(_, v)| *v).collect();

        let n = values.len() as f64;
        let sum_t: f64 = times.iter().sum();
        let sum_v: f64 = values.iter().sum();
        let sum_tv: f64 = times.iter().zip(&values).map(|(t, v)| t * v).sum();
        let sum_t2: f64 = times.iter().map(|t| t * t).sum();

        let denominator = n * sum_t2 - sum_t * sum_t;
        if denominator.abs() < f64::EPSILON {
            return values[values.len() - 1];
        }
        let slope = (n * sum_tv - sum_t * sum_v) / denominator;
        let intercept = (sum_v - slope * sum_t) / n;

        let future = times[times.len() - 1] + horizon_secs;
        (intercept + slope * future).clamp(0.0, 100.0)
    }
}

struct ThrottleState {
    current: usize,
    target: usize,
    history: VecDeque<ThrottlingSample>,
    predictor: LoadPredictor,
}

type AdjustmentCallback = Arc<dyn Fn(&ThrottlingSample) + Send + Sync>;

/// The controller. Owns no worker of its own; it only resizes the limits of
/// the components it is wired to.
pub struct ThrottlingController {
    config: ThrottlingSettings,
    monitor: Arc<SystemResourceMonitor>,
    queue: Option<Arc<RequestQueue>>,
    engine: Option<Arc<AsyncTaskEngine>>,
    state: Mutex<ThrottleState>,
    callbacks: Mutex<Vec<AdjustmentCallback>>,
    running: AtomicBool,
}

impl ThrottlingController {
    #[must_use]
    pub fn new(config: ThrottlingSettings, monitor: Arc<SystemResourceMonitor>) -> Self {
        let default = config.default_concurrency;
        Self {
            config,
            monitor,
            queue: None,
            engine: None,
            state: Mutex::new(ThrottleState {
                current: default,
                target: default,
                history: VecDeque::new(),
                predictor: LoadPredictor::new(10),
            }),
            callbacks: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn with_queue(mut self, queue: Arc<RequestQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    #[must_use]
    pub fn with_engine(mut self, engine: Arc<AsyncTaskEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub async fn add_adjustment_callback<F>(&self, callback: F)
    where
        F: Fn(&ThrottlingSample) + Send + Sync + 'static,
    {
        self.callbacks.lock().await.push(Arc::new(callback));
    }

    pub async fn current_concurrency(&self) -> usize {
        self.state.lock().await.current
    }

    pub async fn target_concurrency(&self) -> usize {
        self.state.lock().await.target
    }

    pub async fn latest_sample(&self) -> Option<ThrottlingSample> {
        self.state.lock().await.history.back().cloned()
    }

    pub async fn history(&self, samples: usize) -> Vec<ThrottlingSample> {
        let state = self.state.lock().await;
        state.history.iter().rev().take(samples).rev().cloned().collect()
    }

    /// Pin the target and apply one adjustment immediately.
    pub async fn force_adjustment(&self, target: Option<usize>) {
        if let Some(target) = target {
            let mut state = self.state.lock().await;
            state.target = target.clamp(self.config.min_concurrency, self.config.max_concurrency);
        }
        self.run_cycle().await;
    }

    /// Start the periodic adjustment loop.
    pub fn start(self: &Arc<Self>) {
        if !self.config.enabled {
            info!("adaptive throttling disabled by configuration");
            return;
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            let interval =
                Duration::from_secs_f64(controller.config.adjustment_interval_secs.max(0.5));
            let mut ticker = tokio::time::interval(interval);
            while controller.running.load(Ordering::SeqCst) {
                ticker.tick().await;
                controller.run_cycle().await;
            }
        });
        info!("adaptive throttling started");
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        info!("adaptive throttling stopped");
    }

    /// One full decision cycle. Public so tests and `force_adjustment` can
    /// drive it directly.
    pub async fn run_cycle(&self) {
        let snapshot = self.monitor.current_snapshot();
        let health_score = snapshot.health_score();
        let combined_load = (snapshot.cpu_percent + snapshot.memory_percent) / 2.0;

        let (queue_size, active_requests) = match &self.queue {
            Some(queue) => (queue.queue_size().await, queue.active_count().await),
            None => (0, 0),
        };

        let load_level = self.load_level(health_score, combined_load);

        let mut state = self.state.lock().await;
        let old_target = state.target;

        let mut target = self.base_target(&state, load_level, queue_size);

        // Predictive overlay: scale ahead of a forecast breach.
        if self.config.enable_predictive_scaling {
            let predicted = state.predictor.predict(30.0);
            if predicted > self.config.high_load_threshold {
                debug!(predicted, "predicted load high, pre-emptive scale down");
                target = ((target as f64) * 0.8) as usize;
            }
        }

        // Queue pressure overlay.
        if queue_size > state.current * 2 {
            target += 2;
        } else if queue_size == 0 && active_requests < state.current / 2 {
            target = target.saturating_sub(1);
        }

        target = target.clamp(self.config.min_concurrency, self.config.max_concurrency);
        let action = self.action_for(old_target, target);
        target = self.smooth(&state, target);
        state.target = target;

        // Gradual application, at most two steps per cycle.
        let step = state.target.abs_diff(state.current).min(2);
        if state.target > state.current {
            state.current += step;
        } else {
            state.current -= step;
        }
        let applied = state.current;

        let sample = ThrottlingSample {
            timestamp: Utc::now(),
            health_score,
            cpu_percent: snapshot.cpu_percent,
            memory_percent: snapshot.memory_percent,
            active_requests,
            queue_size,
            current_concurrency: applied,
            target_concurrency: state.target,
            action,
            load_level,
        };
        if state.history.len() >= self.config.history_size {
            state.history.pop_front();
        }
        state.history.push_back(sample.clone());
        state.predictor.add_sample(combined_load);
        drop(state);

        if let Some(queue) = &self.queue {
            queue.update_concurrency_limit(applied);
        }
        if let Some(engine) = &self.engine {
            engine.update_concurrency_limit(applied);
        }

        let callbacks = self.callbacks.lock().await.clone();
        for callback in &callbacks {
            callback(&sample);
        }

        debug!(
            action = %sample.action,
            current = applied,
            target = sample.target_concurrency,
            health = health_score,
            "throttling adjustment"
        );
        if sample.action == ThrottleAction::EmergencyStop {
            error!(health = health_score, "emergency throttling engaged");
        }
    }

    fn load_level(&self, health_score: f64, combined_load: f64) -> LoadLevel {
        let t = &self.config;
        if health_score < t.critical_threshold || combined_load >= t.critical_load_threshold {
            LoadLevel::Emergency
        } else if health_score < t.warning_threshold || combined_load >= t.high_load_threshold {
            LoadLevel::Critical
        } else if combined_load >= t.normal_load_threshold {
            LoadLevel::High
        } else if combined_load >= t.low_load_threshold {
            LoadLevel::Normal
        } else {
            LoadLevel::Low
        }
    }

    fn base_target(&self, state: &ThrottleState, load_level: LoadLevel, queue_size: usize) -> usize {
        let current = state.target as f64;
        match load_level {
            LoadLevel::Emergency => ((current * self.config.emergency_scale_down) as usize)
                .max(self.config.min_concurrency),
            LoadLevel::Critical => ((current * self.config.scale_down_factor) as usize)
                .max(self.config.min_concurrency),
            LoadLevel::High => ((current * 0.9) as usize).max(self.config.min_concurrency),
            LoadLevel::Low if queue_size > 0 => ((current * self.config.scale_up_factor)
                as usize)
                .min(self.config.max_concurrency),
            _ => state.target,
        }
    }

    fn action_for(&self, old_target: usize, new_target: usize) -> ThrottleAction {
        use std::cmp::Ordering as CmpOrdering;
        match new_target.cmp(&old_target) {
            CmpOrdering::Greater => ThrottleAction::ScaleUp,
            CmpOrdering::Less => {
                if new_target <= self.config.min_concurrency {
                    ThrottleAction::EmergencyStop
                } else {
                    ThrottleAction::ScaleDown
                }
            }
            CmpOrdering::Equal => ThrottleAction::Maintain,
        }
    }

    /// Weighted average with recent targets, heavier on the newest.
    fn smooth(&self, state: &ThrottleState, target: usize) -> usize {
        if self.config.smoothing_window <= 1
            || state.history.len() < self.config.smoothing_window
        {
            return target;
        }

        let mut recent: Vec<usize> = state
            .history
            .iter()
            .rev()
            .take(self.config.smoothing_window)
            .rev()
            .map(|s| s.target_concurrency)
            .collect();
        recent.push(target);

        let weighted_sum: usize = recent.iter().enumerate().map(|(i, t)| t * (i + 1)).sum();
        let weight_total: usize = (1..=recent.len()).sum();
        (weighted_sum / weight_total)
            .clamp(self.config.min_concurrency, self.config.max_concurrency)
    }
}
