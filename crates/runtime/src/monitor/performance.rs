//! Background performance monitoring with bounded history.
//!
//! One [`PerformanceMonitor`] runs per process. While running it owns a
//! single sampling thread, the sole writer of the history buffer; query
//! methods may be called concurrently from request-handling threads at any
//! time, including before `start()`.
//!
//! Per-iteration failures (a sample that could not be collected, a limit
//! breach, a suspected leak) are logged and recorded, never fatal: the loop
//! only exits when `stop()` asks it to.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use once_cell::sync::OnceCell;
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::sampler::{MetricSample, MetricSampler};
use super::MonitorError;
use crate::collections::RingBuffer;

/// Bound on how long `stop()` waits for the sampling thread to exit.
const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Number of most-recent samples inspected by the leak heuristic.
const LEAK_WINDOW: usize = 10;

/// Configuration for the performance monitor.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Time between two samples of the background loop.
    pub sampling_interval: Duration,
    /// Capacity of the sample history (oldest evicted on overflow).
    pub max_history: usize,
    /// Resident-memory threshold above which a warning is logged.
    pub memory_limit_bytes: Option<u64>,
    /// CPU-percentage threshold above which a warning is logged.
    pub cpu_limit_percent: Option<f32>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            sampling_interval: Duration::from_secs(60),
            max_history: 100,
            memory_limit_bytes: None,
            cpu_limit_percent: None,
        }
    }
}

impl MonitorConfig {
    /// Sets the sampling interval.
    pub fn with_sampling_interval(mut self, interval: Duration) -> Self {
        self.sampling_interval = interval;
        self
    }

    /// Sets the history capacity.
    pub fn with_max_history(mut self, max_history: usize) -> Self {
        self.max_history = max_history;
        self
    }

    /// Sets the resident-memory warning threshold.
    pub fn with_memory_limit_bytes(mut self, limit: u64) -> Self {
        self.memory_limit_bytes = Some(limit);
        self
    }

    /// Sets the CPU warning threshold.
    pub fn with_cpu_limit_percent(mut self, limit: f32) -> Self {
        self.cpu_limit_percent = Some(limit);
        self
    }

    /// Builds a configuration from `CASEDESK_MONITOR_*` environment
    /// variables, falling back to the defaults for unset or unparsable
    /// values.
    ///
    /// Recognized: `CASEDESK_MONITOR_INTERVAL_SECS`,
    /// `CASEDESK_MONITOR_MAX_HISTORY`, `CASEDESK_MONITOR_MEMORY_LIMIT_MB`,
    /// `CASEDESK_MONITOR_CPU_LIMIT_PCT`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(secs) = env_parse::<u64>("CASEDESK_MONITOR_INTERVAL_SECS") {
            config.sampling_interval = Duration::from_secs(secs.max(1));
        }
        if let Some(capacity) = env_parse::<usize>("CASEDESK_MONITOR_MAX_HISTORY") {
            config.max_history = capacity;
        }
        if let Some(megabytes) = env_parse::<u64>("CASEDESK_MONITOR_MEMORY_LIMIT_MB") {
            config.memory_limit_bytes = Some(megabytes.saturating_mul(1024 * 1024));
        }
        if let Some(percent) = env_parse::<f32>("CASEDESK_MONITOR_CPU_LIMIT_PCT") {
            config.cpu_limit_percent = Some(percent);
        }
        config
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|value| value.trim().parse().ok())
}

/// Current/average/min/max over one metric across the stored history.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatSummary {
    /// Value of the most recent sample.
    pub current: f64,
    /// Mean across the history.
    pub average: f64,
    /// Smallest value across the history.
    pub min: f64,
    /// Largest value across the history.
    pub max: f64,
}

impl StatSummary {
    fn from_values(values: &[f64]) -> Option<Self> {
        let current = *values.last()?;
        let mut sum = 0.0;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for &value in values {
            sum += value;
            min = min.min(value);
            max = max.max(value);
        }
        Some(Self { current, average: sum / values.len() as f64, min, max })
    }
}

/// Aggregated view over the stored history.
///
/// `data_points` counts every stored sample; the statistics are computed
/// over the samples that were collected successfully.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorSummary {
    /// Number of samples currently stored, error samples included.
    pub data_points: usize,
    /// Resident memory statistics in bytes.
    pub memory_bytes: StatSummary,
    /// CPU usage statistics in percent.
    pub cpu_percent: StatSummary,
}

/// State shared between the owning handle and the sampling thread.
struct MonitorShared {
    config: MonitorConfig,
    history: Mutex<RingBuffer<MetricSample>>,
    running: AtomicBool,
}

impl MonitorShared {
    /// Stores one sample and runs the per-iteration checks.
    fn record(&self, sample: MetricSample) {
        let mut history = self.history.lock();
        history.push(sample);
        if let Some(latest) = history.latest() {
            self.check_limits(latest);
        }
        if leak_suspected(&history) {
            warn!(
                window = LEAK_WINDOW,
                "potential memory leak: resident memory strictly increasing"
            );
        }
    }

    fn check_limits(&self, sample: &MetricSample) {
        if let Some(limit) = self.config.memory_limit_bytes {
            if sample.rss_bytes > limit {
                warn!(rss_bytes = sample.rss_bytes, limit_bytes = limit, "memory limit exceeded");
            }
        }
        if let Some(limit) = self.config.cpu_limit_percent {
            if sample.cpu_percent > limit {
                warn!(
                    cpu_percent = sample.cpu_percent,
                    limit_percent = limit,
                    "cpu limit exceeded"
                );
            }
        }
    }
}

/// Heuristic only: strictly increasing resident memory over the whole window
/// is a signal worth logging, not proof of a leak. Any non-increasing
/// adjacent pair, short history or failed sample suppresses it.
fn leak_suspected(history: &RingBuffer<MetricSample>) -> bool {
    if history.len() < LEAK_WINDOW {
        return false;
    }
    let recent: Vec<&MetricSample> = history.iter().skip(history.len() - LEAK_WINDOW).collect();
    if recent.iter().any(|sample| sample.is_error()) {
        return false;
    }
    recent.windows(2).all(|pair| pair[0].rss_bytes < pair[1].rss_bytes)
}

/// Handle of the background sampling thread.
struct Worker {
    handle: JoinHandle<()>,
    stop_tx: Sender<()>,
    exited: Arc<(Mutex<bool>, Condvar)>,
}

/// Process-wide performance monitor.
///
/// Lifecycle: `Stopped → start() → Running → stop() → Stopped`. `start()` is
/// idempotent, `stop()` before any `start()` is a safe no-op. History is
/// written only by the sampling thread and read through the query methods;
/// no caller ever receives a mutable reference into it.
pub struct PerformanceMonitor {
    shared: Arc<MonitorShared>,
    worker: Mutex<Option<Worker>>,
}

impl PerformanceMonitor {
    /// Creates a stopped monitor with the given configuration.
    pub fn new(config: MonitorConfig) -> Self {
        info!(
            interval_ms = config.sampling_interval.as_millis() as u64,
            max_history = config.max_history,
            "performance monitor initialized"
        );
        let history = Mutex::new(RingBuffer::new(config.max_history));
        Self {
            shared: Arc::new(MonitorShared { config, history, running: AtomicBool::new(false) }),
            worker: Mutex::new(None),
        }
    }

    /// Returns `true` while the sampling thread is scheduled to run.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Starts the background sampling thread.
    ///
    /// Idempotent: a second call while running logs a warning and spawns
    /// nothing.
    pub fn start(&self) {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            warn!("performance monitoring already started");
            return;
        }

        let (stop_tx, stop_rx) = mpsc::channel();
        let exited = Arc::new((Mutex::new(false), Condvar::new()));
        let shared = Arc::clone(&self.shared);
        let thread_exited = Arc::clone(&exited);

        let spawned = thread::Builder::new()
            .name("casedesk-monitor".into())
            .spawn(move || sampling_loop(&shared, &stop_rx, &thread_exited));

        match spawned {
            Ok(handle) => {
                *self.worker.lock() = Some(Worker { handle, stop_tx, exited });
                info!("performance monitoring started");
            }
            Err(spawn_error) => {
                self.shared.running.store(false, Ordering::SeqCst);
                error!(error = %spawn_error, "failed to spawn the sampling thread");
            }
        }
    }

    /// Stops the background sampling thread.
    ///
    /// Signals the loop, then waits up to 5 seconds for it to exit; a thread
    /// that does not terminate in time is detached with a warning instead of
    /// blocking the caller indefinitely.
    pub fn stop(&self) {
        let was_running = self.shared.running.swap(false, Ordering::SeqCst);
        let Some(worker) = self.worker.lock().take() else {
            debug!("performance monitor stopped without a running thread");
            return;
        };

        // Closing the channel wakes the loop out of its inter-sample sleep.
        drop(worker.stop_tx);

        let (exit_lock, exit_cvar) = &*worker.exited;
        {
            let mut exited = exit_lock.lock();
            if !*exited {
                let _ = exit_cvar.wait_for(&mut exited, JOIN_TIMEOUT);
            }
            if !*exited {
                warn!(
                    timeout_secs = JOIN_TIMEOUT.as_secs(),
                    "sampling thread did not exit in time, detaching"
                );
                return;
            }
        }

        if worker.handle.join().is_err() {
            error!("sampling thread panicked");
        } else if was_running {
            info!("performance monitoring stopped");
        }
    }

    /// Takes one fresh sample, independent of the background loop.
    pub fn current_metrics(&self) -> MetricSample {
        MetricSampler::sample_now()
    }

    /// Returns stored samples oldest-first, optionally truncated to the most
    /// recent `limit`.
    pub fn history(&self, limit: Option<usize>) -> Vec<MetricSample> {
        let history = self.shared.history.lock();
        let skip = limit.map_or(0, |limit| history.len().saturating_sub(limit));
        history.iter().skip(skip).cloned().collect()
    }

    /// Summarizes the stored history, or `None` when no data is available.
    pub fn summary(&self) -> Option<MonitorSummary> {
        let history = self.shared.history.lock();
        if history.is_empty() {
            return None;
        }

        let memory: Vec<f64> = history
            .iter()
            .filter(|sample| !sample.is_error())
            .map(|sample| sample.rss_bytes as f64)
            .collect();
        let cpu: Vec<f64> = history
            .iter()
            .filter(|sample| !sample.is_error())
            .map(|sample| f64::from(sample.cpu_percent))
            .collect();

        Some(MonitorSummary {
            data_points: history.len(),
            memory_bytes: StatSummary::from_values(&memory).unwrap_or_default(),
            cpu_percent: StatSummary::from_values(&cpu).unwrap_or_default(),
        })
    }

    #[cfg(test)]
    fn record_for_test(&self, sample: MetricSample) {
        self.shared.record(sample);
    }
}

impl Drop for PerformanceMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Body of the sampling thread.
fn sampling_loop(
    shared: &Arc<MonitorShared>,
    stop_rx: &Receiver<()>,
    exited: &Arc<(Mutex<bool>, Condvar)>,
) {
    let mut sampler = match MetricSampler::new() {
        Ok(sampler) => Some(sampler),
        Err(creation_error) => {
            error!(error = %creation_error, "metric sampler unavailable");
            None
        }
    };
    // Prime the cpu delta; the first reading is discarded.
    if let Some(sampler) = sampler.as_mut() {
        let _ = sampler.sample();
    }

    while shared.running.load(Ordering::SeqCst) {
        let sample = match sampler.as_mut() {
            Some(sampler) => sampler.sample(),
            None => MetricSample::failed("metric sampler unavailable"),
        };
        if let Some(sampling_error) = &sample.error {
            warn!(error = %sampling_error, "metric sampling failed");
        }
        shared.record(sample);

        match stop_rx.recv_timeout(shared.config.sampling_interval) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    let (exit_lock, exit_cvar) = &**exited;
    *exit_lock.lock() = true;
    exit_cvar.notify_all();
}

static GLOBAL_MONITOR: OnceCell<PerformanceMonitor> = OnceCell::new();

/// Initializes the global monitor with an explicit configuration.
///
/// Must run before the first [`global`] access; afterwards the lazily built
/// default would already be in place and this returns
/// [`MonitorError::AlreadyInitialized`].
pub fn init_global(config: MonitorConfig) -> Result<&'static PerformanceMonitor, MonitorError> {
    GLOBAL_MONITOR
        .set(PerformanceMonitor::new(config))
        .map_err(|_| MonitorError::AlreadyInitialized)?;
    Ok(global())
}

/// Returns the process-wide monitor, building it from the environment on
/// first access.
///
/// The hosting application's startup hook calls `global().start()` and its
/// shutdown hook calls `global().stop()`.
pub fn global() -> &'static PerformanceMonitor {
    GLOBAL_MONITOR.get_or_init(|| PerformanceMonitor::new(MonitorConfig::from_env()))
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn sample_with_rss(rss_bytes: u64) -> MetricSample {
        MetricSample {
            timestamp: Utc::now(),
            rss_bytes,
            vms_bytes: rss_bytes * 2,
            memory_percent: 1.0,
            cpu_percent: 5.0,
            thread_count: 4,
            open_fds: 8,
            error: None,
        }
    }

    fn monitor_with_history(max_history: usize) -> PerformanceMonitor {
        PerformanceMonitor::new(
            MonitorConfig::default()
                .with_sampling_interval(Duration::from_millis(10))
                .with_max_history(max_history),
        )
    }

    #[test]
    fn history_is_bounded_and_fifo() {
        let monitor = monitor_with_history(5);
        for rss in 1..=7u64 {
            monitor.record_for_test(sample_with_rss(rss * 1024));
        }

        let history = monitor.history(None);
        assert_eq!(history.len(), 5);
        // samples 1 and 2 were evicted, oldest-first order preserved
        assert_eq!(history[0].rss_bytes, 3 * 1024);
        assert_eq!(history[4].rss_bytes, 7 * 1024);
    }

    #[test]
    fn history_limit_keeps_the_most_recent_samples() {
        let monitor = monitor_with_history(10);
        for rss in 1..=5u64 {
            monitor.record_for_test(sample_with_rss(rss));
        }

        let limited = monitor.history(Some(2));
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[0].rss_bytes, 4);
        assert_eq!(limited[1].rss_bytes, 5);

        // a limit above the stored count returns everything
        assert_eq!(monitor.history(Some(50)).len(), 5);
    }

    #[test]
    fn summary_is_none_without_data() {
        let monitor = monitor_with_history(10);
        assert!(monitor.summary().is_none());
    }

    #[test]
    fn summary_aggregates_memory_and_cpu() {
        let monitor = monitor_with_history(10);
        for rss in [100u64, 300, 200] {
            monitor.record_for_test(sample_with_rss(rss));
        }

        let summary = monitor.summary().expect("summary with data");
        assert_eq!(summary.data_points, 3);
        assert_eq!(summary.memory_bytes.current, 200.0);
        assert_eq!(summary.memory_bytes.average, 200.0);
        assert_eq!(summary.memory_bytes.min, 100.0);
        assert_eq!(summary.memory_bytes.max, 300.0);
        assert_eq!(summary.cpu_percent.current, 5.0);
    }

    #[test]
    fn summary_counts_error_samples_but_excludes_them_from_stats() {
        let monitor = monitor_with_history(10);
        monitor.record_for_test(sample_with_rss(100));
        monitor.record_for_test(MetricSample::failed("sampling hiccup"));

        let summary = monitor.summary().expect("summary with data");
        assert_eq!(summary.data_points, 2);
        assert_eq!(summary.memory_bytes.min, 100.0);
        assert_eq!(summary.memory_bytes.current, 100.0);
    }

    #[test]
    fn leak_heuristic_fires_on_ten_strictly_increasing_samples() {
        let mut history = RingBuffer::new(20);
        for rss in 1..=10u64 {
            history.push(sample_with_rss(rss * 1024));
        }
        assert!(leak_suspected(&history));
    }

    #[test]
    fn leak_heuristic_needs_a_full_window() {
        let mut history = RingBuffer::new(20);
        for rss in 1..=9u64 {
            history.push(sample_with_rss(rss * 1024));
        }
        assert!(!leak_suspected(&history));
    }

    #[test]
    fn any_non_increasing_pair_suppresses_the_leak_signal() {
        let mut history = RingBuffer::new(20);
        for rss in 1..=10u64 {
            // plateau in the middle of the window
            let rss = if rss == 6 { 5 } else { rss };
            history.push(sample_with_rss(rss * 1024));
        }
        assert!(!leak_suspected(&history));
    }

    #[test]
    fn an_error_sample_in_the_window_suppresses_the_leak_signal() {
        let mut history = RingBuffer::new(20);
        for rss in 1..=9u64 {
            history.push(sample_with_rss(rss * 1024));
        }
        history.push(MetricSample::failed("sampling hiccup"));
        assert!(!leak_suspected(&history));
    }

    #[test]
    fn only_the_last_window_is_inspected() {
        let mut history = RingBuffer::new(30);
        // noisy prefix, then ten strictly increasing samples
        for rss in [50u64, 10, 40, 20] {
            history.push(sample_with_rss(rss));
        }
        for rss in 100..110u64 {
            history.push(sample_with_rss(rss));
        }
        assert!(leak_suspected(&history));
    }

    #[test]
    fn from_env_falls_back_to_defaults() {
        // no CASEDESK_MONITOR_* variables set in the test environment
        let config = MonitorConfig::from_env();
        assert_eq!(config.sampling_interval, Duration::from_secs(60));
        assert_eq!(config.max_history, 100);
        assert!(config.memory_limit_bytes.is_none());
        assert!(config.cpu_limit_percent.is_none());
    }
}
