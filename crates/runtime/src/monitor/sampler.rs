//! Point-in-time process resource sampling.
//!
//! [`MetricSampler`] reads the current process through `sysinfo`. A sampler
//! kept alive across calls yields meaningful CPU percentages (the reading is
//! a delta between refreshes); [`MetricSampler::sample_now`] is the one-shot
//! variant that waits out the minimum CPU update interval internally.
//!
//! Sampling never fails loudly: any collection problem is recorded in-band as
//! an error-carrying [`MetricSample`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sysinfo::{Pid, ProcessesToUpdate, System, MINIMUM_CPU_UPDATE_INTERVAL};

use super::MonitorError;

/// One snapshot of the current process's resource usage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSample {
    /// Wall-clock time the sample was taken.
    pub timestamp: DateTime<Utc>,
    /// Resident set size in bytes.
    pub rss_bytes: u64,
    /// Virtual memory size in bytes.
    pub vms_bytes: u64,
    /// Resident memory as a percentage of total system memory.
    pub memory_percent: f32,
    /// CPU usage percentage since the previous refresh (0 on the first).
    pub cpu_percent: f32,
    /// Number of OS threads, 0 where the platform does not expose it.
    pub thread_count: usize,
    /// Number of open file descriptors, 0 where unavailable.
    pub open_fds: usize,
    /// Set when collection itself failed; all metric fields are then zero.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MetricSample {
    /// Builds a sample that carries only a collection error.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            rss_bytes: 0,
            vms_bytes: 0,
            memory_percent: 0.0,
            cpu_percent: 0.0,
            thread_count: 0,
            open_fds: 0,
            error: Some(message.into()),
        }
    }

    /// Returns `true` when this sample records a collection failure.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Reusable sampler bound to the current process.
pub struct MetricSampler {
    system: System,
    pid: Pid,
}

impl MetricSampler {
    /// Creates a sampler for the current process.
    pub fn new() -> Result<Self, MonitorError> {
        let pid = sysinfo::get_current_pid()
            .map_err(|message| MonitorError::PidUnavailable(message.to_string()))?;
        Ok(Self { system: System::new(), pid })
    }

    /// Takes one snapshot. Collection failures yield an error sample.
    pub fn sample(&mut self) -> MetricSample {
        self.system.refresh_memory();
        let _ = self.system.refresh_processes(ProcessesToUpdate::Some(&[self.pid]), true);

        let Some(process) = self.system.process(self.pid) else {
            return MetricSample::failed("current process not visible to the metrics source");
        };

        let rss_bytes = process.memory();
        let vms_bytes = process.virtual_memory();
        let total_memory = self.system.total_memory();
        let memory_percent = if total_memory == 0 {
            0.0
        } else {
            (rss_bytes as f64 / total_memory as f64 * 100.0) as f32
        };

        #[cfg(target_os = "linux")]
        let thread_count = process.tasks().map_or(0, |tasks| tasks.len());
        #[cfg(not(target_os = "linux"))]
        let thread_count = 0;

        MetricSample {
            timestamp: Utc::now(),
            rss_bytes,
            vms_bytes,
            memory_percent,
            cpu_percent: process.cpu_usage(),
            thread_count,
            open_fds: open_fd_count(),
            error: None,
        }
    }

    /// Takes a fresh one-shot snapshot with a meaningful CPU reading.
    ///
    /// Blocks for `sysinfo`'s minimum CPU update interval between the priming
    /// refresh and the returned one.
    pub fn sample_now() -> MetricSample {
        match Self::new() {
            Ok(mut sampler) => {
                let _ = sampler.sample();
                std::thread::sleep(MINIMUM_CPU_UPDATE_INTERVAL);
                sampler.sample()
            }
            Err(creation_error) => MetricSample::failed(creation_error.to_string()),
        }
    }
}

/// Counts the file descriptors held by the current process.
#[cfg(target_os = "linux")]
fn open_fd_count() -> usize {
    std::fs::read_dir("/proc/self/fd").map(|entries| entries.count()).unwrap_or(0)
}

#[cfg(not(target_os = "linux"))]
fn open_fd_count() -> usize {
    0
}
