//! Process resource sampling
//!
//! A [`SamplingSession`] polls the resident set size and CPU usage of the
//! current process on a background thread while a measured operation runs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use sysinfo::{Pid, ProcessExt, System, SystemExt};
use tracing::warn;

/// Resource usage observed during one sampling session
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResourceUsage {
    /// Resident set size when the session started
    pub baseline_rss_bytes: u64,
    /// Highest resident set size observed
    pub peak_rss_bytes: u64,
    /// Mean process CPU usage over the samples
    pub avg_cpu_percent: f32,
    pub sample_count: usize,
}

impl ResourceUsage {
    /// Peak growth above `baseline`, never negative
    pub fn peak_above(&self, baseline: u64) -> u64 {
        self.peak_rss_bytes.saturating_sub(baseline)
    }
}

struct ProcessReader {
    system: System,
    pid: Option<Pid>,
}

impl ProcessReader {
    /// Creates a reader and takes one reading, so CPU usage of the next
    /// reading covers the time since creation
    fn new() -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                warn!("Cannot determine current pid, resource sampling disabled: {}", e);
                None
            }
        };
        let mut reader = Self {
            system: System::new(),
            pid,
        };
        reader.read();
        reader
    }

    /// (rss bytes, cpu percent)
    fn read(&mut self) -> (u64, f32) {
        let Some(pid) = self.pid else {
            return (0, 0.0);
        };
        if !self.system.refresh_process(pid) {
            return (0, 0.0);
        }
        self.system
            .process(pid)
            .map(|process| (process.memory(), process.cpu_usage()))
            .unwrap_or((0, 0.0))
    }
}

/// Samples the current process at a fixed interval
pub struct ResourceSampler {
    interval: Duration,
    reader: Mutex<ProcessReader>,
}

impl ResourceSampler {
    /// Creates a sampler with the given period
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: interval.max(Duration::from_millis(1)),
            reader: Mutex::new(ProcessReader::new()),
        }
    }

    /// Sampling period
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Current resident set size of this process
    pub fn current_rss(&self) -> u64 {
        self.reader.lock().read().0
    }

    /// Starts sampling on a background thread
    pub fn start(&self) -> SamplingSession {
        SamplingSession::start(self.interval, self.current_rss())
    }
}

/// Accumulated readings of a running session
#[derive(Default)]
struct Accumulator {
    peak_rss: u64,
    cpu_sum: f64,
    samples: usize,
}

impl Accumulator {
    fn record(&mut self, rss: u64, cpu: f32) {
        self.peak_rss = self.peak_rss.max(rss);
        self.cpu_sum += cpu as f64;
        self.samples += 1;
    }
}

/// A running sampling thread; call [`SamplingSession::finish`] to collect
pub struct SamplingSession {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<Accumulator>>,
    baseline_rss: u64,
}

impl SamplingSession {
    fn start(interval: Duration, baseline_rss: u64) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();
        let mut reader = ProcessReader::new();

        let handle = thread::Builder::new()
            .name("resource-sampler".to_string())
            .spawn(move || {
                let mut acc = Accumulator::default();
                loop {
                    thread::sleep(interval);
                    let (rss, cpu) = reader.read();
                    acc.record(rss, cpu);
                    if thread_stop.load(Ordering::Acquire) {
                        break;
                    }
                }
                acc
            });

        let handle = match handle {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("Failed to spawn resource sampler: {}", e);
                None
            }
        };

        Self {
            stop,
            handle,
            baseline_rss,
        }
    }

    /// Stops sampling and returns what was observed
    pub fn finish(mut self) -> ResourceUsage {
        self.stop.store(true, Ordering::Release);

        let acc = self
            .handle
            .take()
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();

        ResourceUsage {
            baseline_rss_bytes: self.baseline_rss,
            peak_rss_bytes: acc.peak_rss.max(self.baseline_rss),
            avg_cpu_percent: if acc.samples > 0 {
                (acc.cpu_sum / acc.samples as f64) as f32
            } else {
                0.0
            },
            sample_count: acc.samples,
        }
    }
}

impl Drop for SamplingSession {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
