//! Performance statistics
//!
//! [`PerformanceStats`] is written only by the mix engine and polled from any
//! context. [`CpuMeter`] is the engine-private accumulator that turns block
//! processing times into the smoothed CPU figure.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::settings::AtomicF64;

/// Default length of the CPU averaging window
pub const DEFAULT_STATS_WINDOW: Duration = Duration::from_millis(100);

/// Counters published by the mix engine
#[derive(Debug, Default)]
pub struct PerformanceStats {
    cpu_usage: AtomicF64,
    peak_cpu_usage: AtomicF64,
    dropout_count: AtomicU64,
    samples_processed: AtomicU64,
}

impl PerformanceStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Smoothed CPU usage of the last window, in percent of the block budget
    pub fn cpu_usage(&self) -> f64 {
        self.cpu_usage.load()
    }

    /// Highest [`PerformanceStats::cpu_usage`] seen since the last reset
    pub fn peak_cpu_usage(&self) -> f64 {
        self.peak_cpu_usage.load()
    }

    /// Blocks that produced silence because no buffer was available
    pub fn dropout_count(&self) -> u64 {
        self.dropout_count.load(Ordering::Relaxed)
    }

    /// Samples per channel processed successfully
    pub fn samples_processed(&self) -> u64 {
        self.samples_processed.load(Ordering::Relaxed)
    }

    pub(crate) fn record_dropout(&self) {
        self.dropout_count.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_samples(&self, samples: u64) {
        self.samples_processed.fetch_add(samples, Ordering::Relaxed);
    }

    pub(crate) fn publish_cpu(&self, usage: f64) {
        self.cpu_usage.store(usage);
        if usage > self.peak_cpu_usage.load() {
            self.peak_cpu_usage.store(usage);
        }
    }

    /// Zero every counter
    pub fn reset(&self) {
        self.cpu_usage.store(0.0);
        self.peak_cpu_usage.store(0.0);
        self.dropout_count.store(0, Ordering::Relaxed);
        self.samples_processed.store(0, Ordering::Relaxed);
    }
}

/// Windowed average of block processing time
#[derive(Debug, Clone)]
pub struct CpuMeter {
    window: Duration,
    elapsed: Duration,
    busy: Duration,
    blocks: u32,
}

impl CpuMeter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            elapsed: Duration::ZERO,
            busy: Duration::ZERO,
            blocks: 0,
        }
    }

    /// Add one block's processing time
    ///
    /// `wall` is the time since the previous call (or since the meter was
    /// reset). Once the accumulated wall time reaches the window, returns the
    /// average processing time as a percentage of `block_budget`, clamped to
    /// 100, and starts a new window.
    pub fn record(
        &mut self,
        busy: Duration,
        wall: Duration,
        block_budget: Duration,
    ) -> Option<f64> {
        self.busy += busy;
        self.elapsed += wall;
        self.blocks += 1;

        if self.elapsed < self.window {
            return None;
        }

        let average = self.busy.as_secs_f64() / f64::from(self.blocks);
        let budget = block_budget.as_secs_f64();
        let usage = if budget > 0.0 {
            (average / budget * 100.0).min(100.0)
        } else {
            100.0
        };
        self.reset();
        Some(usage)
    }

    pub fn reset(&mut self) {
        self.elapsed = Duration::ZERO;
        self.busy = Duration::ZERO;
        self.blocks = 0;
    }
}

impl Default for CpuMeter {
    fn default() -> Self {
        Self::new(DEFAULT_STATS_WINDOW)
    }
}
