//! Engine configuration
//!
//! Loaded from JSON; every field has a default so partial files are fine.

use std::path::Path;
use std::time::Duration;

use log::info;
use serde::{Deserialize, Serialize};

use crate::engine::pool::DEFAULT_MAX_BUFFERS;
use crate::engine::transport::LoopWrap;
use crate::error::{NuevaError, Result};

/// Highest channel count a block may carry
pub const CHANNEL_LIMIT: usize = 256;

/// Engine setup, fixed for the lifetime of an [`crate::engine::EngineContext`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Sample rate in Hz
    pub sample_rate: f64,
    /// Samples per channel in one block
    pub block_size: usize,
    /// Output channel count
    pub channels: usize,
    /// Widest block the pool is expected to serve
    pub max_channels: usize,
    /// Upper bound on live pool slots
    pub max_buffers: usize,
    /// Buffers created during warm-up
    pub preallocated_buffers: usize,
    /// Copy host input into the master bus
    pub input_monitoring: bool,
    /// What happens to the overshoot when playback crosses the loop end
    pub loop_wrap: LoopWrap,
    /// Blocks a free pool slot may sit idle before maintenance drops it
    pub pool_idle_frames: u64,
    /// Length of the CPU averaging window in milliseconds
    pub stats_window_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000.0,
            block_size: 512,
            channels: 2,
            max_channels: 64,
            max_buffers: DEFAULT_MAX_BUFFERS,
            preallocated_buffers: 4,
            input_monitoring: true,
            loop_wrap: LoopWrap::default(),
            pool_idle_frames: 1024,
            stats_window_ms: 100,
        }
    }
}

impl EngineConfig {
    /// Parse a configuration from a JSON string and validate it
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let config = Self::from_json_str(&json)?;
        info!(
            "Loaded engine config from {} ({} Hz, {} samples, {} ch)",
            path.display(),
            config.sample_rate,
            config.block_size,
            config.channels
        );
        Ok(config)
    }

    /// Serialize to pretty JSON
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check the configuration is usable
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| Err(NuevaError::InvalidConfig { reason });

        if !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            return invalid(format!("sample_rate must be positive, got {}", self.sample_rate));
        }
        if self.block_size == 0 {
            return invalid("block_size must be at least 1".to_string());
        }
        if self.channels == 0 || self.channels > self.max_channels {
            return invalid(format!(
                "channels must be between 1 and max_channels ({}), got {}",
                self.max_channels, self.channels
            ));
        }
        if self.max_channels > CHANNEL_LIMIT {
            return invalid(format!(
                "max_channels must be at most {CHANNEL_LIMIT}, got {}",
                self.max_channels
            ));
        }
        if self.max_buffers < 2 {
            return invalid("max_buffers must be at least 2 (master + one track)".to_string());
        }
        if self.preallocated_buffers > self.max_buffers {
            return invalid(format!(
                "preallocated_buffers ({}) exceeds max_buffers ({})",
                self.preallocated_buffers, self.max_buffers
            ));
        }
        Ok(())
    }

    /// Duration of one block in seconds
    pub fn block_duration_secs(&self) -> f64 {
        self.block_size as f64 / self.sample_rate
    }

    /// Block latency in milliseconds
    pub fn latency_ms(&self) -> f64 {
        self.block_duration_secs() * 1000.0
    }

    /// CPU averaging window
    pub fn stats_window(&self) -> Duration {
        Duration::from_millis(self.stats_window_ms)
    }
}
