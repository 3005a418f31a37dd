//! Mix Engine
//!
//! Renders one block at a time: host input, every audible track, master
//! volume / pan / mute, then out to the host buffers. Runs on the real-time
//! thread, so the block path never allocates, locks, logs or returns errors.
//! Problems show up as silence plus a dropout count.

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{info, warn};

use super::buffer::AudioBuffer;
use super::context::EngineContext;
use super::maintenance::{maintenance_channel, MaintenanceEndpoint, PoolMaintenance};
use super::pool::BufferPool;
use super::settings::MixSnapshot;
use super::stats::{CpuMeter, PerformanceStats};
use super::tracks::{MediaSource, TrackMix, TrackSource};
use crate::error::{NuevaError, Result};

// ============================================================================
// Gain Helpers
// ============================================================================

/// Left-channel gain for `pan` (-1 = hard left, 1 = hard right)
///
/// Equal-power law: `sqrt((1 - pan) / 2)`, so the centre is about -3 dB.
pub fn pan_to_gain_left(pan: f32) -> f32 {
    ((1.0 - pan.clamp(-1.0, 1.0)) * 0.5).sqrt()
}

/// Right-channel gain for `pan`: `sqrt((1 + pan) / 2)`
pub fn pan_to_gain_right(pan: f32) -> f32 {
    ((1.0 + pan.clamp(-1.0, 1.0)) * 0.5).sqrt()
}

/// Linear fade across `samples` from `start_gain` to `end_gain`
pub fn apply_fade(samples: &mut [f32], start_gain: f32, end_gain: f32) {
    match samples.len() {
        0 => {}
        1 => samples[0] *= end_gain,
        len => {
            let step = (end_gain - start_gain) / (len - 1) as f32;
            for (i, sample) in samples.iter_mut().enumerate() {
                *sample *= start_gain + step * i as f32;
            }
        }
    }
}

fn apply_pan(buffer: &mut AudioBuffer, pan: f32) {
    if pan == 0.0 || buffer.num_channels() < 2 {
        return;
    }
    buffer.apply_channel_gain(0, pan_to_gain_left(pan));
    buffer.apply_channel_gain(1, pan_to_gain_right(pan));
}

fn apply_track_mix(buffer: &mut AudioBuffer, mix: &TrackMix) {
    buffer.apply_gain(mix.volume);
    apply_pan(buffer, mix.pan);
}

fn apply_master_bus(buffer: &mut AudioBuffer, mix: &MixSnapshot) {
    if mix.master_mute {
        buffer.clear();
        return;
    }
    buffer.apply_gain(mix.master_volume);
    apply_pan(buffer, mix.master_pan);
}

fn write_silence(outputs: &mut [&mut [f32]], num_samples: usize) {
    for output in outputs.iter_mut() {
        let len = num_samples.min(output.len());
        output[..len].fill(0.0);
    }
}

// ============================================================================
// Block Sources
// ============================================================================

/// Track material and timing for one rendered block
pub struct BlockSources<'a> {
    pub media: &'a dyn MediaSource,
    pub tracks: &'a dyn TrackSource,
    /// Playhead at the start of the block, in seconds
    pub block_start: f64,
    /// Block duration in seconds
    pub block_length: f64,
}

// ============================================================================
// Mix Engine
// ============================================================================

/// Block renderer and owner of the real-time buffer pool
///
/// # Example
/// ```
/// use nueva_rt::config::EngineConfig;
/// use nueva_rt::engine::{EngineContext, MixEngine};
///
/// let ctx = EngineContext::new(EngineConfig::default()).unwrap();
/// let mut mixer = MixEngine::new(ctx);
/// mixer.initialize().unwrap();
///
/// let input = vec![0.5f32; 64];
/// let mut left = vec![0.0f32; 64];
/// let mut right = vec![0.0f32; 64];
/// mixer.process_block(Some(&[&input[..]]), &mut [&mut left[..], &mut right[..]], 64);
/// assert_eq!(left[0], 0.5);
/// assert_eq!(right[0], 0.0);
/// ```
pub struct MixEngine {
    ctx: Arc<EngineContext>,
    pool: BufferPool,
    meter: CpuMeter,
    last_block: Option<Instant>,
    initialized: bool,
    maintenance: Option<MaintenanceEndpoint>,
}

impl MixEngine {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        let pool =
            BufferPool::new(ctx.config.max_buffers).with_sample_rate(ctx.config.sample_rate);
        let meter = CpuMeter::new(ctx.config.stats_window());
        Self {
            ctx,
            pool,
            meter,
            last_block: None,
            initialized: false,
            maintenance: None,
        }
    }

    pub fn context(&self) -> &Arc<EngineContext> {
        &self.ctx
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Warm the pool for the configured block shape and start accepting blocks
    ///
    /// Must be called from a non-real-time context. Calling it again on a
    /// running engine does nothing. Each engine warms its own pool, so a
    /// replacement engine built on a shared context is ready before it is
    /// handed to the host.
    pub fn initialize(&mut self) -> Result<()> {
        if self.is_initialized() {
            return Ok(());
        }
        let config = &self.ctx.config;
        self.pool.unseal();
        let created = self.pool.preallocate(
            config.channels,
            config.block_size,
            config.preallocated_buffers,
        );
        self.pool.seal();
        self.meter.reset();
        self.last_block = None;
        self.initialized = true;
        self.ctx.engine_started();

        info!(
            "Mix engine initialized: {} Hz, {} samples/block, {} ch, {} buffers ({:.2} ms latency)",
            config.sample_rate,
            config.block_size,
            config.channels,
            created,
            config.latency_ms()
        );
        Ok(())
    }

    /// Resize the warm pool for a new block shape before processing resumes
    ///
    /// Call from the control context while the host is not running blocks.
    pub fn prepare(&mut self, num_channels: usize, block_size: usize) -> Result<()> {
        if !self.is_initialized() {
            return Err(NuevaError::NotInitialized);
        }
        if num_channels == 0 || num_channels > self.ctx.config.max_channels {
            return Err(NuevaError::InvalidParameter {
                name: "num_channels",
                value: num_channels as f64,
            });
        }
        if block_size == 0 {
            return Err(NuevaError::InvalidParameter {
                name: "block_size",
                value: 0.0,
            });
        }

        self.pool.unseal();
        let regrown = self.pool.ensure_capacity(num_channels, block_size);
        let floor = self.ctx.config.preallocated_buffers;
        let missing = floor.saturating_sub(self.pool.pool_size());
        self.pool.preallocate(num_channels, block_size, missing);
        self.pool.seal();
        info!(
            "Mix engine prepared for {num_channels} ch x {block_size} samples \
             ({regrown} buffers regrown)"
        );
        Ok(())
    }

    /// Stop accepting blocks and drop every idle pool buffer
    pub fn shutdown(&mut self) {
        if !self.is_initialized() {
            return;
        }
        self.initialized = false;
        self.ctx.engine_stopped();
        let dropped = self.pool.clear_unused(0);
        if self.pool.active_buffers() > 0 {
            warn!(
                "Mix engine shut down with {} buffers still on loan",
                self.pool.active_buffers()
            );
        }
        info!("Mix engine shut down ({dropped} buffers released)");
    }

    /// Whether this engine has been initialized and not shut down
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Reclaim pool buffers idle for longer than the configured number of
    /// blocks, keeping the warm-up floor
    ///
    /// Frees and allocates on the calling thread, so only call it while the
    /// host is not running blocks. Use [`MixEngine::maintenance_handle`]
    /// while it is.
    pub fn maintain(&mut self) -> usize {
        let dropped = self.pool.clear_unused(self.ctx.config.pool_idle_frames);
        let config = &self.ctx.config;
        let missing = config.preallocated_buffers.saturating_sub(self.pool.pool_size());
        if missing > 0 {
            self.pool.unseal();
            self.pool.preallocate(config.channels, config.block_size, missing);
            self.pool.seal();
        }
        dropped
    }

    /// Open a queue for maintaining the pool from the control context while
    /// the host runs blocks
    ///
    /// Requests are serviced at the start of each block. Opening a new
    /// handle disconnects the previous one.
    pub fn maintenance_handle(&mut self) -> PoolMaintenance {
        let (control, endpoint) = maintenance_channel(&self.ctx.config);
        self.maintenance = Some(endpoint);
        control
    }

    // ========================================================================
    // Real-time Path
    // ========================================================================

    /// Render one block of host input only
    ///
    /// `inputs` and `outputs` are per-channel slices; `num_samples` is
    /// clamped to the shortest output slice.
    pub fn process_block(
        &mut self,
        inputs: Option<&[&[f32]]>,
        outputs: &mut [&mut [f32]],
        num_samples: usize,
    ) {
        self.render(inputs, outputs, num_samples, None);
    }

    /// Render one block of host input plus every audible track
    pub fn process_block_with_sources(
        &mut self,
        inputs: Option<&[&[f32]]>,
        outputs: &mut [&mut [f32]],
        num_samples: usize,
        sources: &BlockSources<'_>,
    ) {
        self.render(inputs, outputs, num_samples, Some(sources));
    }

    fn render(
        &mut self,
        inputs: Option<&[&[f32]]>,
        outputs: &mut [&mut [f32]],
        num_samples: usize,
        sources: Option<&BlockSources<'_>>,
    ) {
        let started = Instant::now();
        let num_samples = outputs
            .iter()
            .map(|output| output.len())
            .fold(num_samples, usize::min);

        if !self.is_initialized() {
            write_silence(outputs, num_samples);
            return;
        }

        self.pool.advance_frame();
        if let Some(maintenance) = self.maintenance.as_mut() {
            maintenance.service(&mut self.pool);
        }
        let Some(mut master) = self.pool.acquire(outputs.len(), num_samples) else {
            write_silence(outputs, num_samples);
            self.ctx.stats.record_dropout();
            return;
        };
        master.clear();

        let mix = self.ctx.settings.snapshot();
        if mix.input_monitoring {
            if let Some(inputs) = inputs {
                master.copy_from_slices(inputs);
            }
        }

        if let Some(sources) = sources {
            self.mix_tracks(&mut master, sources);
        }

        apply_master_bus(&mut master, &mix);
        master.copy_to_slices(outputs);
        self.pool.release(master);

        self.update_performance(started, num_samples);
        self.ctx.stats.add_samples(num_samples as u64);
    }

    fn mix_tracks(&mut self, master: &mut AudioBuffer, sources: &BlockSources<'_>) {
        let tracks = sources.tracks.all_tracks();
        let solo_active = tracks.iter().any(|track| track.controls().solo());
        let block_end = sources.block_start + sources.block_length;

        for track in tracks.iter() {
            let mix = track.controls().snapshot();
            if mix.mute || (solo_active && !mix.solo) {
                continue;
            }

            // an exhausted pool skips the track, not the block
            let Some(mut track_buffer) =
                self.pool.acquire(master.num_channels(), master.num_samples())
            else {
                continue;
            };
            track_buffer.clear();

            for item in sources.media.items_on_track(track.id()) {
                if item.overlaps_time_range(sources.block_start, block_end) {
                    item.process_audio(
                        &mut track_buffer,
                        sources.block_start,
                        sources.block_length,
                    );
                }
            }

            apply_track_mix(&mut track_buffer, &mix);
            master.add_from(&track_buffer);
            self.pool.release(track_buffer);
        }
    }

    fn update_performance(&mut self, started: Instant, num_samples: usize) {
        let now = Instant::now();
        let busy = now.saturating_duration_since(started);
        let wall = self
            .last_block
            .map_or(busy, |previous| now.saturating_duration_since(previous));
        self.last_block = Some(now);

        let budget = Duration::from_secs_f64(num_samples as f64 / self.ctx.config.sample_rate);
        if let Some(usage) = self.meter.record(busy, wall, budget) {
            self.ctx.stats.publish_cpu(usage);
        }
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// Direct pool access for hosts that size it themselves
    pub fn pool_mut(&mut self) -> &mut BufferPool {
        &mut self.pool
    }

    pub fn stats(&self) -> &PerformanceStats {
        &self.ctx.stats
    }

    /// Zero the published counters and restart the CPU window
    pub fn reset_performance_stats(&mut self) {
        self.ctx.stats.reset();
        self.meter.reset();
        self.last_block = None;
    }

    /// Block latency at the configured block size, in milliseconds
    pub fn latency_ms(&self) -> f64 {
        self.ctx.config.latency_ms()
    }
}

impl Drop for MixEngine {
    fn drop(&mut self) {
        if self.initialized {
            self.ctx.engine_stopped();
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
