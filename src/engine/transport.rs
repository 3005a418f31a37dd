//! Transport State Machine
//!
//! Play/stop/record/pause state, playhead position, loop region and tempo.
//!
//! [`TransportState`] is the lock-free shared state. [`TransportCoordinator`]
//! is the handle both contexts use: the control context issues commands, the
//! real-time context calls [`TransportCoordinator::advance_block`] once per
//! block. Commands take effect at the start of the next block.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use super::context::EngineContext;
use super::settings::AtomicF64;
use crate::error::{NuevaError, Result};

/// Slowest accepted tempo in BPM
pub const MIN_TEMPO: f64 = 20.0;

/// Fastest accepted tempo in BPM
pub const MAX_TEMPO: f64 = 999.0;

/// Default loop end in seconds
pub const DEFAULT_LOOP_END: f64 = 60.0;

/// Default distance for rewind / fast-forward, in seconds
pub const DEFAULT_NUDGE_SECS: f64 = 1.0;

// ============================================================================
// Play State
// ============================================================================

/// Transport states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum PlayState {
    #[default]
    Stopped = 0,
    Playing = 1,
    Recording = 2,
    Paused = 3,
}

impl PlayState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => PlayState::Playing,
            2 => PlayState::Recording,
            3 => PlayState::Paused,
            _ => PlayState::Stopped,
        }
    }

    /// Whether the playhead advances in this state
    pub fn is_rolling(self) -> bool {
        matches!(self, PlayState::Playing | PlayState::Recording)
    }
}

impl fmt::Display for PlayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlayState::Stopped => write!(f, "Stopped"),
            PlayState::Playing => write!(f, "Playing"),
            PlayState::Recording => write!(f, "Recording"),
            PlayState::Paused => write!(f, "Paused"),
        }
    }
}

/// Where playback lands when it crosses the loop end
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopWrap {
    /// Keep the overshoot: `start + (position - end) mod (end - start)`
    #[default]
    Carry,
    /// Jump to the loop start and drop the overshoot
    Reset,
}

/// Display formats for [`TransportCoordinator::format_time`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeFormat {
    /// `12.345s`
    Seconds,
    /// Sample index at the engine rate
    Samples,
    /// `bar:beat.fraction`, both 1-based
    MeasuresBeats,
    /// `m:ss.mmm`
    MinutesSeconds,
    /// `hh:mm:ss.mmm`
    Timecode,
}

/// Loop region as read by one load of each field
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopRegion {
    pub enabled: bool,
    pub start: f64,
    pub end: f64,
}

/// Timing handed to the mix engine for one block
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockTiming {
    /// Playhead at the start of the block, in seconds
    pub start: f64,
    /// Block duration in seconds
    pub length: f64,
    /// Whether the transport was playing or recording
    pub rolling: bool,
}

// ============================================================================
// Shared State
// ============================================================================

/// Lock-free transport state
#[derive(Debug)]
pub struct TransportState {
    play_state: AtomicU8,
    position: AtomicF64,
    loop_enabled: AtomicBool,
    loop_start: AtomicF64,
    loop_end: AtomicF64,
    tempo: AtomicF64,
    time_sig_numerator: AtomicU32,
    time_sig_denominator: AtomicU32,
}

impl TransportState {
    pub fn new() -> Self {
        Self {
            play_state: AtomicU8::new(PlayState::Stopped as u8),
            position: AtomicF64::new(0.0),
            loop_enabled: AtomicBool::new(false),
            loop_start: AtomicF64::new(0.0),
            loop_end: AtomicF64::new(DEFAULT_LOOP_END),
            tempo: AtomicF64::new(120.0),
            time_sig_numerator: AtomicU32::new(4),
            time_sig_denominator: AtomicU32::new(4),
        }
    }

    pub fn play_state(&self) -> PlayState {
        PlayState::from_u8(self.play_state.load(Ordering::Acquire))
    }

    pub fn position(&self) -> f64 {
        self.position.load()
    }

    pub fn loop_region(&self) -> LoopRegion {
        LoopRegion {
            enabled: self.loop_enabled.load(Ordering::Relaxed),
            start: self.loop_start.load(),
            end: self.loop_end.load(),
        }
    }

    pub fn tempo(&self) -> f64 {
        self.tempo.load()
    }

    pub fn time_signature(&self) -> (u32, u32) {
        (
            self.time_sig_numerator.load(Ordering::Relaxed),
            self.time_sig_denominator.load(Ordering::Relaxed),
        )
    }

    /// Apply `next` to the play state atomically
    ///
    /// Returns the previous state when a transition happened, `None` when
    /// `next` rejected the current state.
    fn transition(&self, next: impl Fn(PlayState) -> Option<PlayState>) -> Option<PlayState> {
        self.play_state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |raw| {
                next(PlayState::from_u8(raw)).map(|state| state as u8)
            })
            .ok()
            .map(PlayState::from_u8)
    }
}

impl Default for TransportState {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Coordinator
// ============================================================================

/// Transport commands, time conversions and master controls
///
/// Cheap to clone; every clone drives the same shared state.
///
/// # Example
/// ```
/// use nueva_rt::config::EngineConfig;
/// use nueva_rt::engine::{EngineContext, PlayState, TransportCoordinator};
///
/// let ctx = EngineContext::new(EngineConfig::default()).unwrap();
/// let transport = TransportCoordinator::new(ctx);
/// transport.play();
/// assert_eq!(transport.play_state(), PlayState::Playing);
/// transport.toggle_play_pause();
/// assert_eq!(transport.play_state(), PlayState::Paused);
/// ```
#[derive(Debug, Clone)]
pub struct TransportCoordinator {
    ctx: Arc<EngineContext>,
}

impl TransportCoordinator {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &Arc<EngineContext> {
        &self.ctx
    }

    fn state(&self) -> &TransportState {
        &self.ctx.transport
    }

    fn log_transition(&self, command: &str, previous: Option<PlayState>) -> bool {
        match previous {
            Some(from) => {
                debug!(
                    "[TRANSPORT] {command}: {from} -> {} at {:.3}s",
                    self.play_state(),
                    self.play_position()
                );
                true
            }
            None => {
                debug!("[TRANSPORT] {command} ignored in {}", self.play_state());
                false
            }
        }
    }

    // ========================================================================
    // Standard Transport Controls
    // ========================================================================

    /// Start playback from the current position
    ///
    /// `Stopped | Paused -> Playing`. Returns whether the state changed.
    pub fn play(&self) -> bool {
        let previous = self.state().transition(|state| match state {
            PlayState::Stopped | PlayState::Paused => Some(PlayState::Playing),
            PlayState::Playing | PlayState::Recording => None,
        });
        self.log_transition("play", previous)
    }

    /// Stop playback or recording, keeping the playhead where it is
    ///
    /// `Any -> Stopped`.
    pub fn stop(&self) -> bool {
        let previous = self.state().transition(|state| match state {
            PlayState::Stopped => None,
            _ => Some(PlayState::Stopped),
        });
        self.log_transition("stop", previous)
    }

    /// Pause playback or recording
    ///
    /// `Playing | Recording -> Paused`.
    pub fn pause(&self) -> bool {
        let previous = self.state().transition(|state| match state {
            PlayState::Playing | PlayState::Recording => Some(PlayState::Paused),
            PlayState::Stopped | PlayState::Paused => None,
        });
        self.log_transition("pause", previous)
    }

    /// Start recording
    ///
    /// `Stopped | Paused -> Recording`. Recording advances the playhead like
    /// playback does.
    pub fn record(&self) -> bool {
        let previous = self.state().transition(|state| match state {
            PlayState::Stopped | PlayState::Paused => Some(PlayState::Recording),
            PlayState::Playing | PlayState::Recording => None,
        });
        self.log_transition("record", previous)
    }

    /// `Stopped | Paused -> Playing`, `Playing | Recording -> Paused`
    pub fn toggle_play_pause(&self) -> bool {
        let previous = self.state().transition(|state| match state {
            PlayState::Stopped | PlayState::Paused => Some(PlayState::Playing),
            PlayState::Playing | PlayState::Recording => Some(PlayState::Paused),
        });
        self.log_transition("toggle", previous)
    }

    /// Move the playhead; negative positions clamp to zero
    pub fn set_play_position(&self, seconds: f64) {
        let position = if seconds.is_nan() { 0.0 } else { seconds.max(0.0) };
        self.state().position.store(position);
        debug!("[TRANSPORT] Seek to {position:.3}s");
    }

    /// Move the playhead to zero
    pub fn go_to_start(&self) {
        self.set_play_position(0.0);
    }

    /// Move the playhead back by `seconds`
    pub fn rewind(&self, seconds: f64) {
        self.set_play_position(self.play_position() - seconds.abs());
    }

    /// Move the playhead forward by `seconds`
    pub fn fast_forward(&self, seconds: f64) {
        self.set_play_position(self.play_position() + seconds.abs());
    }

    /// Set the loop region; `start` must be before `end`
    pub fn set_loop_points(&self, start: f64, end: f64) -> Result<()> {
        if !(start.is_finite() && end.is_finite()) || start < 0.0 || start >= end {
            warn!("[TRANSPORT] Rejected loop points {start}..{end}");
            return Err(NuevaError::InvalidLoopRange { start, end });
        }
        self.state().loop_start.store(start);
        self.state().loop_end.store(end);
        debug!("[TRANSPORT] Loop region {start:.3}s..{end:.3}s");
        Ok(())
    }

    /// Enable or disable looping
    pub fn set_loop_enabled(&self, enabled: bool) {
        self.state().loop_enabled.store(enabled, Ordering::Relaxed);
    }

    /// Set the tempo in BPM (20-999)
    pub fn set_tempo(&self, bpm: f64) -> Result<()> {
        if !(MIN_TEMPO..=MAX_TEMPO).contains(&bpm) {
            warn!("[TRANSPORT] Rejected tempo {bpm}");
            return Err(NuevaError::InvalidTempo { bpm });
        }
        self.state().tempo.store(bpm);
        Ok(())
    }

    /// Set the time signature
    ///
    /// The numerator must be 1-32 and the denominator a power of two up to 32.
    pub fn set_time_signature(&self, numerator: u32, denominator: u32) -> Result<()> {
        let valid_denominator = denominator.is_power_of_two() && denominator <= 32;
        if !(1..=32).contains(&numerator) || !valid_denominator {
            warn!("[TRANSPORT] Rejected time signature {numerator}/{denominator}");
            return Err(NuevaError::InvalidTimeSignature {
                numerator,
                denominator,
            });
        }
        self.state()
            .time_sig_numerator
            .store(numerator, Ordering::Relaxed);
        self.state()
            .time_sig_denominator
            .store(denominator, Ordering::Relaxed);
        Ok(())
    }

    // ========================================================================
    // Real-time Advance
    // ========================================================================

    /// Timing for the block about to be processed, advancing the playhead
    ///
    /// While rolling, the playhead moves by `num_samples / sample_rate` and
    /// wraps at the loop end according to the configured [`LoopWrap`]. A seek
    /// issued while the block was being computed wins over the advance.
    pub fn advance_block(&self, num_samples: usize) -> BlockTiming {
        let length = num_samples as f64 / self.ctx.config.sample_rate;
        let start = self.state().position();
        let rolling = self.play_state().is_rolling();

        if rolling {
            let next = self.next_position(start, length);
            // a failed exchange means the control context seeked meanwhile
            let _ = self.state().position.compare_exchange(start, next);
        }

        BlockTiming {
            start,
            length,
            rolling,
        }
    }

    fn next_position(&self, position: f64, length: f64) -> f64 {
        let next = position + length;
        let region = self.loop_region();
        if !region.enabled || region.end <= region.start || next < region.end {
            return next;
        }

        match self.ctx.config.loop_wrap {
            LoopWrap::Reset => region.start,
            LoopWrap::Carry => {
                let overshoot = (next - region.end) % (region.end - region.start);
                region.start + overshoot
            }
        }
    }

    // ========================================================================
    // State Queries
    // ========================================================================

    pub fn play_state(&self) -> PlayState {
        self.state().play_state()
    }

    pub fn is_playing(&self) -> bool {
        self.play_state() == PlayState::Playing
    }

    pub fn is_recording(&self) -> bool {
        self.play_state() == PlayState::Recording
    }

    /// Playhead in seconds
    pub fn play_position(&self) -> f64 {
        self.state().position()
    }

    pub fn loop_region(&self) -> LoopRegion {
        self.state().loop_region()
    }

    pub fn tempo(&self) -> f64 {
        self.state().tempo()
    }

    pub fn time_signature(&self) -> (u32, u32) {
        self.state().time_signature()
    }

    // ========================================================================
    // Time Conversion
    // ========================================================================

    pub fn seconds_to_beats(&self, seconds: f64) -> f64 {
        seconds * (self.tempo() / 60.0)
    }

    pub fn beats_to_seconds(&self, beats: f64) -> f64 {
        beats * (60.0 / self.tempo())
    }

    /// Zero-based bar containing `seconds`, using the numerator as beats per bar
    pub fn bar_index(&self, seconds: f64) -> u64 {
        let (beats_per_bar, _) = self.time_signature();
        (self.seconds_to_beats(seconds.max(0.0)) / f64::from(beats_per_bar)).floor() as u64
    }

    /// Render a time for display
    pub fn format_time(&self, seconds: f64, format: TimeFormat) -> String {
        match format {
            TimeFormat::Seconds => format!("{seconds:.3}s"),
            TimeFormat::Samples => {
                format!("{}", (seconds * self.ctx.config.sample_rate) as i64)
            }
            TimeFormat::MeasuresBeats => {
                let (beats_per_bar, _) = self.time_signature();
                let beats_per_bar = f64::from(beats_per_bar);
                let beats = self.seconds_to_beats(seconds);
                let measure = (beats / beats_per_bar) as i64 + 1;
                let beat = beats % beats_per_bar + 1.0;
                format!("{measure}:{beat:.3}")
            }
            TimeFormat::MinutesSeconds => {
                let minutes = (seconds / 60.0) as i64;
                let secs = seconds % 60.0;
                format!("{minutes}:{secs:06.3}")
            }
            TimeFormat::Timecode => {
                let hours = (seconds / 3600.0) as i64;
                let minutes = ((seconds - hours as f64 * 3600.0) / 60.0) as i64;
                let secs = seconds % 60.0;
                format!("{hours:02}:{minutes:02}:{secs:06.3}")
            }
        }
    }

    // ========================================================================
    // Master Controls
    // ========================================================================

    /// Linear master volume, clamped to 0-2
    pub fn set_master_volume(&self, volume: f32) -> Result<()> {
        if !volume.is_finite() {
            return Err(NuevaError::InvalidParameter {
                name: "master_volume",
                value: f64::from(volume),
            });
        }
        self.ctx.settings.set_master_volume(volume);
        Ok(())
    }

    /// Master pan, clamped to -1 (left) ..= 1 (right)
    pub fn set_master_pan(&self, pan: f32) -> Result<()> {
        if !pan.is_finite() {
            return Err(NuevaError::InvalidParameter {
                name: "master_pan",
                value: f64::from(pan),
            });
        }
        self.ctx.settings.set_master_pan(pan);
        Ok(())
    }

    /// Flip the master mute; returns the new state
    pub fn toggle_master_mute(&self) -> bool {
        let muted = self.ctx.settings.toggle_master_mute();
        debug!("[MASTER] mute {}", if muted { "on" } else { "off" });
        muted
    }

    pub fn set_master_mute(&self, mute: bool) {
        self.ctx.settings.set_master_mute(mute);
    }

    pub fn set_input_monitoring(&self, enabled: bool) {
        self.ctx.settings.set_input_monitoring(enabled);
    }

    pub fn master_volume(&self) -> f32 {
        self.ctx.settings.master_volume()
    }

    pub fn master_pan(&self) -> f32 {
        self.ctx.settings.master_pan()
    }

    pub fn master_mute(&self) -> bool {
        self.ctx.settings.master_mute()
    }

    // ========================================================================
    // Performance
    // ========================================================================

    pub fn cpu_usage(&self) -> f64 {
        self.ctx.stats.cpu_usage()
    }

    pub fn peak_cpu_usage(&self) -> f64 {
        self.ctx.stats.peak_cpu_usage()
    }

    pub fn dropout_count(&self) -> u64 {
        self.ctx.stats.dropout_count()
    }

    pub fn samples_processed(&self) -> u64 {
        self.ctx.stats.samples_processed()
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
