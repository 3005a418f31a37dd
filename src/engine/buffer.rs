//! Audio Buffer Management
//!
//! Planar multichannel sample storage for the real-time path.
//!
//! All channels live in one allocation. Each channel starts on a 16-byte
//! boundary (the stride is rounded up to a whole SIMD lane), so the channel
//! views can be handed to vectorised loops without realignment.
//!
//! Range handling is clamp-based: sample ranges are intersected with the
//! valid `[0, num_samples)` range of every buffer involved, and an invalid
//! channel or start index turns the call into a no-op. Only the fail-fast
//! accessors [`AudioBuffer::channel`] and [`AudioBuffer::channel_mut`] panic;
//! they are meant for control-context code.

use std::fmt;
use std::ops::Range;

use bytemuck::{Pod, Zeroable};

// ============================================================================
// Constants
// ============================================================================

/// Default sample rate for new buffers (48kHz)
pub const DEFAULT_SAMPLE_RATE: f64 = 48_000.0;

/// Alignment of every channel start in bytes
pub const SIMD_ALIGNMENT: usize = 16;

/// Samples per aligned lane
const LANE_WIDTH: usize = SIMD_ALIGNMENT / std::mem::size_of::<f32>();

/// Floor applied before converting a linear level to dB
pub const MIN_LINEAR_LEVEL: f32 = 1e-6;

// ============================================================================
// Helper Functions
// ============================================================================

/// Convert decibels to linear amplitude
#[inline]
pub fn db_to_linear(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

/// Convert linear amplitude to decibels
///
/// The input is floored at [`MIN_LINEAR_LEVEL`], so silence reads as
/// -120 dB instead of negative infinity.
#[inline]
pub fn linear_to_db(linear: f32) -> f32 {
    20.0 * linear.max(MIN_LINEAR_LEVEL).log10()
}

/// Number of lanes needed to hold `num_channels` channels of `num_samples`
#[inline]
fn lanes_for(num_channels: usize, num_samples: usize) -> usize {
    num_channels * num_samples.div_ceil(LANE_WIDTH)
}

// ============================================================================
// Aligned Storage
// ============================================================================

#[derive(Clone, Copy, Default, Pod, Zeroable)]
#[repr(C, align(16))]
struct Lane([f32; LANE_WIDTH]);

// ============================================================================
// Audio Buffer
// ============================================================================

/// Multichannel planar audio buffer
///
/// `set_size` only reallocates when the requested shape needs more storage
/// than is already allocated. Shrinking (or regrowing within capacity) is a
/// logical resize, which is what lets the buffer pool hand out buffers
/// without touching the allocator.
///
/// # Example
/// ```
/// use nueva_rt::engine::AudioBuffer;
///
/// let mut buffer = AudioBuffer::new(2, 512);
/// buffer.fill(0.5);
/// buffer.apply_gain(0.5);
/// assert_eq!(buffer.peak_level(None), 0.25);
/// ```
#[derive(Clone)]
pub struct AudioBuffer {
    lanes: Vec<Lane>,
    num_channels: usize,
    num_samples: usize,
    /// Distance between channel starts in samples (multiple of the lane width)
    stride: usize,
    sample_rate: f64,
}

impl AudioBuffer {
    /// Create a zeroed buffer with the given shape at the default sample rate
    pub fn new(num_channels: usize, num_samples: usize) -> Self {
        let mut buffer = Self::empty();
        buffer.set_size(num_channels, num_samples);
        buffer
    }

    /// Create a zeroed buffer with an explicit sample rate
    pub fn with_sample_rate(num_channels: usize, num_samples: usize, sample_rate: f64) -> Self {
        let mut buffer = Self::new(num_channels, num_samples);
        buffer.sample_rate = sample_rate;
        buffer
    }

    /// Create a buffer with no channels and no storage
    pub fn empty() -> Self {
        Self {
            lanes: Vec::new(),
            num_channels: 0,
            num_samples: 0,
            stride: 0,
            sample_rate: DEFAULT_SAMPLE_RATE,
        }
    }

    // ========================================================================
    // Shape
    // ========================================================================

    /// Resize the buffer
    ///
    /// Returns `true` when the call had to allocate. Contents are undefined
    /// after a resize; call [`AudioBuffer::clear`] before reading.
    ///
    /// Must not be called on the real-time path unless [`AudioBuffer::fits`]
    /// has confirmed the shape is within capacity.
    pub fn set_size(&mut self, num_channels: usize, num_samples: usize) -> bool {
        let required = lanes_for(num_channels, num_samples);
        let reallocated = required > self.lanes.len();
        if reallocated {
            self.lanes.resize(required, Lane::default());
        }

        self.num_channels = num_channels;
        self.num_samples = num_samples;
        self.stride = num_samples.div_ceil(LANE_WIDTH) * LANE_WIDTH;
        reallocated
    }

    /// Whether a shape can be adopted without reallocating
    pub fn fits(&self, num_channels: usize, num_samples: usize) -> bool {
        lanes_for(num_channels, num_samples) <= self.lanes.len()
    }

    /// Allocated storage in samples (across all channels, including padding)
    pub fn capacity(&self) -> usize {
        self.lanes.len() * LANE_WIDTH
    }

    /// Number of channels
    pub fn num_channels(&self) -> usize {
        self.num_channels
    }

    /// Number of samples per channel
    pub fn num_samples(&self) -> usize {
        self.num_samples
    }

    /// Sample rate in Hz
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Set the sample rate in Hz
    pub fn set_sample_rate(&mut self, sample_rate: f64) {
        self.sample_rate = sample_rate;
    }

    /// Duration in seconds
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate > 0.0 {
            self.num_samples as f64 / self.sample_rate
        } else {
            0.0
        }
    }

    // ========================================================================
    // Channel Access
    // ========================================================================

    fn data(&self) -> &[f32] {
        bytemuck::cast_slice(&self.lanes)
    }

    fn data_mut(&mut self) -> &mut [f32] {
        bytemuck::cast_slice_mut(&mut self.lanes)
    }

    fn span(&self, channel: usize) -> Range<usize> {
        let start = channel * self.stride;
        start..start + self.num_samples
    }

    /// Intersect `[start, start + len)` with the valid sample range
    fn clamp_range(&self, start: usize, len: usize) -> Option<Range<usize>> {
        if start >= self.num_samples {
            return None;
        }
        Some(start..start + len.min(self.num_samples - start))
    }

    /// Get a channel, or `None` if the index is out of range
    pub fn get_channel(&self, channel: usize) -> Option<&[f32]> {
        if channel >= self.num_channels {
            return None;
        }
        Some(&self.data()[self.span(channel)])
    }

    /// Get a mutable channel, or `None` if the index is out of range
    pub fn get_channel_mut(&mut self, channel: usize) -> Option<&mut [f32]> {
        if channel >= self.num_channels {
            return None;
        }
        let span = self.span(channel);
        Some(&mut self.data_mut()[span])
    }

    /// Get a channel
    ///
    /// # Panics
    /// Panics if `channel >= num_channels()`.
    pub fn channel(&self, channel: usize) -> &[f32] {
        let count = self.num_channels;
        self.get_channel(channel)
            .unwrap_or_else(|| panic!("channel {channel} out of range ({count} channels)"))
    }

    /// Get a mutable channel
    ///
    /// # Panics
    /// Panics if `channel >= num_channels()`.
    pub fn channel_mut(&mut self, channel: usize) -> &mut [f32] {
        let count = self.num_channels;
        self.get_channel_mut(channel)
            .unwrap_or_else(|| panic!("channel {channel} out of range ({count} channels)"))
    }

    /// Iterate over all channels in order
    pub fn iter_channels(&self) -> impl Iterator<Item = &[f32]> + '_ {
        (0..self.num_channels).map(move |ch| &self.data()[self.span(ch)])
    }

    fn for_each_channel_mut(&mut self, mut f: impl FnMut(usize, &mut [f32])) {
        if self.num_channels == 0 || self.num_samples == 0 {
            return;
        }
        let (stride, len, count) = (self.stride, self.num_samples, self.num_channels);
        for (ch, chunk) in self.data_mut().chunks_exact_mut(stride).take(count).enumerate() {
            f(ch, &mut chunk[..len]);
        }
    }

    // ========================================================================
    // Clearing
    // ========================================================================

    /// Zero every sample
    pub fn clear(&mut self) {
        self.for_each_channel_mut(|_, samples| samples.fill(0.0));
    }

    /// Zero `[start, start + len)` on every channel
    pub fn clear_range(&mut self, start: usize, len: usize) {
        if let Some(range) = self.clamp_range(start, len) {
            self.for_each_channel_mut(|_, samples| samples[range.clone()].fill(0.0));
        }
    }

    /// Zero a single channel
    pub fn clear_channel(&mut self, channel: usize) {
        if let Some(samples) = self.get_channel_mut(channel) {
            samples.fill(0.0);
        }
    }

    /// Set every sample to `value`
    pub fn fill(&mut self, value: f32) {
        self.for_each_channel_mut(|_, samples| samples.fill(value));
    }

    // ========================================================================
    // Gain
    // ========================================================================

    /// Scale the whole buffer by `gain`
    pub fn apply_gain(&mut self, gain: f32) {
        if gain == 1.0 {
            return;
        }
        self.for_each_channel_mut(|_, samples| samples.iter_mut().for_each(|s| *s *= gain));
    }

    /// Scale `[start, start + len)` on every channel by `gain`
    pub fn apply_gain_range(&mut self, gain: f32, start: usize, len: usize) {
        if gain == 1.0 {
            return;
        }
        if let Some(range) = self.clamp_range(start, len) {
            self.for_each_channel_mut(|_, samples| {
                samples[range.clone()].iter_mut().for_each(|s| *s *= gain);
            });
        }
    }

    /// Linear gain ramp from `start_gain` to `end_gain` over the whole buffer
    pub fn apply_gain_ramp(&mut self, start_gain: f32, end_gain: f32) {
        self.apply_gain_ramp_range(start_gain, end_gain, 0, self.num_samples);
    }

    /// Linear gain ramp over `[start, start + len)`
    ///
    /// The first sample gets `start_gain` and the last gets `end_gain`. A
    /// one-sample ramp applies `end_gain`.
    pub fn apply_gain_ramp_range(
        &mut self,
        start_gain: f32,
        end_gain: f32,
        start: usize,
        len: usize,
    ) {
        let Some(range) = self.clamp_range(start, len) else {
            return;
        };
        match range.len() {
            0 => {}
            1 => self.apply_gain_range(end_gain, range.start, 1),
            count => {
                let step = (end_gain - start_gain) / (count - 1) as f32;
                self.for_each_channel_mut(|_, samples| {
                    for (i, sample) in samples[range.clone()].iter_mut().enumerate() {
                        *sample *= start_gain + step * i as f32;
                    }
                });
            }
        }
    }

    /// Scale a single channel by `gain`
    pub fn apply_channel_gain(&mut self, channel: usize, gain: f32) {
        if gain == 1.0 {
            return;
        }
        if let Some(samples) = self.get_channel_mut(channel) {
            samples.iter_mut().for_each(|s| *s *= gain);
        }
    }

    // ========================================================================
    // Mixing
    // ========================================================================

    fn accumulate(
        &mut self,
        source: &AudioBuffer,
        source_start: usize,
        dest_start: usize,
        len: usize,
        gain: f32,
    ) {
        if source_start >= source.num_samples || dest_start >= self.num_samples {
            return;
        }
        let count = len
            .min(source.num_samples - source_start)
            .min(self.num_samples - dest_start);
        let channels = self.num_channels.min(source.num_channels);

        for ch in 0..channels {
            let src_span = source.span(ch);
            let src = &source.data()[src_span.start + source_start..][..count];
            let dst_span = self.span(ch);
            let dst = &mut self.data_mut()[dst_span.start + dest_start..][..count];
            if gain == 1.0 {
                dst.iter_mut().zip(src).for_each(|(d, s)| *d += *s);
            } else {
                dst.iter_mut().zip(src).for_each(|(d, s)| *d += *s * gain);
            }
        }
    }

    /// Sum `source` into this buffer over the overlapping channels and samples
    pub fn add_from(&mut self, source: &AudioBuffer) {
        self.accumulate(source, 0, 0, usize::MAX, 1.0);
    }

    /// Sum `len` samples of `source` starting at `source_start` into this
    /// buffer starting at `dest_start`
    pub fn add_from_range(
        &mut self,
        source: &AudioBuffer,
        source_start: usize,
        dest_start: usize,
        len: usize,
    ) {
        self.accumulate(source, source_start, dest_start, len, 1.0);
    }

    /// Sum `source * gain` into this buffer
    pub fn add_from_with_gain(&mut self, source: &AudioBuffer, gain: f32) {
        self.accumulate(source, 0, 0, usize::MAX, gain);
    }

    /// Replace this buffer's content with `source`
    ///
    /// Channels the source does not have are zeroed.
    pub fn copy_from(&mut self, source: &AudioBuffer) {
        let channels = self.num_channels.min(source.num_channels);
        self.copy_from_range(source, 0, 0, usize::MAX);
        for ch in channels..self.num_channels {
            self.clear_channel(ch);
        }
    }

    /// Copy `len` samples of `source` starting at `source_start` into this
    /// buffer starting at `dest_start`
    pub fn copy_from_range(
        &mut self,
        source: &AudioBuffer,
        source_start: usize,
        dest_start: usize,
        len: usize,
    ) {
        if source_start >= source.num_samples || dest_start >= self.num_samples {
            return;
        }
        let count = len
            .min(source.num_samples - source_start)
            .min(self.num_samples - dest_start);

        for ch in 0..self.num_channels.min(source.num_channels) {
            let src_span = source.span(ch);
            let src = &source.data()[src_span.start + source_start..][..count];
            let dst_span = self.span(ch);
            self.data_mut()[dst_span.start + dest_start..][..count].copy_from_slice(src);
        }
    }

    /// Copy one channel over another within this buffer
    pub fn copy_channel(&mut self, source_channel: usize, dest_channel: usize) {
        if source_channel >= self.num_channels
            || dest_channel >= self.num_channels
            || source_channel == dest_channel
        {
            return;
        }
        let src = self.span(source_channel);
        let dest = self.span(dest_channel).start;
        self.data_mut().copy_within(src, dest);
    }

    // ========================================================================
    // Host I/O
    // ========================================================================

    /// Copy host channel slices into this buffer
    ///
    /// Copies `min(num_channels, inputs.len())` channels; each channel copies
    /// as many samples as both sides have.
    pub fn copy_from_slices(&mut self, inputs: &[&[f32]]) {
        let len = self.num_samples;
        self.for_each_channel_mut(|ch, samples| {
            if let Some(input) = inputs.get(ch) {
                let count = len.min(input.len());
                samples[..count].copy_from_slice(&input[..count]);
            }
        });
    }

    /// Copy this buffer into host channel slices
    ///
    /// Copies `min(num_channels, outputs.len())` channels; output samples past
    /// this buffer's length are left untouched.
    pub fn copy_to_slices(&self, outputs: &mut [&mut [f32]]) {
        for (samples, output) in self.iter_channels().zip(outputs.iter_mut()) {
            let count = samples.len().min(output.len());
            output[..count].copy_from_slice(&samples[..count]);
        }
    }

    // ========================================================================
    // Analysis
    // ========================================================================

    /// Channels selected by an optional index; `None` selects all channels
    fn selected_channels(&self, channel: Option<usize>) -> Option<Range<usize>> {
        match channel {
            None => Some(0..self.num_channels),
            Some(ch) if ch < self.num_channels => Some(ch..ch + 1),
            Some(_) => None,
        }
    }

    /// RMS level, `sqrt(mean(sample²))`
    ///
    /// `None` aggregates across every channel as one concatenated sample set.
    /// Returns 0 for an empty selection or an invalid channel.
    pub fn rms_level(&self, channel: Option<usize>) -> f32 {
        let Some(channels) = self.selected_channels(channel) else {
            return 0.0;
        };
        let count = channels.len() * self.num_samples;
        if count == 0 {
            return 0.0;
        }

        let sum: f64 = channels
            .flat_map(|ch| self.data()[self.span(ch)].iter())
            .map(|&s| f64::from(s) * f64::from(s))
            .sum();
        (sum / count as f64).sqrt() as f32
    }

    /// Peak level, `max(|sample|)`, with the same channel selection as
    /// [`AudioBuffer::rms_level`]
    pub fn peak_level(&self, channel: Option<usize>) -> f32 {
        let Some(channels) = self.selected_channels(channel) else {
            return 0.0;
        };
        channels
            .flat_map(|ch| self.data()[self.span(ch)].iter())
            .fold(0.0_f32, |peak, s| peak.max(s.abs()))
    }

    /// Minimum and maximum sample values; `(0.0, 0.0)` for an empty selection
    pub fn find_min_max(&self, channel: Option<usize>) -> (f32, f32) {
        let Some(channels) = self.selected_channels(channel) else {
            return (0.0, 0.0);
        };
        channels
            .flat_map(|ch| self.data()[self.span(ch)].iter().copied())
            .fold(None, |acc: Option<(f32, f32)>, s| match acc {
                None => Some((s, s)),
                Some((lo, hi)) => Some((lo.min(s), hi.max(s))),
            })
            .unwrap_or((0.0, 0.0))
    }
}

impl Default for AudioBuffer {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for AudioBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioBuffer")
            .field("num_channels", &self.num_channels)
            .field("num_samples", &self.num_samples)
            .field("sample_rate", &self.sample_rate)
            .field("capacity", &self.capacity())
            .finish()
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
