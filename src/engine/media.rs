//! Built-in media items
//!
//! Synthetic material for exercising the mix path without a media
//! subsystem: a sine tone placed on the timeline.

use std::f64::consts::TAU;

use super::buffer::AudioBuffer;
use super::tracks::MediaItem;

/// A sine tone occupying `[position, position + length)` on the timeline
///
/// The phase is measured from `position`, so the tone is continuous across
/// block boundaries and restarts cleanly when a loop jumps back.
#[derive(Debug, Clone, PartialEq)]
pub struct ToneItem {
    pub position: f64,
    pub length: f64,
    pub frequency: f64,
    pub amplitude: f32,
}

impl ToneItem {
    pub fn new(position: f64, length: f64, frequency: f64, amplitude: f32) -> Self {
        Self {
            position,
            length: length.max(0.0),
            frequency,
            amplitude,
        }
    }

    pub fn end(&self) -> f64 {
        self.position + self.length
    }
}

impl MediaItem for ToneItem {
    fn overlaps_time_range(&self, start: f64, end: f64) -> bool {
        !(self.end() <= start || self.position >= end)
    }

    fn process_audio(&self, buffer: &mut AudioBuffer, start_time: f64, _length: f64) {
        let sample_rate = buffer.sample_rate();
        let item_end = self.end();
        let omega = TAU * self.frequency;

        for channel in 0..buffer.num_channels() {
            let samples = buffer.channel_mut(channel);
            for (i, sample) in samples.iter_mut().enumerate() {
                let t = start_time + i as f64 / sample_rate;
                if t >= self.position && t < item_end {
                    let phase = omega * (t - self.position);
                    *sample += self.amplitude * phase.sin() as f32;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_overlap_is_half_open() {
        let tone = ToneItem::new(2.0, 1.0, 440.0, 1.0);
        assert!(tone.overlaps_time_range(1.5, 2.5));
        assert!(tone.overlaps_time_range(2.9, 4.0));
        assert!(!tone.overlaps_time_range(3.0, 4.0));
        assert!(!tone.overlaps_time_range(1.0, 2.0));
    }

    #[test]
    fn test_tone_only_inside_item() {
        let tone = ToneItem::new(0.5, 0.25, 1000.0, 0.5);
        let mut buffer = AudioBuffer::with_sample_rate(2, 48_000, 48_000.0);
        tone.process_audio(&mut buffer, 0.0, 1.0);

        assert_eq!(buffer.channel(0)[23_999], 0.0);
        assert_eq!(buffer.channel(1)[36_000], 0.0);
        let peak = buffer.peak_level(Some(0));
        assert!(peak > 0.49 && peak <= 0.5);
        assert_eq!(buffer.channel(0), buffer.channel(1));
    }

    #[test]
    fn test_phase_continuous_across_blocks() {
        let tone = ToneItem::new(0.0, 1.0, 100.0, 1.0);
        let mut whole = AudioBuffer::with_sample_rate(1, 960, 48_000.0);
        tone.process_audio(&mut whole, 0.0, 0.02);

        let mut second = AudioBuffer::with_sample_rate(1, 480, 48_000.0);
        tone.process_audio(&mut second, 0.01, 0.01);
        assert_abs_diff_eq!(second.channel(0)[10], whole.channel(0)[490], epsilon = 1e-5);
    }
}
