//! Offline rendering and WAV export
//!
//! Drives an [`EngineProcessor`] block by block without a host and writes the
//! result to disk. Everything here runs on the control context and may
//! allocate freely.

use std::path::Path;

use hound::{SampleFormat, WavSpec, WavWriter};
use log::info;

use super::buffer::AudioBuffer;
use super::processor::EngineProcessor;
use super::tracks::MediaSource;
use crate::error::{NuevaError, Result};

/// Export format configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportFormat {
    /// Bit depth: 16, 24, or 32 (float)
    pub bit_depth: u16,
}

impl Default for ExportFormat {
    fn default() -> Self {
        ExportFormat { bit_depth: 24 }
    }
}

impl ExportFormat {
    pub fn new(bit_depth: u16) -> Self {
        ExportFormat { bit_depth }
    }

    /// 16-bit integer PCM
    pub fn cd_quality() -> Self {
        ExportFormat { bit_depth: 16 }
    }

    /// 32-bit float PCM
    pub fn float() -> Self {
        ExportFormat { bit_depth: 32 }
    }

    fn spec(&self, channels: u16, sample_rate: u32) -> Result<WavSpec> {
        let sample_format = match self.bit_depth {
            16 | 24 => SampleFormat::Int,
            32 => SampleFormat::Float,
            other => {
                return Err(NuevaError::UnsupportedFormat {
                    format: format!("{other}-bit audio (only 16, 24, 32 supported)"),
                })
            }
        };
        Ok(WavSpec {
            channels,
            sample_rate,
            bits_per_sample: self.bit_depth,
            sample_format,
        })
    }
}

/// Write `buffer` to a WAV file at the buffer's sample rate
///
/// # Arguments
/// * `buffer` - Audio to write; every channel becomes a WAV channel
/// * `path` - Destination file, overwritten if it exists
/// * `format` - Sample encoding
pub fn export_wav(buffer: &AudioBuffer, path: &Path, format: ExportFormat) -> Result<()> {
    let channels = u16::try_from(buffer.num_channels()).map_err(|_| {
        NuevaError::UnsupportedFormat {
            format: format!("{} channels", buffer.num_channels()),
        }
    })?;
    let spec = format.spec(channels, buffer.sample_rate().round() as u32)?;
    let mut writer = WavWriter::create(path, spec)?;

    for frame in 0..buffer.num_samples() {
        for channel in buffer.iter_channels() {
            let sample = channel[frame];
            match format.bit_depth {
                16 => writer.write_sample((sample * 32767.0).clamp(-32768.0, 32767.0) as i16)?,
                // 24-bit is carried in an i32 by hound
                24 => writer
                    .write_sample((sample * 8_388_607.0).clamp(-8_388_608.0, 8_388_607.0) as i32)?,
                _ => writer.write_sample(sample)?,
            }
        }
    }

    writer.finalize()?;
    info!(
        "Exported {} ch x {} samples ({}-bit) to {}",
        buffer.num_channels(),
        buffer.num_samples(),
        format.bit_depth,
        path.display()
    );
    Ok(())
}

/// Run `processor` for `duration_secs` and collect its output
///
/// Uses the configured block size and channel count. The final block is
/// shortened so the result is exactly `duration_secs` long.
pub fn render_offline<M: MediaSource>(
    processor: &mut EngineProcessor<M>,
    duration_secs: f64,
) -> AudioBuffer {
    let config = &processor.mixer().context().config;
    let sample_rate = config.sample_rate;
    let num_channels = config.channels;
    let block_size = config.block_size;
    let total = (duration_secs.max(0.0) * sample_rate).round() as usize;

    let mut rendered = AudioBuffer::with_sample_rate(num_channels, total, sample_rate);
    let mut scratch = vec![vec![0.0f32; block_size]; num_channels];

    let mut offset = 0;
    while offset < total {
        let len = block_size.min(total - offset);
        {
            let mut outputs: Vec<&mut [f32]> =
                scratch.iter_mut().map(|ch| &mut ch[..len]).collect();
            processor.process(None, &mut outputs, len);
        }
        for (channel, block) in scratch.iter().enumerate() {
            rendered.channel_mut(channel)[offset..offset + len].copy_from_slice(&block[..len]);
        }
        offset += len;
    }

    rendered
}
