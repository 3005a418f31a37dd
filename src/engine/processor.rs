//! Real-time block driver
//!
//! The host audio callback owns an [`EngineProcessor`] and calls
//! [`EngineProcessor::process`] once per block. The processor asks the
//! transport for this block's timing, then renders: with track material while
//! the transport is rolling, input monitoring only otherwise.

use log::info;

use super::mixer::{BlockSources, MixEngine};
use super::tracks::{MediaSource, TrackListReader};
use super::transport::{BlockTiming, TransportCoordinator};
use crate::error::Result;

pub struct EngineProcessor<M: MediaSource> {
    mixer: MixEngine,
    transport: TransportCoordinator,
    tracks: TrackListReader,
    media: M,
}

impl<M: MediaSource> EngineProcessor<M> {
    /// Wire a mixer to a transport, a track list and a media source
    ///
    /// `mixer` and `transport` must share one [`super::EngineContext`].
    pub fn new(
        mixer: MixEngine,
        transport: TransportCoordinator,
        tracks: TrackListReader,
        media: M,
    ) -> Self {
        Self {
            mixer,
            transport,
            tracks,
            media,
        }
    }

    /// Initialize the mixer; call before handing the processor to the host
    pub fn initialize(&mut self) -> Result<()> {
        self.mixer.initialize()?;
        info!(
            "Engine processor ready at {:.3}s ({})",
            self.transport.play_position(),
            self.transport.play_state()
        );
        Ok(())
    }

    /// Render one block and advance the playhead
    pub fn process(
        &mut self,
        inputs: Option<&[&[f32]]>,
        outputs: &mut [&mut [f32]],
        num_samples: usize,
    ) -> BlockTiming {
        let timing = self.transport.advance_block(num_samples);

        if timing.rolling {
            let sources = BlockSources {
                media: &self.media,
                tracks: &self.tracks,
                block_start: timing.start,
                block_length: timing.length,
            };
            self.mixer
                .process_block_with_sources(inputs, outputs, num_samples, &sources);
        } else {
            self.mixer.process_block(inputs, outputs, num_samples);
        }

        timing
    }

    pub fn mixer(&self) -> &MixEngine {
        &self.mixer
    }

    pub fn mixer_mut(&mut self) -> &mut MixEngine {
        &mut self.mixer
    }

    pub fn transport(&self) -> &TransportCoordinator {
        &self.transport
    }

    pub fn media(&self) -> &M {
        &self.media
    }

    /// Swap media between blocks
    pub fn media_mut(&mut self) -> &mut M {
        &mut self.media
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::buffer::AudioBuffer;
    use crate::engine::context::EngineContext;
    use crate::engine::tracks::{MediaItem, MediaMap, TrackList};
    use approx::assert_relative_eq;
    use std::sync::Arc;

    /// Writes the block start time into channel 0
    struct Clock;

    impl MediaItem for Clock {
        fn overlaps_time_range(&self, _start: f64, _end: f64) -> bool {
            true
        }

        fn process_audio(&self, buffer: &mut AudioBuffer, start_time: f64, _length: f64) {
            buffer.channel_mut(0).fill(start_time as f32);
        }
    }

    fn processor() -> (EngineProcessor<MediaMap>, TransportCoordinator, TrackList) {
        let ctx = EngineContext::new(EngineConfig::default()).unwrap();
        let transport = TransportCoordinator::new(Arc::clone(&ctx));
        let mut tracks = TrackList::new();
        let mut media = MediaMap::new();
        media.add_item(tracks.add_track("Clock"), Arc::new(Clock));

        let mut processor =
            EngineProcessor::new(MixEngine::new(ctx), transport.clone(), tracks.reader(), media);
        processor.initialize().unwrap();
        (processor, transport, tracks)
    }

    #[test]
    fn test_tracks_silent_while_stopped() {
        let (mut processor, transport, _tracks) = processor();
        transport.set_play_position(1.0);
        let mut out = vec![7.0f32; 480];
        let timing = processor.process(None, &mut [&mut out[..]], 480);
        assert!(!timing.rolling);
        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(transport.play_position(), 1.0);
    }

    #[test]
    fn test_renders_at_pre_advance_position() {
        let (mut processor, transport, _tracks) = processor();
        transport.set_play_position(1.5);
        transport.play();

        let mut out = vec![0.0f32; 480];
        processor.process(None, &mut [&mut out[..]], 480);
        assert_relative_eq!(out[0], 1.5);
        assert_relative_eq!(transport.play_position(), 1.51, epsilon = 1e-9);

        processor.process(None, &mut [&mut out[..]], 480);
        assert_relative_eq!(out[0], 1.51, epsilon = 1e-6);
    }

    #[test]
    fn test_removed_track_stops_contributing() {
        let (mut processor, transport, mut tracks) = processor();
        transport.play();
        transport.set_play_position(2.0);
        tracks.clear();

        let mut out = vec![1.0f32; 64];
        processor.process(None, &mut [&mut out[..]], 64);
        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(tracks.collect_garbage(), 0);
        assert_eq!(tracks.retired_count(), 0);
    }
}
