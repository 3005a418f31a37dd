//! Integration Tests
//!
//! End-to-end tests for the mix core: transport, track list, mixer and pool
//! wired together the way a host would use them.

use std::sync::Arc;
use std::thread;

use approx::assert_relative_eq;
use nueva_rt::engine::{
    export_wav, render_offline, AudioBuffer, EngineContext, EngineProcessor, ExportFormat,
    LoopWrap, MediaItem, MediaMap, MixEngine, PlayState, ToneItem, TrackList,
    TransportCoordinator,
};
use nueva_rt::EngineConfig;

/// Constant level on channel 0 across the whole timeline
struct Level(f32);

impl MediaItem for Level {
    fn overlaps_time_range(&self, _start: f64, _end: f64) -> bool {
        true
    }

    fn process_audio(&self, buffer: &mut AudioBuffer, _start_time: f64, _length: f64) {
        for sample in buffer.channel_mut(0) {
            *sample += self.0;
        }
    }
}

struct Rig {
    transport: TransportCoordinator,
    tracks: TrackList,
    processor: EngineProcessor<MediaMap>,
}

fn rig(config: EngineConfig, levels: &[f32]) -> Rig {
    let ctx = EngineContext::new(config).unwrap();
    let transport = TransportCoordinator::new(Arc::clone(&ctx));
    let mut tracks = TrackList::new();
    let mut media = MediaMap::new();
    for (i, &level) in levels.iter().enumerate() {
        let id = tracks.add_track(&format!("Track {}", i + 1));
        media.add_item(id, Arc::new(Level(level)));
    }
    let mut processor =
        EngineProcessor::new(MixEngine::new(ctx), transport.clone(), tracks.reader(), media);
    processor.initialize().unwrap();
    Rig {
        transport,
        tracks,
        processor,
    }
}

fn stereo_block(processor: &mut EngineProcessor<MediaMap>, n: usize) -> (Vec<f32>, Vec<f32>) {
    let mut left = vec![0.5f32; n];
    let mut right = vec![0.5f32; n];
    processor.process(None, &mut [&mut left[..], &mut right[..]], n);
    (left, right)
}

// === End-to-End Mixing ===

#[test]
fn test_two_tracks_sum_on_channel_zero() {
    let mut rig = rig(EngineConfig::default(), &[0.5, 0.5]);
    rig.transport.play();

    let (left, right) = stereo_block(&mut rig.processor, 512);
    assert!(left.iter().all(|&s| (s - 1.0).abs() < 1e-6));
    assert!(right.iter().all(|&s| s == 0.0));
    assert_eq!(rig.transport.samples_processed(), 512);
}

#[test]
fn test_master_mute_silences_everything() {
    let mut rig = rig(EngineConfig::default(), &[0.5, 0.5]);
    rig.transport.play();
    rig.transport.set_master_mute(true);

    let (left, right) = stereo_block(&mut rig.processor, 512);
    assert!(left.iter().chain(right.iter()).all(|&s| s == 0.0));
}

#[test]
fn test_stopped_transport_renders_input_only() {
    let mut rig = rig(EngineConfig::default(), &[0.5]);
    let input = vec![0.25f32; 256];
    let mut left = vec![0.0f32; 256];
    let mut right = vec![0.0f32; 256];
    rig.processor.process(
        Some(&[&input[..], &input[..]]),
        &mut [&mut left[..], &mut right[..]],
        256,
    );
    assert!(left.iter().all(|&s| s == 0.25));
    assert_eq!(rig.transport.play_state(), PlayState::Stopped);
    assert_eq!(rig.transport.play_position(), 0.0);
}

#[test]
fn test_track_edits_apply_next_block() {
    let mut rig = rig(EngineConfig::default(), &[0.5, 0.25]);
    rig.transport.play();

    let (left, _) = stereo_block(&mut rig.processor, 128);
    assert_relative_eq!(left[0], 0.75);

    let first = rig.tracks.tracks()[0].id();
    rig.tracks.remove(first).unwrap();
    let (left, _) = stereo_block(&mut rig.processor, 128);
    assert_relative_eq!(left[0], 0.25);
    assert_eq!(rig.tracks.retired_count(), 0);
}

// === Transport Timing ===

#[test]
fn test_loop_wrap_policies() {
    for (wrap, expected) in [(LoopWrap::Carry, 2.9), (LoopWrap::Reset, 2.0)] {
        let config = EngineConfig {
            block_size: 48_000,
            max_buffers: 4,
            preallocated_buffers: 2,
            loop_wrap: wrap,
            ..EngineConfig::default()
        };
        let mut rig = rig(config, &[]);
        rig.transport.set_loop_points(2.0, 5.0).unwrap();
        rig.transport.set_loop_enabled(true);
        rig.transport.set_play_position(4.9);
        rig.transport.play();

        let timing = rig.processor.process(None, &mut [], 48_000);
        assert_relative_eq!(timing.start, 4.9);
        assert_relative_eq!(rig.transport.play_position(), expected, epsilon = 1e-9);
    }
}

#[test]
fn test_pause_and_resume_keep_position() {
    let mut rig = rig(EngineConfig::default(), &[]);
    rig.transport.play();
    for _ in 0..10 {
        stereo_block(&mut rig.processor, 480);
    }
    assert_relative_eq!(rig.transport.play_position(), 0.1, epsilon = 1e-9);

    rig.transport.pause();
    stereo_block(&mut rig.processor, 480);
    assert_relative_eq!(rig.transport.play_position(), 0.1, epsilon = 1e-9);

    rig.transport.play();
    stereo_block(&mut rig.processor, 480);
    assert_relative_eq!(rig.transport.play_position(), 0.11, epsilon = 1e-9);

    rig.transport.stop();
    assert_relative_eq!(rig.transport.play_position(), 0.11, epsilon = 1e-9);
}

#[test]
fn test_control_thread_commands_while_rendering() {
    let mut rig = rig(EngineConfig::default(), &[0.1, 0.1, 0.1]);
    rig.transport.play();

    let control = rig.transport.clone();
    let handle = thread::spawn(move || {
        for i in 0..200 {
            control.set_master_volume((i % 3) as f32 * 0.5).unwrap();
            control.set_master_pan(((i % 5) as f32 - 2.0) / 2.0).unwrap();
            if i % 50 == 0 {
                control.set_play_position(1.0);
            }
        }
    });

    let Rig {
        mut processor,
        transport,
        tracks,
    } = rig;
    let mut left = vec![0.0f32; 256];
    let mut right = vec![0.0f32; 256];
    for _ in 0..200 {
        processor.process(None, &mut [&mut left[..], &mut right[..]], 256);
        assert!(left.iter().chain(right.iter()).all(|s| s.is_finite()));
    }
    handle.join().unwrap();

    assert_eq!(transport.dropout_count(), 0);
    assert_eq!(transport.samples_processed(), 200 * 256);
    assert_eq!(processor.mixer().pool().active_buffers(), 0);
    drop(tracks);
}

// === Offline Render ===

#[test]
fn test_offline_render_to_wav() {
    let config = EngineConfig {
        sample_rate: 44_100.0,
        block_size: 256,
        ..EngineConfig::default()
    };
    let ctx = EngineContext::new(config).unwrap();
    let transport = TransportCoordinator::new(Arc::clone(&ctx));
    let mut tracks = TrackList::new();
    let mut media = MediaMap::new();
    let id = tracks.add_track("Tone");
    media.add_item(id, Arc::new(ToneItem::new(0.25, 0.5, 440.0, 0.8)));

    let mut processor =
        EngineProcessor::new(MixEngine::new(ctx), transport.clone(), tracks.reader(), media);
    processor.initialize().unwrap();
    transport.play();

    let rendered = render_offline(&mut processor, 1.0);
    assert_eq!(rendered.num_samples(), 44_100);
    assert_eq!(rendered.num_channels(), 2);

    // silent before the item, audible inside it, silent after
    assert!(rendered.channel(0)[..11_000].iter().all(|&s| s == 0.0));
    assert!(rendered.peak_level(Some(0)) > 0.75);
    assert!(rendered.channel(1)[33_200..].iter().all(|&s| s == 0.0));

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tone.wav");
    export_wav(&rendered, &path, ExportFormat::float()).unwrap();
    let reader = hound::WavReader::open(&path).unwrap();
    assert_eq!(reader.spec().sample_rate, 44_100);
    assert_eq!(reader.len(), 88_200);
}
