//! Mix Benchmarks
//!
//! Per-block cost of the real-time path.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use nueva_rt::engine::{
    AudioBuffer, EngineContext, EngineProcessor, MediaMap, MixEngine, ToneItem, TrackList,
    TransportCoordinator,
};
use nueva_rt::EngineConfig;

fn processor_with_tracks(count: usize) -> (EngineProcessor<MediaMap>, TrackList) {
    let ctx = EngineContext::new(EngineConfig::default()).unwrap();
    let transport = TransportCoordinator::new(Arc::clone(&ctx));
    let mut tracks = TrackList::new();
    let mut media = MediaMap::new();
    for i in 0..count {
        let id = tracks.add_track(&format!("Tone {i}"));
        media.add_item(id, Arc::new(ToneItem::new(0.0, 3600.0, 110.0 * (i + 1) as f64, 0.1)));
    }
    let mut processor =
        EngineProcessor::new(MixEngine::new(ctx), transport.clone(), tracks.reader(), media);
    processor.initialize().unwrap();
    transport.play();
    (processor, tracks)
}

fn benchmark_mix_block(c: &mut Criterion) {
    let (mut processor, _tracks) = processor_with_tracks(16);
    let mut left = vec![0.0f32; 512];
    let mut right = vec![0.0f32; 512];

    c.bench_function("mix_16_tracks_512", |b| {
        b.iter(|| {
            processor.process(None, black_box(&mut [&mut left[..], &mut right[..]]), 512);
        })
    });
}

fn benchmark_buffer_add(c: &mut Criterion) {
    let mut dest = AudioBuffer::new(2, 512);
    let mut source = AudioBuffer::new(2, 512);
    source.fill(0.25);

    c.bench_function("buffer_add_from_2x512", |b| {
        b.iter(|| {
            dest.add_from(black_box(&source));
        })
    });
}

criterion_group!(benches, benchmark_mix_block, benchmark_buffer_add);
criterion_main!(benches);
