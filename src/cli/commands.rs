//! CLI Command Implementations
//!
//! Implements the actual logic for each CLI command.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::info;

use crate::config::EngineConfig;
use crate::engine::{
    export_wav, render_offline, EngineContext, EngineProcessor, ExportFormat, MediaMap, MixEngine,
    ToneItem, TrackList, TransportCoordinator,
};
use crate::error::Result;

/// Settings for [`render`]
#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub output: PathBuf,
    pub tracks: usize,
    pub duration: f64,
    pub frequency: f64,
    pub volume: f32,
    pub loop_region: Option<(f64, f64)>,
    pub bit_depth: u16,
}

/// What a render produced
#[derive(Debug, Clone, PartialEq)]
pub struct RenderSummary {
    pub samples: usize,
    pub peak: f32,
    pub rms: f32,
    pub dropouts: u64,
    pub cpu_peak: f64,
    pub final_position: f64,
}

/// Load the config file if one was given, otherwise use defaults
pub fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::load(path),
        None => Ok(EngineConfig::default()),
    }
}

/// Render tone tracks through the full engine and write a WAV file.
pub fn render(config: EngineConfig, options: &RenderOptions) -> Result<RenderSummary> {
    info!(
        "Rendering {} tracks for {:.2}s to {}",
        options.tracks,
        options.duration,
        options.output.display()
    );

    let ctx = EngineContext::new(config)?;
    let transport = TransportCoordinator::new(Arc::clone(&ctx));
    let mut tracks = TrackList::new();
    let mut media = MediaMap::new();

    let amplitude = 1.0 / options.tracks.max(1) as f32;
    for index in 0..options.tracks {
        let frequency = options.frequency * 2f64.powi(index as i32);
        let id = tracks.add_track(&format!("Tone {}", index + 1));
        media.add_item(
            id,
            Arc::new(ToneItem::new(0.0, options.duration, frequency, amplitude)),
        );
    }

    transport.set_master_volume(options.volume)?;
    if let Some((start, end)) = options.loop_region {
        transport.set_loop_points(start, end)?;
        transport.set_loop_enabled(true);
    }

    let mut processor = EngineProcessor::new(
        MixEngine::new(Arc::clone(&ctx)),
        transport.clone(),
        tracks.reader(),
        media,
    );
    processor.initialize()?;
    transport.play();

    let rendered = render_offline(&mut processor, options.duration);
    transport.stop();
    processor.mixer_mut().shutdown();

    export_wav(&rendered, &options.output, ExportFormat::new(options.bit_depth))?;

    Ok(RenderSummary {
        samples: rendered.num_samples(),
        peak: rendered.peak_level(None),
        rms: rendered.rms_level(None),
        dropouts: transport.dropout_count(),
        cpu_peak: transport.peak_cpu_usage(),
        final_position: transport.play_position(),
    })
}

/// Print a render summary.
pub fn print_summary(options: &RenderOptions, summary: &RenderSummary) {
    println!("Rendered: {}", options.output.display());
    println!("{:-<40}", "");
    println!("Samples:        {}", summary.samples);
    println!("Peak:           {:.2} dB", crate::engine::linear_to_db(summary.peak));
    println!("RMS:            {:.2} dB", crate::engine::linear_to_db(summary.rms));
    println!("Dropouts:       {}", summary.dropouts);
    println!("Peak CPU:       {:.1}%", summary.cpu_peak);
    println!("Final position: {:.3}s", summary.final_position);
}

/// Print the effective configuration as JSON.
pub fn print_config(config: &EngineConfig) -> Result<()> {
    println!("{}", config.to_json_pretty()?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn options(output: PathBuf) -> RenderOptions {
        RenderOptions {
            output,
            tracks: 2,
            duration: 0.5,
            frequency: 220.0,
            volume: 1.0,
            loop_region: None,
            bit_depth: 32,
        }
    }

    #[test]
    fn test_render_writes_wav() {
        let dir = tempdir().unwrap();
        let opts = options(dir.path().join("render.wav"));
        let summary = render(EngineConfig::default(), &opts).unwrap();

        assert_eq!(summary.samples, 24_000);
        assert_eq!(summary.dropouts, 0);
        assert!(summary.peak > 0.1 && summary.peak <= 1.0);
        assert!((summary.final_position - 0.5).abs() < 1e-9);

        let reader = hound::WavReader::open(&opts.output).unwrap();
        assert_eq!(reader.spec().channels, 2);
        assert_eq!(reader.len(), 48_000);
    }

    #[test]
    fn test_render_with_loop() {
        let dir = tempdir().unwrap();
        let mut opts = options(dir.path().join("loop.wav"));
        opts.loop_region = Some((0.0, 0.25));
        let summary = render(EngineConfig::default(), &opts).unwrap();
        assert!(summary.final_position < 0.25);
    }

    #[test]
    fn test_render_rejects_bad_loop() {
        let dir = tempdir().unwrap();
        let mut opts = options(dir.path().join("bad.wav"));
        opts.loop_region = Some((1.0, 0.5));
        assert!(render(EngineConfig::default(), &opts).is_err());
    }

    #[test]
    fn test_load_config_defaults() {
        assert_eq!(load_config(None).unwrap(), EngineConfig::default());
    }
}
