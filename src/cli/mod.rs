//! CLI Module
//!
//! Command-line interface for offline rendering and config inspection.

pub mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Nueva RT - real-time mix core, driven offline
#[derive(Parser, Debug)]
#[command(name = "nueva-rt")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Engine configuration file (JSON)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Render tone tracks through the mix engine into a WAV file
    #[command(name = "render")]
    Render {
        /// Output WAV file
        output: PathBuf,

        /// Number of tone tracks
        #[arg(short, long, default_value_t = 2)]
        tracks: usize,

        /// Length of the render in seconds
        #[arg(short, long, default_value_t = 2.0)]
        duration: f64,

        /// Frequency of the first track; each next track is an octave up
        #[arg(short, long, default_value_t = 220.0)]
        frequency: f64,

        /// Master volume (linear, 0-2)
        #[arg(long, default_value_t = 0.5)]
        volume: f32,

        /// Loop region as START END in seconds
        #[arg(long, num_args = 2, value_names = ["START", "END"])]
        loop_region: Option<Vec<f64>>,

        /// Output bit depth: 16, 24 or 32
        #[arg(short, long, default_value_t = 24)]
        bit_depth: u16,
    },

    /// Print the effective engine configuration as JSON
    #[command(name = "config")]
    Config,
}
