//! Nueva RT CLI
//!
//! Drives the mix core offline: render tone tracks to WAV, inspect config.

use anyhow::Context;
use clap::Parser;
use env_logger::Env;
use log::info;

use nueva_rt::cli::commands::{self, RenderOptions};
use nueva_rt::cli::{Cli, Commands};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_filter)).init();

    info!("Nueva RT v{}", env!("CARGO_PKG_VERSION"));

    let config = commands::load_config(cli.config.as_deref()).context("loading engine config")?;

    match cli.command {
        Some(Commands::Render {
            output,
            tracks,
            duration,
            frequency,
            volume,
            loop_region,
            bit_depth,
        }) => {
            let options = RenderOptions {
                output,
                tracks,
                duration,
                frequency,
                volume,
                loop_region: loop_region.and_then(|bounds| match bounds[..] {
                    [start, end] => Some((start, end)),
                    _ => None,
                }),
                bit_depth,
            };
            let summary = commands::render(config, &options)
                .with_context(|| format!("rendering to {}", options.output.display()))?;
            commands::print_summary(&options, &summary);
        }
        Some(Commands::Config) => commands::print_config(&config)?,
        None => {
            println!("Nueva RT v{}", env!("CARGO_PKG_VERSION"));
            println!("Use --help for available commands");
        }
    }

    Ok(())
}
