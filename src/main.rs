//! CLI entry point for the beam viewer core.
//!
//! Provides:
//! - `simulate`: run the viewer loop against a simulated camera and log what
//!   a renderer would display
//! - `check-config`: load and validate the configuration
//!
//! # Usage
//!
//! ```bash
//! beam-viewer simulate --frames 100 --fps 20
//! beam-viewer check-config --config config/beam_viewer.toml
//! ```

use anyhow::Result;
use beam_viewer::config::{ViewerConfig, DEFAULT_CONFIG_PATH};
use beam_viewer::device::mock::MockDevice;
use beam_viewer::simulator::Simulator;
use beam_viewer::{telemetry, Viewer};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "beam-viewer")]
#[command(about = "Beam viewer synchronization core", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Drive the viewer with a simulated camera
    Simulate {
        /// Number of frames to produce
        #[arg(long, default_value = "50")]
        frames: usize,

        /// Frames produced per second
        #[arg(long, default_value = "20")]
        fps: u32,

        /// Sensor width in pixels
        #[arg(long, default_value = "640")]
        width: usize,

        /// Sensor height in pixels
        #[arg(long, default_value = "512")]
        height: usize,

        /// Snap the crosshair to the beam centre
        #[arg(long)]
        show_beam_position: bool,
    },

    /// Load and validate the configuration, then print it
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = ViewerConfig::load_from(&cli.config)?;
    config.validate()?;
    telemetry::init_from_config(&config)?;

    match cli.command {
        Commands::Simulate {
            frames,
            fps,
            width,
            height,
            show_beam_position,
        } => simulate(config, frames, fps, width, height, show_beam_position).await,
        Commands::CheckConfig => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

async fn simulate(
    config: ViewerConfig,
    frames: usize,
    fps: u32,
    width: usize,
    height: usize,
    show_beam_position: bool,
) -> Result<()> {
    let camera = Arc::new(MockDevice::new("sim/beamviewer/1"));
    let mut simulator = Simulator::new(camera.clone(), width, height);

    let mut viewer = Viewer::new(config);
    viewer.attach(camera).await?;
    let handle = viewer.handle();
    let loop_task = tokio::spawn(viewer.run());

    if show_beam_position {
        handle
            .send(beam_viewer::events::UserAction::SetShowBeamPosition(true))
            .await?;
    }

    let mut display = handle.display();
    let watcher = tokio::spawn(async move {
        while display.changed().await.is_ok() {
            let state = display.borrow_and_update().clone();
            if let Some(bpm) = &state.bpm {
                tracing::info!(
                    frame = ?state.frame.as_ref().map(|f| f.frame_id),
                    center_x = %bpm.center_x,
                    center_y = %bpm.center_y,
                    intensity = %bpm.intensity,
                    lines = %state.lines_label,
                    "display updated"
                );
            }
        }
    });

    let interval = Duration::from_secs_f64(1.0 / f64::from(fps.max(1)));
    simulator.run(frames, interval).await?;

    // let the last fetches land before stopping
    tokio::time::sleep(interval * 2).await;
    handle.shutdown().await?;
    loop_task.await??;
    watcher.abort();
    Ok(())
}
