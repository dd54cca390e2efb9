//! Command-line argument parsing.

use std::path::PathBuf;

use clap::Parser;

use crate::params::{MixParams, RenderConfig, StoreConfig};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "echofield")]
#[command(about = "Spatial soundscape for live agent session activity", long_about = None)]
pub struct Args {
    /// Directory for persisted session positions
    #[arg(long, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    /// Window width (logical pixels)
    #[arg(long, default_value = "900")]
    pub width: u32,

    /// Window height (logical pixels)
    #[arg(long, default_value = "900")]
    pub height: u32,

    /// Master volume (0..1)
    #[arg(long, default_value = "0.7")]
    pub volume: f32,

    /// Reverb mix (0..1)
    #[arg(long, default_value = "0.3")]
    pub reverb: f32,

    /// Start muted
    #[arg(long)]
    pub muted: bool,
}

impl Args {
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig::new(self.data_dir.clone())
    }

    pub fn mix_params(&self) -> MixParams {
        MixParams {
            volume: self.volume.clamp(0.0, 1.0),
            reverb_mix: self.reverb.clamp(0.0, 1.0),
            muted: self.muted,
        }
    }

    pub fn render_config(&self) -> RenderConfig {
        RenderConfig {
            window_width: self.width,
            window_height: self.height,
        }
    }
}
