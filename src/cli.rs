//! Command-line interface for voxlink
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Realtime voice conversation client
#[derive(Parser, Debug)]
#[command(name = "voxlink", version, about = "Realtime voice conversation client")]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Audio input device name (see `voxlink devices`)
    #[arg(long, value_name = "DEVICE")]
    pub device: Option<String>,

    /// Session language tag (e.g. uz-UZ, en-US)
    #[arg(long, value_name = "LANG")]
    pub language: Option<String>,

    /// Synthesis voice name
    #[arg(long, value_name = "VOICE")]
    pub voice: Option<String>,

    /// Refresh token for authentication (overrides VOXLINK_REFRESH_TOKEN)
    #[arg(long, value_name = "TOKEN")]
    pub token: Option<String>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List available audio input devices
    Devices,

    /// Play a short sample of a synthesis voice
    Preview {
        /// Voice name to preview
        #[arg(value_name = "VOICE")]
        voice: String,
    },
}
