// CLI module for synthgate

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// synthgate - admission control, caching and supervision for a speech synthesis worker
#[derive(Parser, Debug)]
#[command(name = "synthgate", version, about, long_about = None)]
pub struct Args {
    /// Configuration file (defaults to ~/.synthgate/config.toml when present)
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the monitoring server and background maintenance
    Serve,

    /// Synthesize one text through the full admission and cache path
    Synthesize {
        /// Model name, resolved to <model_dir>/<model>.onnx
        #[arg(long, short)]
        model: Option<String>,

        /// Speaker id
        #[arg(long, short)]
        voice: Option<String>,

        /// Text to speak (read from stdin when omitted)
        #[arg(long, short)]
        text: Option<String>,

        /// Write audio here instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Attempts when the system reports it is busy
        #[arg(long, default_value_t = 3)]
        attempts: u32,
    },
}
