use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "intonation-monitor", about = "Live pitch and note monitor for the default input device")]
pub struct Cli {
    /// Engine configuration file (TOML). Defaults are used when omitted.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Stop after this many seconds
    #[arg(short, long, default_value_t = 30)]
    pub seconds: u64,

    /// Export the last N seconds of captured audio on exit
    #[arg(long, value_name = "SECS")]
    pub export_loop: Option<f64>,

    /// Destination of the exported loop
    #[arg(long, default_value = "loop.wav")]
    pub wav: PathBuf,

    /// Write the note log as JSON on exit
    #[arg(long, value_name = "PATH")]
    pub notes_json: Option<PathBuf>,

    /// Print a status line every N cycles (0 disables)
    #[arg(long, default_value_t = 60)]
    pub status_every: u32,
}
