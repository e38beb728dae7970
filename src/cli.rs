use clap::Parser;
use std::path::PathBuf;

// Build version with target info
const VERSION_INFO: &str = const_format::concatcp!(
    env!("CARGO_PKG_VERSION"), "\n",
    "Decoder: swatch preview (Lottie JSON header)\n",
    "Target:  ", std::env::consts::ARCH, "-", std::env::consts::OS
);

/// Headless animated sticker player
#[derive(Parser, Debug)]
#[command(author, version = VERSION_INFO, about, long_about = None)]
pub struct Args {
    /// Lottie JSON animations to play
    #[arg(value_name = "FILE", required = true)]
    pub files: Vec<PathBuf>,

    /// Players mounted per animation (all share one decode session)
    #[arg(short = 'n', long = "players", value_name = "N", default_value_t = 1)]
    pub players: usize,

    /// Display size in logical pixels
    #[arg(long = "size", value_names = ["W", "H"], num_args = 2, default_values_t = [128.0, 128.0])]
    pub size: Vec<f32>,

    /// How long to run the engine
    #[arg(short = 'd', long = "duration", value_name = "SECS", default_value_t = 3.0)]
    pub duration: f64,

    /// Loop animations instead of stopping after one pass
    #[arg(long = "loop")]
    pub looping: bool,

    /// Play only frames FROM..=TO (backwards if FROM > TO)
    #[arg(long = "segment", value_names = ["FROM", "TO"], num_args = 2)]
    pub segment: Option<Vec<u32>>,

    /// Decode worker threads (overrides settings)
    #[arg(short = 'w', long = "workers", value_name = "N")]
    pub workers: Option<usize>,

    /// Copy frames back from workers instead of lending buffers
    #[arg(long = "no-transfer")]
    pub no_transfer: bool,

    /// Enable logging to file (default: stickerplay.log)
    #[arg(short = 'l', long = "log", value_name = "LOG_FILE")]
    pub log_file: Option<Option<PathBuf>>,

    /// Increase logging verbosity (default: warn, -v: info, -vv: debug, -vvv+: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbosity: u8,

    /// Custom configuration directory (overrides default platform paths)
    #[arg(short = 'c', long = "config-dir", value_name = "DIR")]
    pub config_dir: Option<PathBuf>,
}

impl Args {
    /// (width, height) from `--size`
    pub fn display_size(&self) -> (f32, f32) {
        match self.size.as_slice() {
            [w, h] => (*w, *h),
            _ => (128.0, 128.0),
        }
    }

    /// (from, to) from `--segment`
    pub fn segment_bounds(&self) -> Option<(u32, u32)> {
        match self.segment.as_deref() {
            Some([from, to]) => Some((*from, *to)),
            _ => None,
        }
    }
}
