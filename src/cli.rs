use clap::{Parser, Subcommand};
use std::path::PathBuf;

// Video backend info (compile-time)
#[cfg(feature = "ffmpeg")]
const VIDEO_BACKEND: &str = "playa-ffmpeg 8.0 (static)";
#[cfg(not(feature = "ffmpeg"))]
const VIDEO_BACKEND: &str = "none (synthetic sources only)";

// Build version with backend info
const VERSION_INFO: &str = const_format::concatcp!(
    env!("CARGO_PKG_VERSION"), "\n",
    "Video:  ", VIDEO_BACKEND, "\n",
    "Target: ", std::env::consts::ARCH, "-", std::env::consts::OS
);

/// Time-indexed video frame access
#[derive(Parser, Debug)]
#[command(author, version = VERSION_INFO, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Video stream to open (0 = first video stream)
    #[arg(short = 's', long = "stream", value_name = "N", default_value_t = 0, global = true)]
    pub stream: usize,

    /// Engine config file (JSON); overrides FRAMEDEX_CONFIG
    #[arg(short = 'c', long = "config", value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging to file (default: framedex.log)
    #[arg(short = 'l', long = "log", value_name = "LOG_FILE", global = true)]
    pub log_file: Option<Option<PathBuf>>,

    /// Increase logging verbosity (default: warn, -v: info, -vv: debug, -vvv+: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    pub verbosity: u8,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print stream info and frame index statistics as JSON
    Info {
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Wait for the frame and keyframe indices to finish
        #[arg(short = 'w', long = "wait")]
        wait: bool,

        /// Upper bound for --wait, in seconds
        #[arg(long = "timeout", value_name = "SECS", default_value_t = 60)]
        timeout_secs: u64,
    },

    /// Write the frame at a timestamp or ordinal as PNG
    Frame {
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Experiment timestamp (looked up in the time map)
        #[arg(short = 't', long = "time", value_name = "TS", conflicts_with = "ordinal", allow_negative_numbers = true)]
        time: Option<f64>,

        /// Frame ordinal (0-based)
        #[arg(short = 'n', long = "ordinal", value_name = "N")]
        ordinal: Option<usize>,

        /// Time map: JSON array with one timestamp per frame
        #[arg(long = "time-map", value_name = "JSON")]
        time_map: Option<PathBuf>,

        /// Output PNG
        #[arg(short = 'o', long = "output", value_name = "PNG", default_value = "frame.png")]
        output: PathBuf,
    },

    /// Write a range of frames as numbered PNGs
    Slice {
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// First ordinal (negative counts from the end)
        #[arg(long = "start", value_name = "N", allow_negative_numbers = true)]
        start: Option<isize>,

        /// Stop ordinal, exclusive (negative counts from the end)
        #[arg(long = "stop", value_name = "N", allow_negative_numbers = true)]
        stop: Option<isize>,

        /// Step (negative reverses)
        #[arg(long = "step", value_name = "N", default_value_t = 1, allow_negative_numbers = true)]
        step: isize,

        /// Output directory
        #[arg(short = 'o', long = "out-dir", value_name = "DIR", default_value = ".")]
        out_dir: PathBuf,

        /// File name prefix, frames are written as PREFIX_NNNNNN.png
        #[arg(long = "prefix", default_value = "frame")]
        prefix: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Test: global flags work after the subcommand
    #[test]
    fn test_parse_frame() {
        let args = Args::try_parse_from(["framedex", "frame", "a.mp4", "-t", "1.5", "-vv", "--stream", "1"]).unwrap();
        assert_eq!(args.verbosity, 2);
        assert_eq!(args.stream, 1);
        match args.command {
            Command::Frame { time, ordinal, .. } => {
                assert_eq!(time, Some(1.5));
                assert_eq!(ordinal, None);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    /// Test: --time and --ordinal are exclusive
    #[test]
    fn test_time_conflicts_with_ordinal() {
        assert!(Args::try_parse_from(["framedex", "frame", "a.mp4", "-t", "1", "-n", "3"]).is_err());
    }

    /// Test: negative slice bounds and bare --log
    #[test]
    fn test_parse_slice() {
        let args =
            Args::try_parse_from(["framedex", "slice", "a.mkv", "--start", "-10", "--step", "-2", "--log"]).unwrap();
        assert_eq!(args.log_file, Some(None));
        match args.command {
            Command::Slice { start, stop, step, .. } => {
                assert_eq!((start, stop, step), (Some(-10), None, -2));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
