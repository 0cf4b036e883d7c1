//! Configuration resolution.
//!
//! Settings are layered: CLI flags, then the process environment, then the
//! primary settings file, then the secondary settings file, then built-in
//! defaults. The settings files are env-format and loaded with `dotenvy`
//! before clap parses, so file values feed the env-backed arguments without
//! overriding variables set in the real environment.

use std::path::{Path, PathBuf};

use clap::Parser;
use tracing::warn;

use crate::{Error, Result};

/// Primary settings file, applied first (highest file priority).
pub const PRIMARY_CONFIG_FILE: &str = "/etc/rtsp-recorder.conf";
/// Secondary settings file, applied after the primary.
pub const SECONDARY_CONFIG_FILE: &str = "/etc/default/rtsp-recorder";

/// Command-line arguments. Every recording setting is env-backed with a
/// documented default.
#[derive(Debug, Parser)]
#[command(
    name = "rtsp-recorder",
    version,
    about = "Continuous RTSP stream recorder producing fixed-duration segment files"
)]
pub struct Args {
    /// RTSP stream address to record.
    #[arg(long, env = "RTSP_URL", default_value = "rtsp://your-camera-address")]
    pub url: String,

    /// Segment duration in seconds.
    ///
    /// Kept as a raw string so a malformed value reaches the preflight
    /// validator instead of being defaulted away.
    #[arg(long, env = "SEGMENT_DURATION", default_value = "1200")]
    pub duration: String,

    /// Root directory for recorded segments.
    #[arg(long, env = "OUTPUT_DIR", default_value = "/recordings")]
    pub output_dir: PathBuf,

    /// strftime-style filename template for each segment.
    #[arg(
        long,
        env = "FILENAME_TEMPLATE",
        default_value = "recording_%Y%m%d_%H%M%S.mp4"
    )]
    pub filename_template: String,

    /// Application log file.
    #[arg(long, env = "LOG_FILE", default_value = "/tmp/rtsp-recorder.log")]
    pub log_file: PathBuf,

    /// Capture tool diagnostic log file.
    #[arg(long, env = "FFMPEG_LOG_FILE", default_value = "/tmp/ffmpeg.log")]
    pub ffmpeg_log_file: PathBuf,

    /// Path to the ffmpeg binary.
    #[arg(long, env = "FFMPEG_PATH", default_value = "ffmpeg")]
    pub ffmpeg_path: String,

    /// Enable debug logging.
    #[arg(short, long)]
    pub verbose: bool,

    /// Only log errors.
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}

/// Immutable resolved configuration. Built once before the main loop and
/// never mutated afterwards.
#[derive(Debug, Clone)]
pub struct Config {
    pub url: String,
    /// Raw segment duration; parsing is a validator concern.
    pub duration_raw: String,
    pub output_dir: PathBuf,
    pub filename_template: String,
    pub log_file: PathBuf,
    pub ffmpeg_log_file: PathBuf,
    pub ffmpeg_path: String,
}

impl Config {
    /// Resolve the final configuration from parsed arguments.
    ///
    /// Creates the output root if missing; whether it ended up writable is
    /// checked by the preflight validator, so a creation failure is only
    /// warned about here.
    pub fn resolve(args: &Args) -> Self {
        if !args.output_dir.exists()
            && let Err(e) = std::fs::create_dir_all(&args.output_dir)
        {
            warn!(
                "Could not create output directory {}: {}",
                args.output_dir.display(),
                e
            );
        }

        Self {
            url: args.url.clone(),
            duration_raw: args.duration.clone(),
            output_dir: args.output_dir.clone(),
            filename_template: args.filename_template.clone(),
            log_file: args.log_file.clone(),
            ffmpeg_log_file: args.ffmpeg_log_file.clone(),
            ffmpeg_path: args.ffmpeg_path.clone(),
        }
    }

    /// Parse the segment duration as a positive number of seconds.
    pub fn segment_duration(&self) -> Result<u64> {
        let secs: u64 = self.duration_raw.trim().parse().map_err(|_| {
            Error::validation(format!(
                "segment duration '{}' is not a valid integer",
                self.duration_raw
            ))
        })?;
        if secs == 0 {
            return Err(Error::validation("segment duration must be positive"));
        }
        Ok(secs)
    }
}

/// Result of loading the optional settings files.
#[derive(Debug, Default)]
pub struct LoadedFiles {
    /// Files that were found and applied.
    pub loaded: Vec<PathBuf>,
    /// Files that exist but could not be parsed, with the parse error.
    pub failed: Vec<(PathBuf, String)>,
}

/// Load the optional settings files into the process environment.
///
/// Variables already present in the environment always win because dotenv
/// loading never overrides existing variables; applying the primary file
/// first makes it shadow the secondary one the same way.
///
/// Runs before logging is initialized, so outcomes are returned to the
/// caller for reporting instead of being logged here.
pub fn load_config_files() -> LoadedFiles {
    let mut result = LoadedFiles::default();
    for candidate in [PRIMARY_CONFIG_FILE, SECONDARY_CONFIG_FILE] {
        let path = Path::new(candidate);
        match dotenvy::from_path(path) {
            Ok(()) => result.loaded.push(path.to_path_buf()),
            Err(e) if e.not_found() => {}
            Err(e) => result.failed.push((path.to_path_buf(), e.to_string())),
        }
    }
    result
}
