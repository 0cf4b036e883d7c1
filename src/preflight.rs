//! Startup validation gate.
//!
//! All checks run independently (no short-circuit) so one start attempt
//! reports every problem at once. Any failure is fatal: the process must
//! exit before the recording loop starts.

use std::process::Stdio;

use tracing::{debug, error, info};

use crate::config::Config;

/// Scheme the stream address must carry.
pub const EXPECTED_SCHEME: &str = "rtsp://";

/// Validate the configuration and environment. Returns the number of failed
/// checks; zero means recording may start.
pub fn run(config: &Config) -> usize {
    let checks = [
        check_stream_url(config),
        check_duration(config),
        check_output_dir(config),
        check_capture_tool(config),
    ];
    checks.iter().filter(|passed| !**passed).count()
}

fn check_stream_url(config: &Config) -> bool {
    if config.url.starts_with(EXPECTED_SCHEME) {
        true
    } else {
        error!(
            "Stream address '{}' does not start with {}",
            config.url, EXPECTED_SCHEME
        );
        false
    }
}

fn check_duration(config: &Config) -> bool {
    match config.segment_duration() {
        Ok(secs) => {
            debug!("Segment duration: {}s", secs);
            true
        }
        Err(e) => {
            error!("{}", e);
            false
        }
    }
}

/// The resolver already tried to create the output root; here it only has to
/// exist and accept writes.
fn check_output_dir(config: &Config) -> bool {
    if !config.output_dir.is_dir() {
        error!(
            "Output directory {} does not exist",
            config.output_dir.display()
        );
        return false;
    }

    let probe = config.output_dir.join(".rtsp-recorder-probe");
    match std::fs::write(&probe, b"probe") {
        Ok(()) => {
            let _ = std::fs::remove_file(&probe);
            true
        }
        Err(e) => {
            error!(
                "Output directory {} is not writable: {}",
                config.output_dir.display(),
                e
            );
            false
        }
    }
}

/// Runs `<tool> -version` the same way the recorder will invoke it, so a
/// missing or broken binary is caught before the loop starts.
fn check_capture_tool(config: &Config) -> bool {
    let result = std::process::Command::new(&config.ffmpeg_path)
        .arg("-version")
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output();

    match result {
        Ok(output) if output.status.success() => {
            if let Some(first) = String::from_utf8_lossy(&output.stdout).lines().next() {
                info!("Capture tool: {}", first);
            }
            true
        }
        Ok(output) => {
            error!(
                "Capture tool '{}' exited with {} during version check",
                config.ffmpeg_path, output.status
            );
            false
        }
        Err(e) => {
            error!(
                "Capture tool '{}' could not be executed: {}",
                config.ffmpeg_path, e
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn base_config(output_dir: PathBuf) -> Config {
        Config {
            url: "rtsp://cam/test".to_string(),
            duration_raw: "5".to_string(),
            output_dir,
            filename_template: "recording_%Y%m%d_%H%M%S.mp4".to_string(),
            log_file: PathBuf::from("/tmp/app.log"),
            ffmpeg_log_file: PathBuf::from("/tmp/ffmpeg.log"),
            ffmpeg_path: "/nonexistent/capture-tool".to_string(),
        }
    }

    #[test]
    fn test_all_checks_fail_independently() {
        let config = Config {
            url: "http://cam/test".to_string(),
            duration_raw: "not-a-number".to_string(),
            output_dir: PathBuf::from("/nonexistent/recordings"),
            ..base_config(PathBuf::new())
        };
        assert_eq!(run(&config), 4);
    }

    #[test]
    fn test_missing_tool_is_the_only_error() {
        let temp = TempDir::new().unwrap();
        let config = base_config(temp.path().to_path_buf());
        assert_eq!(run(&config), 1);
    }

    #[test]
    fn test_zero_duration_counts_as_error() {
        let temp = TempDir::new().unwrap();
        let config = Config {
            duration_raw: "0".to_string(),
            ..base_config(temp.path().to_path_buf())
        };
        assert_eq!(run(&config), 2);
    }

    #[test]
    fn test_scheme_check() {
        let temp = TempDir::new().unwrap();
        let config = Config {
            url: "rtmp://cam/test".to_string(),
            ..base_config(temp.path().to_path_buf())
        };
        assert_eq!(run(&config), 2);
    }
}
