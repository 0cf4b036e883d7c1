//! Logging setup, the capture-tool diagnostic log, and log housekeeping.
//!
//! Application events go through `tracing` to stdout and to the application
//! log file. The capture tool's own output is not tracing events; it is
//! appended line-by-line to a separate diagnostic log with local timestamps.
//! Both files are kept bounded by [`trim_log_file`].

use std::io;
use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::{Error, Result};

/// Line count past which a log file gets trimmed.
pub const LOG_MAX_LINES: usize = 10_000;
/// Number of most recent lines kept by a trim.
pub const LOG_KEEP_LINES: usize = 5_000;

/// Writer that reopens the application log in append mode for every batch of
/// events, so housekeeping can rewrite the file underneath it.
#[derive(Debug, Clone)]
struct AppendWriter {
    path: PathBuf,
}

impl<'a> fmt::MakeWriter<'a> for AppendWriter {
    type Writer = Box<dyn io::Write>;

    fn make_writer(&'a self) -> Self::Writer {
        match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
        {
            Ok(file) => Box::new(file),
            // Stdout still receives the event; the file layer just drops it.
            Err(_) => Box::new(io::sink()),
        }
    }
}

/// Initialize tracing with a stdout layer and an application-log file layer.
pub fn init(log_file: &Path, verbose: bool, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let file_writer = AppendWriter {
        path: log_file.to_path_buf(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(
            fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .init();
}

/// Append-only log receiving the capture tool's combined output.
#[derive(Debug, Clone)]
pub struct DiagnosticLog {
    path: PathBuf,
}

impl DiagnosticLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one subprocess output line, prefixed with a local timestamp.
    /// Blank lines are dropped.
    pub async fn append_line(&self, line: &str) -> Result<()> {
        let line = line.trim_end();
        if line.trim().is_empty() {
            return Ok(());
        }

        let stamped = format!(
            "{} {}\n",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
            line
        );

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| Error::io_path("opening diagnostic log", &self.path, e))?;
        file.write_all(stamped.as_bytes())
            .await
            .map_err(|e| Error::io_path("writing diagnostic log", &self.path, e))?;
        Ok(())
    }
}

/// Rewrite `path` down to its most recent [`LOG_KEEP_LINES`] lines when it
/// exceeds [`LOG_MAX_LINES`]. Returns whether a trim happened.
pub async fn trim_log_file(path: &Path) -> Result<bool> {
    let contents = match fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(Error::io_path("reading log file", path, e)),
    };

    let total = contents.lines().count();
    if total <= LOG_MAX_LINES {
        return Ok(false);
    }

    let mut kept = contents
        .lines()
        .skip(total - LOG_KEEP_LINES)
        .collect::<Vec<_>>()
        .join("\n");
    kept.push('\n');

    // Write-then-rename so a crash mid-trim never loses the log.
    let tmp = path.with_extension("trim");
    fs::write(&tmp, kept)
        .await
        .map_err(|e| Error::io_path("writing trimmed log", &tmp, e))?;
    fs::rename(&tmp, path)
        .await
        .map_err(|e| Error::io_path("replacing log file", path, e))?;

    debug!(
        "Trimmed {} from {} to {} lines",
        path.display(),
        total,
        LOG_KEEP_LINES
    );
    Ok(true)
}

/// Run housekeeping on both log files. Trim failures are named and logged at
/// low severity; housekeeping never takes the loop down.
pub async fn run_housekeeping(app_log: &Path, diag_log: &Path) {
    for path in [app_log, diag_log] {
        if let Err(e) = trim_log_file(path).await {
            debug!("Log housekeeping skipped for {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn lines_of(n: usize) -> String {
        (0..n).map(|i| format!("line {i}\n")).collect()
    }

    #[tokio::test]
    async fn test_trim_skips_missing_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("absent.log");
        assert!(!trim_log_file(&path).await.unwrap());
    }

    #[tokio::test]
    async fn test_trim_skips_file_at_threshold() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("app.log");
        fs::write(&path, lines_of(LOG_MAX_LINES)).await.unwrap();

        assert!(!trim_log_file(&path).await.unwrap());
        let contents = fs::read_to_string(&path).await.unwrap();
        assert_eq!(contents.lines().count(), LOG_MAX_LINES);
    }

    #[tokio::test]
    async fn test_trim_keeps_most_recent_lines() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("app.log");
        fs::write(&path, lines_of(LOG_MAX_LINES + 1)).await.unwrap();

        assert!(trim_log_file(&path).await.unwrap());
        let contents = fs::read_to_string(&path).await.unwrap();
        let kept: Vec<&str> = contents.lines().collect();
        assert_eq!(kept.len(), LOG_KEEP_LINES);
        assert_eq!(kept.first(), Some(&"line 5001"));
        assert_eq!(kept.last(), Some(&"line 10000"));
    }

    #[tokio::test]
    async fn test_append_line_timestamps_and_drops_blanks() {
        let temp = TempDir::new().unwrap();
        let log = DiagnosticLog::new(temp.path().join("ffmpeg.log"));

        log.append_line("frame dropped").await.unwrap();
        log.append_line("").await.unwrap();
        log.append_line("   ").await.unwrap();
        log.append_line("reconnecting").await.unwrap();

        let contents = fs::read_to_string(log.path()).await.unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("frame dropped"));
        assert!(lines[1].ends_with("reconnecting"));
        // Timestamp prefix: "YYYY-MM-DD HH:MM:SS "
        assert!(lines[0].len() > "frame dropped".len() + 19);
    }
}
