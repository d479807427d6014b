//! Wrapper around the external virus-scan executable.
//!
//! The contract is exit-code based: 0 means clean, 1 means infected (stdout
//! carries the infection details), anything else is an operational failure
//! that callers hand back to the queue for retry. Infection itself is a
//! verdict, not an error.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio::time;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("scanner exited with status {code:?}: {stderr}")]
    Failed { code: Option<i32>, stderr: String },
    #[error("scan of `{0}` timed out")]
    TimedOut(PathBuf),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Outcome of a successful scanner run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanVerdict {
    Clean,
    /// The scanner's report of what it found.
    Infected(String),
}

/// Invokes the scan executable (`clamscan` in production) on local files.
#[derive(Clone, Debug)]
pub struct VirusScanner {
    command: PathBuf,
    timeout: Duration,
}

impl VirusScanner {
    pub fn new(command: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            timeout,
        }
    }

    /// Scan one file. Blocks only on the child process; the timeout bounds
    /// the whole invocation.
    pub async fn scan(&self, path: &Path) -> Result<ScanVerdict, ScanError> {
        debug!("scanning {} with {}", path.display(), self.command.display());

        let output = time::timeout(
            self.timeout,
            Command::new(&self.command)
                .arg("--no-summary")
                .arg(path)
                .output(),
        )
        .await
        .map_err(|_| ScanError::TimedOut(path.to_path_buf()))??;

        match output.status.code() {
            Some(0) => Ok(ScanVerdict::Clean),
            Some(1) => Ok(ScanVerdict::Infected(
                String::from_utf8_lossy(&output.stdout).trim().to_string(),
            )),
            code => Err(ScanError::Failed {
                code,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    /// Write an executable shell script standing in for the scanner.
    fn fake_scanner(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("scanner.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[tokio::test]
    async fn exit_zero_is_clean() {
        let dir = tempfile::tempdir().unwrap();
        let scanner = VirusScanner::new(fake_scanner(dir.path(), "exit 0"), Duration::from_secs(5));
        let verdict = scanner.scan(Path::new("/dev/null")).await.unwrap();
        assert_eq!(verdict, ScanVerdict::Clean);
    }

    #[tokio::test]
    async fn exit_one_is_infected_with_details() {
        let dir = tempfile::tempdir().unwrap();
        let scanner = VirusScanner::new(
            fake_scanner(dir.path(), "echo 'Eicar-Test-Signature FOUND'; exit 1"),
            Duration::from_secs(5),
        );
        let verdict = scanner.scan(Path::new("/dev/null")).await.unwrap();
        assert_eq!(
            verdict,
            ScanVerdict::Infected("Eicar-Test-Signature FOUND".into())
        );
    }

    #[tokio::test]
    async fn other_exit_codes_are_operational_failures() {
        let dir = tempfile::tempdir().unwrap();
        let scanner = VirusScanner::new(
            fake_scanner(dir.path(), "echo 'corrupt database' >&2; exit 2"),
            Duration::from_secs(5),
        );
        let err = scanner.scan(Path::new("/dev/null")).await.unwrap_err();
        match err {
            ScanError::Failed { code, stderr } => {
                assert_eq!(code, Some(2));
                assert_eq!(stderr, "corrupt database");
            }
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn slow_scanner_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let scanner = VirusScanner::new(
            fake_scanner(dir.path(), "sleep 5"),
            Duration::from_millis(100),
        );
        let err = scanner.scan(Path::new("/dev/null")).await.unwrap_err();
        assert!(matches!(err, ScanError::TimedOut(_)));
    }

    #[tokio::test]
    async fn missing_scanner_binary_is_an_io_error() {
        let scanner = VirusScanner::new("/nonexistent/clamscan", Duration::from_secs(5));
        let err = scanner.scan(Path::new("/dev/null")).await.unwrap_err();
        assert!(matches!(err, ScanError::Io(_)));
    }
}
