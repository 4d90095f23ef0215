//! Append-only, operator-facing batch log.
//!
//! Every driver event is mirrored to the `log` facade and to a plain text
//! file scoped to the batch directory (one line per event, not structured,
//! not queryable). The file is the original pipeline's only user-visible
//! output beyond the produced images, so its content is kept verbatim.

use std::fs::OpenOptions;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use log::{error, info, warn};

/// Append-only text log bound to one batch directory.
#[derive(Debug, Clone)]
pub struct BatchLog {
    path: Utf8PathBuf,
}

impl BatchLog {
    /// Log file at `<dir>/<name>`.
    pub fn new(dir: &Utf8Path, name: &str) -> BatchLog {
        BatchLog {
            path: dir.join(name),
        }
    }

    /// Path of the underlying log file.
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Record one informational event.
    ///
    /// A failure to append to the file is itself reported through the
    /// `log` facade but never propagated: logging must not be able to
    /// abort an observation.
    pub fn record(&self, message: &str) {
        info!("{message}");
        self.append(message);
    }

    /// Record a non-fatal anomaly (skipped item, missing pairing, ...).
    pub fn record_warn(&self, message: &str) {
        warn!("{message}");
        self.append(message);
    }

    /// Record a stage or observation failure.
    pub fn record_error(&self, message: &str) {
        error!("{message}");
        self.append(message);
    }

    fn append(&self, message: &str) {
        let opened = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path);
        match opened {
            Ok(mut file) => {
                if let Err(e) = writeln!(file, "{message}") {
                    error!("failed to write to {}: {e}", self.path);
                }
            }
            Err(e) => error!("failed to open log file {}: {e}", self.path),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_are_appended_line_by_line() {
        let dir = tempfile::tempdir().unwrap();
        let dir_path = Utf8Path::from_path(dir.path()).unwrap();
        let log = BatchLog::new(dir_path, "test_log.txt");

        log.record("first");
        log.record_warn("second");
        log.record_error("third");

        let content = std::fs::read_to_string(log.path()).unwrap();
        assert_eq!(content, "first\nsecond\nthird\n");
    }
}
