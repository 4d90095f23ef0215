//! # Archive acquisition
//!
//! Fetches ODF archives for a row range of the observation catalog by
//! shelling out to the XMM-Newton archive command-line client
//! (`aioclient`). Observations already present in the destination
//! directory — either as an unpacked `<obsid>/` directory or as a
//! `<obsid>.tar.gz` archive — are skipped, so the acquisition step is
//! re-runnable over a partially populated directory.

use std::collections::HashSet;
use std::process::Command;

use camino::{Utf8Path, Utf8PathBuf};
use hifitime::Epoch;

use crate::batch_log::BatchLog;
use crate::catalog::ObservationCatalog;
use crate::constants::{OmResult, DOWNLOAD_LOG_NAME};
use crate::naming::ObsId;

/// Archive acquisition over one catalog row range.
#[derive(Debug)]
pub struct Downloader {
    catalog: ObservationCatalog,
    destination: Utf8PathBuf,
    client_dir: Utf8PathBuf,
    start: usize,
    end: usize,
    instrument: String,
    filters: String,
    log: BatchLog,
}

impl Downloader {
    /// Configure an acquisition run.
    ///
    /// Arguments
    /// ---------
    /// * `catalog`: the loaded observation catalog.
    /// * `destination`: directory receiving the `.tar.gz` archives
    ///   (created if absent).
    /// * `client_dir`: directory containing the `aioclient` executable.
    /// * `start`, `end`: half-open catalog row range to fetch.
    /// * `instrument`: instrument name passed to the client (e.g. `OM`).
    /// * `filters`: space-separated filter list (e.g. `"UVW1 UVM2"`).
    pub fn new(
        catalog: ObservationCatalog,
        destination: &Utf8Path,
        client_dir: &Utf8Path,
        start: usize,
        end: usize,
        instrument: &str,
        filters: &str,
    ) -> OmResult<Downloader> {
        std::fs::create_dir_all(destination)?;
        let log = BatchLog::new(destination, &download_log_name(destination));
        Ok(Downloader {
            catalog,
            destination: destination.to_path_buf(),
            client_dir: client_dir.to_path_buf(),
            start,
            end,
            instrument: instrument.to_string(),
            filters: filters.to_string(),
            log,
        })
    }

    /// Fetch every observation of the configured row range.
    ///
    /// A failing client invocation is logged with its captured stderr and
    /// does not stop the remaining downloads.
    pub fn fetch_observations(&self) -> OmResult<()> {
        let skip = existing_obsids(&self.destination)?;

        for obsid in self.catalog.select_range(self.start, self.end) {
            if skip.contains(obsid.as_str()) {
                self.log.record(&format!(
                    "OBSID {obsid} already present (directory or .tar.gz), skipping"
                ));
                continue;
            }
            if let Err(e) = self.fetch_one(obsid) {
                self.log
                    .record_error(&format!("failed to download obsid {obsid}: {e}"));
            } else {
                self.log.record(&format!("download complete for obsid {obsid}"));
            }
        }
        self.log.record("download pass finished for all OBSIDs");
        Ok(())
    }

    /// One blocking `aioclient` invocation.
    fn fetch_one(&self, obsid: &ObsId) -> OmResult<()> {
        let request = format!(
            "GET obsno={obsid} instname={inst} filter={filters} level=ODF",
            inst = self.instrument,
            filters = self.filters,
        );
        let output = Command::new("./aioclient")
            .arg("-L")
            .arg(&request)
            .arg("-O")
            .arg(self.destination.as_str())
            .current_dir(&self.client_dir)
            .output()?;
        if !output.status.success() {
            return Err(crate::errors::OmPrepError::ExternalTool {
                tool: "aioclient".to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(())
    }
}

/// Observation ids already present in `dir`, as directories or archives.
pub fn existing_obsids(dir: &Utf8Path) -> OmResult<HashSet<String>> {
    let mut present = HashSet::new();
    for entry in dir.read_dir_utf8()? {
        let entry = entry?;
        let name = entry.file_name();
        if entry.file_type()?.is_dir() {
            present.insert(name.to_string());
        } else if name.ends_with(".tar.gz") {
            if let Some(stem) = name.split('.').next() {
                present.insert(stem.to_string());
            }
        }
    }
    Ok(present)
}

/// Name of the download log; when one already exists from a previous run
/// a timestamped alternative is used so earlier logs are never clobbered.
fn download_log_name(destination: &Utf8Path) -> String {
    if !destination.join(DOWNLOAD_LOG_NAME).exists() {
        return DOWNLOAD_LOG_NAME.to_string();
    }
    let stamp = Epoch::now()
        .map(compact_timestamp)
        .unwrap_or_else(|_| "unknown".to_string());
    format!("log_download_{stamp}.txt")
}

/// `YYYYMMDD_HHMMSS` rendering of an epoch, for file names.
fn compact_timestamp(epoch: Epoch) -> String {
    let (y, m, d, hh, mm, ss, _) = epoch.to_gregorian_utc();
    format!("{y:04}{m:02}{d:02}_{hh:02}{mm:02}{ss:02}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn existing_obsids_collects_dirs_and_archive_stems() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        std::fs::create_dir(root.join("0722700101")).unwrap();
        std::fs::write(root.join("0500760101.tar.gz"), b"").unwrap();
        std::fs::write(root.join("notes.txt"), b"").unwrap();

        let present = existing_obsids(root).unwrap();
        assert!(present.contains("0722700101"));
        assert!(present.contains("0500760101"));
        assert!(!present.contains("notes"));
        assert_eq!(present.len(), 2);
    }

    #[test]
    fn download_log_name_avoids_clobbering() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        assert_eq!(download_log_name(root), DOWNLOAD_LOG_NAME);

        std::fs::write(root.join(DOWNLOAD_LOG_NAME), b"old run\n").unwrap();
        let next = download_log_name(root);
        assert_ne!(next, DOWNLOAD_LOG_NAME);
        assert!(next.starts_with("log_download_"));
    }
}
