//! # Archive extraction
//!
//! Unpacks each downloaded `<obsid>.tar.gz` into a per-observation
//! directory and reorganizes its top-level members into an `odf/`
//! subdirectory, which is where the reduction driver looks for raw
//! inputs. Already-extracted observations (target directory present) are
//! skipped, and one archive's failure never stops the rest.

use std::fs::File;

use camino::{Utf8Path, Utf8PathBuf};
use flate2::read::GzDecoder;

use crate::batch_log::BatchLog;
use crate::constants::{OmResult, EXTRACT_LOG_NAME, ODF_DIR};

/// Extraction pass over one download directory.
#[derive(Debug)]
pub struct Extractor {
    directory: Utf8PathBuf,
    remove_tar: bool,
    log: BatchLog,
}

impl Extractor {
    /// Arguments
    /// ---------
    /// * `directory`: the directory holding the downloaded archives.
    /// * `remove_tar`: delete each archive after successful extraction.
    pub fn new(directory: &Utf8Path, remove_tar: bool) -> Extractor {
        Extractor {
            directory: directory.to_path_buf(),
            remove_tar,
            log: BatchLog::new(directory, EXTRACT_LOG_NAME),
        }
    }

    /// Extract and reorganize every `.tar.gz` in the directory.
    pub fn extract_and_organize(&self) -> OmResult<()> {
        if !self.directory.is_dir() {
            return Err(crate::errors::OmPrepError::Config(format!(
                "extraction directory does not exist: {}",
                self.directory
            )));
        }
        for entry in self.directory.read_dir_utf8()? {
            let entry = entry?;
            let name = entry.file_name().to_string();
            if !name.ends_with(".tar.gz") {
                continue;
            }
            if let Err(e) = self.extract_one(entry.path(), &name) {
                self.log
                    .record_error(&format!("error while processing {name}: {e}"));
            }
        }
        Ok(())
    }

    fn extract_one(&self, archive: &Utf8Path, name: &str) -> OmResult<()> {
        let obsid = name.split('.').next().unwrap_or(name);
        let target = self.directory.join(obsid);
        if target.exists() {
            self.log
                .record(&format!("{name} already extracted to {target}, skipping"));
            return Ok(());
        }
        std::fs::create_dir_all(&target)?;

        let tar_gz = File::open(archive)?;
        tar::Archive::new(GzDecoder::new(tar_gz)).unpack(&target)?;
        self.log.record(&format!("archive {name} extracted to {target}"));

        organize_into_odf(&target)?;
        self.log
            .record(&format!("members moved into {}", target.join(ODF_DIR)));

        if self.remove_tar {
            match std::fs::remove_file(archive) {
                Ok(()) => self.log.record(&format!("archive {archive} removed")),
                Err(e) => self
                    .log
                    .record_error(&format!("failed to remove {archive}: {e}")),
            }
        }
        Ok(())
    }
}

/// Create `<dir>/odf/` and move every regular file at the top level of
/// `dir` into it. Subdirectories unpacked by the archive stay in place.
pub fn organize_into_odf(dir: &Utf8Path) -> OmResult<()> {
    let odf = dir.join(ODF_DIR);
    std::fs::create_dir_all(&odf)?;
    for entry in dir.read_dir_utf8()? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            std::fs::rename(entry.path(), odf.join(entry.file_name()))?;
        }
    }
    Ok(())
}

/// Unpack any archives left inside an input directory, in place.
///
/// ODF deliveries sometimes nest a plain `.TAR` (uncompressed) next to
/// gzipped members; both spellings are handled.
pub fn unpack_archives_in(dir: &Utf8Path, log: &BatchLog) -> OmResult<()> {
    for entry in dir.read_dir_utf8()? {
        let entry = entry?;
        let name = entry.file_name();
        let path = entry.path();
        if name.ends_with(".tar.gz") {
            log.record(&format!("unpacking {path}"));
            let file = File::open(path)?;
            tar::Archive::new(GzDecoder::new(file)).unpack(dir)?;
        } else if name.ends_with(".TAR") {
            log.record(&format!("unpacking {path}"));
            let file = File::open(path)?;
            tar::Archive::new(file).unpack(dir)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn organize_moves_only_top_level_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        std::fs::write(root.join("0001_manifest.SAS"), b"x").unwrap();
        std::fs::write(root.join("frame.FIT"), b"y").unwrap();
        std::fs::create_dir(root.join("nested")).unwrap();
        std::fs::write(root.join("nested").join("inner.dat"), b"z").unwrap();

        organize_into_odf(root).unwrap();

        let odf = root.join(ODF_DIR);
        assert!(odf.join("0001_manifest.SAS").is_file());
        assert!(odf.join("frame.FIT").is_file());
        assert!(root.join("nested").join("inner.dat").is_file());
        assert!(!root.join("frame.FIT").exists());
    }

    #[test]
    fn existing_target_directory_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        // An invalid archive alongside an existing target: the extractor
        // must skip before ever opening the archive.
        std::fs::write(root.join("0722700101.tar.gz"), b"not a tarball").unwrap();
        std::fs::create_dir(root.join("0722700101")).unwrap();

        let extractor = Extractor::new(root, false);
        extractor.extract_and_organize().unwrap();

        assert!(root.join("0722700101.tar.gz").exists());
    }
}
