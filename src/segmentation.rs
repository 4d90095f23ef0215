//! # Source segmentation and masking
//!
//! Two independent passes over an observation's `work/` directory:
//!
//! * **Detection** — run `source-extractor` over the combined, mosaic and
//!   catalog-image outputs, writing one segmentation map per input
//!   (suffix `_segmentation_map` before the extension). Files already
//!   bearing a segmentation or masked marker are never reprocessed.
//! * **Masking** — for every segmentation map, zero the pixels of the
//!   original image wherever the map is positive and write the result
//!   with the `_masked` suffix, keeping the original header.
//!
//! Both passes are best-effort per file: a detector failure, a missing
//! original, or a dimension mismatch is logged and the remaining files
//! are still processed.

use std::process::Command;

use camino::{Utf8Path, Utf8PathBuf};

use crate::batch_log::BatchLog;
use crate::constants::{
    OmResult, MASKED_SUFFIX, SEGMAP_SUFFIX, SEGMENTATION_PATTERNS,
};
use crate::errors::OmPrepError;
use crate::fits_image::{copy_with_plane, load_plane_with_fallback};
use crate::naming::{sorted_glob, with_stage_suffix};

/// Detection pass configuration: the external detector binary and its
/// fixed configuration file.
pub struct SourceExtractor<'a> {
    work: Utf8PathBuf,
    config_file: Utf8PathBuf,
    log: &'a BatchLog,
}

impl<'a> SourceExtractor<'a> {
    pub fn new(
        work: &Utf8Path,
        config_file: &Utf8Path,
        log: &'a BatchLog,
    ) -> SourceExtractor<'a> {
        SourceExtractor {
            work: work.to_path_buf(),
            config_file: config_file.to_path_buf(),
            log,
        }
    }

    /// Generate a segmentation map for every eligible image.
    pub fn detection_pass(&self) -> OmResult<()> {
        if !self.work.is_dir() {
            return Err(OmPrepError::Config(format!(
                "directory does not exist: {}",
                self.work
            )));
        }
        if !self.config_file.is_file() {
            return Err(OmPrepError::Config(format!(
                "SExtractor configuration file not found: {}",
                self.config_file
            )));
        }

        let mut found = 0usize;
        for pattern in SEGMENTATION_PATTERNS {
            for input in sorted_glob(&self.work, pattern)? {
                let name = input.file_name().unwrap_or_default();
                if name.contains(SEGMAP_SUFFIX) || name.contains(MASKED_SUFFIX) {
                    continue;
                }
                found += 1;
                let output = with_stage_suffix(&input, SEGMAP_SUFFIX);
                self.log.record(&format!(
                    "SEXTRACTOR: processing {name} -> {}",
                    output.file_name().unwrap_or_default()
                ));
                if let Err(e) = self.detect_one(&input, &output) {
                    self.log
                        .record_error(&format!("SEXTRACTOR: failed on {name}: {e}"));
                }
            }
        }
        if found == 0 {
            self.log
                .record("SEXTRACTOR: no new file matching the patterns was found");
        }
        Ok(())
    }

    fn detect_one(&self, input: &Utf8Path, output: &Utf8Path) -> OmResult<()> {
        let result = Command::new("source-extractor")
            .arg(input.as_str())
            .arg("-c")
            .arg(self.config_file.as_str())
            .arg("-CHECKIMAGE_NAME")
            .arg(output.as_str())
            .output()?;
        if !result.status.success() {
            return Err(OmPrepError::ExternalTool {
                tool: "source-extractor".to_string(),
                stderr: String::from_utf8_lossy(&result.stderr).into_owned(),
            });
        }
        Ok(())
    }
}

/// Apply every segmentation map found in `work` to its original image.
pub fn masking_pass(work: &Utf8Path, log: &BatchLog) -> OmResult<()> {
    if !work.is_dir() {
        return Err(OmPrepError::Config(format!(
            "directory does not exist: {work}"
        )));
    }

    let mut processed = 0usize;
    for seg_map in sorted_glob(work, &format!("*{SEGMAP_SUFFIX}.*"))? {
        let seg_name = seg_map.file_name().unwrap_or_default().to_string();
        let original_name = seg_name.replace(SEGMAP_SUFFIX, "");
        let original = work.join(&original_name);
        if !original.is_file() {
            log.record_warn(&format!(
                "MASK: map '{seg_name}' found but original '{original_name}' is missing, skipping"
            ));
            continue;
        }
        processed += 1;
        log.record(&format!("MASK: applying {seg_name} to {original_name}"));

        if let Err(e) = mask_one(&original, &seg_map, log) {
            log.record_error(&format!("MASK: failed on {original_name}: {e}"));
        }
    }
    if processed == 0 {
        log.record("MASK: no new segmentation map found to process");
    }
    Ok(())
}

/// Mask one image with its segmentation map.
///
/// The image plane is read from HDU 0, falling back to HDU 1 when the
/// primary is empty; segmentation maps prefer HDU 1. A dimension
/// mismatch is a non-fatal, logged skip.
fn mask_one(original: &Utf8Path, seg_map: &Utf8Path, log: &BatchLog) -> OmResult<()> {
    let (image, image_hdu) = load_plane_with_fallback(original, 0)?;
    let (map, _) = load_plane_with_fallback(seg_map, 1)?;

    if image.shape() != map.shape() {
        log.record_error(&format!(
            "MASK: dimensions of image ({}x{}) and map ({}x{}) do not match, skipping",
            image.height, image.width, map.height, map.width
        ));
        return Ok(());
    }

    let masked = apply_mask(&image.pixels, &map.pixels);
    let output = with_stage_suffix(original, MASKED_SUFFIX);
    copy_with_plane(original, &output, image_hdu, &masked)?;
    log.record(&format!(
        "MASK: saved {}",
        output.file_name().unwrap_or_default()
    ));
    Ok(())
}

/// Zero every pixel whose segmentation map value is positive; all other
/// pixels keep their original value exactly.
pub fn apply_mask(image: &[f32], map: &[f32]) -> Vec<f32> {
    image
        .iter()
        .zip(map.iter())
        .map(|(&pixel, &label)| if label > 0.0 { 0.0 } else { pixel })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_zeroes_only_positive_labels() {
        let image = vec![5.0, -1.5, 2.0, 7.25];
        let map = vec![0.0, 3.0, -2.0, 1.0];
        assert_eq!(apply_mask(&image, &map), vec![5.0, 0.0, 2.0, 0.0]);
    }

    #[test]
    fn mask_with_empty_map_is_identity() {
        let image = vec![1.0, 2.0, 3.0];
        let map = vec![0.0, 0.0, -1.0];
        assert_eq!(apply_mask(&image, &map), image);
    }

    #[test]
    fn detection_requires_the_configuration_file() {
        let dir = tempfile::tempdir().unwrap();
        let work = Utf8Path::from_path(dir.path()).unwrap();
        let log = BatchLog::new(work, "log.txt");
        let missing = work.join("default.sex");
        let extractor = SourceExtractor::new(work, &missing, &log);
        assert!(matches!(
            extractor.detection_pass(),
            Err(OmPrepError::Config(_))
        ));
    }

    #[test]
    fn already_marked_files_are_not_reprocessed() {
        let dir = tempfile::tempdir().unwrap();
        let work = Utf8Path::from_path(dir.path()).unwrap();
        std::fs::write(work.join("default.sex"), b"# config").unwrap();
        // Only already-marked files match the patterns: the pass must
        // find nothing and never invoke the detector.
        std::fs::write(work.join("P1RSIMAGM0_segmentation_map.FIT"), b"").unwrap();
        std::fs::write(work.join("P1RSIMAGM0_masked.FIT"), b"").unwrap();

        let log = BatchLog::new(work, "log.txt");
        let config = work.join("default.sex");
        let extractor = SourceExtractor::new(work, &config, &log);
        extractor.detection_pass().unwrap();

        let content = std::fs::read_to_string(log.path()).unwrap();
        assert!(content.contains("no new file"));
    }
}
