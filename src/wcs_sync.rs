//! # WCS header synchronization
//!
//! `omatt`'s rotated outputs occasionally lose the coordinate-system
//! keywords their untouched `SIMAGE` sibling still carries. This stage
//! copies the six WCS keywords (`CRPIX1/2`, `CRVAL1/2`, `CDELT1/2`) from
//! the reference file to the rotated target whenever they differ, editing
//! the target in place.
//!
//! The fix only applies when the reference frame is a UVW1 exposure; for
//! any other filter the stage logs and returns without touching anything.
//! Missing reference or target files are non-fatal warnings.

use camino::Utf8Path;
use fitsio::FitsFile;

use crate::batch_log::BatchLog;
use crate::constants::{OmResult, WCS_KEYWORDS, WCS_SOURCE_PATTERN, WCS_TARGET_PATTERN};
use crate::naming::first_glob_match;
use crate::naming::Filter;

/// Synchronize the WCS keywords of one observation's `work/` directory.
pub fn sync_wcs_keywords(work: &Utf8Path, log: &BatchLog) -> OmResult<()> {
    let Some(source) = first_glob_match(work, WCS_SOURCE_PATTERN)? else {
        log.record_warn(&format!(
            "WCS sync: no reference file matching '{WCS_SOURCE_PATTERN}'"
        ));
        return Ok(());
    };
    let Some(target) = first_glob_match(work, WCS_TARGET_PATTERN)? else {
        log.record_warn(&format!(
            "WCS sync: no target file matching '{WCS_TARGET_PATTERN}'"
        ));
        return Ok(());
    };
    log.record(&format!(
        "WCS sync: reference {} -> target {}",
        source.file_name().unwrap_or_default(),
        target.file_name().unwrap_or_default()
    ));

    match crate::fits_image::filter_from_primary(&source)? {
        Some(Filter::Uvw1) => {}
        other => {
            log.record(&format!(
                "WCS sync: reference filter is {other:?}, not UVW1, nothing to do"
            ));
            return Ok(());
        }
    }

    let mut src = FitsFile::open(&source)?;
    let src_hdu = src.primary_hdu()?;
    let mut reference_values = Vec::with_capacity(WCS_KEYWORDS.len());
    for key in WCS_KEYWORDS {
        match src_hdu.read_key::<f64>(&mut src, key) {
            Ok(value) => reference_values.push((key, value)),
            Err(_) => {
                log.record_warn(&format!(
                    "WCS sync: reference header lacks mandatory keyword {key}"
                ));
                return Ok(());
            }
        }
    }

    let mut dst = FitsFile::edit(&target)?;
    let dst_hdu = dst.primary_hdu()?;
    let mut updated = 0usize;
    for (key, reference) in reference_values {
        let current = dst_hdu.read_key::<f64>(&mut dst, key).ok();
        if current != Some(reference) {
            dst_hdu.write_key(&mut dst, key, reference)?;
            updated += 1;
            log.record(&format!(
                "WCS sync: {key} updated ({current:?} -> {reference})"
            ));
        }
    }

    if updated > 0 {
        log.record(&format!("WCS sync: {updated} keyword(s) updated in target"));
    } else {
        log.record("WCS sync: all WCS keywords already in sync");
    }
    Ok(())
}
