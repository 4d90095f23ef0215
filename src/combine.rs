//! # UV band combination
//!
//! Sums the UVW1 mosaic output with its UVM2 hybrid-mode counterpart,
//! producing one combined UV frame per observation id.
//!
//! Pairing is by the leading id token: mosaic-mode outputs
//! (`P*_UVW1_jupiter_filtred_MOSAIC.FIT`) are keyed by the token before
//! the first underscore, hybrid-mode outputs (`P*RSIMAGM*.FIT`) by the
//! token before the `OMS` marker. Only keys present on both sides are
//! combined. The summation is NaN-safe: non-finite pixels of either
//! input are treated as zero, so a pixel valid in exactly one input
//! keeps that input's value.

use camino::{Utf8Path, Utf8PathBuf};

use crate::batch_log::BatchLog;
use crate::constants::{OmResult, RSIMAGM_PATTERN, UVW1_MOSAIC_PATTERN};
use crate::errors::OmPrepError;
use crate::fits_image::{copy_with_plane, load_primary};
use crate::naming::{hybrid_pair_key, mosaic_pair_key, sorted_glob};

/// One matched (key, mosaic file, hybrid file) triple.
pub type CombinerPair = (String, Utf8PathBuf, Utf8PathBuf);

/// Band combiner over one observation's `work/` directory.
pub struct BandCombiner<'a> {
    work: Utf8PathBuf,
    log: &'a BatchLog,
}

impl<'a> BandCombiner<'a> {
    pub fn new(work: &Utf8Path, log: &'a BatchLog) -> BandCombiner<'a> {
        BandCombiner {
            work: work.to_path_buf(),
            log,
        }
    }

    /// Combine every matched pair found in the work directory.
    ///
    /// Finding no pair is logged as an error but is not fatal to the
    /// caller; a malformed pair (shape mismatch, unreadable file)
    /// propagates and is caught at the driver's stage boundary.
    pub fn run(&self) -> OmResult<()> {
        let mosaic_files = sorted_glob(&self.work, UVW1_MOSAIC_PATTERN)?;
        let hybrid_files = sorted_glob(&self.work, RSIMAGM_PATTERN)?;
        let pairs = matching_pairs(&mosaic_files, &hybrid_files);

        if pairs.is_empty() {
            self.log
                .record_error("COMBINE: no matching mosaic/hybrid pair found");
            return Ok(());
        }

        for (key, mosaic, hybrid) in pairs {
            let output = self.work.join(format!("{key}_combined_UVM2_UVW1.fits"));
            self.combine_pair(&mosaic, &hybrid, &output)?;
            self.log.record(&format!(
                "COMBINE: saved {}",
                output.file_name().unwrap_or_default()
            ));
        }
        Ok(())
    }

    /// Sum two frames and write the result, keeping the first file's
    /// header (the output is a copy of the mosaic file with its plane
    /// replaced).
    fn combine_pair(
        &self,
        first: &Utf8Path,
        second: &Utf8Path,
        output: &Utf8Path,
    ) -> OmResult<()> {
        let a = load_primary(first)?;
        let b = load_primary(second)?;
        if a.shape() != b.shape() {
            return Err(OmPrepError::ShapeMismatch {
                image_height: a.height,
                image_width: a.width,
                map_height: b.height,
                map_width: b.width,
            });
        }
        let combined = nan_safe_sum(&a.pixels, &b.pixels);
        copy_with_plane(first, output, 0, &combined)?;
        Ok(())
    }
}

/// Pair mosaic-mode and hybrid-mode outputs by shared leading id token.
///
/// Only keys present in both sets are paired; the result is sorted by
/// key. When one key matches several files on a side, the
/// lexicographically-first file wins (inputs are pre-sorted).
pub fn matching_pairs(
    mosaic_files: &[Utf8PathBuf],
    hybrid_files: &[Utf8PathBuf],
) -> Vec<CombinerPair> {
    let keyed = |files: &[Utf8PathBuf], key_of: fn(&str) -> &str| {
        let mut map = std::collections::BTreeMap::new();
        for file in files {
            let name = file.file_name().unwrap_or_default();
            map.entry(key_of(name).to_string())
                .or_insert_with(|| file.clone());
        }
        map
    };
    let mosaics = keyed(mosaic_files, mosaic_pair_key);
    let hybrids = keyed(hybrid_files, hybrid_pair_key);

    mosaics
        .into_iter()
        .filter_map(|(key, mosaic)| {
            hybrids
                .get(&key)
                .map(|hybrid| (key, mosaic, hybrid.clone()))
        })
        .collect()
}

/// Elementwise sum treating non-finite pixels of either input as zero.
pub fn nan_safe_sum(a: &[f32], b: &[f32]) -> Vec<f32> {
    let zeroed = |v: f32| if v.is_finite() { v } else { 0.0 };
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| zeroed(x) + zeroed(y))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(names: &[&str]) -> Vec<Utf8PathBuf> {
        names.iter().map(|n| Utf8PathBuf::from(*n)).collect()
    }

    #[test]
    fn pairing_requires_keys_on_both_sides() {
        let mosaics = paths(&["P1_UVW1_jupiter_filtred_MOSAIC.FIT"]);
        let hybrids = paths(&["P1RSIMAGM0.FIT", "P2RSIMAGM0.FIT"]);

        let pairs = matching_pairs(&mosaics, &hybrids);
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].0, "P1");
        assert!(pairs.iter().all(|(k, _, _)| k != "P2"));
    }

    #[test]
    fn exposure_tagged_hybrid_names_share_the_id_key() {
        let mosaics = paths(&["P0722700101_UVW1_jupiter_filtred_MOSAIC.FIT"]);
        let hybrids = paths(&["P0722700101OMS004RSIMAGM0000.FIT"]);
        let pairs = matching_pairs(&mosaics, &hybrids);
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].0, "P0722700101");
    }

    #[test]
    fn no_common_key_yields_no_pair() {
        let mosaics = paths(&["P1_UVW1_jupiter_filtred_MOSAIC.FIT"]);
        let hybrids = paths(&["P2OMS004RSIMAGM0.FIT"]);
        assert!(matching_pairs(&mosaics, &hybrids).is_empty());
    }

    #[test]
    fn summation_is_nan_safe() {
        let a = vec![1.0, f32::NAN, 3.0, f32::NAN];
        let b = vec![2.0, 5.0, f32::NAN, f32::NAN];
        assert_eq!(nan_safe_sum(&a, &b), vec![3.0, 5.0, 3.0, 0.0]);
    }
}
