//! # Typed OM filename descriptor
//!
//! OM product names encode their provenance positionally: a 10-digit
//! observation id, an `OMS###` exposure id, and a fixed, non-reorderable
//! sequence of processing-stage suffixes (e.g. `_jpiter_filtred` then
//! `_rotated_WCS`). This module parses that convention **once** at
//! discovery time into typed values ([`ObsId`], [`ExposureId`],
//! [`ExposureTag`], [`Filter`]) which the stages carry around, instead of
//! re-matching ad hoc patterns at every step.
//!
//! ## Conventions
//! --------------
//! * `P<obsid><expid>...` — science products (images, source lists).
//! * `I<obsid><expid>...USNO...` — sky catalog subsets.
//! * Filters are read from the `FILTER` header keyword, never inferred
//!   from the file name, except for stray-light model files which carry
//!   the filter token in their name.

use std::fmt;

use camino::{Utf8Path, Utf8PathBuf};
use once_cell::sync::Lazy;
use regex::Regex;

/// `P<obsid><OMS exposure>` positional pattern shared by OM products.
static EXPOSURE_TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"P(\d{10})(OMS\d{3,4})").expect("invalid exposure tag regex"));

/// Leading product token (`P` followed by the observation digits).
static PRODUCT_TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(P\d+)").expect("invalid product token regex"));

/// Bare exposure id anywhere in a name.
static EXPOSURE_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(OMS\d+)").expect("invalid exposure id regex"));

/// One OM optical bandpass, as recorded in the `FILTER` header keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Filter {
    Uvw1,
    Uvm2,
    Uvl,
    U,
    B,
    V,
    White,
}

impl Filter {
    /// Fixed priority order used by the hybrid mosaic mode.
    pub const MOSAIC_PRIORITY: [Filter; 7] = [
        Filter::Uvw1,
        Filter::Uvm2,
        Filter::Uvl,
        Filter::U,
        Filter::B,
        Filter::V,
        Filter::White,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Filter::Uvw1 => "UVW1",
            Filter::Uvm2 => "UVM2",
            Filter::Uvl => "UVL",
            Filter::U => "U",
            Filter::B => "B",
            Filter::V => "V",
            Filter::White => "WHITE",
        }
    }

    /// Normalize a raw `FILTER` header value (trimmed, case-insensitive).
    ///
    /// Return
    /// ------
    /// * `Some(Filter)` for a known bandpass, `None` otherwise.
    pub fn from_header_value(value: &str) -> Option<Filter> {
        match value.trim().to_uppercase().as_str() {
            "UVW1" => Some(Filter::Uvw1),
            "UVM2" => Some(Filter::Uvm2),
            "UVL" => Some(Filter::Uvl),
            "U" => Some(Filter::U),
            "B" => Some(Filter::B),
            "V" => Some(Filter::V),
            "WHITE" => Some(Filter::White),
            _ => None,
        }
    }

    /// Infer the filter of a stray-light model file from its name.
    ///
    /// Only the UV filters have calibration models; files without a
    /// recognizable token are ignored by the model loader.
    pub fn from_model_file_name(name: &str) -> Option<Filter> {
        if name.contains("UVW1") {
            Some(Filter::Uvw1)
        } else if name.contains("UVM2") {
            Some(Filter::Uvm2)
        } else {
            None
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A 10-digit, zero-padded observation identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObsId(String);

impl ObsId {
    /// Build an observation id from any numeric string, zero-padding to
    /// the fixed width.
    pub fn new(raw: &str) -> ObsId {
        let trimmed = raw.trim();
        ObsId(format!("{trimmed:0>width$}", width = crate::constants::OBSID_WIDTH))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObsId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An `OMS###` exposure identifier embedded in OM product names.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExposureId(String);

impl ExposureId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExposureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The (observation id, exposure id) pair parsed from one product name.
///
/// Parsed once at discovery time and carried through the pipeline as a
/// value, so downstream stages never re-match the raw convention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExposureTag {
    pub obsid: ObsId,
    pub exposure: ExposureId,
}

impl ExposureTag {
    /// Extract the tag from an OM product file name.
    ///
    /// Arguments
    /// ---------
    /// * `file_name`: base name of a `P<obsid>OMS###...` product.
    ///
    /// Return
    /// ------
    /// * `Some(ExposureTag)` when the positional pattern matches,
    ///   `None` otherwise (callers treat this as a non-fatal skip).
    pub fn parse(file_name: &str) -> Option<ExposureTag> {
        let captures = EXPOSURE_TAG_RE.captures(file_name)?;
        Some(ExposureTag {
            obsid: ObsId(captures[1].to_string()),
            exposure: ExposureId(captures[2].to_string()),
        })
    }
}

/// Insert a processing-stage suffix before the file extension.
///
/// The suffix is appended to whatever tags the name already carries, so
/// `P...IMAGE_1000_jpiter_filtred.FIT` + `_rotated_WCS` yields
/// `P...IMAGE_1000_jpiter_filtred_rotated_WCS.FIT`.
pub fn with_stage_suffix(path: &Utf8Path, suffix: &str) -> Utf8PathBuf {
    let stem = path.file_stem().unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{stem}{suffix}.{ext}"),
        None => format!("{stem}{suffix}"),
    };
    path.with_file_name(name)
}

/// Leading `P<digits>` token of a product name, used to name mosaics.
pub fn leading_product_token(file_name: &str) -> Option<&str> {
    PRODUCT_TOKEN_RE
        .captures(file_name)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Bare exposure id (`OMS###`) of a product name, if any.
pub fn exposure_id_of(file_name: &str) -> Option<&str> {
    EXPOSURE_ID_RE
        .captures(file_name)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Pairing key of a mosaic-mode output: the token before the first `_`.
pub fn mosaic_pair_key(file_name: &str) -> &str {
    file_name.split('_').next().unwrap_or(file_name)
}

/// Pairing key of a hybrid-mode output: the token before the `OMS`
/// marker. Exposure-less products fall back to the leading `P<digits>`
/// token, which covers the same id prefix.
pub fn hybrid_pair_key(file_name: &str) -> &str {
    if let Some((prefix, _)) = file_name.split_once("OMS") {
        return prefix;
    }
    leading_product_token(file_name).unwrap_or(file_name)
}

/// Directory entries matching `pattern`, sorted lexicographically.
///
/// Sorting keeps every discovery deterministic; several stages rely on
/// the "lexicographically-first candidate" rule.
pub fn sorted_glob(
    dir: &Utf8Path,
    pattern: &str,
) -> crate::constants::OmResult<Vec<Utf8PathBuf>> {
    let full = dir.join(pattern);
    let mut paths = Vec::new();
    for entry in glob::glob(full.as_str())? {
        paths.push(crate::fits_image::utf8_path(entry?)?);
    }
    paths.sort();
    Ok(paths)
}

/// First entry matching `pattern`, if any.
pub fn first_glob_match(
    dir: &Utf8Path,
    pattern: &str,
) -> crate::constants::OmResult<Option<Utf8PathBuf>> {
    Ok(sorted_glob(dir, pattern)?.into_iter().next())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn obsid_is_zero_padded() {
        assert_eq!(ObsId::new("722700101").as_str(), "0722700101");
        assert_eq!(ObsId::new("0722700101").as_str(), "0722700101");
        assert_eq!(ObsId::new(" 42 ").as_str(), "0000000042");
    }

    #[test]
    fn exposure_tag_parses_positionally() {
        let tag = ExposureTag::parse("P0722700101OMS413IMAGE_0000_jpiter_filtred.FIT").unwrap();
        assert_eq!(tag.obsid.as_str(), "0722700101");
        assert_eq!(tag.exposure.as_str(), "OMS413");
    }

    #[test]
    fn exposure_tag_rejects_malformed_names() {
        assert!(ExposureTag::parse("ccf.cif").is_none());
        assert!(ExposureTag::parse("P123OMS413IMAGE.FIT").is_none());
    }

    #[test]
    fn stage_suffix_is_appended_before_extension() {
        let path = Utf8Path::new("/work/P0722700101OMS413IMAGE_0000.FIT");
        assert_eq!(
            with_stage_suffix(path, crate::constants::STRAY_SUFFIX).as_str(),
            "/work/P0722700101OMS413IMAGE_0000_jpiter_filtred.FIT"
        );
    }

    #[test]
    fn stage_suffixes_accumulate() {
        let once = with_stage_suffix(Utf8Path::new("a/IMG.FIT"), "_jpiter_filtred");
        let twice = with_stage_suffix(&once, "_rotated_WCS");
        assert_eq!(twice.as_str(), "a/IMG_jpiter_filtred_rotated_WCS.FIT");
    }

    #[test]
    fn filter_header_values_are_normalized() {
        assert_eq!(Filter::from_header_value(" uvw1 "), Some(Filter::Uvw1));
        assert_eq!(Filter::from_header_value("WHITE"), Some(Filter::White));
        assert_eq!(Filter::from_header_value("BLOCKED"), None);
    }

    #[test]
    fn pairing_keys() {
        assert_eq!(
            mosaic_pair_key("P1_UVW1_jupiter_filtred_MOSAIC.FIT"),
            "P1"
        );
        assert_eq!(hybrid_pair_key("P1RSIMAGM0.FIT"), "P1");
        assert_eq!(hybrid_pair_key("P1OMS413RSIMAGM0.FIT"), "P1");
        assert_eq!(hybrid_pair_key("ccf.cif"), "ccf.cif");
    }

    #[test]
    fn product_token_and_exposure_id() {
        assert_eq!(
            leading_product_token("P0722700101OMS413SIMAGE1000.FIT"),
            Some("P0722700101")
        );
        assert_eq!(leading_product_token("ccf.cif"), None);
        assert_eq!(
            exposure_id_of("P0722700101OMS413SIMAGE1000.FIT"),
            Some("OMS413")
        );
        assert_eq!(exposure_id_of("ccf.cif"), None);
    }
}
