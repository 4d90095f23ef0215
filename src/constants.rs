//! Shared constants of the OM reduction pipeline.
//!
//! The file-naming convention is the only inter-stage contract: every stage
//! locates its inputs by matching these patterns and suffixes against the
//! observation `work/` directory. Output suffixes are always appended
//! before the extension, never replacing earlier tags, so downstream
//! stages can still find upstream-tagged files positionally.

/// Result alias used across the crate.
pub type OmResult<T> = Result<T, crate::errors::OmPrepError>;

/// Width of a zero-padded observation identifier.
pub const OBSID_WIDTH: usize = 10;

/// Mandatory catalog column carrying the observation identifiers.
pub const OBSID_COLUMN: &str = "OBSERVATION.OBSERVATION_ID";

/// Suffix appended to stray-light corrected images.
///
/// The historical spelling (`jpiter`) is kept for on-disk compatibility
/// with already-reduced archives.
pub const STRAY_SUFFIX: &str = "_jpiter_filtred";

/// Suffix appended by the astrometric matcher to rotated images.
pub const ROTATED_SUFFIX: &str = "_rotated_WCS";

/// Suffix of segmentation maps produced by the source detector.
pub const SEGMAP_SUFFIX: &str = "_segmentation_map";

/// Suffix of source-masked images.
pub const MASKED_SUFFIX: &str = "_masked";

/// OM product patterns eligible for stray-light correction.
pub const CORRECTION_PATTERNS: [&str; 3] =
    ["P*FIMAG_0000.FIT", "P*IMAGE_0000.FIT", "P*IMAGE_1000.FIT"];

/// Pattern of stray-light corrected images, input to the astrometric batch.
pub const STRAY_CORRECTED_PATTERN: &str = "*_jpiter_filtred.FIT";

/// Pattern that switches the mosaic builder into stacked-frame mode.
pub const STACKED_FRAME_PATTERN: &str = "P*FIMAG*jpiter_filtred_rotated_WCS.FIT";

/// Mosaic-mode output pattern, one side of the band-combiner pairing.
pub const UVW1_MOSAIC_PATTERN: &str = "P*_UVW1_jupiter_filtred_MOSAIC.FIT";

/// Hybrid-mode (catalog image) pattern, the other side of the pairing.
pub const RSIMAGM_PATTERN: &str = "P*RSIMAGM*.FIT";

/// Patterns scanned by the source-detection pass.
pub const SEGMENTATION_PATTERNS: [&str; 3] = [
    "*_combined_UVM2_UVW1.fits",
    "*_UVW1_jupiter_filtred_MOSAIC.FIT",
    "P*RSIMAGM*.FIT",
];

/// WCS source pattern for the header synchronizer.
pub const WCS_SOURCE_PATTERN: &str = "P*OMS0*SIMAGE1000.FIT";

/// WCS target pattern for the header synchronizer.
pub const WCS_TARGET_PATTERN: &str = "P*OMS0*IMAGE_1000_jpiter_filtred_rotated_WCS.FIT";

/// Coordinate-system keywords copied by the header synchronizer.
pub const WCS_KEYWORDS: [&str; 6] = [
    "CRPIX1", "CRVAL1", "CDELT1", "CRPIX2", "CRVAL2", "CDELT2",
];

/// Name of the per-batch reduction log file.
pub const OMICHAIN_LOG_NAME: &str = "process_omichain_log.txt";

/// Name of the extraction log file.
pub const EXTRACT_LOG_NAME: &str = "extract_log.txt";

/// Base name of the download log file.
pub const DOWNLOAD_LOG_NAME: &str = "log_download.txt";

/// Subdirectory holding raw ODF inputs inside an observation directory.
pub const ODF_DIR: &str = "odf";

/// Subdirectory created for SAS outputs; its presence marks an
/// observation as already reduced.
pub const WORK_DIR: &str = "work";

/// Calibration index file produced by `cifbuild` inside `work/`.
pub const CCF_FILE: &str = "ccf.cif";
