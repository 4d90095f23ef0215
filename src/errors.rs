use thiserror::Error;

use crate::naming::Filter;

/// Error taxonomy of the OM reduction pipeline.
///
/// Variants map to the four failure classes the driver distinguishes:
/// missing inputs (usually non-fatal, item skipped), shape/format
/// mismatches (non-fatal skips), external-tool failures (caught at the
/// narrowest enclosing stage, with captured stderr), and
/// configuration/environment errors (abort the current observation).
#[derive(Error, Debug)]
pub enum OmPrepError {
    #[error("missing input: {0}")]
    MissingInput(String),

    #[error("no stray-light model for filter {filter} with shape {height}x{width}")]
    MissingModel {
        filter: Filter,
        height: usize,
        width: usize,
    },

    #[error("dimension mismatch: image is {image_height}x{image_width}, map is {map_height}x{map_width}")]
    ShapeMismatch {
        image_height: usize,
        image_width: usize,
        map_height: usize,
        map_width: usize,
    },

    #[error("SAS task '{task}' failed: {stderr}")]
    SasTask { task: String, stderr: String },

    #[error("'{tool}' failed: {stderr}")]
    ExternalTool { tool: String, stderr: String },

    #[error("no image data found in {0}")]
    EmptyImage(String),

    #[error("catalog column not found: {0}")]
    MissingColumn(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("non-UTF-8 path: {0}")]
    NonUtf8Path(String),

    #[error("low-level FITS call failed on {path} (cfitsio status {status})")]
    CfitsioStatus { path: String, status: i32 },

    #[error("unable to perform file operation: {0}")]
    Io(#[from] std::io::Error),

    #[error("FITS error: {0}")]
    Fits(#[from] fitsio::errors::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("invalid glob pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("glob error: {0}")]
    Glob(#[from] glob::GlobError),
}
