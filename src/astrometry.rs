//! # Astrometric batch matching
//!
//! Refines the WCS of every stray-light corrected image by running the
//! SAS `omatt` task against the exposure's own source list and USNO sky
//! catalog subset. Inputs are discovered by filename convention and
//! paired per exposure:
//!
//! * image: `*_jpiter_filtred.FIT`
//! * source list: `P<obsid><expid>*SWSRLI*.FIT`
//! * catalog: `I<obsid><expid>*USNO*.FIT`
//!
//! An image whose name cannot be parsed, or whose source list or catalog
//! is missing, is skipped with a warning. One record's `omatt` failure is
//! logged and the batch continues; finding no candidate image at all is
//! an error surfaced to the caller.

use camino::{Utf8Path, Utf8PathBuf};

use crate::batch_log::BatchLog;
use crate::constants::{OmResult, ROTATED_SUFFIX, STRAY_CORRECTED_PATTERN};
use crate::errors::OmPrepError;
use crate::naming::{with_stage_suffix, ExposureTag};
use crate::sas::{SasContext, SasTask};

/// `omatt` parameter set. Field defaults follow the SAS task defaults
/// used by this pipeline.
#[derive(Debug, Clone)]
pub struct OmattConfig {
    pub tolerance: f64,
    pub max_radec_err: f64,
    pub max_rms_res: f64,
    pub use_catalog: bool,
    pub rotate_image: bool,
    pub verbosity: u8,
    pub warning_level: u8,
}

impl Default for OmattConfig {
    fn default() -> OmattConfig {
        OmattConfig {
            tolerance: 1.5,
            max_radec_err: 1.0,
            max_rms_res: 1.5,
            use_catalog: true,
            rotate_image: true,
            verbosity: 5,
            warning_level: 1,
        }
    }
}

/// One fully paired processing record.
#[derive(Debug, Clone, PartialEq)]
pub struct AstrometrySet {
    pub image: Utf8PathBuf,
    pub source_list: Utf8PathBuf,
    pub catalog: Utf8PathBuf,
    pub output: Utf8PathBuf,
}

/// Batch runner over one observation's `work/` directory.
pub struct AstrometryBatch<'a> {
    work: Utf8PathBuf,
    config: OmattConfig,
    log: &'a BatchLog,
}

impl<'a> AstrometryBatch<'a> {
    pub fn new(
        work: &Utf8Path,
        config: OmattConfig,
        log: &'a BatchLog,
    ) -> OmResult<AstrometryBatch<'a>> {
        if !work.is_dir() {
            return Err(OmPrepError::Config(format!(
                "work directory does not exist: {work}"
            )));
        }
        Ok(AstrometryBatch {
            work: work.to_path_buf(),
            config,
            log,
        })
    }

    /// Discover and pair all candidate images.
    ///
    /// Return
    /// ------
    /// * One [`AstrometrySet`] per successfully paired image, or
    ///   [`OmPrepError::MissingInput`] when no candidate exists at all.
    pub fn discover(&self) -> OmResult<Vec<AstrometrySet>> {
        let images = self.sorted_glob(STRAY_CORRECTED_PATTERN)?;
        if images.is_empty() {
            return Err(OmPrepError::MissingInput(format!(
                "no '{STRAY_CORRECTED_PATTERN}' image found in {}",
                self.work
            )));
        }
        self.log.record(&format!(
            "OMATT: found {} candidate image(s) in {}",
            images.len(),
            self.work
        ));

        let mut sets = Vec::new();
        for image in images {
            let name = image.file_name().unwrap_or_default();
            let Some(tag) = ExposureTag::parse(name) else {
                self.log.record_warn(&format!(
                    "OMATT: cannot extract OBSID and exposure id from {name}, skipping"
                ));
                continue;
            };

            let srl_pattern = format!("P{}{}*SWSRLI*.FIT", tag.obsid, tag.exposure);
            let Some(source_list) = self.first_glob_match(&srl_pattern)? else {
                self.log.record_warn(&format!(
                    "OMATT: no source list (*SWSRLI*) for {}, skipping",
                    tag.exposure
                ));
                continue;
            };

            let cat_pattern = format!("I{}{}*USNO*.FIT", tag.obsid, tag.exposure);
            let Some(catalog) = self.first_glob_match(&cat_pattern)? else {
                self.log.record_warn(&format!(
                    "OMATT: no catalog file (*USNO*) for {}, skipping",
                    tag.exposure
                ));
                continue;
            };

            let output = with_stage_suffix(&image, ROTATED_SUFFIX);
            self.log.record(&format!(
                "OMATT: paired {name} with {} and {}",
                source_list.file_name().unwrap_or_default(),
                catalog.file_name().unwrap_or_default()
            ));
            sets.push(AstrometrySet {
                image,
                source_list,
                catalog,
                output,
            });
        }
        Ok(sets)
    }

    /// Run `omatt` once per paired record.
    ///
    /// A record's failure is logged and the batch continues with the
    /// remaining records.
    pub fn run(&self, context: &SasContext) -> OmResult<()> {
        let sets = self.discover()?;
        if sets.is_empty() {
            self.log
                .record("OMATT: no valid file set found to process");
            return Ok(());
        }

        let total = sets.len();
        self.log
            .record(&format!("OMATT: starting batch of {total} file set(s)"));
        for (index, set) in sets.iter().enumerate() {
            self.log.record(&format!(
                "OMATT: processing set {}/{total}: {}",
                index + 1,
                set.image.file_name().unwrap_or_default()
            ));
            let task = self.build_task(set);
            self.log
                .record(&format!("OMATT: running: {}", task.command_line()));
            if let Err(e) = task.run(&self.work, context) {
                self.log
                    .record_error(&format!("OMATT: set {} failed: {e}", index + 1));
            }
        }
        self.log.record("OMATT: batch finished");
        Ok(())
    }

    fn build_task(&self, set: &AstrometrySet) -> SasTask {
        let yes_no = |flag: bool| if flag { "yes" } else { "no" };
        SasTask::new("omatt")
            .arg(format!("set={}", set.image))
            .arg(format!("sourcelistset={}", set.source_list))
            .arg(format!("ppsoswset={}", set.output))
            .arg(format!("catfile={}", set.catalog))
            .arg(format!("usecat={}", yes_no(self.config.use_catalog)))
            .arg(format!("rotateimage={}", yes_no(self.config.rotate_image)))
            .arg(format!("tolerance={}", self.config.tolerance))
            .arg(format!("maxradecerr={}", self.config.max_radec_err))
            .arg(format!("maxrmsres={}", self.config.max_rms_res))
            .arg("-w")
            .arg(self.config.warning_level.to_string())
            .arg("-V")
            .arg(self.config.verbosity.to_string())
    }

    fn sorted_glob(&self, pattern: &str) -> OmResult<Vec<Utf8PathBuf>> {
        crate::naming::sorted_glob(&self.work, pattern)
    }

    fn first_glob_match(&self, pattern: &str) -> OmResult<Option<Utf8PathBuf>> {
        crate::naming::first_glob_match(&self.work, pattern)
    }
}
