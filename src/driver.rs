//! # Reduction driver
//!
//! The batch orchestrator. Iterates the immediate subdirectories of a
//! batch root (one per observation), runs the SAS reduction chain for
//! each, and on success threads the observation through the
//! post-processing stages in fixed order: stray-light correction,
//! astrometric matching, WCS header synchronization, mosaic building,
//! UV band combination, source detection, and masking.
//!
//! ## Idempotence
//! --------------
//! An observation whose directory already contains `work/` is considered
//! fully reduced and is recorded as already-processed without any
//! external invocation. This directory-existence check is the pipeline's
//! only persisted progress marker; there is no sub-stage resumability.
//!
//! ## Failure isolation
//! --------------------
//! Every stage boundary is wrapped: a stage failure degrades to a
//! [`StageOutcome::Failed`] for that sub-step, an observation-level
//! failure to an [`ObservationOutcome::Failed`], and the batch loop never
//! propagates either. The run returns a [`BatchSummary`] partitioning the
//! observation ids into processed / errored / already-processed, mirrored
//! line by line into the batch text log.

use std::process::Command;

use camino::{Utf8Path, Utf8PathBuf};
use once_cell::sync::OnceCell;

use crate::astrometry::{AstrometryBatch, OmattConfig};
use crate::batch_log::BatchLog;
use crate::combine::BandCombiner;
use crate::constants::{
    OmResult, CORRECTION_PATTERNS, ODF_DIR, OMICHAIN_LOG_NAME, WORK_DIR,
};
use crate::corrector::StrayLightModels;
use crate::errors::OmPrepError;
use crate::fits_image::filter_from_header;
use crate::mosaic::MosaicBuilder;
use crate::naming::{sorted_glob, Filter};
use crate::sas::{SasContext, SasTask};
use crate::segmentation::{masking_pass, SourceExtractor};
use crate::wcs_sync::sync_wcs_keywords;

/// Outcome of one wrapped post-processing sub-step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    Completed,
    Skipped(String),
    Failed(String),
}

/// Outcome of one observation directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObservationOutcome {
    Processed,
    AlreadyProcessed,
    Failed(String),
}

/// Partition of the batch into result classes, by observation id.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchSummary {
    pub processed: Vec<String>,
    pub errored: Vec<String>,
    pub already_processed: Vec<String>,
}

/// Static configuration of one batch run.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Directory whose immediate subdirectories are the observations.
    pub batch_root: Utf8PathBuf,
    /// SAS environment-initialization script copied into each `work/`.
    pub initsas_path: Utf8PathBuf,
    /// Directory of stray-light calibration model frames.
    pub model_dir: Utf8PathBuf,
    /// SExtractor configuration file for the detection pass.
    pub sextractor_config: Utf8PathBuf,
    /// `omatt` parameter overrides for the astrometric batch.
    pub omatt: OmattConfig,
    /// Remove the `odf/` input directory after processing.
    pub remove_odf: bool,
    /// Remove the observation's `.tar.gz` archive after processing.
    pub remove_tar: bool,
}

/// The batch orchestrator.
pub struct ReductionDriver {
    config: DriverConfig,
    log: BatchLog,
    models: OnceCell<StrayLightModels>,
}

impl ReductionDriver {
    pub fn new(config: DriverConfig) -> OmResult<ReductionDriver> {
        if !config.batch_root.is_dir() {
            return Err(OmPrepError::Config(format!(
                "batch root does not exist: {}",
                config.batch_root
            )));
        }
        let log = BatchLog::new(&config.batch_root, OMICHAIN_LOG_NAME);
        Ok(ReductionDriver {
            config,
            log,
            models: OnceCell::new(),
        })
    }

    /// Process every observation directory under the batch root.
    ///
    /// Never returns an error for an individual observation: failures
    /// are folded into the summary and the text log.
    pub fn run(&self) -> OmResult<BatchSummary> {
        let mut summary = BatchSummary::default();

        let mut observations = Vec::new();
        for entry in self.config.batch_root.read_dir_utf8()? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                observations.push(entry.path().to_path_buf());
            }
        }
        observations.sort();

        for obs_dir in observations {
            let name = obs_dir.file_name().unwrap_or_default().to_string();
            self.log.record(&format!("processing observation: {name}"));
            match self.process_observation(&obs_dir) {
                ObservationOutcome::Processed => summary.processed.push(name),
                ObservationOutcome::AlreadyProcessed => summary.already_processed.push(name),
                ObservationOutcome::Failed(reason) => {
                    self.log
                        .record_error(&format!("observation {name} failed: {reason}"));
                    summary.errored.push(name);
                }
            }
        }

        self.log.record(&format!(
            "batch finished: {} processed, {} errored, {} already processed",
            summary.processed.len(),
            summary.errored.len(),
            summary.already_processed.len()
        ));
        Ok(summary)
    }

    /// One observation, never propagating its errors.
    fn process_observation(&self, obs_dir: &Utf8Path) -> ObservationOutcome {
        let work = obs_dir.join(WORK_DIR);
        if work.exists() {
            self.log.record(&format!(
                "'{WORK_DIR}' already exists in {}, assuming the reduction already ran",
                obs_dir.file_name().unwrap_or_default()
            ));
            return ObservationOutcome::AlreadyProcessed;
        }

        let outcome = match self.reduce_observation(obs_dir, &work) {
            Ok(outcome) => outcome,
            Err(e) => ObservationOutcome::Failed(e.to_string()),
        };
        // Failed observations get the same odf/tar cleanup as successful
        // ones; the flags decide, not the outcome.
        if let Err(e) = self.cleanup(obs_dir) {
            self.log
                .record_error(&format!("cleanup failed for {obs_dir}: {e}"));
        }
        outcome
    }

    /// Prepare, reduce and post-process one observation.
    fn reduce_observation(
        &self,
        obs_dir: &Utf8Path,
        work: &Utf8Path,
    ) -> OmResult<ObservationOutcome> {
        let odf_dir = obs_dir.join(ODF_DIR);
        let input_dir = if odf_dir.is_dir() {
            odf_dir
        } else {
            obs_dir.to_path_buf()
        };
        self.log
            .record(&format!("using {input_dir} as input directory"));

        std::fs::create_dir_all(work)?;
        self.log.record(&format!("created '{WORK_DIR}' in {obs_dir}"));

        let initsas_dest = work.join("initsas.sh");
        std::fs::copy(&self.config.initsas_path, &initsas_dest)?;
        crate::extract::unpack_archives_in(&input_dir, &self.log)?;

        let script = std::fs::read_to_string(&initsas_dest)?;
        std::fs::write(&initsas_dest, rewrite_sas_odf_line(&script, &input_dir))?;
        self.log
            .record(&format!("initsas.sh rewritten to use {input_dir}"));

        self.run_init_script(work)?;

        let Some(sas_file) = self.find_descriptor(work)? else {
            self.log
                .record_error(&format!("no .SAS descriptor file found in {work}"));
            return Ok(ObservationOutcome::Failed(
                "no .SAS descriptor file".to_string(),
            ));
        };

        let context = SasContext::new(work, &sas_file);
        context.ensure_descriptor_exists()?;
        self.log.record(&format!("SAS_ODF: {}", context.odf));
        self.log.record(&format!("SAS_CCF: {}", context.ccf));

        let reduced = self.run_reduction_chain(work, &context);
        if reduced {
            self.post_process(obs_dir, work, &context);
        }

        if reduced {
            Ok(ObservationOutcome::Processed)
        } else {
            Ok(ObservationOutcome::Failed(
                "sasver/omichain execution failed".to_string(),
            ))
        }
    }

    /// Source the copied initialization script inside `work`.
    fn run_init_script(&self, work: &Utf8Path) -> OmResult<()> {
        let output = Command::new("bash")
            .arg("-c")
            .arg(format!("cd {work} && . ./initsas.sh"))
            .output()?;
        if !output.status.success() {
            return Err(OmPrepError::ExternalTool {
                tool: "initsas.sh".to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        self.log.record(&format!("initsas.sh executed in {work}"));
        Ok(())
    }

    /// The single `*.SAS` observation descriptor expected inside `work`.
    fn find_descriptor(&self, work: &Utf8Path) -> OmResult<Option<String>> {
        let mut descriptors = Vec::new();
        for entry in work.read_dir_utf8()? {
            let entry = entry?;
            if entry.file_name().ends_with(".SAS") {
                descriptors.push(entry.file_name().to_string());
            }
        }
        descriptors.sort();
        Ok(descriptors.into_iter().next())
    }

    /// `sasver` then `omichain`, blocking, inside `work`.
    fn run_reduction_chain(&self, work: &Utf8Path, context: &SasContext) -> bool {
        self.log.record("running sasver...");
        if let Err(e) = SasTask::new("sasver").run(work, context) {
            self.log.record_error(&format!("sasver failed: {e}"));
            return false;
        }
        self.log.record("running omichain...");
        match SasTask::new("omichain")
            .arg(r#"filters="UVW1 UVM2""#)
            .run(work, context)
        {
            Ok(()) => {
                self.log.record(&format!("omichain executed in {work}"));
                true
            }
            Err(e) => {
                self.log.record_error(&format!("omichain failed: {e}"));
                false
            }
        }
    }

    /// The fixed post-processing chain. Each stage is wrapped so its
    /// failure aborts only that sub-step.
    fn post_process(&self, obs_dir: &Utf8Path, work: &Utf8Path, context: &SasContext) {
        let outcomes = [
            ("stray-light correction", self.stage(|| self.stray_light_pass(work))),
            ("astrometric matching", self.stage(|| {
                AstrometryBatch::new(work, self.config.omatt.clone(), &self.log)?.run(context)
            })),
            ("WCS synchronization", self.stage(|| sync_wcs_keywords(work, &self.log))),
            ("mosaic building", self.stage(|| {
                MosaicBuilder::new(work, &self.log)?.build(context)
            })),
            ("band combination", self.stage(|| {
                BandCombiner::new(work, &self.log).run()
            })),
            ("source detection", self.stage(|| {
                SourceExtractor::new(work, &self.config.sextractor_config, &self.log)
                    .detection_pass()
            })),
            ("source masking", self.stage(|| masking_pass(work, &self.log))),
        ];
        for (stage, outcome) in outcomes {
            match outcome {
                StageOutcome::Completed => {
                    self.log.record(&format!("{stage}: completed"));
                }
                StageOutcome::Skipped(reason) => {
                    self.log.record_warn(&format!("{stage}: skipped ({reason})"));
                }
                StageOutcome::Failed(reason) => {
                    self.log
                        .record_error(&format!("{stage}: failed ({reason}) for {obs_dir}"));
                }
            }
        }
    }

    /// Wrap one stage call into a [`StageOutcome`].
    fn stage(&self, call: impl FnOnce() -> OmResult<()>) -> StageOutcome {
        match call() {
            Ok(()) => StageOutcome::Completed,
            Err(OmPrepError::MissingInput(reason)) => StageOutcome::Skipped(reason),
            Err(e) => StageOutcome::Failed(e.to_string()),
        }
    }

    /// Apply the stray-light corrector to every eligible UVW1 product.
    fn stray_light_pass(&self, work: &Utf8Path) -> OmResult<()> {
        let models = self
            .models
            .get_or_try_init(|| StrayLightModels::load(&self.config.model_dir))?;

        let mut candidates = Vec::new();
        for pattern in CORRECTION_PATTERNS {
            candidates.extend(sorted_glob(work, pattern)?);
        }
        candidates.sort();
        candidates.dedup();

        if candidates.is_empty() {
            self.log
                .record("no file eligible for stray-light correction was found");
            return Ok(());
        }

        for path in candidates {
            let name = path.file_name().unwrap_or_default().to_string();
            match self.correct_one(models, &path) {
                Ok(true) => self.log.record(&format!("correction applied to {name}")),
                Ok(false) => {}
                Err(e) => self
                    .log
                    .record_error(&format!("failed to check or correct {name}: {e}")),
            }
        }
        Ok(())
    }

    /// Correct one frame when its header filter is UVW1.
    fn correct_one(&self, models: &StrayLightModels, path: &Utf8Path) -> OmResult<bool> {
        if filter_from_header(path)? != Some(Filter::Uvw1) {
            return Ok(false);
        }
        self.log.record(&format!(
            "UVW1 image found: {}",
            path.file_name().unwrap_or_default()
        ));
        models.correct_image(path, Filter::Uvw1, None)?;
        Ok(true)
    }

    /// Post-run cleanup controlled by configuration flags.
    fn cleanup(&self, obs_dir: &Utf8Path) -> OmResult<()> {
        let odf_dir = obs_dir.join(ODF_DIR);
        if self.config.remove_odf && odf_dir.is_dir() {
            match std::fs::remove_dir_all(&odf_dir) {
                Ok(()) => self.log.record(&format!("removed input directory {odf_dir}")),
                Err(e) => self
                    .log
                    .record_error(&format!("failed to remove {odf_dir}: {e}")),
            }
        } else if !self.config.remove_odf {
            self.log
                .record("configured to keep the 'odf' input directory");
        }

        if self.config.remove_tar {
            let name = obs_dir.file_name().unwrap_or_default();
            let archive = self.config.batch_root.join(format!("{name}.tar.gz"));
            if archive.is_file() {
                match std::fs::remove_file(&archive) {
                    Ok(()) => self.log.record(&format!("archive {archive} removed")),
                    Err(e) => self
                        .log
                        .record_error(&format!("failed to remove {archive}: {e}")),
                }
            } else {
                self.log
                    .record(&format!("no .tar.gz archive found for {name}"));
            }
        }
        Ok(())
    }
}

/// Rewrite the `SAS_ODF=` assignment of an initsas script to point at
/// the chosen input directory, leaving every other line untouched.
pub fn rewrite_sas_odf_line(script: &str, odf_dir: &Utf8Path) -> String {
    let mut rewritten = String::with_capacity(script.len());
    for line in script.lines() {
        if line.contains("SAS_ODF=") {
            rewritten.push_str(&format!("SAS_ODF={odf_dir}; export SAS_ODF\n"));
        } else {
            rewritten.push_str(line);
            rewritten.push('\n');
        }
    }
    rewritten
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sas_odf_line_is_rewritten_in_place() {
        let script = "#!/bin/sh\nSAS_ODF=/old/path; export SAS_ODF\nSAS_DIR=/sas\n";
        let rewritten = rewrite_sas_odf_line(script, Utf8Path::new("/data/0722700101/odf"));
        assert_eq!(
            rewritten,
            "#!/bin/sh\nSAS_ODF=/data/0722700101/odf; export SAS_ODF\nSAS_DIR=/sas\n"
        );
    }

    #[test]
    fn scripts_without_the_assignment_are_unchanged() {
        let script = "#!/bin/sh\necho hello\n";
        assert_eq!(
            rewrite_sas_odf_line(script, Utf8Path::new("/odf")),
            script
        );
    }
}
