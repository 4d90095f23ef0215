//! # Mosaic building
//!
//! Stacks per-filter image sets into mosaics with the SAS `ommosaic`
//! task. Two naming conventions occur in reduced OM observations, and the
//! builder picks its mode from which one is present:
//!
//! * **Stacked-frame mode** — corrected full-frame products
//!   (`P*FIMAG*jpiter_filtred_rotated_WCS.FIT`) exist. Matches are
//!   grouped by header filter and each group is stacked with a minimal
//!   parameter set.
//! * **Hybrid-mosaic mode** — no such file exists. For each filter in a
//!   fixed priority order, the lexicographically-first corrected-and-
//!   rotated mosaic component is taken as anchor and all distinct-exposure
//!   `SIMAGE1000` companions of the same filter are added, then stacked
//!   with the full `ommosaic` parameter set.
//!
//! Mode detection is exclusive: when any stacked-frame candidate exists
//! the hybrid path never runs. Per-filter failures are logged and do not
//! abort the remaining filters. `ommosaic` executes with the observation
//! `work/` directory as the child's working directory; the parent process
//! never changes its own.

use camino::{Utf8Path, Utf8PathBuf};
use itertools::Itertools;

use crate::batch_log::BatchLog;
use crate::constants::{OmResult, STACKED_FRAME_PATTERN};
use crate::errors::OmPrepError;
use crate::fits_image::filter_from_header;
use crate::naming::{exposure_id_of, leading_product_token, sorted_glob, Filter};
use crate::sas::{SasContext, SasTask};

/// Fallback product token when none of a group's names parses.
const UNKNOWN_OBSID: &str = "UNKNOWN_OBSID";

/// Which of the two stacking conventions is present.
#[derive(Debug, Clone, PartialEq)]
pub enum MosaicMode {
    /// Corrected full-frame products found; carries the matches.
    StackedFrame(Vec<Utf8PathBuf>),
    /// No stacked-frame candidate; build hybrid mosaics per filter.
    Hybrid,
}

/// Mosaic builder over one observation's `work/` directory.
pub struct MosaicBuilder<'a> {
    work: Utf8PathBuf,
    log: &'a BatchLog,
}

impl<'a> MosaicBuilder<'a> {
    pub fn new(work: &Utf8Path, log: &'a BatchLog) -> OmResult<MosaicBuilder<'a>> {
        if !work.is_dir() {
            return Err(OmPrepError::Config(format!(
                "work directory does not exist: {work}"
            )));
        }
        Ok(MosaicBuilder {
            work: work.to_path_buf(),
            log,
        })
    }

    /// Decide the stacking mode from the directory contents alone.
    pub fn detect_mode(&self) -> OmResult<MosaicMode> {
        let stacked = sorted_glob(&self.work, STACKED_FRAME_PATTERN)?;
        if stacked.is_empty() {
            Ok(MosaicMode::Hybrid)
        } else {
            Ok(MosaicMode::StackedFrame(stacked))
        }
    }

    /// Build all mosaics for the detected mode.
    pub fn build(&self, context: &SasContext) -> OmResult<()> {
        match self.detect_mode()? {
            MosaicMode::StackedFrame(files) => {
                self.log.record(&format!(
                    "MOSAIC: stacked-frame mode, {} corrected file(s) found",
                    files.len()
                ));
                self.stack_frames(&files, context)
            }
            MosaicMode::Hybrid => {
                self.log.record(
                    "MOSAIC: no corrected stacked frame found, proceeding in hybrid mode",
                );
                self.hybrid_mosaics(context)
            }
        }
    }

    /// Stacked-frame mode: one `ommosaic` call per header filter.
    fn stack_frames(&self, files: &[Utf8PathBuf], context: &SasContext) -> OmResult<()> {
        let mut groups: Vec<(Filter, Vec<String>)> = Vec::new();
        for path in files {
            let Some(filter) = self.header_filter(path) else {
                continue;
            };
            let name = path.file_name().unwrap_or_default().to_string();
            match groups.iter_mut().find(|(f, _)| *f == filter) {
                Some((_, members)) => members.push(name),
                None => groups.push((filter, vec![name])),
            }
        }
        if groups.is_empty() {
            self.log.record_error(
                "MOSAIC: corrected stacked frames found but none could be grouped by filter",
            );
            return Ok(());
        }

        for (filter, members) in groups {
            self.log.record(&format!(
                "MOSAIC: stacking {} frame(s) for filter {filter}",
                members.len()
            ));
            let output = mosaic_output_name(&members, filter);
            let task = SasTask::new("ommosaic")
                .arg(format!("imagesets={}", members.join(" ")))
                .arg(format!("mosaicedset={output}"));
            if let Err(e) = task.run(&self.work, context) {
                self.log
                    .record_error(&format!("MOSAIC: ommosaic failed for {filter}: {e}"));
            } else {
                self.log
                    .record(&format!("MOSAIC: stacked image '{output}' created"));
            }
        }
        Ok(())
    }

    /// Hybrid mode: anchor + companions per filter, in priority order.
    fn hybrid_mosaics(&self, context: &SasContext) -> OmResult<()> {
        let mut processed = 0usize;
        for filter in Filter::MOSAIC_PRIORITY {
            self.log
                .record(&format!("MOSAIC: looking for {filter} mosaic components"));
            let members = self.hybrid_inputs(filter)?;
            if members.is_empty() {
                self.log
                    .record(&format!("MOSAIC: no valid image for the {filter} mosaic"));
                continue;
            }
            processed += 1;

            let output = mosaic_output_name(&members, filter);
            self.log.record(&format!(
                "MOSAIC: creating {output} from {} image(s)",
                members.len()
            ));
            let task = SasTask::new("ommosaic")
                .arg(format!("imagesets={}", members.join(" ")))
                .arg(format!("mosaicedset={output}"))
                .arg("correlset=")
                .arg("nsigma=2")
                .arg("mincorr=0")
                .arg("minfraction=0.5")
                .arg("maxdx=5")
                .arg("binaxis=0")
                .arg("numintervals=2")
                .arg("di=10")
                .arg("minnumpixels=100")
                .arg("-w")
                .arg("1")
                .arg("-V")
                .arg("4");
            if let Err(e) = task.run(&self.work, context) {
                self.log
                    .record_error(&format!("MOSAIC: ommosaic failed for {filter}: {e}"));
            } else {
                self.log.record(&format!("MOSAIC: mosaic '{output}' created"));
            }
        }
        if processed == 0 {
            self.log
                .record_warn("MOSAIC: no processable file found for any filter");
        }
        Ok(())
    }

    /// Input basenames of one hybrid mosaic: the first corrected-and-
    /// rotated component whose header filter matches, plus every
    /// distinct-exposure `SIMAGE1000` companion of the same filter.
    fn hybrid_inputs(&self, filter: Filter) -> OmResult<Vec<String>> {
        let mut names: Vec<String> = Vec::new();
        for entry in self.work.read_dir_utf8()? {
            names.push(entry?.file_name().to_string());
        }

        let candidates: Vec<&String> = names
            .iter()
            .filter(|n| {
                n.contains("jpiter_filtred") && n.contains("rotated_WCS") && n.contains("IMAGE_1000")
            })
            .sorted()
            .collect();

        let mut anchor = None;
        for candidate in candidates {
            if self.header_filter(&self.work.join(candidate)) == Some(filter) {
                anchor = Some(candidate.clone());
                break;
            }
        }
        let Some(anchor) = anchor else {
            return Ok(Vec::new());
        };
        let anchor_exposure = exposure_id_of(&anchor).map(str::to_string);

        let mut members = vec![anchor];
        for name in names.iter().filter(|n| n.contains("SIMAGE1000")) {
            if exposure_id_of(name).map(str::to_string) == anchor_exposure {
                continue;
            }
            if self.header_filter(&self.work.join(name)) == Some(filter) {
                members.push(name.clone());
            }
        }
        Ok(members.into_iter().unique().sorted().collect())
    }

    /// Header filter of one member file. An unreadable file or a missing
    /// `FILTER` keyword is a logged per-file skip, never fatal to the
    /// mosaic stage.
    fn header_filter(&self, path: &Utf8Path) -> Option<Filter> {
        match filter_from_header(path) {
            Ok(Some(filter)) => Some(filter),
            Ok(None) => {
                self.log.record_warn(&format!(
                    "MOSAIC: no recognizable FILTER keyword in {}, skipping",
                    path.file_name().unwrap_or_default()
                ));
                None
            }
            Err(e) => {
                self.log.record_warn(&format!(
                    "MOSAIC: cannot read header of {}, skipping: {e}",
                    path.file_name().unwrap_or_default()
                ));
                None
            }
        }
    }
}

/// `<obsid>_<filter>_jupiter_filtred_MOSAIC.FIT` output name, the obsid
/// token taken from the first member name.
fn mosaic_output_name(members: &[String], filter: Filter) -> String {
    let obsid = members
        .first()
        .and_then(|n| leading_product_token(n))
        .unwrap_or(UNKNOWN_OBSID);
    format!("{obsid}_{filter}_jupiter_filtred_MOSAIC.FIT")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Utf8Path) {
        std::fs::write(path, b"").unwrap();
    }

    #[test]
    fn stacked_frame_candidates_force_stacked_mode() {
        let dir = tempfile::tempdir().unwrap();
        let work = Utf8Path::from_path(dir.path()).unwrap();
        // Hybrid-pattern files are also present; they must not matter.
        touch(&work.join("P0500760101OMS005FIMAG_0000_jpiter_filtred_rotated_WCS.FIT"));
        touch(&work.join("P0500760101OMS006IMAGE_1000_jpiter_filtred_rotated_WCS.FIT"));

        let log = BatchLog::new(work, "log.txt");
        let builder = MosaicBuilder::new(work, &log).unwrap();
        match builder.detect_mode().unwrap() {
            MosaicMode::StackedFrame(files) => assert_eq!(files.len(), 1),
            MosaicMode::Hybrid => panic!("expected stacked-frame mode"),
        }
    }

    #[test]
    fn hybrid_mode_without_stacked_candidates() {
        let dir = tempfile::tempdir().unwrap();
        let work = Utf8Path::from_path(dir.path()).unwrap();
        touch(&work.join("P0500760101OMS006IMAGE_1000_jpiter_filtred_rotated_WCS.FIT"));
        touch(&work.join("P0500760101OMS007SIMAGE1000.FIT"));

        let log = BatchLog::new(work, "log.txt");
        let builder = MosaicBuilder::new(work, &log).unwrap();
        assert_eq!(builder.detect_mode().unwrap(), MosaicMode::Hybrid);
    }

    #[test]
    fn unreadable_stacked_frame_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let work = Utf8Path::from_path(dir.path()).unwrap();
        // Not a FITS file at all: its header read fails, the stage must
        // log and carry on instead of aborting.
        std::fs::write(
            work.join("P0500760101OMS005FIMAG_0000_jpiter_filtred_rotated_WCS.FIT"),
            b"not a FITS file",
        )
        .unwrap();

        let log = BatchLog::new(work, "log.txt");
        let builder = MosaicBuilder::new(work, &log).unwrap();
        let context = crate::sas::SasContext::new(work, "manifest.SAS");
        builder.build(&context).unwrap();

        let content = std::fs::read_to_string(log.path()).unwrap();
        assert!(content.contains("cannot read header"));
        assert!(content.contains("none could be grouped"));
    }

    #[test]
    fn unreadable_hybrid_candidate_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let work = Utf8Path::from_path(dir.path()).unwrap();
        std::fs::write(
            work.join("P0500760101OMS006IMAGE_1000_jpiter_filtred_rotated_WCS.FIT"),
            b"not a FITS file",
        )
        .unwrap();

        let log = BatchLog::new(work, "log.txt");
        let builder = MosaicBuilder::new(work, &log).unwrap();
        let context = crate::sas::SasContext::new(work, "manifest.SAS");
        builder.build(&context).unwrap();

        let content = std::fs::read_to_string(log.path()).unwrap();
        assert!(content.contains("cannot read header"));
        assert!(content.contains("no processable file found"));
    }

    #[test]
    fn mosaic_names_embed_obsid_and_filter() {
        let members = vec!["P0500760101OMS005FIMAG_0000_jpiter_filtred_rotated_WCS.FIT".to_string()];
        assert_eq!(
            mosaic_output_name(&members, Filter::Uvw1),
            "P0500760101_UVW1_jupiter_filtred_MOSAIC.FIT"
        );
        assert_eq!(
            mosaic_output_name(&[], Filter::Uvm2),
            "UNKNOWN_OBSID_UVM2_jupiter_filtred_MOSAIC.FIT"
        );
    }
}
