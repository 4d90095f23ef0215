//! # SAS task invocation
//!
//! Every external reduction step goes through [`SasTask`], a blocking
//! subprocess wrapper around one SAS executable (`sasver`, `omichain`,
//! `omatt`, `ommosaic`, ...).
//!
//! The SAS suite reads its per-observation state from two environment
//! variables, `SAS_ODF` (observation descriptor) and `SAS_CCF`
//! (calibration index). Instead of mutating the pipeline's own process
//! environment, both are carried in an explicit [`SasContext`] value
//! built once per observation and set only on the child process. The
//! task's working directory is likewise set on the child
//! (`Command::current_dir`), so the parent's working directory is never
//! touched and nothing has to be restored on failure paths.

use std::process::Command;

use camino::{Utf8Path, Utf8PathBuf};

use crate::constants::{CCF_FILE, OmResult};
use crate::errors::OmPrepError;

/// The per-observation environment consumed by every SAS task.
#[derive(Debug, Clone)]
pub struct SasContext {
    /// Absolute path of the observation descriptor (`*.SAS` file).
    pub odf: Utf8PathBuf,
    /// Absolute path of the calibration index (`ccf.cif`).
    pub ccf: Utf8PathBuf,
}

impl SasContext {
    /// Context for a reduced observation: descriptor and calibration
    /// index both live inside the `work/` directory.
    pub fn new(work: &Utf8Path, sas_file: &str) -> SasContext {
        SasContext {
            odf: work.join(sas_file),
            ccf: work.join(CCF_FILE),
        }
    }

    /// The descriptor file must exist before any reduction task runs.
    pub fn ensure_descriptor_exists(&self) -> OmResult<()> {
        if !self.odf.is_file() {
            return Err(OmPrepError::Config(format!(
                "SAS descriptor file not found: {}",
                self.odf
            )));
        }
        Ok(())
    }
}

/// One SAS task invocation, built argument by argument.
#[derive(Debug, Clone)]
pub struct SasTask {
    name: String,
    args: Vec<String>,
}

impl SasTask {
    pub fn new(name: &str) -> SasTask {
        SasTask {
            name: name.to_string(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> SasTask {
        self.args.push(arg.into());
        self
    }

    /// The full command line, for logging.
    pub fn command_line(&self) -> String {
        if self.args.is_empty() {
            self.name.clone()
        } else {
            format!("{} {}", self.name, self.args.join(" "))
        }
    }

    /// Run the task to completion inside `work`.
    ///
    /// Arguments
    /// ---------
    /// * `work`: the child's working directory.
    /// * `context`: the `SAS_ODF`/`SAS_CCF` pair for this observation.
    ///
    /// Return
    /// ------
    /// * `Ok(())` on a zero exit status, otherwise
    ///   [`OmPrepError::SasTask`] carrying the captured stderr.
    pub fn run(&self, work: &Utf8Path, context: &SasContext) -> OmResult<()> {
        let output = Command::new(&self.name)
            .args(&self.args)
            .current_dir(work)
            .env("SAS_ODF", context.odf.as_str())
            .env("SAS_CCF", context.ccf.as_str())
            .output()?;
        if !output.status.success() {
            return Err(OmPrepError::SasTask {
                task: self.name.clone(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_points_inside_work() {
        let ctx = SasContext::new(Utf8Path::new("/data/0722700101/work"), "0001_manifest.SAS");
        assert_eq!(ctx.odf.as_str(), "/data/0722700101/work/0001_manifest.SAS");
        assert_eq!(ctx.ccf.as_str(), "/data/0722700101/work/ccf.cif");
    }

    #[test]
    fn missing_descriptor_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let work = Utf8Path::from_path(dir.path()).unwrap();
        let ctx = SasContext::new(work, "absent.SAS");
        assert!(matches!(
            ctx.ensure_descriptor_exists(),
            Err(OmPrepError::Config(_))
        ));
    }

    #[test]
    fn command_line_reflects_arguments() {
        let task = SasTask::new("omichain").arg(r#"filters="UVW1 UVM2""#);
        assert_eq!(task.command_line(), r#"omichain filters="UVW1 UVM2""#);
    }
}
