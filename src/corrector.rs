//! # Stray-light correction
//!
//! OM exposures of fields near bright solar-system objects carry a
//! characteristic stray-light artifact. The correction divides the raw
//! frame by a calibration model frame, elementwise. Models live in a
//! fixed directory, one FITS file per (filter, image dimensions)
//! combination, and the lookup is exact: there is no resampling and no
//! nearest-size fallback — a missing key is a hard
//! [`OmPrepError::MissingModel`] and no output is written.
//!
//! The corrected file preserves every other structural part of the
//! original (all extensions, all headers) and is stamped with three audit
//! fields: a `JCORR` flag, a `CDATE` correction timestamp, and a `JHIST`
//! free-text history line.

use std::collections::HashMap;

use camino::{Utf8Path, Utf8PathBuf};
use fitsio::FitsFile;
use hifitime::Epoch;

use crate::constants::{OmResult, STRAY_SUFFIX};
use crate::errors::OmPrepError;
use crate::fits_image::{load_primary, SciImage};
use crate::naming::{with_stage_suffix, Filter};

/// Calibration models keyed by (filter, plane dimensions).
///
/// Loaded once per corrector invocation; read-only afterwards.
#[derive(Debug, Default)]
pub struct StrayLightModels {
    models: HashMap<(Filter, (usize, usize)), Vec<f32>>,
}

impl StrayLightModels {
    /// Load every model frame found in `dir`.
    ///
    /// The filter is inferred from the model file name; files without a
    /// recognizable filter token are ignored.
    pub fn load(dir: &Utf8Path) -> OmResult<StrayLightModels> {
        let mut models = StrayLightModels::default();
        for entry in dir.read_dir_utf8()? {
            let entry = entry?;
            let name = entry.file_name();
            if !name.ends_with(".fits") {
                continue;
            }
            let Some(filter) = Filter::from_model_file_name(name) else {
                continue;
            };
            let frame = load_primary(entry.path())?;
            models.insert(filter, frame.shape(), frame.pixels);
        }
        Ok(models)
    }

    /// Register one model frame under (filter, shape).
    pub fn insert(&mut self, filter: Filter, shape: (usize, usize), pixels: Vec<f32>) {
        self.models.insert((filter, shape), pixels);
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Exact-key model lookup.
    fn find(&self, filter: Filter, shape: (usize, usize)) -> Option<&Vec<f32>> {
        self.models.get(&(filter, shape))
    }

    /// Correct one image and write the result next to it.
    ///
    /// Arguments
    /// ---------
    /// * `image_path`: the frame to correct (primary HDU).
    /// * `filter`: bandpass of the frame, read upstream from its header.
    /// * `output`: explicit output path; defaults to the input path with
    ///   the stray-light suffix inserted before the extension.
    ///
    /// Return
    /// ------
    /// * The path of the corrected file, or
    ///   [`OmPrepError::MissingModel`] when no model matches exactly (in
    ///   which case nothing is written).
    pub fn correct_image(
        &self,
        image_path: &Utf8Path,
        filter: Filter,
        output: Option<&Utf8Path>,
    ) -> OmResult<Utf8PathBuf> {
        let raw = load_primary(image_path)?;
        let model = self
            .find(filter, raw.shape())
            .ok_or(OmPrepError::MissingModel {
                filter,
                height: raw.height,
                width: raw.width,
            })?;
        let corrected = divide_by_model(&raw, model);

        let out = match output {
            Some(path) => path.to_path_buf(),
            None => with_stage_suffix(image_path, STRAY_SUFFIX),
        };
        crate::fits_image::copy_with_plane(image_path, &out, 0, &corrected)?;
        stamp_correction_audit(&out)?;
        Ok(out)
    }
}

/// Elementwise division of a frame by its calibration model.
pub fn divide_by_model(raw: &SciImage, model: &[f32]) -> Vec<f32> {
    raw.pixels
        .iter()
        .zip(model.iter())
        .map(|(pixel, m)| pixel / m)
        .collect()
}

/// Stamp the three audit fields on the corrected file's primary header.
fn stamp_correction_audit(path: &Utf8Path) -> OmResult<()> {
    let stamp = Epoch::now()
        .map(|e| e.to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    let mut fptr = FitsFile::edit(path)?;
    let hdu = fptr.primary_hdu()?;
    hdu.write_key(&mut fptr, "CDATE", stamp)?;
    hdu.write_key(
        &mut fptr,
        "JHIST",
        "Image corrected with the stray-light model".to_string(),
    )?;
    crate::fits_image::write_logical_key(
        &mut fptr,
        path,
        "JCORR",
        true,
        "corrected with the stray-light model",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn division_is_elementwise() {
        let raw = SciImage {
            pixels: vec![2.0, 9.0, 8.0, 1.0],
            height: 2,
            width: 2,
        };
        let model = vec![2.0, 3.0, 4.0, 1.0];
        assert_eq!(divide_by_model(&raw, &model), vec![1.0, 3.0, 2.0, 1.0]);
    }

    #[test]
    fn division_by_fractional_model_values() {
        let raw = SciImage {
            pixels: vec![1.0, 1.0, 2.0],
            height: 1,
            width: 3,
        };
        let model = vec![3.0, 0.7, 1.3];
        let corrected = divide_by_model(&raw, &model);
        assert_relative_eq!(corrected[0], 1.0 / 3.0);
        assert_relative_eq!(corrected[1], 1.0 / 0.7);
        assert_relative_eq!(corrected[2], 2.0 / 1.3);
    }

    #[test]
    fn integer_frames_are_corrected_without_rounding() {
        use fitsio::images::{ImageDescription, ImageType};

        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        let image = root.join("P0722700101OMS413IMAGE_0000.FIT");

        // A 16-bit integer input frame; fractional division results must
        // survive in the corrected output.
        let description = ImageDescription {
            data_type: ImageType::Short,
            dimensions: &[2, 2],
        };
        let mut fptr = FitsFile::create(&image)
            .with_custom_primary(&description)
            .open()
            .unwrap();
        let hdu = fptr.primary_hdu().unwrap();
        hdu.write_image(&mut fptr, &[1.0f32, 9.0, 8.0, 1.0]).unwrap();
        drop(fptr);

        let mut models = StrayLightModels::default();
        models.insert(Filter::Uvw1, (2, 2), vec![2.0, 2.0, 5.0, 2.0]);

        let out = models.correct_image(&image, Filter::Uvw1, None).unwrap();
        let corrected = load_primary(&out).unwrap();
        assert_eq!(corrected.pixels, vec![0.5, 4.5, 1.6, 0.5]);

        let mut fptr = FitsFile::open(&out).unwrap();
        let hdu = fptr.primary_hdu().unwrap();
        let flag: String = hdu.read_key(&mut fptr, "JCORR").unwrap();
        assert_eq!(flag.trim(), "T");
    }

    #[test]
    fn lookup_requires_exact_filter_and_shape() {
        let mut models = StrayLightModels::default();
        models.insert(Filter::Uvw1, (10, 10), vec![1.0; 100]);

        assert!(models.find(Filter::Uvw1, (10, 10)).is_some());
        assert!(models.find(Filter::Uvm2, (10, 10)).is_none());
        assert!(models.find(Filter::Uvw1, (10, 20)).is_none());
    }
}
