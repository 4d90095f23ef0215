//! # FITS primary-plane access
//!
//! Thin wrappers over `fitsio` for the handful of image operations the
//! pipeline owns: loading a 2-D plane as `f32`, reading the `FILTER`
//! keyword from whichever HDU carries it, and rewriting a plane inside a
//! copied file so that every other structural part of the original is
//! preserved untouched.
//!
//! All stages read and write exclusively through this module; the science
//! products themselves (OM sky images, mosaics, segmentation maps) are
//! produced by the external SAS and SExtractor binaries.

use std::ffi::CString;
use std::os::raw::{c_int, c_long};

use camino::{Utf8Path, Utf8PathBuf};
use fitsio::hdu::HduInfo;
use fitsio::images::ImageType;
use fitsio::{sys, FitsFile};

use crate::constants::OmResult;
use crate::errors::OmPrepError;
use crate::naming::Filter;

/// HDUs scanned when looking for a header keyword.
const MAX_HDU_SCAN: usize = 8;

/// FITS BITPIX value of a 32-bit float image.
const FLOAT_IMG: c_int = -32;

/// One 2-D image plane in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct SciImage {
    /// Pixel values, `height * width` long.
    pub pixels: Vec<f32>,
    /// Rows of the plane (FITS `NAXIS2`).
    pub height: usize,
    /// Columns of the plane (FITS `NAXIS1`).
    pub width: usize,
}

impl SciImage {
    pub fn shape(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    /// Replace every non-finite pixel with zero, in place.
    pub fn nan_to_zero(&mut self) {
        for p in self.pixels.iter_mut() {
            if !p.is_finite() {
                *p = 0.0;
            }
        }
    }
}

/// Convert a `glob` result into a UTF-8 path.
pub fn utf8_path(path: std::path::PathBuf) -> OmResult<Utf8PathBuf> {
    Utf8PathBuf::from_path_buf(path)
        .map_err(|p| OmPrepError::NonUtf8Path(p.to_string_lossy().into_owned()))
}

/// 2-D shape of an image HDU, if it has one.
fn image_shape(info: &HduInfo) -> Option<(usize, usize)> {
    match info {
        HduInfo::ImageInfo { shape, .. } if shape.len() == 2 => Some((shape[0], shape[1])),
        _ => None,
    }
}

/// Load the primary image plane of `path` as `f32`.
///
/// Return
/// ------
/// * The [`SciImage`] of HDU 0, or [`OmPrepError::EmptyImage`] when the
///   primary HDU carries no 2-D data.
pub fn load_primary(path: &Utf8Path) -> OmResult<SciImage> {
    let mut fptr = FitsFile::open(path)?;
    let hdu = fptr.primary_hdu()?;
    let (height, width) =
        image_shape(&hdu.info).ok_or_else(|| OmPrepError::EmptyImage(path.to_string()))?;
    let pixels: Vec<f32> = hdu.read_image(&mut fptr)?;
    Ok(SciImage {
        pixels,
        height,
        width,
    })
}

/// Load an image plane, trying the preferred HDU first and falling back
/// to the other of {0, 1} when the preferred one carries no data.
///
/// OM products are inconsistent here: some carry the science plane in the
/// primary HDU, others leave the primary empty and store it in extension
/// 1 (and SExtractor segmentation maps do the opposite).
///
/// Arguments
/// ---------
/// * `path`: the FITS file to read.
/// * `preferred`: HDU index tried first (0 or 1).
///
/// Return
/// ------
/// * The plane and the index of the HDU it was actually read from.
pub fn load_plane_with_fallback(
    path: &Utf8Path,
    preferred: usize,
) -> OmResult<(SciImage, usize)> {
    let mut fptr = FitsFile::open(path)?;
    let fallback = if preferred == 0 { 1 } else { 0 };
    for index in [preferred, fallback] {
        let Ok(hdu) = fptr.hdu(index) else {
            continue;
        };
        if let Some((height, width)) = image_shape(&hdu.info) {
            let pixels: Vec<f32> = hdu.read_image(&mut fptr)?;
            return Ok((
                SciImage {
                    pixels,
                    height,
                    width,
                },
                index,
            ));
        }
    }
    Err(OmPrepError::EmptyImage(path.to_string()))
}

/// Read the `FILTER` keyword, scanning HDUs in order until one has it.
///
/// The filter of an exposure is recorded in image metadata, not in the
/// file name; depending on the product it may sit in the primary header
/// or in an extension.
pub fn filter_from_header(path: &Utf8Path) -> OmResult<Option<Filter>> {
    let mut fptr = FitsFile::open(path)?;
    for index in 0..MAX_HDU_SCAN {
        let Ok(hdu) = fptr.hdu(index) else {
            break;
        };
        if let Ok(value) = hdu.read_key::<String>(&mut fptr, "FILTER") {
            return Ok(Filter::from_header_value(&value));
        }
    }
    Ok(None)
}

/// `FILTER` keyword of the primary header only.
pub fn filter_from_primary(path: &Utf8Path) -> OmResult<Option<Filter>> {
    let mut fptr = FitsFile::open(path)?;
    let hdu = fptr.primary_hdu()?;
    match hdu.read_key::<String>(&mut fptr, "FILTER") {
        Ok(value) => Ok(Filter::from_header_value(&value)),
        Err(_) => Ok(None),
    }
}

/// Copy `src` to `dst` and overwrite one image plane of the copy.
///
/// The copy preserves every other HDU and the full header set of the
/// original file; only the pixel values of HDU `hdu_index` are replaced.
/// The plane must keep its original dimensions. The target HDU is forced
/// to a 32-bit float plane first, so fractional values are never rounded
/// back to an integer BITPIX inherited from the original.
pub fn copy_with_plane(
    src: &Utf8Path,
    dst: &Utf8Path,
    hdu_index: usize,
    pixels: &[f32],
) -> OmResult<()> {
    if dst.exists() {
        std::fs::remove_file(dst)?;
    }
    std::fs::copy(src, dst)?;
    let mut fptr = FitsFile::edit(dst)?;
    force_float_plane(&mut fptr, hdu_index, dst)?;
    let hdu = fptr.hdu(hdu_index)?;
    hdu.write_image(&mut fptr, pixels)?;
    Ok(())
}

/// Rewrite the BITPIX of an image HDU to 32-bit float, in place.
///
/// All other header keywords and the plane dimensions are preserved.
/// The safe `fitsio` wrapper can resize an image but not retype it, so
/// the conversion goes through the raw cfitsio interface.
fn force_float_plane(fptr: &mut FitsFile, hdu_index: usize, path: &Utf8Path) -> OmResult<()> {
    let hdu = fptr.hdu(hdu_index)?;
    if matches!(
        &hdu.info,
        HduInfo::ImageInfo {
            image_type: ImageType::Float | ImageType::Double,
            ..
        }
    ) {
        return Ok(());
    }
    let (height, width) =
        image_shape(&hdu.info).ok_or_else(|| OmPrepError::EmptyImage(path.to_string()))?;

    // cfitsio wants the axes in NAXIS order and a 1-based HDU number.
    let mut naxes = [width as c_long, height as c_long];
    let mut hdu_type: c_int = 0;
    let mut status: c_int = 0;
    unsafe {
        let ptr = fptr.as_raw();
        sys::ffmahd(ptr, (hdu_index + 1) as c_int, &mut hdu_type, &mut status);
        sys::ffrsim(ptr, FLOAT_IMG, 2, naxes.as_mut_ptr(), &mut status);
    }
    cfitsio_status(path, status)
}

/// Write a FITS logical keyword (`T`/`F`) to the primary header.
///
/// `fitsio` exposes no boolean keyword type, so the card is written
/// through the raw interface.
pub fn write_logical_key(
    fptr: &mut FitsFile,
    path: &Utf8Path,
    key: &str,
    value: bool,
    comment: &str,
) -> OmResult<()> {
    let key_c = CString::new(key)
        .map_err(|_| OmPrepError::Config(format!("invalid FITS keyword: {key}")))?;
    let comment_c = CString::new(comment)
        .map_err(|_| OmPrepError::Config(format!("invalid FITS comment for {key}")))?;

    let mut hdu_type: c_int = 0;
    let mut status: c_int = 0;
    unsafe {
        let ptr = fptr.as_raw();
        sys::ffmahd(ptr, 1, &mut hdu_type, &mut status);
        sys::ffpkyl(
            ptr,
            key_c.as_ptr(),
            value as c_int,
            comment_c.as_ptr(),
            &mut status,
        );
    }
    cfitsio_status(path, status)
}

fn cfitsio_status(path: &Utf8Path, status: c_int) -> OmResult<()> {
    if status == 0 {
        Ok(())
    } else {
        Err(OmPrepError::CfitsioStatus {
            path: path.to_string(),
            status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nan_to_zero_only_touches_non_finite_pixels() {
        let mut img = SciImage {
            pixels: vec![1.0, f32::NAN, -2.5, f32::INFINITY, f32::NEG_INFINITY, 0.0],
            height: 2,
            width: 3,
        };
        img.nan_to_zero();
        assert_eq!(img.pixels, vec![1.0, 0.0, -2.5, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn copied_plane_is_promoted_to_float() {
        use fitsio::images::{ImageDescription, ImageType};

        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        let src = root.join("int_frame.FIT");
        let dst = root.join("int_frame_out.FIT");

        let description = ImageDescription {
            data_type: ImageType::Short,
            dimensions: &[2, 2],
        };
        let mut fptr = FitsFile::create(&src)
            .with_custom_primary(&description)
            .open()
            .unwrap();
        let hdu = fptr.primary_hdu().unwrap();
        hdu.write_image(&mut fptr, &[2.0f32, 9.0, 8.0, 1.0]).unwrap();
        drop(fptr);

        // The source BITPIX is integer; the rewritten plane must keep its
        // fractional and negative values exactly.
        copy_with_plane(&src, &dst, 0, &[0.5, 4.5, 1.25, -0.75]).unwrap();

        let out = load_primary(&dst).unwrap();
        assert_eq!(out.pixels, vec![0.5, 4.5, 1.25, -0.75]);
    }

    #[test]
    fn only_two_dimensional_shapes_are_accepted() {
        let info = HduInfo::ImageInfo {
            shape: vec![10, 20],
            image_type: fitsio::images::ImageType::Float,
        };
        assert_eq!(image_shape(&info), Some((10, 20)));

        let cube = HduInfo::ImageInfo {
            shape: vec![2, 10, 20],
            image_type: fitsio::images::ImageType::Float,
        };
        assert_eq!(image_shape(&cube), None);
    }
}
