//! FITS image decoding
//!
//! Reads the primary HDU of a FITS file into an `Array2<f64>` of shape
//! `(NAXIS2, NAXIS1)`. Rows are kept in file order: array row `y` is FITS row
//! `y + 1`, so pixel coordinates derived from the array are 0-based FITS
//! coordinates. Integer data is converted to `f64` with BSCALE/BZERO applied by
//! the reader.

use fitsio::compat::fitsfile::FitsFile;
use fitsio::compat::images::{ImageDescription, ImageType, ReadImage, WriteImage};
use ndarray::Array2;
use std::path::Path;
use thiserror::Error;

/// Errors that can occur while decoding a FITS image
#[derive(Error, Debug)]
pub enum FitsError {
    #[error("FITS I/O error: {0}")]
    FitsIo(#[from] fitsio::compat::errors::Error),
    #[error("Primary HDU is not a 2D image (NAXIS = {0})")]
    NotAnImage(i64),
    #[error("Invalid image dimensions {width}x{height}")]
    InvalidDimensions { width: i64, height: i64 },
    #[error("Image data has {actual} samples, expected {expected}")]
    ShapeMismatch { expected: usize, actual: usize },
}

/// Read the primary image of a FITS file.
///
/// Only 2D primary arrays are accepted. A 3D cube whose third axis has length
/// 1 is treated as 2D.
///
/// # Usage
/// ```no_run
/// use shared::image_proc::fits::read_fits_image;
///
/// let frame = read_fits_image("exposure.fits").unwrap();
/// let (height, width) = frame.dim();
/// println!("{width}x{height}");
/// ```
pub fn read_fits_image<P: AsRef<Path>>(path: P) -> Result<Array2<f64>, FitsError> {
    let fptr = FitsFile::open(&path)?;
    let hdu = fptr.hdu(0)?;

    let naxis = hdu.read_key::<i64>(&fptr, "NAXIS")?;
    let flat_cube = naxis == 3 && hdu.read_key::<i64>(&fptr, "NAXIS3").unwrap_or(0) == 1;
    if naxis != 2 && !flat_cube {
        return Err(FitsError::NotAnImage(naxis));
    }

    let naxis1 = hdu.read_key::<i64>(&fptr, "NAXIS1")?;
    let naxis2 = hdu.read_key::<i64>(&fptr, "NAXIS2")?;
    if naxis1 <= 0 || naxis2 <= 0 {
        return Err(FitsError::InvalidDimensions {
            width: naxis1,
            height: naxis2,
        });
    }
    let (width, height) = (naxis1 as usize, naxis2 as usize);

    let data = f64::read_image(&fptr, &hdu)?;
    if data.len() != width * height {
        return Err(FitsError::ShapeMismatch {
            expected: width * height,
            actual: data.len(),
        });
    }

    log::debug!(
        "Decoded {} ({}x{}, {} samples)",
        path.as_ref().display(),
        width,
        height,
        data.len()
    );

    Array2::from_shape_vec((height, width), data).map_err(|_| FitsError::ShapeMismatch {
        expected: width * height,
        actual: 0,
    })
}

/// Write a 2D `f64` array as the primary image of a new FITS file.
///
/// Row order matches [`read_fits_image`], so a write/read pair returns the
/// same array. Overwrites any existing file at `path`.
pub fn write_fits_image<P: AsRef<Path>>(image: &Array2<f64>, path: P) -> Result<(), FitsError> {
    let (height, width) = image.dim();
    let image_description = ImageDescription {
        data_type: ImageType::Double,
        dimensions: vec![width, height],
    };

    let mut fptr = FitsFile::create(&path).overwrite().open()?;
    let hdu = fptr.create_image("PRIMARY", &image_description)?;
    let flat_data: Vec<f64> = image.iter().copied().collect();
    f64::write_image(&mut fptr, &hdu, &flat_data)?;

    Ok(())
}
