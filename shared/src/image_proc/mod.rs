//! Image utilities shared by the extraction pipeline and its tests.
//!
//! - **noise**: deterministic synthetic frames (Gaussian noise fields, Gaussian point sources)
//! - **fits**: decoding the primary image of a FITS file into an `Array2<f64>`

#[cfg(feature = "fits")]
pub mod fits;
pub mod noise;

#[cfg(feature = "fits")]
pub use fits::{read_fits_image, write_fits_image, FitsError};
pub use noise::{add_gaussian_source, simple_normal_array};
