//! Image processing stages of the extraction pipeline
//!
//! Each stage takes an [`Image`] and returns new data; none modify their
//! input. The stages run in this order:
//!
//! 1. [`background`] - tiled sky estimate and subtraction
//! 2. [`smoothing`] - Gaussian matched filter at the PSF width
//! 3. [`peaks`] - thresholding and saddle-separated local maxima
//! 4. [`centroid`] - sub-pixel refinement on the subtracted image
//! 5. [`dedup`] - minimum separation and the global cap

pub mod background;
pub mod centroid;
pub mod dedup;
pub mod image;
pub mod peaks;
pub mod smoothing;

pub use background::{estimate_background, BackgroundEstimate, BackgroundModel};
pub use centroid::{refine_centroid, refine_centroids, Source};
pub use dedup::deduplicate;
pub use image::Image;
pub use peaks::{detect_peaks, smoothed_noise_sigma, Peak, PeakDetection};
pub use smoothing::{gaussian_kernel_1d, gaussian_smooth};
