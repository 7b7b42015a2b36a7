//! Synthetic frame generation for testing source extraction.
//!
//! Provides two primitives that together build realistic test frames:
//! - Gaussian noise fields with a fixed seed, so assertions are reproducible
//! - Additive 2D Gaussian point sources at sub-pixel positions
//!
//! # Usage
//!
//! Start from `simple_normal_array` for a sky background with read noise,
//! then stamp stars onto it with `add_gaussian_source`.

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

/// Generate a 2D array of normally distributed values for testing purposes.
///
/// This function creates a deterministic array filled with values sampled from
/// a normal (Gaussian) distribution. The same seed always produces the same field.
///
/// # Arguments
/// * `size` - Tuple of (height, width) for the output array dimensions
/// * `mean` - Mean value of the normal distribution
/// * `std_dev` - Standard deviation of the normal distribution
/// * `seed` - Random seed for deterministic output
///
/// # Returns
/// A 2D array with values sampled from Normal(mean, std_dev)
///
/// # Panics
/// If `std_dev` is negative or not finite.
///
/// # Example
/// ```
/// use shared::image_proc::noise::simple_normal_array;
///
/// let noise = simple_normal_array((10, 10), 100.0, 10.0, 42);
/// assert_eq!(noise.dim(), (10, 10));
/// ```
pub fn simple_normal_array(
    size: (usize, usize),
    mean: f64,
    std_dev: f64,
    seed: u64,
) -> Array2<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let normal_dist = Normal::new(mean, std_dev).expect("std_dev must be finite and non-negative");
    Array2::from_shape_fn(size, |_| normal_dist.sample(&mut rng))
}

/// Add a circular 2D Gaussian point source to an image.
///
/// The profile `amplitude * exp(-r^2 / (2 sigma^2))` is evaluated at pixel
/// centres within `±5 sigma` of `(center_x, center_y)` and added to the
/// existing pixel values, so overlapping sources accumulate. Pixels outside
/// the image are skipped.
///
/// The integrated flux of the stamped source is close to
/// `2 pi sigma^2 amplitude` when it sits well inside the frame.
pub fn add_gaussian_source(
    image: &mut Array2<f64>,
    center_x: f64,
    center_y: f64,
    amplitude: f64,
    sigma: f64,
) {
    let (height, width) = image.dim();
    if height == 0 || width == 0 {
        return;
    }

    let reach = 5.0 * sigma;
    let x_min = (center_x - reach).floor().max(0.0) as usize;
    let y_min = (center_y - reach).floor().max(0.0) as usize;
    let x_max = (center_x + reach).ceil().min(width as f64 - 1.0);
    let y_max = (center_y + reach).ceil().min(height as f64 - 1.0);
    if x_max < 0.0 || y_max < 0.0 {
        return;
    }
    let (x_max, y_max) = (x_max as usize, y_max as usize);

    let two_sigma_sq = 2.0 * sigma * sigma;
    for y in y_min..=y_max {
        for x in x_min..=x_max {
            let dx = x as f64 - center_x;
            let dy = y as f64 - center_y;
            image[[y, x]] += amplitude * (-(dx * dx + dy * dy) / two_sigma_sq).exp();
        }
    }
}
