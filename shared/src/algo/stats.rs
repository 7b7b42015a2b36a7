//! Robust statistics for background and noise estimation
//!
//! Astronomical frames are dominated by sky background with a small fraction of
//! bright pixels from stars, hot pixels and cosmic rays. Plain means and standard
//! deviations are pulled around by those outliers, so everything here is built on
//! the median and the median absolute deviation (MAD).

use thiserror::Error;

/// Scale factor converting a MAD into the equivalent Gaussian standard deviation.
pub const MAD_TO_SIGMA: f64 = 1.4826;

/// Errors from statistics over sample sets
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StatsError {
    #[error("Insufficient data points: {total} total values, 0 valid (all NaN)")]
    NoValidSamples { total: usize },
}

/// Summary of a sigma-clipped sample set
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClippedStats {
    /// Median of the samples that survived clipping
    pub median: f64,
    /// MAD-derived standard deviation of the surviving samples
    pub sigma: f64,
    /// Number of samples that survived clipping
    pub n_used: usize,
}

fn finite_samples(values: &[f64]) -> Result<Vec<f64>, StatsError> {
    let valid: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    if valid.is_empty() {
        return Err(StatsError::NoValidSamples {
            total: values.len(),
        });
    }
    Ok(valid)
}

/// Median of a non-empty buffer, reordering it in place.
///
/// Uses selection rather than a full sort. For even lengths the two middle
/// values are averaged.
fn median_in_place(values: &mut [f64]) -> f64 {
    let n = values.len();
    let mid = n / 2;
    let (lower, upper_mid, _) = values.select_nth_unstable_by(mid, |a, b| a.total_cmp(b));
    let upper_mid = *upper_mid;

    if n % 2 == 0 {
        let lower_mid = lower
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max);
        (lower_mid + upper_mid) / 2.0
    } else {
        upper_mid
    }
}

/// Calculate median of a slice of f64 values
///
/// NaN values are ignored; infinities are kept. For even-length data the
/// average of the two middle values is returned.
///
/// # Arguments
///
/// * `values` - Slice of f64 values to compute median from
///
/// # Returns
///
/// * `Ok(median)` - The median value
/// * `Err(StatsError::NoValidSamples)` - If no valid values remain after filtering NaN
pub fn median(values: &[f64]) -> Result<f64, StatsError> {
    let mut valid = finite_samples(values)?;
    Ok(median_in_place(&mut valid))
}

/// Gaussian-equivalent standard deviation from the median absolute deviation.
///
/// Returns `MAD_TO_SIGMA * median(|v - median(v)|)`. A constant sample set
/// gives exactly zero.
pub fn robust_sigma(values: &[f64]) -> Result<f64, StatsError> {
    let mut valid = finite_samples(values)?;
    let center = median_in_place(&mut valid);
    Ok(mad_sigma_about(&mut valid, center))
}

fn mad_sigma_about(values: &mut [f64], center: f64) -> f64 {
    for v in values.iter_mut() {
        *v = (*v - center).abs();
    }
    MAD_TO_SIGMA * median_in_place(values)
}

/// Iteratively clipped median and sigma.
///
/// Each iteration computes the median and MAD sigma of the current sample set
/// and discards samples further than `kappa * sigma` from the median. Stops
/// after `max_iterations`, when nothing was clipped, or when sigma collapses
/// to zero.
pub fn sigma_clipped_stats(
    values: &[f64],
    kappa: f64,
    max_iterations: usize,
) -> Result<ClippedStats, StatsError> {
    let mut current = finite_samples(values)?;
    let mut scratch = Vec::with_capacity(current.len());

    let mut center = median_in_place(&mut current);
    scratch.clear();
    scratch.extend_from_slice(&current);
    let mut sigma = mad_sigma_about(&mut scratch, center);

    for _ in 0..max_iterations {
        if sigma <= 0.0 {
            break;
        }

        let before = current.len();
        let limit = kappa * sigma;
        current.retain(|v| (v - center).abs() <= limit);

        if current.len() == before || current.is_empty() {
            break;
        }

        center = median_in_place(&mut current);
        scratch.clear();
        scratch.extend_from_slice(&current);
        sigma = mad_sigma_about(&mut scratch, center);
    }

    Ok(ClippedStats {
        median: center,
        sigma,
        n_used: current.len(),
    })
}
