//! Peak detection with saddle-point deblending.
//!
//! # Algorithm Overview
//!
//! 1. **Noise scale**: either the caller's per-pixel sigma mapped into the
//!    smoothed domain, or a MAD estimate measured on the smoothed image
//! 2. **Threshold**: keep pixels strictly above `plim * sigma`
//! 3. **Descending flood**: visit kept pixels from brightest to faintest
//!    (ties in row-major order), growing regions with a union-find over
//!    8-connected neighbours. A pixel with no visited neighbour is a local
//!    maximum and seeds a new region.
//! 4. **Saddle test**: when two regions first touch, the current pixel value is
//!    the saddle between them. If the fainter region's peak rises less than
//!    `saddle * peak` above it, that peak is absorbed; otherwise both survive.
//! 5. **Blob cap**: each connected blob keeps at most `maxper` of its brightest
//!    peaks.
//!
//! The visit order makes the tie-break explicit: of two equal neighbouring
//! pixels, the one earlier in row-major order is the maximum.
//!
//! Output peaks are listed in row-major order of their pixel. An empty list
//! is a normal outcome.

use std::cmp::Ordering;
use std::f64::consts::PI;

use shared::algo::robust_sigma;
use shared::image_size::ImageSize;

use super::image::Image;
use crate::error::{ExtractionError, Stage};
use crate::params::Parameters;

const UNVISITED: u32 = u32::MAX;

/// 8-connectivity neighbouring offsets
const NEIGHBORS: [(isize, isize); 8] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (-1, 0),
    (1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];

/// A local maximum in the smoothed image
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Peak {
    pub x: usize,
    pub y: usize,
    /// Smoothed height above the local sky at the peak
    pub value: f64,
    /// Index of the connected above-threshold blob holding this peak
    pub blob: usize,
}

/// Peaks plus the numbers that produced them
#[derive(Debug, Clone)]
pub struct PeakDetection {
    pub peaks: Vec<Peak>,
    /// Noise scale of the smoothed image
    pub sigma: f64,
    /// Detection level, `plim * sigma`
    pub threshold: f64,
    /// Number of connected above-threshold blobs
    pub n_blobs: usize,
}

/// Noise scale of the smoothed image.
///
/// A caller-supplied sigma describes per-pixel white noise in the input. A
/// normalised Gaussian of width `dpsf` reduces that by `2 sqrt(pi) dpsf`.
pub fn smoothed_noise_sigma(smoothed: &Image, params: &Parameters) -> Result<f64, ExtractionError> {
    if let Some(sigma) = params.sigma() {
        return Ok(sigma / (2.0 * PI.sqrt() * params.dpsf()));
    }

    let samples: Vec<f64> = smoothed.view().iter().copied().collect();
    robust_sigma(&samples)
        .map_err(|e| ExtractionError::invalid_image(Stage::PeakDetection, e.to_string()))
}

/// Region grown from one local maximum during the descending flood
struct Region {
    parent: u32,
    /// Linear index of the brightest pixel
    primary: usize,
    /// Surviving peaks (linear indices); only meaningful on roots
    peaks: Vec<usize>,
}

struct Flood<'a> {
    values: &'a [f64],
    size: ImageSize,
    saddle: f64,
    labels: Vec<u32>,
    regions: Vec<Region>,
}

impl<'a> Flood<'a> {
    fn new(values: &'a [f64], size: ImageSize, saddle: f64) -> Self {
        Self {
            values,
            size,
            saddle,
            labels: vec![UNVISITED; values.len()],
            regions: Vec::new(),
        }
    }

    /// Brightest first, then row-major
    fn brighter(&self, a: usize, b: usize) -> Ordering {
        self.values[b].total_cmp(&self.values[a]).then(a.cmp(&b))
    }

    fn find(&mut self, mut region: u32) -> u32 {
        while self.regions[region as usize].parent != region {
            let grandparent = self.regions[self.regions[region as usize].parent as usize].parent;
            self.regions[region as usize].parent = grandparent;
            region = grandparent;
        }
        region
    }

    fn visit(&mut self, idx: usize) {
        let x = (idx % self.size.width) as isize;
        let y = (idx / self.size.width) as isize;

        let mut roots: Vec<u32> = Vec::with_capacity(8);
        for (dx, dy) in NEIGHBORS {
            let (nx, ny) = (x + dx, y + dy);
            if !self.size.contains(nx, ny) {
                continue;
            }
            let label = self.labels[self.size.linear_index(nx as usize, ny as usize)];
            if label == UNVISITED {
                continue;
            }
            let root = self.find(label);
            if !roots.contains(&root) {
                roots.push(root);
            }
        }

        if roots.is_empty() {
            let id = self.regions.len() as u32;
            self.regions.push(Region {
                parent: id,
                primary: idx,
                peaks: vec![idx],
            });
            self.labels[idx] = id;
            return;
        }

        roots.sort_by(|&a, &b| {
            self.brighter(
                self.regions[a as usize].primary,
                self.regions[b as usize].primary,
            )
        });
        let keep = roots[0];
        let saddle_value = self.values[idx];

        for &other in &roots[1..] {
            let mut absorbed = std::mem::take(&mut self.regions[other as usize].peaks);
            let lower = self.regions[other as usize].primary;
            let lower_value = self.values[lower];
            if lower_value - saddle_value <= self.saddle * lower_value {
                absorbed.retain(|&p| p != lower);
            }
            self.regions[keep as usize].peaks.extend(absorbed);
            self.regions[other as usize].parent = keep;
        }

        self.labels[idx] = keep;
    }
}

/// Find peaks in a smoothed image.
///
/// Values are heights above the local sky: the threshold and the saddle test
/// both assume the background has been taken off.
pub fn detect_peaks(smoothed: &Image, params: &Parameters) -> Result<PeakDetection, ExtractionError> {
    let sigma = smoothed_noise_sigma(smoothed, params)?;
    let threshold = params.plim() * sigma;

    let values = smoothed.as_slice().ok_or_else(|| {
        ExtractionError::invalid_image(Stage::PeakDetection, "smoothed image is not contiguous")
    })?;
    let size = smoothed.size();
    let width = size.width;

    let mut flood = Flood::new(values, size, params.saddle());
    let mut order: Vec<usize> = (0..values.len())
        .filter(|&i| values[i] > threshold)
        .collect();
    order.sort_unstable_by(|&a, &b| flood.brighter(a, b));

    for &idx in &order {
        flood.visit(idx);
    }

    // Collect blobs, ordered by their primary peak's scan position
    let mut blob_roots: Vec<u32> = (0..flood.regions.len() as u32)
        .filter(|&r| flood.regions[r as usize].parent == r)
        .collect();
    blob_roots.sort_by_key(|&r| flood.regions[r as usize].primary);

    let maxper = params.maxper();
    let mut peaks = Vec::new();
    for (blob, &root) in blob_roots.iter().enumerate() {
        let mut blob_peaks = std::mem::take(&mut flood.regions[root as usize].peaks);
        if blob_peaks.len() > maxper {
            blob_peaks.sort_by(|&a, &b| flood.brighter(a, b));
            log::debug!(
                "Blob {} has {} peaks, keeping the brightest {}",
                blob,
                blob_peaks.len(),
                maxper
            );
            blob_peaks.truncate(maxper);
        }
        peaks.extend(blob_peaks.into_iter().map(|idx| Peak {
            x: idx % width,
            y: idx / width,
            value: values[idx],
            blob,
        }));
    }
    peaks.sort_by_key(|p| (p.y, p.x));

    log::debug!(
        "Peak detection: sigma {:.4}, threshold {:.4}, {} pixels above, {} blobs, {} peaks",
        sigma,
        threshold,
        order.len(),
        blob_roots.len(),
        peaks.len()
    );

    Ok(PeakDetection {
        peaks,
        sigma,
        threshold,
        n_blobs: blob_roots.len(),
    })
}
