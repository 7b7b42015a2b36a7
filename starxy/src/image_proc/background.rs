//! Background estimation for source extraction.
//!
//! The sky level is estimated on a coarse grid of tiles using sigma-clipped
//! medians, so stars inside a tile do not drag its level up. With more than
//! one tile the grid values are bilinearly interpolated between tile centres
//! to give a full-resolution surface. Interpolation is continuous everywhere,
//! so tile boundaries never introduce steps that could be picked up as
//! sources.
//!
//! With subtraction disabled the working image keeps its pixels, and later
//! stages measure heights against [`BackgroundEstimate::local_level`] instead.

use std::borrow::Cow;

use ndarray::{Array2, Zip};
use rayon::prelude::*;
use shared::algo::sigma_clipped_stats;

use super::image::Image;
use crate::error::{ExtractionError, Stage};
use crate::params::Parameters;

/// Clipping threshold, in sigma, for tile statistics
const TILE_CLIP_KAPPA: f64 = 3.0;
/// Clipping iterations per tile
const TILE_CLIP_ITERATIONS: usize = 3;

/// Estimated background level
#[derive(Debug, Clone, PartialEq)]
pub enum BackgroundModel {
    /// Single level for the whole image
    Uniform(f64),
    /// Per-pixel level, same shape as the image it was estimated from
    Surface(Array2<f64>),
}

impl BackgroundModel {
    /// Background level at pixel `(x, y)`
    pub fn level_at(&self, x: usize, y: usize) -> f64 {
        match self {
            BackgroundModel::Uniform(level) => *level,
            BackgroundModel::Surface(surface) => surface[[y, x]],
        }
    }

    /// Return a new image with this background removed.
    pub fn subtract_from(&self, image: &Image) -> Image {
        let view = image.view();
        let residual = match self {
            BackgroundModel::Uniform(level) => view.mapv(|v| v - level),
            BackgroundModel::Surface(surface) => &view - surface,
        };
        Image::from_stage(residual)
    }
}

/// Output of the background stage
#[derive(Debug, Clone)]
pub struct BackgroundEstimate {
    /// The level that was estimated, whether or not it was removed
    pub model: BackgroundModel,
    /// Image handed to the rest of the pipeline
    pub working: Image,
    /// True when `working` has had `model` subtracted
    pub subtracted: bool,
}

impl BackgroundEstimate {
    /// Sky level still present in `working` at pixel `(x, y)`
    pub fn local_level(&self, x: usize, y: usize) -> f64 {
        if self.subtracted {
            0.0
        } else {
            self.model.level_at(x, y)
        }
    }

    /// `image` expressed as height above the sky left in `working`.
    ///
    /// `image` must have the working image's shape.
    pub fn above_local<'a>(&self, image: &'a Image) -> Cow<'a, Image> {
        if self.subtracted {
            Cow::Borrowed(image)
        } else {
            Cow::Owned(self.model.subtract_from(image))
        }
    }
}

/// Tile layout over one image axis: `n` nearly equal spans.
struct TileAxis {
    bounds: Vec<(usize, usize)>,
    centers: Vec<f64>,
}

impl TileAxis {
    fn new(len: usize, tile_size: usize) -> Self {
        let n = ((len as f64 / tile_size as f64).round() as usize).clamp(1, len);
        let bounds: Vec<(usize, usize)> = (0..n).map(|i| (i * len / n, (i + 1) * len / n)).collect();
        let centers = bounds
            .iter()
            .map(|&(start, end)| (start + end - 1) as f64 / 2.0)
            .collect();
        Self { bounds, centers }
    }

    fn len(&self) -> usize {
        self.bounds.len()
    }

    /// Interpolation cell and weight of the upper neighbour for coordinate `p`.
    ///
    /// Coordinates outside the outermost centres are clamped to them.
    fn locate(&self, p: f64) -> (usize, usize, f64) {
        let last = self.centers.len() - 1;
        if last == 0 || p <= self.centers[0] {
            return (0, 0, 0.0);
        }
        if p >= self.centers[last] {
            return (last, last, 0.0);
        }
        let upper = self.centers.partition_point(|&c| c <= p);
        let lower = upper - 1;
        let t = (p - self.centers[lower]) / (self.centers[upper] - self.centers[lower]);
        (lower, upper, t)
    }
}

/// Estimate the image background and, if configured, subtract it.
///
/// # Errors
/// `InvalidImage` when a tile has no usable (non-NaN) samples.
pub fn estimate_background(
    image: &Image,
    params: &Parameters,
) -> Result<BackgroundEstimate, ExtractionError> {
    if !params.subtract_background() {
        let pixels: Vec<f64> = image.view().iter().copied().collect();
        let level = sigma_clipped_stats(&pixels, TILE_CLIP_KAPPA, TILE_CLIP_ITERATIONS)
            .map(|stats| stats.median)
            .map_err(|e| ExtractionError::invalid_image(Stage::Background, e.to_string()))?;
        log::debug!("Background subtraction disabled; global level {level:.4} kept in the image");
        return Ok(BackgroundEstimate {
            model: BackgroundModel::Uniform(level),
            working: image.clone(),
            subtracted: false,
        });
    }

    let model = tiled_background(image, params.halfbox())?;
    let working = model.subtract_from(image);
    Ok(BackgroundEstimate {
        model,
        working,
        subtracted: true,
    })
}

fn tiled_background(image: &Image, halfbox: usize) -> Result<BackgroundModel, ExtractionError> {
    let tile_size = 2 * halfbox;
    let x_axis = TileAxis::new(image.width(), tile_size);
    let y_axis = TileAxis::new(image.height(), tile_size);
    let tiles_x = x_axis.len();
    let tiles_y = y_axis.len();

    let view = image.view();
    let levels: Vec<f64> = (0..tiles_x * tiles_y)
        .into_par_iter()
        .map(|idx| {
            let (tx, ty) = (idx % tiles_x, idx / tiles_x);
            let (x0, x1) = x_axis.bounds[tx];
            let (y0, y1) = y_axis.bounds[ty];
            let tile: Vec<f64> = view
                .slice(ndarray::s![y0..y1, x0..x1])
                .iter()
                .copied()
                .collect();
            sigma_clipped_stats(&tile, TILE_CLIP_KAPPA, TILE_CLIP_ITERATIONS)
                .map(|stats| stats.median)
                .map_err(|e| {
                    ExtractionError::invalid_image(
                        Stage::Background,
                        format!("tile ({tx}, {ty}): {e}"),
                    )
                })
        })
        .collect::<Result<_, _>>()?;

    log::debug!(
        "Background grid {}x{} tiles of ~{} px",
        tiles_x,
        tiles_y,
        tile_size
    );

    if levels.len() == 1 {
        return Ok(BackgroundModel::Uniform(levels[0]));
    }

    let grid = Array2::from_shape_vec((tiles_y, tiles_x), levels)
        .map_err(|e| ExtractionError::invalid_image(Stage::Background, e.to_string()))?;

    let x_cells: Vec<(usize, usize, f64)> = (0..image.width())
        .map(|x| x_axis.locate(x as f64))
        .collect();
    let y_cells: Vec<(usize, usize, f64)> = (0..image.height())
        .map(|y| y_axis.locate(y as f64))
        .collect();

    let mut surface = Array2::<f64>::zeros((image.height(), image.width()));
    Zip::indexed(&mut surface).par_for_each(|(y, x), value| {
        let (x0, x1, tx) = x_cells[x];
        let (y0, y1, ty) = y_cells[y];
        let top = grid[[y0, x0]] * (1.0 - tx) + grid[[y0, x1]] * tx;
        let bottom = grid[[y1, x0]] * (1.0 - tx) + grid[[y1, x1]] * tx;
        *value = top * (1.0 - ty) + bottom * ty;
    });

    Ok(BackgroundModel::Surface(surface))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use shared::image_proc::noise::{add_gaussian_source, simple_normal_array};

    fn params(halfbox: usize, subtract: bool) -> Parameters {
        Parameters::builder()
            .halfbox(halfbox)
            .subtract_background(subtract)
            .build()
            .unwrap()
    }

    #[test]
    fn test_tile_axis_layout() {
        let axis = TileAxis::new(100, 32);
        assert_eq!(axis.len(), 3);
        assert_eq!(axis.bounds[0], (0, 33));
        assert_eq!(axis.bounds[2].1, 100);

        let single = TileAxis::new(10, 200);
        assert_eq!(single.len(), 1);
        assert_eq!(single.locate(7.0), (0, 0, 0.0));
    }

    #[test]
    fn test_uniform_sky_is_removed() {
        let mut sky = simple_normal_array((64, 64), 500.0, 5.0, 1);
        add_gaussian_source(&mut sky, 30.0, 30.0, 2000.0, 1.5);
        let image = Image::new(sky).unwrap();

        let estimate = estimate_background(&image, &params(100, true)).unwrap();
        assert!(estimate.subtracted);
        match &estimate.model {
            BackgroundModel::Uniform(level) => assert_relative_eq!(*level, 500.0, epsilon = 1.0),
            other => panic!("expected a uniform model, got {other:?}"),
        }
        assert_relative_eq!(
            estimate.working.get(5, 5).unwrap(),
            image.get(5, 5).unwrap() - estimate.model.level_at(5, 5),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_gradient_surface_has_no_steps() {
        // Sky rising 1 count per pixel left to right
        let sky = Array2::from_shape_fn((64, 128), |(_, x)| 100.0 + x as f64);
        let image = Image::new(sky).unwrap();

        let estimate = estimate_background(&image, &params(8, true)).unwrap();
        let surface = match &estimate.model {
            BackgroundModel::Surface(surface) => surface.clone(),
            other => panic!("expected a surface, got {other:?}"),
        };

        // Interior of the gradient is followed closely
        for x in 16..112 {
            assert_relative_eq!(surface[[32, x]], 100.0 + x as f64, epsilon = 1.0);
        }
        // No jumps between adjacent pixels bigger than the true slope allows
        for y in 0..64 {
            for x in 1..128 {
                assert!((surface[[y, x]] - surface[[y, x - 1]]).abs() <= 1.0 + 1e-9);
            }
        }
    }

    #[test]
    fn test_disabled_subtraction_keeps_pixels() {
        let image = Image::new(Array2::from_elem((8, 8), 42.0)).unwrap();
        let estimate = estimate_background(&image, &params(100, false)).unwrap();
        assert!(!estimate.subtracted);
        assert_eq!(estimate.working, image);
        assert_eq!(estimate.model, BackgroundModel::Uniform(42.0));
        assert_eq!(estimate.local_level(3, 3), 42.0);
    }

    #[test]
    fn test_heights_are_relative_to_remaining_sky() {
        let mut sky = simple_normal_array((48, 48), 500.0, 5.0, 3);
        add_gaussian_source(&mut sky, 20.0, 20.0, 300.0, 1.5);
        let image = Image::new(sky).unwrap();

        let kept = estimate_background(&image, &params(100, false)).unwrap();
        let removed = estimate_background(&image, &params(100, true)).unwrap();

        // Both modes agree on the level and on heights above it
        assert_eq!(kept.model, removed.model);
        assert_eq!(removed.local_level(20, 20), 0.0);
        let above_kept = kept.above_local(&kept.working);
        let above_removed = removed.above_local(&removed.working);
        assert!(matches!(above_removed, Cow::Borrowed(_)));
        assert_eq!(above_kept.view(), above_removed.view());
        assert_relative_eq!(above_kept.get(20, 20).unwrap(), 300.0, epsilon = 20.0);
    }

    #[test]
    fn test_all_nan_tile_is_invalid_image() {
        let image = Image::new(Array2::from_elem((4, 4), f64::NAN)).unwrap();
        let err = estimate_background(&image, &params(100, true)).unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Background));
    }
}
