//! Owned, immutable image buffer used between pipeline stages.

use ndarray::{Array2, ArrayView2, Zip};
use shared::image_size::ImageSize;

use crate::error::{ExtractionError, Stage};

/// A `width x height` grid of `f64` samples, indexed `[[y, x]]`.
///
/// Constructors reject empty images, so every `Image` has at least one
/// pixel. Stages never modify an `Image`; they produce a new one.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    data: Array2<f64>,
}

impl Image {
    /// Wrap a decoded `(height, width)` array.
    pub fn new(data: Array2<f64>) -> Result<Self, ExtractionError> {
        let size = ImageSize::of_array(&data);
        if size.is_empty() {
            return Err(ExtractionError::invalid_image(
                Stage::Input,
                format!("image must have positive dimensions, got {size}"),
            ));
        }
        Ok(Self { data })
    }

    /// Build an image from a row-major sample buffer.
    pub fn from_vec(width: usize, height: usize, samples: Vec<f64>) -> Result<Self, ExtractionError> {
        if samples.is_empty() {
            return Err(ExtractionError::invalid_image(
                Stage::Input,
                "pixel buffer is empty",
            ));
        }
        let size = ImageSize::from_width_height(width, height);
        if samples.len() != size.pixel_count() {
            return Err(ExtractionError::invalid_image(
                Stage::Input,
                format!(
                    "buffer holds {} samples but {} needs {}",
                    samples.len(),
                    size,
                    size.pixel_count()
                ),
            ));
        }
        let data = Array2::from_shape_vec((height, width), samples)
            .map_err(|e| ExtractionError::invalid_image(Stage::Input, e.to_string()))?;
        Self::new(data)
    }

    /// Stage outputs are derived from a valid image and keep its shape.
    pub(crate) fn from_stage(data: Array2<f64>) -> Self {
        debug_assert!(!ImageSize::of_array(&data).is_empty());
        Self { data }
    }

    pub fn size(&self) -> ImageSize {
        ImageSize::of_array(&self.data)
    }

    pub fn width(&self) -> usize {
        self.data.ncols()
    }

    pub fn height(&self) -> usize {
        self.data.nrows()
    }

    /// Sample at `(x, y)`, or `None` outside the image
    pub fn get(&self, x: usize, y: usize) -> Option<f64> {
        self.data.get([y, x]).copied()
    }

    pub fn view(&self) -> ArrayView2<'_, f64> {
        self.data.view()
    }

    /// Row-major samples, contiguous when the image was built by this crate
    pub fn as_slice(&self) -> Option<&[f64]> {
        self.data.as_slice()
    }

    /// Block-average by an integer factor.
    ///
    /// The output is `ceil(width / factor) x ceil(height / factor)`. Blocks that
    /// hang over the right or bottom edge average only the pixels they cover.
    /// A factor of 1 returns a copy.
    pub fn downsample(&self, factor: usize) -> Image {
        if factor <= 1 {
            return self.clone();
        }

        let out_w = self.width().div_ceil(factor);
        let out_h = self.height().div_ceil(factor);
        let mut out = Array2::<f64>::zeros((out_h, out_w));

        Zip::indexed(&mut out).par_for_each(|(oy, ox), value| {
            let y0 = oy * factor;
            let x0 = ox * factor;
            let y1 = (y0 + factor).min(self.height());
            let x1 = (x0 + factor).min(self.width());

            let block = self.data.slice(ndarray::s![y0..y1, x0..x1]);
            *value = block.sum() / block.len() as f64;
        });

        Image::from_stage(out)
    }
}
