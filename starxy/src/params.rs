//! Extraction parameters.
//!
//! [`Parameters`] is an immutable value built once through
//! [`ParametersBuilder`] and validated eagerly. Every pipeline stage receives
//! it by reference; nothing mutates it after `build()`.
//!
//! Overrides can come from a JSON file ([`ParameterOverrides`]) and from the
//! command line. Both are applied on top of the defaults through the builder,
//! so validation happens in exactly one place.
//!
//! # Defaults
//!
//! | field                 | default  |
//! |-----------------------|----------|
//! | `dpsf`                | 1.0      |
//! | `plim`                | 8.0      |
//! | `dlim`                | 1.0      |
//! | `saddle`              | 0.1      |
//! | `maxper`              | 1000     |
//! | `maxnpeaks`           | 100000   |
//! | `sigma`               | auto     |
//! | `subtract_background` | true     |
//! | `halfbox`             | 100      |
//! | `downsample`          | 1        |

use serde::{Deserialize, Serialize};
use shared::image_size::ImageSize;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::error::ExtractionError;

pub const DEFAULT_DPSF: f64 = 1.0;
pub const DEFAULT_PLIM: f64 = 8.0;
pub const DEFAULT_DLIM: f64 = 1.0;
pub const DEFAULT_SADDLE: f64 = 0.1;
pub const DEFAULT_MAXPER: usize = 1000;
pub const DEFAULT_MAXNPEAKS: usize = 100_000;
pub const DEFAULT_HALFBOX: usize = 100;

/// Validated extraction parameters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Parameters {
    dpsf: f64,
    plim: f64,
    dlim: f64,
    saddle: f64,
    maxper: usize,
    maxnpeaks: usize,
    sigma: Option<f64>,
    subtract_background: bool,
    halfbox: usize,
    downsample: usize,
}

impl Parameters {
    pub fn builder() -> ParametersBuilder {
        ParametersBuilder::default()
    }

    /// Gaussian PSF sigma in pixels
    pub fn dpsf(&self) -> f64 {
        self.dpsf
    }

    /// Detection threshold in units of the smoothed-image noise
    pub fn plim(&self) -> f64 {
        self.plim
    }

    /// Minimum separation between returned sources, in input pixels
    pub fn dlim(&self) -> f64 {
        self.dlim
    }

    /// Fractional saddle depth required to keep two maxima apart
    pub fn saddle(&self) -> f64 {
        self.saddle
    }

    /// Maximum peaks kept per connected blob
    pub fn maxper(&self) -> usize {
        self.maxper
    }

    /// Maximum number of sources returned by a run
    pub fn maxnpeaks(&self) -> usize {
        self.maxnpeaks
    }

    /// Per-pixel noise of the input image, if supplied by the caller
    pub fn sigma(&self) -> Option<f64> {
        self.sigma
    }

    pub fn subtract_background(&self) -> bool {
        self.subtract_background
    }

    /// Half-size of the background tiles in pixels
    pub fn halfbox(&self) -> usize {
        self.halfbox
    }

    /// Integer block-averaging factor applied before extraction
    pub fn downsample(&self) -> usize {
        self.downsample
    }

    /// Radius of the centroiding window, in working-image pixels
    pub fn centroid_radius(&self) -> usize {
        ((3.0 * self.dpsf).ceil() as usize).max(1)
    }

    /// Check the rules that depend on the image the parameters are applied to.
    pub fn check_against(&self, size: ImageSize) -> Result<(), ExtractionError> {
        let diagonal = size.diagonal();
        if self.dlim > diagonal {
            return Err(ExtractionError::invalid_parameter(
                "dlim",
                format!(
                    "{} exceeds the {} image diagonal of {:.2} pixels",
                    self.dlim, size, diagonal
                ),
            ));
        }
        Ok(())
    }
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            dpsf: DEFAULT_DPSF,
            plim: DEFAULT_PLIM,
            dlim: DEFAULT_DLIM,
            saddle: DEFAULT_SADDLE,
            maxper: DEFAULT_MAXPER,
            maxnpeaks: DEFAULT_MAXNPEAKS,
            sigma: None,
            subtract_background: true,
            halfbox: DEFAULT_HALFBOX,
            downsample: 1,
        }
    }
}

/// Builder for [`Parameters`]; starts from the defaults
#[derive(Debug, Clone, Default)]
pub struct ParametersBuilder {
    params: Parameters,
}

impl ParametersBuilder {
    pub fn dpsf(mut self, dpsf: f64) -> Self {
        self.params.dpsf = dpsf;
        self
    }

    pub fn plim(mut self, plim: f64) -> Self {
        self.params.plim = plim;
        self
    }

    pub fn dlim(mut self, dlim: f64) -> Self {
        self.params.dlim = dlim;
        self
    }

    pub fn saddle(mut self, saddle: f64) -> Self {
        self.params.saddle = saddle;
        self
    }

    pub fn maxper(mut self, maxper: usize) -> Self {
        self.params.maxper = maxper;
        self
    }

    pub fn maxnpeaks(mut self, maxnpeaks: usize) -> Self {
        self.params.maxnpeaks = maxnpeaks;
        self
    }

    /// Fix the input-image noise instead of estimating it
    pub fn sigma(mut self, sigma: f64) -> Self {
        self.params.sigma = Some(sigma);
        self
    }

    pub fn subtract_background(mut self, subtract: bool) -> Self {
        self.params.subtract_background = subtract;
        self
    }

    pub fn halfbox(mut self, halfbox: usize) -> Self {
        self.params.halfbox = halfbox;
        self
    }

    pub fn downsample(mut self, factor: usize) -> Self {
        self.params.downsample = factor;
        self
    }

    /// Apply every field that is set in `overrides`
    pub fn apply(mut self, overrides: &ParameterOverrides) -> Self {
        let p = &mut self.params;
        if let Some(v) = overrides.dpsf {
            p.dpsf = v;
        }
        if let Some(v) = overrides.plim {
            p.plim = v;
        }
        if let Some(v) = overrides.dlim {
            p.dlim = v;
        }
        if let Some(v) = overrides.saddle {
            p.saddle = v;
        }
        if let Some(v) = overrides.maxper {
            p.maxper = v;
        }
        if let Some(v) = overrides.maxnpeaks {
            p.maxnpeaks = v;
        }
        if let Some(v) = overrides.sigma {
            p.sigma = Some(v);
        }
        if let Some(v) = overrides.subtract_background {
            p.subtract_background = v;
        }
        if let Some(v) = overrides.halfbox {
            p.halfbox = v;
        }
        if let Some(v) = overrides.downsample {
            p.downsample = v;
        }
        self
    }

    pub fn build(self) -> Result<Parameters, ExtractionError> {
        let p = self.params;

        positive("dpsf", p.dpsf)?;
        positive("plim", p.plim)?;
        positive("dlim", p.dlim)?;
        if let Some(sigma) = p.sigma {
            positive("sigma", sigma)?;
        }
        if !(p.saddle > 0.0 && p.saddle < 1.0) {
            return Err(ExtractionError::invalid_parameter(
                "saddle",
                format!("must be a fraction in (0, 1), got {}", p.saddle),
            ));
        }
        at_least_one("maxper", p.maxper)?;
        at_least_one("maxnpeaks", p.maxnpeaks)?;
        at_least_one("halfbox", p.halfbox)?;
        at_least_one("downsample", p.downsample)?;

        Ok(p)
    }
}

fn positive(parameter: &'static str, value: f64) -> Result<(), ExtractionError> {
    // Also rejects NaN and infinity
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ExtractionError::invalid_parameter(
            parameter,
            format!("must be a positive finite number, got {value}"),
        ))
    }
}

fn at_least_one(parameter: &'static str, value: usize) -> Result<(), ExtractionError> {
    if value >= 1 {
        Ok(())
    } else {
        Err(ExtractionError::invalid_parameter(
            parameter,
            "must be at least 1, got 0",
        ))
    }
}

/// Errors loading a parameter file
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read parameter file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Malformed parameter file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Partial parameter set, as read from a JSON parameter file.
///
/// Unknown keys are rejected so that typos do not silently fall back to
/// defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ParameterOverrides {
    pub dpsf: Option<f64>,
    pub plim: Option<f64>,
    pub dlim: Option<f64>,
    pub saddle: Option<f64>,
    pub maxper: Option<usize>,
    pub maxnpeaks: Option<usize>,
    pub sigma: Option<f64>,
    pub subtract_background: Option<bool>,
    pub halfbox: Option<usize>,
    pub downsample: Option<usize>,
}

impl ParameterOverrides {
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    /// Layer `other` on top of `self`; fields set in `other` win
    pub fn merged_with(&self, other: &ParameterOverrides) -> ParameterOverrides {
        ParameterOverrides {
            dpsf: other.dpsf.or(self.dpsf),
            plim: other.plim.or(self.plim),
            dlim: other.dlim.or(self.dlim),
            saddle: other.saddle.or(self.saddle),
            maxper: other.maxper.or(self.maxper),
            maxnpeaks: other.maxnpeaks.or(self.maxnpeaks),
            sigma: other.sigma.or(self.sigma),
            subtract_background: other.subtract_background.or(self.subtract_background),
            halfbox: other.halfbox.or(self.halfbox),
            downsample: other.downsample.or(self.downsample),
        }
    }
}
