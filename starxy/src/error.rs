//! Error types for the extraction pipeline

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Pipeline stage, used to tag errors and log lines with where they came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Stage {
    /// Validating the caller's image and parameters before any work
    Input,
    /// Optional block-average downsampling
    Downsample,
    /// Background estimation and subtraction
    Background,
    /// Gaussian PSF smoothing
    Smoothing,
    /// Thresholding, local maxima and saddle separation
    PeakDetection,
    /// Sub-pixel centroid refinement
    Centroiding,
    /// Minimum-separation filtering and the global source cap
    Deduplication,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Input => "input validation",
            Stage::Downsample => "downsampling",
            Stage::Background => "background estimation",
            Stage::Smoothing => "PSF smoothing",
            Stage::PeakDetection => "peak detection",
            Stage::Centroiding => "centroid refinement",
            Stage::Deduplication => "deduplication",
        };
        f.write_str(name)
    }
}

/// Errors that abort an extraction run
///
/// None of these are recoverable inside the pipeline. A run that finds no
/// sources is not an error.
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("Invalid image during {stage}: {reason}")]
    InvalidImage { stage: Stage, reason: String },

    #[error("Invalid parameter '{parameter}': {reason}")]
    InvalidParameters {
        parameter: &'static str,
        reason: String,
    },

    #[error("Failed to decode image {}: {reason}", .path.display())]
    DecodeFailure { path: PathBuf, reason: String },
}

impl ExtractionError {
    pub(crate) fn invalid_image(stage: Stage, reason: impl Into<String>) -> Self {
        Self::InvalidImage {
            stage,
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_parameter(parameter: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidParameters {
            parameter,
            reason: reason.into(),
        }
    }

    /// The stage that raised the error, when it came from inside a run
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::InvalidImage { stage, .. } => Some(*stage),
            Self::InvalidParameters { .. } => Some(Stage::Input),
            Self::DecodeFailure { .. } => None,
        }
    }
}
