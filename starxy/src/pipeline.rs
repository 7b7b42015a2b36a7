//! Source extraction pipeline
//!
//! The run is an explicit state machine. Each state owns exactly the data the
//! next transition needs, and [`SourceExtractor::step`] moves it forward by
//! one stage:
//!
//! ```text
//! Idle -> BackgroundEstimated -> Smoothed -> PeaksDetected
//!      -> Centroided -> Deduplicated -> Done
//! ```
//!
//! Stages cannot be skipped or reordered, and a failed transition aborts the
//! run with the error of the stage that raised it. Stepping `Done` returns it
//! unchanged.
//!
//! When `downsample > 1` the first transition block-averages the input, and
//! every stage up to centroiding works in downsampled pixels (including
//! `dpsf`). Centroids are mapped back to input pixels before deduplication, so
//! `dlim` and the reported positions are always in input pixels.
//!
//! With background subtraction disabled the working pixels keep their sky,
//! but detection and centroiding still measure heights above the estimated
//! level, so both modes find the same sources.

use std::time::Instant;

use serde::Serialize;
use shared::image_size::ImageSize;

use crate::error::{ExtractionError, Stage};
use crate::image_proc::background::{estimate_background, BackgroundEstimate, BackgroundModel};
use crate::image_proc::centroid::{refine_centroids, Source};
use crate::image_proc::dedup::deduplicate;
use crate::image_proc::image::Image;
use crate::image_proc::peaks::{detect_peaks, PeakDetection};
use crate::image_proc::smoothing::gaussian_smooth;
use crate::params::Parameters;

/// Numbers describing how a run went, independent of the sources themselves
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostics {
    /// Size of the image handed to the run
    pub image_size: ImageSize,
    /// Size after downsampling
    pub working_size: ImageSize,
    /// Whether the background model was removed from the working image
    pub background_subtracted: bool,
    /// Noise scale of the smoothed image
    pub sigma: f64,
    /// Detection level on the smoothed image
    pub threshold: f64,
    /// Peaks surviving saddle separation and the per-blob cap
    pub n_peaks: usize,
    /// Sources with a valid centroid, before deduplication
    pub n_candidates: usize,
}

/// Result of a completed run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Extraction {
    /// Sources in detection (row-major) order
    pub sources: Vec<Source>,
    pub diagnostics: Diagnostics,
}

/// Coarse result of a run, for callers that only branch on success
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    SourcesFound(usize),
    NoSourcesFound,
}

impl Extraction {
    pub fn outcome(&self) -> Outcome {
        match self.sources.len() {
            0 => Outcome::NoSourcesFound,
            n => Outcome::SourcesFound(n),
        }
    }
}

/// Geometry carried through the run
#[derive(Debug, Clone, Copy)]
pub struct RunGeometry {
    pub image_size: ImageSize,
    pub working_size: ImageSize,
    /// Block-averaging factor between input and working pixels
    pub factor: usize,
}

impl RunGeometry {
    /// Map a working-image source back to input pixels.
    ///
    /// Working pixel `i` covers input pixels `i*S .. i*S + S - 1`, so its
    /// centre sits at `(i + 0.5) * S - 0.5`. Block averaging divides flux by
    /// `S^2`, which is undone here.
    fn to_input_pixels(&self, source: Source) -> Source {
        if self.factor <= 1 {
            return source;
        }
        let s = self.factor as f64;
        Source {
            x: (source.x + 0.5) * s - 0.5,
            y: (source.y + 0.5) * s - 0.5,
            flux: source.flux * s * s,
            background: source.background,
        }
    }
}

/// Pipeline states, from an untouched input to the finished extraction
#[derive(Debug, Clone)]
pub enum PipelineState<'a> {
    /// Validated input, nothing computed yet
    Idle { image: &'a Image },
    BackgroundEstimated {
        geometry: RunGeometry,
        background: BackgroundEstimate,
    },
    Smoothed {
        geometry: RunGeometry,
        background: BackgroundEstimate,
        smoothed: Image,
    },
    PeaksDetected {
        geometry: RunGeometry,
        background: BackgroundEstimate,
        detection: PeakDetection,
    },
    /// Refined sources in input pixels, before separation filtering
    Centroided {
        diagnostics: Diagnostics,
        candidates: Vec<Source>,
    },
    Deduplicated {
        diagnostics: Diagnostics,
        sources: Vec<Source>,
    },
    Done(Extraction),
}

impl PipelineState<'_> {
    pub fn name(&self) -> &'static str {
        match self {
            PipelineState::Idle { .. } => "Idle",
            PipelineState::BackgroundEstimated { .. } => "BackgroundEstimated",
            PipelineState::Smoothed { .. } => "Smoothed",
            PipelineState::PeaksDetected { .. } => "PeaksDetected",
            PipelineState::Centroided { .. } => "Centroided",
            PipelineState::Deduplicated { .. } => "Deduplicated",
            PipelineState::Done(_) => "Done",
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, PipelineState::Done(_))
    }
}

/// Runs the extraction pipeline with a fixed set of parameters.
#[derive(Debug, Clone, Default)]
pub struct SourceExtractor {
    params: Parameters,
}

impl SourceExtractor {
    pub fn new(params: Parameters) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &Parameters {
        &self.params
    }

    /// Check the parameters against `image` and enter the `Idle` state.
    pub fn start<'a>(&self, image: &'a Image) -> Result<PipelineState<'a>, ExtractionError> {
        self.params.check_against(image.size())?;
        Ok(PipelineState::Idle { image })
    }

    /// Advance one stage.
    pub fn step<'a>(&self, state: PipelineState<'a>) -> Result<PipelineState<'a>, ExtractionError> {
        let params = &self.params;
        let next = match state {
            PipelineState::Idle { image } => {
                let factor = params.downsample();
                let downsampled = (factor > 1).then(|| image.downsample(factor));
                let working_input = downsampled.as_ref().unwrap_or(image);
                if factor > 1 {
                    log::debug!(
                        "{}: {} -> {} (factor {})",
                        Stage::Downsample,
                        image.size(),
                        working_input.size(),
                        factor
                    );
                }

                let geometry = RunGeometry {
                    image_size: image.size(),
                    working_size: working_input.size(),
                    factor,
                };
                let background = estimate_background(working_input, params)?;
                log::debug!(
                    "{}: {} model, subtracted: {}",
                    Stage::Background,
                    match background.model {
                        BackgroundModel::Uniform(_) => "uniform",
                        BackgroundModel::Surface(_) => "surface",
                    },
                    background.subtracted
                );
                PipelineState::BackgroundEstimated {
                    geometry,
                    background,
                }
            }

            PipelineState::BackgroundEstimated {
                geometry,
                background,
            } => {
                let smoothed = gaussian_smooth(&background.working, params.dpsf());
                log::debug!(
                    "{}: sigma {:.3} px on {}",
                    Stage::Smoothing,
                    params.dpsf(),
                    smoothed.size()
                );
                PipelineState::Smoothed {
                    geometry,
                    background,
                    smoothed,
                }
            }

            PipelineState::Smoothed {
                geometry,
                background,
                smoothed,
            } => {
                let heights = background.above_local(&smoothed);
                let detection = detect_peaks(&heights, params)?;
                log::debug!(
                    "{}: {} peaks in {} blobs",
                    Stage::PeakDetection,
                    detection.peaks.len(),
                    detection.n_blobs
                );
                PipelineState::PeaksDetected {
                    geometry,
                    background,
                    detection,
                }
            }

            PipelineState::PeaksDetected {
                geometry,
                background,
                detection,
            } => {
                let candidates: Vec<Source> =
                    refine_centroids(&background, &detection.peaks, params.centroid_radius())
                        .into_iter()
                        .map(|source| geometry.to_input_pixels(source))
                        .collect();
                log::debug!(
                    "{}: {} of {} peaks refined",
                    Stage::Centroiding,
                    candidates.len(),
                    detection.peaks.len()
                );

                let diagnostics = Diagnostics {
                    image_size: geometry.image_size,
                    working_size: geometry.working_size,
                    background_subtracted: background.subtracted,
                    sigma: detection.sigma,
                    threshold: detection.threshold,
                    n_peaks: detection.peaks.len(),
                    n_candidates: candidates.len(),
                };
                PipelineState::Centroided {
                    diagnostics,
                    candidates,
                }
            }

            PipelineState::Centroided {
                diagnostics,
                candidates,
            } => {
                let sources = deduplicate(candidates, params.dlim(), params.maxnpeaks());
                log::debug!("{}: {} sources kept", Stage::Deduplication, sources.len());
                PipelineState::Deduplicated {
                    diagnostics,
                    sources,
                }
            }

            PipelineState::Deduplicated {
                diagnostics,
                sources,
            } => PipelineState::Done(Extraction {
                sources,
                diagnostics,
            }),

            done @ PipelineState::Done(_) => done,
        };
        Ok(next)
    }

    /// Run every stage on `image`.
    pub fn run(&self, image: &Image) -> Result<Extraction, ExtractionError> {
        let started = Instant::now();
        let mut state = self.start(image)?;

        loop {
            state = match state {
                PipelineState::Done(extraction) => {
                    log::info!(
                        "Found {} sources in {} image (sigma {:.4}, {} peaks) in {:.1?}",
                        extraction.sources.len(),
                        extraction.diagnostics.image_size,
                        extraction.diagnostics.sigma,
                        extraction.diagnostics.n_peaks,
                        started.elapsed()
                    );
                    return Ok(extraction);
                }
                other => self.step(other)?,
            };
        }
    }
}

/// Extract sources from `image` with `params`.
pub fn extract_sources(image: &Image, params: &Parameters) -> Result<Extraction, ExtractionError> {
    SourceExtractor::new(params.clone()).run(image)
}
