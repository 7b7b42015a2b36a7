//! STARXY - point-source extraction for astronomical images
//!
//! Finds stars in a 2D frame and reports their sub-pixel positions. A run
//! goes through: Background -> Smoothing -> PeakDetection -> Centroiding ->
//! Deduplication, driven by the state machine in [`pipeline`].
//!
//! ```no_run
//! use starxy::{extract_sources, Image, Parameters};
//!
//! let image = Image::from_vec(64, 64, vec![0.0; 64 * 64])?;
//! let params = Parameters::builder().dpsf(1.5).plim(5.0).build()?;
//! let extraction = extract_sources(&image, &params)?;
//! for source in &extraction.sources {
//!     println!("{:.4}, {:.4}", source.x, source.y);
//! }
//! # Ok::<(), starxy::ExtractionError>(())
//! ```

pub mod error;
pub mod image_proc;
pub mod output;
pub mod params;
pub mod pipeline;

pub use error::{ExtractionError, Stage};
pub use image_proc::{Image, Source};
pub use output::{write_extraction, OutputFormat};
pub use params::{ParameterOverrides, Parameters, ParametersBuilder};
pub use pipeline::{
    extract_sources, Diagnostics, Extraction, Outcome, PipelineState, SourceExtractor,
};
