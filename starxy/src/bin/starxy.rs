//! Extract star positions from a FITS image
//!
//! # Usage
//!
//! ```bash
//! # PSF sigma of 1.5 pixels, default thresholds
//! starxy 1.5 frame.fits
//!
//! # Tighter separation, no background subtraction, JSON output
//! starxy 1.5 frame.fits --dlim 5 --no-bgsub --format json
//!
//! # Parameters from a file, with one flag taking precedence
//! starxy 1.5 frame.fits --config params.json --plim 6
//! ```
//!
//! Parameter precedence, lowest first: library defaults, the defaults of this
//! tool (`dlim = 30`, `downsample = 2`), the `--config` file, then flags.
//! Logging goes to stderr and is controlled by `RUST_LOG` (default `info`).

use std::io;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use shared::image_proc::fits::read_fits_image;
use starxy::{
    write_extraction, ExtractionError, Image, OutputFormat, ParameterOverrides, Parameters,
    SourceExtractor,
};

/// Source separation used by this tool unless overridden
const CLI_DEFAULT_DLIM: f64 = 30.0;
/// Block-averaging factor used by this tool unless overridden
const CLI_DEFAULT_DOWNSAMPLE: usize = 2;

#[derive(Parser, Debug)]
#[command(author, version, about = "Find point sources in a FITS image")]
struct Args {
    /// Gaussian PSF sigma in pixels
    dpsf: f64,

    /// FITS image to process (primary HDU)
    image: PathBuf,

    /// Detection threshold in units of the smoothed-image noise
    #[arg(long)]
    plim: Option<f64>,

    /// Minimum separation between reported sources, in pixels
    #[arg(long)]
    dlim: Option<f64>,

    /// Fraction of a peak's height its saddle must drop to keep it separate
    #[arg(long)]
    saddle: Option<f64>,

    /// Maximum peaks per connected blob
    #[arg(long)]
    maxper: Option<usize>,

    /// Maximum number of sources reported
    #[arg(long)]
    maxnpeaks: Option<usize>,

    /// Per-pixel noise of the input image (estimated when omitted)
    #[arg(long)]
    sigma: Option<f64>,

    /// Do not subtract the estimated background
    #[arg(long)]
    no_bgsub: bool,

    /// Half-size of background tiles in pixels
    #[arg(long)]
    halfbox: Option<usize>,

    /// Integer block-averaging factor applied before extraction
    #[arg(long)]
    downsample: Option<usize>,

    /// JSON file with parameter overrides
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
}

impl Args {
    fn flag_overrides(&self) -> ParameterOverrides {
        ParameterOverrides {
            dpsf: Some(self.dpsf),
            plim: self.plim,
            dlim: self.dlim,
            saddle: self.saddle,
            maxper: self.maxper,
            maxnpeaks: self.maxnpeaks,
            sigma: self.sigma,
            subtract_background: self.no_bgsub.then_some(false),
            halfbox: self.halfbox,
            downsample: self.downsample,
        }
    }

    fn parameters(&self) -> anyhow::Result<Parameters> {
        let mut layered = ParameterOverrides {
            dlim: Some(CLI_DEFAULT_DLIM),
            downsample: Some(CLI_DEFAULT_DOWNSAMPLE),
            ..Default::default()
        };

        if let Some(path) = &self.config {
            let file = ParameterOverrides::from_json_file(path)?;
            log::debug!("Loaded parameter overrides from {}", path.display());
            layered = layered.merged_with(&file);
        }
        layered = layered.merged_with(&self.flag_overrides());

        Ok(Parameters::builder().apply(&layered).build()?)
    }
}

fn load_image(path: &Path) -> Result<Image, ExtractionError> {
    let data = read_fits_image(path).map_err(|e| ExtractionError::DecodeFailure {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    Image::new(data)
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let params = args.parameters()?;
    log::debug!("Parameters: {params:?}");

    let image = load_image(&args.image)?;
    log::info!("Loaded {} ({})", args.image.display(), image.size());

    let extraction = SourceExtractor::new(params)
        .run(&image)
        .with_context(|| format!("Extraction failed for {}", args.image.display()))?;

    let stdout = io::stdout();
    write_extraction(&mut stdout.lock(), &extraction, args.format)?;
    Ok(())
}
