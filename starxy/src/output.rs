//! Writing extraction results.

use std::io::{self, Write};

use clap::ValueEnum;

use crate::pipeline::Extraction;

/// How results are written to the sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Source count followed by one `x, y` line per source
    #[default]
    Text,
    /// The full extraction (sources with flux and background, plus diagnostics) as JSON
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

/// Write `extraction` to `out` in the requested format.
pub fn write_extraction<W: Write>(
    out: &mut W,
    extraction: &Extraction,
    format: OutputFormat,
) -> io::Result<()> {
    match format {
        OutputFormat::Text => {
            writeln!(out, "Found {} sources", extraction.sources.len())?;
            for source in &extraction.sources {
                writeln!(out, "{:.4}, {:.4}", source.x, source.y)?;
            }
        }
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut *out, extraction)?;
            writeln!(out)?;
        }
    }
    out.flush()
}
