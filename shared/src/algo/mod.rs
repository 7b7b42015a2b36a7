//! Numerical helpers shared across the workspace
//!
//! Currently this is the robust-statistics toolbox used for background and
//! noise estimation.

pub mod stats;

pub use stats::{
    median, robust_sigma, sigma_clipped_stats, ClippedStats, StatsError, MAD_TO_SIGMA,
};
