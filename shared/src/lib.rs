//! Shared components and utilities for starxy.
//!
//! This crate holds the pieces that are not specific to the extraction
//! pipeline itself: image dimensions, robust statistics, synthetic image
//! generation for tests, and decoding of FITS images into plain pixel buffers.

pub mod algo;
pub mod image_proc;
pub mod image_size;
