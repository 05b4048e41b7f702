//! mkv-extract - split depth-camera recordings into per-stream files
//!
//! This library crate exposes the orchestration layer for integration testing.

pub mod config;
pub mod pipeline;

pub use pipeline::{run_batch, BatchSummary, ExtractOptions, ExtractionPipeline, ExtractionReport};
