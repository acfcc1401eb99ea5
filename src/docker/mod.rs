//! Docker image manipulation utilities.
//!
//! This module implements the two-pass squash pipeline over saved image
//! archives: ingest the layer chain and path index, plan the merged
//! filesystem, rewrite the chain and emit the squashed archive.

/// Layer metadata structures, including the dual-shape container config
pub mod config;
/// Second pass: squashed layer assembly and final archive emission
pub mod emit;
/// First pass: layer chain, repositories index and path occurrences
pub mod ingest;
/// The layer chain model and its mutations
pub mod layer;
/// Squash anchor selection and per-path winner computation
pub mod plan;
/// The squash pipeline entry point and its options
pub mod squash;
/// Tar entry classification and stream helpers
pub mod tar;

pub use config::*;
pub use emit::*;
pub use ingest::*;
pub use layer::*;
pub use plan::*;
pub use squash::*;
pub use tar::*;
