//! # docker-squash - Streaming Docker Image Layer Squashing
//!
//! A tool for collapsing the layers of a saved Docker image archive into a
//! single content layer, written in Rust.
//!
//! ## Features
//!
//! - **Streaming**: two passes over the archive via a spool file; inner
//!   layer contents are never held in memory
//! - **Whiteout aware**: AUFS `.wh.` tombstones delete files and whole
//!   subtrees from the merged filesystem
//! - **Metadata preserved**: entrypoint, env, exposed ports and working dir
//!   survive on the squash layer; `#(nop)` instruction layers are kept as
//!   refreshed metadata-only layers
//! - **Flexible anchors**: squash from the root, from an existing squash
//!   layer, or from any layer id prefix
//! - **Tagging**: write a `repositories` index so the result loads under
//!   the requested names
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use docker_squash::docker::{squash, SquashOptions};
//! use std::fs::File;
//!
//! fn main() -> Result<(), docker_squash::SquashError> {
//!     let input = File::open("image.tar")?;
//!     let output = File::create("squashed.tar")?;
//!
//!     let mut image_id = Vec::new();
//!     squash(input, output, &mut image_id, &SquashOptions::default())?;
//!
//!     println!("{}", String::from_utf8_lossy(&image_id));
//!     Ok(())
//! }
//! ```

/// Command line interface definitions
pub mod cli;
/// Docker image squashing pipeline
pub mod docker;
/// Error types and handling
pub mod error;
/// Layer id generation
mod id;

pub use cli::*;
pub use error::*;
