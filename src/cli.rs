use crate::docker::squash::TagList;
use crate::error::{Result, SquashError};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "docker-squash")]
#[command(about = "Squash the layers of a saved Docker image archive")]
#[command(version = "0.1.0")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Squash image layers from a saved image archive
    Squash {
        /// Read from a tar archive file, instead of stdin
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Write to a file, instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Squash from this layer id prefix (default: first squash layer, else root)
        #[arg(long)]
        from: Option<String>,

        /// Repository name and tag for the new image, as repo or repo:tag
        #[arg(short, long)]
        tag: Vec<String>,

        /// Temporary directory for intermediate files
        #[arg(long)]
        temp_dir: Option<PathBuf>,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

/// Turn repeated `--tag repo[:tag]` arguments into a [`TagList`]. A bare
/// repository name tags `latest`.
pub fn parse_tags(specs: &[String]) -> Result<TagList> {
    let mut tags = TagList::new();
    for spec in specs {
        match spec.split_once(':') {
            None if !spec.is_empty() => {
                tags.entry(spec.clone()).or_default();
            }
            Some((repo, tag)) if !repo.is_empty() && !tag.is_empty() => {
                tags.entry(repo.to_string()).or_default().push(tag.to_string());
            }
            _ => {
                return Err(SquashError::InvalidInput(format!(
                    "bad tag format: {}",
                    spec
                )));
            }
        }
    }
    Ok(tags)
}
