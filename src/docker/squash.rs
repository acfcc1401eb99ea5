use crate::docker::emit::{build_squash_layer, write_image};
use crate::docker::ingest::{Export, Repositories};
use crate::docker::layer::LayerGraph;
use crate::docker::plan::{select_anchor, MergePlan};
use crate::docker::tar::TeeReader;
use crate::error::{Result, SquashError};
use crate::id;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Repo name to tag names. An empty tag list under a repo means `latest`;
/// an empty map means no `repositories` index is written.
pub type TagList = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, Default)]
pub struct SquashOptions {
    /// Id prefix of the layer the squash starts from. Empty selects the
    /// default anchor: an existing squash layer if present, else the root.
    pub from: String,
    /// Tags applied to the final image id via the `repositories` index.
    pub tags: TagList,
    /// Where the spool and scratch files live. Defaults to the system
    /// temporary directory.
    pub temp_dir: Option<PathBuf>,
}

/// Expand a tag list into the `repositories` document for `image_id`.
pub fn produce_repositories(tags: &TagList, image_id: &str) -> Repositories {
    let mut repositories = Repositories::new();
    for (repo, tag_names) in tags {
        let entry = repositories.entry(repo.clone()).or_default();
        if tag_names.is_empty() {
            entry.insert("latest".to_string(), image_id.to_string());
        } else {
            for tag in tag_names {
                entry.insert(tag.clone(), image_id.to_string());
            }
        }
    }
    repositories
}

/// Squash an image archive.
///
/// Reads the saved image from `input`, writes the squashed archive to
/// `output` and the 64-character id of the final image to `image_id_out`.
/// The input is consumed in a single pass; a spool file (deleted on every
/// exit path) carries it into the second pass.
pub fn squash<R: Read, W: Write, O: Write>(
    input: R,
    output: W,
    image_id_out: &mut O,
    options: &SquashOptions,
) -> Result<()> {
    let mut spool = temp_sink(options.temp_dir.as_deref())?;

    let Export {
        mut graph,
        index,
        repositories: _,
    } = Export::read_from(TeeReader::new(input, &mut spool))?;

    let anchor_id = select_anchor(&graph, &options.from)?.config.id.clone();
    let plan = MergePlan::compute(&graph, &index, &anchor_id);

    spool.seek(SeekFrom::Start(0))?;

    let squash_id = graph.insert_layer(&anchor_id)?;
    debug!(
        "Inserted new layer {} after {}",
        id::short_id(&squash_id),
        id::short_id(&anchor_id)
    );
    log_chain(&graph, &squash_id);

    debug!(
        "Squashing from {} into {}",
        id::short_id(&anchor_id),
        id::short_id(&squash_id)
    );
    rewrite_children(&mut graph, &anchor_id, &squash_id)?;
    adopt_runtime_config(&mut graph, &squash_id)?;

    let mut scratch = temp_sink(options.temp_dir.as_deref())?;
    build_squash_layer(&mut spool, &plan, &mut scratch)?;
    scratch.seek(SeekFrom::Start(0))?;

    let leaf_id = graph.last().ok_or(SquashError::NoRoot)?.config.id.clone();
    let repositories =
        (!options.tags.is_empty()).then(|| produce_repositories(&options.tags, &leaf_id));

    let image_id = write_image(&graph, &squash_id, &mut scratch, output, repositories.as_ref())?;
    image_id_out.write_all(image_id.as_bytes())?;

    Ok(())
}

/// Rework every layer from the anchor down.
///
/// Layers already carrying the squash marker persist as-is. Layers whose
/// command is a `#(nop)` other than `ADD` change runtime configuration but
/// not the filesystem; they keep their config under a fresh identity and an
/// empty tar. Everything else modified the filesystem and is absorbed into
/// the squash layer, so it is unlinked.
fn rewrite_children(graph: &mut LayerGraph, anchor_id: &str, squash_id: &str) -> Result<()> {
    debug!("  -  Rewriting child history");

    for layer_id in graph.chain_from(anchor_id) {
        if layer_id == squash_id {
            continue;
        }
        let Some(cmd) = graph.get(&layer_id).map(|l| l.command()) else {
            continue;
        };

        if cmd.contains("#(squash)") {
            continue;
        }
        if cmd.contains("#(nop)") && !cmd.contains("ADD") {
            graph.replace_layer(&layer_id)?;
        } else {
            graph.remove_layer(&layer_id);
        }
    }

    Ok(())
}

/// Carry the runtime metadata of the chain's leaf over to the squash layer:
/// entrypoint, env, exposed ports, working dir and friends survive the
/// collapse.
fn adopt_runtime_config(graph: &mut LayerGraph, squash_id: &str) -> Result<()> {
    let leaf = graph.last().ok_or(SquashError::NoRoot)?;
    let leaf_container = leaf
        .config
        .container_config
        .clone()
        .or_else(|| leaf.config.legacy_container_config.clone())
        .unwrap_or_default();
    let leaf_config = leaf.config.config.clone();

    let squashed = graph
        .get_mut(squash_id)
        .ok_or_else(|| SquashError::LayerNotFound(squash_id.to_string()))?;

    squashed.config.container_config_mut().augment(&leaf_container);
    if let Some(leaf_config) = leaf_config {
        match &mut squashed.config.config {
            Some(own) => own.augment(&leaf_config),
            None => squashed.config.config = Some(leaf_config),
        }
    }

    Ok(())
}

fn log_chain(graph: &LayerGraph, squash_id: &str) {
    let Some(root) = graph.root() else { return };
    for layer_id in graph.chain_from(&root.config.id) {
        if let Some(layer) = graph.get(&layer_id) {
            let marker = if layer_id == squash_id { "->" } else { " -" };
            debug!(
                "  {} {} {}",
                marker,
                id::short_id(&layer_id),
                layer.cmd_summary()
            );
        }
    }
}

fn temp_sink(temp_dir: Option<&Path>) -> std::io::Result<File> {
    match temp_dir {
        Some(dir) => tempfile::tempfile_in(dir),
        None => tempfile::tempfile(),
    }
}
