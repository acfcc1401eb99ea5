use crate::docker::ingest::{strip_whiteout, Repositories};
use crate::docker::layer::LayerGraph;
use crate::docker::plan::MergePlan;
use crate::docker::tar::{classify, entry_name, EntryKind, EMPTY_LAYER_TAR};
use crate::error::Result;
use std::fs::File;
use std::io::{self, Read, Write};
use tar::{Archive, Builder, EntryType, Header};

/// First half of the second pass: collect the squashed layer's content.
///
/// Walks the spooled outer tar and copies, for every `layer.tar` with a
/// populated plan set, each inner entry whose whiteout-stripped path is in
/// that set. Headers and payloads are copied verbatim into `scratch`.
pub fn build_squash_layer<R: Read, W: Write>(
    stream: R,
    plan: &MergePlan,
    scratch: W,
) -> Result<()> {
    let mut writer = Builder::new(scratch);

    let mut archive = Archive::new(stream);
    for entry in archive.entries()? {
        let mut entry = entry?;
        let name = entry_name(&entry);

        let EntryKind::LayerTar(layer_id) = classify(&name) else {
            continue;
        };
        if !plan.has_layer(&layer_id) {
            continue;
        }

        let mut inner = Archive::new(&mut entry);
        for file in inner.entries()? {
            let mut file = file?;
            let file_name = entry_name(&file);
            if plan.contains(&layer_id, &strip_whiteout(&file_name)) {
                let mut header = file.header().clone();
                writer.append_data(&mut header, &file_name, &mut file)?;
            }
        }
    }

    writer.finish()?;
    Ok(())
}

/// Second half of the second pass: stream the final image archive.
///
/// Emits, root to leaf, the four entries of every surviving layer; the
/// squash layer's `layer.tar` is the scratch file, every other layer's is
/// the minimal empty tar. A `repositories` index is appended when supplied.
/// Returns the leaf layer's id, which is the image id.
pub fn write_image<W: Write>(
    graph: &LayerGraph,
    squash_id: &str,
    squash_tar: &mut File,
    output: W,
    repositories: Option<&Repositories>,
) -> Result<String> {
    let mut writer = Builder::new(output);

    let mut latest_dir: Option<Header> = None;
    let mut latest_version: Option<Header> = None;
    let mut latest_json: Option<Header> = None;
    let mut latest_tar: Option<Header> = None;

    let squash_size = squash_tar.metadata()?.len();
    let mut image_id = String::new();

    let mut current = graph.root();
    while let Some(layer) = current {
        let layer_id = &layer.config.id;
        let mtime = layer.config.created.timestamp().max(0) as u64;

        let mut dir = pick_header(layer.dir_header.as_ref(), &mut latest_dir, || {
            synthesized_header(EntryType::Directory, 0o755, mtime)
        });
        dir.set_size(0);
        writer.append_data(&mut dir, format!("{}/", layer_id), io::empty())?;

        let mut version = pick_header(layer.version_header.as_ref(), &mut latest_version, || {
            synthesized_header(EntryType::Regular, 0o644, mtime)
        });
        version.set_size(3);
        writer.append_data(&mut version, format!("{}/VERSION", layer_id), &b"1.0"[..])?;

        let json_bytes = serde_json::to_vec(&layer.config)?;
        let mut json = pick_header(layer.json_header.as_ref(), &mut latest_json, || {
            synthesized_header(EntryType::Regular, 0o644, mtime)
        });
        json.set_size(json_bytes.len() as u64);
        writer.append_data(&mut json, format!("{}/json", layer_id), json_bytes.as_slice())?;

        let mut layer_tar = pick_header(layer.layer_tar_header.as_ref(), &mut latest_tar, || {
            synthesized_header(EntryType::Regular, 0o644, mtime)
        });
        let tar_name = format!("{}/layer.tar", layer_id);
        if layer_id == squash_id {
            layer_tar.set_size(squash_size);
            writer.append_data(&mut layer_tar, tar_name, &mut *squash_tar)?;
        } else {
            layer_tar.set_size(EMPTY_LAYER_TAR.len() as u64);
            writer.append_data(&mut layer_tar, tar_name, &EMPTY_LAYER_TAR[..])?;
        }

        image_id = layer_id.clone();
        current = graph.child_of(layer_id);
    }

    if let Some(repositories) = repositories {
        let payload = serde_json::to_vec(repositories)?;
        let mut header = synthesized_header(EntryType::Regular, 0o644, 0);
        header.set_size(payload.len() as u64);
        writer.append_data(&mut header, "repositories", payload.as_slice())?;
    }

    writer.finish()?;
    Ok(image_id)
}

/// Use the layer's own captured header when present (remembering it for
/// later layers), else the most recently seen one, else a synthesized
/// default. Freshly inserted layers have no captured headers.
fn pick_header(
    own: Option<&Header>,
    latest: &mut Option<Header>,
    fallback: impl FnOnce() -> Header,
) -> Header {
    if let Some(header) = own {
        *latest = Some(header.clone());
        return header.clone();
    }
    match latest {
        Some(header) => header.clone(),
        None => fallback(),
    }
}

fn synthesized_header(entry_type: EntryType, mode: u32, mtime: u64) -> Header {
    let mut header = Header::new_gnu();
    header.set_entry_type(entry_type);
    header.set_mode(mode);
    header.set_size(0);
    header.set_mtime(mtime);
    header.set_cksum();
    header
}
