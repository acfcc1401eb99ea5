use crate::docker::config::LayerConfig;
use crate::docker::layer::LayerGraph;
use crate::docker::tar::{classify, entry_name, EntryKind};
use crate::error::{Result, SquashError};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Read;
use tar::Archive;

/// The decoded top-level `repositories` index: repo name to tag to image id.
pub type Repositories = BTreeMap<String, BTreeMap<String, String>>;

/// One sighting of a logical path inside a layer's inner tar.
#[derive(Debug, Clone)]
pub struct FileLoc {
    pub layer_id: String,
    /// The file as present in this layer is a whiteout marker, not content.
    pub whiteout: bool,
}

/// A whiteout tombstone: everything under `prefix` is deleted in
/// `layer_id` and above.
#[derive(Debug, Clone)]
pub struct WhiteoutEntry {
    pub layer_id: String,
    pub prefix: String,
}

/// Inner-tar path occurrences gathered during the first pass, keyed by the
/// whiteout-stripped path.
#[derive(Debug, Default)]
pub struct PathIndex {
    pub file_to_layers: HashMap<String, Vec<FileLoc>>,
    pub whiteouts: Vec<WhiteoutEntry>,
}

impl PathIndex {
    /// Record one inner-tar entry by its raw name.
    pub fn record(&mut self, raw_name: &str, layer_id: &str) {
        let stripped = strip_whiteout(raw_name);
        let whiteout = is_whiteout(raw_name);

        self.file_to_layers
            .entry(stripped.clone())
            .or_default()
            .push(FileLoc {
                layer_id: layer_id.to_string(),
                whiteout,
            });

        if whiteout {
            self.whiteouts.push(WhiteoutEntry {
                layer_id: layer_id.to_string(),
                prefix: stripped,
            });
        }
    }
}

/// True when the entry's last path component carries the whiteout prefix.
pub fn is_whiteout(name: &str) -> bool {
    name.rsplit('/')
        .next()
        .map_or(false, |file| file.starts_with(".wh."))
}

/// The logical path of an entry: every `.wh.` occurrence removed.
pub fn strip_whiteout(name: &str) -> String {
    name.replace(".wh.", "")
}

/// Everything the first pass learns about the image: the layer chain, the
/// repositories index and where every inner path occurs.
#[derive(Debug, Default)]
pub struct Export {
    pub graph: LayerGraph,
    pub repositories: Repositories,
    pub index: PathIndex,
}

impl Export {
    /// Populate from one pass over the outer tar stream.
    ///
    /// Only entry names and the `json`/`repositories` payloads are read;
    /// inner `layer.tar` file contents are skipped over.
    pub fn read_from<R: Read>(stream: R) -> Result<Self> {
        let mut export = Export::default();

        let mut archive = Archive::new(stream);
        for entry in archive.entries()? {
            let mut entry = entry?;
            let name = entry_name(&entry);

            match classify(&name) {
                EntryKind::Ignore | EntryKind::Unknown => {}
                EntryKind::Repositories => {
                    export.repositories = serde_json::from_reader(&mut entry)?;
                    export.ensure_single_branch()?;
                }
                EntryKind::Directory(layer_id) => {
                    export.graph.layer_entry(&layer_id).dir_header =
                        Some(entry.header().clone());
                }
                EntryKind::Version(layer_id) => {
                    export.graph.layer_entry(&layer_id).version_header =
                        Some(entry.header().clone());
                }
                EntryKind::Json(layer_id) => {
                    let header = entry.header().clone();
                    let config: LayerConfig = serde_json::from_reader(&mut entry)?;

                    let layer = export.graph.layer_entry(&layer_id);
                    layer.json_header = Some(header);
                    layer.config = config;
                    // collapse the legacy container-config shape up front so
                    // read-only traversals see a single field
                    layer.config.container_config_mut();
                }
                EntryKind::LayerTar(layer_id) => {
                    export.graph.layer_entry(&layer_id).layer_tar_header =
                        Some(entry.header().clone());

                    let mut inner = Archive::new(&mut entry);
                    for file in inner.entries()? {
                        let file = file?;
                        export.index.record(&entry_name(&file), &layer_id);
                    }
                }
            }
        }

        Ok(export)
    }

    /// An export holding several images shows up as one repository whose tags
    /// point at distinct ids; squashing such a branched chain is refused.
    fn ensure_single_branch(&self) -> Result<()> {
        for tags in self.repositories.values() {
            let distinct: HashSet<&String> = tags.values().collect();
            if distinct.len() > 1 {
                return Err(SquashError::MultipleBranches);
            }
        }
        Ok(())
    }
}
