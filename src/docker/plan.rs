use crate::docker::ingest::PathIndex;
use crate::docker::layer::{Layer, LayerGraph};
use crate::error::{Result, SquashError};
use std::collections::{HashMap, HashSet};

/// Pick the layer the squash starts from.
///
/// Priority: a caller-supplied id prefix; else the first layer already
/// carrying the squash marker (re-squashing a squashed image); else the
/// root.
pub fn select_anchor<'a>(graph: &'a LayerGraph, from: &str) -> Result<&'a Layer> {
    if !from.is_empty() {
        return match graph.get_by_prefix(from)? {
            Some(layer) => Ok(layer),
            None => Err(SquashError::InvalidFrom(from.to_string())),
        };
    }

    graph
        .first_with_cmd("#(squash)")
        .or_else(|| graph.root())
        .ok_or(SquashError::NoRoot)
}

/// For each surviving path, the single layer whose copy of it wins, keyed by
/// that layer's id.
#[derive(Debug, Default)]
pub struct MergePlan {
    pub layer_to_files: HashMap<String, HashSet<String>>,
}

impl MergePlan {
    /// Decide, for every recorded path, which occurrence survives the merge.
    ///
    /// Layers are numbered from the anchor down; layers above the anchor get
    /// no position, never win, and their whiteouts cannot occlude anything.
    /// A path whose winning occurrence is a whiteout is dropped, as is any
    /// path prefix-covered by a tombstone at or after the winning position.
    pub fn compute(graph: &LayerGraph, index: &PathIndex, anchor_id: &str) -> Self {
        let mut positions: HashMap<&str, usize> = HashMap::new();
        let mut current = graph.get(anchor_id);
        let mut position = 0;
        while let Some(layer) = current {
            positions.insert(&layer.config.id, position);
            position += 1;
            current = graph.child_of(&layer.config.id);
        }

        let mut plan = MergePlan::default();
        for (path, locations) in &index.file_to_layers {
            let winner = locations
                .iter()
                .filter_map(|loc| positions.get(loc.layer_id.as_str()).map(|p| (*p, loc)))
                .max_by_key(|(position, _)| *position);

            let Some((winner_position, winner)) = winner else {
                continue;
            };
            if winner.whiteout {
                continue;
            }

            let occluded = index.whiteouts.iter().any(|tombstone| {
                path.starts_with(&tombstone.prefix)
                    && positions
                        .get(tombstone.layer_id.as_str())
                        .map_or(false, |p| *p >= winner_position)
            });
            if occluded {
                continue;
            }

            plan.layer_to_files
                .entry(winner.layer_id.clone())
                .or_default()
                .insert(path.clone());
        }

        plan
    }

    pub fn has_layer(&self, layer_id: &str) -> bool {
        self.layer_to_files.contains_key(layer_id)
    }

    pub fn contains(&self, layer_id: &str, path: &str) -> bool {
        self.layer_to_files
            .get(layer_id)
            .map_or(false, |files| files.contains(path))
    }
}
