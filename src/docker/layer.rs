use crate::docker::config::LayerConfig;
use crate::error::{Result, SquashError};
use crate::id;
use chrono::Utc;
use std::collections::HashMap;
use tar::Header;
use tracing::debug;

/// A layer of the image: its parsed `json` config plus the tar headers of
/// the four files that make up its directory in the outer archive. Headers
/// are captured during ingest so emission can reproduce permissions,
/// timestamps and ownership bit for bit.
#[derive(Debug, Clone)]
pub struct Layer {
    pub config: LayerConfig,
    pub dir_header: Option<Header>,
    pub version_header: Option<Header>,
    pub json_header: Option<Header>,
    pub layer_tar_header: Option<Header>,
}

impl Layer {
    pub fn new(config: LayerConfig) -> Self {
        Layer {
            config,
            dir_header: None,
            version_header: None,
            json_header: None,
            layer_tar_header: None,
        }
    }

    /// Placeholder for a layer whose `json` has not been seen yet.
    fn stub(id: &str) -> Self {
        let mut config = LayerConfig::default();
        config.id = id.to_string();
        Layer::new(config)
    }

    /// The layer's command joined by single spaces.
    pub fn command(&self) -> String {
        self.config.command()
    }

    /// Command truncated for log output.
    pub fn cmd_summary(&self) -> String {
        self.command().chars().take(60).collect()
    }
}

/// The layer chain of an image, keyed by id and linked by parent pointers.
///
/// In the supported case the graph is a linear chain: exactly one layer has
/// an empty parent and every other layer's parent exists in the map. Each
/// mutation keeps that shape.
#[derive(Debug, Default)]
pub struct LayerGraph {
    layers: HashMap<String, Layer>,
}

impl LayerGraph {
    pub fn get(&self, layer_id: &str) -> Option<&Layer> {
        self.layers.get(layer_id)
    }

    pub fn get_mut(&mut self, layer_id: &str) -> Option<&mut Layer> {
        self.layers.get_mut(layer_id)
    }

    pub fn insert(&mut self, layer: Layer) {
        self.layers.insert(layer.config.id.clone(), layer);
    }

    /// Get or create the layer keyed by `layer_id`, for ingest, where headers
    /// may arrive before the layer's `json` does.
    pub fn layer_entry(&mut self, layer_id: &str) -> &mut Layer {
        self.layers
            .entry(layer_id.to_string())
            .or_insert_with(|| Layer::stub(layer_id))
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// The unique layer whose parent is empty, if any.
    pub fn root(&self) -> Option<&Layer> {
        self.child_of("")
    }

    /// The unique layer whose parent is `parent`, if any.
    pub fn child_of(&self, parent: &str) -> Option<&Layer> {
        self.layers.values().find(|l| l.config.parent == parent)
    }

    /// Walk from the root until no child exists.
    pub fn last(&self) -> Option<&Layer> {
        let mut current = self.root()?;
        while let Some(child) = self.child_of(&current.config.id) {
            current = child;
        }
        Some(current)
    }

    /// The unique layer whose id starts with `prefix`.
    pub fn get_by_prefix(&self, prefix: &str) -> Result<Option<&Layer>> {
        let mut matches = self
            .layers
            .values()
            .filter(|l| l.config.id.starts_with(prefix));
        let first = matches.next();
        let rest = matches.count();
        if rest > 0 {
            return Err(SquashError::AmbiguousId {
                prefix: prefix.to_string(),
                matches: rest + 1,
            });
        }
        Ok(first)
    }

    /// The first layer, walking root to leaf, whose command contains
    /// `pattern`.
    pub fn first_with_cmd(&self, pattern: &str) -> Option<&Layer> {
        let mut current = self.root();
        while let Some(layer) = current {
            if layer.command().contains(pattern) {
                return Some(layer);
            }
            current = self.child_of(&layer.config.id);
        }
        None
    }

    /// Layer ids from `layer_id` down to the leaf, in chain order.
    pub fn chain_from(&self, layer_id: &str) -> Vec<String> {
        let mut chain = Vec::new();
        let mut current = self.get(layer_id);
        while let Some(layer) = current {
            chain.push(layer.config.id.clone());
            current = self.child_of(&layer.config.id);
        }
        chain
    }

    /// Create a fresh layer under `parent`, carrying the squash marker in its
    /// command. An existing child of `parent` is reparented onto the new
    /// layer.
    pub fn insert_layer(&mut self, parent: &str) -> Result<String> {
        let new_id = id::generate()?;

        let mut config = LayerConfig::new(&new_id, parent, "squashed w/ docker-squash");
        config.container_config_mut().cmd = Some(vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            format!("#(squash) from {}", id::short_id(parent)),
        ]);

        if let Some(child_id) = self.child_of(parent).map(|c| c.config.id.clone()) {
            if let Some(child) = self.layers.get_mut(&child_id) {
                child.config.parent = new_id.clone();
            }
        }

        self.insert(Layer::new(config));
        Ok(new_id)
    }

    /// Give a layer a fresh identity: new id, `created` bumped to now, same
    /// config, captured headers and (empty) content. The child is rewired to
    /// the new id and the old entry dropped.
    pub fn replace_layer(&mut self, old_id: &str) -> Result<String> {
        let new_id = id::generate()?;

        let child_id = self.child_of(old_id).map(|c| c.config.id.clone());
        let mut layer = self
            .layers
            .remove(old_id)
            .ok_or_else(|| SquashError::LayerNotFound(old_id.to_string()))?;

        debug!(
            "  -  Replacing {} w/ new layer {} ({})",
            id::short_id(old_id),
            id::short_id(&new_id),
            layer.cmd_summary()
        );

        layer.config.id = new_id.clone();
        layer.config.created = Utc::now();

        if let Some(child_id) = child_id {
            if let Some(child) = self.layers.get_mut(&child_id) {
                child.config.parent = new_id.clone();
            }
        }

        self.layers.insert(new_id.clone(), layer);
        Ok(new_id)
    }

    /// Unlink a layer: its child adopts the removed layer's parent.
    pub fn remove_layer(&mut self, layer_id: &str) -> Option<Layer> {
        let layer = self.layers.remove(layer_id)?;

        debug!(
            "  -  Removing {}. Squashed. ({})",
            id::short_id(layer_id),
            layer.cmd_summary()
        );

        if let Some(child_id) = self.child_of(layer_id).map(|c| c.config.id.clone()) {
            if let Some(child) = self.layers.get_mut(&child_id) {
                child.config.parent = layer.config.parent.clone();
            }
        }

        Some(layer)
    }
}
