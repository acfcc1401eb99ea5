use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-layer metadata as stored in each `<id>/json` file of a saved image.
///
/// Early image writers emitted the container configuration under the
/// `ContainerConfig` key; everything since uses `container_config`. Both are
/// kept as optional fields and collapsed by [`LayerConfig::container_config_mut`].
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LayerConfig {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub parent: String,
    #[serde(default)]
    pub comment: String,
    #[serde(default = "unix_epoch")]
    pub created: DateTime<Utc>,
    /// Legacy field name, Docker 1.0.0 and 1.0.1 only.
    #[serde(
        rename = "ContainerConfig",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub legacy_container_config: Option<ContainerConfig>,
    #[serde(
        rename = "container_config",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub container_config: Option<ContainerConfig>,
    #[serde(default)]
    pub container: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Config>,
    #[serde(default)]
    pub docker_version: String,
    #[serde(default)]
    pub architecture: String,
}

fn unix_epoch() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

impl Default for LayerConfig {
    fn default() -> Self {
        LayerConfig {
            id: String::new(),
            parent: String::new(),
            comment: String::new(),
            created: unix_epoch(),
            legacy_container_config: None,
            container_config: None,
            container: String::new(),
            config: None,
            docker_version: String::new(),
            architecture: String::new(),
        }
    }
}

impl LayerConfig {
    pub fn new(id: &str, parent: &str, comment: &str) -> Self {
        LayerConfig {
            id: id.to_string(),
            parent: parent.to_string(),
            comment: comment.to_string(),
            created: Utc::now(),
            docker_version: "0.1.2".to_string(),
            architecture: "x86_64".to_string(),
            ..Default::default()
        }
    }

    /// Access the container configuration, normalizing the legacy JSON shape.
    ///
    /// A legacy `ContainerConfig` value is promoted to the modern field and
    /// forgotten, so after the first call only `container_config` is
    /// populated for this layer.
    pub fn container_config_mut(&mut self) -> &mut ContainerConfig {
        if self.container_config.is_none() {
            self.container_config = Some(self.legacy_container_config.take().unwrap_or_default());
        }
        self.legacy_container_config = None;
        self.container_config
            .get_or_insert_with(ContainerConfig::default)
    }

    /// The layer's command joined by single spaces, without normalizing.
    pub fn command(&self) -> String {
        self.container_config
            .as_ref()
            .or(self.legacy_container_config.as_ref())
            .and_then(|cc| cc.cmd.as_ref())
            .map(|cmd| cmd.join(" "))
            .unwrap_or_default()
    }
}

/// The container configuration shape shared by both JSON field names.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct ContainerConfig {
    pub attach_stderr: bool,
    pub attach_stdin: bool,
    pub attach_stdout: bool,
    pub cmd: Option<Vec<String>>,
    pub cpu_shares: i64,
    pub dns: Option<Vec<String>>,
    pub domainname: String,
    pub entrypoint: Option<Vec<String>>,
    pub env: Option<Vec<String>>,
    pub hostname: String,
    pub image: String,
    pub memory: i64,
    pub memory_swap: i64,
    pub network_disabled: bool,
    pub on_build: Option<Vec<String>>,
    pub open_stdin: bool,
    pub port_specs: Option<Vec<String>>,
    pub stdin_once: bool,
    pub tty: bool,
    pub user: String,
    pub volumes: Option<BTreeMap<String, serde_json::Value>>,
    pub volumes_from: String,
}

impl ContainerConfig {
    /// Fill zero and empty fields from `other`, or-ing the attach booleans.
    ///
    /// Used when the squash layer inherits runtime metadata from the leaf of
    /// the chain. `Cmd` is deliberately left alone so the squash marker
    /// survives.
    pub fn augment(&mut self, other: &ContainerConfig) {
        self.attach_stderr |= other.attach_stderr;
        self.attach_stdin |= other.attach_stdin;
        self.attach_stdout |= other.attach_stdout;
        self.tty |= other.tty;
        self.open_stdin |= other.open_stdin;
        self.stdin_once |= other.stdin_once;
        self.network_disabled |= other.network_disabled;

        if self.hostname.is_empty() {
            self.hostname = other.hostname.clone();
        }
        if self.domainname.is_empty() {
            self.domainname = other.domainname.clone();
        }
        if self.user.is_empty() {
            self.user = other.user.clone();
        }
        if self.memory == 0 {
            self.memory = other.memory;
        }
        if self.memory_swap == 0 {
            self.memory_swap = other.memory_swap;
        }
        if self.cpu_shares == 0 {
            self.cpu_shares = other.cpu_shares;
        }
        if list_empty(&self.entrypoint) {
            self.entrypoint = other.entrypoint.clone();
        }
        if list_empty(&self.env) {
            self.env = other.env.clone();
        }
        if list_empty(&self.port_specs) {
            self.port_specs = other.port_specs.clone();
        }
        if list_empty(&self.on_build) {
            self.on_build = other.on_build.clone();
        }
        if map_empty(&self.volumes) {
            self.volumes = other.volumes.clone();
        }
        if self.volumes_from.is_empty() {
            self.volumes_from = other.volumes_from.clone();
        }
    }
}

/// The `config` record carried alongside the container configuration.
///
/// Same shape as [`ContainerConfig`] plus the fields the older shape never
/// had.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct Config {
    pub attach_stderr: bool,
    pub attach_stdin: bool,
    pub attach_stdout: bool,
    pub cmd: Option<Vec<String>>,
    pub cpu_shares: i64,
    pub dns: Option<Vec<String>>,
    pub domainname: String,
    pub entrypoint: Option<Vec<String>>,
    pub env: Option<Vec<String>>,
    pub exposed_ports: Option<BTreeMap<String, serde_json::Value>>,
    pub hostname: String,
    pub image: String,
    pub memory: i64,
    pub memory_swap: i64,
    pub network_disabled: bool,
    pub on_build: Option<Vec<String>>,
    pub open_stdin: bool,
    pub port_specs: Option<Vec<String>>,
    pub stdin_once: bool,
    pub tty: bool,
    pub user: String,
    pub volumes: Option<BTreeMap<String, serde_json::Value>>,
    pub volumes_from: String,
    pub working_dir: String,
}

impl Config {
    /// Same policy as [`ContainerConfig::augment`], extended to the fields
    /// only this shape carries.
    pub fn augment(&mut self, other: &Config) {
        self.attach_stderr |= other.attach_stderr;
        self.attach_stdin |= other.attach_stdin;
        self.attach_stdout |= other.attach_stdout;
        self.tty |= other.tty;
        self.open_stdin |= other.open_stdin;
        self.stdin_once |= other.stdin_once;
        self.network_disabled |= other.network_disabled;

        if self.hostname.is_empty() {
            self.hostname = other.hostname.clone();
        }
        if self.domainname.is_empty() {
            self.domainname = other.domainname.clone();
        }
        if self.user.is_empty() {
            self.user = other.user.clone();
        }
        if self.memory == 0 {
            self.memory = other.memory;
        }
        if self.memory_swap == 0 {
            self.memory_swap = other.memory_swap;
        }
        if self.cpu_shares == 0 {
            self.cpu_shares = other.cpu_shares;
        }
        if list_empty(&self.entrypoint) {
            self.entrypoint = other.entrypoint.clone();
        }
        if list_empty(&self.env) {
            self.env = other.env.clone();
        }
        if list_empty(&self.port_specs) {
            self.port_specs = other.port_specs.clone();
        }
        if list_empty(&self.on_build) {
            self.on_build = other.on_build.clone();
        }
        if map_empty(&self.volumes) {
            self.volumes = other.volumes.clone();
        }
        if self.volumes_from.is_empty() {
            self.volumes_from = other.volumes_from.clone();
        }
        if self.working_dir.is_empty() {
            self.working_dir = other.working_dir.clone();
        }
        if map_empty(&self.exposed_ports) {
            self.exposed_ports = other.exposed_ports.clone();
        }
    }
}

fn list_empty(list: &Option<Vec<String>>) -> bool {
    list.as_ref().map_or(true, |l| l.is_empty())
}

fn map_empty(map: &Option<BTreeMap<String, serde_json::Value>>) -> bool {
    map.as_ref().map_or(true, |m| m.is_empty())
}
