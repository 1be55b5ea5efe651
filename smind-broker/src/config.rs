//! TOML configuration for the hub daemon and the remote node.
//!
//! Values are merged in order: built-in defaults, then the config file
//! (given explicitly, or the first of `~/.config/sensor-minder/<name>.toml`
//! and `/etc/sensor-minder/<name>.toml` that exists), then `SMIND_*`
//! environment variables:
//!
//! - `SMIND_NODE_ID`: local peer id
//! - `SMIND_LISTEN`: UDP listen address
//! - `SMIND_LOG_LEVEL`: log level filter

use serde::{de::DeserializeOwned, Deserialize};
use smind_sensor::{DeviceSensor, SensorType, DEFAULT_CAPACITY};
use std::{
    collections::HashMap,
    net::SocketAddr,
    path::{Path, PathBuf},
};
use thiserror::Error;

use crate::PeerId;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O Error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("Invalid value for {key}: {value}")]
    Override { key: &'static str, value: String },
}

/// Address book entry for a paired peer
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PeerConfig {
    pub id: PeerId,
    /// Display name, defaults to the id
    #[serde(default)]
    pub name: Option<String>,
    pub addr: SocketAddr,
}

impl PeerConfig {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SensorConfig {
    pub sensor_type: SensorType,
    pub name: String,
}

impl From<&SensorConfig> for DeviceSensor {
    fn from(s: &SensorConfig) -> Self {
        DeviceSensor::new(s.sensor_type, s.name.clone())
    }
}

/// Sensors to request from a peer as soon as the hub starts
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SelectionConfig {
    pub peer: PeerId,
    pub sensors: Vec<SensorConfig>,
}

impl SelectionConfig {
    pub fn device_sensors(&self) -> Vec<DeviceSensor> {
        self.sensors.iter().map(DeviceSensor::from).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HubConfig {
    #[serde(default = "default_hub_id")]
    pub node_id: PeerId,
    #[serde(default = "default_hub_listen")]
    pub listen: SocketAddr,
    /// Label sent with the closing notice on shutdown
    #[serde(default = "default_hub_label")]
    pub label: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// Responses that may wait for parsing before new ones are dropped
    #[serde(default = "default_worker_queue")]
    pub worker_queue: usize,
    /// Interval of the daemon's summary tick
    #[serde(default = "default_tick_millis")]
    pub tick_millis: u64,
    #[serde(default)]
    pub peers: Vec<PeerConfig>,
    #[serde(default)]
    pub selections: Vec<SelectionConfig>,
}

fn default_hub_id() -> PeerId {
    "hub".to_string()
}
fn default_hub_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 47_000))
}
fn default_hub_label() -> String {
    "sensor-minder hub".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_dir() -> PathBuf {
    PathBuf::from("./logs")
}
fn default_worker_queue() -> usize {
    64
}
fn default_tick_millis() -> u64 {
    1000
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            node_id: default_hub_id(),
            listen: default_hub_listen(),
            label: default_hub_label(),
            log_level: default_log_level(),
            log_dir: default_log_dir(),
            worker_queue: default_worker_queue(),
            tick_millis: default_tick_millis(),
            peers: vec![],
            selections: vec![],
        }
    }
}

impl HubConfig {
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config: Self = load_file("hub", path)?;
        config.apply_overrides(|k| std::env::var(k).ok())?;
        Ok(config)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        apply_common(
            lookup,
            &mut self.node_id,
            &mut self.listen,
            &mut self.log_level,
        )
    }

    pub fn peer_addrs(&self) -> HashMap<PeerId, SocketAddr> {
        self.peers.iter().map(|p| (p.id.clone(), p.addr)).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeConfig {
    #[serde(default = "default_node_id")]
    pub node_id: PeerId,
    #[serde(default = "default_node_listen")]
    pub listen: SocketAddr,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// How often a streaming session samples and sends
    #[serde(default = "default_interval_millis")]
    pub interval_millis: u64,
    #[serde(default = "default_batch_capacity")]
    pub batch_capacity: usize,
    #[serde(default = "default_node_sensors")]
    pub sensors: Vec<SensorConfig>,
    /// Hubs allowed to request data from this node
    #[serde(default)]
    pub peers: Vec<PeerConfig>,
}

fn default_node_id() -> PeerId {
    "node".to_string()
}
fn default_node_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 47_001))
}
fn default_interval_millis() -> u64 {
    1000
}
fn default_batch_capacity() -> usize {
    DEFAULT_CAPACITY
}
fn default_node_sensors() -> Vec<SensorConfig> {
    vec![
        SensorConfig {
            sensor_type: DeviceSensor::ACCELEROMETER,
            name: "ACCELEROMETER".to_string(),
        },
        SensorConfig {
            sensor_type: DeviceSensor::HEART_RATE,
            name: "HEART_RATE".to_string(),
        },
        SensorConfig {
            sensor_type: DeviceSensor::LIGHT,
            name: "LIGHT".to_string(),
        },
    ]
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            listen: default_node_listen(),
            log_level: default_log_level(),
            interval_millis: default_interval_millis(),
            batch_capacity: default_batch_capacity(),
            sensors: default_node_sensors(),
            peers: vec![],
        }
    }
}

impl NodeConfig {
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config: Self = load_file("node", path)?;
        config.apply_overrides(|k| std::env::var(k).ok())?;
        Ok(config)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        apply_common(
            lookup,
            &mut self.node_id,
            &mut self.listen,
            &mut self.log_level,
        )
    }

    pub fn device_sensors(&self) -> Vec<DeviceSensor> {
        self.sensors.iter().map(DeviceSensor::from).collect()
    }

    pub fn peer_addrs(&self) -> HashMap<PeerId, SocketAddr> {
        self.peers.iter().map(|p| (p.id.clone(), p.addr)).collect()
    }
}

fn apply_common<F>(
    lookup: F,
    node_id: &mut PeerId,
    listen: &mut SocketAddr,
    log_level: &mut String,
) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(id) = lookup("SMIND_NODE_ID") {
        *node_id = id;
    }
    if let Some(addr) = lookup("SMIND_LISTEN") {
        *listen = addr.parse().map_err(|_| ConfigError::Override {
            key: "SMIND_LISTEN",
            value: addr.clone(),
        })?;
    }
    if let Some(level) = lookup("SMIND_LOG_LEVEL") {
        *log_level = level;
    }
    if log_level.parse::<log::LevelFilter>().is_err() {
        return Err(ConfigError::Override {
            key: "log_level",
            value: log_level.clone(),
        });
    }
    Ok(())
}

fn config_paths(name: &str) -> Vec<PathBuf> {
    let mut out = Vec::new();
    if let Some(home) = std::env::var_os("HOME").map(PathBuf::from) {
        out.push(home.join(format!(".config/sensor-minder/{name}.toml")));
    }
    out.push(PathBuf::from(format!("/etc/sensor-minder/{name}.toml")));
    out
}

fn load_file<T>(name: &str, path: Option<&Path>) -> Result<T, ConfigError>
where
    T: DeserializeOwned + Default,
{
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => match config_paths(name).into_iter().find(|p| p.exists()) {
            Some(p) => p,
            None => {
                log::info!("No {name} config file found, using defaults");
                return Ok(T::default());
            }
        },
    };

    log::info!("Loading config from {}", path.display());
    let contents = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;
    parse(&contents, path)
}

fn parse<T: DeserializeOwned>(contents: &str, path: PathBuf) -> Result<T, ConfigError> {
    toml::from_str(contents).map_err(|source| ConfigError::Parse { path, source })
}
