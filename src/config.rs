// src/config.rs

//! Manages daemon configuration: loading, resolving dynamic values, and
//! validation. Follows the teacher's `Config::from_file` idiom, but the raw
//! shape is orchestrator-specific: listen ports, the certs root, the local
//! node identity, initial cluster membership, per-object static
//! definitions, and heartbeat transport definitions (spec.md §6,
//! SPEC_FULL.md §2).

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::model::instance::{OrchestratePolicy, PlacementPolicy, Topology};

fn default_raw_port() -> u16 {
    1214
}
fn default_https_port() -> u16 {
    1215
}
fn default_bind_host() -> String {
    "0.0.0.0".to_string()
}
fn default_root() -> String {
    "/var/lib/clustord".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_hb_timeout() -> Duration {
    Duration::from_secs(9)
}
fn default_ready_duration() -> Duration {
    Duration::from_secs(5)
}
fn default_drain_duration() -> Duration {
    Duration::from_millis(40)
}
fn default_set_monitor_deadline() -> Duration {
    Duration::from_millis(300)
}
fn default_metrics_port() -> u16 {
    9100
}

/// A statically-defined object: parsing the on-disk object config stub
/// format is out of scope (SPEC_FULL.md §2); this is the already-resolved
/// form the daemon consumes at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectConfig {
    pub path: String,
    pub scope: Vec<String>,
    #[serde(default)]
    pub topology: Topology,
    #[serde(default)]
    pub placement_policy: PlacementPolicy,
    #[serde(default)]
    pub orchestrate: OrchestratePolicy,
    /// Automatic restart attempts allowed after `start-failed` before the
    /// failure becomes fatal-per-instance (spec.md §7). `0` by default.
    #[serde(default)]
    pub restart_limit: u32,
}

/// One configured heartbeat transport: a name, its peer address list, and
/// the liveness timeout hbctrl applies to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatTransportConfig {
    pub name: String,
    pub peers: Vec<(String, SocketAddr)>,
    pub bind_addr: SocketAddr,
    #[serde(default = "default_hb_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,
}

fn default_hb_poll_interval() -> Duration {
    Duration::from_secs(1)
}

/// A raw representation of the config file before defaults are applied.
#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default = "default_bind_host")]
    bind_host: String,
    #[serde(default = "default_raw_port")]
    raw_port: u16,
    #[serde(default = "default_https_port")]
    https_port: u16,
    #[serde(default = "default_root")]
    root: String,
    #[serde(default = "default_log_level")]
    log_level: String,
    localhost: String,
    #[serde(default)]
    cluster_nodes: Vec<String>,
    #[serde(default)]
    objects: Vec<ObjectConfig>,
    #[serde(default)]
    heartbeats: Vec<HeartbeatTransportConfig>,
    #[serde(default = "default_hb_timeout", with = "humantime_serde")]
    heartbeat_timeout: Duration,
    #[serde(default = "default_ready_duration", with = "humantime_serde")]
    ready_duration: Duration,
    #[serde(default = "default_drain_duration", with = "humantime_serde")]
    drain_duration: Duration,
    #[serde(
        default = "default_set_monitor_deadline",
        with = "humantime_serde"
    )]
    set_monitor_deadline: Duration,
    #[serde(default = "default_metrics_port")]
    metrics_port: u16,
}

/// The final, validated daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_host: String,
    pub raw_port: u16,
    pub https_port: u16,
    pub root: String,
    pub log_level: String,
    pub localhost: String,
    pub cluster_nodes: Vec<String>,
    pub objects: Vec<ObjectConfig>,
    pub heartbeats: Vec<HeartbeatTransportConfig>,
    pub heartbeat_timeout: Duration,
    pub ready_duration: Duration,
    pub drain_duration: Duration,
    pub set_monitor_deadline: Duration,
    pub metrics_port: u16,
}

impl Config {
    /// Creates a new `Config` by reading and parsing a TOML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file at '{path}'"))?;
        let raw: RawConfig = toml::from_str(&contents)
            .with_context(|| format!("failed to parse TOML from '{path}'"))?;

        let config = Config {
            bind_host: raw.bind_host,
            raw_port: raw.raw_port,
            https_port: raw.https_port,
            root: raw.root,
            log_level: raw.log_level,
            localhost: raw.localhost,
            cluster_nodes: raw.cluster_nodes,
            objects: raw.objects,
            heartbeats: raw.heartbeats,
            heartbeat_timeout: raw.heartbeat_timeout,
            ready_duration: raw.ready_duration,
            drain_duration: raw.drain_duration,
            set_monitor_deadline: raw.set_monitor_deadline,
            metrics_port: raw.metrics_port,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn raw_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.bind_host, self.raw_port)
            .parse()
            .context("invalid raw listen address")
    }

    pub fn https_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.bind_host, self.https_port)
            .parse()
            .context("invalid https listen address")
    }

    pub fn certs_dir(&self) -> std::path::PathBuf {
        std::path::Path::new(&self.root).join("certs")
    }

    pub fn lsnr_dir(&self) -> std::path::PathBuf {
        std::path::Path::new(&self.root).join("lsnr")
    }

    pub fn var_dir(&self) -> std::path::PathBuf {
        std::path::Path::new(&self.root).join("var")
    }

    fn validate(&self) -> Result<()> {
        if self.localhost.trim().is_empty() {
            return Err(anyhow!("localhost cannot be empty"));
        }
        if self.raw_port == 0 || self.https_port == 0 {
            return Err(anyhow!("raw_port and https_port must be non-zero"));
        }
        if self.raw_port == self.https_port {
            return Err(anyhow!("raw_port and https_port must differ"));
        }
        if self.metrics_port == self.raw_port || self.metrics_port == self.https_port {
            return Err(anyhow!("metrics_port must not collide with raw_port/https_port"));
        }
        for object in &self.objects {
            if object.scope.is_empty() {
                return Err(anyhow!("object {} has an empty scope", object.path));
            }
        }
        Ok(())
    }
}
