use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Keyspace holding the per-tier metric tables. Required.
    pub keyspace: String,

    /// Contact points, a single host or a list. Default: "localhost".
    #[serde(default = "default_cluster")]
    pub cluster: Cluster,

    /// Advisory replication factor, recorded for schema tooling. Default: 1.
    #[serde(default = "default_repfactor")]
    pub repfactor: u32,

    /// Ingest channel capacity. Default: 10000.
    #[serde(default = "default_chan_size")]
    pub chan_size: usize,

    /// Maximum samples per write batch. Default: 500.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Cluster username; requires `password`.
    #[serde(default)]
    pub username: Option<String>,

    /// Cluster password; requires `username`.
    #[serde(default)]
    pub password: Option<String>,

    /// Reserved.
    #[serde(default)]
    pub hints: Option<serde_yaml::Value>,
}

/// One or several cluster contact points.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Cluster {
    One(String),
    Many(Vec<String>),
}

impl Cluster {
    /// Contact points as a list.
    pub fn contact_points(&self) -> Vec<String> {
        match self {
            Cluster::One(host) => vec![host.clone()],
            Cluster::Many(hosts) => hosts.clone(),
        }
    }
}

/// Session compression negotiated at connection time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Lz4,
}

/// Request routing policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadBalancing {
    TokenAwareRoundRobin,
}

/// Cluster credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Driver-facing construction options for whichever adapter hosts the
/// session port.
#[derive(Debug, Clone)]
pub struct ClusterOptions {
    pub contact_points: Vec<String>,
    pub compression: Compression,
    pub load_balancing: LoadBalancing,
    pub credentials: Option<Credentials>,
}

// --- Default value functions ---

fn default_cluster() -> Cluster {
    Cluster::One("localhost".to_string())
}

fn default_repfactor() -> u32 {
    1
}

fn default_chan_size() -> usize {
    10000
}

fn default_batch_size() -> usize {
    500
}

// --- Validation and loading ---

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        let cfg: Config = serde_yaml::from_str(&data)
            .with_context(|| format!("parsing config file {}", path.display()))?;

        cfg.validate()?;

        Ok(cfg)
    }

    /// Validate the configuration for required fields and consistency.
    pub fn validate(&self) -> Result<()> {
        if self.keyspace.is_empty() {
            bail!("keyspace is required");
        }

        if self.chan_size == 0 {
            bail!("chan_size must be positive");
        }

        if self.batch_size == 0 {
            bail!("batch_size must be positive");
        }

        if self.cluster.contact_points().is_empty() {
            bail!("cluster needs at least one contact point");
        }

        if self.username.is_some() != self.password.is_some() {
            bail!("username and password must be set together");
        }

        Ok(())
    }

    /// Options a driver adapter needs to build the cluster session.
    pub fn cluster_options(&self) -> ClusterOptions {
        let credentials = match (&self.username, &self.password) {
            (Some(username), Some(password)) => Some(Credentials {
                username: username.clone(),
                password: password.clone(),
            }),
            _ => None,
        };

        ClusterOptions {
            contact_points: self.cluster.contact_points(),
            compression: Compression::Lz4,
            load_balancing: LoadBalancing::TokenAwareRoundRobin,
            credentials,
        }
    }
}
