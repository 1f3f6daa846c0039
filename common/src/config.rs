//! Job configuration loaded from the JSON file handed to the master.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Share of the input drawn as the planner sample when nothing else is set.
pub const DEFAULT_SAMPLE_FRACTION: f64 = 0.1;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("unknown worker role `{0}`")]
    UnknownRole(String),

    #[error("invalid settings: {0}")]
    Invalid(String),
}

/// What a registered worker is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Mapper,
    Reducer,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Mapper => write!(f, "mapper"),
            Role::Reducer => write!(f, "reducer"),
        }
    }
}

impl FromStr for Role {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mapper" => Ok(Role::Mapper),
            "reducer" => Ok(Role::Reducer),
            other => Err(ConfigError::UnknownRole(other.to_string())),
        }
    }
}

/// A worker known to the master. Immutable once registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub role: Role,
    pub address: String,
}

impl WorkerConfig {
    pub fn new(role: Role, address: impl Into<String>) -> Self {
        Self {
            role,
            address: address.into(),
        }
    }
}

/// Shape of the job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub num_mappers: usize,
    pub num_reducers: usize,

    /// Smallest generated key.
    pub xi: i64,

    /// Largest generated key (inclusive).
    pub xf: i64,

    /// Number of keys to generate.
    pub count: usize,

    /// Fixes the generator and the sampler, for reproducible runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,

    #[serde(default = "default_sample_fraction")]
    pub sample_fraction: f64,
}

fn default_sample_fraction() -> f64 {
    DEFAULT_SAMPLE_FRACTION
}

impl Settings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.xi > self.xf {
            return Err(ConfigError::Invalid(format!(
                "xi ({}) must not exceed xf ({})",
                self.xi, self.xf
            )));
        }
        if self.xf == i64::MAX {
            return Err(ConfigError::Invalid("xf must be below i64::MAX".into()));
        }
        if self.num_mappers == 0 || self.num_reducers == 0 {
            return Err(ConfigError::Invalid(
                "numMappers and numReducers must be at least 1".into(),
            ));
        }
        if !(self.sample_fraction > 0.0 && self.sample_fraction <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "sampleFraction ({}) must lie in (0, 1]",
                self.sample_fraction
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Statically known workers; registrations are added on top of these.
    #[serde(default)]
    pub workers: Vec<WorkerConfig>,
    pub settings: Settings,
}

impl Config {
    pub fn from_json(path: &str, raw: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(raw).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })?;
        config.settings.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: display.clone(),
            source,
        })?;
        Self::from_json(&display, &raw)
    }
}
