//! hostalloc.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Top-level `hostalloc.toml` document. Every section is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostallocConfig {
    #[serde(default)]
    pub allocator: AllocatorConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub hosts: Vec<HostSeed>,
}

/// Tunables for the allocation engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocatorConfig {
    /// Run stages against paginated inventory queries and restart the
    /// pipeline when a page is exhausted.
    pub use_pagination: bool,
    /// Page size handed to paginating stages.
    pub pagination_limit: usize,
    /// Upper bound on full pipeline passes for one request.
    pub max_rounds: u32,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            use_pagination: false,
            pagination_limit: 1000,
            max_rounds: 64,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path of the redb database file.
    pub path: Option<PathBuf>,
}

/// A host entry used to seed the inventory store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostSeed {
    pub id: String,
    pub name: Option<String>,
    pub zone: String,
    pub cluster: String,
    pub hypervisor: String,
    /// Total CPU capacity in Hz.
    pub cpu_hz: u64,
    /// Total memory in bytes.
    pub memory_bytes: u64,
    /// Defaults to `cpu_hz` when absent.
    pub available_cpu_hz: Option<u64>,
    /// Defaults to `memory_bytes` when absent.
    pub available_memory_bytes: Option<u64>,
    pub status: Option<SeedStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeedStatus {
    Enabled,
    Disabled,
    Maintenance,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("allocator.pagination_limit must be greater than zero")]
    ZeroPaginationLimit,

    #[error("allocator.max_rounds must be greater than zero")]
    ZeroMaxRounds,

    #[error("duplicate host id in [[hosts]]: {0}")]
    DuplicateHost(String),

    #[error("host {0}: available capacity exceeds total capacity")]
    AvailableExceedsTotal(String),
}

impl HostallocConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: HostallocConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.allocator.pagination_limit == 0 {
            return Err(ConfigError::ZeroPaginationLimit);
        }
        if self.allocator.max_rounds == 0 {
            return Err(ConfigError::ZeroMaxRounds);
        }

        let mut seen = HashSet::new();
        for host in &self.hosts {
            if !seen.insert(host.id.as_str()) {
                return Err(ConfigError::DuplicateHost(host.id.clone()));
            }
            if host.available_cpu() > host.cpu_hz || host.available_memory() > host.memory_bytes {
                return Err(ConfigError::AvailableExceedsTotal(host.id.clone()));
            }
        }
        Ok(())
    }
}

impl HostSeed {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    pub fn available_cpu(&self) -> u64 {
        self.available_cpu_hz.unwrap_or(self.cpu_hz)
    }

    pub fn available_memory(&self) -> u64 {
        self.available_memory_bytes.unwrap_or(self.memory_bytes)
    }
}
