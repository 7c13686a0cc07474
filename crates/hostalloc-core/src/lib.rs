pub mod config;

pub use config::{
    AllocatorConfig, ConfigError, HostSeed, HostallocConfig, SeedStatus, StoreConfig,
};
