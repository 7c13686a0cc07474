//! hostallocd: command-line front end for the host allocation engine.
//!
//! Opens the redb host store, wires the reference stage pipeline to it and
//! runs one command:
//! - `seed`: write the `[[hosts]]` fleet from the config file
//! - `hosts`: dump hosts and capacities as JSON lines
//! - `allocate`: place a VM (or preview with `--dry-run`)
//! - `release`: give capacity back to a host
//! - `status`: enable, disable or drain a host
//! - `remove`: drop a host from the inventory
//!
//! # Usage
//!
//! ```text
//! hostallocd --config hostalloc.toml seed
//! hostallocd allocate --vm vm-42 --cpu 2000000000 --memory 4294967296 --zone zone-a
//! ```

mod commands;

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{debug, info};

use hostalloc_core::HostallocConfig;
use hostalloc_state::{HostStatus, StateStore};

const DEFAULT_CONFIG: &str = "hostalloc.toml";
const DEFAULT_DATA_DIR: &str = "/var/lib/hostalloc";
const DB_FILE: &str = "hostalloc.redb";

#[derive(Parser)]
#[command(name = "hostallocd", about = "Host allocation engine")]
struct Cli {
    /// Config file. Missing default file means built-in defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding the host store; overrides `[store] path`.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write the configured fleet into the store.
    Seed,

    /// List hosts with their capacity, one JSON object per line.
    Hosts,

    /// Place a VM on a host and reserve its capacity.
    Allocate {
        #[arg(long)]
        vm: String,

        /// Display name, defaults to the VM id.
        #[arg(long)]
        name: Option<String>,

        /// Requested CPU in Hz.
        #[arg(long)]
        cpu: u64,

        /// Requested memory in bytes.
        #[arg(long)]
        memory: u64,

        #[arg(long)]
        zone: Option<String>,

        /// Acceptable cluster; repeat for several.
        #[arg(long)]
        cluster: Vec<String>,

        #[arg(long)]
        hypervisor: Option<String>,

        /// Host to exclude; repeat for several.
        #[arg(long)]
        avoid: Vec<String>,

        /// List every qualifying host without reserving.
        #[arg(long)]
        dry_run: bool,
    },

    /// Return previously reserved capacity to a host.
    Release {
        #[arg(long)]
        host: String,

        #[arg(long)]
        cpu: u64,

        #[arg(long)]
        memory: u64,
    },

    /// Change a host's operational status.
    Status {
        #[arg(long)]
        host: String,

        #[arg(value_enum)]
        status: StatusArg,
    },

    /// Remove a decommissioned host and its capacity record.
    Remove {
        #[arg(long)]
        host: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum StatusArg {
    Enabled,
    Disabled,
    Maintenance,
}

impl From<StatusArg> for HostStatus {
    fn from(arg: StatusArg) -> Self {
        match arg {
            StatusArg::Enabled => HostStatus::Enabled,
            StatusArg::Disabled => HostStatus::Disabled,
            StatusArg::Maintenance => HostStatus::Maintenance,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries command output.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,hostallocd=debug,hostalloc=debug")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    let db_path = store_path(&config, cli.data_dir.as_deref());
    let store = open_store(&db_path)?;

    let mut out = std::io::stdout().lock();
    match cli.command {
        Command::Seed => commands::seed(&store, &config, &mut out),
        Command::Hosts => commands::list_hosts(&store, &mut out),
        Command::Allocate {
            vm,
            name,
            cpu,
            memory,
            zone,
            cluster,
            hypervisor,
            avoid,
            dry_run,
        } => {
            let request = commands::AllocateRequest {
                vm,
                name,
                cpu,
                memory,
                zone,
                clusters: cluster,
                hypervisor,
                avoid,
                dry_run,
            };
            let allocator = commands::build_allocator(&store, &config)?;
            commands::allocate(&allocator, request, &mut out).await
        }
        Command::Release { host, cpu, memory } => {
            let allocator = commands::build_allocator(&store, &config)?;
            commands::release(&allocator, &host, cpu, memory, &mut out).await
        }
        Command::Status { host, status } => {
            commands::set_status(&store, &host, status.into(), &mut out)
        }
        Command::Remove { host } => commands::remove_host(&store, &host, &mut out),
    }
}

/// Explicit `--config` must exist; the default file is optional.
fn load_config(path: Option<&Path>) -> anyhow::Result<HostallocConfig> {
    match path {
        Some(path) => HostallocConfig::from_file(path),
        None if Path::new(DEFAULT_CONFIG).exists() => HostallocConfig::from_file(Path::new(DEFAULT_CONFIG)),
        None => {
            debug!("no {DEFAULT_CONFIG} found, using defaults");
            Ok(HostallocConfig::default())
        }
    }
}

fn store_path(config: &HostallocConfig, data_dir: Option<&Path>) -> PathBuf {
    match (data_dir, &config.store.path) {
        (Some(dir), _) => dir.join(DB_FILE),
        (None, Some(path)) => path.clone(),
        (None, None) => Path::new(DEFAULT_DATA_DIR).join(DB_FILE),
    }
}

fn open_store(path: &Path) -> anyhow::Result<StateStore> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create data directory {}", parent.display()))?;
    }
    let store = StateStore::open(path)
        .with_context(|| format!("failed to open host store {}", path.display()))?;
    info!(path = ?path, "host store opened");
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_allocate_with_repeated_flags() {
        let cli = Cli::try_parse_from([
            "hostallocd",
            "--data-dir",
            "/tmp/hostalloc",
            "allocate",
            "--vm",
            "vm-1",
            "--cpu",
            "1000",
            "--memory",
            "2048",
            "--cluster",
            "c1",
            "--cluster",
            "c2",
            "--avoid",
            "host-9",
            "--dry-run",
        ])
        .unwrap();

        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/hostalloc")));
        match cli.command {
            Command::Allocate {
                vm,
                cpu,
                memory,
                cluster,
                avoid,
                dry_run,
                ..
            } => {
                assert_eq!(vm, "vm-1");
                assert_eq!((cpu, memory), (1000, 2048));
                assert_eq!(cluster, vec!["c1", "c2"]);
                assert_eq!(avoid, vec!["host-9"]);
                assert!(dry_run);
            }
            _ => panic!("expected allocate"),
        }
    }

    #[test]
    fn cli_parses_status_value() {
        let cli = Cli::try_parse_from(["hostallocd", "status", "--host", "h1", "maintenance"]).unwrap();
        match cli.command {
            Command::Status { host, status } => {
                assert_eq!(host, "h1");
                assert_eq!(HostStatus::from(status), HostStatus::Maintenance);
            }
            _ => panic!("expected status"),
        }
    }

    #[test]
    fn cli_parses_remove() {
        let cli = Cli::try_parse_from(["hostallocd", "remove", "--host", "h1"]).unwrap();
        assert!(matches!(cli.command, Command::Remove { host } if host == "h1"));
    }

    #[test]
    fn data_dir_overrides_configured_path() {
        let mut config = HostallocConfig::default();
        assert_eq!(
            store_path(&config, None),
            PathBuf::from("/var/lib/hostalloc/hostalloc.redb")
        );

        config.store.path = Some(PathBuf::from("/srv/fleet.redb"));
        assert_eq!(store_path(&config, None), PathBuf::from("/srv/fleet.redb"));
        assert_eq!(
            store_path(&config, Some(Path::new("/data"))),
            PathBuf::from("/data/hostalloc.redb")
        );
    }

    #[test]
    fn explicit_config_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_config(Some(&dir.path().join("missing.toml"))).is_err());
    }

    #[test]
    fn open_store_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/state").join(DB_FILE);
        open_store(&path).unwrap();
        assert!(path.exists());
    }
}
