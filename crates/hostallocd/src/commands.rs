//! Command implementations. Each writes its result to `out` as JSON.

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, bail};
use tracing::{debug, info};

use hostalloc_core::HostallocConfig;
use hostalloc_engine::{AllocationSpec, HostAllocator, standard_pipeline};
use hostalloc_state::{HostRecord, HostStatus, StateStore};

/// Flags of the `allocate` command.
#[derive(Debug, Clone, Default)]
pub struct AllocateRequest {
    pub vm: String,
    pub name: Option<String>,
    pub cpu: u64,
    pub memory: u64,
    pub zone: Option<String>,
    pub clusters: Vec<String>,
    pub hypervisor: Option<String>,
    pub avoid: Vec<String>,
    pub dry_run: bool,
}

impl AllocateRequest {
    fn into_spec(self) -> AllocationSpec {
        let mut spec = AllocationSpec::new(self.vm, self.cpu, self.memory);
        if let Some(name) = self.name {
            spec = spec.named(name);
        }
        if let Some(zone) = self.zone {
            spec = spec.in_zone(zone);
        }
        for cluster in self.clusters {
            spec = spec.in_cluster(cluster);
        }
        if let Some(hypervisor) = self.hypervisor {
            spec = spec.with_hypervisor(hypervisor);
        }
        for host in self.avoid {
            spec = spec.avoiding(host);
        }
        if self.dry_run {
            spec = spec.as_dry_run();
        }
        spec
    }
}

/// Reference pipeline over `store`, reserving against the same store.
pub fn build_allocator(store: &StateStore, config: &HostallocConfig) -> anyhow::Result<HostAllocator> {
    let allocator = HostAllocator::builder(Arc::new(store.clone()))
        .name("hostallocd")
        .stages(standard_pipeline(store.clone()))
        .config(config.allocator.clone())
        .build()?;
    let settings = allocator.config();
    debug!(
        allocator = allocator.name(),
        stages = ?allocator.stage_names(),
        pagination = settings.use_pagination,
        page_limit = settings.pagination_limit,
        max_rounds = settings.max_rounds,
        "allocator ready"
    );
    Ok(allocator)
}

/// Upsert every configured host. Existing capacity is overwritten.
pub fn seed(store: &StateStore, config: &HostallocConfig, out: &mut impl Write) -> anyhow::Result<()> {
    for seed in &config.hosts {
        let host = HostRecord::from(seed);
        store
            .put_host(&host)
            .with_context(|| format!("failed to seed host {}", host.id))?;
        writeln!(out, "{}", serde_json::to_string(&host)?)?;
    }
    info!(hosts = config.hosts.len(), "fleet seeded");
    Ok(())
}

pub fn list_hosts(store: &StateStore, out: &mut impl Write) -> anyhow::Result<()> {
    for host in store.list_hosts()? {
        writeln!(out, "{}", serde_json::to_string(&host)?)?;
    }
    Ok(())
}

pub async fn allocate(
    allocator: &HostAllocator,
    request: AllocateRequest,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    let spec = request.into_spec();
    let vm = spec.vm_id.clone();
    let placement = allocator
        .execute(spec)
        .await
        .with_context(|| format!("allocation for vm {vm} failed"))?;
    writeln!(out, "{}", serde_json::to_string_pretty(&placement)?)?;
    Ok(())
}

pub async fn release(
    allocator: &HostAllocator,
    host_id: &str,
    cpu: u64,
    memory: u64,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    let Some(capacity) = allocator.release(host_id, cpu, memory).await? else {
        bail!("host {host_id} has no capacity record");
    };
    writeln!(out, "{}", serde_json::to_string(&capacity)?)?;
    Ok(())
}

pub fn set_status(
    store: &StateStore,
    host_id: &str,
    status: HostStatus,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    store.set_host_status(host_id, status)?;
    info!(host = %host_id, ?status, "host status changed");
    let host = store
        .get_host(host_id)?
        .with_context(|| format!("host {host_id} vanished after status change"))?;
    writeln!(out, "{}", serde_json::to_string(&host)?)?;
    Ok(())
}

/// Drop a host and its capacity record from the store.
pub fn remove_host(store: &StateStore, host_id: &str, out: &mut impl Write) -> anyhow::Result<()> {
    if !store.delete_host(host_id)? {
        bail!("host {host_id} not found");
    }
    info!(host = %host_id, "host removed");
    writeln!(out, "{}", serde_json::json!({ "removed": host_id }))?;
    Ok(())
}
