//! Reference stages.
//!
//! Enough to run the engine end-to-end against a [`StateStore`]:
//! inventory lookup (paginated when enabled), host status, avoid list, and
//! a capacity pre-filter over the snapshot read by the inventory stage.

use std::sync::Arc;

use async_trait::async_trait;

use hostalloc_state::StateStore;

use crate::stage::{AllocationStage, StageFailure, StageInput, StageOutcome};

/// Reads hosts from the store and keeps those matching the topology
/// constraints. With pagination on, each invocation claims the next page.
pub struct InventoryStage {
    store: StateStore,
}

impl InventoryStage {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl AllocationStage for InventoryStage {
    fn name(&self) -> &str {
        "inventory"
    }

    async fn run(&self, input: StageInput) -> anyhow::Result<StageOutcome> {
        let hosts = match &input.pagination {
            Some(page) => {
                let window = page.next_page();
                let hosts = self.store.list_hosts_page(window.offset, window.limit)?;
                if hosts.is_empty() {
                    return Ok(StageOutcome::Fail(StageFailure::NoAvailableHost(format!(
                        "inventory has no hosts past offset {}",
                        window.offset
                    ))));
                }
                hosts
            }
            None => self.store.list_hosts()?,
        };

        let constraints = &input.spec.constraints;
        let matching = hosts
            .into_iter()
            .filter(|h| constraints.matches_topology(h))
            .collect();
        Ok(StageOutcome::narrowed(matching, input.pagination.as_deref(), || {
            format!(
                "no host matches zone {:?}, clusters {:?}, hypervisor {:?}",
                constraints.zone_id, constraints.cluster_ids, constraints.hypervisor
            )
        }))
    }
}

/// Drops disabled hosts and hosts in maintenance.
pub struct HostStatusStage;

#[async_trait]
impl AllocationStage for HostStatusStage {
    fn name(&self) -> &str {
        "host-status"
    }

    async fn run(&self, mut input: StageInput) -> anyhow::Result<StageOutcome> {
        let enabled = input
            .take_candidates(self.name())?
            .into_iter()
            .filter(|h| h.is_enabled())
            .collect();
        Ok(StageOutcome::narrowed(enabled, input.pagination.as_deref(), || {
            "no enabled host among candidates".to_string()
        }))
    }
}

/// Drops hosts listed in the request's avoid list.
pub struct AvoidHostStage;

#[async_trait]
impl AllocationStage for AvoidHostStage {
    fn name(&self) -> &str {
        "avoid-host"
    }

    async fn run(&self, mut input: StageInput) -> anyhow::Result<StageOutcome> {
        let spec = Arc::clone(&input.spec);
        let kept = input
            .take_candidates(self.name())?
            .into_iter()
            .filter(|h| !spec.constraints.avoids(&h.id))
            .collect();
        Ok(StageOutcome::narrowed(kept, input.pagination.as_deref(), || {
            format!("every candidate is in the avoid list {:?}", spec.constraints.avoid_host_ids)
        }))
    }
}

/// Keeps hosts whose capacity snapshot could take the request.
///
/// The snapshot may be stale; the reservation phase is authoritative.
pub struct CapacityStage;

#[async_trait]
impl AllocationStage for CapacityStage {
    fn name(&self) -> &str {
        "capacity"
    }

    async fn run(&self, mut input: StageInput) -> anyhow::Result<StageOutcome> {
        let spec = Arc::clone(&input.spec);
        let fitting = input
            .take_candidates(self.name())?
            .into_iter()
            .filter(|h| h.capacity.try_reserve(spec.cpu_hz, spec.memory_bytes).is_some())
            .collect();
        Ok(StageOutcome::narrowed(fitting, input.pagination.as_deref(), || {
            format!(
                "no candidate has cpu[{} Hz] and memory[{} bytes] available",
                spec.cpu_hz, spec.memory_bytes
            )
        }))
    }
}

/// inventory → host-status → avoid-host → capacity.
pub fn standard_pipeline(store: StateStore) -> Vec<Arc<dyn AllocationStage>> {
    vec![
        Arc::new(InventoryStage::new(store)),
        Arc::new(HostStatusStage),
        Arc::new(AvoidHostStage),
        Arc::new(CapacityStage),
    ]
}
