//! Allocation requests.

use serde::{Deserialize, Serialize};

use hostalloc_state::HostRecord;

/// Resource demand and placement constraints for one VM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationSpec {
    pub vm_id: String,
    pub vm_name: String,
    /// Requested CPU in Hz.
    pub cpu_hz: u64,
    /// Requested memory in bytes.
    pub memory_bytes: u64,
    #[serde(default)]
    pub constraints: PlacementConstraints,
    /// Report qualifying hosts without reserving capacity.
    #[serde(default)]
    pub dry_run: bool,
}

/// Topology filters. Empty fields match every host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementConstraints {
    pub zone_id: Option<String>,
    /// Any of these clusters.
    #[serde(default)]
    pub cluster_ids: Vec<String>,
    pub hypervisor: Option<String>,
    /// Hosts that must not be chosen, e.g. the source host of a migration.
    #[serde(default)]
    pub avoid_host_ids: Vec<String>,
}

impl AllocationSpec {
    pub fn new(vm_id: impl Into<String>, cpu_hz: u64, memory_bytes: u64) -> Self {
        let vm_id = vm_id.into();
        Self {
            vm_name: vm_id.clone(),
            vm_id,
            cpu_hz,
            memory_bytes,
            constraints: PlacementConstraints::default(),
            dry_run: false,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.vm_name = name.into();
        self
    }

    pub fn in_zone(mut self, zone_id: impl Into<String>) -> Self {
        self.constraints.zone_id = Some(zone_id.into());
        self
    }

    pub fn in_cluster(mut self, cluster_id: impl Into<String>) -> Self {
        self.constraints.cluster_ids.push(cluster_id.into());
        self
    }

    pub fn with_hypervisor(mut self, hypervisor: impl Into<String>) -> Self {
        self.constraints.hypervisor = Some(hypervisor.into());
        self
    }

    pub fn avoiding(mut self, host_id: impl Into<String>) -> Self {
        self.constraints.avoid_host_ids.push(host_id.into());
        self
    }

    pub fn as_dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }
}

impl PlacementConstraints {
    /// Whether a host satisfies the zone, cluster and hypervisor filters.
    pub fn matches_topology(&self, host: &HostRecord) -> bool {
        if self.zone_id.as_ref().is_some_and(|zone| *zone != host.zone_id) {
            return false;
        }
        if !self.cluster_ids.is_empty() && !self.cluster_ids.contains(&host.cluster_id) {
            return false;
        }
        if self
            .hypervisor
            .as_ref()
            .is_some_and(|hv| !hv.eq_ignore_ascii_case(&host.hypervisor))
        {
            return false;
        }
        true
    }

    pub fn avoids(&self, host_id: &str) -> bool {
        self.avoid_host_ids.iter().any(|id| id == host_id)
    }
}
