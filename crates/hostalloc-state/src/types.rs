//! Domain types for the host inventory store.
//!
//! A [`HostRecord`] is what callers read and what stages filter. Its
//! [`HostCapacity`] sub-record is persisted separately and only changes
//! through [`HostCapacity::try_reserve`] / [`HostCapacity::released`] inside a
//! locked unit of work.

use hostalloc_core::{HostSeed, SeedStatus};
use serde::{Deserialize, Serialize};

/// Unique identifier for a physical host.
pub type HostId = String;

// ── Host ──────────────────────────────────────────────────────────

/// A physical host together with a snapshot of its capacity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HostRecord {
    pub id: HostId,
    pub name: String,
    pub zone_id: String,
    pub cluster_id: String,
    /// Hypervisor type, e.g. "kvm".
    pub hypervisor: String,
    pub status: HostStatus,
    pub capacity: HostCapacity,
}

/// Operational status of a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostStatus {
    Enabled,
    Disabled,
    Maintenance,
}

/// CPU (Hz) and memory (bytes) capacity of a host.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct HostCapacity {
    pub total_cpu: u64,
    pub total_memory: u64,
    pub available_cpu: u64,
    pub available_memory: u64,
}

impl HostCapacity {
    /// A fully free host.
    pub fn new(total_cpu: u64, total_memory: u64) -> Self {
        Self {
            total_cpu,
            total_memory,
            available_cpu: total_cpu,
            available_memory: total_memory,
        }
    }

    /// Capacity left after debiting `cpu` and `memory`, or `None` when the
    /// debit must be refused.
    ///
    /// Refused when memory demand is zero, or when either resource would end
    /// at or below zero. A host is never drained to exactly zero CPU or
    /// memory.
    pub fn try_reserve(&self, cpu: u64, memory: u64) -> Option<HostCapacity> {
        if memory == 0 {
            return None;
        }
        let available_cpu = self.available_cpu.checked_sub(cpu).filter(|left| *left > 0)?;
        let available_memory = self
            .available_memory
            .checked_sub(memory)
            .filter(|left| *left > 0)?;
        Some(HostCapacity {
            available_cpu,
            available_memory,
            ..*self
        })
    }

    /// Capacity after returning `cpu` and `memory`, clamped to the totals.
    pub fn released(&self, cpu: u64, memory: u64) -> HostCapacity {
        HostCapacity {
            available_cpu: self.available_cpu.saturating_add(cpu).min(self.total_cpu),
            available_memory: self
                .available_memory
                .saturating_add(memory)
                .min(self.total_memory),
            ..*self
        }
    }
}

impl HostRecord {
    pub fn is_enabled(&self) -> bool {
        self.status == HostStatus::Enabled
    }
}

impl From<SeedStatus> for HostStatus {
    fn from(status: SeedStatus) -> Self {
        match status {
            SeedStatus::Enabled => HostStatus::Enabled,
            SeedStatus::Disabled => HostStatus::Disabled,
            SeedStatus::Maintenance => HostStatus::Maintenance,
        }
    }
}

impl From<&HostSeed> for HostRecord {
    fn from(seed: &HostSeed) -> Self {
        HostRecord {
            id: seed.id.clone(),
            name: seed.display_name().to_string(),
            zone_id: seed.zone.clone(),
            cluster_id: seed.cluster.clone(),
            hypervisor: seed.hypervisor.clone(),
            status: seed.status.map(HostStatus::from).unwrap_or(HostStatus::Enabled),
            capacity: HostCapacity {
                total_cpu: seed.cpu_hz,
                total_memory: seed.memory_bytes,
                available_cpu: seed.available_cpu(),
                available_memory: seed.available_memory(),
            },
        }
    }
}
