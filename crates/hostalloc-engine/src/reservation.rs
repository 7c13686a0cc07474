//! Capacity reservation services.
//!
//! Both implementations apply [`HostCapacity::try_reserve`] under an
//! exclusive lock:
//!
//! - [`StateStore`]: durable; one redb write transaction per reservation.
//!   redb admits a single writer, so reservations queue across all hosts.
//! - [`CapacityLedger`]: in-memory; one mutex per host, so reservations
//!   against different hosts never wait on each other.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use hostalloc_state::{HostCapacity, HostId, HostRecord, StateResult, StateStore};

/// Atomic check-then-debit of host capacity.
///
/// `Ok(Some(updated))` means the debit was committed, `Ok(None)` means it was
/// refused and nothing changed. Calls may block on the host lock.
pub trait CapacityReservation: Send + Sync + 'static {
    fn reserve(&self, host_id: &str, cpu: u64, memory: u64) -> StateResult<Option<HostCapacity>>;

    /// Return capacity to a host, e.g. when a placement is rolled back.
    fn release(&self, host_id: &str, cpu: u64, memory: u64) -> StateResult<Option<HostCapacity>>;
}

impl CapacityReservation for StateStore {
    fn reserve(&self, host_id: &str, cpu: u64, memory: u64) -> StateResult<Option<HostCapacity>> {
        self.reserve_capacity(host_id, cpu, memory)
    }

    fn release(&self, host_id: &str, cpu: u64, memory: u64) -> StateResult<Option<HostCapacity>> {
        self.release_capacity(host_id, cpu, memory)
    }
}

/// In-memory capacity book with per-host locks.
#[derive(Default)]
pub struct CapacityLedger {
    hosts: RwLock<HashMap<HostId, Arc<Mutex<HostCapacity>>>>,
}

impl CapacityLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_hosts<'a>(hosts: impl IntoIterator<Item = &'a HostRecord>) -> Self {
        let ledger = Self::new();
        for host in hosts {
            ledger.insert(&host.id, host.capacity);
        }
        ledger
    }

    /// Track a host, replacing any previous capacity.
    pub fn insert(&self, host_id: &str, capacity: HostCapacity) {
        self.hosts
            .write()
            .insert(host_id.to_string(), Arc::new(Mutex::new(capacity)));
    }

    pub fn capacity(&self, host_id: &str) -> Option<HostCapacity> {
        let cell = self.cell(host_id)?;
        let current = *cell.lock();
        Some(current)
    }

    /// The host's lock cell. The map lock is released before the cell is used.
    fn cell(&self, host_id: &str) -> Option<Arc<Mutex<HostCapacity>>> {
        self.hosts.read().get(host_id).cloned()
    }
}

impl CapacityReservation for CapacityLedger {
    fn reserve(&self, host_id: &str, cpu: u64, memory: u64) -> StateResult<Option<HostCapacity>> {
        let Some(cell) = self.cell(host_id) else {
            debug!(host = %host_id, "no capacity record in ledger");
            return Ok(None);
        };
        let mut current = cell.lock();
        let updated = current.try_reserve(cpu, memory);
        if let Some(next) = updated {
            *current = next;
        }
        Ok(updated)
    }

    fn release(&self, host_id: &str, cpu: u64, memory: u64) -> StateResult<Option<HostCapacity>> {
        let Some(cell) = self.cell(host_id) else {
            return Ok(None);
        };
        let mut current = cell.lock();
        *current = current.released(cpu, memory);
        Ok(Some(*current))
    }
}
