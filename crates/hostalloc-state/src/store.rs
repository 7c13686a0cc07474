//! StateStore: redb-backed host inventory and capacity persistence.
//!
//! Inventory rows and capacity rows are stored in separate tables and joined
//! on read. Capacity changes go through [`StateStore::reserve_capacity`] and
//! [`StateStore::release_capacity`], each a single write transaction.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Persisted inventory columns of a host; capacity lives in `HOST_CAPACITY`.
#[derive(Serialize, Deserialize)]
struct HostRow {
    id: HostId,
    name: String,
    zone_id: String,
    cluster_id: String,
    hypervisor: String,
    status: HostStatus,
}

impl HostRow {
    fn from_record(host: &HostRecord) -> Self {
        Self {
            id: host.id.clone(),
            name: host.name.clone(),
            zone_id: host.zone_id.clone(),
            cluster_id: host.cluster_id.clone(),
            hypervisor: host.hypervisor.clone(),
            status: host.status,
        }
    }

    fn into_record(self, capacity: HostCapacity) -> HostRecord {
        HostRecord {
            id: self.id,
            name: self.name,
            zone_id: self.zone_id,
            cluster_id: self.cluster_id,
            hypervisor: self.hypervisor,
            status: self.status,
            capacity,
        }
    }
}

fn load_capacity<T>(table: &T, host_id: &str) -> StateResult<Option<HostCapacity>>
where
    T: ReadableTable<&'static str, &'static [u8]>,
{
    match table.get(host_id).map_err(map_err!(Storage))? {
        Some(guard) => {
            let capacity: HostCapacity =
                serde_json::from_slice(guard.value()).map_err(map_err!(Codec))?;
            Ok(Some(capacity))
        }
        None => Ok(None),
    }
}

fn decode_host<T>(row: &[u8], capacities: &T) -> StateResult<HostRecord>
where
    T: ReadableTable<&'static str, &'static [u8]>,
{
    let row: HostRow = serde_json::from_slice(row).map_err(map_err!(Codec))?;
    let capacity =
        load_capacity(capacities, &row.id)?.ok_or_else(|| StateError::MissingCapacity(row.id.clone()))?;
    Ok(row.into_record(capacity))
}

/// Thread-safe host store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "host store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory host store opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(HOSTS).map_err(map_err!(Table))?;
        txn.open_table(HOST_CAPACITY).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Inventory ──────────────────────────────────────────────────

    /// Insert or replace a host, including its capacity row.
    pub fn put_host(&self, host: &HostRecord) -> StateResult<()> {
        let row = serde_json::to_vec(&HostRow::from_record(host)).map_err(map_err!(Codec))?;
        let capacity = serde_json::to_vec(&host.capacity).map_err(map_err!(Codec))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut hosts = txn.open_table(HOSTS).map_err(map_err!(Table))?;
            hosts
                .insert(host.id.as_str(), row.as_slice())
                .map_err(map_err!(Storage))?;
            let mut capacities = txn.open_table(HOST_CAPACITY).map_err(map_err!(Table))?;
            capacities
                .insert(host.id.as_str(), capacity.as_slice())
                .map_err(map_err!(Storage))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(host = %host.id, zone = %host.zone_id, cluster = %host.cluster_id, "host stored");
        Ok(())
    }

    pub fn get_host(&self, host_id: &str) -> StateResult<Option<HostRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let hosts = txn.open_table(HOSTS).map_err(map_err!(Table))?;
        let capacities = txn.open_table(HOST_CAPACITY).map_err(map_err!(Table))?;
        match hosts.get(host_id).map_err(map_err!(Storage))? {
            Some(guard) => Ok(Some(decode_host(guard.value(), &capacities)?)),
            None => Ok(None),
        }
    }

    /// List all hosts ordered by id.
    pub fn list_hosts(&self) -> StateResult<Vec<HostRecord>> {
        self.list_hosts_page(0, usize::MAX)
    }

    /// List at most `limit` hosts ordered by id, skipping the first `offset`.
    ///
    /// An offset past the end yields an empty page.
    pub fn list_hosts_page(&self, offset: usize, limit: usize) -> StateResult<Vec<HostRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let hosts = txn.open_table(HOSTS).map_err(map_err!(Table))?;
        let capacities = txn.open_table(HOST_CAPACITY).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in hosts.iter().map_err(map_err!(Storage))?.skip(offset).take(limit) {
            let (_, value) = entry.map_err(map_err!(Storage))?;
            results.push(decode_host(value.value(), &capacities)?);
        }
        trace!(offset, limit, returned = results.len(), "host page read");
        Ok(results)
    }

    /// Change a host's operational status.
    pub fn set_host_status(&self, host_id: &str, status: HostStatus) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut hosts = txn.open_table(HOSTS).map_err(map_err!(Table))?;
            let mut row: HostRow = match hosts.get(host_id).map_err(map_err!(Storage))? {
                Some(guard) => serde_json::from_slice(guard.value()).map_err(map_err!(Codec))?,
                None => return Err(StateError::HostNotFound(host_id.to_string())),
            };
            row.status = status;
            let value = serde_json::to_vec(&row).map_err(map_err!(Codec))?;
            hosts
                .insert(host_id, value.as_slice())
                .map_err(map_err!(Storage))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(host = %host_id, ?status, "host status changed");
        Ok(())
    }

    /// Delete a host and its capacity row. Returns true if it existed.
    pub fn delete_host(&self, host_id: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut hosts = txn.open_table(HOSTS).map_err(map_err!(Table))?;
            existed = hosts.remove(host_id).map_err(map_err!(Storage))?.is_some();
            let mut capacities = txn.open_table(HOST_CAPACITY).map_err(map_err!(Table))?;
            capacities.remove(host_id).map_err(map_err!(Storage))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(host = %host_id, existed, "host deleted");
        Ok(existed)
    }

    // ── Capacity ───────────────────────────────────────────────────

    pub fn get_capacity(&self, host_id: &str) -> StateResult<Option<HostCapacity>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let capacities = txn.open_table(HOST_CAPACITY).map_err(map_err!(Table))?;
        load_capacity(&capacities, host_id)
    }

    /// Debit `cpu` Hz and `memory` bytes from a host in one write transaction.
    ///
    /// Returns the updated capacity, or `None` (nothing written) when the host
    /// has no capacity row or [`HostCapacity::try_reserve`] refuses the debit.
    /// redb serializes write transactions, so no two reservations ever
    /// observe the same capacity value.
    pub fn reserve_capacity(
        &self,
        host_id: &str,
        cpu: u64,
        memory: u64,
    ) -> StateResult<Option<HostCapacity>> {
        self.update_capacity(host_id, |current| current.try_reserve(cpu, memory))
    }

    /// Return `cpu` Hz and `memory` bytes to a host, clamped to its totals.
    ///
    /// Returns `None` when the host has no capacity row.
    pub fn release_capacity(
        &self,
        host_id: &str,
        cpu: u64,
        memory: u64,
    ) -> StateResult<Option<HostCapacity>> {
        self.update_capacity(host_id, |current| Some(current.released(cpu, memory)))
    }

    fn update_capacity<F>(&self, host_id: &str, apply: F) -> StateResult<Option<HostCapacity>>
    where
        F: FnOnce(&HostCapacity) -> Option<HostCapacity>,
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let updated = {
            let mut capacities = txn.open_table(HOST_CAPACITY).map_err(map_err!(Table))?;
            let updated = load_capacity(&capacities, host_id)?.and_then(|current| apply(&current));
            if let Some(next) = &updated {
                let value = serde_json::to_vec(next).map_err(map_err!(Codec))?;
                capacities
                    .insert(host_id, value.as_slice())
                    .map_err(map_err!(Storage))?;
            }
            updated
        };

        match updated {
            Some(next) => {
                txn.commit().map_err(map_err!(Transaction))?;
                trace!(
                    host = %host_id,
                    available_cpu = next.available_cpu,
                    available_memory = next.available_memory,
                    "capacity committed"
                );
            }
            None => txn.abort().map_err(map_err!(Transaction))?,
        }
        Ok(updated)
    }
}
