//! redb table definitions for the hostalloc state store.
//!
//! Both tables use the host id as key and JSON-serialized values. Inventory
//! attributes and capacity live in separate tables so that a reservation only
//! rewrites the capacity row.

use redb::TableDefinition;

/// Host inventory rows (identity, topology, status) keyed by `{host_id}`.
pub const HOSTS: TableDefinition<&str, &[u8]> = TableDefinition::new("hosts");

/// Host capacity rows keyed by `{host_id}`.
pub const HOST_CAPACITY: TableDefinition<&str, &[u8]> = TableDefinition::new("host_capacity");
