//! hostalloc-state: embedded host inventory and capacity store.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! storage for host records and their capacity sub-records.
//!
//! # Architecture
//!
//! Inventory rows and capacity rows are JSON-serialized into separate redb
//! tables keyed by host id. Reads assemble a [`HostRecord`] from both.
//! Capacity reservations run inside a single redb write transaction: redb
//! admits one writer at a time, so the check-then-decrement is atomic with
//! respect to every other reservation, and an aborted transaction leaves the
//! row untouched.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
