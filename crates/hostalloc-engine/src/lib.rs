//! hostalloc engine: places a VM on one host of a fleet.
//!
//! A request runs through an ordered pipeline of stages that narrow the
//! candidate hosts, then capacity is reserved atomically on one of the
//! survivors. Concurrent requests only meet at the per-host capacity lock.
//!
//! # Components
//!
//! - **`spec`**: Allocation request (demand + constraints)
//! - **`stage`**: Stage contract and tagged stage outcome
//! - **`pagination`**: Page cursor shared across stages and restarts
//! - **`reservation`**: Capacity reservation (redb store, in-memory ledger)
//! - **`engine`**: Orchestrator: pipeline, shuffle, reserve, restart
//! - **`stages`**: Reference stages over the host store

pub mod engine;
pub mod error;
pub mod pagination;
pub mod reservation;
pub mod spec;
pub mod stage;
pub mod stages;

pub use engine::{HostAllocator, HostAllocatorBuilder, Placement};
pub use error::{AllocationError, AllocationResult};
pub use pagination::{PageWindow, PaginationState};
pub use reservation::{CapacityLedger, CapacityReservation};
pub use spec::{AllocationSpec, PlacementConstraints};
pub use stage::{AllocationStage, StageFailure, StageInput, StageOutcome};
pub use stages::{AvoidHostStage, CapacityStage, HostStatusStage, InventoryStage, standard_pipeline};
