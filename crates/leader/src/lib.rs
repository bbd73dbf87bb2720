//! Single-active-instance coordination.
//!
//! This crate provides:
//! - `LeaseLock`: the seam over a shared, optimistically-versioned lease record
//! - `LeaderElector`: the acquire/renew/release campaign emitting `LeaseEvent`s
//! - `Coordinator`: the leadership state machine that starts the ingestion
//!   workload on acquisition and delays stopping it by a full lease duration
//!   after leadership ends

pub mod coordinator;
pub mod elector;
pub mod lease;
pub mod memory;

pub use coordinator::{Coordinator, CoordinatorEvent, CoordinatorHandle, LeadershipState, Workload};
pub use elector::{identity, ElectorConfig, LeaderElector, LeaseEvent};
pub use lease::{LeaseError, LeaseLock, LeaseRecord};
pub use memory::InMemoryLease;
