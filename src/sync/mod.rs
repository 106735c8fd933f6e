//! Component C5: Sync Coordinator.

pub mod coordinator;
pub mod reassembly;

pub use coordinator::{SyncCoordinator, SyncPhase};
