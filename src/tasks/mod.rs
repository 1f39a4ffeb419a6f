//! Task model, task-file store, and status derivation.
//!
//! The task directory on the storage VM is the single source of truth for
//! a voyage. Ships claim and complete tasks by rewriting the files; the
//! control plane only ever derives state from what it reads there.

mod status;
mod store;
mod task;

pub use status::{
    DataFault, ShipState, ShipStatus, VoyageState, VoyageStatus, claimable, derive, stale_tasks,
};
pub use store::{TaskListing, TaskStore};
pub use task::{Task, TaskMetadata, TaskStatus};
