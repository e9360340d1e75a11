//! State management for applied resources.
//!
//! This module provides persistent per-resource state storage,
//! consulted by the planner to diff desired against last-applied state
//! and updated by the executor after every successful operation.

mod file;
mod memory;
mod record;
mod store;

pub use file::FileStateStore;
pub use memory::MemoryStateStore;
pub use record::StateRecord;
pub use store::{StateStore, StoreResult};
