//! Planning: diffing desired declarations against recorded state and
//! producing an ordered, reviewable operation list.

mod diff;
mod engine;
mod plan;

pub use diff::{ChangeKind, DiffDetail, DiffEngine, ResourceDiff};
pub use engine::{OrphanPolicy, Planner};
pub use plan::{OpKind, OpReason, Operation, Plan};
