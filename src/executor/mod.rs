//! Execution: applying a plan against a provider with bounded
//! concurrency, containing failures to the dependents of the failed
//! operation.

mod apply;

pub use apply::{
    ApplyOptions, ApplyStatus, CancelFlag, ExecutionResult, OpStatus, OperationResult,
    PlanExecutor,
};
