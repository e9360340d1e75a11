//! Dependency graph construction and traversal.
//!
//! This module turns a registry of declarations into a validated,
//! acyclic graph with a canonical execution order:
//! - Edge inference from property references and explicit dependencies
//! - Cycle detection with the offending path in the error
//! - Deterministic topological ordering, ties broken by logical name

mod builder;
mod edge;

pub use builder::{GraphBuilder, ResourceGraph};
pub use edge::{DependencyEdge, EdgeOrigin};
