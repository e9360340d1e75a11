// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![warn(missing_docs)]                // All public items should be documented
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Strata
//!
//! A declarative, idempotent resource provisioning engine with
//! dependency-aware planning and parallel apply.
//!
//! ## Overview
//!
//! Strata takes a set of resource declarations with explicit and
//! implicit dependencies and produces a safe, ordered plan of create,
//! update and delete operations, then applies it:
//!
//! 1. **Declare**: register resources and stack exports in a
//!    [`ResourceRegistry`]; property values may defer to other
//!    resources' outputs.
//! 2. **Build**: the [`GraphBuilder`] validates references, infers
//!    dependency edges, rejects cycles and fixes a canonical order.
//! 3. **Plan**: the [`Planner`] diffs desired state against the
//!    [`StateStore`] records and emits a reviewable [`Plan`].
//! 4. **Apply**: the [`PlanExecutor`] runs the plan against a
//!    [`Provider`] with bounded concurrency, containing failures to
//!    the dependents of the failed operation.
//!
//! The engine never talks to a specific platform: the [`Provider`] and
//! [`StateStore`] traits are the only collaborators.
//!
//! ## Modules
//!
//! - [`resource`]: declarations, property values, registry, fingerprints
//! - [`graph`]: edge inference, cycle detection, topological order
//! - [`planner`]: diff engine, plan types, the planner itself
//! - [`executor`]: worker-pool apply with skip and cancel semantics
//! - [`provider`]: the platform interface and per-kind change policy
//! - [`state`]: state records and storage backends (memory, file)
//!
//! ## Example
//!
//! ```text
//! let mut registry = ResourceRegistry::new();
//! registry.declare(
//!     ResourceDecl::new("gcp:serviceaccount:Account", "builder")
//!         .property("display_name", "CI builder"),
//! )?;
//! registry.declare(
//!     ResourceDecl::new("gcp:projects:IAMMember", "builder_push")
//!         .property("role", "roles/artifactregistry.writer")
//!         .property(
//!             "member",
//!             PropertyValue::templated_reference("builder", "email", "serviceAccount:{}"),
//!         ),
//! )?;
//! registry.export("builder_email", PropertyValue::reference("builder", "email"));
//!
//! let context = StackContext::new("prod").with_default("project", "demo-project");
//! let graph = GraphBuilder::new(context).build(registry)?;
//! let plan = Planner::new().plan(&graph, &*provider, &*store).await?;
//! println!("{plan}");
//! let result = PlanExecutor::new(provider, store).apply(&graph, &plan).await?;
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod context;
pub mod error;
pub mod executor;
pub mod graph;
pub mod planner;
pub mod provider;
pub mod resource;
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use context::StackContext;
pub use error::{
    DeclarationError, EngineError, ExecutionError, GraphError, PlanError, ProviderError, Result,
    StateError,
};
pub use executor::{
    ApplyOptions, ApplyStatus, CancelFlag, ExecutionResult, OpStatus, OperationResult,
    PlanExecutor,
};
pub use graph::{DependencyEdge, EdgeOrigin, GraphBuilder, ResourceGraph};
pub use planner::{
    ChangeKind, DiffDetail, DiffEngine, OpKind, OpReason, Operation, OrphanPolicy, Plan, Planner,
    ResourceDiff,
};
pub use provider::{KindSchema, Outputs, Provider, ProviderResult, Provisioned};
pub use resource::{
    Properties, PropertyValue, ResolvedProperties, ResourceDecl, ResourceNode, ResourceRegistry,
};
pub use state::{FileStateStore, MemoryStateStore, StateRecord, StateStore};
