//! Plan types: ordered operations with their dependency structure.
//!
//! A plan is the reviewable object produced by the planner and the
//! literal input to the executor. Operations are topologically ordered;
//! each carries the indices of the operations that must complete before
//! it may run.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::resource::Properties;

use super::diff::DiffDetail;

/// Kinds of operations in a plan.
///
/// A replacement appears in the plan as a delete followed by a create
/// for the same logical name, both carrying a replacement reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    /// Create the resource.
    Create,
    /// Update the resource in place.
    Update,
    /// Delete the resource.
    Delete,
    /// No change required.
    NoOp,
}

/// Why an operation is part of the plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpReason {
    /// Declared but absent from state.
    NotInState,
    /// Mutable properties changed in place.
    Changed {
        /// The property keys that differ.
        keys: Vec<String>,
    },
    /// Immutable properties changed; this operation is one half of a
    /// replacement.
    Replacement {
        /// The immutable keys that forced the replacement.
        keys: Vec<String>,
    },
    /// Present in state but no longer declared.
    RemovedFromDeclarations,
    /// Desired state matches recorded state.
    Unchanged,
}

/// A single planned operation.
#[derive(Debug, Clone)]
pub struct Operation {
    /// Operation kind.
    pub kind: OpKind,
    /// Logical name of the target resource.
    pub name: String,
    /// Resource kind identifier.
    pub resource_kind: String,
    /// Why the operation is planned.
    pub reason: OpReason,
    /// Desired properties, still unresolved. Present for creates and
    /// updates.
    pub desired: Option<Properties>,
    /// Provider-assigned identifier. Present for updates and deletes
    /// of previously applied resources.
    pub provider_id: Option<String>,
    /// Dependency names to persist on the state record after a
    /// successful create, update or no-op refresh.
    pub record_dependencies: Vec<String>,
    /// Field-level change details, rendered in the dry-run listing.
    pub details: Vec<DiffDetail>,
    /// Indices of operations that must complete first.
    pub dependencies: Vec<usize>,
}

impl Operation {
    /// Returns true if this operation changes anything.
    #[must_use]
    pub const fn is_change(&self) -> bool {
        !matches!(self.kind, OpKind::NoOp)
    }

    /// Returns a human-readable description of the operation.
    #[must_use]
    pub fn description(&self) -> String {
        match self.kind {
            OpKind::Create => format!("Create '{}'", self.name),
            OpKind::Update => format!("Update '{}'", self.name),
            OpKind::Delete => format!("Delete '{}'", self.name),
            OpKind::NoOp => format!("No change for '{}'", self.name),
        }
    }

    /// Plan-listing sigil: `+` create, `~` update, `-` delete, `+/-`
    /// for either half of a replacement.
    #[must_use]
    pub const fn sigil(&self) -> &'static str {
        match (self.kind, &self.reason) {
            (_, OpReason::Replacement { .. }) => "+/-",
            (OpKind::Create, _) => "+",
            (OpKind::Update, _) => "~",
            (OpKind::Delete, _) => "-",
            (OpKind::NoOp, _) => " ",
        }
    }
}

/// A complete plan for one stack.
#[derive(Debug)]
pub struct Plan {
    /// Unique identifier for this plan.
    pub id: Uuid,
    /// When the plan was computed.
    pub created_at: DateTime<Utc>,
    /// Stack the plan applies to.
    pub stack: String,
    /// Operations in a valid execution order.
    pub operations: Vec<Operation>,
}

impl Plan {
    /// Creates a plan from already ordered operations.
    #[must_use]
    pub fn new(stack: impl Into<String>, operations: Vec<Operation>) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            stack: stack.into(),
            operations,
        }
    }

    /// Returns true if nothing would change.
    #[must_use]
    pub fn is_unchanged(&self) -> bool {
        self.operations.iter().all(|op| !op.is_change())
    }

    /// Number of operations that change something.
    #[must_use]
    pub fn change_count(&self) -> usize {
        self.operations.iter().filter(|op| op.is_change()).count()
    }

    /// Number of create operations.
    #[must_use]
    pub fn create_count(&self) -> usize {
        self.count_kind(OpKind::Create)
    }

    /// Number of update operations.
    #[must_use]
    pub fn update_count(&self) -> usize {
        self.count_kind(OpKind::Update)
    }

    /// Number of delete operations.
    #[must_use]
    pub fn delete_count(&self) -> usize {
        self.count_kind(OpKind::Delete)
    }

    fn count_kind(&self, kind: OpKind) -> usize {
        self.operations.iter().filter(|op| op.kind == kind).count()
    }

    /// Operations with no dependencies, runnable immediately.
    #[must_use]
    pub fn ready_operations(&self) -> Vec<usize> {
        self.operations
            .iter()
            .enumerate()
            .filter(|(_, op)| op.dependencies.is_empty())
            .map(|(i, _)| i)
            .collect()
    }

    /// Indices of operations that depend on `index`.
    #[must_use]
    pub fn dependents_of(&self, index: usize) -> Vec<usize> {
        self.operations
            .iter()
            .enumerate()
            .filter(|(_, op)| op.dependencies.contains(&index))
            .map(|(i, _)| i)
            .collect()
    }

    /// Looks up the planned operations for a logical name. A replaced
    /// resource has two.
    #[must_use]
    pub fn operations_for(&self, name: &str) -> Vec<&Operation> {
        self.operations.iter().filter(|op| op.name == name).collect()
    }
}

impl std::fmt::Display for OpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::NoOp => "noop",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for OpReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotInState => write!(f, "not in state"),
            Self::Changed { keys } => write!(f, "changed: {}", keys.join(", ")),
            Self::Replacement { keys } => {
                write!(f, "immutable changed: {}", keys.join(", "))
            }
            Self::RemovedFromDeclarations => write!(f, "removed from declarations"),
            Self::Unchanged => write!(f, "unchanged"),
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} {} ({}): {}",
            self.sigil(),
            self.kind,
            self.name,
            self.resource_kind,
            self.reason
        )
    }
}

impl std::fmt::Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_unchanged() {
            return write!(f, "No changes required for stack '{}'", self.stack);
        }

        writeln!(
            f,
            "Plan for stack '{}' ({} changes):",
            self.stack,
            self.change_count()
        )?;
        for op in &self.operations {
            if !op.is_change() {
                continue;
            }
            writeln!(f, "  {op}")?;
            for detail in &op.details {
                writeln!(f, "      {detail}")?;
            }
        }
        Ok(())
    }
}
