//! Error types for the strata provisioning engine.
//!
//! This module provides the error hierarchy for every phase of the
//! provisioning lifecycle: declaration, graph construction, planning,
//! state management, and execution.

use thiserror::Error;

/// The main error type for the strata engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Declaration-time errors.
    #[error("Declaration error: {0}")]
    Declaration(#[from] DeclarationError),

    /// Graph construction errors.
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    /// Planning errors.
    #[error("Planning error: {0}")]
    Plan(#[from] PlanError),

    /// State store errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Execution errors.
    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors raised while registering resource declarations.
#[derive(Debug, Error)]
pub enum DeclarationError {
    /// A logical name was declared twice within the same plan.
    #[error("Duplicate logical name: '{name}' is already declared")]
    DuplicateName {
        /// The logical name that was declared twice.
        name: String,
    },

    /// A property references a logical name that is not declared.
    #[error("Resource '{node}' references undeclared resource '{target}'")]
    UnknownReference {
        /// The declaring resource.
        node: String,
        /// The missing reference target.
        target: String,
    },

    /// A stack export references a logical name that is not declared.
    #[error("Export '{export}' references undeclared resource '{target}'")]
    UnknownExportReference {
        /// The export name.
        export: String,
        /// The missing reference target.
        target: String,
    },
}

/// Errors raised while building the dependency graph.
#[derive(Debug, Error)]
pub enum GraphError {
    /// The declarations contain a dependency cycle.
    #[error("Dependency cycle detected: {}", format_cycle(cycle))]
    CycleDetected {
        /// The node sequence forming the cycle, in traversal order.
        cycle: Vec<String>,
    },
}

/// Formats a cycle as `a -> b -> a` for diagnostics.
fn format_cycle(cycle: &[String]) -> String {
    let mut path = cycle.join(" -> ");
    if let Some(first) = cycle.first() {
        path.push_str(" -> ");
        path.push_str(first);
    }
    path
}

/// Errors raised while computing a plan.
#[derive(Debug, Error)]
pub enum PlanError {
    /// Replacing a resource would orphan a dependent that cannot tolerate it.
    #[error(
        "Replacing '{replaced}' would orphan dependent '{dependent}' \
         (kind '{dependent_kind}' does not survive a dependency replace)"
    )]
    ReplaceOrphansDependent {
        /// The resource scheduled for replacement.
        replaced: String,
        /// The dependent resource that would be orphaned.
        dependent: String,
        /// The dependent's resource kind.
        dependent_kind: String,
    },

    /// A state record that must be updated in place has no provider id.
    #[error("State record for '{name}' has no provider id; state may be corrupted")]
    RecordMissingId {
        /// The logical name with the incomplete record.
        name: String,
    },
}

/// State store errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// A record or the store payload could not be (de)serialized.
    #[error("State serialization error: {message}")]
    Serialization {
        /// Description of the serialization error.
        message: String,
    },

    /// The persisted state is unreadable or inconsistent.
    #[error("State is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// The backing store failed.
    #[error("State backend error: {message}")]
    Backend {
        /// Description of the backend failure.
        message: String,
    },
}

/// Execution errors surfaced for individual operations.
///
/// These never abort a whole apply; they are recorded per operation and
/// propagated to dependents as skips.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The provider rejected or failed an operation.
    #[error("Provider operation failed for '{name}': {source}")]
    Operation {
        /// Logical name of the target resource.
        name: String,
        /// The underlying provider failure.
        #[source]
        source: ProviderError,
    },

    /// A reference could not be resolved from the producing node's outputs.
    #[error("Resource '{node}' needs output '{output}' of '{source_name}', which was not produced")]
    UnresolvedReference {
        /// The consuming resource.
        node: String,
        /// The producing resource.
        source_name: String,
        /// The missing output key.
        output: String,
    },

    /// Writing the post-operation state record failed.
    #[error("Recording state for '{name}' failed: {source}")]
    StateWrite {
        /// Logical name of the resource whose record could not be written.
        name: String,
        /// The underlying store failure.
        #[source]
        source: StateError,
    },

    /// Reading the prior state record failed.
    #[error("Loading state for '{name}' failed: {source}")]
    StateRead {
        /// Logical name of the resource whose record could not be read.
        name: String,
        /// The underlying store failure.
        #[source]
        source: StateError,
    },

    /// An operation that addresses an existing resource has no provider
    /// id to address it by.
    #[error("Operation on '{name}' has no provider id")]
    MissingProviderId {
        /// Logical name of the operation's target.
        name: String,
    },
}

/// Errors surfaced by a provider collaborator.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider call failed.
    #[error("{message}")]
    Failed {
        /// Error message from the provider.
        message: String,
    },

    /// The provider does not know the given resource id.
    #[error("Resource not found: {id}")]
    NotFound {
        /// The provider-assigned id that was not found.
        id: String,
    },

    /// The provider throttled the request.
    #[error("Provider throttled the request, retry after {retry_after_secs} seconds")]
    Throttled {
        /// Seconds to wait before retrying.
        retry_after_secs: u64,
    },
}

/// Result type alias for strata operations.
pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Execution(ExecutionError::Operation {
                source: ProviderError::Throttled { .. },
                ..
            })
        )
    }

    /// Returns the suggested retry delay in seconds, if applicable.
    #[must_use]
    pub const fn retry_delay_secs(&self) -> Option<u64> {
        match self {
            Self::Execution(ExecutionError::Operation {
                source: ProviderError::Throttled { retry_after_secs },
                ..
            }) => Some(*retry_after_secs),
            _ => None,
        }
    }
}

impl StateError {
    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Creates a backend error with the given message.
    #[must_use]
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    /// Creates a corruption error with the given message.
    #[must_use]
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted {
            message: message.into(),
        }
    }
}

impl ProviderError {
    /// Creates a generic provider failure.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    /// Returns true if the failure means the resource is already gone.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_display_closes_the_loop() {
        let err = GraphError::CycleDetected {
            cycle: vec![String::from("a"), String::from("b")],
        };
        assert_eq!(err.to_string(), "Dependency cycle detected: a -> b -> a");
    }

    #[test]
    fn throttled_operations_are_retryable() {
        let err = EngineError::Execution(ExecutionError::Operation {
            name: String::from("db"),
            source: ProviderError::Throttled {
                retry_after_secs: 30,
            },
        });
        assert!(err.is_retryable());
        assert_eq!(err.retry_delay_secs(), Some(30));
    }

    #[test]
    fn failed_operations_are_not_retryable() {
        let err = EngineError::Execution(ExecutionError::Operation {
            name: String::from("db"),
            source: ProviderError::failed("quota exceeded"),
        });
        assert!(!err.is_retryable());
        assert_eq!(err.retry_delay_secs(), None);
    }
}
