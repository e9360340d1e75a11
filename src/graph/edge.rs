//! Dependency edges between resource nodes.

use serde::{Deserialize, Serialize};

/// How a dependency edge came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeOrigin {
    /// Inferred from a property referencing another resource's output.
    Reference,
    /// Declared explicitly via `depends_on`.
    Explicit,
}

impl std::fmt::Display for EdgeOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Reference => write!(f, "reference"),
            Self::Explicit => write!(f, "explicit"),
        }
    }
}

/// A directed edge meaning `from` must be applied before `to`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyEdge {
    /// Logical name of the dependency, applied first.
    pub from: String,
    /// Logical name of the dependent resource.
    pub to: String,
    /// How the edge was derived.
    pub origin: EdgeOrigin,
}

impl std::fmt::Display for DependencyEdge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -> {} ({})", self.from, self.to, self.origin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edge_display_names_both_ends() {
        let edge = DependencyEdge {
            from: "service_account".to_string(),
            to: "binding".to_string(),
            origin: EdgeOrigin::Reference,
        };
        assert_eq!(edge.to_string(), "service_account -> binding (reference)");
    }
}
