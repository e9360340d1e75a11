//! Resource declarations and registered nodes.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::value::{Properties, PropertyValue};

/// A resource as declared by the caller, before registration.
///
/// Built fluently and handed to
/// [`ResourceRegistry::declare`](super::ResourceRegistry::declare):
///
/// ```
/// use strata::ResourceDecl;
///
/// let decl = ResourceDecl::new("gcp:artifactregistry:Repository", "docker_repo")
///     .property("format", "DOCKER")
///     .property("location", "us-central1")
///     .depends_on("apis_enabled");
/// ```
#[derive(Debug, Clone)]
pub struct ResourceDecl {
    kind: String,
    name: String,
    properties: Properties,
    depends_on: BTreeSet<String>,
}

impl ResourceDecl {
    /// Starts a declaration of `kind` under the logical name `name`.
    #[must_use]
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            properties: Properties::new(),
            depends_on: BTreeSet::new(),
        }
    }

    /// Sets a property. Accepts literals, references and lists; later
    /// calls with the same key overwrite earlier ones.
    #[must_use]
    pub fn property(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Sets a property to a deferred reference on another resource's
    /// output. Shorthand for [`PropertyValue::reference`].
    #[must_use]
    pub fn reference(
        self,
        key: impl Into<String>,
        source: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        self.property(key, PropertyValue::reference(source, output))
    }

    /// Adds an explicit ordering dependency on another logical name,
    /// independent of any property reference.
    #[must_use]
    pub fn depends_on(mut self, name: impl Into<String>) -> Self {
        self.depends_on.insert(name.into());
        self
    }
}

/// A registered resource node.
///
/// Owned by the resource graph for the duration of a plan; the planner
/// and executor only ever borrow nodes, never copy them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceNode {
    name: String,
    kind: String,
    properties: Properties,
    depends_on: BTreeSet<String>,
}

impl ResourceNode {
    pub(crate) fn from_decl(decl: ResourceDecl) -> Self {
        Self {
            name: decl.name,
            kind: decl.kind,
            properties: decl.properties,
            depends_on: decl.depends_on,
        }
    }

    /// Logical name, unique within a declaration set.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resource kind identifier, e.g. `gcp:storage:Bucket`.
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Desired properties as declared.
    #[must_use]
    pub const fn properties(&self) -> &Properties {
        &self.properties
    }

    /// Explicit ordering dependencies declared via `depends_on`.
    #[must_use]
    pub const fn explicit_dependencies(&self) -> &BTreeSet<String> {
        &self.depends_on
    }

    /// Logical names referenced from property values, deduplicated and
    /// sorted. Explicit dependencies are not included.
    #[must_use]
    pub fn referenced_sources(&self) -> BTreeSet<&str> {
        let mut raw = Vec::new();
        for value in self.properties.values() {
            value.referenced_sources(&mut raw);
        }
        raw.into_iter().collect()
    }

    /// All logical names this node depends on, from references and
    /// explicit dependencies combined.
    #[must_use]
    pub fn dependency_names(&self) -> BTreeSet<&str> {
        let mut names = self.referenced_sources();
        names.extend(self.depends_on.iter().map(String::as_str));
        names
    }

    pub(crate) fn insert_default_property(&mut self, key: &str, value: PropertyValue) {
        self.properties.entry(key.to_string()).or_insert(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decl_builds_node_with_all_parts() {
        let decl = ResourceDecl::new("gcp:storage:Bucket", "artifacts")
            .property("location", "us-central1")
            .reference("depends", "repo", "id")
            .depends_on("apis");
        let node = ResourceNode::from_decl(decl);

        assert_eq!(node.name(), "artifacts");
        assert_eq!(node.kind(), "gcp:storage:Bucket");
        assert_eq!(node.properties().len(), 2);
        assert!(node.explicit_dependencies().contains("apis"));
    }

    #[test]
    fn dependency_names_merge_references_and_explicit() {
        let node = ResourceNode::from_decl(
            ResourceDecl::new("k", "n")
                .reference("a", "repo", "id")
                .property(
                    "members",
                    PropertyValue::List(vec![PropertyValue::reference("sa", "email")]),
                )
                .depends_on("apis")
                .depends_on("repo"),
        );

        let names: Vec<&str> = node.dependency_names().into_iter().collect();
        assert_eq!(names, vec!["apis", "repo", "sa"]);
    }

    #[test]
    fn default_property_does_not_overwrite() {
        let mut node = ResourceNode::from_decl(
            ResourceDecl::new("k", "n").property("region", "europe-west1"),
        );
        node.insert_default_property("region", PropertyValue::from("us-central1"));
        node.insert_default_property("project", PropertyValue::from("demo"));

        assert_eq!(
            node.properties().get("region"),
            Some(&PropertyValue::from("europe-west1"))
        );
        assert_eq!(
            node.properties().get("project"),
            Some(&PropertyValue::from("demo"))
        );
    }
}
