//! Declaration-time registry of resource nodes and stack exports.

use std::collections::BTreeMap;
use std::collections::HashMap;

use tracing::debug;

use crate::error::{DeclarationError, Result};

use super::node::{ResourceDecl, ResourceNode};
use super::value::PropertyValue;

/// Collects resource declarations and stack exports for one run.
///
/// The registry enforces logical-name uniqueness as declarations arrive.
/// Reference targets may be declared in any order; they are checked when
/// the graph is built, so a declaration set can reference forward.
#[derive(Debug, Default)]
pub struct ResourceRegistry {
    nodes: Vec<ResourceNode>,
    index: HashMap<String, usize>,
    exports: BTreeMap<String, PropertyValue>,
}

impl ResourceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a declaration under its logical name.
    ///
    /// # Errors
    ///
    /// Returns [`DeclarationError::DuplicateName`] if the logical name
    /// is already registered.
    pub fn declare(&mut self, decl: ResourceDecl) -> Result<&ResourceNode> {
        let node = ResourceNode::from_decl(decl);
        if self.index.contains_key(node.name()) {
            return Err(DeclarationError::DuplicateName {
                name: node.name().to_string(),
            }
            .into());
        }

        debug!(name = node.name(), kind = node.kind(), "registered resource");
        let idx = self.nodes.len();
        self.index.insert(node.name().to_string(), idx);
        self.nodes.push(node);
        Ok(&self.nodes[idx])
    }

    /// Publishes a stack export under `name`.
    ///
    /// Exports are resolved after apply; a later export under the same
    /// name overwrites the earlier one. Reference targets are validated
    /// at graph build time.
    pub fn export(&mut self, name: impl Into<String>, value: impl Into<PropertyValue>) {
        self.exports.insert(name.into(), value.into());
    }

    /// Registered nodes in declaration order.
    #[must_use]
    pub fn nodes(&self) -> &[ResourceNode] {
        &self.nodes
    }

    /// Looks up a node by logical name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ResourceNode> {
        self.index.get(name).map(|&i| &self.nodes[i])
    }

    /// Declared stack exports, keyed by export name.
    #[must_use]
    pub const fn exports(&self) -> &BTreeMap<String, PropertyValue> {
        &self.exports
    }

    /// Number of registered nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if nothing has been declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub(crate) fn into_parts(self) -> (Vec<ResourceNode>, BTreeMap<String, PropertyValue>) {
        (self.nodes, self.exports)
    }
}
