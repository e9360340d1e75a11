//! Stack-level context shared by every resource in a run.

use std::collections::BTreeMap;

use crate::resource::PropertyValue;

/// Identity and default properties for one stack.
///
/// Defaults cover properties that are the same for nearly every
/// resource in a stack, such as a cloud project or region. The graph
/// builder injects each default into every node that does not set the
/// key itself; a node's own value always wins.
#[derive(Debug, Clone)]
pub struct StackContext {
    stack: String,
    defaults: BTreeMap<String, PropertyValue>,
}

impl StackContext {
    /// Creates a context for the named stack with no defaults.
    #[must_use]
    pub fn new(stack: impl Into<String>) -> Self {
        Self {
            stack: stack.into(),
            defaults: BTreeMap::new(),
        }
    }

    /// Adds a default property injected into nodes that omit `key`.
    #[must_use]
    pub fn with_default(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.defaults.insert(key.into(), value.into());
        self
    }

    /// Stack name, used in logs and state scoping.
    #[must_use]
    pub fn stack(&self) -> &str {
        &self.stack
    }

    /// Default properties, keyed by property name.
    #[must_use]
    pub const fn defaults(&self) -> &BTreeMap<String, PropertyValue> {
        &self.defaults
    }
}

impl Default for StackContext {
    fn default() -> Self {
        Self::new("default")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_accumulate() {
        let ctx = StackContext::new("prod")
            .with_default("project", "demo-project")
            .with_default("region", "us-central1");

        assert_eq!(ctx.stack(), "prod");
        assert_eq!(ctx.defaults().len(), 2);
        assert_eq!(
            ctx.defaults().get("region"),
            Some(&PropertyValue::from("us-central1"))
        );
    }
}
