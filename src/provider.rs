//! Provider interface for resource operations.
//!
//! The engine is polymorphic over any platform that can create, update
//! and delete resources. The provider also supplies per-kind change
//! policy: which property keys are immutable (forcing replacement) and
//! whether resources of a kind tolerate their dependencies being
//! replaced underneath them.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ProviderError;
use crate::resource::ResolvedProperties;

/// Outputs produced by a provider operation, keyed by output name.
pub type Outputs = serde_json::Map<String, Value>;

/// Result type for provider operations.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Identity and outputs of a freshly created resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provisioned {
    /// Provider-assigned identifier, used for later update and delete.
    pub id: String,
    /// Outputs available to referencing resources.
    pub outputs: Outputs,
}

/// Change policy for one resource kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KindSchema {
    /// Property keys that cannot change in place; a differing value
    /// forces replacement.
    pub immutable_keys: BTreeSet<String>,
    /// Whether resources of this kind tolerate a dependency being
    /// destroyed and recreated. When false, a plan that replaces one of
    /// their dependencies is rejected under the enforcing orphan
    /// policy.
    pub survives_dependency_replace: bool,
}

impl KindSchema {
    /// A schema with no immutable keys that tolerates dependency
    /// replacement. This is the assumed policy for kinds the provider
    /// does not describe.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            immutable_keys: BTreeSet::new(),
            survives_dependency_replace: true,
        }
    }

    /// Marks a property key as immutable.
    #[must_use]
    pub fn immutable_key(mut self, key: impl Into<String>) -> Self {
        self.immutable_keys.insert(key.into());
        self
    }

    /// Declares that this kind cannot outlive a replaced dependency.
    #[must_use]
    pub const fn disallow_dependency_replace(mut self) -> Self {
        self.survives_dependency_replace = false;
        self
    }

    /// Returns true if `key` may not change in place.
    #[must_use]
    pub fn is_immutable(&self, key: &str) -> bool {
        self.immutable_keys.contains(key)
    }
}

impl Default for KindSchema {
    fn default() -> Self {
        Self::new()
    }
}

/// Interface to the platform applying resource operations.
///
/// `create` returns the provider-assigned identifier along with the
/// resource's outputs; `update` and `delete` address the resource by
/// that identifier. Operations return [`ProviderError`] directly; the
/// executor wraps failures with the logical name of the operation.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Provider: Send + Sync {
    /// Change policy for `kind`.
    ///
    /// Called during planning only; must not perform IO.
    fn schema(&self, kind: &str) -> KindSchema;

    /// Creates a resource and returns its identity and outputs.
    async fn create(
        &self,
        kind: &str,
        name: &str,
        properties: &ResolvedProperties,
    ) -> ProviderResult<Provisioned>;

    /// Updates a resource in place and returns its refreshed outputs.
    async fn update(
        &self,
        kind: &str,
        id: &str,
        properties: &ResolvedProperties,
    ) -> ProviderResult<Outputs>;

    /// Deletes a resource by identifier.
    async fn delete(&self, kind: &str, id: &str) -> ProviderResult<()>;

    /// Short name of the provider implementation, for logs.
    fn provider_type(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn schema_builder_marks_keys_immutable() {
        let schema = KindSchema::new()
            .immutable_key("location")
            .immutable_key("format");

        assert!(schema.is_immutable("location"));
        assert!(schema.is_immutable("format"));
        assert!(!schema.is_immutable("labels"));
        assert!(schema.survives_dependency_replace);
    }

    #[test]
    fn schema_can_pin_dependents() {
        let schema = KindSchema::new().disallow_dependency_replace();
        assert!(!schema.survives_dependency_replace);
    }

    #[tokio::test]
    async fn mock_provider_round_trip() {
        let mut provider = MockProvider::new();
        provider.expect_create().returning(|_, name, _| {
            let mut outputs = Outputs::new();
            outputs.insert("id".to_string(), json!(format!("prov-{name}")));
            Ok(Provisioned {
                id: format!("prov-{name}"),
                outputs,
            })
        });
        provider.expect_delete().returning(|_, _| Ok(()));

        let created = provider
            .create("gcp:storage:Bucket", "artifacts", &ResolvedProperties::new())
            .await
            .unwrap();
        assert_eq!(created.id, "prov-artifacts");
        provider.delete("gcp:storage:Bucket", &created.id).await.unwrap();
    }
}
