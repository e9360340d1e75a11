//! Persisted per-resource state records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::provider::Outputs;
use crate::resource::{PropertyHasher, ResolvedProperties};

/// Snapshot of a resource as last applied.
///
/// Created on first successful apply, rewritten on every later
/// successful apply, removed on successful delete. The dependency list
/// captures which logical names the resource depended on at apply
/// time; the planner uses it to order deletes after the resource
/// itself has left the declaration set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    /// Logical name of the resource.
    pub name: String,
    /// Resource kind identifier.
    pub kind: String,
    /// Provider-assigned identifier.
    pub provider_id: String,
    /// Resolved properties as last sent to the provider.
    pub properties: ResolvedProperties,
    /// Outputs produced by the last apply.
    pub outputs: Outputs,
    /// Logical names this resource depended on when applied.
    pub dependencies: Vec<String>,
    /// Fingerprint of `properties` for cheap change detection.
    pub fingerprint: String,
    /// When the resource was first applied.
    pub created_at: DateTime<Utc>,
    /// When the record was last rewritten.
    pub updated_at: DateTime<Utc>,
}

impl StateRecord {
    /// Creates a record for a freshly applied resource.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        kind: impl Into<String>,
        provider_id: impl Into<String>,
        properties: ResolvedProperties,
        outputs: Outputs,
        dependencies: Vec<String>,
    ) -> Self {
        let now = Utc::now();
        let fingerprint = PropertyHasher::new().fingerprint(&properties);
        Self {
            name: name.into(),
            kind: kind.into(),
            provider_id: provider_id.into(),
            properties,
            outputs,
            dependencies,
            fingerprint,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns a record reflecting an in-place update, keeping identity
    /// and creation time.
    #[must_use]
    pub fn updated(
        &self,
        properties: ResolvedProperties,
        outputs: Outputs,
        dependencies: Vec<String>,
    ) -> Self {
        let fingerprint = PropertyHasher::new().fingerprint(&properties);
        Self {
            name: self.name.clone(),
            kind: self.kind.clone(),
            provider_id: self.provider_id.clone(),
            properties,
            outputs,
            dependencies,
            fingerprint,
            created_at: self.created_at,
            updated_at: Utc::now(),
        }
    }

    /// Looks up an output by key.
    #[must_use]
    pub fn output(&self, key: &str) -> Option<&Value> {
        self.outputs.get(key)
    }

    /// Returns true if the record carries a provider identifier.
    #[must_use]
    pub fn has_provider_id(&self) -> bool {
        !self.provider_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> StateRecord {
        let mut properties = ResolvedProperties::new();
        properties.insert("location".to_string(), json!("us-central1"));
        let mut outputs = Outputs::new();
        outputs.insert("url".to_string(), json!("https://example"));
        StateRecord::new(
            "repo",
            "gcp:artifactregistry:Repository",
            "projects/demo/repos/repo",
            properties,
            outputs,
            vec!["apis".to_string()],
        )
    }

    #[test]
    fn new_record_fingerprints_properties() {
        let record = sample();
        let expected = PropertyHasher::new().fingerprint(&record.properties);
        assert_eq!(record.fingerprint, expected);
        assert_eq!(record.created_at, record.updated_at);
        assert!(record.has_provider_id());
    }

    #[test]
    fn updated_keeps_identity_and_created_at() {
        let record = sample();
        let mut properties = ResolvedProperties::new();
        properties.insert("location".to_string(), json!("europe-west1"));
        let next = record.updated(properties, Outputs::new(), vec![]);

        assert_eq!(next.name, record.name);
        assert_eq!(next.provider_id, record.provider_id);
        assert_eq!(next.created_at, record.created_at);
        assert_ne!(next.fingerprint, record.fingerprint);
        assert!(next.dependencies.is_empty());
    }

    #[test]
    fn record_round_trips_through_json() {
        let record = sample();
        let text = serde_json::to_string(&record).unwrap();
        let back: StateRecord = serde_json::from_str(&text).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn output_lookup() {
        let record = sample();
        assert_eq!(record.output("url"), Some(&json!("https://example")));
        assert_eq!(record.output("missing"), None);
    }
}
