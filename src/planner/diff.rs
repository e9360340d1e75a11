//! Diff engine for comparing desired declarations against recorded
//! state.
//!
//! The diff decides, per resource, whether it must be created, updated
//! in place, replaced, or left alone. A deferred reference participates
//! in the comparison only when its value is already known at plan time;
//! otherwise it is conservatively treated as a change.

use serde_json::Value;
use tracing::debug;

use crate::provider::KindSchema;
use crate::resource::{PropertyHasher, ResolvedProperties, ResourceNode};
use crate::state::StateRecord;

/// Placeholder shown for values that resolve only during apply.
const KNOWN_AFTER_APPLY: &str = "(known after apply)";

/// Kind of change detected for a single resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// Resource needs to be created.
    Create,
    /// Resource needs an in-place update.
    Update,
    /// Resource must be destroyed and recreated.
    Replace,
    /// Resource needs to be deleted.
    Delete,
    /// Resource is unchanged.
    NoOp,
}

/// Difference for a single resource.
#[derive(Debug, Clone)]
pub struct ResourceDiff {
    /// Logical name.
    pub name: String,
    /// The decided change.
    pub change: ChangeKind,
    /// Property keys that differ.
    pub changed_keys: Vec<String>,
    /// The subset of changed keys the schema marks immutable.
    pub immutable_changed: Vec<String>,
    /// Human-readable change details.
    pub details: Vec<DiffDetail>,
}

/// Detail about a specific differing field.
#[derive(Debug, Clone)]
pub struct DiffDetail {
    /// Field that differs.
    pub field: String,
    /// Recorded value, if any.
    pub old_value: Option<String>,
    /// Desired value, if known at plan time.
    pub new_value: Option<String>,
}

/// Engine for computing per-resource diffs.
#[derive(Debug, Default)]
pub struct DiffEngine {
    hasher: PropertyHasher,
}

/// A desired property value as seen at plan time.
enum PlanValue {
    Known(Value),
    Unknown,
}

impl DiffEngine {
    /// Creates a new diff engine.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            hasher: PropertyHasher::new(),
        }
    }

    /// Computes the diff for a declared node against its record.
    ///
    /// `lookup` resolves `(source, output)` pairs for deferred
    /// references; returning `None` marks the reference as known only
    /// after apply, which always counts as a change.
    pub fn diff_node<F>(
        &self,
        node: &ResourceNode,
        record: Option<&StateRecord>,
        schema: &KindSchema,
        lookup: &F,
    ) -> ResourceDiff
    where
        F: Fn(&str, &str) -> Option<Value>,
    {
        let Some(record) = record else {
            return Self::create_diff(node, lookup);
        };

        if record.kind != node.kind() {
            debug!(
                name = node.name(),
                old = record.kind,
                new = node.kind(),
                "resource kind changed, forcing replace"
            );
            return ResourceDiff {
                name: node.name().to_string(),
                change: ChangeKind::Replace,
                changed_keys: vec![String::from("kind")],
                immutable_changed: vec![String::from("kind")],
                details: vec![DiffDetail {
                    field: String::from("kind"),
                    old_value: Some(record.kind.clone()),
                    new_value: Some(node.kind().to_string()),
                }],
            };
        }

        // Resolve what can be resolved now
        let mut resolved = Vec::with_capacity(node.properties().len());
        let mut known = ResolvedProperties::new();
        let mut fully_known = true;
        for (key, value) in node.properties() {
            match value.resolve_with(lookup) {
                Ok(v) => {
                    known.insert(key.clone(), v.clone());
                    resolved.push((key.as_str(), PlanValue::Known(v)));
                }
                Err(_) => {
                    fully_known = false;
                    resolved.push((key.as_str(), PlanValue::Unknown));
                }
            }
        }

        // Fingerprint fast path: valid only when every value is known
        if fully_known
            && PropertyHasher::hashes_match(&self.hasher.fingerprint(&known), &record.fingerprint)
        {
            debug!(name = node.name(), "resource is up to date");
            return ResourceDiff {
                name: node.name().to_string(),
                change: ChangeKind::NoOp,
                changed_keys: vec![],
                immutable_changed: vec![],
                details: vec![],
            };
        }

        Self::detailed_diff(node, record, schema, resolved)
    }

    /// Builds the diff for a resource with no record.
    fn create_diff<F>(node: &ResourceNode, lookup: &F) -> ResourceDiff
    where
        F: Fn(&str, &str) -> Option<Value>,
    {
        debug!(name = node.name(), "resource needs to be created");
        let mut changed_keys = Vec::new();
        let mut details = Vec::new();
        for (key, value) in node.properties() {
            changed_keys.push(key.clone());
            let new_value = value
                .resolve_with(lookup)
                .map_or_else(|_| KNOWN_AFTER_APPLY.to_string(), |v| render(&v));
            details.push(DiffDetail {
                field: key.clone(),
                old_value: None,
                new_value: Some(new_value),
            });
        }
        ResourceDiff {
            name: node.name().to_string(),
            change: ChangeKind::Create,
            changed_keys,
            immutable_changed: vec![],
            details,
        }
    }

    /// Key-by-key comparison once the fast path has ruled out equality.
    fn detailed_diff(
        node: &ResourceNode,
        record: &StateRecord,
        schema: &KindSchema,
        resolved: Vec<(&str, PlanValue)>,
    ) -> ResourceDiff {
        let mut changed_keys = Vec::new();
        let mut details = Vec::new();

        for (key, value) in &resolved {
            let recorded = record.properties.get(*key);
            match value {
                PlanValue::Known(v) => {
                    if recorded != Some(v) {
                        changed_keys.push((*key).to_string());
                        details.push(DiffDetail {
                            field: (*key).to_string(),
                            old_value: recorded.map(render),
                            new_value: Some(render(v)),
                        });
                    }
                }
                PlanValue::Unknown => {
                    changed_keys.push((*key).to_string());
                    details.push(DiffDetail {
                        field: (*key).to_string(),
                        old_value: recorded.map(render),
                        new_value: Some(KNOWN_AFTER_APPLY.to_string()),
                    });
                }
            }
        }

        // Keys that were applied before but are no longer declared
        for (key, old) in &record.properties {
            if node.properties().contains_key(key) {
                continue;
            }
            changed_keys.push(key.clone());
            details.push(DiffDetail {
                field: key.clone(),
                old_value: Some(render(old)),
                new_value: None,
            });
        }

        if changed_keys.is_empty() {
            return ResourceDiff {
                name: node.name().to_string(),
                change: ChangeKind::NoOp,
                changed_keys,
                immutable_changed: vec![],
                details,
            };
        }

        let immutable_changed: Vec<String> = changed_keys
            .iter()
            .filter(|key| schema.is_immutable(key))
            .cloned()
            .collect();
        let change = if immutable_changed.is_empty() {
            ChangeKind::Update
        } else {
            ChangeKind::Replace
        };

        debug!(
            name = node.name(),
            change = %change,
            changed = changed_keys.len(),
            "resource differs from state"
        );

        ResourceDiff {
            name: node.name().to_string(),
            change,
            changed_keys,
            immutable_changed,
            details,
        }
    }

    /// Builds the diff for a record whose logical name is no longer
    /// declared.
    #[must_use]
    pub fn deleted(record: &StateRecord) -> ResourceDiff {
        debug!(name = record.name, "resource removed from declarations");
        ResourceDiff {
            name: record.name.clone(),
            change: ChangeKind::Delete,
            changed_keys: vec![],
            immutable_changed: vec![],
            details: vec![DiffDetail {
                field: String::from("resource"),
                old_value: Some(record.provider_id.clone()),
                new_value: None,
            }],
        }
    }
}

/// Renders a JSON value for diff display. Strings appear bare; other
/// values use their compact JSON form.
fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl std::fmt::Display for DiffDetail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.old_value, &self.new_value) {
            (Some(old), Some(new)) => write!(f, "{}: {old} -> {new}", self.field),
            (None, Some(new)) => write!(f, "{}: {new}", self.field),
            (Some(old), None) => write!(f, "{}: {old} (removed)", self.field),
            (None, None) => write!(f, "{}", self.field),
        }
    }
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Replace => "replace",
            Self::Delete => "delete",
            Self::NoOp => "no change",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for ResourceDiff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.name, self.change)?;
        if !self.details.is_empty() {
            write!(f, " (")?;
            for (i, detail) in self.details.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", detail.field)?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::Outputs;
    use crate::resource::{PropertyValue, ResourceDecl};
    use serde_json::json;

    fn node(decl: ResourceDecl) -> ResourceNode {
        let mut registry = crate::resource::ResourceRegistry::new();
        registry.declare(decl).unwrap();
        registry.into_parts().0.remove(0)
    }

    fn record_with(pairs: &[(&str, Value)]) -> StateRecord {
        let properties: ResolvedProperties = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect();
        StateRecord::new("res", "kind", "id-1", properties, Outputs::new(), vec![])
    }

    fn no_outputs(_: &str, _: &str) -> Option<Value> {
        None
    }

    #[test]
    fn missing_record_means_create() {
        let engine = DiffEngine::new();
        let node = node(
            ResourceDecl::new("kind", "res")
                .property("location", "us-central1")
                .reference("member", "sa", "email"),
        );

        let diff = engine.diff_node(&node, None, &KindSchema::new(), &no_outputs);
        assert_eq!(diff.change, ChangeKind::Create);
        assert_eq!(diff.changed_keys.len(), 2);
        let member = diff.details.iter().find(|d| d.field == "member").unwrap();
        assert_eq!(member.new_value.as_deref(), Some(KNOWN_AFTER_APPLY));
    }

    #[test]
    fn equal_properties_mean_noop() {
        let engine = DiffEngine::new();
        let node = node(ResourceDecl::new("kind", "res").property("location", "us-central1"));
        let record = record_with(&[("location", json!("us-central1"))]);

        let diff = engine.diff_node(&node, Some(&record), &KindSchema::new(), &no_outputs);
        assert_eq!(diff.change, ChangeKind::NoOp);
        assert!(diff.details.is_empty());
    }

    #[test]
    fn resolved_reference_can_match_record() {
        let engine = DiffEngine::new();
        let node = node(ResourceDecl::new("kind", "res").property(
            "members",
            PropertyValue::List(vec![PropertyValue::templated_reference(
                "sa",
                "email",
                "serviceAccount:{}",
            )]),
        ));
        let record = record_with(&[("members", json!(["serviceAccount:sa@demo.iam"]))]);
        let lookup = |source: &str, output: &str| {
            (source == "sa" && output == "email").then(|| json!("sa@demo.iam"))
        };

        let diff = engine.diff_node(&node, Some(&record), &KindSchema::new(), &lookup);
        assert_eq!(diff.change, ChangeKind::NoOp);
    }

    #[test]
    fn mutable_change_means_update() {
        let engine = DiffEngine::new();
        let node = node(
            ResourceDecl::new("kind", "res")
                .property("location", "us-central1")
                .property("tier", "standard"),
        );
        let record = record_with(&[("location", json!("us-central1")), ("tier", json!("basic"))]);

        let diff = engine.diff_node(&node, Some(&record), &KindSchema::new(), &no_outputs);
        assert_eq!(diff.change, ChangeKind::Update);
        assert_eq!(diff.changed_keys, vec!["tier"]);
        let detail = &diff.details[0];
        assert_eq!(detail.old_value.as_deref(), Some("basic"));
        assert_eq!(detail.new_value.as_deref(), Some("standard"));
    }

    #[test]
    fn immutable_change_means_replace() {
        let engine = DiffEngine::new();
        let node = node(ResourceDecl::new("kind", "res").property("location", "europe-west1"));
        let record = record_with(&[("location", json!("us-central1"))]);
        let schema = KindSchema::new().immutable_key("location");

        let diff = engine.diff_node(&node, Some(&record), &schema, &no_outputs);
        assert_eq!(diff.change, ChangeKind::Replace);
        assert_eq!(diff.immutable_changed, vec!["location"]);
    }

    #[test]
    fn unresolved_reference_counts_as_change() {
        let engine = DiffEngine::new();
        let node = node(ResourceDecl::new("kind", "res").reference("member", "sa", "email"));
        let record = record_with(&[("member", json!("sa@demo.iam"))]);

        let diff = engine.diff_node(&node, Some(&record), &KindSchema::new(), &no_outputs);
        assert_eq!(diff.change, ChangeKind::Update);
        assert_eq!(
            diff.details[0].new_value.as_deref(),
            Some(KNOWN_AFTER_APPLY)
        );
    }

    #[test]
    fn removed_key_counts_as_change() {
        let engine = DiffEngine::new();
        let node = node(ResourceDecl::new("kind", "res").property("location", "us-central1"));
        let record = record_with(&[
            ("location", json!("us-central1")),
            ("labels", json!({"team": "infra"})),
        ]);

        let diff = engine.diff_node(&node, Some(&record), &KindSchema::new(), &no_outputs);
        assert_eq!(diff.change, ChangeKind::Update);
        assert_eq!(diff.changed_keys, vec!["labels"]);
        assert!(diff.details[0].new_value.is_none());
    }

    #[test]
    fn kind_change_forces_replace() {
        let engine = DiffEngine::new();
        let node = node(ResourceDecl::new("gcp:sql:Database", "res"));
        let record = record_with(&[]);

        let diff = engine.diff_node(&node, Some(&record), &KindSchema::new(), &no_outputs);
        assert_eq!(diff.change, ChangeKind::Replace);
        assert_eq!(diff.immutable_changed, vec!["kind"]);
    }

    #[test]
    fn stale_record_diff() {
        let record = record_with(&[]);
        let diff = DiffEngine::deleted(&record);
        assert_eq!(diff.change, ChangeKind::Delete);
        assert_eq!(diff.details[0].old_value.as_deref(), Some("id-1"));
    }
}
