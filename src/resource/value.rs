//! Property values for resource declarations.
//!
//! A property is either a literal JSON value, a deferred reference to
//! another resource's output, or a list mixing both. References are the
//! engine's only coupling between a node's inputs and another node's
//! outputs, so the dependency edge and the data dependency are the same
//! structural fact.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Desired properties of a resource, keyed by property name.
///
/// A `BTreeMap` keeps iteration deterministic for fingerprinting and
/// plan rendering.
pub type Properties = BTreeMap<String, PropertyValue>;

/// Fully resolved properties as sent to a provider.
pub type ResolvedProperties = serde_json::Map<String, Value>;

/// A single property value in a resource declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyValue {
    /// A literal JSON value, known at declaration time.
    Literal(Value),

    /// A deferred reference to another resource's output.
    ///
    /// Resolves only after the referenced node has been applied. An
    /// optional template wraps the resolved value; every `{}` in the
    /// template is substituted (e.g. `serviceAccount:{}` around an
    /// account email).
    Reference {
        /// Logical name of the producing resource.
        source: String,
        /// Output key on the producing resource.
        output: String,
        /// Optional wrapping template applied after resolution.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        template: Option<String>,
    },

    /// A list of values, each literal or deferred.
    List(Vec<PropertyValue>),
}

/// A reference that could not be resolved from the available outputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingOutput {
    /// Logical name of the producing resource.
    pub source: String,
    /// The output key that was not available.
    pub output: String,
}

impl PropertyValue {
    /// Creates a literal string value.
    #[must_use]
    pub fn string(value: impl Into<String>) -> Self {
        Self::Literal(Value::String(value.into()))
    }

    /// Creates a deferred reference to `output` of the resource named
    /// `source`.
    #[must_use]
    pub fn reference(source: impl Into<String>, output: impl Into<String>) -> Self {
        Self::Reference {
            source: source.into(),
            output: output.into(),
            template: None,
        }
    }

    /// Creates a deferred reference whose resolved value is substituted
    /// into `template` at every `{}`.
    #[must_use]
    pub fn templated_reference(
        source: impl Into<String>,
        output: impl Into<String>,
        template: impl Into<String>,
    ) -> Self {
        Self::Reference {
            source: source.into(),
            output: output.into(),
            template: Some(template.into()),
        }
    }

    /// Collects the logical names this value references, recursing into
    /// lists. Duplicates are preserved; callers dedupe as needed.
    pub fn referenced_sources<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::Literal(_) => {}
            Self::Reference { source, .. } => out.push(source.as_str()),
            Self::List(items) => {
                for item in items {
                    item.referenced_sources(out);
                }
            }
        }
    }

    /// Returns true if this value (or any list element) is deferred.
    #[must_use]
    pub fn is_deferred(&self) -> bool {
        match self {
            Self::Literal(_) => false,
            Self::Reference { .. } => true,
            Self::List(items) => items.iter().any(Self::is_deferred),
        }
    }

    /// Resolves this value against a lookup of `(source, output)` pairs.
    ///
    /// The lookup returns `None` when the output is not available, which
    /// surfaces as [`MissingOutput`] naming the first unresolvable
    /// reference.
    ///
    /// # Errors
    ///
    /// Returns [`MissingOutput`] if any referenced output is unavailable.
    pub fn resolve_with<F>(&self, lookup: &F) -> std::result::Result<Value, MissingOutput>
    where
        F: Fn(&str, &str) -> Option<Value>,
    {
        match self {
            Self::Literal(value) => Ok(value.clone()),
            Self::Reference {
                source,
                output,
                template,
            } => {
                let value = lookup(source, output).ok_or_else(|| MissingOutput {
                    source: source.clone(),
                    output: output.clone(),
                })?;
                Ok(match template {
                    Some(tpl) => Value::String(apply_template(tpl, &value)),
                    None => value,
                })
            }
            Self::List(items) => {
                let mut resolved = Vec::with_capacity(items.len());
                for item in items {
                    resolved.push(item.resolve_with(lookup)?);
                }
                Ok(Value::Array(resolved))
            }
        }
    }
}

/// Substitutes `value` into every `{}` of `template`.
///
/// String outputs are inserted verbatim; other JSON values use their
/// compact rendering.
fn apply_template(template: &str, value: &Value) -> String {
    let rendered = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    template.replace("{}", &rendered)
}

impl From<Value> for PropertyValue {
    fn from(value: Value) -> Self {
        Self::Literal(value)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::Literal(Value::String(value.to_string()))
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        Self::Literal(Value::String(value))
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        Self::Literal(Value::Bool(value))
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        Self::Literal(Value::from(value))
    }
}

impl From<u64> for PropertyValue {
    fn from(value: u64) -> Self {
        Self::Literal(Value::from(value))
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        Self::Literal(Value::from(value))
    }
}

impl From<Vec<PropertyValue>> for PropertyValue {
    fn from(items: Vec<PropertyValue>) -> Self {
        Self::List(items)
    }
}

impl std::fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Literal(value) => write!(f, "{value}"),
            Self::Reference {
                source,
                output,
                template,
            } => {
                if template.is_some() {
                    write!(f, "${{{source}.{output}}} (templated)")
                } else {
                    write!(f, "${{{source}.{output}}}")
                }
            }
            Self::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
        }
    }
}
