//! Resource model for the provisioning engine.
//!
//! This module covers everything declared before a plan exists:
//! - Resource declarations and their registered nodes
//! - Property values, including deferred references between resources
//! - The registry collecting declarations and stack exports
//! - Property fingerprinting for change detection

mod fingerprint;
mod node;
mod registry;
mod value;

pub use fingerprint::PropertyHasher;
pub use node::{ResourceDecl, ResourceNode};
pub use registry::ResourceRegistry;
pub use value::{MissingOutput, Properties, PropertyValue, ResolvedProperties};
