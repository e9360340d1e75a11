//! The planner: turns a graph plus recorded state into an ordered plan.
//!
//! Nodes are diffed in the graph's canonical order, so every node's
//! referenced sources already have a decided change when the node
//! itself is examined. Replacements are expanded into a delete and a
//! create here, as a rewrite of the operation graph; the executor never
//! sees a replace.

use std::collections::{BTreeSet, HashMap};

use serde_json::Value;
use tracing::{debug, info};

use crate::error::{EngineError, PlanError, Result};
use crate::graph::ResourceGraph;
use crate::provider::Provider;
use crate::resource::ResourceNode;
use crate::state::{StateRecord, StateStore};

use super::diff::{ChangeKind, DiffEngine, ResourceDiff};
use super::plan::{OpKind, OpReason, Operation, Plan};

/// What to do when a replacement would orphan a dependent whose kind
/// cannot tolerate its dependency being recreated underneath it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrphanPolicy {
    /// Reject the plan. This is the default.
    #[default]
    Enforce,
    /// Allow the plan; the dependent is left pointing at the recreated
    /// resource.
    Permissive,
}

/// Computes plans from a resource graph and prior state.
#[derive(Debug, Default)]
pub struct Planner {
    diff: DiffEngine,
    orphan_policy: OrphanPolicy,
}

impl Planner {
    /// Creates a planner with the enforcing orphan policy.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            diff: DiffEngine::new(),
            orphan_policy: OrphanPolicy::Enforce,
        }
    }

    /// Sets the orphan policy.
    #[must_use]
    pub const fn with_orphan_policy(mut self, policy: OrphanPolicy) -> Self {
        self.orphan_policy = policy;
        self
    }

    /// Computes the plan for `graph` against the records in `store`.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::ReplaceOrphansDependent`] when a replacement
    /// would orphan a dependent that cannot tolerate it under the
    /// enforcing policy, [`PlanError::RecordMissingId`] when a record
    /// that must be updated or deleted has no provider id, and a state
    /// error when the store cannot be read. No partial plan is returned
    /// on failure.
    pub async fn plan<P, S>(&self, graph: &ResourceGraph, provider: &P, store: &S) -> Result<Plan>
    where
        P: Provider + ?Sized,
        S: StateStore + ?Sized,
    {
        let records: HashMap<String, StateRecord> = store
            .list()
            .await
            .map_err(EngineError::State)?
            .into_iter()
            .map(|record| (record.name.clone(), record))
            .collect();

        let diffs = self.diff_all(graph, provider, &records);
        self.check_orphans(graph, provider, &diffs)?;

        let mut operations = Vec::new();

        // Records whose logical names left the declaration set are
        // deleted first, dependents before their dependencies.
        let stale_delete_index = plan_stale_deletes(graph, &records, &mut operations)?;

        build_node_operations(graph, &records, &diffs, &stale_delete_index, &mut operations)?;

        let plan = Plan::new(graph.stack(), operations);
        info!(
            plan_id = %plan.id,
            stack = plan.stack,
            creates = plan.create_count(),
            updates = plan.update_count(),
            deletes = plan.delete_count(),
            "plan computed"
        );
        Ok(plan)
    }

    /// Diffs every declared node in canonical order.
    ///
    /// A reference is comparable only when its source is already decided
    /// as unchanged; it then resolves against the source's recorded
    /// outputs. Anything else counts as a change, since the value is
    /// known only after apply.
    fn diff_all<'g, P>(
        &self,
        graph: &'g ResourceGraph,
        provider: &P,
        records: &HashMap<String, StateRecord>,
    ) -> Vec<(&'g ResourceNode, ResourceDiff)>
    where
        P: Provider + ?Sized,
    {
        let mut changes: HashMap<&str, ChangeKind> = HashMap::new();
        let mut diffs = Vec::with_capacity(graph.len());

        for node in graph.ordered_nodes() {
            let schema = provider.schema(node.kind());
            let lookup = |source: &str, output: &str| -> Option<Value> {
                if changes.get(source) != Some(&ChangeKind::NoOp) {
                    return None;
                }
                records.get(source).and_then(|r| r.output(output).cloned())
            };
            let diff = self
                .diff
                .diff_node(node, records.get(node.name()), &schema, &lookup);
            changes.insert(node.name(), diff.change);
            diffs.push((node, diff));
        }

        diffs
    }

    /// Rejects plans in which a replacement orphans a dependent whose
    /// kind does not survive it, unless the dependent is itself created
    /// or recreated in this plan.
    fn check_orphans<P>(
        &self,
        graph: &ResourceGraph,
        provider: &P,
        diffs: &[(&ResourceNode, ResourceDiff)],
    ) -> Result<()>
    where
        P: Provider + ?Sized,
    {
        if self.orphan_policy == OrphanPolicy::Permissive {
            return Ok(());
        }

        let changes: HashMap<&str, ChangeKind> = diffs
            .iter()
            .map(|(node, diff)| (node.name(), diff.change))
            .collect();

        for (node, diff) in diffs {
            if diff.change != ChangeKind::Replace {
                continue;
            }
            let Some(dependents) = graph.direct_dependents(node.name()) else {
                continue;
            };
            for dependent in dependents {
                let Some(dep_node) = graph.get(dependent) else {
                    continue;
                };
                let recreated = matches!(
                    changes.get(dependent.as_str()),
                    Some(ChangeKind::Create | ChangeKind::Replace)
                );
                if recreated {
                    continue;
                }
                if !provider.schema(dep_node.kind()).survives_dependency_replace {
                    return Err(PlanError::ReplaceOrphansDependent {
                        replaced: node.name().to_string(),
                        dependent: dependent.clone(),
                        dependent_kind: dep_node.kind().to_string(),
                    }
                    .into());
                }
            }
        }
        Ok(())
    }
}

/// Emits delete operations for records no longer declared, in reverse
/// dependency order, and returns for each declared name the indices of
/// stale deletes that depended on it.
fn plan_stale_deletes(
    graph: &ResourceGraph,
    records: &HashMap<String, StateRecord>,
    operations: &mut Vec<Operation>,
) -> Result<HashMap<String, Vec<usize>>> {
    let stale: HashMap<&str, &StateRecord> = records
        .iter()
        .filter(|(name, _)| !graph.contains(name))
        .map(|(name, record)| (name.as_str(), record))
        .collect();

    if stale.is_empty() {
        return Ok(HashMap::new());
    }

    // Number of stale records still depending on each stale record.
    let mut pending_dependents: HashMap<&str, usize> = stale.keys().map(|&n| (n, 0)).collect();
    for record in stale.values() {
        for dep in &record.dependencies {
            if let Some(count) = pending_dependents.get_mut(dep.as_str()) {
                *count += 1;
            }
        }
    }

    let mut ready: BTreeSet<&str> = pending_dependents
        .iter()
        .filter(|&(_, &count)| count == 0)
        .map(|(&name, _)| name)
        .collect();

    let mut op_index: HashMap<&str, usize> = HashMap::new();
    while let Some(name) = ready.pop_first() {
        let record = stale[name];
        if !record.has_provider_id() {
            return Err(PlanError::RecordMissingId {
                name: name.to_string(),
            }
            .into());
        }

        // A stale record is deleted only after every stale record that
        // depended on it.
        let dependencies: Vec<usize> = stale
            .values()
            .filter(|r| r.dependencies.iter().any(|d| d == name))
            .filter_map(|r| op_index.get(r.name.as_str()).copied())
            .collect();

        let diff = DiffEngine::deleted(record);
        debug!(diff = %diff, "stale record scheduled for delete");
        op_index.insert(name, operations.len());
        operations.push(Operation {
            kind: OpKind::Delete,
            name: name.to_string(),
            resource_kind: record.kind.clone(),
            reason: OpReason::RemovedFromDeclarations,
            desired: None,
            provider_id: Some(record.provider_id.clone()),
            record_dependencies: Vec::new(),
            details: diff.details,
            dependencies,
        });

        // Deleting this record unblocks the stale records it depended on.
        for dep in &record.dependencies {
            if let Some(count) = pending_dependents.get_mut(dep.as_str()) {
                *count -= 1;
                if *count == 0 {
                    ready.insert(dep.as_str());
                }
            }
        }
    }

    // Dependency lists recorded from an acyclic plan cannot cycle, but a
    // corrupted store should not wedge planning; leftovers go last in
    // name order.
    let mut leftovers: Vec<&str> = stale
        .keys()
        .filter(|name| !op_index.contains_key(**name))
        .copied()
        .collect();
    leftovers.sort_unstable();
    for name in leftovers {
        let record = stale[name];
        op_index.insert(name, operations.len());
        operations.push(Operation {
            kind: OpKind::Delete,
            name: name.to_string(),
            resource_kind: record.kind.clone(),
            reason: OpReason::RemovedFromDeclarations,
            desired: None,
            provider_id: Some(record.provider_id.clone()),
            record_dependencies: Vec::new(),
            details: DiffEngine::deleted(record).details,
            dependencies: Vec::new(),
        });
    }

    // Index stale deletes by the declared names they depended on, so a
    // replacement of a declared node waits for them.
    let mut by_dependency: HashMap<String, Vec<usize>> = HashMap::new();
    for (&name, record) in &stale {
        for dep in &record.dependencies {
            if graph.contains(dep) {
                by_dependency
                    .entry(dep.clone())
                    .or_default()
                    .push(op_index[name]);
            }
        }
    }
    Ok(by_dependency)
}

/// Emits operations for declared nodes in canonical order, expanding
/// replacements into a delete strictly before a create with dependents
/// re-pointed at the create.
fn build_node_operations(
    graph: &ResourceGraph,
    records: &HashMap<String, StateRecord>,
    diffs: &[(&ResourceNode, ResourceDiff)],
    stale_delete_index: &HashMap<String, Vec<usize>>,
    operations: &mut Vec<Operation>,
) -> Result<()> {
    let mut apply_index: HashMap<&str, usize> = HashMap::new();

    for (node, diff) in diffs {
        let dep_indices: Vec<usize> = node
            .dependency_names()
            .iter()
            .filter_map(|dep| apply_index.get(dep).copied())
            .collect();
        let record_dependencies: Vec<String> = node
            .dependency_names()
            .iter()
            .map(ToString::to_string)
            .collect();

        match diff.change {
            ChangeKind::Create => {
                apply_index.insert(node.name(), operations.len());
                operations.push(Operation {
                    kind: OpKind::Create,
                    name: node.name().to_string(),
                    resource_kind: node.kind().to_string(),
                    reason: OpReason::NotInState,
                    desired: Some(node.properties().clone()),
                    provider_id: None,
                    record_dependencies,
                    details: diff.details.clone(),
                    dependencies: dep_indices,
                });
            }
            ChangeKind::NoOp => {
                apply_index.insert(node.name(), operations.len());
                operations.push(Operation {
                    kind: OpKind::NoOp,
                    name: node.name().to_string(),
                    resource_kind: node.kind().to_string(),
                    reason: OpReason::Unchanged,
                    desired: None,
                    provider_id: records.get(node.name()).map(|r| r.provider_id.clone()),
                    record_dependencies,
                    details: Vec::new(),
                    dependencies: dep_indices,
                });
            }
            ChangeKind::Update => {
                let record = require_record(records, node.name())?;
                apply_index.insert(node.name(), operations.len());
                operations.push(Operation {
                    kind: OpKind::Update,
                    name: node.name().to_string(),
                    resource_kind: node.kind().to_string(),
                    reason: OpReason::Changed {
                        keys: diff.changed_keys.clone(),
                    },
                    desired: Some(node.properties().clone()),
                    provider_id: Some(record.provider_id.clone()),
                    record_dependencies,
                    details: diff.details.clone(),
                    dependencies: dep_indices,
                });
            }
            ChangeKind::Replace => {
                let record = require_record(records, node.name())?;

                // Delete the old resource first; stale records that
                // depended on it must already be gone.
                let mut delete_deps: Vec<usize> = stale_delete_index
                    .get(node.name())
                    .cloned()
                    .unwrap_or_default();
                delete_deps.sort_unstable();
                let delete_idx = operations.len();
                operations.push(Operation {
                    kind: OpKind::Delete,
                    name: node.name().to_string(),
                    resource_kind: record.kind.clone(),
                    reason: OpReason::Replacement {
                        keys: diff.immutable_changed.clone(),
                    },
                    desired: None,
                    provider_id: Some(record.provider_id.clone()),
                    record_dependencies: Vec::new(),
                    details: Vec::new(),
                    dependencies: delete_deps,
                });

                // Dependents re-point at the create, so nothing that
                // consumes the resource runs between delete and create.
                let mut create_deps = dep_indices;
                create_deps.push(delete_idx);
                apply_index.insert(node.name(), operations.len());
                operations.push(Operation {
                    kind: OpKind::Create,
                    name: node.name().to_string(),
                    resource_kind: node.kind().to_string(),
                    reason: OpReason::Replacement {
                        keys: diff.immutable_changed.clone(),
                    },
                    desired: Some(node.properties().clone()),
                    provider_id: None,
                    record_dependencies,
                    details: diff.details.clone(),
                    dependencies: create_deps,
                });
            }
            ChangeKind::Delete => {
                // diff_node never decides Delete for a declared node.
                return Err(EngineError::internal(format!(
                    "declared node '{}' diffed as delete",
                    node.name()
                )));
            }
        }
    }
    Ok(())
}

fn require_record<'r>(
    records: &'r HashMap<String, StateRecord>,
    name: &str,
) -> Result<&'r StateRecord> {
    let record = records
        .get(name)
        .ok_or_else(|| EngineError::internal(format!("no record for diffed node '{name}'")))?;
    if !record.has_provider_id() {
        return Err(PlanError::RecordMissingId {
            name: name.to_string(),
        }
        .into());
    }
    Ok(record)
}
