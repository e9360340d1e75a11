//! Graph construction from a declaration set.
//!
//! Building a graph validates every reference target, injects stack
//! defaults, infers edges from property references, rejects cycles and
//! fixes the canonical execution order. Construction is a pure function
//! of the registry and context; no provider or state access happens
//! here.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use tracing::{debug, info};

use crate::context::StackContext;
use crate::error::{DeclarationError, GraphError, Result};
use crate::resource::{PropertyValue, ResourceNode, ResourceRegistry};

use super::edge::{DependencyEdge, EdgeOrigin};

/// Builds a [`ResourceGraph`] from a registry and stack context.
#[derive(Debug, Default)]
pub struct GraphBuilder {
    context: StackContext,
}

impl GraphBuilder {
    /// Creates a builder for the given stack context.
    #[must_use]
    pub const fn new(context: StackContext) -> Self {
        Self { context }
    }

    /// Validates the declaration set and assembles the graph.
    ///
    /// On failure no partial graph is returned; the registry is
    /// consumed either way.
    ///
    /// # Errors
    ///
    /// Returns [`DeclarationError::UnknownReference`] or
    /// [`DeclarationError::UnknownExportReference`] when a reference or
    /// explicit dependency targets an unregistered logical name, and
    /// [`GraphError::CycleDetected`] when the dependency relation is
    /// cyclic.
    pub fn build(&self, registry: ResourceRegistry) -> Result<ResourceGraph> {
        let (mut nodes, exports) = registry.into_parts();

        for node in &mut nodes {
            for (key, value) in self.context.defaults() {
                node.insert_default_property(key, value.clone());
            }
        }

        let index: HashMap<String, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (node.name().to_string(), i))
            .collect();

        for node in &nodes {
            for target in node.dependency_names() {
                if !index.contains_key(target) {
                    return Err(DeclarationError::UnknownReference {
                        node: node.name().to_string(),
                        target: target.to_string(),
                    }
                    .into());
                }
            }
        }

        for (export, value) in &exports {
            let mut sources = Vec::new();
            value.referenced_sources(&mut sources);
            for target in sources {
                if !index.contains_key(target) {
                    return Err(DeclarationError::UnknownExportReference {
                        export: export.clone(),
                        target: target.to_string(),
                    }
                    .into());
                }
            }
        }

        let edges = infer_edges(&nodes);
        detect_cycle(&nodes, &index)?;
        let order = execution_order(&nodes);

        let mut dependents: HashMap<String, BTreeSet<String>> = HashMap::new();
        for edge in &edges {
            dependents
                .entry(edge.from.clone())
                .or_default()
                .insert(edge.to.clone());
        }

        info!(
            stack = self.context.stack(),
            nodes = nodes.len(),
            edges = edges.len(),
            "resource graph built"
        );

        Ok(ResourceGraph {
            stack: self.context.stack().to_string(),
            nodes,
            index,
            edges,
            dependents,
            order,
            exports,
        })
    }
}

/// Derives the deduplicated edge set.
///
/// A pair connected both by a property reference and an explicit
/// `depends_on` yields one edge with [`EdgeOrigin::Reference`], since
/// the reference carries the data dependency.
fn infer_edges(nodes: &[ResourceNode]) -> Vec<DependencyEdge> {
    let mut by_pair: BTreeMap<(String, String), EdgeOrigin> = BTreeMap::new();
    for node in nodes {
        for source in node.referenced_sources() {
            by_pair.insert(
                (source.to_string(), node.name().to_string()),
                EdgeOrigin::Reference,
            );
        }
        for target in node.explicit_dependencies() {
            by_pair
                .entry((target.clone(), node.name().to_string()))
                .or_insert(EdgeOrigin::Explicit);
        }
    }
    by_pair
        .into_iter()
        .map(|((from, to), origin)| DependencyEdge { from, to, origin })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// Depth-first cycle check over the dependency relation.
///
/// Nodes are visited in name order and dependencies in sorted order, so
/// the first cycle found is deterministic. The reported cycle lists the
/// nodes along the loop starting at its entry point.
fn detect_cycle(nodes: &[ResourceNode], index: &HashMap<String, usize>) -> Result<()> {
    let mut marks = vec![Mark::Unvisited; nodes.len()];
    let mut path = Vec::new();

    let mut roots: Vec<&str> = nodes.iter().map(ResourceNode::name).collect();
    roots.sort_unstable();

    for name in roots {
        let i = index[name];
        if marks[i] == Mark::Unvisited {
            visit(i, nodes, index, &mut marks, &mut path)?;
        }
    }
    Ok(())
}

fn visit(
    i: usize,
    nodes: &[ResourceNode],
    index: &HashMap<String, usize>,
    marks: &mut [Mark],
    path: &mut Vec<usize>,
) -> Result<()> {
    marks[i] = Mark::InProgress;
    path.push(i);

    for dep in nodes[i].dependency_names() {
        let j = index[dep];
        match marks[j] {
            Mark::InProgress => {
                let entry = path.iter().position(|&p| p == j).unwrap_or(0);
                let cycle = path[entry..]
                    .iter()
                    .map(|&p| nodes[p].name().to_string())
                    .collect();
                return Err(GraphError::CycleDetected { cycle }.into());
            }
            Mark::Unvisited => visit(j, nodes, index, marks, path)?,
            Mark::Done => {}
        }
    }

    path.pop();
    marks[i] = Mark::Done;
    Ok(())
}

/// Kahn's algorithm with a sorted ready set.
///
/// Among nodes whose dependencies are all emitted, the lexicographically
/// smallest logical name goes next. This makes the order canonical for a
/// given declaration set. Must be called after cycle detection.
fn execution_order(nodes: &[ResourceNode]) -> Vec<String> {
    let mut indegree: HashMap<&str, usize> = nodes
        .iter()
        .map(|node| (node.name(), node.dependency_names().len()))
        .collect();

    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for node in nodes {
        for dep in node.dependency_names() {
            dependents.entry(dep).or_default().push(node.name());
        }
    }

    let mut ready: BTreeSet<&str> = indegree
        .iter()
        .filter(|&(_, &degree)| degree == 0)
        .map(|(&name, _)| name)
        .collect();

    let mut order = Vec::with_capacity(nodes.len());
    while let Some(name) = ready.pop_first() {
        order.push(name.to_string());
        if let Some(children) = dependents.get(name) {
            for &dependent in children {
                if let Some(degree) = indegree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert(dependent);
                    }
                }
            }
        }
    }

    debug!(nodes = order.len(), "execution order fixed");
    order
}

/// A validated, acyclic resource graph with a canonical order.
///
/// Owns its nodes for the duration of a plan; the planner and executor
/// borrow from it.
#[derive(Debug)]
pub struct ResourceGraph {
    stack: String,
    nodes: Vec<ResourceNode>,
    index: HashMap<String, usize>,
    edges: Vec<DependencyEdge>,
    dependents: HashMap<String, BTreeSet<String>>,
    order: Vec<String>,
    exports: BTreeMap<String, PropertyValue>,
}

impl ResourceGraph {
    /// Stack this graph was built for.
    #[must_use]
    pub fn stack(&self) -> &str {
        &self.stack
    }

    /// Looks up a node by logical name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ResourceNode> {
        self.index.get(name).map(|&i| &self.nodes[i])
    }

    /// Returns true if the graph contains the logical name.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Nodes in declaration order.
    #[must_use]
    pub fn nodes(&self) -> &[ResourceNode] {
        &self.nodes
    }

    /// Deduplicated dependency edges.
    #[must_use]
    pub fn edges(&self) -> &[DependencyEdge] {
        &self.edges
    }

    /// Canonical execution order: every dependency precedes its
    /// dependents, ties broken by logical name.
    #[must_use]
    pub fn execution_order(&self) -> &[String] {
        &self.order
    }

    /// Nodes in canonical execution order.
    pub fn ordered_nodes(&self) -> impl Iterator<Item = &ResourceNode> {
        self.order.iter().filter_map(|name| self.get(name))
    }

    /// Names of the nodes that depend on `name` through an edge.
    #[must_use]
    pub fn direct_dependents(&self, name: &str) -> Option<&BTreeSet<String>> {
        self.dependents.get(name)
    }

    /// All nodes that depend on `name`, directly or transitively.
    #[must_use]
    pub fn dependents_of(&self, name: &str) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        let mut queue = VecDeque::from([name.to_string()]);
        while let Some(current) = queue.pop_front() {
            if let Some(direct) = self.dependents.get(&current) {
                for dependent in direct {
                    if out.insert(dependent.clone()) {
                        queue.push_back(dependent.clone());
                    }
                }
            }
        }
        out
    }

    /// Declared stack exports.
    #[must_use]
    pub const fn exports(&self) -> &BTreeMap<String, PropertyValue> {
        &self.exports
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the graph has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
