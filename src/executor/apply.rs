//! Worker-pool plan executor.
//!
//! Operations are scheduled as soon as every predecessor has completed
//! successfully, up to the configured concurrency limit. A failure is
//! contained: the failed operation's transitive dependents are marked
//! skipped and everything independent keeps running. State is written
//! after each successful operation, never batched, so an interrupted
//! apply leaves accurate records behind.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::error::{EngineError, ExecutionError, Result, StateError};
use crate::graph::ResourceGraph;
use crate::planner::{OpKind, Operation, Plan};
use crate::provider::{Outputs, Provider};
use crate::resource::ResolvedProperties;
use crate::state::{StateRecord, StateStore};

/// Plan-level cancellation signal.
///
/// Tripping the flag stops scheduling immediately; operations already
/// in flight run to completion and their results are still recorded.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Creates an untripped flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns true if cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Tuning knobs for one apply.
#[derive(Debug, Clone)]
pub struct ApplyOptions {
    /// Maximum operations in flight at once. Zero is treated as one.
    pub concurrency: usize,
    /// Cancellation signal checked at every scheduling point.
    pub cancel: CancelFlag,
}

impl ApplyOptions {
    /// Default options: four workers, no cancellation.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the concurrency limit.
    #[must_use]
    pub const fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Attaches an externally held cancellation flag.
    #[must_use]
    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            cancel: CancelFlag::new(),
        }
    }
}

/// Final status of a single operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpStatus {
    /// The operation completed and its state was recorded.
    Succeeded,
    /// The operation ran and failed, or could not be prepared.
    Failed,
    /// Not attempted because a transitive predecessor failed.
    Skipped,
    /// Not attempted because the apply was cancelled first.
    Cancelled,
}

/// Outcome of one operation.
#[derive(Debug, Clone)]
pub struct OperationResult {
    /// Index of the operation within the plan.
    pub index: usize,
    /// Logical name of the target resource.
    pub name: String,
    /// Operation kind.
    pub kind: OpKind,
    /// Final status.
    pub status: OpStatus,
    /// Error description for failed operations.
    pub error: Option<String>,
}

/// Overall outcome of an apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyStatus {
    /// Every operation succeeded.
    Success,
    /// At least one operation failed or was skipped.
    PartialFailure,
    /// The apply was cancelled before every operation could run.
    Cancelled,
}

/// Per-operation results plus resolved stack exports.
#[derive(Debug)]
pub struct ExecutionResult {
    /// Overall status.
    pub status: ApplyStatus,
    /// One result per plan operation, in plan order.
    pub results: Vec<OperationResult>,
    /// Stack exports that resolved after apply.
    pub exports: BTreeMap<String, Value>,
    /// Export names whose sources failed, were skipped, or produced no
    /// such output.
    pub unresolved_exports: Vec<String>,
}

impl ExecutionResult {
    /// Returns true if every operation succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == ApplyStatus::Success
    }

    fn count(&self, status: OpStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }

    /// Number of successful operations.
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.count(OpStatus::Succeeded)
    }

    /// Number of failed operations.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.count(OpStatus::Failed)
    }

    /// Number of skipped operations.
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.count(OpStatus::Skipped)
    }

    /// Number of cancelled operations.
    #[must_use]
    pub fn cancelled(&self) -> usize {
        self.count(OpStatus::Cancelled)
    }

    /// The failed operations.
    #[must_use]
    pub fn failed_operations(&self) -> Vec<&OperationResult> {
        self.results
            .iter()
            .filter(|r| r.status == OpStatus::Failed)
            .collect()
    }

    /// The skipped operations.
    #[must_use]
    pub fn skipped_operations(&self) -> Vec<&OperationResult> {
        self.results
            .iter()
            .filter(|r| r.status == OpStatus::Skipped)
            .collect()
    }
}

impl std::fmt::Display for ExecutionResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Applied {} operations: {} succeeded, {} failed, {} skipped, {} cancelled",
            self.results.len(),
            self.succeeded(),
            self.failed(),
            self.skipped(),
            self.cancelled()
        )
    }
}

/// Everything a spawned operation needs, resolved at schedule time.
struct OpTask {
    index: usize,
    kind: OpKind,
    name: String,
    resource_kind: String,
    provider_id: Option<String>,
    record_dependencies: Vec<String>,
    resolved: Option<ResolvedProperties>,
}

/// What a spawned operation reports back.
struct TaskDone {
    index: usize,
    outputs: Outputs,
    error: Option<ExecutionError>,
}

/// Applies plans against a provider and state store.
#[derive(Debug)]
pub struct PlanExecutor<P, S> {
    provider: Arc<P>,
    store: Arc<S>,
    options: ApplyOptions,
}

impl<P, S> PlanExecutor<P, S>
where
    P: Provider + 'static,
    S: StateStore + 'static,
{
    /// Creates an executor with default options.
    pub fn new(provider: Arc<P>, store: Arc<S>) -> Self {
        Self {
            provider,
            store,
            options: ApplyOptions::default(),
        }
    }

    /// Replaces the apply options.
    #[must_use]
    pub fn with_options(mut self, options: ApplyOptions) -> Self {
        self.options = options;
        self
    }

    /// Applies the plan, honoring its partial order.
    ///
    /// Failures are contained per operation and reported in the result;
    /// this call only errors on structural problems such as a plan that
    /// does not match the graph.
    ///
    /// # Errors
    ///
    /// Returns an error if an operation's dependency indices fall
    /// outside the plan or an operation task panics.
    pub async fn apply(&self, graph: &ResourceGraph, plan: &Plan) -> Result<ExecutionResult> {
        let total = plan.operations.len();
        info!(
            plan_id = %plan.id,
            stack = plan.stack,
            operations = total,
            concurrency = self.options.concurrency.max(1),
            provider = self.provider.provider_type(),
            "applying plan"
        );

        let mut remaining: Vec<usize> = plan
            .operations
            .iter()
            .map(|op| op.dependencies.len())
            .collect();
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); total];
        for (i, op) in plan.operations.iter().enumerate() {
            for &dep in &op.dependencies {
                if dep >= total {
                    return Err(EngineError::internal(format!(
                        "operation {i} depends on out-of-range operation {dep}"
                    )));
                }
                dependents[dep].push(i);
            }
        }

        let mut ready: BTreeSet<usize> = (0..total).filter(|&i| remaining[i] == 0).collect();
        let mut results: Vec<Option<OperationResult>> = vec![None; total];
        let mut outputs_table: HashMap<String, Outputs> = HashMap::new();
        let mut join_set: JoinSet<TaskDone> = JoinSet::new();
        let limit = self.options.concurrency.max(1);
        let cancel = self.options.cancel.clone();

        loop {
            while join_set.len() < limit && !cancel.is_cancelled() {
                let Some(&index) = ready.first() else { break };
                ready.remove(&index);
                let op = &plan.operations[index];

                match prepare_task(op, index, &outputs_table) {
                    Ok(task) => {
                        debug!(name = op.name, kind = %op.kind, "scheduling operation");
                        let provider = Arc::clone(&self.provider);
                        let store = Arc::clone(&self.store);
                        join_set.spawn(run_task(provider, store, task));
                    }
                    Err(err) => {
                        error!(name = op.name, %err, "operation failed before start");
                        results[index] = Some(OperationResult {
                            index,
                            name: op.name.clone(),
                            kind: op.kind,
                            status: OpStatus::Failed,
                            error: Some(err.to_string()),
                        });
                        skip_dependents(index, &dependents, &plan.operations, &mut results);
                    }
                }
            }

            let Some(joined) = join_set.join_next().await else {
                break;
            };
            let done = joined
                .map_err(|e| EngineError::internal(format!("operation task panicked: {e}")))?;
            let op = &plan.operations[done.index];

            match done.error {
                None => {
                    debug!(name = op.name, kind = %op.kind, "operation succeeded");
                    outputs_table.insert(op.name.clone(), done.outputs);
                    results[done.index] = Some(OperationResult {
                        index: done.index,
                        name: op.name.clone(),
                        kind: op.kind,
                        status: OpStatus::Succeeded,
                        error: None,
                    });
                    for &dependent in &dependents[done.index] {
                        remaining[dependent] -= 1;
                        if remaining[dependent] == 0 && results[dependent].is_none() {
                            ready.insert(dependent);
                        }
                    }
                }
                Some(err) => {
                    error!(name = op.name, %err, "operation failed");
                    results[done.index] = Some(OperationResult {
                        index: done.index,
                        name: op.name.clone(),
                        kind: op.kind,
                        status: OpStatus::Failed,
                        error: Some(err.to_string()),
                    });
                    skip_dependents(done.index, &dependents, &plan.operations, &mut results);
                }
            }
        }

        let mut final_results = Vec::with_capacity(total);
        for (i, slot) in results.into_iter().enumerate() {
            match slot {
                Some(result) => final_results.push(result),
                None if cancel.is_cancelled() => final_results.push(OperationResult {
                    index: i,
                    name: plan.operations[i].name.clone(),
                    kind: plan.operations[i].kind,
                    status: OpStatus::Cancelled,
                    error: None,
                }),
                None => {
                    return Err(EngineError::internal(format!(
                        "operation {i} never completed without a cancellation"
                    )));
                }
            }
        }

        let (exports, unresolved_exports) = resolve_exports(graph, &outputs_table);

        let all_ok = final_results.iter().all(|r| r.status == OpStatus::Succeeded);
        let status = if all_ok {
            ApplyStatus::Success
        } else if final_results.iter().any(|r| r.status == OpStatus::Cancelled) {
            ApplyStatus::Cancelled
        } else {
            ApplyStatus::PartialFailure
        };

        let result = ExecutionResult {
            status,
            results: final_results,
            exports,
            unresolved_exports,
        };
        if result.is_success() {
            info!(plan_id = %plan.id, "{result}");
        } else {
            warn!(plan_id = %plan.id, "{result}");
        }
        Ok(result)
    }
}

/// Resolves an operation's inputs against the outputs of its completed
/// predecessors.
fn prepare_task(
    op: &Operation,
    index: usize,
    outputs_table: &HashMap<String, Outputs>,
) -> std::result::Result<OpTask, ExecutionError> {
    let resolved = match op.kind {
        OpKind::Create | OpKind::Update => {
            let desired = op.desired.as_ref().ok_or_else(|| ExecutionError::Operation {
                name: op.name.clone(),
                source: crate::error::ProviderError::failed("operation carries no desired state"),
            })?;
            let lookup = |source: &str, output: &str| -> Option<Value> {
                outputs_table
                    .get(source)
                    .and_then(|outputs| outputs.get(output).cloned())
            };
            let mut resolved = ResolvedProperties::new();
            for (key, value) in desired {
                let v = value
                    .resolve_with(&lookup)
                    .map_err(|missing| ExecutionError::UnresolvedReference {
                        node: op.name.clone(),
                        source_name: missing.source,
                        output: missing.output,
                    })?;
                resolved.insert(key.clone(), v);
            }
            Some(resolved)
        }
        OpKind::Delete | OpKind::NoOp => None,
    };

    Ok(OpTask {
        index,
        kind: op.kind,
        name: op.name.clone(),
        resource_kind: op.resource_kind.clone(),
        provider_id: op.provider_id.clone(),
        record_dependencies: op.record_dependencies.clone(),
        resolved,
    })
}

/// Runs one operation to completion, recording state on success.
async fn run_task<P, S>(provider: Arc<P>, store: Arc<S>, task: OpTask) -> TaskDone
where
    P: Provider,
    S: StateStore,
{
    let index = task.index;
    let (outputs, error) = match task.kind {
        OpKind::Create => run_create(&*provider, &*store, &task).await,
        OpKind::Update => run_update(&*provider, &*store, &task).await,
        OpKind::Delete => run_delete(&*provider, &*store, &task).await,
        OpKind::NoOp => run_noop(&*store, &task).await,
    };
    TaskDone {
        index,
        outputs,
        error,
    }
}

async fn run_create<P, S>(provider: &P, store: &S, task: &OpTask) -> (Outputs, Option<ExecutionError>)
where
    P: Provider + ?Sized,
    S: StateStore + ?Sized,
{
    let resolved = task.resolved.clone().unwrap_or_default();
    match provider
        .create(&task.resource_kind, &task.name, &resolved)
        .await
    {
        Ok(provisioned) => {
            let record = StateRecord::new(
                &task.name,
                &task.resource_kind,
                &provisioned.id,
                resolved,
                provisioned.outputs.clone(),
                task.record_dependencies.clone(),
            );
            match store.put(&record).await {
                Ok(()) => (provisioned.outputs, None),
                Err(source) => (
                    Outputs::new(),
                    Some(ExecutionError::StateWrite {
                        name: task.name.clone(),
                        source,
                    }),
                ),
            }
        }
        Err(source) => (
            Outputs::new(),
            Some(ExecutionError::Operation {
                name: task.name.clone(),
                source,
            }),
        ),
    }
}

async fn run_update<P, S>(provider: &P, store: &S, task: &OpTask) -> (Outputs, Option<ExecutionError>)
where
    P: Provider + ?Sized,
    S: StateStore + ?Sized,
{
    let Some(id) = task.provider_id.as_deref() else {
        return (
            Outputs::new(),
            Some(ExecutionError::MissingProviderId {
                name: task.name.clone(),
            }),
        );
    };

    let prior = match store.get(&task.name).await {
        Ok(prior) => prior,
        Err(source) => {
            return (
                Outputs::new(),
                Some(ExecutionError::StateRead {
                    name: task.name.clone(),
                    source,
                }),
            );
        }
    };

    let resolved = task.resolved.clone().unwrap_or_default();
    match provider.update(&task.resource_kind, id, &resolved).await {
        Ok(outputs) => {
            let record = prior.map_or_else(
                || {
                    StateRecord::new(
                        &task.name,
                        &task.resource_kind,
                        id,
                        resolved.clone(),
                        outputs.clone(),
                        task.record_dependencies.clone(),
                    )
                },
                |prior| {
                    prior.updated(
                        resolved.clone(),
                        outputs.clone(),
                        task.record_dependencies.clone(),
                    )
                },
            );
            match store.put(&record).await {
                Ok(()) => (outputs, None),
                Err(source) => (
                    Outputs::new(),
                    Some(ExecutionError::StateWrite {
                        name: task.name.clone(),
                        source,
                    }),
                ),
            }
        }
        Err(source) => (
            Outputs::new(),
            Some(ExecutionError::Operation {
                name: task.name.clone(),
                source,
            }),
        ),
    }
}

async fn run_delete<P, S>(provider: &P, store: &S, task: &OpTask) -> (Outputs, Option<ExecutionError>)
where
    P: Provider + ?Sized,
    S: StateStore + ?Sized,
{
    let Some(id) = task.provider_id.as_deref() else {
        return (
            Outputs::new(),
            Some(ExecutionError::MissingProviderId {
                name: task.name.clone(),
            }),
        );
    };

    match provider.delete(&task.resource_kind, id).await {
        Ok(()) => {}
        // Already gone counts as deleted; the record still goes away.
        Err(err) if err.is_not_found() => {
            debug!(name = task.name, id, "resource already deleted");
        }
        Err(source) => {
            return (
                Outputs::new(),
                Some(ExecutionError::Operation {
                    name: task.name.clone(),
                    source,
                }),
            );
        }
    }

    match store.remove(&task.name).await {
        Ok(()) => (Outputs::new(), None),
        Err(source) => (
            Outputs::new(),
            Some(ExecutionError::StateWrite {
                name: task.name.clone(),
                source,
            }),
        ),
    }
}

/// No provider call; seeds the output table from the record and
/// refreshes the recorded dependency list if it changed, so future
/// delete ordering stays accurate.
async fn run_noop<S>(store: &S, task: &OpTask) -> (Outputs, Option<ExecutionError>)
where
    S: StateStore + ?Sized,
{
    let record = match store.get(&task.name).await {
        Ok(Some(record)) => record,
        Ok(None) => {
            return (
                Outputs::new(),
                Some(ExecutionError::StateRead {
                    name: task.name.clone(),
                    source: StateError::corrupted("record disappeared between plan and apply"),
                }),
            );
        }
        Err(source) => {
            return (
                Outputs::new(),
                Some(ExecutionError::StateRead {
                    name: task.name.clone(),
                    source,
                }),
            );
        }
    };

    if record.dependencies != task.record_dependencies {
        let refreshed = record.updated(
            record.properties.clone(),
            record.outputs.clone(),
            task.record_dependencies.clone(),
        );
        if let Err(source) = store.put(&refreshed).await {
            return (
                Outputs::new(),
                Some(ExecutionError::StateWrite {
                    name: task.name.clone(),
                    source,
                }),
            );
        }
    }

    (record.outputs, None)
}

/// Marks every transitive dependent of a failed operation skipped.
fn skip_dependents(
    failed: usize,
    dependents: &[Vec<usize>],
    operations: &[Operation],
    results: &mut [Option<OperationResult>],
) {
    let mut queue = VecDeque::from([failed]);
    while let Some(current) = queue.pop_front() {
        for &dependent in &dependents[current] {
            if results[dependent].is_none() {
                warn!(
                    name = operations[dependent].name,
                    "skipping operation after predecessor failure"
                );
                results[dependent] = Some(OperationResult {
                    index: dependent,
                    name: operations[dependent].name.clone(),
                    kind: operations[dependent].kind,
                    status: OpStatus::Skipped,
                    error: None,
                });
                queue.push_back(dependent);
            }
        }
    }
}

/// Resolves stack exports from the apply's output table. Exports whose
/// sources produced nothing are reported by name, not failed.
fn resolve_exports(
    graph: &ResourceGraph,
    outputs_table: &HashMap<String, Outputs>,
) -> (BTreeMap<String, Value>, Vec<String>) {
    let lookup = |source: &str, output: &str| -> Option<Value> {
        outputs_table
            .get(source)
            .and_then(|outputs| outputs.get(output).cloned())
    };

    let mut exports = BTreeMap::new();
    let mut unresolved = Vec::new();
    for (name, value) in graph.exports() {
        match value.resolve_with(&lookup) {
            Ok(resolved) => {
                exports.insert(name.clone(), resolved);
            }
            Err(missing) => {
                debug!(
                    export = name,
                    source = missing.source,
                    output = missing.output,
                    "export did not resolve"
                );
                unresolved.push(name.clone());
            }
        }
    }
    (exports, unresolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::StackContext;
    use crate::error::ProviderError;
    use crate::graph::GraphBuilder;
    use crate::planner::Planner;
    use crate::provider::{KindSchema, Provisioned, ProviderResult};
    use crate::resource::{PropertyValue, ResourceDecl, ResourceRegistry};
    use crate::state::MemoryStateStore;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// Scripted in-process provider: deterministic ids and outputs,
    /// per-name failure injection, recorded call order.
    #[derive(Default)]
    struct FakeProvider {
        schemas: BTreeMap<String, KindSchema>,
        fail_creates: HashSet<String>,
        not_found_deletes: HashSet<String>,
        cancel_on_create: Option<(String, CancelFlag)>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeProvider {
        fn new() -> Self {
            Self::default()
        }

        fn with_schema(mut self, kind: &str, schema: KindSchema) -> Self {
            self.schemas.insert(kind.to_string(), schema);
            self
        }

        fn failing_create(mut self, name: &str) -> Self {
            self.fail_creates.insert(name.to_string());
            self
        }

        fn already_deleted(mut self, id: &str) -> Self {
            self.not_found_deletes.insert(id.to_string());
            self
        }

        fn cancelling_on_create(mut self, name: &str, flag: CancelFlag) -> Self {
            self.cancel_on_create = Some((name.to_string(), flag));
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }
    }

    #[async_trait]
    impl Provider for FakeProvider {
        fn schema(&self, kind: &str) -> KindSchema {
            self.schemas.get(kind).cloned().unwrap_or_default()
        }

        async fn create(
            &self,
            _kind: &str,
            name: &str,
            properties: &ResolvedProperties,
        ) -> ProviderResult<Provisioned> {
            self.record(format!("create {name}"));
            if let Some((target, flag)) = &self.cancel_on_create {
                if target == name {
                    flag.cancel();
                }
            }
            if self.fail_creates.contains(name) {
                return Err(ProviderError::failed("injected create failure"));
            }
            let id = format!("prov/{name}/{}", properties.len());
            let mut outputs = Outputs::new();
            outputs.insert(String::from("id"), json!(id.clone()));
            outputs.insert(String::from("email"), json!(format!("{name}@demo.iam")));
            Ok(Provisioned { id, outputs })
        }

        async fn update(
            &self,
            _kind: &str,
            id: &str,
            _properties: &ResolvedProperties,
        ) -> ProviderResult<Outputs> {
            self.record(format!("update {id}"));
            let mut outputs = Outputs::new();
            outputs.insert(String::from("id"), json!(id));
            Ok(outputs)
        }

        async fn delete(&self, _kind: &str, id: &str) -> ProviderResult<()> {
            self.record(format!("delete {id}"));
            if self.not_found_deletes.contains(id) {
                return Err(ProviderError::NotFound { id: id.to_string() });
            }
            Ok(())
        }

        fn provider_type(&self) -> &'static str {
            "fake"
        }
    }

    fn graph_of(decls: Vec<ResourceDecl>) -> ResourceGraph {
        let mut registry = ResourceRegistry::new();
        for decl in decls {
            registry.declare(decl).unwrap();
        }
        GraphBuilder::new(StackContext::new("test"))
            .build(registry)
            .unwrap()
    }

    fn serial() -> ApplyOptions {
        ApplyOptions::new().with_concurrency(1)
    }

    async fn plan_and_apply(
        graph: &ResourceGraph,
        provider: Arc<FakeProvider>,
        store: Arc<MemoryStateStore>,
        options: ApplyOptions,
    ) -> ExecutionResult {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
        let plan = Planner::new()
            .plan(graph, &*provider, &*store)
            .await
            .unwrap();
        PlanExecutor::new(provider, store)
            .with_options(options)
            .apply(graph, &plan)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn create_chain_resolves_references_and_records_state() {
        let graph = graph_of(vec![
            ResourceDecl::new("kind", "sa").property("display", "builder"),
            ResourceDecl::new("kind", "binding").property(
                "member",
                PropertyValue::templated_reference("sa", "email", "serviceAccount:{}"),
            ),
        ]);
        let provider = Arc::new(FakeProvider::new());
        let store = Arc::new(MemoryStateStore::new());

        let result =
            plan_and_apply(&graph, Arc::clone(&provider), Arc::clone(&store), serial()).await;

        assert!(result.is_success());
        assert_eq!(result.succeeded(), 2);
        assert_eq!(provider.calls(), vec!["create sa", "create binding"]);

        let binding = store.get("binding").await.unwrap().unwrap();
        assert_eq!(
            binding.properties.get("member"),
            Some(&json!("serviceAccount:sa@demo.iam"))
        );
        assert_eq!(binding.dependencies, vec!["sa"]);
    }

    #[tokio::test]
    async fn round_trip_replan_is_all_noop() {
        let graph = graph_of(vec![
            ResourceDecl::new("kind", "sa").property("display", "builder"),
            ResourceDecl::new("kind", "binding")
                .property("member", PropertyValue::reference("sa", "email")),
        ]);
        let provider = Arc::new(FakeProvider::new());
        let store = Arc::new(MemoryStateStore::new());

        let result =
            plan_and_apply(&graph, Arc::clone(&provider), Arc::clone(&store), serial()).await;
        assert!(result.is_success());

        let replan = Planner::new().plan(&graph, &*provider, &*store).await.unwrap();
        assert!(replan.is_unchanged());
    }

    #[tokio::test]
    async fn failure_skips_dependents_but_not_siblings() {
        let graph = graph_of(vec![
            ResourceDecl::new("kind", "a"),
            ResourceDecl::new("kind", "b").depends_on("a"),
            ResourceDecl::new("kind", "c").depends_on("a"),
            ResourceDecl::new("kind", "d").depends_on("b"),
        ]);
        let provider = Arc::new(FakeProvider::new().failing_create("b"));
        let store = Arc::new(MemoryStateStore::new());

        let result =
            plan_and_apply(&graph, Arc::clone(&provider), Arc::clone(&store), serial()).await;

        assert_eq!(result.status, ApplyStatus::PartialFailure);
        let by_name: HashMap<&str, OpStatus> = result
            .results
            .iter()
            .map(|r| (r.name.as_str(), r.status))
            .collect();
        assert_eq!(by_name["a"], OpStatus::Succeeded);
        assert_eq!(by_name["b"], OpStatus::Failed);
        assert_eq!(by_name["c"], OpStatus::Succeeded);
        assert_eq!(by_name["d"], OpStatus::Skipped);

        // Only successes were recorded
        assert!(store.get("a").await.unwrap().is_some());
        assert!(store.get("b").await.unwrap().is_none());
        assert!(store.get("c").await.unwrap().is_some());
        assert!(store.get("d").await.unwrap().is_none());
        assert_eq!(result.failed_operations().len(), 1);
        assert_eq!(result.skipped_operations().len(), 1);
    }

    #[tokio::test]
    async fn cancelled_before_start_runs_nothing() {
        let graph = graph_of(vec![
            ResourceDecl::new("kind", "a"),
            ResourceDecl::new("kind", "b").depends_on("a"),
        ]);
        let provider = Arc::new(FakeProvider::new());
        let store = Arc::new(MemoryStateStore::new());

        let flag = CancelFlag::new();
        flag.cancel();
        let result = plan_and_apply(
            &graph,
            Arc::clone(&provider),
            Arc::clone(&store),
            serial().with_cancel_flag(flag),
        )
        .await;

        assert_eq!(result.status, ApplyStatus::Cancelled);
        assert_eq!(result.cancelled(), 2);
        assert!(provider.calls().is_empty());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn cancel_during_apply_records_in_flight_results() {
        let graph = graph_of(vec![
            ResourceDecl::new("kind", "a"),
            ResourceDecl::new("kind", "b").depends_on("a"),
        ]);
        let flag = CancelFlag::new();
        let provider = Arc::new(FakeProvider::new().cancelling_on_create("a", flag.clone()));
        let store = Arc::new(MemoryStateStore::new());

        let result = plan_and_apply(
            &graph,
            Arc::clone(&provider),
            Arc::clone(&store),
            serial().with_cancel_flag(flag),
        )
        .await;

        assert_eq!(result.status, ApplyStatus::Cancelled);
        // The in-flight create finished and its state was recorded
        assert_eq!(provider.calls(), vec!["create a"]);
        assert!(store.get("a").await.unwrap().is_some());
        let by_name: HashMap<&str, OpStatus> = result
            .results
            .iter()
            .map(|r| (r.name.as_str(), r.status))
            .collect();
        assert_eq!(by_name["a"], OpStatus::Succeeded);
        assert_eq!(by_name["b"], OpStatus::Cancelled);
    }

    #[tokio::test]
    async fn delete_of_already_gone_resource_succeeds() {
        let graph = graph_of(vec![]);
        let stale = StateRecord::new(
            "old",
            "kind",
            "id-old",
            ResolvedProperties::new(),
            Outputs::new(),
            vec![],
        );
        let provider = Arc::new(FakeProvider::new().already_deleted("id-old"));
        let store = Arc::new(MemoryStateStore::with_records([stale]));

        let result =
            plan_and_apply(&graph, Arc::clone(&provider), Arc::clone(&store), serial()).await;

        assert!(result.is_success());
        assert_eq!(provider.calls(), vec!["delete id-old"]);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn stale_chain_is_deleted_dependents_first() {
        let graph = graph_of(vec![]);
        let record = |name: &str, deps: Vec<&str>| {
            StateRecord::new(
                name,
                "kind",
                format!("id-{name}"),
                ResolvedProperties::new(),
                Outputs::new(),
                deps.into_iter().map(ToString::to_string).collect(),
            )
        };
        let provider = Arc::new(FakeProvider::new());
        let store = Arc::new(MemoryStateStore::with_records([
            record("a", vec![]),
            record("b", vec!["a"]),
            record("c", vec!["b"]),
        ]));

        let result =
            plan_and_apply(&graph, Arc::clone(&provider), Arc::clone(&store), serial()).await;

        assert!(result.is_success());
        assert_eq!(provider.calls(), vec!["delete id-c", "delete id-b", "delete id-a"]);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn exports_resolve_and_report_unresolved() {
        let mut registry = ResourceRegistry::new();
        registry
            .declare(ResourceDecl::new("kind", "sa").property("display", "builder"))
            .unwrap();
        registry.declare(ResourceDecl::new("kind", "broken")).unwrap();
        registry.export("sa_email", PropertyValue::reference("sa", "email"));
        registry.export("broken_id", PropertyValue::reference("broken", "id"));
        registry.export("region", "us-central1");
        let graph = GraphBuilder::new(StackContext::new("test"))
            .build(registry)
            .unwrap();

        let provider = Arc::new(FakeProvider::new().failing_create("broken"));
        let store = Arc::new(MemoryStateStore::new());

        let result =
            plan_and_apply(&graph, Arc::clone(&provider), Arc::clone(&store), serial()).await;

        assert_eq!(result.status, ApplyStatus::PartialFailure);
        assert_eq!(result.exports.get("sa_email"), Some(&json!("sa@demo.iam")));
        assert_eq!(result.exports.get("region"), Some(&json!("us-central1")));
        assert_eq!(result.unresolved_exports, vec!["broken_id"]);
    }

    #[tokio::test]
    async fn noop_refreshes_changed_dependency_list() {
        let graph = graph_of(vec![
            ResourceDecl::new("kind", "a"),
            ResourceDecl::new("kind", "b").depends_on("a"),
        ]);
        let mut a_outputs = Outputs::new();
        a_outputs.insert(String::from("id"), json!("id-a"));
        let a = StateRecord::new(
            "a",
            "kind",
            "id-a",
            ResolvedProperties::new(),
            a_outputs,
            vec![],
        );
        // b was recorded before it declared its dependency on a
        let b = StateRecord::new(
            "b",
            "kind",
            "id-b",
            ResolvedProperties::new(),
            Outputs::new(),
            vec![],
        );
        let provider = Arc::new(FakeProvider::new());
        let store = Arc::new(MemoryStateStore::with_records([a, b]));

        let result =
            plan_and_apply(&graph, Arc::clone(&provider), Arc::clone(&store), serial()).await;

        assert!(result.is_success());
        assert!(provider.calls().is_empty());
        let refreshed = store.get("b").await.unwrap().unwrap();
        assert_eq!(refreshed.dependencies, vec!["a"]);
    }

    #[tokio::test]
    async fn replace_deletes_old_before_creating_new() {
        let graph = graph_of(vec![
            ResourceDecl::new("kind", "repo").property("location", "europe-west1"),
        ]);
        let mut props = ResolvedProperties::new();
        props.insert(String::from("location"), json!("us-central1"));
        let old = StateRecord::new("repo", "kind", "id-old", props, Outputs::new(), vec![]);
        let provider = Arc::new(
            FakeProvider::new().with_schema("kind", KindSchema::new().immutable_key("location")),
        );
        let store = Arc::new(MemoryStateStore::with_records([old]));

        let result =
            plan_and_apply(&graph, Arc::clone(&provider), Arc::clone(&store), serial()).await;

        assert!(result.is_success());
        assert_eq!(provider.calls(), vec!["delete id-old", "create repo"]);
        let record = store.get("repo").await.unwrap().unwrap();
        assert_ne!(record.provider_id, "id-old");
        assert_eq!(record.properties.get("location"), Some(&json!("europe-west1")));
    }

    #[tokio::test]
    async fn update_keeps_identity_and_rewrites_record() {
        let graph = graph_of(vec![
            ResourceDecl::new("kind", "db").property("tier", "standard"),
        ]);
        let mut props = ResolvedProperties::new();
        props.insert(String::from("tier"), json!("basic"));
        let old = StateRecord::new("db", "kind", "id-db", props, Outputs::new(), vec![]);
        let created_at = old.created_at;
        let provider = Arc::new(FakeProvider::new());
        let store = Arc::new(MemoryStateStore::with_records([old]));

        let result =
            plan_and_apply(&graph, Arc::clone(&provider), Arc::clone(&store), serial()).await;

        assert!(result.is_success());
        assert_eq!(provider.calls(), vec!["update id-db"]);
        let record = store.get("db").await.unwrap().unwrap();
        assert_eq!(record.provider_id, "id-db");
        assert_eq!(record.created_at, created_at);
        assert_eq!(record.properties.get("tier"), Some(&json!("standard")));
    }

    #[tokio::test]
    async fn parallel_branches_complete_under_wide_limit() {
        let decls = (0..6)
            .map(|i| ResourceDecl::new("kind", format!("node{i}")))
            .collect();
        let graph = graph_of(decls);
        let provider = Arc::new(FakeProvider::new());
        let store = Arc::new(MemoryStateStore::new());

        let result = plan_and_apply(
            &graph,
            Arc::clone(&provider),
            Arc::clone(&store),
            ApplyOptions::new().with_concurrency(4),
        )
        .await;

        assert!(result.is_success());
        assert_eq!(result.succeeded(), 6);
        assert_eq!(store.len().await, 6);
    }

    #[tokio::test]
    async fn empty_plan_succeeds_immediately() {
        let graph = graph_of(vec![]);
        let provider = Arc::new(FakeProvider::new());
        let store = Arc::new(MemoryStateStore::new());

        let result =
            plan_and_apply(&graph, Arc::clone(&provider), Arc::clone(&store), serial()).await;

        assert!(result.is_success());
        assert!(result.results.is_empty());
    }
}
