//! Per-execution state handed from plan node to plan node.
//!
//! One [`ExecutionContext`] is created per incoming request and [`copy`](ExecutionContext::copy)-ed
//! for every sub-branch that runs concurrently. Copies share the correlation id, flags, worker
//! pools and code-execution handle, but own independent results and store sub-states.

use chrono::{DateTime, Utc};
use conflux_common::config::GraphFetchSettings;
use conflux_error::{ConfluxError, ErrorCode};
use dashmap::DashMap;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use uuid::Uuid;

use crate::block_connection::BlockConnectionContext;
use crate::codegen::CompiledPlan;
use crate::store::{RelationalStoreState, StoreExecutionState, StoreKind};

/// Result key under which the execution's input vector is stored.
pub const RESERVED_INPUT_KEY: &str = "__conflux_input__";

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionResult {
    Constant(serde_json::Value),
    Rows(Arc<Vec<serde_json::Value>>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionActivity {
    pub name: String,
    pub detail: String,
    pub recorded_at: DateTime<Utc>,
}

impl ExecutionActivity {
    pub fn new(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            detail: detail.into(),
            recorded_at: Utc::now(),
        }
    }
}

/// Where the request came from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub source: Option<String>,
    pub attributes: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphFetchConfig {
    pub batch_size: usize,
    pub cache_enabled: bool,
}

impl Default for GraphFetchConfig {
    fn default() -> Self {
        GraphFetchSettings::default().into()
    }
}

impl From<GraphFetchSettings> for GraphFetchConfig {
    fn from(settings: GraphFetchSettings) -> Self {
        Self {
            batch_size: settings.batch_size,
            cache_enabled: settings.cache_enabled,
        }
    }
}

/// The batch of graph objects currently being fetched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GraphObjectsBatch {
    pub batch_index: usize,
    pub objects: Vec<serde_json::Value>,
}

/// Memoized graph-fetch results, keyed by a caller-defined cache key.
#[derive(Debug, Default)]
pub struct GraphFetchCache {
    pub name: String,
    pub entries: DashMap<String, serde_json::Value>,
}

impl GraphFetchCache {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: DashMap::new(),
        }
    }
}

/// Bounded concurrency for node or graph-fetch work, shared across copies.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    name: Arc<str>,
    size: usize,
    permits: Arc<Semaphore>,
}

impl WorkerPool {
    pub fn new(name: &str, size: usize) -> Self {
        let size = size.max(1);
        Self {
            name: Arc::from(name),
            size,
            permits: Arc::new(Semaphore::new(size)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn same_pool(&self, other: &WorkerPool) -> bool {
        Arc::ptr_eq(&self.permits, &other.permits)
    }

    pub async fn acquire(&self) -> conflux_error::Result<OwnedSemaphorePermit> {
        self.permits.clone().acquire_owned().await.map_err(|_| {
            ConfluxError::new(
                ErrorCode::InternalPanic,
                format!("Worker pool '{}' is closed", self.name),
            )
        })
    }

    /// Runs `work` once a slot is free.
    pub async fn run<F, T>(&self, work: F) -> conflux_error::Result<T>
    where
        F: Future<Output = T>,
    {
        let _permit = self.acquire().await?;
        Ok(work.await)
    }
}

#[derive(Debug)]
pub struct ExecutionContext {
    results: HashMap<String, ExecutionResult>,
    activities: Vec<ExecutionActivity>,
    in_lake: bool,
    in_allocation: bool,
    allocation_variable: Option<String>,
    realize_in_memory: bool,
    realize_allocation_results: bool,
    auth_user: Option<String>,
    store_states: HashMap<StoreKind, Box<dyn StoreExecutionState>>,
    node_pool: Option<WorkerPool>,
    graph_fetch_pool: Option<WorkerPool>,
    template_functions: Arc<Vec<String>>,
    correlation_id: Uuid,
    compile_allowed: bool,
    log_sql_verbose: bool,
    request_context: Option<Arc<RequestContext>>,
    graph_fetch_config: GraphFetchConfig,
    code_executor: Option<Arc<CompiledPlan>>,
    span: tracing::Span,
    graph_objects_batch: Option<GraphObjectsBatch>,
    graph_fetch_caches: Option<Vec<Arc<GraphFetchCache>>>,
}

impl ExecutionContext {
    pub fn create(
        results: HashMap<String, ExecutionResult>,
        template_functions: Vec<String>,
        store_states: Vec<Box<dyn StoreExecutionState>>,
        compile_allowed: bool,
        request_context: Option<Arc<RequestContext>>,
        graph_fetch_config: GraphFetchConfig,
        log_sql_verbose: bool,
    ) -> Self {
        let correlation_id = Uuid::new_v4();
        let span = tracing::info_span!("execution", correlation_id = %correlation_id);
        Self {
            results,
            activities: Vec::new(),
            in_lake: false,
            in_allocation: false,
            allocation_variable: None,
            realize_in_memory: false,
            realize_allocation_results: false,
            auth_user: None,
            store_states: store_states
                .into_iter()
                .map(|s| (s.store_kind(), s))
                .collect(),
            node_pool: None,
            graph_fetch_pool: None,
            template_functions: Arc::new(template_functions),
            correlation_id,
            compile_allowed,
            log_sql_verbose,
            request_context,
            graph_fetch_config,
            code_executor: None,
            span,
            graph_objects_batch: None,
            graph_fetch_caches: None,
        }
    }

    pub fn builder() -> ExecutionContextBuilder {
        ExecutionContextBuilder::default()
    }

    /// State for a concurrent sub-branch.
    ///
    /// Results, activities and store sub-states are copied; the in-flight graph objects
    /// batch and graph-fetch caches are reset.
    pub fn copy(&self) -> Self {
        Self {
            results: self.results.clone(),
            activities: self.activities.clone(),
            in_lake: self.in_lake,
            in_allocation: self.in_allocation,
            allocation_variable: self.allocation_variable.clone(),
            realize_in_memory: self.realize_in_memory,
            realize_allocation_results: self.realize_allocation_results,
            auth_user: self.auth_user.clone(),
            store_states: self
                .store_states
                .iter()
                .map(|(kind, state)| (*kind, state.copy()))
                .collect(),
            node_pool: self.node_pool.clone(),
            graph_fetch_pool: self.graph_fetch_pool.clone(),
            template_functions: self.template_functions.clone(),
            correlation_id: self.correlation_id,
            compile_allowed: self.compile_allowed,
            log_sql_verbose: self.log_sql_verbose,
            request_context: self.request_context.clone(),
            graph_fetch_config: self.graph_fetch_config.clone(),
            code_executor: self.code_executor.clone(),
            span: self.span.clone(),
            graph_objects_batch: None,
            graph_fetch_caches: None,
        }
    }

    // Mutators

    /// Lake execution always realizes results in memory.
    pub fn set_in_lake(&mut self) -> &mut Self {
        self.in_lake = true;
        self.realize_in_memory = true;
        self
    }

    pub fn set_in_allocation(&mut self, variable: impl Into<String>) -> &mut Self {
        self.in_allocation = true;
        self.allocation_variable = Some(variable.into());
        self
    }

    pub fn set_auth_user(
        &mut self,
        auth_user: impl Into<String>,
        realize_in_memory: Option<bool>,
    ) -> &mut Self {
        self.auth_user = Some(auth_user.into());
        if let Some(realize) = realize_in_memory {
            self.set_realize_in_memory(realize);
        }
        self
    }

    pub fn set_realize_allocation_results(&mut self, realize: bool) -> &mut Self {
        self.realize_allocation_results = realize;
        self
    }

    /// Can only switch realize-in-memory on; `false` never downgrades it.
    pub fn set_realize_in_memory(&mut self, realize: bool) -> &mut Self {
        self.realize_in_memory = self.realize_in_memory || realize;
        self
    }

    pub fn set_code_executor(
        &mut self,
        plan: Arc<CompiledPlan>,
    ) -> conflux_error::Result<&mut Self> {
        if !self.compile_allowed {
            return Err(ConfluxError::contract_violation(
                "Compiled code attached to an execution that does not allow compilation",
            )
            .with_trace_id(self.correlation_id.to_string()));
        }
        self.code_executor = Some(plan);
        Ok(self)
    }

    pub fn set_graph_objects_batch(&mut self, batch: GraphObjectsBatch) -> &mut Self {
        self.graph_objects_batch = Some(batch);
        self
    }

    pub fn set_graph_fetch_caches(&mut self, caches: Vec<Arc<GraphFetchCache>>) -> &mut Self {
        self.graph_fetch_caches = Some(caches);
        self
    }

    pub fn set_request_context(&mut self, request_context: Arc<RequestContext>) -> &mut Self {
        self.request_context = Some(request_context);
        self
    }

    pub fn with_node_pool(&mut self, pool: WorkerPool) -> &mut Self {
        self.node_pool = Some(pool);
        self
    }

    pub fn with_graph_fetch_pool(&mut self, pool: WorkerPool) -> &mut Self {
        self.graph_fetch_pool = Some(pool);
        self
    }

    pub fn attach_store_state(&mut self, state: Box<dyn StoreExecutionState>) -> &mut Self {
        self.store_states.insert(state.store_kind(), state);
        self
    }

    pub fn add_result(&mut self, name: impl Into<String>, result: ExecutionResult) -> &mut Self {
        self.results.insert(name.into(), result);
        self
    }

    pub fn set_input_vector(&mut self, values: Vec<serde_json::Value>) -> &mut Self {
        self.add_result(
            RESERVED_INPUT_KEY,
            ExecutionResult::Constant(serde_json::Value::Array(values)),
        )
    }

    pub fn record_activity(&mut self, activity: ExecutionActivity) -> &mut Self {
        self.activities.push(activity);
        self
    }

    // Accessors

    pub fn result(&self, name: &str) -> Option<&ExecutionResult> {
        self.results.get(name)
    }

    pub fn results(&self) -> &HashMap<String, ExecutionResult> {
        &self.results
    }

    pub fn input_vector(&self) -> Option<&[serde_json::Value]> {
        match self.results.get(RESERVED_INPUT_KEY) {
            Some(ExecutionResult::Constant(serde_json::Value::Array(values))) => Some(values),
            _ => None,
        }
    }

    pub fn activity_log(&self) -> &[ExecutionActivity] {
        &self.activities
    }

    pub fn store_state(&self, kind: StoreKind) -> Option<&dyn StoreExecutionState> {
        self.store_states.get(&kind).map(|s| s.as_ref())
    }

    pub fn store_state_mut(&mut self, kind: StoreKind) -> Option<&mut (dyn StoreExecutionState + 'static)> {
        self.store_states.get_mut(&kind).map(|s| s.as_mut())
    }

    /// The first sub-state of concrete type `T`.
    pub fn store_state_as<T: StoreExecutionState + 'static>(&self) -> Option<&T> {
        self.store_states
            .values()
            .find_map(|s| s.as_any().downcast_ref::<T>())
    }

    pub fn store_state_as_mut<T: StoreExecutionState + 'static>(&mut self) -> Option<&mut T> {
        self.store_states
            .values_mut()
            .find_map(|s| s.as_any_mut().downcast_mut::<T>())
    }

    pub fn template_functions(&self) -> &[String] {
        &self.template_functions
    }

    pub fn request_context(&self) -> Option<&Arc<RequestContext>> {
        self.request_context.as_ref()
    }

    pub fn graph_fetch_config(&self) -> &GraphFetchConfig {
        &self.graph_fetch_config
    }

    pub fn graph_objects_batch(&self) -> Option<&GraphObjectsBatch> {
        self.graph_objects_batch.as_ref()
    }

    pub fn graph_fetch_caches(&self) -> Option<&[Arc<GraphFetchCache>]> {
        self.graph_fetch_caches.as_deref()
    }

    pub fn code_executor(&self) -> Option<&Arc<CompiledPlan>> {
        self.code_executor.as_ref()
    }

    pub fn node_pool(&self) -> Option<&WorkerPool> {
        self.node_pool.as_ref()
    }

    pub fn graph_fetch_pool(&self) -> Option<&WorkerPool> {
        self.graph_fetch_pool.as_ref()
    }

    pub fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    pub fn compile_allowed(&self) -> bool {
        self.compile_allowed
    }

    pub fn log_sql_verbose(&self) -> bool {
        self.log_sql_verbose
    }

    pub fn in_lake(&self) -> bool {
        self.in_lake
    }

    pub fn in_allocation(&self) -> bool {
        self.in_allocation
    }

    pub fn allocation_variable(&self) -> Option<&str> {
        self.allocation_variable.as_deref()
    }

    pub fn realize_in_memory(&self) -> bool {
        self.realize_in_memory
    }

    pub fn realize_allocation_results(&self) -> bool {
        self.realize_allocation_results
    }

    pub fn auth_user(&self) -> Option<&str> {
        self.auth_user.as_deref()
    }

    pub fn span(&self) -> &tracing::Span {
        &self.span
    }

    fn relational_state_mut(&mut self) -> conflux_error::Result<&mut RelationalStoreState> {
        self.store_state_as_mut::<RelationalStoreState>()
            .ok_or_else(|| {
                ConfluxError::contract_violation("Execution has no relational store state")
            })
    }

    /// Runs `f` on a copy whose relational state retains connections.
    ///
    /// On success the block's connections are unlocked for the next block; on failure
    /// they are also closed before the error propagates.
    pub async fn relational_block<F, Fut, T>(&self, f: F) -> conflux_error::Result<T>
    where
        F: FnOnce(ExecutionContext) -> Fut,
        Fut: Future<Output = conflux_error::Result<T>>,
    {
        let mut block = self.copy();
        let relational = block.relational_state_mut()?;
        relational.set_retain_connection(true);
        let connections = relational.block_connections().clone();

        match f(block).await {
            Ok(value) => {
                connections.unlock_all();
                Ok(value)
            }
            Err(err) => {
                connections.unlock_all();
                if let Err(close_err) = connections.close_all().await {
                    tracing::warn!(
                        target: "conflux::execution",
                        correlation_id = %self.correlation_id,
                        error = %close_err,
                        "Failed to close block connections after failed block"
                    );
                }
                Err(err)
            }
        }
    }

    /// Runs `f` against a fresh block connection context, for a graph-fetch subtree.
    ///
    /// Afterwards the fresh context is unlocked and closed in the background, and the
    /// previous context and retain flag are restored, whether or not `f` failed.
    pub async fn isolated_block_connections<F, T>(&mut self, f: F) -> conflux_error::Result<T>
    where
        F: for<'a> FnOnce(&'a mut ExecutionContext) -> BoxFuture<'a, conflux_error::Result<T>>,
    {
        let verbose = self.log_sql_verbose;
        let relational = self.relational_state_mut()?;
        let fresh = Arc::new(BlockConnectionContext::new(verbose));
        let previous = relational.replace_block_connections(fresh.clone());
        let previous_retain = relational.retain_connection();
        relational.set_retain_connection(true);

        let result = f(self).await;

        fresh.unlock_all();
        drop(fresh.close_all_async());

        match self.relational_state_mut() {
            Ok(relational) => {
                relational.replace_block_connections(previous);
                relational.set_retain_connection(previous_retain);
            }
            Err(e) => tracing::warn!(
                target: "conflux::execution",
                correlation_id = %self.correlation_id,
                error = %e,
                "Relational state removed during isolated block; previous connections not restored"
            ),
        }
        result
    }
}

/// Builds an [`ExecutionContext`] with defaults for anything not set.
#[derive(Debug, Default)]
pub struct ExecutionContextBuilder {
    results: HashMap<String, ExecutionResult>,
    template_functions: Vec<String>,
    store_states: Vec<Box<dyn StoreExecutionState>>,
    compile_disallowed: bool,
    request_context: Option<Arc<RequestContext>>,
    graph_fetch_config: GraphFetchConfig,
    log_sql_verbose: bool,
    node_pool: Option<WorkerPool>,
    graph_fetch_pool: Option<WorkerPool>,
}

impl ExecutionContextBuilder {
    pub fn result(mut self, name: impl Into<String>, result: ExecutionResult) -> Self {
        self.results.insert(name.into(), result);
        self
    }

    pub fn template_functions(mut self, functions: Vec<String>) -> Self {
        self.template_functions = functions;
        self
    }

    pub fn store_state(mut self, state: Box<dyn StoreExecutionState>) -> Self {
        self.store_states.push(state);
        self
    }

    pub fn compile_allowed(mut self, allowed: bool) -> Self {
        self.compile_disallowed = !allowed;
        self
    }

    pub fn request_context(mut self, request_context: RequestContext) -> Self {
        self.request_context = Some(Arc::new(request_context));
        self
    }

    pub fn graph_fetch_config(mut self, config: GraphFetchConfig) -> Self {
        self.graph_fetch_config = config;
        self
    }

    pub fn log_sql_verbose(mut self, verbose: bool) -> Self {
        self.log_sql_verbose = verbose;
        self
    }

    pub fn node_pool(mut self, pool: WorkerPool) -> Self {
        self.node_pool = Some(pool);
        self
    }

    pub fn graph_fetch_pool(mut self, pool: WorkerPool) -> Self {
        self.graph_fetch_pool = Some(pool);
        self
    }

    pub fn build(self) -> ExecutionContext {
        let mut context = ExecutionContext::create(
            self.results,
            self.template_functions,
            self.store_states,
            !self.compile_disallowed,
            self.request_context,
            self.graph_fetch_config,
            self.log_sql_verbose,
        );
        if let Some(pool) = self.node_pool {
            context.with_node_pool(pool);
        }
        if let Some(pool) = self.graph_fetch_pool {
            context.with_graph_fetch_pool(pool);
        }
        context
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStoreState;

    #[test]
    fn test_realize_in_memory_is_monotonic() {
        let mut ctx = ExecutionContext::builder().build();
        assert!(!ctx.realize_in_memory());

        ctx.set_realize_in_memory(true).set_realize_in_memory(false);
        assert!(ctx.realize_in_memory());

        ctx.set_auth_user("alice", Some(false));
        assert!(ctx.realize_in_memory());
        assert_eq!(ctx.auth_user(), Some("alice"));
    }

    #[test]
    fn test_in_lake_implies_realize_in_memory() {
        let mut ctx = ExecutionContext::builder().build();
        ctx.set_in_lake().set_in_allocation("x");
        assert!(ctx.in_lake());
        assert!(ctx.realize_in_memory());
        assert_eq!(ctx.allocation_variable(), Some("x"));
    }

    #[test]
    fn test_code_executor_requires_compile_allowed() {
        let plan = Arc::new(CompiledPlan::empty());

        let mut forbidden = ExecutionContext::builder().compile_allowed(false).build();
        let err = forbidden.set_code_executor(plan.clone()).unwrap_err();
        assert_eq!(err.code, ErrorCode::ContractViolation);
        assert!(forbidden.code_executor().is_none());

        let mut allowed = ExecutionContext::builder().build();
        allowed.set_code_executor(plan).unwrap();
        assert!(allowed.code_executor().is_some());
    }

    #[test]
    fn test_input_vector_uses_reserved_key() {
        let mut ctx = ExecutionContext::builder().build();
        assert!(ctx.input_vector().is_none());
        ctx.set_input_vector(vec![serde_json::json!(1), serde_json::json!("a")]);
        assert_eq!(ctx.input_vector().map(|v| v.len()), Some(2));
        assert!(ctx.result(RESERVED_INPUT_KEY).is_some());
    }

    #[test]
    fn test_typed_store_state_lookup() {
        let mut state = InMemoryStoreState::default();
        state.set("limit", serde_json::json!(10));
        let mut ctx = ExecutionContext::builder()
            .store_state(Box::new(state))
            .build();

        assert_eq!(
            ctx.store_state_as::<InMemoryStoreState>()
                .and_then(|s| s.get("limit")),
            Some(&serde_json::json!(10))
        );
        assert!(ctx.store_state_as::<RelationalStoreState>().is_none());

        ctx.store_state_as_mut::<InMemoryStoreState>()
            .unwrap()
            .set("limit", serde_json::json!(20));
        assert_eq!(
            ctx.store_state(StoreKind::InMemory)
                .and_then(|s| s.as_any().downcast_ref::<InMemoryStoreState>())
                .and_then(|s| s.get("limit")),
            Some(&serde_json::json!(20))
        );
    }

    #[tokio::test]
    async fn test_worker_pool_is_shared_across_copies() {
        let pool = WorkerPool::new("nodes", 2);
        let ctx = ExecutionContext::builder().node_pool(pool.clone()).build();
        let copy = ctx.copy();

        let copied_pool = copy.node_pool().unwrap();
        assert!(copied_pool.same_pool(&pool));

        let _permit = copied_pool.acquire().await.unwrap();
        assert_eq!(pool.available(), 1);
        assert_eq!(pool.run(async { 7 }).await.unwrap(), 7);
    }
}
