//! Contract for compiling plan nodes into invokable units.
//!
//! Compilation itself lives outside this crate. The runtime only needs a
//! [`NodeCodeProvider`] and the whole-plan-then-per-node fallback in
//! [`compile_with_fallback`].

use conflux_error::{ConfluxError, ErrorCode};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::context::ExecutionContext;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSource {
    pub node_id: String,
    pub code: String,
}

impl NodeSource {
    pub fn new(node_id: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            code: code.into(),
        }
    }
}

type Invoke = dyn Fn(&ExecutionContext) -> anyhow::Result<serde_json::Value> + Send + Sync;

/// A compiled, invokable piece of a plan.
#[derive(Clone)]
pub struct ExecutableUnit {
    name: String,
    invoke: Arc<Invoke>,
}

impl fmt::Debug for ExecutableUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutableUnit")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl ExecutableUnit {
    pub fn new<F>(name: impl Into<String>, invoke: F) -> Self
    where
        F: Fn(&ExecutionContext) -> anyhow::Result<serde_json::Value> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            invoke: Arc::new(invoke),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn invoke(&self, context: &ExecutionContext) -> anyhow::Result<serde_json::Value> {
        (self.invoke)(context)
    }
}

pub trait NodeCodeProvider: Send + Sync {
    /// Compiles every node together. The returned units are in node order.
    fn compile_plan(&self, sources: &[NodeSource]) -> anyhow::Result<Vec<ExecutableUnit>>;

    fn compile_node(&self, source: &NodeSource) -> anyhow::Result<ExecutableUnit>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompilationMode {
    WholePlan,
    PerNode,
}

/// The code-execution handle attached to an execution.
#[derive(Debug, Clone)]
pub struct CompiledPlan {
    pub mode: CompilationMode,
    pub units: Vec<ExecutableUnit>,
}

impl CompiledPlan {
    pub fn empty() -> Self {
        Self {
            mode: CompilationMode::WholePlan,
            units: Vec::new(),
        }
    }

    pub fn unit(&self, name: &str) -> Option<&ExecutableUnit> {
        self.units.iter().find(|u| u.name == name)
    }
}

/// Compiles the whole plan at once, falling back to compiling each node in isolation.
pub fn compile_with_fallback(
    provider: &dyn NodeCodeProvider,
    sources: &[NodeSource],
) -> conflux_error::Result<CompiledPlan> {
    match provider.compile_plan(sources) {
        Ok(units) => {
            return Ok(CompiledPlan {
                mode: CompilationMode::WholePlan,
                units,
            })
        }
        Err(e) => tracing::warn!(
            target: "conflux::codegen",
            nodes = sources.len(),
            error = %e,
            "Whole-plan compilation failed, compiling nodes individually"
        ),
    }

    let units = sources
        .iter()
        .map(|source| {
            provider.compile_node(source).map_err(|e| {
                ConfluxError::new(
                    ErrorCode::CompilationFailed,
                    format!("Failed to compile node '{}': {e:#}", source.node_id),
                )
            })
        })
        .collect::<conflux_error::Result<Vec<_>>>()?;

    Ok(CompiledPlan {
        mode: CompilationMode::PerNode,
        units,
    })
}
