//! Process-level wiring of the runtime's shared services.

use conflux_common::clock::SystemClock;
use conflux_common::config::AppConfig;
use conflux_credentials::exchange::{default_providers, default_rule_source};
use conflux_credentials::{IntermediationRule, ProviderRegistry};
use conflux_error::{ConfluxError, ErrorCode};
use std::sync::Arc;

use crate::connection::ConnectionProvisioner;
use crate::context::{ExecutionContext, GraphFetchConfig, WorkerPool};
use crate::pool_state::{ConnectionPoolStateCache, PoolStateHousekeeper};
use crate::store::RelationalStoreState;

/// Long-lived services shared by every execution in the process.
#[derive(Debug)]
pub struct RuntimeServices {
    config: AppConfig,
    pool_states: Arc<ConnectionPoolStateCache>,
    housekeeper: Option<PoolStateHousekeeper>,
    credentials: Arc<ProviderRegistry>,
    provisioner: Arc<dyn ConnectionProvisioner>,
    node_pool: WorkerPool,
    graph_fetch_pool: WorkerPool,
}

impl RuntimeServices {
    /// Builds the services. Must be called from within a tokio runtime when the housekeeper
    /// is enabled.
    pub fn start(
        config: &AppConfig,
        provisioner: Arc<dyn ConnectionProvisioner>,
    ) -> conflux_error::Result<Self> {
        let pool_states = Arc::new(ConnectionPoolStateCache::new(Arc::new(SystemClock)));
        let housekeeper = config.pool_state.housekeeper_enabled.then(|| {
            PoolStateHousekeeper::start(pool_states.clone(), config.pool_state.eviction_ttl())
        });

        let credentials = Arc::new(build_registry(config.credentials.use_external_rules)?);

        let execution = &config.execution;
        tracing::info!(
            compile_allowed = execution.compile_allowed,
            node_concurrency = execution.node_concurrency,
            graph_fetch_concurrency = execution.graph_fetch_concurrency,
            eviction_ttl_secs = config.pool_state.eviction_ttl_secs,
            "Runtime services started"
        );

        Ok(Self {
            config: config.clone(),
            pool_states,
            housekeeper,
            credentials,
            provisioner,
            node_pool: WorkerPool::new("nodes", execution.node_concurrency),
            graph_fetch_pool: WorkerPool::new("graph-fetch", execution.graph_fetch_concurrency),
        })
    }

    /// A fresh execution context for one request.
    pub fn new_execution_context(&self) -> ExecutionContext {
        let execution = &self.config.execution;
        let relational =
            RelationalStoreState::new(self.provisioner.clone(), execution.log_sql_with_params)
                .with_credentials(self.credentials.clone())
                .with_pool_states(self.pool_states.clone());

        ExecutionContext::builder()
            .store_state(Box::new(relational))
            .compile_allowed(execution.compile_allowed)
            .graph_fetch_config(GraphFetchConfig::from(execution.graph_fetch.clone()))
            .log_sql_verbose(execution.log_sql_with_params)
            .node_pool(self.node_pool.clone())
            .graph_fetch_pool(self.graph_fetch_pool.clone())
            .build()
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn pool_states(&self) -> &Arc<ConnectionPoolStateCache> {
        &self.pool_states
    }

    pub fn credentials(&self) -> &Arc<ProviderRegistry> {
        &self.credentials
    }

    pub fn housekeeper_running(&self) -> bool {
        self.housekeeper
            .as_ref()
            .is_some_and(PoolStateHousekeeper::is_running)
    }

    pub fn shutdown(&mut self) {
        if let Some(mut housekeeper) = self.housekeeper.take() {
            housekeeper.stop();
        }
        tracing::info!("Runtime services stopped");
    }
}

fn build_registry(use_external_rules: bool) -> conflux_error::Result<ProviderRegistry> {
    let client = reqwest::Client::builder().build().map_err(|e| {
        ConfluxError::new(
            ErrorCode::InvalidConfig,
            format!("Failed to build HTTP client for credential exchange: {e}"),
        )
    })?;
    let rules = default_rule_source(client)?;

    if use_external_rules {
        return Ok(ProviderRegistry::assemble(default_providers(), Some(rules))?);
    }

    // Each provider carries the built-in rules serving it.
    let providers = default_providers()
        .into_iter()
        .map(|provider| {
            let own: Vec<IntermediationRule> = rules
                .iter()
                .filter(|r| r.serves(provider.spec_kind, provider.output_kind))
                .cloned()
                .collect();
            provider.configured_with(own)
        })
        .collect();
    Ok(ProviderRegistry::assemble(providers, None)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::NoBackendProvisioner;
    use crate::store::StoreKind;
    use conflux_credentials::SpecificationKind;

    #[tokio::test]
    async fn test_start_wires_services() {
        let mut config = AppConfig::default();
        config.execution.compile_allowed = false;
        config.execution.node_concurrency = 3;

        let mut services = RuntimeServices::start(&config, Arc::new(NoBackendProvisioner)).unwrap();
        assert!(services.housekeeper_running());
        assert!(!services.credentials().is_empty());

        let ctx = services.new_execution_context();
        assert!(!ctx.compile_allowed());
        assert_eq!(ctx.node_pool().map(WorkerPool::size), Some(3));
        assert!(ctx.store_state(StoreKind::Relational).is_some());

        services.shutdown();
        assert!(!services.housekeeper_running());
    }

    #[tokio::test]
    async fn test_self_carried_rules_match_external_source() {
        let external = build_registry(true).unwrap();
        let own = build_registry(false).unwrap();

        let kinds = |r: &ProviderRegistry| -> Vec<(SpecificationKind, usize)> {
            r.providers()
                .iter()
                .filter(|p| p.is_configured())
                .map(|p| (p.spec_kind, p.rules().len()))
                .collect()
        };
        assert_eq!(kinds(&external), kinds(&own));
    }
}
