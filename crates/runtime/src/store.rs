//! Per-store-kind execution sub-states.
//!
//! An [`ExecutionContext`](crate::context::ExecutionContext) carries one sub-state per kind of
//! backing store. Each sub-state knows how to copy itself for a concurrent branch.

use conflux_credentials::{make_credential, ProviderRegistry};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::block_connection::{BlockConnectionContext, BlockConnectionLease};
use crate::connection::{ConnectionProvisioner, ConnectionRequest, RawConnection};
use crate::error::RuntimeError;
use crate::pool_state::{ConnectionPoolStateCache, CredentialSupplier, RegistryCredentialSupplier};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    Relational,
    Service,
    InMemory,
    Search,
}

pub trait StoreExecutionState: Send + Sync + fmt::Debug {
    fn store_kind(&self) -> StoreKind;

    /// State for a concurrent branch. Must not share mutable data with `self` except
    /// through handles meant to be shared.
    fn copy(&self) -> Box<dyn StoreExecutionState>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// A connection handed to a node: either a shared block connection or a one-shot one.
pub enum AcquiredConnection {
    Block(BlockConnectionLease),
    OneShot(Box<dyn RawConnection>),
}

impl fmt::Debug for AcquiredConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcquiredConnection::Block(lease) => f.debug_tuple("Block").field(lease).finish(),
            AcquiredConnection::OneShot(_) => f.write_str("OneShot"),
        }
    }
}

pub struct RelationalStoreState {
    retain_connection: bool,
    block_connections: Arc<BlockConnectionContext>,
    provisioner: Arc<dyn ConnectionProvisioner>,
    credentials: Option<Arc<ProviderRegistry>>,
    pool_states: Option<Arc<ConnectionPoolStateCache>>,
}

impl fmt::Debug for RelationalStoreState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelationalStoreState")
            .field("retain_connection", &self.retain_connection)
            .field("block_connections", &self.block_connections.len())
            .field("provisioner", &self.provisioner)
            .field("credentials", &self.credentials.as_ref().map(|r| r.len()))
            .field("pool_states", &self.pool_states.is_some())
            .finish()
    }
}

impl RelationalStoreState {
    pub fn new(provisioner: Arc<dyn ConnectionProvisioner>, log_sql_verbose: bool) -> Self {
        Self {
            retain_connection: false,
            block_connections: Arc::new(BlockConnectionContext::new(log_sql_verbose)),
            provisioner,
            credentials: None,
            pool_states: None,
        }
    }

    pub fn with_credentials(mut self, registry: Arc<ProviderRegistry>) -> Self {
        self.credentials = Some(registry);
        self
    }

    pub fn with_pool_states(mut self, cache: Arc<ConnectionPoolStateCache>) -> Self {
        self.pool_states = Some(cache);
        self
    }

    pub fn retain_connection(&self) -> bool {
        self.retain_connection
    }

    pub fn set_retain_connection(&mut self, retain: bool) {
        self.retain_connection = retain;
    }

    pub fn block_connections(&self) -> &Arc<BlockConnectionContext> {
        &self.block_connections
    }

    /// Swaps in another block connection context, returning the previous one.
    pub fn replace_block_connections(
        &mut self,
        context: Arc<BlockConnectionContext>,
    ) -> Arc<BlockConnectionContext> {
        std::mem::replace(&mut self.block_connections, context)
    }

    pub fn pool_states(&self) -> Option<&Arc<ConnectionPoolStateCache>> {
        self.pool_states.as_ref()
    }

    /// Obtains a connection for `request`.
    ///
    /// While retaining connections, the block connection for the request's target is used
    /// and the request's epilogues are queued on it; otherwise a one-shot connection is
    /// provisioned.
    pub async fn acquire_connection(
        &self,
        request: &ConnectionRequest,
    ) -> conflux_error::Result<AcquiredConnection> {
        if !self.retain_connection {
            return Ok(AcquiredConnection::OneShot(self.provision(request).await?));
        }

        let key = request.target.key();
        let lease = self
            .block_connections
            .get_block_connection(&key, || self.provision(request))
            .await?;
        if let Some(sql) = &request.rollback_query {
            lease.add_rollback_query(sql.clone());
        }
        if let Some(sql) = &request.commit_query {
            lease.add_commit_query(sql.clone());
        }
        Ok(AcquiredConnection::Block(lease))
    }

    async fn provision(
        &self,
        request: &ConnectionRequest,
    ) -> conflux_error::Result<Box<dyn RawConnection>> {
        let key = request.target.key();
        let identity = &request.identity;

        let credential = match &self.credentials {
            Some(registry) => {
                Some(make_credential(registry, &request.target.specification, identity).await?)
            }
            None => None,
        };

        let pool_name = self.pool_states.as_ref().map(|cache| {
            let name = ConnectionPoolStateCache::pool_name_for(identity, &key);
            let supplier = self.credentials.as_ref().map(|registry| {
                Arc::new(RegistryCredentialSupplier::new(
                    registry.clone(),
                    request.target.specification.clone(),
                )) as Arc<dyn CredentialSupplier>
            });
            cache.register(name.clone(), identity.clone(), supplier);
            name
        });

        self.provisioner
            .provision(identity, &request.target, credential.as_ref())
            .await
            .map_err(|source| {
                RuntimeError::Provisioning {
                    key: key.to_string(),
                    pool_name,
                    source,
                }
                .into()
            })
    }
}

impl StoreExecutionState for RelationalStoreState {
    fn store_kind(&self) -> StoreKind {
        StoreKind::Relational
    }

    fn copy(&self) -> Box<dyn StoreExecutionState> {
        Box::new(Self {
            retain_connection: self.retain_connection,
            block_connections: Arc::new(self.block_connections.copy()),
            provisioner: self.provisioner.clone(),
            credentials: self.credentials.clone(),
            pool_states: self.pool_states.clone(),
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Scratch values for in-memory evaluation, copied by value.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStoreState {
    values: HashMap<String, serde_json::Value>,
}

impl InMemoryStoreState {
    pub fn get(&self, name: &str) -> Option<&serde_json::Value> {
        self.values.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: serde_json::Value) {
        self.values.insert(name.into(), value);
    }
}

impl StoreExecutionState for InMemoryStoreState {
    fn store_kind(&self) -> StoreKind {
        StoreKind::InMemory
    }

    fn copy(&self) -> Box<dyn StoreExecutionState> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
