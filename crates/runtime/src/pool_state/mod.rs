//! Process-wide cache of connection pool states.
//!
//! Each pool name maps to the identity it was opened for, an optional credential supplier
//! and the time it was (last) registered. A [`PoolStateHousekeeper`] purges entries older
//! than a TTL. All ages are computed against the cache's injected [`Clock`].

mod housekeeper;

pub use housekeeper::PoolStateHousekeeper;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conflux_common::clock::{to_time_delta, Clock, SystemClock};
use conflux_credentials::{
    make_credential, AuthenticationSpecification, Credential, Identity, ProviderRegistry,
};
use conflux_error::{ConfluxError, ErrorCode};
use dashmap::DashMap;
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use crate::connection::ConnectionKey;

/// Supplies a fresh credential when a pool opens a new physical connection.
#[async_trait]
pub trait CredentialSupplier: Send + Sync + fmt::Debug {
    async fn supply(&self, identity: &Identity) -> anyhow::Result<Credential>;
}

/// Re-resolves the credential through the provider registry on every call.
#[derive(Debug)]
pub struct RegistryCredentialSupplier {
    registry: Arc<ProviderRegistry>,
    specification: AuthenticationSpecification,
}

impl RegistryCredentialSupplier {
    pub fn new(registry: Arc<ProviderRegistry>, specification: AuthenticationSpecification) -> Self {
        Self {
            registry,
            specification,
        }
    }
}

#[async_trait]
impl CredentialSupplier for RegistryCredentialSupplier {
    async fn supply(&self, identity: &Identity) -> anyhow::Result<Credential> {
        Ok(make_credential(&self.registry, &self.specification, identity).await?)
    }
}

#[derive(Clone)]
pub struct ConnectionPoolState {
    pub pool_name: String,
    pub created_at: DateTime<Utc>,
    pub identity: Identity,
    pub credential_supplier: Option<Arc<dyn CredentialSupplier>>,
}

impl fmt::Debug for ConnectionPoolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPoolState")
            .field("pool_name", &self.pool_name)
            .field("created_at", &self.created_at)
            .field("principal", &self.identity.name())
            .field("has_credential_supplier", &self.credential_supplier.is_some())
            .finish()
    }
}

/// Result of a lookup that must tell "never registered" apart from "registered".
#[derive(Debug, Clone)]
pub enum PoolLookup<T> {
    UnknownPool,
    Registered(T),
}

impl<T> PoolLookup<T> {
    pub fn is_registered(&self) -> bool {
        matches!(self, PoolLookup::Registered(_))
    }

    pub fn registered(self) -> Option<T> {
        match self {
            PoolLookup::Registered(value) => Some(value),
            PoolLookup::UnknownPool => None,
        }
    }

    /// Turns an unknown pool into a `CONFLUX-1002` error.
    pub fn or_unknown(self, pool_name: &str) -> conflux_error::Result<T> {
        self.registered().ok_or_else(|| {
            ConfluxError::new(
                ErrorCode::UnknownPool,
                format!("Connection pool '{}' is not registered", pool_name),
            )
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    pub before: usize,
    pub after: usize,
}

impl PurgeReport {
    pub fn evicted(&self) -> usize {
        self.before.saturating_sub(self.after)
    }
}

/// Serializable view of one pool state, for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStateSummary {
    pub pool_name: String,
    pub principal: String,
    pub created_at: DateTime<Utc>,
    pub age_secs: i64,
    pub has_credential_supplier: bool,
}

#[derive(Debug)]
pub struct ConnectionPoolStateCache {
    states: DashMap<String, ConnectionPoolState>,
    clock: Arc<dyn Clock>,
}

impl Default for ConnectionPoolStateCache {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl ConnectionPoolStateCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            states: DashMap::new(),
            clock,
        }
    }

    /// `DBPool_<key short id>_<principal>_<first held credential kind>`
    pub fn pool_name_for(identity: &Identity, key: &ConnectionKey) -> String {
        let credential = identity
            .first_credential_kind()
            .map(|k| k.to_string())
            .unwrap_or_else(|| "none".to_string());
        format!("DBPool_{}_{}_{}", key.short_id(), identity.name(), credential)
    }

    /// Registers or replaces the state for `pool_name`, stamped with the current time.
    pub fn register(
        &self,
        pool_name: impl Into<String>,
        identity: Identity,
        credential_supplier: Option<Arc<dyn CredentialSupplier>>,
    ) {
        let pool_name = pool_name.into();
        let state = ConnectionPoolState {
            pool_name: pool_name.clone(),
            created_at: self.clock.now(),
            identity,
            credential_supplier,
        };
        tracing::debug!(
            target: "conflux::pool_state",
            pool = %pool_name,
            principal = state.identity.name(),
            "Registering connection pool state"
        );
        self.states.insert(pool_name, state);
    }

    pub fn get(&self, pool_name: &str) -> Option<ConnectionPoolState> {
        self.states.get(pool_name).map(|s| s.value().clone())
    }

    pub fn identity(&self, pool_name: &str) -> PoolLookup<Identity> {
        match self.states.get(pool_name) {
            Some(state) => PoolLookup::Registered(state.identity.clone()),
            None => PoolLookup::UnknownPool,
        }
    }

    pub fn credential_supplier(
        &self,
        pool_name: &str,
    ) -> PoolLookup<Option<Arc<dyn CredentialSupplier>>> {
        match self.states.get(pool_name) {
            Some(state) => PoolLookup::Registered(state.credential_supplier.clone()),
            None => PoolLookup::UnknownPool,
        }
    }

    fn is_expired(&self, created_at: DateTime<Utc>, now: DateTime<Utc>, ttl: Duration) -> bool {
        now.signed_duration_since(created_at) > to_time_delta(ttl)
    }

    /// Pool names (with the creation time observed) whose age exceeds `ttl`.
    pub fn find_older_than(&self, ttl: Duration) -> Vec<(String, DateTime<Utc>)> {
        let now = self.clock.now();
        self.states
            .iter()
            .filter(|entry| self.is_expired(entry.created_at, now, ttl))
            .map(|entry| (entry.key().clone(), entry.created_at))
            .collect()
    }

    /// Evicts states older than `ttl`. An entry re-registered after it was found is kept.
    pub fn evict_older_than(&self, ttl: Duration) -> usize {
        self.find_older_than(ttl)
            .into_iter()
            .filter(|(name, seen_at)| self.remove_if_unchanged(name, *seen_at))
            .count()
    }

    /// Removes `name` only if it still carries the `created_at` seen when it was found.
    fn remove_if_unchanged(&self, name: &str, seen_at: DateTime<Utc>) -> bool {
        self.states
            .remove_if(name, |_, state| state.created_at == seen_at)
            .is_some()
    }

    /// One housekeeping pass: evicts expired states and logs the size before and after.
    pub fn purge(&self, ttl: Duration) -> PurgeReport {
        let before = self.states.len();
        self.evict_older_than(ttl);
        let after = self.states.len();

        tracing::info!(
            target: "conflux::pool_state",
            before,
            after,
            ttl_secs = ttl.as_secs(),
            "Purged expired connection pool states"
        );
        PurgeReport { before, after }
    }

    pub fn remove(&self, pool_name: &str) -> Option<ConnectionPoolState> {
        self.states.remove(pool_name).map(|(_, state)| state)
    }

    /// Names of every pool registered for `principal`, sorted.
    pub fn pools_for_principal(&self, principal: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .states
            .iter()
            .filter(|entry| entry.identity.name() == principal)
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }

    pub fn snapshot(&self) -> Vec<PoolStateSummary> {
        let now = self.clock.now();
        let mut summaries: Vec<PoolStateSummary> = self
            .states
            .iter()
            .map(|entry| PoolStateSummary {
                pool_name: entry.key().clone(),
                principal: entry.identity.name().to_string(),
                created_at: entry.created_at,
                age_secs: now.signed_duration_since(entry.created_at).num_seconds(),
                has_credential_supplier: entry.credential_supplier.is_some(),
            })
            .collect();
        summaries.sort_by(|a, b| a.pool_name.cmp(&b.pool_name));
        summaries
    }

    pub fn clear(&self) {
        self.states.clear();
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

static GLOBAL_POOL_STATES: OnceLock<Arc<ConnectionPoolStateCache>> = OnceLock::new();

/// Installs the process-wide cache. A second call fails.
pub fn install_global(cache: Arc<ConnectionPoolStateCache>) -> conflux_error::Result<()> {
    GLOBAL_POOL_STATES.set(cache).map_err(|_| {
        ConfluxError::new(
            ErrorCode::AlreadyInitialized,
            "The global connection pool state cache is already installed",
        )
    })
}

pub fn global() -> Option<Arc<ConnectionPoolStateCache>> {
    GLOBAL_POOL_STATES.get().cloned()
}
