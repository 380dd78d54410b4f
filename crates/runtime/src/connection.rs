//! Seams to the physical database layer.
//!
//! The runtime never talks to a backend directly: a [`ConnectionProvisioner`] hands out
//! [`RawConnection`]s, and everything above works through these traits.

use async_trait::async_trait;
use conflux_credentials::{AuthenticationSpecification, Credential, Identity};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// A statement handle on a raw connection.
#[async_trait]
pub trait Statement: Send {
    /// Executes one SQL statement, returning the affected row count when known.
    async fn execute(&mut self, sql: &str) -> anyhow::Result<u64>;

    async fn close(&mut self) -> anyhow::Result<()>;
}

/// A physical connection to a backing store.
#[async_trait]
pub trait RawConnection: Send {
    async fn create_statement(&mut self) -> anyhow::Result<Box<dyn Statement>>;

    async fn commit(&mut self) -> anyhow::Result<()>;

    async fn close(&mut self) -> anyhow::Result<()>;
}

/// Opens physical connections. Implementations own driver selection and pooling.
#[async_trait]
pub trait ConnectionProvisioner: Send + Sync + fmt::Debug {
    async fn provision(
        &self,
        identity: &Identity,
        target: &TargetDescriptor,
        credential: Option<&Credential>,
    ) -> anyhow::Result<Box<dyn RawConnection>>;
}

/// Provisioner used when no backend adapter is wired in; every request fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoBackendProvisioner;

#[async_trait]
impl ConnectionProvisioner for NoBackendProvisioner {
    async fn provision(
        &self,
        _identity: &Identity,
        target: &TargetDescriptor,
        _credential: Option<&Credential>,
    ) -> anyhow::Result<Box<dyn RawConnection>> {
        anyhow::bail!("No backend adapter registered for store type '{}'", target.store_type)
    }
}

/// Where a connection goes and how it authenticates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetDescriptor {
    pub store_type: String,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub specification: AuthenticationSpecification,
}

impl TargetDescriptor {
    pub fn new(
        store_type: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        database: impl Into<String>,
        specification: AuthenticationSpecification,
    ) -> Self {
        Self {
            store_type: store_type.into(),
            host: host.into(),
            port,
            database: database.into(),
            specification,
        }
    }

    pub fn key(&self) -> ConnectionKey {
        ConnectionKey::for_target(self)
    }
}

/// Canonical identity of a connection target. Two descriptors with the same key share
/// block connections and pool state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionKey(String);

impl ConnectionKey {
    pub fn new(canonical: impl Into<String>) -> Self {
        Self(canonical.into())
    }

    pub fn for_target(target: &TargetDescriptor) -> Self {
        let auth = serde_json::to_string(&target.specification)
            .unwrap_or_else(|_| target.specification.kind().to_string());
        Self(format!(
            "{}://{}:{}/{}?auth={}",
            target.store_type, target.host, target.port, target.database, auth
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex digits of the SHA-256 of the canonical form.
    pub fn short_id(&self) -> String {
        let digest = Sha256::digest(self.0.as_bytes());
        digest
            .iter()
            .take(6)
            .map(|b| format!("{:02x}", b))
            .collect()
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A node's request for a connection, with the epilogues it wants run at block end.
#[derive(Debug, Clone)]
pub struct ConnectionRequest {
    pub target: TargetDescriptor,
    pub identity: Identity,
    pub commit_query: Option<String>,
    pub rollback_query: Option<String>,
}

impl ConnectionRequest {
    pub fn new(target: TargetDescriptor, identity: Identity) -> Self {
        Self {
            target,
            identity,
            commit_query: None,
            rollback_query: None,
        }
    }

    pub fn with_commit_query(mut self, sql: impl Into<String>) -> Self {
        self.commit_query = Some(sql.into());
        self
    }

    pub fn with_rollback_query(mut self, sql: impl Into<String>) -> Self {
        self.rollback_query = Some(sql.into());
        self
    }
}
