#![allow(dead_code)]

use async_trait::async_trait;
use conflux_credentials::{AuthenticationSpecification, Credential, Identity};
use conflux_runtime::connection::{
    ConnectionProvisioner, ConnectionRequest, RawConnection, Statement, TargetDescriptor,
};
use conflux_runtime::{ExecutionContext, RelationalStoreState};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Every call a fake connection receives, in order.
pub type CallLog = Arc<Mutex<Vec<String>>>;

pub fn calls(log: &CallLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

struct RecordingStatement {
    log: CallLog,
    fail_on: Option<String>,
}

#[async_trait]
impl Statement for RecordingStatement {
    async fn execute(&mut self, sql: &str) -> anyhow::Result<u64> {
        self.log.lock().unwrap().push(format!("execute: {sql}"));
        if self.fail_on.as_deref() == Some(sql) {
            anyhow::bail!("relation does not exist");
        }
        Ok(1)
    }

    async fn close(&mut self) -> anyhow::Result<()> {
        self.log.lock().unwrap().push("statement.close".to_string());
        Ok(())
    }
}

pub struct RecordingConnection {
    log: CallLog,
    fail_on: Option<String>,
    fail_close: bool,
}

impl RecordingConnection {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            fail_on: None,
            fail_close: false,
        }
    }
}

#[async_trait]
impl RawConnection for RecordingConnection {
    async fn create_statement(&mut self) -> anyhow::Result<Box<dyn Statement>> {
        Ok(Box::new(RecordingStatement {
            log: self.log.clone(),
            fail_on: self.fail_on.clone(),
        }))
    }

    async fn commit(&mut self) -> anyhow::Result<()> {
        self.log.lock().unwrap().push("commit".to_string());
        Ok(())
    }

    async fn close(&mut self) -> anyhow::Result<()> {
        self.log.lock().unwrap().push("connection.close".to_string());
        if self.fail_close {
            anyhow::bail!("socket already closed");
        }
        Ok(())
    }
}

/// Hands out recording connections and counts provisioning calls.
#[derive(Debug, Default)]
pub struct RecordingProvisioner {
    pub log: CallLog,
    pub provisions: AtomicUsize,
    pub fail_on: Option<String>,
    pub fail_close: bool,
    pub refuse: bool,
}

impl RecordingProvisioner {
    pub fn failing_on(sql: &str) -> Self {
        Self {
            fail_on: Some(sql.to_string()),
            ..Default::default()
        }
    }

    pub fn provisions(&self) -> usize {
        self.provisions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectionProvisioner for RecordingProvisioner {
    async fn provision(
        &self,
        identity: &Identity,
        target: &TargetDescriptor,
        credential: Option<&Credential>,
    ) -> anyhow::Result<Box<dyn RawConnection>> {
        self.provisions.fetch_add(1, Ordering::SeqCst);
        self.log.lock().unwrap().push(format!(
            "provision: {}@{} ({})",
            identity.name(),
            target.database,
            credential.map(|c| c.kind().to_string()).unwrap_or_default()
        ));
        if self.refuse {
            anyhow::bail!("connection refused");
        }
        Ok(Box::new(RecordingConnection {
            log: self.log.clone(),
            fail_on: self.fail_on.clone(),
            fail_close: self.fail_close,
        }))
    }
}

pub fn target(database: &str) -> TargetDescriptor {
    TargetDescriptor::new(
        "postgres",
        "db.internal",
        5432,
        database,
        AuthenticationSpecification::UsernamePassword,
    )
}

pub fn request(database: &str) -> ConnectionRequest {
    ConnectionRequest::new(target(database), Identity::new("alice"))
}

/// An execution context with one relational store state backed by `provisioner`.
pub fn context_with(provisioner: Arc<RecordingProvisioner>) -> ExecutionContext {
    ExecutionContext::builder()
        .store_state(Box::new(RelationalStoreState::new(provisioner, false)))
        .build()
}

pub fn relational(ctx: &ExecutionContext) -> &RelationalStoreState {
    ctx.store_state_as::<RelationalStoreState>().unwrap()
}

pub fn relational_mut(ctx: &mut ExecutionContext) -> &mut RelationalStoreState {
    ctx.store_state_as_mut::<RelationalStoreState>().unwrap()
}
