use dashmap::DashMap;
use std::future::Future;
use std::ops::Deref;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;

use super::BlockConnection;
use crate::connection::{ConnectionKey, RawConnection};
use crate::error::RuntimeError;

type Slot = Arc<OnceCell<Arc<BlockConnection>>>;

/// Exclusive use of a block connection by one node.
///
/// Releasing (or dropping) the lease marks the node's result set consumed; the lock itself
/// stays until the owning block calls [`BlockConnectionContext::unlock_all`].
#[derive(Debug)]
pub struct BlockConnectionLease {
    connection: Arc<BlockConnection>,
    released: bool,
}

impl BlockConnectionLease {
    fn new(connection: Arc<BlockConnection>) -> Self {
        Self {
            connection,
            released: false,
        }
    }

    pub fn connection(&self) -> &Arc<BlockConnection> {
        &self.connection
    }

    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if !self.released {
            self.released = true;
            self.connection.release_result_set();
        }
    }
}

impl Deref for BlockConnectionLease {
    type Target = BlockConnection;

    fn deref(&self) -> &Self::Target {
        &self.connection
    }
}

impl Drop for BlockConnectionLease {
    fn drop(&mut self) {
        self.release_inner();
    }
}

/// Block connections of one logical execution, keyed by connection identity.
///
/// [`copy`](Self::copy) yields an independent map whose entries alias the same
/// [`BlockConnection`] instances.
#[derive(Debug, Default)]
pub struct BlockConnectionContext {
    entries: DashMap<ConnectionKey, Slot>,
    log_sql_verbose: bool,
}

impl BlockConnectionContext {
    pub fn new(log_sql_verbose: bool) -> Self {
        Self {
            entries: DashMap::new(),
            log_sql_verbose,
        }
    }

    pub fn log_sql_verbose(&self) -> bool {
        self.log_sql_verbose
    }

    /// Returns the block connection for `key`, provisioning it on first use.
    ///
    /// Fails with a contract violation if the connection is locked by another node.
    /// A connection found closed is replaced by a newly provisioned one.
    pub async fn get_block_connection<F, Fut>(
        &self,
        key: &ConnectionKey,
        provision: F,
    ) -> conflux_error::Result<BlockConnectionLease>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = conflux_error::Result<Box<dyn RawConnection>>>,
    {
        let mut provision = Some(provision);
        loop {
            let slot: Slot = self
                .entries
                .entry(key.clone())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone();

            let connection = match slot.get() {
                Some(existing) => existing.clone(),
                None => {
                    let Some(provision) = provision.take() else {
                        return Err(RuntimeError::Closed(key.to_string()).into());
                    };
                    let verbose = self.log_sql_verbose;
                    slot.get_or_try_init(|| async move {
                        let raw = provision().await?;
                        tracing::debug!(
                            target: "conflux::block_connection",
                            key = %key,
                            "Provisioned block connection"
                        );
                        Ok::<_, conflux_error::ConfluxError>(Arc::new(BlockConnection::new(
                            key.clone(),
                            raw,
                            verbose,
                        )))
                    })
                    .await?
                    .clone()
                }
            };

            if connection.is_closed() {
                self.entries
                    .remove_if(key, |_, current| Arc::ptr_eq(current, &slot));
                continue;
            }

            connection.try_lock()?;
            return Ok(BlockConnectionLease::new(connection));
        }
    }

    fn connections(&self) -> Vec<Arc<BlockConnection>> {
        self.entries
            .iter()
            .filter_map(|entry| entry.value().get().cloned())
            .collect()
    }

    pub fn unlock_all(&self) {
        for connection in self.connections() {
            connection.unlock();
        }
    }

    /// Closes every connection, continuing past failures. Returns the first failure.
    pub async fn close_all(&self) -> conflux_error::Result<()> {
        let mut first_failure = None;
        for connection in self.connections() {
            if let Err(e) = connection.close().await {
                tracing::warn!(
                    target: "conflux::block_connection",
                    key = %connection.key(),
                    error = %e,
                    "Failed to close block connection"
                );
                first_failure.get_or_insert(e);
            }
        }
        match first_failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Closes every connection on a background task.
    pub fn close_all_async(&self) -> JoinHandle<()> {
        let connections = self.connections();
        tokio::spawn(async move {
            for connection in connections {
                if let Err(e) = connection.close().await {
                    tracing::warn!(
                        target: "conflux::block_connection",
                        key = %connection.key(),
                        error = %e,
                        "Failed to close block connection"
                    );
                }
            }
        })
    }

    /// Rolls every connection back, continuing past failures. Returns the first failure.
    pub async fn rollback_all(&self) -> conflux_error::Result<()> {
        let mut first_failure = None;
        for connection in self.connections() {
            if let Err(e) = connection.rollback().await {
                first_failure.get_or_insert(e);
            }
        }
        match first_failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn copy(&self) -> Self {
        let entries = self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        Self {
            entries,
            log_sql_verbose: self.log_sql_verbose,
        }
    }

    pub fn block_connection(&self, key: &ConnectionKey) -> Option<Arc<BlockConnection>> {
        self.entries
            .get(key)
            .and_then(|slot| slot.value().get().cloned())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> Vec<ConnectionKey> {
        let mut keys: Vec<ConnectionKey> = self.entries.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }
}
