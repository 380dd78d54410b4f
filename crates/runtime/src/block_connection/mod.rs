//! Connections shared by the plan nodes of one logical execution.
//!
//! A [`BlockConnection`] defers commit and rollback to one coordinated point. Nodes queue
//! epilogue statements as they go; exactly one terminal pass ([`BlockConnection::close`]
//! for commit, [`BlockConnection::rollback`] otherwise) runs that outcome's epilogues in
//! contribution order and then releases the physical connection.

mod context;

pub use context::{BlockConnectionContext, BlockConnectionLease};

use conflux_common::scrubber::scrub_sql;
use conflux_error::ConfluxError;
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

use crate::connection::{ConnectionKey, RawConnection, Statement};
use crate::error::{EpiloguePhase, RuntimeError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockConnectionState {
    Available,
    AvailableWithOpenResultSet,
    Locked,
    LockedWithOpenResultSet,
}

impl BlockConnectionState {
    pub fn is_locked(self) -> bool {
        matches!(
            self,
            BlockConnectionState::Locked | BlockConnectionState::LockedWithOpenResultSet
        )
    }

    pub fn has_open_result_set(self) -> bool {
        matches!(
            self,
            BlockConnectionState::AvailableWithOpenResultSet
                | BlockConnectionState::LockedWithOpenResultSet
        )
    }

    fn from_flags(locked: bool, open_result_set: bool) -> Self {
        match (locked, open_result_set) {
            (false, false) => BlockConnectionState::Available,
            (false, true) => BlockConnectionState::AvailableWithOpenResultSet,
            (true, false) => BlockConnectionState::Locked,
            (true, true) => BlockConnectionState::LockedWithOpenResultSet,
        }
    }
}

#[derive(Debug)]
struct Bookkeeping {
    state: BlockConnectionState,
    closed: bool,
    commit_queries: Vec<String>,
    rollback_queries: Vec<String>,
}

pub struct BlockConnection {
    key: ConnectionKey,
    log_sql_verbose: bool,
    connection: tokio::sync::Mutex<Option<Box<dyn RawConnection>>>,
    bookkeeping: Mutex<Bookkeeping>,
}

impl fmt::Debug for BlockConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let book = self.book();
        f.debug_struct("BlockConnection")
            .field("key", &self.key)
            .field("state", &book.state)
            .field("closed", &book.closed)
            .field("commit_queries", &book.commit_queries.len())
            .field("rollback_queries", &book.rollback_queries.len())
            .finish()
    }
}

impl BlockConnection {
    pub fn new(
        key: ConnectionKey,
        connection: Box<dyn RawConnection>,
        log_sql_verbose: bool,
    ) -> Self {
        Self {
            key,
            log_sql_verbose,
            connection: tokio::sync::Mutex::new(Some(connection)),
            bookkeeping: Mutex::new(Bookkeeping {
                state: BlockConnectionState::Available,
                closed: false,
                commit_queries: Vec::new(),
                rollback_queries: Vec::new(),
            }),
        }
    }

    fn book(&self) -> MutexGuard<'_, Bookkeeping> {
        self.bookkeeping.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn key(&self) -> &ConnectionKey {
        &self.key
    }

    pub fn state(&self) -> BlockConnectionState {
        self.book().state
    }

    pub fn is_closed(&self) -> bool {
        self.book().closed
    }

    pub fn pending_commit_queries(&self) -> Vec<String> {
        self.book().commit_queries.clone()
    }

    pub fn pending_rollback_queries(&self) -> Vec<String> {
        self.book().rollback_queries.clone()
    }

    pub fn add_commit_query(&self, sql: impl Into<String>) {
        self.book().commit_queries.push(sql.into());
    }

    pub fn add_rollback_query(&self, sql: impl Into<String>) {
        self.book().rollback_queries.push(sql.into());
    }

    /// Marks the connection locked with an open result set. Only an `Available` connection
    /// can be acquired.
    pub(crate) fn try_lock(&self) -> conflux_error::Result<()> {
        let mut book = self.book();
        if book.closed {
            return Err(RuntimeError::Closed(self.key.to_string()).into());
        }
        if book.state.is_locked() {
            return Err(ConfluxError::contract_violation(format!(
                "Block connection for '{}' is locked by another node",
                self.key
            ))
            .with_hint("Unlock the block connection before acquiring it again"));
        }
        if book.state.has_open_result_set() {
            return Err(ConfluxError::contract_violation(format!(
                "Block connection for '{}' still has an open result set",
                self.key
            ))
            .with_hint("Release the previous connection lease before acquiring it again"));
        }
        book.state = BlockConnectionState::LockedWithOpenResultSet;
        Ok(())
    }

    pub fn unlock(&self) {
        let mut book = self.book();
        book.state = BlockConnectionState::from_flags(false, book.state.has_open_result_set());
    }

    /// The node finished consuming its results.
    pub fn release_result_set(&self) {
        let mut book = self.book();
        book.state = BlockConnectionState::from_flags(book.state.is_locked(), false);
    }

    fn sql_for_log(&self, sql: &str) -> String {
        if self.log_sql_verbose {
            sql.to_string()
        } else {
            scrub_sql(sql)
        }
    }

    /// Runs one ad-hoc statement through the shared connection.
    pub async fn execute(&self, sql: &str) -> conflux_error::Result<u64> {
        let mut guard = self.connection.lock().await;
        let connection = guard
            .as_mut()
            .ok_or_else(|| RuntimeError::Closed(self.key.to_string()))?;

        let mut statement =
            connection
                .create_statement()
                .await
                .map_err(|source| RuntimeError::Statement {
                    key: self.key.to_string(),
                    source,
                })?;
        let result = statement.execute(sql).await;
        self.release_statement(statement.as_mut()).await;

        result.map_err(|source| {
            RuntimeError::Statement {
                key: self.key.to_string(),
                source,
            }
            .into()
        })
    }

    pub async fn commit(&self) -> conflux_error::Result<()> {
        let mut guard = self.connection.lock().await;
        let connection = guard
            .as_mut()
            .ok_or_else(|| RuntimeError::Closed(self.key.to_string()))?;
        connection.commit().await.map_err(|source| {
            RuntimeError::Statement {
                key: self.key.to_string(),
                source,
            }
            .into()
        })
    }

    /// Runs every queued rollback epilogue in order, then closes the connection even if
    /// it is still locked. Commit epilogues are discarded.
    pub async fn rollback(&self) -> conflux_error::Result<()> {
        let (queries, was_locked) = {
            let mut book = self.book();
            if book.closed {
                return Ok(());
            }
            book.closed = true;
            book.commit_queries.clear();
            (
                std::mem::take(&mut book.rollback_queries),
                book.state.is_locked(),
            )
        };
        if was_locked {
            tracing::warn!(
                target: "conflux::block_connection",
                key = %self.key,
                "Rolling back a block connection that is still locked"
            );
        }
        self.finish(EpiloguePhase::Rollback, queries).await
    }

    /// Runs every queued commit epilogue in order, then closes the connection.
    ///
    /// Fails while a result set is open. Does nothing while locked or once closed.
    pub async fn close(&self) -> conflux_error::Result<()> {
        let queries = {
            let mut book = self.book();
            if book.state.has_open_result_set() {
                return Err(ConfluxError::contract_violation(format!(
                    "Cannot close block connection for '{}' while a result set is open",
                    self.key
                ))
                .with_hint("Release the connection lease before closing"));
            }
            if book.closed || book.state.is_locked() {
                return Ok(());
            }
            book.closed = true;
            book.rollback_queries.clear();
            std::mem::take(&mut book.commit_queries)
        };
        self.finish(EpiloguePhase::Commit, queries).await
    }

    async fn finish(&self, phase: EpiloguePhase, queries: Vec<String>) -> conflux_error::Result<()> {
        let Some(mut connection) = self.connection.lock().await.take() else {
            return Ok(());
        };

        let mut failure: Option<ConfluxError> = None;
        if !queries.is_empty() {
            match connection.create_statement().await {
                Ok(mut statement) => {
                    for (index, sql) in queries.iter().enumerate() {
                        let started = Instant::now();
                        let outcome = statement.execute(sql).await;
                        let elapsed_ms = started.elapsed().as_millis() as u64;
                        match outcome {
                            Ok(_) => tracing::info!(
                                target: "conflux::block_connection",
                                key = %self.key,
                                %phase,
                                index,
                                elapsed_ms,
                                sql = %self.sql_for_log(sql),
                                "Executed epilogue statement"
                            ),
                            Err(source) => {
                                tracing::error!(
                                    target: "conflux::block_connection",
                                    key = %self.key,
                                    %phase,
                                    index,
                                    elapsed_ms,
                                    sql = %self.sql_for_log(sql),
                                    error = %source,
                                    "Epilogue statement failed"
                                );
                                failure = Some(
                                    RuntimeError::Epilogue {
                                        phase,
                                        index,
                                        statement: sql.clone(),
                                        source,
                                    }
                                    .into(),
                                );
                                break;
                            }
                        }
                    }
                    self.release_statement(statement.as_mut()).await;
                }
                Err(source) => {
                    failure = Some(
                        RuntimeError::Statement {
                            key: self.key.to_string(),
                            source,
                        }
                        .into(),
                    );
                }
            }
        }

        if let Err(e) = connection.close().await {
            tracing::warn!(
                target: "conflux::block_connection",
                key = %self.key,
                error = %e,
                "Failed to close connection"
            );
        }

        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn release_statement(&self, statement: &mut dyn Statement) {
        if let Err(e) = statement.close().await {
            tracing::warn!(
                target: "conflux::block_connection",
                key = %self.key,
                error = %e,
                "Failed to close statement"
            );
        }
    }
}
