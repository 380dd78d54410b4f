use conflux_common::scrubber::scrub_sql;
use conflux_error::{ConfluxError, ErrorCode, ErrorContext};
use std::fmt;
use thiserror::Error;

/// Which terminal pass of a block connection an epilogue belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpiloguePhase {
    Commit,
    Rollback,
}

impl fmt::Display for EpiloguePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EpiloguePhase::Commit => f.write_str("commit"),
            EpiloguePhase::Rollback => f.write_str("rollback"),
        }
    }
}

/// Structured errors for connection handling
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Failed to provision connection for '{key}': {source}")]
    Provisioning {
        key: String,
        pool_name: Option<String>,
        #[source]
        source: anyhow::Error,
    },

    #[error("Statement failed on '{key}': {source}")]
    Statement {
        key: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("{phase} epilogue statement {index} failed: {source}")]
    Epilogue {
        phase: EpiloguePhase,
        index: usize,
        statement: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Block connection for '{0}' is already closed")]
    Closed(String),
}

impl From<RuntimeError> for ConfluxError {
    fn from(err: RuntimeError) -> Self {
        match err {
            RuntimeError::Provisioning {
                ref key,
                ref pool_name,
                ..
            } => {
                let context = ErrorContext::Connection {
                    key: Some(key.clone()),
                    pool_name: pool_name.clone(),
                };
                ConfluxError::new(ErrorCode::ProvisioningFailed, err.to_string())
                    .with_context(context)
            }
            RuntimeError::Statement { ref key, .. } => {
                let context = ErrorContext::Connection {
                    key: Some(key.clone()),
                    pool_name: None,
                };
                ConfluxError::new(ErrorCode::StatementFailed, err.to_string()).with_context(context)
            }
            RuntimeError::Epilogue {
                phase,
                index,
                ref statement,
                ..
            } => {
                let context = ErrorContext::Epilogue {
                    statement_index: index,
                    statement: scrub_sql(statement),
                    phase: phase.to_string(),
                };
                ConfluxError::new(ErrorCode::EpilogueFailed, err.to_string()).with_context(context)
            }
            RuntimeError::Closed(_) => {
                ConfluxError::new(ErrorCode::ConnectionClosed, err.to_string())
                    .with_hint("Acquire a new block connection instead of reusing a closed one")
            }
        }
    }
}
