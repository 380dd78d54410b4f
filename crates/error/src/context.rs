//! # Error Contexts
//!
//! Structured metadata attached to errors for programmatic handling.

use serde::{Deserialize, Serialize};

/// Structured context for errors.
///
/// Each variant provides the fields relevant to that error family.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ErrorContext {
    /// Context for CONFLUX-3002/3003 and credential failures
    CredentialResolution {
        /// Specification kind that was requested
        specification: String,
        /// Credential kinds the identity held when the lookup ran
        held_credentials: Vec<String>,
        /// Provider that was matched, if any
        provider: Option<String>,
    },

    /// Context for connection errors (CONFLUX-1001, 1002, 1004)
    Connection {
        key: Option<String>,
        pool_name: Option<String>,
    },

    /// Context for CONFLUX-2002 (EpilogueFailed)
    Epilogue {
        /// Zero-based position of the failing statement in its list
        statement_index: usize,
        statement: String,
        /// "commit" or "rollback"
        phase: String,
    },

    /// Context for CONFLUX-3001 (config errors)
    Config {
        file_path: Option<String>,
        field: Option<String>,
    },

    /// Generic key-value context for extensibility
    Generic {
        #[serde(flatten)]
        data: std::collections::HashMap<String, serde_json::Value>,
    },
}
