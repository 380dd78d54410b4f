use conflux_error::{ConfluxError, ErrorCode, ErrorContext};
use thiserror::Error;

use crate::kinds::{CredentialKind, SpecificationKind};

/// Structured errors for credential resolution
#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("No credential provider for specification '{specification}' accepts any held credential (held: [{}])",
        held.iter().map(|k| k.as_str()).collect::<Vec<_>>().join(", "))]
    NoMatchingProvider {
        specification: SpecificationKind,
        held: Vec<CredentialKind>,
    },

    #[error("Credential provider '{provider}' for specification '{specification}' has no intermediation rules configured")]
    NotConfigured {
        provider: String,
        specification: SpecificationKind,
    },

    #[error("Identity '{identity}' does not hold a '{kind}' credential")]
    HeldCredentialMissing {
        identity: String,
        kind: CredentialKind,
    },

    #[error("Intermediation rule '{rule}' failed: {source}")]
    RuleFailed {
        rule: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Credential chain step {step} ('{rule}') failed: {source}")]
    ChainStepFailed {
        step: usize,
        rule: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Rule '{rule}' produced a '{actual}' credential, expected '{expected}'")]
    UnexpectedCredential {
        rule: String,
        expected: CredentialKind,
        actual: CredentialKind,
    },

    #[error("Invalid intermediation rule configuration: {0}")]
    InvalidRule(String),
}

impl CredentialError {
    pub fn code(&self) -> ErrorCode {
        match self {
            CredentialError::NoMatchingProvider { .. } => ErrorCode::NoMatchingProvider,
            CredentialError::NotConfigured { .. } => ErrorCode::ProviderNotConfigured,
            CredentialError::HeldCredentialMissing { .. } => ErrorCode::HeldCredentialMissing,
            CredentialError::RuleFailed { .. } | CredentialError::ChainStepFailed { .. } => {
                ErrorCode::CredentialExchangeFailed
            }
            CredentialError::UnexpectedCredential { .. } => ErrorCode::UnexpectedCredential,
            CredentialError::InvalidRule(_) => ErrorCode::InvalidRule,
        }
    }
}

impl From<CredentialError> for ConfluxError {
    fn from(err: CredentialError) -> Self {
        let error = ConfluxError::new(err.code(), err.to_string());
        match err {
            CredentialError::NoMatchingProvider {
                specification,
                held,
            } => error
                .with_context(ErrorContext::CredentialResolution {
                    specification: specification.to_string(),
                    held_credentials: held.iter().map(|k| k.to_string()).collect(),
                    provider: None,
                })
                .with_hint("Register an intermediation rule consuming one of the held credentials"),
            CredentialError::NotConfigured {
                provider,
                specification,
            } => error
                .with_context(ErrorContext::CredentialResolution {
                    specification: specification.to_string(),
                    held_credentials: Vec::new(),
                    provider: Some(provider),
                })
                .with_hint("Configure the provider with at least one intermediation rule"),
            _ => error,
        }
    }
}
