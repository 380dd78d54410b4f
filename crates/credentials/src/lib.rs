//! # conflux-credentials
//!
//! Credential intermediation for outbound connections.
//!
//! A target store declares an [`AuthenticationSpecification`]; an [`Identity`] holds some set
//! of [`Credential`]s. The [`ProviderRegistry`] picks the first [`CredentialProvider`] for the
//! specification kind that owns an [`IntermediationRule`] consuming a held credential, and
//! [`make_credential`] runs that rule. Rules may be multi-hop ([`CredentialChain`]).

pub mod chain;
pub mod error;
pub mod exchange;
pub mod identity;
pub mod kinds;
pub mod provider;
pub mod registry;
pub mod resolver;
pub mod rule;
pub mod specification;

pub use chain::{plan_chain, CredentialChain};
pub use error::CredentialError;
pub use identity::{Credential, Identity};
pub use kinds::{CredentialKind, SpecificationKind};
pub use provider::CredentialProvider;
pub use registry::ProviderRegistry;
pub use resolver::make_credential;
pub use rule::{CredentialTransform, IntermediationRule};
pub use specification::{
    AuthenticationSpecification, AwsRoleFederationSpec, OAuthClientSpec, TokenExchangeSpec,
};
