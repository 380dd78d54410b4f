use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

use crate::identity::{Credential, Identity};
use crate::kinds::{CredentialKind, SpecificationKind};
use crate::specification::AuthenticationSpecification;

/// The body of an intermediation rule: turns one held credential into another.
#[async_trait]
pub trait CredentialTransform: Send + Sync {
    async fn apply(
        &self,
        specification: &AuthenticationSpecification,
        input: &Credential,
        identity: &Identity,
    ) -> anyhow::Result<Credential>;
}

type TransformFn = dyn Fn(&AuthenticationSpecification, &Credential, &Identity) -> anyhow::Result<Credential>
    + Send
    + Sync;

/// Adapts a synchronous closure into a [`CredentialTransform`].
struct FnTransform(Box<TransformFn>);

#[async_trait]
impl CredentialTransform for FnTransform {
    async fn apply(
        &self,
        specification: &AuthenticationSpecification,
        input: &Credential,
        identity: &Identity,
    ) -> anyhow::Result<Credential> {
        (self.0)(specification, input, identity)
    }
}

/// One credential transformation step: under specification `spec_kind`, consumes an
/// `input_kind` credential and produces an `output_kind` one.
#[derive(Clone)]
pub struct IntermediationRule {
    pub name: String,
    pub spec_kind: SpecificationKind,
    pub input_kind: CredentialKind,
    pub output_kind: CredentialKind,
    pub apply: Arc<dyn CredentialTransform>,
}

impl IntermediationRule {
    pub fn new(
        name: impl Into<String>,
        spec_kind: SpecificationKind,
        input_kind: CredentialKind,
        output_kind: CredentialKind,
        apply: impl CredentialTransform + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            spec_kind,
            input_kind,
            output_kind,
            apply: Arc::new(apply),
        }
    }

    /// Builds a rule from a local, non-async transformation.
    pub fn from_fn<F>(
        name: impl Into<String>,
        spec_kind: SpecificationKind,
        input_kind: CredentialKind,
        output_kind: CredentialKind,
        f: F,
    ) -> Self
    where
        F: Fn(&AuthenticationSpecification, &Credential, &Identity) -> anyhow::Result<Credential>
            + Send
            + Sync
            + 'static,
    {
        Self::new(
            name,
            spec_kind,
            input_kind,
            output_kind,
            FnTransform(Box::new(f)),
        )
    }

    /// True if this rule can serve a provider declaring `{spec_kind, output_kind}`.
    pub fn serves(&self, spec_kind: SpecificationKind, output_kind: CredentialKind) -> bool {
        self.spec_kind == spec_kind && self.output_kind == output_kind
    }

    pub async fn run(
        &self,
        specification: &AuthenticationSpecification,
        input: &Credential,
        identity: &Identity,
    ) -> anyhow::Result<Credential> {
        self.apply.apply(specification, input, identity).await
    }
}

impl fmt::Debug for IntermediationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IntermediationRule")
            .field("name", &self.name)
            .field("spec_kind", &self.spec_kind)
            .field("input_kind", &self.input_kind)
            .field("output_kind", &self.output_kind)
            .finish_non_exhaustive()
    }
}
