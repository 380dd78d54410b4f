use std::collections::BTreeSet;

use crate::kinds::{CredentialKind, SpecificationKind};
use crate::rule::IntermediationRule;

/// Produces `output_kind` credentials for one specification kind, through an ordered
/// list of intermediation rules.
#[derive(Debug, Clone)]
pub struct CredentialProvider {
    pub name: String,
    pub spec_kind: SpecificationKind,
    pub output_kind: CredentialKind,
    rules: Vec<IntermediationRule>,
}

impl CredentialProvider {
    pub fn new(
        name: impl Into<String>,
        spec_kind: SpecificationKind,
        output_kind: CredentialKind,
    ) -> Self {
        Self {
            name: name.into(),
            spec_kind,
            output_kind,
            rules: Vec::new(),
        }
    }

    pub fn with_rule(mut self, rule: IntermediationRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Replaces the provider's own rules.
    pub fn configured_with(mut self, rules: Vec<IntermediationRule>) -> Self {
        self.rules = rules;
        self
    }

    pub fn rules(&self) -> &[IntermediationRule] {
        &self.rules
    }

    pub fn is_configured(&self) -> bool {
        !self.rules.is_empty()
    }

    /// First rule, in order, whose input kind is held.
    pub fn rule_for(&self, held: &BTreeSet<CredentialKind>) -> Option<&IntermediationRule> {
        self.rules.iter().find(|r| held.contains(&r.input_kind))
    }

    pub fn rule_matching(
        &self,
        spec_kind: SpecificationKind,
        input_kind: CredentialKind,
        output_kind: CredentialKind,
    ) -> Option<&IntermediationRule> {
        self.rules.iter().find(|r| {
            r.spec_kind == spec_kind && r.input_kind == input_kind && r.output_kind == output_kind
        })
    }
}
