use std::collections::BTreeSet;

use crate::error::CredentialError;
use crate::kinds::{CredentialKind, SpecificationKind};
use crate::provider::CredentialProvider;
use crate::rule::IntermediationRule;

/// Immutable, ordered set of credential providers. Assembled once at startup.
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    providers: Vec<CredentialProvider>,
}

impl ProviderRegistry {
    /// Assembles the registry from candidate providers.
    ///
    /// With a `rule_source`, each candidate is configured with exactly the source rules
    /// serving its `{spec_kind, output_kind}` and kept only if at least one matched.
    /// Without one, candidates keep their own rules, which must serve the declared kinds.
    pub fn assemble(
        candidates: Vec<CredentialProvider>,
        rule_source: Option<Vec<IntermediationRule>>,
    ) -> Result<Self, CredentialError> {
        let mut providers = Vec::with_capacity(candidates.len());

        match rule_source {
            Some(rules) => {
                for candidate in candidates {
                    let matching: Vec<IntermediationRule> = rules
                        .iter()
                        .filter(|r| r.serves(candidate.spec_kind, candidate.output_kind))
                        .cloned()
                        .collect();
                    if matching.is_empty() {
                        tracing::debug!(
                            target: "conflux::credentials",
                            provider = %candidate.name,
                            specification = %candidate.spec_kind,
                            output = %candidate.output_kind,
                            "Dropping credential provider with no matching rules"
                        );
                        continue;
                    }
                    providers.push(candidate.configured_with(matching));
                }
            }
            None => {
                for candidate in candidates {
                    if let Some(bad) = candidate
                        .rules()
                        .iter()
                        .find(|r| !r.serves(candidate.spec_kind, candidate.output_kind))
                    {
                        return Err(CredentialError::InvalidRule(format!(
                            "provider '{}' declares {} -> {} but rule '{}' is {} / {} -> {}",
                            candidate.name,
                            candidate.spec_kind,
                            candidate.output_kind,
                            bad.name,
                            bad.spec_kind,
                            bad.input_kind,
                            bad.output_kind
                        )));
                    }
                    providers.push(candidate);
                }
            }
        }

        tracing::info!(
            target: "conflux::credentials",
            providers = providers.len(),
            "Credential provider registry assembled"
        );
        Ok(Self { providers })
    }

    /// Finds the provider and rule to use for `spec_kind` given the held credential kinds.
    ///
    /// Providers are consulted in registration order. The first provider for the
    /// specification kind that has no rules at all fails the lookup as not configured.
    pub fn find_provider(
        &self,
        spec_kind: SpecificationKind,
        held: &BTreeSet<CredentialKind>,
    ) -> Result<(&CredentialProvider, &IntermediationRule), CredentialError> {
        for provider in self.providers.iter().filter(|p| p.spec_kind == spec_kind) {
            if !provider.is_configured() {
                return Err(CredentialError::NotConfigured {
                    provider: provider.name.clone(),
                    specification: spec_kind,
                });
            }
            if let Some(rule) = provider.rule_for(held) {
                return Ok((provider, rule));
            }
        }

        Err(CredentialError::NoMatchingProvider {
            specification: spec_kind,
            held: held.iter().copied().collect(),
        })
    }

    pub fn providers(&self) -> &[CredentialProvider] {
        &self.providers
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
