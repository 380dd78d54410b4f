//! Multi-hop credential intermediation.
//!
//! A [`CredentialChain`] links rules so that each step's output kind is the next step's
//! input kind, e.g. a client secret traded for an IdP token, then the token traded for
//! cloud session credentials. The chain runs as one unit: either every step succeeds or
//! the whole resolution fails, never yielding a partial credential.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashSet, VecDeque};

use crate::error::CredentialError;
use crate::identity::{Credential, Identity};
use crate::kinds::{CredentialKind, SpecificationKind};
use crate::rule::{CredentialTransform, IntermediationRule};
use crate::specification::AuthenticationSpecification;

#[derive(Debug, Clone)]
pub struct CredentialChain {
    name: String,
    spec_kind: SpecificationKind,
    steps: Vec<IntermediationRule>,
}

impl CredentialChain {
    /// Validates that `steps` is non-empty, shares one specification kind and links up.
    pub fn new(
        name: impl Into<String>,
        steps: Vec<IntermediationRule>,
    ) -> Result<Self, CredentialError> {
        let name = name.into();
        let first = steps
            .first()
            .ok_or_else(|| CredentialError::InvalidRule(format!("chain '{}' has no steps", name)))?;
        let spec_kind = first.spec_kind;

        for (index, step) in steps.iter().enumerate() {
            if step.spec_kind != spec_kind {
                return Err(CredentialError::InvalidRule(format!(
                    "chain '{}' step {} ('{}') is for {}, chain is for {}",
                    name, index, step.name, step.spec_kind, spec_kind
                )));
            }
        }
        for (index, pair) in steps.windows(2).enumerate() {
            if pair[0].output_kind != pair[1].input_kind {
                return Err(CredentialError::InvalidRule(format!(
                    "chain '{}' step {} produces {} but step {} consumes {}",
                    name,
                    index,
                    pair[0].output_kind,
                    index + 1,
                    pair[1].input_kind
                )));
            }
        }

        Ok(Self {
            name,
            spec_kind,
            steps,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn spec_kind(&self) -> SpecificationKind {
        self.spec_kind
    }

    pub fn input_kind(&self) -> CredentialKind {
        self.steps[0].input_kind
    }

    pub fn output_kind(&self) -> CredentialKind {
        self.steps[self.steps.len() - 1].output_kind
    }

    pub fn steps(&self) -> &[IntermediationRule] {
        &self.steps
    }

    /// Runs every step in order, feeding each output to the next step.
    pub async fn run(
        &self,
        specification: &AuthenticationSpecification,
        input: &Credential,
        identity: &Identity,
    ) -> Result<Credential, CredentialError> {
        let mut current = input.clone();
        for (step, rule) in self.steps.iter().enumerate() {
            let next = rule
                .run(specification, &current, identity)
                .await
                .map_err(|source| CredentialError::ChainStepFailed {
                    step,
                    rule: rule.name.clone(),
                    source,
                })?;
            if next.kind() != rule.output_kind {
                return Err(CredentialError::ChainStepFailed {
                    step,
                    rule: rule.name.clone(),
                    source: anyhow::anyhow!(
                        "produced a '{}' credential, expected '{}'",
                        next.kind(),
                        rule.output_kind
                    ),
                });
            }
            tracing::debug!(
                target: "conflux::credentials",
                chain = %self.name,
                step,
                rule = %rule.name,
                "Credential chain step complete"
            );
            current = next;
        }
        Ok(current)
    }

    /// Collapses the chain into a single rule from its first input to its last output.
    pub fn into_rule(self) -> IntermediationRule {
        IntermediationRule::new(
            self.name.clone(),
            self.spec_kind,
            self.input_kind(),
            self.output_kind(),
            self,
        )
    }
}

#[async_trait]
impl CredentialTransform for CredentialChain {
    async fn apply(
        &self,
        specification: &AuthenticationSpecification,
        input: &Credential,
        identity: &Identity,
    ) -> anyhow::Result<Credential> {
        Ok(self.run(specification, input, identity).await?)
    }
}

/// Finds the shortest path of rules under `spec_kind` leading from any held kind to `target`.
///
/// Breadth-first over credential kinds; ties are broken by held-kind order then rule order.
pub fn plan_chain(
    rules: &[IntermediationRule],
    spec_kind: SpecificationKind,
    held: &BTreeSet<CredentialKind>,
    target: CredentialKind,
) -> Option<CredentialChain> {
    let candidates: Vec<&IntermediationRule> =
        rules.iter().filter(|r| r.spec_kind == spec_kind).collect();

    let mut visited: HashSet<CredentialKind> = held.iter().copied().collect();
    let mut queue: VecDeque<(CredentialKind, Vec<usize>)> =
        held.iter().map(|k| (*k, Vec::new())).collect();

    while let Some((kind, path)) = queue.pop_front() {
        for (index, rule) in candidates.iter().enumerate() {
            if rule.input_kind != kind {
                continue;
            }
            let mut next_path = path.clone();
            next_path.push(index);

            if rule.output_kind == target {
                let steps: Vec<IntermediationRule> =
                    next_path.iter().map(|i| candidates[*i].clone()).collect();
                let name = steps
                    .iter()
                    .map(|s| s.name.as_str())
                    .collect::<Vec<_>>()
                    .join(" -> ");
                return CredentialChain::new(name, steps).ok();
            }
            if visited.insert(rule.output_kind) {
                queue.push_back((rule.output_kind, next_path));
            }
        }
    }

    None
}
