use crate::error::CredentialError;
use crate::identity::{Credential, Identity};
use crate::registry::ProviderRegistry;
use crate::specification::AuthenticationSpecification;

/// Resolves the credential a connection needs for `specification`, starting from what
/// `identity` already holds.
pub async fn make_credential(
    registry: &ProviderRegistry,
    specification: &AuthenticationSpecification,
    identity: &Identity,
) -> Result<Credential, CredentialError> {
    let spec_kind = specification.kind();
    let held = identity.credential_kinds();

    let (provider, matched) = registry
        .find_provider(spec_kind, &held)
        .inspect_err(|e| {
            tracing::warn!(
                target: "conflux::credentials",
                identity = identity.name(),
                specification = %spec_kind,
                held = ?held,
                error = %e,
                "Credential resolution failed"
            )
        })?;

    let rule = provider
        .rule_matching(spec_kind, matched.input_kind, provider.output_kind)
        .ok_or_else(|| CredentialError::NoMatchingProvider {
            specification: spec_kind,
            held: held.iter().copied().collect(),
        })?;

    let input = identity.credential(rule.input_kind).ok_or_else(|| {
        CredentialError::HeldCredentialMissing {
            identity: identity.name().to_string(),
            kind: rule.input_kind,
        }
    })?;

    tracing::debug!(
        target: "conflux::credentials",
        identity = identity.name(),
        provider = %provider.name,
        rule = %rule.name,
        input = %rule.input_kind,
        output = %rule.output_kind,
        "Resolving credential"
    );

    let credential = rule
        .run(specification, input, identity)
        .await
        .map_err(|source| match source.downcast::<CredentialError>() {
            Ok(inner) => inner,
            Err(source) => CredentialError::RuleFailed {
                rule: rule.name.clone(),
                source,
            },
        })?;

    if credential.kind() != provider.output_kind {
        return Err(CredentialError::UnexpectedCredential {
            rule: rule.name.clone(),
            expected: provider.output_kind,
            actual: credential.kind(),
        });
    }

    Ok(credential)
}
