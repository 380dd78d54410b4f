//! Built-in intermediation rules.
//!
//! Network rules talk to token services over HTTP with `reqwest`:
//! - OAuth 2.0 client credentials (client secret to access token)
//! - RFC 8693 token exchange (access token to access token)
//! - AWS STS `AssumeRoleWithWebIdentity` (access token to session credentials)
//!
//! Local pass-through rules hand a held credential on unchanged. No request timeout is
//! applied here beyond whatever the supplied `reqwest::Client` is configured with.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::ExposeSecret;
use serde::Deserialize;

use crate::chain::CredentialChain;
use crate::identity::{secret, Credential, Identity};
use crate::kinds::{CredentialKind, SpecificationKind};
use crate::provider::CredentialProvider;
use crate::rule::{CredentialTransform, IntermediationRule};
use crate::specification::AuthenticationSpecification;

const TOKEN_EXCHANGE_GRANT: &str = "urn:ietf:params:oauth:grant-type:token-exchange";
const ACCESS_TOKEN_TYPE: &str = "urn:ietf:params:oauth:token-type:access_token";
const STS_API_VERSION: &str = "2011-06-15";

/// OAuth 2.0 token response from the authorization server.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub scope: Option<String>,
    /// Only present on token-exchange responses.
    #[serde(default)]
    pub issued_token_type: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl From<TokenResponse> for Credential {
    fn from(response: TokenResponse) -> Self {
        Credential::OAuthToken {
            access_token: secret(response.access_token),
            token_type: response.token_type,
            expires_in: response.expires_in,
            scope: response.scope,
        }
    }
}

async fn post_token_form(
    client: &reqwest::Client,
    token_url: &str,
    form: &[(&str, &str)],
) -> Result<TokenResponse> {
    let resp = client
        .post(token_url)
        .form(form)
        .send()
        .await
        .context("Failed to send OAuth token request")?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        anyhow::bail!("OAuth token request failed: {} - {}", status, body);
    }

    resp.json::<TokenResponse>()
        .await
        .context("Failed to parse OAuth token response")
}

/// Client secret to access token via the client-credentials grant.
#[derive(Debug, Clone)]
pub struct OAuthClientCredentialsExchange {
    client: reqwest::Client,
}

impl OAuthClientCredentialsExchange {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CredentialTransform for OAuthClientCredentialsExchange {
    async fn apply(
        &self,
        specification: &AuthenticationSpecification,
        input: &Credential,
        _identity: &Identity,
    ) -> Result<Credential> {
        let oauth = specification.oauth_client().with_context(|| {
            format!(
                "Specification '{}' has no OAuth client settings",
                specification.kind()
            )
        })?;
        let Credential::ClientSecret {
            client_id,
            client_secret,
        } = input
        else {
            anyhow::bail!("Expected a client secret, got '{}'", input.kind());
        };

        let scope = oauth.scopes.join(" ");
        let mut form = vec![
            ("grant_type", "client_credentials"),
            ("client_id", client_id.as_str()),
            ("client_secret", client_secret.expose_secret()),
        ];
        if !scope.is_empty() {
            form.push(("scope", &scope));
        }

        tracing::info!(
            target: "conflux::credentials",
            token_url = %oauth.token_url,
            client_id = %client_id,
            "Requesting OAuth client-credentials token"
        );
        Ok(post_token_form(&self.client, &oauth.token_url, &form)
            .await?
            .into())
    }
}

/// Access token to access token, per RFC 8693.
#[derive(Debug, Clone)]
pub struct TokenExchange {
    client: reqwest::Client,
}

impl TokenExchange {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CredentialTransform for TokenExchange {
    async fn apply(
        &self,
        specification: &AuthenticationSpecification,
        input: &Credential,
        _identity: &Identity,
    ) -> Result<Credential> {
        let AuthenticationSpecification::TokenExchange(exchange) = specification else {
            anyhow::bail!(
                "Token exchange requires a token_exchange specification, got '{}'",
                specification.kind()
            );
        };
        let Credential::OAuthToken { access_token, .. } = input else {
            anyhow::bail!("Expected an OAuth token, got '{}'", input.kind());
        };

        let scope = exchange.scopes.join(" ");
        let mut form = vec![
            ("grant_type", TOKEN_EXCHANGE_GRANT),
            ("subject_token", access_token.expose_secret()),
            ("subject_token_type", ACCESS_TOKEN_TYPE),
        ];
        if let Some(audience) = &exchange.audience {
            form.push(("audience", audience));
        }
        if !scope.is_empty() {
            form.push(("scope", &scope));
        }
        if let Some(requested) = &exchange.requested_token_type {
            form.push(("requested_token_type", requested));
        }

        tracing::info!(
            target: "conflux::credentials",
            token_url = %exchange.token_url,
            audience = ?exchange.audience,
            "Exchanging OAuth token"
        );
        let response = post_token_form(&self.client, &exchange.token_url, &form).await?;
        if let Some(issued) = &response.issued_token_type {
            tracing::debug!(target: "conflux::credentials", issued_token_type = %issued, "Token issued");
        }
        Ok(response.into())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AssumeRoleEnvelope {
    assume_role_with_web_identity_response: AssumeRoleResponse,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AssumeRoleResponse {
    assume_role_with_web_identity_result: AssumeRoleResult,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AssumeRoleResult {
    credentials: StsCredentials,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StsCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: String,
    #[serde(default)]
    expiration: Option<serde_json::Value>,
}

/// STS reports expiry as epoch seconds in JSON, RFC 3339 elsewhere.
fn parse_expiration(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    match value {
        serde_json::Value::Number(n) => n
            .as_f64()
            .and_then(|secs| DateTime::from_timestamp(secs as i64, 0)),
        serde_json::Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        _ => None,
    }
}

/// Access token to AWS session credentials via `AssumeRoleWithWebIdentity`.
#[derive(Debug, Clone)]
pub struct AwsWebIdentityExchange {
    client: reqwest::Client,
}

impl AwsWebIdentityExchange {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CredentialTransform for AwsWebIdentityExchange {
    async fn apply(
        &self,
        specification: &AuthenticationSpecification,
        input: &Credential,
        _identity: &Identity,
    ) -> Result<Credential> {
        let AuthenticationSpecification::AwsRoleFederation(federation) = specification else {
            anyhow::bail!(
                "Web identity federation requires an aws_role_federation specification, got '{}'",
                specification.kind()
            );
        };
        let Credential::OAuthToken { access_token, .. } = input else {
            anyhow::bail!("Expected an OAuth token, got '{}'", input.kind());
        };

        let duration = federation.duration_secs.to_string();
        let form = [
            ("Action", "AssumeRoleWithWebIdentity"),
            ("Version", STS_API_VERSION),
            ("RoleArn", federation.role_arn.as_str()),
            ("RoleSessionName", federation.session_name.as_str()),
            ("WebIdentityToken", access_token.expose_secret()),
            ("DurationSeconds", duration.as_str()),
        ];

        tracing::info!(
            target: "conflux::credentials",
            sts_endpoint = %federation.sts_endpoint,
            role_arn = %federation.role_arn,
            "Assuming role with web identity"
        );
        let resp = self
            .client
            .post(&federation.sts_endpoint)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&form)
            .send()
            .await
            .context("Failed to send AssumeRoleWithWebIdentity request")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("AssumeRoleWithWebIdentity failed: {} - {}", status, body);
        }

        let envelope = resp
            .json::<AssumeRoleEnvelope>()
            .await
            .context("Failed to parse AssumeRoleWithWebIdentity response")?;
        let creds = envelope
            .assume_role_with_web_identity_response
            .assume_role_with_web_identity_result
            .credentials;

        Ok(Credential::AwsSessionCredentials {
            access_key_id: creds.access_key_id,
            secret_access_key: secret(creds.secret_access_key),
            session_token: secret(creds.session_token),
            expiration: creds.expiration.as_ref().and_then(parse_expiration),
        })
    }
}

/// Hands the held credential on unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

#[async_trait]
impl CredentialTransform for Passthrough {
    async fn apply(
        &self,
        _specification: &AuthenticationSpecification,
        input: &Credential,
        _identity: &Identity,
    ) -> Result<Credential> {
        Ok(input.clone())
    }
}

pub fn username_password_passthrough() -> IntermediationRule {
    IntermediationRule::new(
        "username-password-passthrough",
        SpecificationKind::UsernamePassword,
        CredentialKind::UsernamePassword,
        CredentialKind::UsernamePassword,
        Passthrough,
    )
}

pub fn api_key_passthrough() -> IntermediationRule {
    IntermediationRule::new(
        "api-key-passthrough",
        SpecificationKind::ApiKey,
        CredentialKind::ApiKey,
        CredentialKind::ApiKey,
        Passthrough,
    )
}

pub fn anonymous_passthrough() -> IntermediationRule {
    IntermediationRule::new(
        "anonymous-passthrough",
        SpecificationKind::Anonymous,
        CredentialKind::Anonymous,
        CredentialKind::Anonymous,
        Passthrough,
    )
}

pub fn oauth_client_credentials_rule(
    client: reqwest::Client,
    spec_kind: SpecificationKind,
) -> IntermediationRule {
    IntermediationRule::new(
        "oauth-client-credentials",
        spec_kind,
        CredentialKind::ClientSecret,
        CredentialKind::OAuthToken,
        OAuthClientCredentialsExchange::new(client),
    )
}

pub fn token_exchange_rule(client: reqwest::Client) -> IntermediationRule {
    IntermediationRule::new(
        "token-exchange",
        SpecificationKind::TokenExchange,
        CredentialKind::OAuthToken,
        CredentialKind::OAuthToken,
        TokenExchange::new(client),
    )
}

pub fn aws_web_identity_rule(client: reqwest::Client) -> IntermediationRule {
    IntermediationRule::new(
        "aws-web-identity",
        SpecificationKind::AwsRoleFederation,
        CredentialKind::OAuthToken,
        CredentialKind::AwsSessionCredentials,
        AwsWebIdentityExchange::new(client),
    )
}

/// Client secret to IdP token to AWS session credentials, as one rule.
pub fn cross_cloud_federation_chain(
    client: reqwest::Client,
) -> Result<CredentialChain, crate::error::CredentialError> {
    CredentialChain::new(
        "idp-client-credentials -> aws-web-identity",
        vec![
            oauth_client_credentials_rule(client.clone(), SpecificationKind::AwsRoleFederation),
            aws_web_identity_rule(client),
        ],
    )
}

/// Every built-in rule, the cross-cloud chain included.
pub fn default_rule_source(
    client: reqwest::Client,
) -> Result<Vec<IntermediationRule>, crate::error::CredentialError> {
    Ok(vec![
        username_password_passthrough(),
        api_key_passthrough(),
        anonymous_passthrough(),
        oauth_client_credentials_rule(client.clone(), SpecificationKind::OAuthClientCredentials),
        token_exchange_rule(client.clone()),
        aws_web_identity_rule(client.clone()),
        cross_cloud_federation_chain(client)?.into_rule(),
    ])
}

/// The standard candidate providers, unconfigured.
pub fn default_providers() -> Vec<CredentialProvider> {
    vec![
        CredentialProvider::new(
            "username-password",
            SpecificationKind::UsernamePassword,
            CredentialKind::UsernamePassword,
        ),
        CredentialProvider::new("api-key", SpecificationKind::ApiKey, CredentialKind::ApiKey),
        CredentialProvider::new(
            "anonymous",
            SpecificationKind::Anonymous,
            CredentialKind::Anonymous,
        ),
        CredentialProvider::new(
            "oauth-client-credentials",
            SpecificationKind::OAuthClientCredentials,
            CredentialKind::OAuthToken,
        ),
        CredentialProvider::new(
            "token-exchange",
            SpecificationKind::TokenExchange,
            CredentialKind::OAuthToken,
        ),
        CredentialProvider::new(
            "aws-role-federation",
            SpecificationKind::AwsRoleFederation,
            CredentialKind::AwsSessionCredentials,
        ),
    ]
}
