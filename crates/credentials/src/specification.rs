use serde::{Deserialize, Serialize};

use crate::kinds::SpecificationKind;

/// OAuth 2.0 client-credentials grant against an identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthClientSpec {
    pub token_url: String,
    #[serde(default)]
    pub scopes: Vec<String>,
}

/// RFC 8693 token exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenExchangeSpec {
    pub token_url: String,
    #[serde(default)]
    pub audience: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub requested_token_type: Option<String>,
}

/// Federated access to AWS: an IdP-issued token traded at STS for session credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AwsRoleFederationSpec {
    pub idp: OAuthClientSpec,
    pub sts_endpoint: String,
    pub role_arn: String,
    pub session_name: String,
    #[serde(default = "default_session_duration_secs")]
    pub duration_secs: u32,
}

fn default_session_duration_secs() -> u32 {
    3600
}

/// How a target store expects to be authenticated against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthenticationSpecification {
    UsernamePassword,
    #[serde(rename = "oauth_client_credentials")]
    OAuthClientCredentials(OAuthClientSpec),
    TokenExchange(TokenExchangeSpec),
    AwsRoleFederation(AwsRoleFederationSpec),
    ApiKey {
        header_name: String,
    },
    Anonymous,
}

impl AuthenticationSpecification {
    pub fn kind(&self) -> SpecificationKind {
        match self {
            AuthenticationSpecification::UsernamePassword => SpecificationKind::UsernamePassword,
            AuthenticationSpecification::OAuthClientCredentials(_) => {
                SpecificationKind::OAuthClientCredentials
            }
            AuthenticationSpecification::TokenExchange(_) => SpecificationKind::TokenExchange,
            AuthenticationSpecification::AwsRoleFederation(_) => {
                SpecificationKind::AwsRoleFederation
            }
            AuthenticationSpecification::ApiKey { .. } => SpecificationKind::ApiKey,
            AuthenticationSpecification::Anonymous => SpecificationKind::Anonymous,
        }
    }

    /// The client-credentials leg, for specifications that have one.
    pub fn oauth_client(&self) -> Option<&OAuthClientSpec> {
        match self {
            AuthenticationSpecification::OAuthClientCredentials(spec) => Some(spec),
            AuthenticationSpecification::AwsRoleFederation(spec) => Some(&spec.idp),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_federation_spec() {
        let json = serde_json::json!({
            "type": "aws_role_federation",
            "idp": { "token_url": "https://idp.example/token", "scopes": ["sts"] },
            "sts_endpoint": "https://sts.amazonaws.com",
            "role_arn": "arn:aws:iam::123456789012:role/reader",
            "session_name": "conflux"
        });
        let spec: AuthenticationSpecification = serde_json::from_value(json).unwrap();
        assert_eq!(spec.kind(), SpecificationKind::AwsRoleFederation);
        assert_eq!(
            spec.oauth_client().map(|c| c.token_url.as_str()),
            Some("https://idp.example/token")
        );
        match spec {
            AuthenticationSpecification::AwsRoleFederation(f) => assert_eq!(f.duration_secs, 3600),
            other => panic!("Wrong specification: {:?}", other),
        }
    }
}
