use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed set of authentication specification types a connection can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecificationKind {
    UsernamePassword,
    #[serde(rename = "oauth_client_credentials")]
    OAuthClientCredentials,
    TokenExchange,
    AwsRoleFederation,
    ApiKey,
    Anonymous,
}

impl SpecificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpecificationKind::UsernamePassword => "username_password",
            SpecificationKind::OAuthClientCredentials => "oauth_client_credentials",
            SpecificationKind::TokenExchange => "token_exchange",
            SpecificationKind::AwsRoleFederation => "aws_role_federation",
            SpecificationKind::ApiKey => "api_key",
            SpecificationKind::Anonymous => "anonymous",
        }
    }
}

impl fmt::Display for SpecificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed set of credential types an identity can hold or a rule can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
    Anonymous,
    UsernamePassword,
    ClientSecret,
    #[serde(rename = "oauth_token")]
    OAuthToken,
    ApiKey,
    AwsSessionCredentials,
    KerberosTicket,
}

impl CredentialKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialKind::Anonymous => "anonymous",
            CredentialKind::UsernamePassword => "username_password",
            CredentialKind::ClientSecret => "client_secret",
            CredentialKind::OAuthToken => "oauth_token",
            CredentialKind::ApiKey => "api_key",
            CredentialKind::AwsSessionCredentials => "aws_session_credentials",
            CredentialKind::KerberosTicket => "kerberos_ticket",
        }
    }
}

impl fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_matches_serde_name() {
        let json = serde_json::to_string(&CredentialKind::AwsSessionCredentials).unwrap();
        assert_eq!(json, format!("\"{}\"", CredentialKind::AwsSessionCredentials));

        let json = serde_json::to_string(&SpecificationKind::OAuthClientCredentials).unwrap();
        assert_eq!(
            json,
            format!("\"{}\"", SpecificationKind::OAuthClientCredentials)
        );
    }
}
