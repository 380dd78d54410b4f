//! Credentials and the identities that hold them.

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use std::collections::BTreeSet;

use crate::kinds::CredentialKind;

/// A concrete credential. Secret material never appears in `Debug` output.
#[derive(Clone)]
pub enum Credential {
    Anonymous,
    UsernamePassword {
        username: String,
        password: SecretString,
    },
    ClientSecret {
        client_id: String,
        client_secret: SecretString,
    },
    OAuthToken {
        access_token: SecretString,
        token_type: String,
        expires_in: Option<u64>,
        scope: Option<String>,
    },
    ApiKey {
        key: SecretString,
    },
    AwsSessionCredentials {
        access_key_id: String,
        secret_access_key: SecretString,
        session_token: SecretString,
        expiration: Option<DateTime<Utc>>,
    },
    KerberosTicket {
        principal: String,
        ticket: SecretString,
    },
}

impl Credential {
    pub fn kind(&self) -> CredentialKind {
        match self {
            Credential::Anonymous => CredentialKind::Anonymous,
            Credential::UsernamePassword { .. } => CredentialKind::UsernamePassword,
            Credential::ClientSecret { .. } => CredentialKind::ClientSecret,
            Credential::OAuthToken { .. } => CredentialKind::OAuthToken,
            Credential::ApiKey { .. } => CredentialKind::ApiKey,
            Credential::AwsSessionCredentials { .. } => CredentialKind::AwsSessionCredentials,
            Credential::KerberosTicket { .. } => CredentialKind::KerberosTicket,
        }
    }

    pub fn username_password(username: impl Into<String>, password: impl Into<String>) -> Self {
        Credential::UsernamePassword {
            username: username.into(),
            password: secret(password),
        }
    }

    pub fn client_secret(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Credential::ClientSecret {
            client_id: client_id.into(),
            client_secret: secret(client_secret),
        }
    }

    pub fn bearer_token(access_token: impl Into<String>) -> Self {
        Credential::OAuthToken {
            access_token: secret(access_token),
            token_type: "Bearer".to_string(),
            expires_in: None,
            scope: None,
        }
    }

    pub fn api_key(key: impl Into<String>) -> Self {
        Credential::ApiKey {
            key: secret(key),
        }
    }

    pub fn kerberos_ticket(principal: impl Into<String>, ticket: impl Into<String>) -> Self {
        Credential::KerberosTicket {
            principal: principal.into(),
            ticket: secret(ticket),
        }
    }
}

/// Wraps any string-like value as a secret.
pub fn secret(value: impl Into<String>) -> SecretString {
    let value: String = value.into();
    SecretString::new(value.into())
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credential::Anonymous => f.write_str("Anonymous"),
            Credential::UsernamePassword { username, .. } => f
                .debug_struct("UsernamePassword")
                .field("username", username)
                .field("password", &"***REDACTED***")
                .finish(),
            Credential::ClientSecret { client_id, .. } => f
                .debug_struct("ClientSecret")
                .field("client_id", client_id)
                .field("client_secret", &"***REDACTED***")
                .finish(),
            Credential::OAuthToken {
                token_type,
                expires_in,
                scope,
                ..
            } => f
                .debug_struct("OAuthToken")
                .field("access_token", &"***REDACTED***")
                .field("token_type", token_type)
                .field("expires_in", expires_in)
                .field("scope", scope)
                .finish(),
            Credential::ApiKey { .. } => f
                .debug_struct("ApiKey")
                .field("key", &"***REDACTED***")
                .finish(),
            Credential::AwsSessionCredentials {
                access_key_id,
                expiration,
                ..
            } => f
                .debug_struct("AwsSessionCredentials")
                .field("access_key_id", access_key_id)
                .field("secret_access_key", &"***REDACTED***")
                .field("session_token", &"***REDACTED***")
                .field("expiration", expiration)
                .finish(),
            Credential::KerberosTicket { principal, .. } => f
                .debug_struct("KerberosTicket")
                .field("principal", principal)
                .field("ticket", &"***REDACTED***")
                .finish(),
        }
    }
}

/// The principal on whose behalf a connection is made, with the credentials it holds.
#[derive(Debug, Clone)]
pub struct Identity {
    name: String,
    credentials: Vec<Credential>,
}

impl Identity {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            credentials: Vec::new(),
        }
    }

    pub fn anonymous() -> Self {
        Self::new("anonymous").with_credential(Credential::Anonymous)
    }

    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credentials.push(credential);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn credentials(&self) -> &[Credential] {
        &self.credentials
    }

    pub fn credential_kinds(&self) -> BTreeSet<CredentialKind> {
        self.credentials.iter().map(Credential::kind).collect()
    }

    /// First held credential of the given kind, in insertion order.
    pub fn credential(&self, kind: CredentialKind) -> Option<&Credential> {
        self.credentials.iter().find(|c| c.kind() == kind)
    }

    pub fn first_credential_kind(&self) -> Option<CredentialKind> {
        self.credentials.first().map(Credential::kind)
    }
}
