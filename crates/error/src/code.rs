use serde::{Deserialize, Serialize};
use std::fmt;

/// Numeric error codes following CONFLUX-XXXX format.
///
/// ## Code Ranges
/// - **1000-1999**: Connection errors
/// - **2000-2999**: Execution errors
/// - **3000-3999**: Configuration errors
/// - **4000-4999**: Credential errors
/// - **5000-5999**: Internal/System errors
///
/// Codes are stable across versions (semver contract).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
#[non_exhaustive]
pub enum ErrorCode {
    // === Connection Errors (1000-1999) ===
    /// CONFLUX-1001: Provisioning a physical connection failed
    ProvisioningFailed = 1001,
    /// CONFLUX-1002: Pool name was never registered
    UnknownPool = 1002,
    /// CONFLUX-1003: Releasing a statement or connection failed
    ResourceRelease = 1003,
    /// CONFLUX-1004: Operation on a physically closed connection
    ConnectionClosed = 1004,

    // === Execution Errors (2000-2999) ===
    /// CONFLUX-2001: Caller broke a usage contract (fail-fast)
    ContractViolation = 2001,
    /// CONFLUX-2002: A commit or rollback epilogue statement failed
    EpilogueFailed = 2002,
    /// CONFLUX-2003: Executing a statement failed
    StatementFailed = 2003,
    /// CONFLUX-2004: Node code compilation failed
    CompilationFailed = 2004,

    // === Configuration Errors (3000-3999) ===
    /// CONFLUX-3001: Invalid configuration file or value
    InvalidConfig = 3001,
    /// CONFLUX-3002: No credential provider matches the request
    NoMatchingProvider = 3002,
    /// CONFLUX-3003: Matched credential provider has no rules
    ProviderNotConfigured = 3003,
    /// CONFLUX-3004: Rule declarations are inconsistent
    InvalidRule = 3004,

    // === Credential Errors (4000-4999) ===
    /// CONFLUX-4001: A credential rule or token exchange failed
    CredentialExchangeFailed = 4001,
    /// CONFLUX-4002: Identity does not hold the required credential
    HeldCredentialMissing = 4002,
    /// CONFLUX-4003: Rule produced a credential of the wrong kind
    UnexpectedCredential = 4003,

    // === Internal Errors (5000-5999) ===
    /// CONFLUX-5001: Shared instance initialised twice
    AlreadyInitialized = 5001,
    /// CONFLUX-5002: Serialization/deserialization failed
    SerializationFailed = 5002,
    /// CONFLUX-5003: Unexpected internal state
    InternalPanic = 5003,

    /// CONFLUX-9999: Unknown/unclassified error
    Unknown = 9999,
}

impl ErrorCode {
    /// Get the numeric code value
    pub fn as_u16(&self) -> u16 {
        *self as u16
    }

    /// Get the formatted code string (e.g., "CONFLUX-2001")
    pub fn as_str(&self) -> String {
        format!("CONFLUX-{:04}", self.as_u16())
    }

    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self.as_u16() {
            1000..=1999 => ErrorCategory::Connection,
            2000..=2999 => ErrorCategory::Execution,
            3000..=3999 => ErrorCategory::Config,
            4000..=4999 => ErrorCategory::Credential,
            _ => ErrorCategory::Internal,
        }
    }

    /// The runtime layer never retries; recovery belongs to the caller.
    pub fn is_retryable(&self) -> bool {
        false
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<ErrorCode> for String {
    fn from(code: ErrorCode) -> String {
        code.as_str()
    }
}

impl TryFrom<String> for ErrorCode {
    type Error = String;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        let num: u16 = s
            .strip_prefix("CONFLUX-")
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| "Invalid format".to_string())?;
        Self::try_from(num).map_err(|_| "Unknown code".to_string())
    }
}

impl TryFrom<u16> for ErrorCode {
    type Error = String;

    fn try_from(n: u16) -> std::result::Result<Self, Self::Error> {
        match n {
            1001 => Ok(Self::ProvisioningFailed),
            1002 => Ok(Self::UnknownPool),
            1003 => Ok(Self::ResourceRelease),
            1004 => Ok(Self::ConnectionClosed),
            2001 => Ok(Self::ContractViolation),
            2002 => Ok(Self::EpilogueFailed),
            2003 => Ok(Self::StatementFailed),
            2004 => Ok(Self::CompilationFailed),
            3001 => Ok(Self::InvalidConfig),
            3002 => Ok(Self::NoMatchingProvider),
            3003 => Ok(Self::ProviderNotConfigured),
            3004 => Ok(Self::InvalidRule),
            4001 => Ok(Self::CredentialExchangeFailed),
            4002 => Ok(Self::HeldCredentialMissing),
            4003 => Ok(Self::UnexpectedCredential),
            5001 => Ok(Self::AlreadyInitialized),
            5002 => Ok(Self::SerializationFailed),
            5003 => Ok(Self::InternalPanic),
            9999 => Ok(Self::Unknown),
            _ => Err(format!("Unknown error code: {}", n)),
        }
    }
}

/// High-level error category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum ErrorCategory {
    Connection,
    Execution,
    Config,
    Credential,
    Internal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_formatting() {
        assert_eq!(ErrorCode::ProvisioningFailed.as_str(), "CONFLUX-1001");
        assert_eq!(ErrorCode::ContractViolation.as_str(), "CONFLUX-2001");
        assert_eq!(ErrorCode::Unknown.as_str(), "CONFLUX-9999");
    }

    #[test]
    fn test_error_code_parsing() {
        assert_eq!(
            ErrorCode::try_from("CONFLUX-3002".to_string()).unwrap(),
            ErrorCode::NoMatchingProvider
        );
        assert_eq!(
            ErrorCode::try_from("CONFLUX-9999".to_string()).unwrap(),
            ErrorCode::Unknown
        );
    }

    #[test]
    fn test_error_code_parsing_errors() {
        assert!(ErrorCode::try_from("INVALID".to_string()).is_err());
        assert!(ErrorCode::try_from("CONFLUX-0000".to_string()).is_err());
        assert!(ErrorCode::try_from("CONFLUX-ABC".to_string()).is_err());
    }

    #[test]
    fn test_error_categories() {
        assert_eq!(ErrorCode::UnknownPool.category(), ErrorCategory::Connection);
        assert_eq!(
            ErrorCode::EpilogueFailed.category(),
            ErrorCategory::Execution
        );
        assert_eq!(
            ErrorCode::ProviderNotConfigured.category(),
            ErrorCategory::Config
        );
        assert_eq!(
            ErrorCode::HeldCredentialMissing.category(),
            ErrorCategory::Credential
        );
        assert_eq!(
            ErrorCode::AlreadyInitialized.category(),
            ErrorCategory::Internal
        );
        assert_eq!(ErrorCode::Unknown.category(), ErrorCategory::Internal);
    }
}
