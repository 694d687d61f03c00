//! Error types for the certificate coordinator
//!
//! Every error carries a stable machine code and an HTTP-style status
//! suggestion so the hosting server can render a structured response
//! without matching on variants.

use std::collections::HashMap;

use thiserror::Error;

/// Errors that can occur during certificate coordination
#[derive(Debug, Error)]
pub enum CertsError {
    /// Domain failed the syntactic check
    #[error("invalid domain '{domain}': {reason}")]
    InvalidDomain { domain: String, reason: String },

    /// CAA policy forbids the configured issuer
    #[error("CAA records for '{suffix}' do not authorize issuance for '{domain}'")]
    CaaMismatch { domain: String, suffix: String },

    /// Challenge registered for a domain the settings store does not know
    #[error("domain '{domain}' is not configured")]
    UnknownDomain { domain: String },

    /// Dispatcher argument failure, with a per-field detail map
    #[error("input validation failed")]
    InputValidation { details: HashMap<String, String> },

    /// No challenge response stored for (domain, token)
    #[error("no pending challenge for '{domain}'")]
    ChallengeNotFound { domain: String },

    /// Challenge lookup failed at the transport layer; carries the code of
    /// the underlying error
    #[error("challenge lookup failed: {message}")]
    ChallengeFail { code: String, message: String },

    /// Account provisioning failed; callers degrade instead of crashing
    #[error("ACME account unavailable: {0}")]
    AccountUnavailable(String),

    /// KV transport or command error
    #[error("kv error: {0}")]
    Kv(String),

    /// Binary encode/decode failure
    #[error("codec error: {0}")]
    Codec(String),

    /// Error surfaced by the ACME backend
    #[error("ACME error: {0}")]
    Acme(String),

    /// RSA key generation failed
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    /// CSR construction failed
    #[error("CSR construction failed: {0}")]
    Csr(String),

    /// Returned certificate could not be parsed
    #[error("certificate parse error: {0}")]
    CertificateParse(String),

    /// Injected encrypt/decrypt transform failed
    #[error("key transform failed: {0}")]
    Cipher(String),
}

impl CertsError {
    /// Stable machine code for logs and API responses
    pub fn code(&self) -> &str {
        match self {
            Self::InvalidDomain { .. } => "invalid_domain",
            Self::CaaMismatch { .. } => "caa_mismatch",
            Self::UnknownDomain { .. } => "not_found",
            Self::InputValidation { .. } => "invalid_input",
            Self::ChallengeNotFound { .. } => "challenge_not_found",
            Self::ChallengeFail { code, .. } => code.as_str(),
            Self::AccountUnavailable(_) => "account_unavailable",
            Self::Kv(_) => "kv_error",
            Self::Codec(_) => "codec_error",
            Self::Acme(_) => "acme_error",
            Self::KeyGeneration(_) => "key_error",
            Self::Csr(_) => "csr_error",
            Self::CertificateParse(_) => "cert_parse_error",
            Self::Cipher(_) => "cipher_error",
        }
    }

    /// Suggested HTTP status for this error
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidDomain { .. } | Self::InputValidation { .. } => 400,
            Self::CaaMismatch { .. } => 403,
            Self::UnknownDomain { .. } | Self::ChallengeNotFound { .. } => 404,
            _ => 500,
        }
    }

    /// Structured `{error, code, details?}` body for the HTTP layer
    pub fn to_response_json(&self) -> serde_json::Value {
        let mut body = serde_json::json!({
            "error": self.to_string(),
            "code": self.code(),
        });
        if let Self::InputValidation { details } = self {
            body["details"] = serde_json::json!(details);
        }
        body
    }
}

impl From<redis::RedisError> for CertsError {
    fn from(e: redis::RedisError) -> Self {
        Self::Kv(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for CertsError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        Self::Codec(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for CertsError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        Self::Codec(e.to_string())
    }
}

/// Result type alias for coordinator operations
pub type CertsResult<T> = Result<T, CertsError>;
