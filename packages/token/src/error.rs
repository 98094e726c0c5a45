//! Error types for token issuance and verification

use thiserror::Error;

/// Token operation result type
pub type TokenResult<T> = Result<T, TokenError>;

/// Token engine errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    /// Structurally invalid compact token (segment count, header or payload shape)
    #[error("Malformed token: {0}")]
    MalformedToken(String),

    /// Base64url decoding failed
    #[error("Malformed encoding: {0}")]
    MalformedEncoding(String),

    /// Key bytes could not be parsed, or the key is of the wrong type
    #[error("Invalid key format: {0}")]
    InvalidKeyFormat(String),

    /// Signature did not verify
    #[error("Invalid token signature")]
    SignatureInvalid,

    /// Header declares an algorithm this verification path does not accept
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Asymmetric token header carries no `kid`
    #[error("Token header is missing the 'kid' field")]
    MissingKeyId,

    /// No published key matches the token's `kid`
    #[error("No key found for kid '{0}'")]
    KeyNotFound(String),

    /// `exp` is at or before the current time
    #[error("Token has expired")]
    ClaimExpired,

    /// `nbf` is after the current time
    #[error("Token is not yet valid")]
    ClaimNotYetValid,

    /// Claims are well-formed but violate an invariant or policy
    #[error("Invalid claims: {0}")]
    InvalidClaims(String),

    /// Collaborator transport failed
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Key set document could not be parsed
    #[error("Malformed key set: {0}")]
    MalformedKeySet(String),

    /// Header or claims could not be serialized
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration is missing or inconsistent
    #[error("Configuration error: {0}")]
    Config(String),
}

impl TokenError {
    /// Create a malformed token error
    #[inline]
    #[must_use]
    pub fn malformed_token(msg: impl Into<String>) -> Self {
        Self::MalformedToken(msg.into())
    }

    /// Create a malformed encoding error
    #[inline]
    #[must_use]
    pub fn malformed_encoding(msg: impl Into<String>) -> Self {
        Self::MalformedEncoding(msg.into())
    }

    /// Create an invalid key format error
    #[inline]
    #[must_use]
    pub fn invalid_key(msg: impl Into<String>) -> Self {
        Self::InvalidKeyFormat(msg.into())
    }

    /// Create an unsupported algorithm error
    #[inline]
    #[must_use]
    pub fn unsupported_algorithm(alg: impl Into<String>) -> Self {
        Self::UnsupportedAlgorithm(alg.into())
    }

    /// Create an invalid claims error
    #[inline]
    #[must_use]
    pub fn invalid_claims(msg: impl Into<String>) -> Self {
        Self::InvalidClaims(msg.into())
    }

    /// Create a network error
    #[inline]
    #[must_use]
    pub fn network(msg: impl Into<String>) -> Self {
        Self::NetworkError(msg.into())
    }

    /// Create a malformed key set error
    #[inline]
    #[must_use]
    pub fn malformed_key_set(msg: impl Into<String>) -> Self {
        Self::MalformedKeySet(msg.into())
    }

    /// Create a serialization error
    #[inline]
    #[must_use]
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create a configuration error
    #[inline]
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether the failure came from time-bound claim validation
    #[must_use]
    pub fn is_time_bound(&self) -> bool {
        matches!(self, Self::ClaimExpired | Self::ClaimNotYetValid)
    }
}
