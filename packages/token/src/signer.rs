//! Token issuance
//!
//! Two families are produced here:
//! - session tokens (HS256) for access and refresh, differing only in lifetime
//! - client credentials (ES256) presented to a federated identity provider
//!   as the `client_secret` of its token-exchange endpoint
//!
//! Nothing reads the wall clock; `now` is always passed in.

use crate::{
    claims::ClaimSet,
    error::TokenResult,
    keys::{EcPrivateKey, KeyMaterial, SymmetricKey},
    token::{self, Algorithm, Header},
};
use chrono::{DateTime, Duration, Utc};
use tracing::debug;

/// Fixed lifetime of a client credential, in seconds.
pub const CLIENT_CREDENTIAL_TTL_SECS: i64 = 24 * 60 * 60;

/// Sign `claims` with any key that can sign, using the key's algorithm.
///
/// # Errors
/// Returns `TokenError::InvalidKeyFormat` for public-only key material and
/// `TokenError::Serialization` if the claims cannot be encoded.
pub fn sign_token(claims: &ClaimSet, key: &KeyMaterial, kid: Option<&str>) -> TokenResult<String> {
    let mut header = Header::new(key.algorithm());
    if let Some(kid) = kid {
        header = header.with_key_id(kid);
    }
    token::encode(&header, claims, |input| key.sign(input))
}

/// Sign a session token (access or refresh) with HS256.
///
/// # Errors
/// Returns `TokenError::Serialization` if the claims cannot be encoded.
pub fn sign_session_token(claims: &ClaimSet, secret: &SymmetricKey) -> TokenResult<String> {
    let header = Header::new(Algorithm::HS256);
    token::encode(&header, claims, |input| secret.sign(input))
}

/// Claims shared by both tokens of a session pair.
#[derive(Debug, Clone, Default)]
pub struct SessionTokenSpec {
    /// Access token lifetime.
    pub access_ttl: Duration,
    /// Refresh token lifetime.
    pub refresh_ttl: Duration,
    /// Optional issuer.
    pub issuer: Option<String>,
    /// Optional subject (the user).
    pub subject: Option<String>,
    /// Optional audience.
    pub audience: Option<String>,
    /// Optional application identifier, checked by login-token verification.
    pub app_id: Option<String>,
}

impl SessionTokenSpec {
    /// Spec with the given lifetimes and no identity claims.
    pub fn new(access_ttl: Duration, refresh_ttl: Duration) -> Self {
        Self {
            access_ttl,
            refresh_ttl,
            ..Self::default()
        }
    }

    fn claims(&self, now: DateTime<Utc>, ttl: Duration) -> TokenResult<ClaimSet> {
        let mut builder = ClaimSet::builder().not_before(now);
        if let Some(iss) = &self.issuer {
            builder = builder.issuer(iss.clone());
        }
        if let Some(sub) = &self.subject {
            builder = builder.subject(sub.clone());
        }
        if let Some(aud) = &self.audience {
            builder = builder.audience(aud.as_str());
        }
        if let Some(app_id) = &self.app_id {
            builder = builder.app_id(app_id.clone());
        }
        builder.issued_at(now).valid_for(ttl).build()
    }
}

/// An access/refresh token pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTokens {
    /// Short-lived access token.
    pub access: String,
    /// Long-lived refresh token.
    pub refresh: String,
}

/// Issue an access and a refresh token, both valid from `now`.
///
/// # Errors
/// Returns `TokenError::InvalidClaims` if either lifetime is not positive.
pub fn issue_session_tokens(
    secret: &SymmetricKey,
    spec: &SessionTokenSpec,
    now: DateTime<Utc>,
) -> TokenResult<SessionTokens> {
    let access = sign_session_token(&spec.claims(now, spec.access_ttl)?, secret)?;
    let refresh = sign_session_token(&spec.claims(now, spec.refresh_ttl)?, secret)?;
    debug!(
        access_ttl_secs = spec.access_ttl.num_seconds(),
        refresh_ttl_secs = spec.refresh_ttl.num_seconds(),
        "Issued session token pair"
    );
    Ok(SessionTokens { access, refresh })
}

/// Identity of the application presenting a client credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientCredential {
    /// `iss`: the developer team identifier.
    pub issuer: String,
    /// `sub`: the application consuming the credential (client id).
    pub subject: String,
    /// `aud`: the identity provider.
    pub audience: String,
    /// `kid` header: identifier of the private key.
    pub key_id: String,
}

/// Sign a client credential with ES256, valid for 24 hours from `now`.
///
/// # Errors
/// Returns `TokenError::Serialization` if the claims cannot be encoded.
pub fn sign_client_credential(
    credential: &ClientCredential,
    key: &EcPrivateKey,
    now: DateTime<Utc>,
) -> TokenResult<String> {
    let claims = ClaimSet::builder()
        .issuer(credential.issuer.clone())
        .subject(credential.subject.clone())
        .audience(credential.audience.as_str())
        .issued_at(now)
        .valid_for(Duration::seconds(CLIENT_CREDENTIAL_TTL_SECS))
        .build()?;
    let header = Header::new(Algorithm::ES256).with_key_id(credential.key_id.clone());

    debug!(kid = %credential.key_id, sub = %credential.subject, "Signing client credential");
    token::encode(&header, &claims, |input| Ok(key.sign(input)))
}
