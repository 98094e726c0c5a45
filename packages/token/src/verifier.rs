//! Token verification
//!
//! Every path pins its algorithm before looking at keys: the header never
//! chooses the key type. Signatures are checked before claims are trusted,
//! and time checks run against an injected `now`.

use crate::{
    claims::ClaimSet,
    error::{TokenError, TokenResult},
    jwks::KeySetResolver,
    keys::SymmetricKey,
    token::{Algorithm, CompactToken},
};
use chrono::{DateTime, Utc};
use tracing::debug;

/// Claim pins applied to federated identity tokens after the signature checks out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FederatedPolicy {
    /// Required `iss`, if any.
    pub issuer: Option<String>,
    /// Required member of `aud`, if any.
    pub audience: Option<String>,
}

impl FederatedPolicy {
    /// Policy pinning nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `iss` to equal `issuer`.
    #[must_use]
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = Some(issuer.into());
        self
    }

    /// Require `aud` to contain `audience`.
    #[must_use]
    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }

    /// # Errors
    /// Returns `TokenError::InvalidClaims` on an issuer or audience mismatch.
    pub fn check(&self, claims: &ClaimSet) -> TokenResult<()> {
        if let Some(expected) = &self.issuer {
            if claims.iss.as_deref() != Some(expected.as_str()) {
                return Err(TokenError::invalid_claims("Issuer mismatch"));
            }
        }
        if let Some(expected) = &self.audience {
            let matches = claims
                .aud
                .as_ref()
                .is_some_and(|aud| aud.contains(expected));
            if !matches {
                return Err(TokenError::invalid_claims("Audience mismatch"));
            }
        }
        Ok(())
    }
}

/// Verify an HS256 session token and return its claims.
///
/// # Errors
/// - `MalformedToken` if the token does not split into three segments or a
///   segment does not decode
/// - `UnsupportedAlgorithm` if the header is not HS256
/// - `SignatureInvalid` if the HMAC does not match
/// - `ClaimExpired`, `ClaimNotYetValid` or `InvalidClaims` from the time checks
pub fn verify_session_token(
    token: &str,
    secret: &SymmetricKey,
    now: DateTime<Utc>,
) -> TokenResult<ClaimSet> {
    let parsed = CompactToken::parse(token)?;
    parsed.header()?.pin(Algorithm::HS256)?;

    let signature = parsed.signature()?;
    secret.verify(parsed.signing_input().as_bytes(), &signature)?;

    let claims = parsed.claims()?;
    claims.validate_time(now.timestamp())?;
    Ok(claims)
}

/// Yes/no gate for login tokens: a valid session token carrying `appId == expected_app_id`.
///
/// The reason for a rejection is not exposed to the caller.
pub fn verify_login_token(
    token: &str,
    secret: &SymmetricKey,
    expected_app_id: &str,
    now: DateTime<Utc>,
) -> bool {
    match verify_session_token(token, secret, now) {
        Ok(claims) if claims.app_id.as_deref() == Some(expected_app_id) => true,
        Ok(_) => {
            debug!("Login token rejected");
            false
        }
        Err(_) => {
            debug!("Login token rejected");
            false
        }
    }
}

/// Verify an RS256 identity token issued by a federated provider.
///
/// The algorithm is pinned before the resolver is consulted, so a token
/// declaring anything but RS256 fails without a key fetch.
///
/// # Errors
/// - `MalformedToken` on structure or decoding failures
/// - `MissingKeyId` if the header has no `kid`
/// - `UnsupportedAlgorithm` if the header is not RS256
/// - `KeyNotFound`, `NetworkError`, `MalformedKeySet` from the resolver
/// - `InvalidKeyFormat` if the published key is unusable
/// - `SignatureInvalid` if the signature does not verify
/// - `ClaimExpired`, `ClaimNotYetValid`, `InvalidClaims` from claim checks
pub async fn verify_federated_identity_token(
    token: &str,
    resolver: &dyn KeySetResolver,
    policy: &FederatedPolicy,
    now: DateTime<Utc>,
) -> TokenResult<ClaimSet> {
    let parsed = CompactToken::parse(token)?;
    let header = parsed.header()?;
    let kid = header.kid.as_deref().ok_or(TokenError::MissingKeyId)?;
    header.pin(Algorithm::RS256)?;

    let entry = resolver.resolve(kid).await?;
    let key = entry.rsa_public_key()?;

    let signature = parsed.signature()?;
    key.verify(parsed.signing_input().as_bytes(), &signature)?;

    let claims = parsed.claims()?;
    claims.validate_time(now.timestamp())?;
    policy.check(&claims)?;

    debug!(kid, "Verified federated identity token");
    Ok(claims)
}
