//! Typed claim set and a compile-time checked builder.

use crate::error::{TokenError, TokenResult};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{collections::BTreeMap, marker::PhantomData};

/// Typestate markers for builder pattern.
pub mod ts {
    /// Marker for a field that has been set.
    pub struct Set;
    /// Marker for a field that has not been set.
    pub struct Unset;
}

/// Claim names carried by typed [`ClaimSet`] fields; custom claims may not use them.
pub const RESERVED_CLAIMS: [&str; 9] = [
    "iss", "sub", "aud", "iat", "exp", "nbf", "jti", "appId", "email",
];

/// `aud` claim: a single recipient or a list of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    /// One audience string.
    Single(String),
    /// Several audience strings.
    Many(Vec<String>),
}

impl Audience {
    /// Whether `audience` is one of the recipients.
    pub fn contains(&self, audience: &str) -> bool {
        match self {
            Audience::Single(aud) => aud == audience,
            Audience::Many(auds) => auds.iter().any(|aud| aud == audience),
        }
    }
}

impl From<&str> for Audience {
    fn from(aud: &str) -> Self {
        Audience::Single(aud.to_string())
    }
}

impl From<String> for Audience {
    fn from(aud: String) -> Self {
        Audience::Single(aud)
    }
}

impl From<Vec<String>> for Audience {
    fn from(auds: Vec<String>) -> Self {
        Audience::Many(auds)
    }
}

/// Token payload.
///
/// `iat` and `exp` are mandatory; a payload missing either does not parse.
/// Fields this type does not name are kept in `extra` so a verified claim set
/// re-serializes to the same document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimSet {
    /// Issuer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    /// Subject.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    /// Audience.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aud: Option<Audience>,
    /// Issued-at (unix seconds).
    pub iat: i64,
    /// Expiry (unix seconds).
    pub exp: i64,
    /// Not before (unix seconds).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
    /// Token ID.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
    /// Application the token was issued for.
    #[serde(rename = "appId", skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
    /// E-mail address asserted by the issuer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Everything else.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ClaimSet {
    /// Start building a claim set.
    pub fn builder() -> ClaimsBuilder {
        ClaimsBuilder::new()
    }

    /// Parse a decoded payload segment.
    ///
    /// # Errors
    /// Returns `TokenError::MalformedToken` if the payload is not a JSON object
    /// with integer `iat` and `exp`.
    pub fn from_json(payload: &[u8]) -> TokenResult<Self> {
        serde_json::from_slice(payload)
            .map_err(|e| TokenError::malformed_token(format!("Invalid claims payload: {e}")))
    }

    /// Serialize to the JSON payload segment.
    ///
    /// # Errors
    /// Returns `TokenError::Serialization` if a custom claim cannot be encoded.
    pub fn to_json(&self) -> TokenResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| TokenError::serialization(e.to_string()))
    }

    /// Check the time-bound claims against `now` (unix seconds).
    ///
    /// Expiry is checked first: a claim set past its `exp` is always
    /// `ClaimExpired`, whatever else is wrong with it.
    ///
    /// # Errors
    /// - `ClaimExpired` if `now` has reached `exp`
    /// - `InvalidClaims` if `exp` is not strictly after `iat`
    /// - `ClaimNotYetValid` if `nbf` is still in the future
    pub fn validate_time(&self, now: i64) -> TokenResult<()> {
        if now >= self.exp {
            return Err(TokenError::ClaimExpired);
        }
        if self.exp <= self.iat {
            return Err(TokenError::invalid_claims(
                "Expiry must be after issued-at",
            ));
        }
        match self.nbf {
            Some(nbf) if now < nbf => Err(TokenError::ClaimNotYetValid),
            _ => Ok(()),
        }
    }

    /// Whether the claim set is expired at `now` (unix seconds).
    pub fn is_expired_at(&self, now: i64) -> bool {
        now >= self.exp
    }
}

/// Compile-time checked builder for a [`ClaimSet`].
///
/// `issued_at` must come before the expiry setters so the lifetime can be
/// expressed relative to it.
pub struct ClaimsBuilder<Iat = ts::Unset, Exp = ts::Unset> {
    iss: Option<String>,
    sub: Option<String>,
    aud: Option<Audience>,
    iat: Option<i64>,
    exp: Option<i64>,
    nbf: Option<i64>,
    jti: Option<String>,
    app_id: Option<String>,
    email: Option<String>,
    extra: BTreeMap<String, Value>,
    _phantom: PhantomData<(Iat, Exp)>,
}

impl ClaimsBuilder {
    /// Create a new claims builder.
    pub fn new() -> Self {
        Self {
            iss: None,
            sub: None,
            aud: None,
            iat: None,
            exp: None,
            nbf: None,
            jti: None,
            app_id: None,
            email: None,
            extra: BTreeMap::new(),
            _phantom: PhantomData,
        }
    }
}

impl Default for ClaimsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl<Iat, Exp> ClaimsBuilder<Iat, Exp> {
    fn retype<I, E>(self) -> ClaimsBuilder<I, E> {
        ClaimsBuilder {
            iss: self.iss,
            sub: self.sub,
            aud: self.aud,
            iat: self.iat,
            exp: self.exp,
            nbf: self.nbf,
            jti: self.jti,
            app_id: self.app_id,
            email: self.email,
            extra: self.extra,
            _phantom: PhantomData,
        }
    }

    /// Set the issuer (iss) claim.
    pub fn issuer(mut self, iss: impl Into<String>) -> Self {
        self.iss = Some(iss.into());
        self
    }

    /// Set the subject (sub) claim.
    pub fn subject(mut self, sub: impl Into<String>) -> Self {
        self.sub = Some(sub.into());
        self
    }

    /// Set the audience (aud) claim.
    pub fn audience(mut self, aud: impl Into<Audience>) -> Self {
        self.aud = Some(aud.into());
        self
    }

    /// Set the not-before (nbf) claim.
    pub fn not_before(mut self, nbf: DateTime<Utc>) -> Self {
        self.nbf = Some(nbf.timestamp());
        self
    }

    /// Set the token ID (jti) claim.
    pub fn token_id(mut self, jti: impl Into<String>) -> Self {
        self.jti = Some(jti.into());
        self
    }

    /// Set the application identifier (appId) claim.
    pub fn app_id(mut self, app_id: impl Into<String>) -> Self {
        self.app_id = Some(app_id.into());
        self
    }

    /// Set the e-mail claim.
    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Add a custom claim. Names in [`RESERVED_CLAIMS`] are refused at build time.
    pub fn claim(mut self, k: impl Into<String>, v: Value) -> Self {
        self.extra.insert(k.into(), v);
        self
    }
}

impl<Exp> ClaimsBuilder<ts::Unset, Exp> {
    /// Set the issued-at time.
    pub fn issued_at(mut self, iat: DateTime<Utc>) -> ClaimsBuilder<ts::Set, Exp> {
        self.iat = Some(iat.timestamp());
        self.retype()
    }
}

impl ClaimsBuilder<ts::Set, ts::Unset> {
    /// Set the expiry to `ttl` after the issued-at time.
    pub fn valid_for(mut self, ttl: Duration) -> ClaimsBuilder<ts::Set, ts::Set> {
        self.exp = self.iat.map(|iat| iat.saturating_add(ttl.num_seconds()));
        self.retype()
    }

    /// Set an absolute expiry.
    pub fn expires_at(mut self, exp: DateTime<Utc>) -> ClaimsBuilder<ts::Set, ts::Set> {
        self.exp = Some(exp.timestamp());
        self.retype()
    }
}

impl ClaimsBuilder<ts::Set, ts::Set> {
    /// Build the claims.
    ///
    /// # Errors
    /// Returns `TokenError::InvalidClaims` if the expiry is not strictly after
    /// the issued-at time, or if a custom claim reuses a name in
    /// [`RESERVED_CLAIMS`].
    pub fn build(self) -> TokenResult<ClaimSet> {
        let (Some(iat), Some(exp)) = (self.iat, self.exp) else {
            return Err(TokenError::invalid_claims(
                "Issued-at and expiry must both be set",
            ));
        };
        if let Some(name) = self
            .extra
            .keys()
            .find(|name| RESERVED_CLAIMS.contains(&name.as_str()))
        {
            return Err(TokenError::invalid_claims(format!(
                "Custom claim '{name}' collides with a typed claim"
            )));
        }
        if exp <= iat {
            return Err(TokenError::invalid_claims(
                "Expiry must be after issued-at",
            ));
        }
        Ok(ClaimSet {
            iss: self.iss,
            sub: self.sub,
            aud: self.aud,
            iat,
            exp,
            nbf: self.nbf,
            jti: self.jti,
            app_id: self.app_id,
            email: self.email,
            extra: self.extra,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[test]
    fn builder_sets_window_relative_to_issued_at() {
        let claims = ClaimSet::builder()
            .issuer("svc")
            .subject("u1")
            .audience("app")
            .issued_at(at(1_000))
            .valid_for(Duration::hours(1))
            .build()
            .unwrap();

        assert_eq!(claims.iat, 1_000);
        assert_eq!(claims.exp, 4_600);
        assert_eq!(claims.aud, Some(Audience::Single("app".into())));
    }

    #[test]
    fn builder_rejects_non_positive_lifetime() {
        let result = ClaimSet::builder()
            .issued_at(at(1_000))
            .expires_at(at(1_000))
            .build();
        assert!(matches!(result, Err(TokenError::InvalidClaims(_))));
    }

    #[test]
    fn unknown_claims_survive_a_round_trip() {
        let json = br#"{"iat":1,"exp":2,"appId":"a","email_verified":"true","nonce":"n"}"#;
        let claims = ClaimSet::from_json(json).unwrap();
        assert_eq!(claims.app_id.as_deref(), Some("a"));
        assert_eq!(claims.extra.get("nonce"), Some(&Value::from("n")));

        let again = ClaimSet::from_json(&claims.to_json().unwrap()).unwrap();
        assert_eq!(again, claims);
    }

    #[test]
    fn missing_expiry_does_not_parse() {
        let result = ClaimSet::from_json(br#"{"iat":1,"sub":"u1"}"#);
        assert!(matches!(result, Err(TokenError::MalformedToken(_))));
    }

    #[test]
    fn time_checks() {
        let claims = ClaimSet::from_json(br#"{"iat":100,"exp":200,"nbf":150}"#).unwrap();
        assert_eq!(claims.validate_time(120), Err(TokenError::ClaimNotYetValid));
        assert_eq!(claims.validate_time(160), Ok(()));
        assert_eq!(claims.validate_time(200), Err(TokenError::ClaimExpired));

        let inverted = ClaimSet::from_json(br#"{"iat":200,"exp":100}"#).unwrap();
        assert!(matches!(
            inverted.validate_time(50),
            Err(TokenError::InvalidClaims(_))
        ));
    }

    #[test]
    fn expiry_wins_over_an_inverted_window() {
        let inverted = ClaimSet::from_json(br#"{"iat":200,"exp":100}"#).unwrap();
        assert_eq!(inverted.validate_time(150), Err(TokenError::ClaimExpired));
        assert_eq!(inverted.validate_time(100), Err(TokenError::ClaimExpired));
    }

    #[test]
    fn custom_claims_cannot_shadow_typed_claims() {
        for name in RESERVED_CLAIMS {
            let result = ClaimSet::builder()
                .subject("u1")
                .claim(name, Value::from("x"))
                .issued_at(at(1_000))
                .valid_for(Duration::hours(1))
                .build();
            assert!(
                matches!(result, Err(TokenError::InvalidClaims(_))),
                "{name} accepted"
            );
        }

        let claims = ClaimSet::builder()
            .claim("nonce", Value::from("n"))
            .issued_at(at(1_000))
            .valid_for(Duration::hours(1))
            .build()
            .unwrap();
        assert_eq!(ClaimSet::from_json(&claims.to_json().unwrap()).unwrap(), claims);
    }

    #[test]
    fn audience_accepts_string_or_array() {
        let many = ClaimSet::from_json(br#"{"iat":1,"exp":2,"aud":["a","b"]}"#).unwrap();
        assert!(many.aud.as_ref().is_some_and(|aud| aud.contains("b")));
        assert!(!many.aud.as_ref().is_some_and(|aud| aud.contains("c")));
    }
}
