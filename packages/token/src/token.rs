//! Compact token serialization: `header.payload.signature`

use crate::{
    claims::ClaimSet,
    codec::{base64url_decode, base64url_encode},
    error::{TokenError, TokenResult},
};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Signing algorithms the engine produces or accepts.
///
/// Each token family is pinned to exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    /// HMAC-SHA256, session tokens
    HS256,
    /// ECDSA P-256 with SHA-256, client credentials
    ES256,
    /// RSASSA-PKCS1-v1_5 with SHA-256, federated identity tokens
    RS256,
}

impl Algorithm {
    /// Header `alg` value.
    pub const fn as_str(self) -> &'static str {
        match self {
            Algorithm::HS256 => "HS256",
            Algorithm::ES256 => "ES256",
            Algorithm::RS256 => "RS256",
        }
    }
}

impl FromStr for Algorithm {
    type Err = TokenError;

    fn from_str(alg: &str) -> Result<Self, Self::Err> {
        match alg {
            "HS256" => Ok(Algorithm::HS256),
            "ES256" => Ok(Algorithm::ES256),
            "RS256" => Ok(Algorithm::RS256),
            other => Err(TokenError::unsupported_algorithm(other)),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// JOSE header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Algorithm as declared on the wire. Not trusted until pinned.
    pub alg: String,
    /// Token type.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub typ: Option<String>,
    /// Key ID hint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
}

impl Header {
    /// Header for a token signed with `alg`.
    pub fn new(alg: Algorithm) -> Self {
        Self {
            alg: alg.as_str().to_string(),
            typ: Some("JWT".to_string()),
            kid: None,
        }
    }

    /// Attach a key ID.
    #[must_use]
    pub fn with_key_id(mut self, kid: impl Into<String>) -> Self {
        self.kid = Some(kid.into());
        self
    }

    /// Require the declared algorithm to be exactly `expected`.
    ///
    /// # Errors
    /// Returns `TokenError::UnsupportedAlgorithm` for any other value,
    /// including `none` and algorithms of a different family.
    pub fn pin(&self, expected: Algorithm) -> TokenResult<()> {
        if self.alg == expected.as_str() {
            Ok(())
        } else {
            Err(TokenError::unsupported_algorithm(self.alg.clone()))
        }
    }
}

/// A compact token split into its three segments, borrowing the input.
#[derive(Debug, Clone, Copy)]
pub struct CompactToken<'a> {
    raw: &'a str,
    header: &'a str,
    payload: &'a str,
    signature: &'a str,
}

impl<'a> CompactToken<'a> {
    /// Split `token` into segments.
    ///
    /// # Errors
    /// Returns `TokenError::MalformedToken` unless there are exactly three
    /// non-empty segments.
    pub fn parse(token: &'a str) -> TokenResult<Self> {
        let mut parts = token.split('.');
        let (Some(header), Some(payload), Some(signature), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(TokenError::malformed_token(format!(
                "Expected 3 segments, got {}",
                token.split('.').count()
            )));
        };
        if header.is_empty() || payload.is_empty() || signature.is_empty() {
            return Err(TokenError::malformed_token("Empty token segment"));
        }
        Ok(Self {
            raw: token,
            header,
            payload,
            signature,
        })
    }

    /// `header "." payload`, the bytes the signature covers.
    pub fn signing_input(&self) -> &'a str {
        &self.raw[..self.header.len() + 1 + self.payload.len()]
    }

    /// Decode and parse the header segment.
    ///
    /// # Errors
    /// Returns `TokenError::MalformedToken` on bad base64url or JSON.
    pub fn header(&self) -> TokenResult<Header> {
        let bytes = decode_segment(self.header, "header")?;
        serde_json::from_slice(&bytes)
            .map_err(|e| TokenError::malformed_token(format!("Invalid header JSON: {e}")))
    }

    /// Decode and parse the payload segment.
    ///
    /// # Errors
    /// Returns `TokenError::MalformedToken` on bad base64url or claims.
    pub fn claims(&self) -> TokenResult<ClaimSet> {
        let bytes = decode_segment(self.payload, "payload")?;
        ClaimSet::from_json(&bytes)
    }

    /// Decode the signature segment.
    ///
    /// # Errors
    /// Returns `TokenError::MalformedToken` on bad base64url.
    pub fn signature(&self) -> TokenResult<Vec<u8>> {
        decode_segment(self.signature, "signature")
    }
}

fn decode_segment(segment: &str, name: &str) -> TokenResult<Vec<u8>> {
    base64url_decode(segment)
        .map_err(|e| TokenError::malformed_token(format!("Invalid {name} encoding: {e}")))
}

/// Serialize header and claims, sign the signing input and join the segments.
pub(crate) fn encode<F>(header: &Header, claims: &ClaimSet, sign: F) -> TokenResult<String>
where
    F: FnOnce(&[u8]) -> TokenResult<Vec<u8>>,
{
    let header_json =
        serde_json::to_vec(header).map_err(|e| TokenError::serialization(e.to_string()))?;
    let header_b64 = base64url_encode(&header_json);
    let claims_b64 = base64url_encode(claims.to_json()?);

    let mut token = String::with_capacity(header_b64.len() + claims_b64.len() + 90);
    token.push_str(&header_b64);
    token.push('.');
    token.push_str(&claims_b64);

    let signature = sign(token.as_bytes())?;
    token.push('.');
    token.push_str(&base64url_encode(signature));
    Ok(token)
}
