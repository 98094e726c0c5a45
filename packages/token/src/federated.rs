//! Federated login: authorization code in, verified identity out
//!
//! 1. sign a fresh client credential (ES256)
//! 2. POST the token-exchange form through the injected [`TokenExchange`]
//! 3. verify the returned `id_token` against the provider's key set
//!
//! [`FederatedLogin::authenticate`] propagates typed errors;
//! [`FederatedLogin::login`] is the boundary that only says "who", or nothing.

use crate::{
    claims::ClaimSet,
    config::FederatedConfig,
    error::{TokenError, TokenResult},
    jwks::KeySetResolver,
    keys::EcPrivateKey,
    signer::{ClientCredential, sign_client_credential},
    verifier::{FederatedPolicy, verify_federated_identity_token},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::{fmt, sync::Arc};
use tracing::{debug, info, warn};

/// HTTP POST collaborator for the token-exchange endpoint.
#[async_trait]
pub trait TokenExchange: Send + Sync {
    /// POST `form` as `application/x-www-form-urlencoded` to `url`, returning the body.
    ///
    /// # Errors
    /// Returns `TokenError::NetworkError` on transport failure or a non-success status.
    async fn exchange(&self, url: &str, form: &[(&'static str, String)]) -> TokenResult<Vec<u8>>;
}

#[async_trait]
impl<T: TokenExchange + ?Sized> TokenExchange for Arc<T> {
    async fn exchange(&self, url: &str, form: &[(&'static str, String)]) -> TokenResult<Vec<u8>> {
        (**self).exchange(url, form).await
    }
}

/// Token-exchange form body for an authorization code.
pub fn token_exchange_form(
    config: &FederatedConfig,
    code: &str,
    client_secret: &str,
) -> Vec<(&'static str, String)> {
    exchange_form(&config.client_id, &config.redirect_uri, code, client_secret)
}

fn exchange_form(
    client_id: &str,
    redirect_uri: &str,
    code: &str,
    client_secret: &str,
) -> Vec<(&'static str, String)> {
    vec![
        ("client_id", client_id.to_string()),
        ("client_secret", client_secret.to_string()),
        ("code", code.to_string()),
        ("grant_type", "authorization_code".to_string()),
        ("redirect_uri", redirect_uri.to_string()),
    ]
}

/// Token-exchange endpoint response.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct TokenExchangeResponse {
    /// Provider access token.
    #[serde(default)]
    pub access_token: String,
    /// Access token lifetime in seconds.
    #[serde(default)]
    pub expires_in: i64,
    /// Provider refresh token.
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Signed identity token.
    pub id_token: String,
    /// Usually `Bearer`.
    #[serde(default)]
    pub token_type: String,
}

impl TokenExchangeResponse {
    /// # Errors
    /// Returns `TokenError::Serialization` if the body is not JSON with an `id_token`.
    pub fn parse(body: &[u8]) -> TokenResult<Self> {
        serde_json::from_slice(body)
            .map_err(|e| TokenError::serialization(format!("Invalid token response: {e}")))
    }
}

impl fmt::Debug for TokenExchangeResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenExchangeResponse")
            .field("access_token", &"[REDACTED]")
            .field("expires_in", &self.expires_in)
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("id_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .finish()
    }
}

/// A verified federated identity.
#[derive(Debug, Clone, PartialEq)]
pub struct FederatedIdentity {
    /// Verified identity token claims.
    pub claims: ClaimSet,
    /// The raw exchange response.
    pub tokens: TokenExchangeResponse,
}

impl FederatedIdentity {
    /// Provider user identifier.
    pub fn subject(&self) -> Option<&str> {
        self.claims.sub.as_deref()
    }

    /// Verified e-mail address.
    pub fn email(&self) -> Option<&str> {
        self.claims.email.as_deref()
    }
}

/// Authorization-code login against one federated identity provider.
pub struct FederatedLogin {
    signing_key: EcPrivateKey,
    credential: ClientCredential,
    redirect_uri: String,
    token_url: String,
    policy: FederatedPolicy,
    exchange: Arc<dyn TokenExchange>,
    resolver: Arc<dyn KeySetResolver>,
}

impl FederatedLogin {
    /// Login flow presenting `credential` signed with `signing_key`.
    ///
    /// The token URL defaults to [`crate::config::DEFAULT_TOKEN_URL`] and the
    /// policy pins nothing.
    pub fn new(
        signing_key: EcPrivateKey,
        credential: ClientCredential,
        exchange: Arc<dyn TokenExchange>,
        resolver: Arc<dyn KeySetResolver>,
    ) -> Self {
        Self {
            signing_key,
            credential,
            redirect_uri: String::new(),
            token_url: crate::config::DEFAULT_TOKEN_URL.to_string(),
            policy: FederatedPolicy::default(),
            exchange,
            resolver,
        }
    }

    /// Build from configuration.
    ///
    /// # Errors
    /// Returns `TokenError::Config` for an invalid section or
    /// `TokenError::InvalidKeyFormat` if the private key does not parse.
    pub fn from_config(
        config: &FederatedConfig,
        exchange: Arc<dyn TokenExchange>,
        resolver: Arc<dyn KeySetResolver>,
    ) -> TokenResult<Self> {
        config.validate()?;
        Ok(Self::new(
            config.signing_key()?,
            config.client_credential(),
            exchange,
            resolver,
        )
        .with_redirect_uri(config.redirect_uri.clone())
        .with_token_url(config.token_url.clone())
        .with_policy(config.identity_policy()))
    }

    /// Set the redirect URI sent with the exchange.
    #[must_use]
    pub fn with_redirect_uri(mut self, redirect_uri: impl Into<String>) -> Self {
        self.redirect_uri = redirect_uri.into();
        self
    }

    /// Set the token-exchange endpoint.
    #[must_use]
    pub fn with_token_url(mut self, token_url: impl Into<String>) -> Self {
        self.token_url = token_url.into();
        self
    }

    /// Set the claim pins applied to identity tokens.
    #[must_use]
    pub fn with_policy(mut self, policy: FederatedPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sign a client credential valid from `now`.
    ///
    /// # Errors
    /// Returns `TokenError::Serialization` if the claims cannot be encoded.
    pub fn client_secret(&self, now: DateTime<Utc>) -> TokenResult<String> {
        sign_client_credential(&self.credential, &self.signing_key, now)
    }

    /// Exchange `code` and verify the returned identity token.
    ///
    /// # Errors
    /// Any error of the exchange, response parsing, or
    /// [`verify_federated_identity_token`].
    pub async fn authenticate(
        &self,
        code: &str,
        now: DateTime<Utc>,
    ) -> TokenResult<FederatedIdentity> {
        let client_secret = self.client_secret(now)?;
        let client_id = &self.credential.subject;
        let form = exchange_form(client_id, &self.redirect_uri, code, &client_secret);

        debug!(url = %self.token_url, client_id = %client_id, "Exchanging authorization code");
        let body = self.exchange.exchange(&self.token_url, &form).await?;
        let tokens = TokenExchangeResponse::parse(&body)?;

        let resolver = self.resolver.as_ref();
        let claims =
            verify_federated_identity_token(&tokens.id_token, resolver, &self.policy, now).await?;
        info!(sub = claims.sub.as_deref().unwrap_or_default(), "Federated login verified");
        Ok(FederatedIdentity { claims, tokens })
    }

    /// E-mail of the verified identity, or `None` on any failure.
    pub async fn login(&self, code: &str, now: DateTime<Utc>) -> Option<String> {
        match self.authenticate(code, now).await {
            Ok(identity) => identity.claims.email,
            Err(e) => {
                warn!(error = %e, "Federated login failed");
                None
            }
        }
    }
}

impl fmt::Debug for FederatedLogin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FederatedLogin")
            .field("credential", &self.credential)
            .field("redirect_uri", &self.redirect_uri)
            .field("token_url", &self.token_url)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn form_carries_the_five_fields() {
        let form = exchange_form("com.example.app", "https://example.com/cb", "c0de", "secret");
        let names: Vec<&str> = form.iter().map(|(name, _)| *name).collect();
        assert_eq!(
            names,
            ["client_id", "client_secret", "code", "grant_type", "redirect_uri"]
        );
        assert!(form.contains(&("grant_type", "authorization_code".to_string())));
        assert!(form.contains(&("code", "c0de".to_string())));
    }

    #[test]
    fn response_requires_id_token() {
        let ok = TokenExchangeResponse::parse(
            br#"{"access_token":"a","expires_in":3600,"id_token":"x.y.z","token_type":"Bearer"}"#,
        )
        .unwrap();
        assert_eq!(ok.id_token, "x.y.z");
        assert!(ok.refresh_token.is_none());
        assert!(!format!("{ok:?}").contains("x.y.z"));

        assert!(matches!(
            TokenExchangeResponse::parse(br#"{"error":"invalid_grant"}"#),
            Err(TokenError::Serialization(_))
        ));
    }
}
