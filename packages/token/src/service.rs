//! Configured entry point with the clock applied

use crate::{
    claims::ClaimSet,
    clock::{Clock, SystemClock},
    config::{FederatedConfig, TokenConfig},
    error::{TokenError, TokenResult},
    federated::{FederatedLogin, TokenExchange},
    http::HttpTransport,
    jwks::{CachedKeySetResolver, KeySetResolver, RemoteKeySetResolver},
    keys::{EcPrivateKey, SymmetricKey},
    signer::{self, SessionTokens},
    verifier,
};
use std::sync::Arc;
use tracing::info;

/// Token operations bound to one configuration and clock.
pub struct TokenService {
    config: TokenConfig,
    clock: Arc<dyn Clock>,
    secret: SymmetricKey,
    credential_key: Option<EcPrivateKey>,
}

impl TokenService {
    /// Service reading the system clock.
    ///
    /// # Errors
    /// Returns `TokenError::Config` for an invalid configuration or
    /// `TokenError::InvalidKeyFormat` if a configured key does not parse.
    pub fn new(config: TokenConfig) -> TokenResult<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Service reading `clock`.
    ///
    /// # Errors
    /// See [`TokenService::new`].
    pub fn with_clock(config: TokenConfig, clock: Arc<dyn Clock>) -> TokenResult<Self> {
        config.validate()?;
        let secret = config.signing_key()?;
        let credential_key = config
            .federated
            .as_ref()
            .map(|federated| federated.signing_key())
            .transpose()?;
        info!(
            federated = credential_key.is_some(),
            "Token service configured"
        );
        Ok(Self {
            config,
            clock,
            secret,
            credential_key,
        })
    }

    /// Configuration in use.
    pub fn config(&self) -> &TokenConfig {
        &self.config
    }

    /// Issue an access/refresh pair with the configured lifetimes.
    ///
    /// `subject` becomes the `sub` of both tokens.
    ///
    /// # Errors
    /// Returns `TokenError::InvalidClaims` if a lifetime is not positive.
    pub fn issue_session_tokens(&self, subject: Option<&str>) -> TokenResult<SessionTokens> {
        let mut spec = self.config.session_spec();
        spec.subject = subject.map(str::to_string);
        signer::issue_session_tokens(&self.secret, &spec, self.clock.now())
    }

    /// Verify a session token against the configured secret.
    ///
    /// # Errors
    /// See [`verifier::verify_session_token`].
    pub fn verify_session_token(&self, token: &str) -> TokenResult<ClaimSet> {
        verifier::verify_session_token(token, &self.secret, self.clock.now())
    }

    /// Whether `token` is a valid session token for the configured application.
    ///
    /// Always `false` when no `app_id` is configured.
    pub fn verify_login_token(&self, token: &str) -> bool {
        match &self.config.app_id {
            Some(app_id) => {
                verifier::verify_login_token(token, &self.secret, app_id, self.clock.now())
            }
            None => false,
        }
    }

    /// Sign a client credential for the configured provider.
    ///
    /// # Errors
    /// Returns `TokenError::Config` if no federated section is configured.
    pub fn client_secret(&self) -> TokenResult<String> {
        let (federated, key) = self.federated()?;
        signer::sign_client_credential(&federated.client_credential(), key, self.clock.now())
    }

    /// Verify a federated identity token using keys from `resolver`.
    ///
    /// Applies the configured identity policy, or none without a federated section.
    ///
    /// # Errors
    /// See [`verifier::verify_federated_identity_token`].
    pub async fn verify_identity_token(
        &self,
        token: &str,
        resolver: &dyn KeySetResolver,
    ) -> TokenResult<ClaimSet> {
        let policy = self
            .config
            .federated
            .as_ref()
            .map(|federated| federated.identity_policy())
            .unwrap_or_default();
        verifier::verify_federated_identity_token(token, resolver, &policy, self.clock.now()).await
    }

    /// Federated login flow over the given collaborators.
    ///
    /// # Errors
    /// Returns `TokenError::Config` if no federated section is configured.
    pub fn federated_login(
        &self,
        exchange: Arc<dyn TokenExchange>,
        resolver: Arc<dyn KeySetResolver>,
    ) -> TokenResult<FederatedLogin> {
        let (federated, _) = self.federated()?;
        FederatedLogin::from_config(federated, exchange, resolver)
    }

    /// Federated login flow over HTTP, with a cached key set.
    ///
    /// # Errors
    /// Returns `TokenError::Config` if no federated section is configured or
    /// `TokenError::NetworkError` if the HTTP client cannot be built.
    pub fn http_federated_login(&self) -> TokenResult<FederatedLogin> {
        let (federated, _) = self.federated()?;
        let transport = Arc::new(HttpTransport::with_timeout(federated.http_timeout())?);
        let resolver = CachedKeySetResolver::new(RemoteKeySetResolver::new(
            Arc::clone(&transport),
            federated.key_set_url.clone(),
        ))
        .with_ttl(federated.key_set_cache_ttl());
        self.federated_login(transport, Arc::new(resolver))
    }

    /// Current time of the service clock.
    pub fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.clock.now()
    }

    fn federated(&self) -> TokenResult<(&FederatedConfig, &EcPrivateKey)> {
        match (&self.config.federated, &self.credential_key) {
            (Some(federated), Some(key)) => Ok((federated, key)),
            _ => Err(TokenError::config("No federated identity provider configured")),
        }
    }
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
