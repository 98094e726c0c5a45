//! Engine configuration
//!
//! Deserializable with serde (defaults filled in per field) or read from
//! environment variables under a caller-chosen prefix:
//!
//! | Variable | Field |
//! |---|---|
//! | `{P}SIGNING_SECRET` | `signing_secret` |
//! | `{P}ACCESS_TOKEN_TTL_SECS` | `access_token_ttl_secs` |
//! | `{P}REFRESH_TOKEN_TTL_SECS` | `refresh_token_ttl_secs` |
//! | `{P}APP_ID` | `app_id` |
//! | `{P}SESSION_ISSUER` | `session_issuer` |
//! | `{P}FEDERATED_PRIVATE_KEY_PEM` | `federated.private_key_pem` |
//! | `{P}FEDERATED_KEY_ID` | `federated.key_id` |
//! | `{P}FEDERATED_TEAM_ID` | `federated.team_id` |
//! | `{P}FEDERATED_CLIENT_ID` | `federated.client_id` |
//! | `{P}FEDERATED_REDIRECT_URI` | `federated.redirect_uri` |
//! | `{P}FEDERATED_AUDIENCE` | `federated.audience` |
//! | `{P}FEDERATED_KEY_SET_URL` | `federated.key_set_url` |
//! | `{P}FEDERATED_TOKEN_URL` | `federated.token_url` |
//! | `{P}FEDERATED_IDENTITY_ISSUER` | `federated.identity_issuer` |
//! | `{P}FEDERATED_VERIFY_AUDIENCE` | `federated.verify_audience` |
//! | `{P}FEDERATED_KEY_SET_CACHE_TTL_SECS` | `federated.key_set_cache_ttl_secs` |
//! | `{P}FEDERATED_HTTP_TIMEOUT_SECS` | `federated.http_timeout_secs` |
//!
//! The federated section is present when any `{P}FEDERATED_*` identity
//! variable is set.

use crate::{
    error::{TokenError, TokenResult},
    keys::{EcPrivateKey, SymmetricKey, parse_ec_private_key},
    signer::{ClientCredential, SessionTokenSpec},
    verifier::FederatedPolicy,
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer};
use std::{str::FromStr, time::Duration};

/// Default identity provider audience for client credentials.
pub const DEFAULT_FEDERATED_AUDIENCE: &str = "https://appleid.apple.com";
/// Default published key set endpoint.
pub const DEFAULT_KEY_SET_URL: &str = "https://appleid.apple.com/auth/keys";
/// Default token-exchange endpoint.
pub const DEFAULT_TOKEN_URL: &str = "https://appleid.apple.com/auth/token";

fn secret_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<SecretString, D::Error> {
    String::deserialize(deserializer).map(SecretString::from)
}

/// Session token settings plus the optional federated login section.
#[derive(Debug, Deserialize)]
pub struct TokenConfig {
    /// HS256 secret shared by access and refresh tokens.
    #[serde(deserialize_with = "secret_string")]
    pub signing_secret: SecretString,
    /// Access token lifetime in seconds.
    #[serde(default = "default_access_token_ttl")]
    pub access_token_ttl_secs: u64,
    /// Refresh token lifetime in seconds.
    #[serde(default = "default_refresh_token_ttl")]
    pub refresh_token_ttl_secs: u64,
    /// Application identifier stamped into session tokens and required by login verification.
    #[serde(default)]
    pub app_id: Option<String>,
    /// `iss` stamped into session tokens.
    #[serde(default)]
    pub session_issuer: Option<String>,
    /// Federated identity provider settings.
    #[serde(default)]
    pub federated: Option<FederatedConfig>,
}

/// Federated identity provider settings.
#[derive(Debug, Deserialize)]
pub struct FederatedConfig {
    /// PKCS#8 PEM of the P-256 client-credential key.
    #[serde(deserialize_with = "secret_string")]
    pub private_key_pem: SecretString,
    /// `kid` of the client-credential key.
    pub key_id: String,
    /// Developer team identifier, the credential issuer.
    pub team_id: String,
    /// Application (bundle) identifier, the credential subject.
    pub client_id: String,
    /// Redirect URI registered with the provider, echoed in the exchange form.
    #[serde(default)]
    pub redirect_uri: String,
    /// Client-credential `aud`.
    #[serde(default = "default_audience")]
    pub audience: String,
    /// Published key set endpoint.
    #[serde(default = "default_key_set_url")]
    pub key_set_url: String,
    /// Token-exchange endpoint.
    #[serde(default = "default_token_url")]
    pub token_url: String,
    /// Required `iss` of identity tokens.
    #[serde(default)]
    pub identity_issuer: Option<String>,
    /// Require identity tokens to name `client_id` in `aud`.
    #[serde(default = "default_true")]
    pub verify_audience: bool,
    /// Key set cache lifetime in seconds.
    #[serde(default = "default_key_set_cache_ttl")]
    pub key_set_cache_ttl_secs: u64,
    /// Provider request timeout in seconds.
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
}

fn default_access_token_ttl() -> u64 {
    7 * 24 * 60 * 60 // 7 days
}

fn default_refresh_token_ttl() -> u64 {
    30 * 24 * 60 * 60 // 30 days
}

fn default_audience() -> String {
    DEFAULT_FEDERATED_AUDIENCE.to_string()
}

fn default_key_set_url() -> String {
    DEFAULT_KEY_SET_URL.to_string()
}

fn default_token_url() -> String {
    DEFAULT_TOKEN_URL.to_string()
}

fn default_true() -> bool {
    true
}

fn default_key_set_cache_ttl() -> u64 {
    600
}

fn default_http_timeout() -> u64 {
    10
}

/// Longest accepted session token lifetime: 100 years.
pub const MAX_TOKEN_TTL_SECS: u64 = 100 * 365 * 24 * 60 * 60;

/// Lifetime as a chrono duration, saturating at [`MAX_TOKEN_TTL_SECS`].
fn seconds(secs: u64) -> chrono::Duration {
    let secs = i64::try_from(secs.min(MAX_TOKEN_TTL_SECS)).unwrap_or(i64::MAX);
    chrono::Duration::try_seconds(secs).unwrap_or_else(chrono::Duration::zero)
}

impl TokenConfig {
    /// Configuration with default lifetimes and no federated section.
    pub fn new(signing_secret: impl Into<String>) -> Self {
        Self {
            signing_secret: SecretString::from(signing_secret.into()),
            access_token_ttl_secs: default_access_token_ttl(),
            refresh_token_ttl_secs: default_refresh_token_ttl(),
            app_id: None,
            session_issuer: None,
            federated: None,
        }
    }

    /// Attach a federated section.
    #[must_use]
    pub fn with_federated(mut self, federated: FederatedConfig) -> Self {
        self.federated = Some(federated);
        self
    }

    /// Read from process environment variables named `{prefix}FIELD`.
    ///
    /// # Errors
    /// Returns `TokenError::Config` if a required variable is missing, a
    /// number does not parse, or [`TokenConfig::validate`] fails.
    pub fn from_env(prefix: &str) -> TokenResult<Self> {
        Self::from_lookup(prefix, |name| std::env::var(name).ok())
    }

    /// Same as [`TokenConfig::from_env`] with an arbitrary variable source.
    ///
    /// # Errors
    /// See [`TokenConfig::from_env`].
    pub fn from_lookup<F>(prefix: &str, lookup: F) -> TokenResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { prefix, lookup };

        let federated = if vars.any(&[
            "FEDERATED_PRIVATE_KEY_PEM",
            "FEDERATED_KEY_ID",
            "FEDERATED_TEAM_ID",
            "FEDERATED_CLIENT_ID",
        ]) {
            Some(FederatedConfig {
                private_key_pem: SecretString::from(vars.required("FEDERATED_PRIVATE_KEY_PEM")?),
                key_id: vars.required("FEDERATED_KEY_ID")?,
                team_id: vars.required("FEDERATED_TEAM_ID")?,
                client_id: vars.required("FEDERATED_CLIENT_ID")?,
                redirect_uri: vars.optional("FEDERATED_REDIRECT_URI").unwrap_or_default(),
                audience: vars
                    .optional("FEDERATED_AUDIENCE")
                    .unwrap_or_else(default_audience),
                key_set_url: vars
                    .optional("FEDERATED_KEY_SET_URL")
                    .unwrap_or_else(default_key_set_url),
                token_url: vars
                    .optional("FEDERATED_TOKEN_URL")
                    .unwrap_or_else(default_token_url),
                identity_issuer: vars.optional("FEDERATED_IDENTITY_ISSUER"),
                verify_audience: vars
                    .parsed("FEDERATED_VERIFY_AUDIENCE")?
                    .unwrap_or_else(default_true),
                key_set_cache_ttl_secs: vars
                    .parsed("FEDERATED_KEY_SET_CACHE_TTL_SECS")?
                    .unwrap_or_else(default_key_set_cache_ttl),
                http_timeout_secs: vars
                    .parsed("FEDERATED_HTTP_TIMEOUT_SECS")?
                    .unwrap_or_else(default_http_timeout),
            })
        } else {
            None
        };

        let config = Self {
            signing_secret: SecretString::from(vars.required("SIGNING_SECRET")?),
            access_token_ttl_secs: vars
                .parsed("ACCESS_TOKEN_TTL_SECS")?
                .unwrap_or_else(default_access_token_ttl),
            refresh_token_ttl_secs: vars
                .parsed("REFRESH_TOKEN_TTL_SECS")?
                .unwrap_or_else(default_refresh_token_ttl),
            app_id: vars.optional("APP_ID"),
            session_issuer: vars.optional("SESSION_ISSUER"),
            federated,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject empty secrets and identifiers, and lifetimes that are zero or
    /// above [`MAX_TOKEN_TTL_SECS`].
    ///
    /// # Errors
    /// Returns `TokenError::Config` naming the offending field.
    pub fn validate(&self) -> TokenResult<()> {
        if self.signing_secret.expose_secret().is_empty() {
            return Err(TokenError::config("signing_secret must not be empty"));
        }
        for (name, ttl) in [
            ("access_token_ttl_secs", self.access_token_ttl_secs),
            ("refresh_token_ttl_secs", self.refresh_token_ttl_secs),
        ] {
            if ttl == 0 {
                return Err(TokenError::config(format!("{name} must be positive")));
            }
            if ttl > MAX_TOKEN_TTL_SECS {
                return Err(TokenError::config(format!(
                    "{name} must be at most {MAX_TOKEN_TTL_SECS}"
                )));
            }
        }
        if let Some(federated) = &self.federated {
            federated.validate()?;
        }
        Ok(())
    }

    /// Session signing key.
    ///
    /// # Errors
    /// Returns `TokenError::InvalidKeyFormat` if the secret is empty.
    pub fn signing_key(&self) -> TokenResult<SymmetricKey> {
        SymmetricKey::new(self.signing_secret.expose_secret().as_bytes())
    }

    /// Lifetimes and identity claims for a session token pair.
    pub fn session_spec(&self) -> SessionTokenSpec {
        SessionTokenSpec {
            issuer: self.session_issuer.clone(),
            app_id: self.app_id.clone(),
            ..SessionTokenSpec::new(
                seconds(self.access_token_ttl_secs),
                seconds(self.refresh_token_ttl_secs),
            )
        }
    }
}

impl FederatedConfig {
    /// # Errors
    /// Returns `TokenError::Config` naming the offending field.
    pub fn validate(&self) -> TokenResult<()> {
        if self.private_key_pem.expose_secret().trim().is_empty() {
            return Err(TokenError::config("federated.private_key_pem must not be empty"));
        }
        for (name, value) in [
            ("key_id", &self.key_id),
            ("team_id", &self.team_id),
            ("client_id", &self.client_id),
            ("audience", &self.audience),
            ("key_set_url", &self.key_set_url),
            ("token_url", &self.token_url),
        ] {
            if value.trim().is_empty() {
                return Err(TokenError::config(format!(
                    "federated.{name} must not be empty"
                )));
            }
        }
        if self.http_timeout_secs == 0 {
            return Err(TokenError::config("federated.http_timeout_secs must be positive"));
        }
        Ok(())
    }

    /// Parse the client-credential signing key.
    ///
    /// # Errors
    /// Returns `TokenError::InvalidKeyFormat` if the PEM is not a P-256 PKCS#8 key.
    pub fn signing_key(&self) -> TokenResult<EcPrivateKey> {
        parse_ec_private_key(self.private_key_pem.expose_secret().as_bytes())
    }

    /// Claims of the client credential this application presents.
    pub fn client_credential(&self) -> ClientCredential {
        ClientCredential {
            issuer: self.team_id.clone(),
            subject: self.client_id.clone(),
            audience: self.audience.clone(),
            key_id: self.key_id.clone(),
        }
    }

    /// Claim pins for identity tokens returned by the provider.
    pub fn identity_policy(&self) -> FederatedPolicy {
        FederatedPolicy {
            issuer: self.identity_issuer.clone(),
            audience: self.verify_audience.then(|| self.client_id.clone()),
        }
    }

    /// Key set cache lifetime.
    pub fn key_set_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.key_set_cache_ttl_secs)
    }

    /// Request timeout for the provider endpoints.
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

struct Vars<'a, F> {
    prefix: &'a str,
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Vars<'_, F> {
    fn optional(&self, name: &str) -> Option<String> {
        (self.lookup)(&format!("{}{name}", self.prefix)).filter(|value| !value.is_empty())
    }

    fn required(&self, name: &str) -> TokenResult<String> {
        self.optional(name).ok_or_else(|| {
            TokenError::config(format!("{}{name} is not set", self.prefix))
        })
    }

    fn parsed<T: FromStr>(&self, name: &str) -> TokenResult<Option<T>> {
        self.optional(name)
            .map(|raw| {
                raw.trim().parse::<T>().map_err(|_| {
                    TokenError::config(format!("{}{name} has an invalid value", self.prefix))
                })
            })
            .transpose()
    }

    fn any(&self, names: &[&str]) -> bool {
        names.iter().any(|name| self.optional(name).is_some())
    }
}
