//! HTTP client for the identity provider endpoints

use crate::{
    error::{TokenError, TokenResult},
    federated::TokenExchange,
    jwks::KeySetFetcher,
};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

/// Default request timeout.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// `reqwest` transport implementing both [`KeySetFetcher`] and [`TokenExchange`].
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Transport with the default timeout.
    ///
    /// # Errors
    /// Returns `TokenError::NetworkError` if the HTTP client cannot be built.
    pub fn new() -> TokenResult<Self> {
        Self::with_timeout(DEFAULT_HTTP_TIMEOUT)
    }

    /// Transport whose requests time out after `timeout`.
    ///
    /// Redirects are not followed.
    ///
    /// # Errors
    /// Returns `TokenError::NetworkError` if the HTTP client cannot be built.
    pub fn with_timeout(timeout: Duration) -> TokenResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(concat!("jtoken/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TokenError::network(format!("Failed to initialize HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Wrap an existing client.
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    async fn read_body(response: reqwest::Response, what: &str) -> TokenResult<Vec<u8>> {
        let status = response.status();
        if !status.is_success() {
            return Err(TokenError::network(format!("{what} returned status: {status}")));
        }
        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| TokenError::network(format!("Failed to read {what} response: {e}")))
    }
}

#[async_trait]
impl KeySetFetcher for HttpTransport {
    async fn get(&self, url: &str) -> TokenResult<Vec<u8>> {
        debug!(url, "GET key set");
        let response = self
            .client
            .get(url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| TokenError::network(format!("Key set request failed: {e}")))?;
        Self::read_body(response, "Key set endpoint").await
    }
}

#[async_trait]
impl TokenExchange for HttpTransport {
    async fn exchange(&self, url: &str, form: &[(&'static str, String)]) -> TokenResult<Vec<u8>> {
        debug!(url, "POST token exchange");
        let response = self
            .client
            .post(url)
            .header("Accept", "application/json")
            .form(form)
            .send()
            .await
            .map_err(|e| TokenError::network(format!("Token exchange request failed: {e}")))?;
        Self::read_body(response, "Token endpoint").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_endpoint_is_a_network_error() {
        let transport = HttpTransport::with_timeout(Duration::from_millis(500)).unwrap();
        let result = transport.get("http://127.0.0.1:9/keys").await;
        assert!(matches!(result, Err(TokenError::NetworkError(_))));
    }
}
