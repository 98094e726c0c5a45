//! Shared fixtures: an RS256 "identity provider" and in-memory collaborators
#![allow(dead_code)]

use async_trait::async_trait;
use jtoken::{
    KeySetFetcher, TokenError, TokenExchange, TokenResult, codec::base64url_encode,
};
use rsa::{
    RsaPrivateKey,
    pkcs1v15::SigningKey,
    pkcs8::DecodePrivateKey,
    signature::{SignatureEncoding, Signer},
    traits::PublicKeyParts,
};
use serde_json::{Value, json};
use sha2::Sha256;
use std::sync::{
    Mutex,
    atomic::{AtomicUsize, Ordering},
};

pub const RSA_PEM: &str = include_str!("../fixtures/rsa_private.pem");
pub const EC_PEM: &str = include_str!("../fixtures/ec_private.pem");
pub const EC_PUBLIC_PEM: &str = include_str!("../fixtures/ec_public.pem");

pub const KEY_SET_URL: &str = "https://idp.example/auth/keys";
pub const TOKEN_URL: &str = "https://idp.example/auth/token";
pub const CLIENT_ID: &str = "com.example.app";
pub const ISSUER: &str = "https://idp.example";

/// Provider signing key and its published form.
pub struct Provider {
    key: RsaPrivateKey,
}

impl Provider {
    pub fn new() -> Self {
        Self {
            key: RsaPrivateKey::from_pkcs8_pem(RSA_PEM).unwrap(),
        }
    }

    pub fn jwk(&self, kid: &str) -> Value {
        json!({
            "kty": "RSA",
            "kid": kid,
            "use": "sig",
            "alg": "RS256",
            "n": base64url_encode(self.key.n().to_bytes_be()),
            "e": base64url_encode(self.key.e().to_bytes_be()),
        })
    }

    pub fn key_set(&self, kids: &[&str]) -> String {
        let keys: Vec<Value> = kids.iter().map(|kid| self.jwk(kid)).collect();
        json!({ "keys": keys }).to_string()
    }

    /// Sign arbitrary header and payload JSON with RS256, whatever the header claims.
    pub fn sign(&self, header: &Value, claims: &Value) -> String {
        let input = format!(
            "{}.{}",
            base64url_encode(header.to_string()),
            base64url_encode(claims.to_string())
        );
        let signing_key = SigningKey::<Sha256>::new(self.key.clone());
        let signature = signing_key.sign(input.as_bytes()).to_vec();
        format!("{input}.{}", base64url_encode(signature))
    }

    pub fn identity_token(&self, kid: &str, iat: i64, exp: i64) -> String {
        self.sign(
            &json!({ "alg": "RS256", "kid": kid }),
            &json!({
                "iss": ISSUER,
                "aud": CLIENT_ID,
                "sub": "001234.abcdef",
                "iat": iat,
                "exp": exp,
                "email": "user@example.com",
                "email_verified": "true",
            }),
        )
    }
}

/// Key set endpoint serving a body that can be swapped between calls.
pub struct FakeKeySetEndpoint {
    body: Mutex<Result<String, String>>,
    calls: AtomicUsize,
}

impl FakeKeySetEndpoint {
    pub fn serving(body: impl Into<String>) -> Self {
        Self {
            body: Mutex::new(Ok(body.into())),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(reason: &str) -> Self {
        Self {
            body: Mutex::new(Err(reason.to_string())),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn rotate(&self, body: impl Into<String>) {
        *self.body.lock().unwrap() = Ok(body.into());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeySetFetcher for FakeKeySetEndpoint {
    async fn get(&self, url: &str) -> TokenResult<Vec<u8>> {
        assert_eq!(url, KEY_SET_URL);
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &*self.body.lock().unwrap() {
            Ok(body) => Ok(body.clone().into_bytes()),
            Err(reason) => Err(TokenError::network(reason.clone())),
        }
    }
}

/// Token endpoint answering every exchange with a fixed body, recording the forms.
pub struct FakeTokenEndpoint {
    response: Result<String, String>,
    pub forms: Mutex<Vec<Vec<(String, String)>>>,
}

impl FakeTokenEndpoint {
    pub fn answering(body: impl Into<String>) -> Self {
        Self {
            response: Ok(body.into()),
            forms: Mutex::new(Vec::new()),
        }
    }

    pub fn with_id_token(id_token: &str) -> Self {
        Self::answering(
            json!({
                "access_token": "provider-access",
                "expires_in": 3600,
                "refresh_token": "provider-refresh",
                "id_token": id_token,
                "token_type": "Bearer",
            })
            .to_string(),
        )
    }

    pub fn failing(reason: &str) -> Self {
        Self {
            response: Err(reason.to_string()),
            forms: Mutex::new(Vec::new()),
        }
    }

    pub fn last_form_field(&self, name: &str) -> Option<String> {
        let forms = self.forms.lock().unwrap();
        forms
            .last()?
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value.clone())
    }
}

#[async_trait]
impl TokenExchange for FakeTokenEndpoint {
    async fn exchange(&self, url: &str, form: &[(&'static str, String)]) -> TokenResult<Vec<u8>> {
        assert_eq!(url, TOKEN_URL);
        self.forms.lock().unwrap().push(
            form.iter()
                .map(|(name, value)| ((*name).to_string(), value.clone()))
                .collect(),
        );
        match &self.response {
            Ok(body) => Ok(body.clone().into_bytes()),
            Err(reason) => Err(TokenError::network(reason.clone())),
        }
    }
}
