//! Token issuance and verification engine
//!
//! This crate provides:
//! - HS256 session access/refresh tokens
//! - ES256 client credentials for a federated identity provider
//! - RS256 identity token verification against a remote key set (JWKS)
//! - Federated authorization-code login on top of the three
//!
//! Signing and verification are synchronous and take `now` explicitly;
//! only the paths that wait on the provider are async.

pub mod claims;
pub mod clock;
pub mod codec;
pub mod config;
mod error;
pub mod federated;
pub mod http;
pub mod jwks;
pub mod keys;
pub mod service;
pub mod signer;
pub mod token;
pub mod verifier;

pub use claims::{Audience, ClaimSet, ClaimsBuilder};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{FederatedConfig, TokenConfig};
pub use error::{TokenError, TokenResult};
pub use federated::{
    FederatedIdentity, FederatedLogin, TokenExchange, TokenExchangeResponse, token_exchange_form,
};
pub use http::HttpTransport;
pub use jwks::{
    CachedKeySetResolver, KeySet, KeySetEntry, KeySetFetcher, KeySetResolver,
    RemoteKeySetResolver,
};
pub use keys::{
    EcPrivateKey, KeyMaterial, RsaPublicComponents, SymmetricKey, build_rsa_public_key,
    parse_ec_private_key,
};
pub use service::TokenService;
pub use signer::{
    ClientCredential, SessionTokenSpec, SessionTokens, issue_session_tokens,
    sign_client_credential, sign_session_token, sign_token,
};
pub use token::{Algorithm, CompactToken, Header};
pub use verifier::{
    FederatedPolicy, verify_federated_identity_token, verify_login_token, verify_session_token,
};
