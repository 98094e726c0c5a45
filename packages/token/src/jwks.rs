//! Published key sets (JWKS) and how they are obtained
//!
//! - [`KeySet`] / [`KeySetEntry`]: the parsed `{"keys": [...]}` document
//! - [`KeySetFetcher`]: the HTTP GET collaborator, injected
//! - [`RemoteKeySetResolver`]: fetches a fresh key set on every call
//! - [`CachedKeySetResolver`]: TTL cache over any resolver, refreshing once on
//!   an unknown `kid` so provider key rotation is picked up
//!
//! The cache keeps its current key set behind an `ArcSwapOption`, so readers
//! take a snapshot without locking while a refresh swaps in a new one.
//! Refreshes themselves are serialized and rate limited.

use crate::{
    error::{TokenError, TokenResult},
    keys::{RsaPublicComponents, build_rsa_public_key},
    token::Algorithm,
};
use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Default cache lifetime of a fetched key set.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(600);

/// Default minimum spacing between two refreshes.
pub const DEFAULT_MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(5);

/// One published public key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySetEntry {
    /// Key type (`RSA`).
    pub kty: String,
    /// Key identifier.
    pub kid: String,
    /// Intended use (`sig`).
    #[serde(rename = "use")]
    pub key_use: String,
    /// Algorithm the key is published for.
    pub alg: String,
    /// Modulus, base64url big-endian.
    pub n: String,
    /// Exponent, base64url big-endian.
    pub e: String,
}

impl KeySetEntry {
    /// Rebuild the RSA public key this entry publishes.
    ///
    /// # Errors
    /// Returns `TokenError::InvalidKeyFormat` if the entry is not an RSA
    /// signing key for RS256 or its `n`/`e` are empty or malformed.
    pub fn rsa_public_key(&self) -> TokenResult<RsaPublicComponents> {
        if self.kty != "RSA" {
            return Err(TokenError::invalid_key(format!(
                "Key '{}' has type '{}', expected RSA",
                self.kid, self.kty
            )));
        }
        if !self.alg.is_empty() && self.alg != Algorithm::RS256.as_str() {
            return Err(TokenError::invalid_key(format!(
                "Key '{}' is published for {}, expected RS256",
                self.kid, self.alg
            )));
        }
        if !self.key_use.is_empty() && self.key_use != "sig" {
            return Err(TokenError::invalid_key(format!(
                "Key '{}' is not a signing key (use '{}')",
                self.kid, self.key_use
            )));
        }
        if self.n.is_empty() || self.e.is_empty() {
            return Err(TokenError::invalid_key(format!(
                "Key '{}' has empty RSA parameters",
                self.kid
            )));
        }
        build_rsa_public_key(&self.n, &self.e)
    }
}

/// Ordered key set. Lookup returns the first entry with a matching `kid`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySet {
    /// Entries in document order.
    pub keys: Vec<KeySetEntry>,
}

impl KeySet {
    /// Parse a JWKS document.
    ///
    /// # Errors
    /// Returns `TokenError::MalformedKeySet` if the body is not JSON of the
    /// expected shape or any entry lacks one of `kty`, `kid`, `use`, `alg`,
    /// `n`, `e`.
    pub fn parse(body: &[u8]) -> TokenResult<Self> {
        serde_json::from_slice(body).map_err(|e| TokenError::malformed_key_set(e.to_string()))
    }

    /// First entry whose `kid` equals `kid`.
    pub fn find(&self, kid: &str) -> Option<&KeySetEntry> {
        self.keys.iter().find(|entry| entry.kid == kid)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the set has no entries.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// HTTP GET collaborator used to download a key set.
///
/// Implementations own transport concerns, timeouts included.
#[async_trait]
pub trait KeySetFetcher: Send + Sync {
    /// Return the response body of a GET to `url`.
    ///
    /// # Errors
    /// Returns `TokenError::NetworkError` on transport failure or a non-success status.
    async fn get(&self, url: &str) -> TokenResult<Vec<u8>>;
}

#[async_trait]
impl<F: KeySetFetcher + ?Sized> KeySetFetcher for Arc<F> {
    async fn get(&self, url: &str) -> TokenResult<Vec<u8>> {
        (**self).get(url).await
    }
}

/// Source of the identity provider's current key set.
#[async_trait]
pub trait KeySetResolver: Send + Sync {
    /// Obtain the current key set.
    ///
    /// # Errors
    /// Returns `NetworkError` or `MalformedKeySet`.
    async fn fetch(&self) -> TokenResult<Arc<KeySet>>;

    /// Find the entry for `kid`. There is no fallback key.
    ///
    /// # Errors
    /// Returns `TokenError::KeyNotFound` if no entry matches, or any error of
    /// [`KeySetResolver::fetch`].
    async fn resolve(&self, kid: &str) -> TokenResult<KeySetEntry> {
        let keys = self.fetch().await?;
        keys.find(kid)
            .cloned()
            .ok_or_else(|| TokenError::KeyNotFound(kid.to_string()))
    }
}

#[async_trait]
impl<R: KeySetResolver + ?Sized> KeySetResolver for Arc<R> {
    async fn fetch(&self) -> TokenResult<Arc<KeySet>> {
        (**self).fetch().await
    }

    async fn resolve(&self, kid: &str) -> TokenResult<KeySetEntry> {
        (**self).resolve(kid).await
    }
}

/// Resolver that downloads the key set on every call.
#[derive(Debug, Clone)]
pub struct RemoteKeySetResolver<F> {
    fetcher: F,
    url: String,
}

impl<F: KeySetFetcher> RemoteKeySetResolver<F> {
    /// Resolver for the key set published at `url`.
    pub fn new(fetcher: F, url: impl Into<String>) -> Self {
        Self {
            fetcher,
            url: url.into(),
        }
    }

    /// Key set endpoint.
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl<F: KeySetFetcher> KeySetResolver for RemoteKeySetResolver<F> {
    async fn fetch(&self) -> TokenResult<Arc<KeySet>> {
        debug!(url = %self.url, "Fetching key set");
        let body = self.fetcher.get(&self.url).await?;
        let keys = KeySet::parse(&body).map_err(|e| {
            warn!(url = %self.url, error = %e, "Key set document rejected");
            e
        })?;
        info!(url = %self.url, key_count = keys.len(), "Fetched key set");
        Ok(Arc::new(keys))
    }
}

#[derive(Debug)]
struct Snapshot {
    keys: Arc<KeySet>,
    fetched_at: Instant,
}

impl Snapshot {
    fn is_fresh(&self, ttl: Duration) -> bool {
        self.fetched_at.elapsed() < ttl
    }
}

/// Caching wrapper around another resolver.
///
/// - a fresh snapshot is served without touching the inner resolver
/// - an expired or missing snapshot is refetched
/// - an unknown `kid` triggers one refetch before `KeyNotFound`, unless the
///   last refetch happened within the minimum refresh interval
///
/// The interval never extends the TTL: a stale snapshot is not served on a hit.
pub struct CachedKeySetResolver<R> {
    inner: R,
    snapshot: ArcSwapOption<Snapshot>,
    ttl: Duration,
    min_refresh_interval: Duration,
    last_refresh: Mutex<Option<Instant>>,
}

impl<R: KeySetResolver> CachedKeySetResolver<R> {
    /// Wrap `inner` with the default TTL and refresh interval.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            snapshot: ArcSwapOption::empty(),
            ttl: DEFAULT_CACHE_TTL,
            min_refresh_interval: DEFAULT_MIN_REFRESH_INTERVAL,
            last_refresh: Mutex::new(None),
        }
    }

    /// Set the cache lifetime.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set the minimum spacing between refreshes triggered by an unknown `kid`.
    #[must_use]
    pub fn with_min_refresh_interval(mut self, interval: Duration) -> Self {
        self.min_refresh_interval = interval;
        self
    }

    /// Cache lifetime.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Currently cached key set, fresh or not.
    pub fn cached(&self) -> Option<Arc<KeySet>> {
        self.snapshot
            .load_full()
            .map(|snapshot| Arc::clone(&snapshot.keys))
    }

    /// Drop the cached key set.
    pub fn invalidate(&self) {
        self.snapshot.store(None);
        debug!("Key set cache cleared");
    }

    fn fresh(&self) -> Option<Arc<KeySet>> {
        self.snapshot
            .load_full()
            .filter(|snapshot| snapshot.is_fresh(self.ttl))
            .map(|snapshot| Arc::clone(&snapshot.keys))
    }

    /// Refetch unless another task already did.
    ///
    /// An expired snapshot is always refetched. The minimum refresh interval
    /// only throttles refetches caused by an unknown `kid`.
    async fn refresh(&self, miss: bool) -> TokenResult<Arc<KeySet>> {
        let mut last_refresh = self.last_refresh.lock().await;

        if !miss {
            if let Some(keys) = self.fresh() {
                return Ok(keys);
            }
        } else if let Some(last) = *last_refresh {
            let since_last = last.elapsed();
            if since_last < self.min_refresh_interval {
                if let Some(keys) = self.cached() {
                    warn!(
                        since_last_ms = u64::try_from(since_last.as_millis()).unwrap_or(u64::MAX),
                        "Key set refresh rate limited, using cache"
                    );
                    return Ok(keys);
                }
            }
        }

        let keys = self.inner.fetch().await?;
        self.snapshot.store(Some(Arc::new(Snapshot {
            keys: Arc::clone(&keys),
            fetched_at: Instant::now(),
        })));
        *last_refresh = Some(Instant::now());
        debug!(key_count = keys.len(), "Key set cache updated");
        Ok(keys)
    }
}

#[async_trait]
impl<R: KeySetResolver> KeySetResolver for CachedKeySetResolver<R> {
    async fn fetch(&self) -> TokenResult<Arc<KeySet>> {
        if let Some(keys) = self.fresh() {
            debug!("Using cached key set");
            return Ok(keys);
        }
        self.refresh(false).await
    }

    async fn resolve(&self, kid: &str) -> TokenResult<KeySetEntry> {
        let keys = self.fetch().await?;
        if let Some(entry) = keys.find(kid) {
            return Ok(entry.clone());
        }

        debug!(kid, "Key not in cached set, refreshing");
        let keys = self.refresh(true).await?;
        keys.find(kid)
            .cloned()
            .ok_or_else(|| TokenError::KeyNotFound(kid.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const APPLE_STYLE: &str = r#"{"keys":[
        {"kty":"RSA","kid":"A","use":"sig","alg":"RS256","n":"AQAB","e":"AQAB"},
        {"kty":"RSA","kid":"B","use":"sig","alg":"RS256","n":"AQAD","e":"AQAB"},
        {"kty":"RSA","kid":"A","use":"sig","alg":"RS256","n":"AQAF","e":"AQAB"}
    ]}"#;

    #[test]
    fn lookup_returns_first_match_in_document_order() {
        let keys = KeySet::parse(APPLE_STYLE.as_bytes()).unwrap();
        assert_eq!(keys.len(), 3);
        assert_eq!(keys.find("A").map(|e| e.n.as_str()), Some("AQAB"));
        assert!(keys.find("C").is_none());
    }

    #[test]
    fn entry_missing_a_field_rejects_the_set() {
        let body = br#"{"keys":[{"kty":"RSA","kid":"A","use":"sig","alg":"RS256","n":"AQAB"}]}"#;
        assert!(matches!(
            KeySet::parse(body),
            Err(TokenError::MalformedKeySet(_))
        ));
        assert!(KeySet::parse(b"not json").is_err());
    }

    #[test]
    fn non_rsa_or_wrong_alg_entries_are_unusable() {
        let mut entry = KeySet::parse(APPLE_STYLE.as_bytes()).unwrap().keys[0].clone();
        entry.kty = "EC".into();
        assert!(entry.rsa_public_key().is_err());

        entry.kty = "RSA".into();
        entry.alg = "HS256".into();
        assert!(entry.rsa_public_key().is_err());

        entry.alg = "RS256".into();
        entry.n.clear();
        assert!(entry.rsa_public_key().is_err());
    }

    struct Counting {
        bodies: std::sync::Mutex<Vec<&'static str>>,
        calls: AtomicUsize,
    }

    impl Counting {
        fn new(bodies: Vec<&'static str>) -> Self {
            Self {
                bodies: std::sync::Mutex::new(bodies),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl KeySetFetcher for Counting {
        async fn get(&self, _url: &str) -> TokenResult<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut bodies = self.bodies.lock().unwrap();
            let body = if bodies.len() > 1 {
                bodies.remove(0)
            } else {
                bodies[0]
            };
            Ok(body.as_bytes().to_vec())
        }
    }

    const ONLY_A: &str =
        r#"{"keys":[{"kty":"RSA","kid":"A","use":"sig","alg":"RS256","n":"AQAB","e":"AQAB"}]}"#;
    const ONLY_B: &str =
        r#"{"keys":[{"kty":"RSA","kid":"B","use":"sig","alg":"RS256","n":"AQAB","e":"AQAB"}]}"#;

    #[tokio::test]
    async fn remote_resolver_fetches_every_time() {
        let fetcher = Arc::new(Counting::new(vec![ONLY_A]));
        let resolver = RemoteKeySetResolver::new(Arc::clone(&fetcher), "https://idp/keys");
        resolver.resolve("A").await.unwrap();
        resolver.resolve("A").await.unwrap();
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
        assert_eq!(
            resolver.resolve("Z").await,
            Err(TokenError::KeyNotFound("Z".into()))
        );
    }

    #[tokio::test]
    async fn cache_serves_hits_without_refetching() {
        let fetcher = Arc::new(Counting::new(vec![ONLY_A]));
        let resolver =
            CachedKeySetResolver::new(RemoteKeySetResolver::new(Arc::clone(&fetcher), "u"));
        resolver.resolve("A").await.unwrap();
        resolver.resolve("A").await.unwrap();
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cache_refreshes_on_rotated_kid() {
        let fetcher = Arc::new(Counting::new(vec![ONLY_A, ONLY_B]));
        let resolver =
            CachedKeySetResolver::new(RemoteKeySetResolver::new(Arc::clone(&fetcher), "u"))
                .with_min_refresh_interval(Duration::ZERO);

        resolver.resolve("A").await.unwrap();
        let entry = resolver.resolve("B").await.unwrap();
        assert_eq!(entry.kid, "B");
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unknown_kid_refresh_is_rate_limited() {
        let fetcher = Arc::new(Counting::new(vec![ONLY_A]));
        let resolver =
            CachedKeySetResolver::new(RemoteKeySetResolver::new(Arc::clone(&fetcher), "u"))
                .with_min_refresh_interval(Duration::from_secs(3600));

        resolver.resolve("A").await.unwrap();
        for _ in 0..5 {
            assert_eq!(
                resolver.resolve("nope").await,
                Err(TokenError::KeyNotFound("nope".into()))
            );
        }
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn refresh_interval_longer_than_ttl_never_serves_stale_keys() {
        let fetcher = Arc::new(Counting::new(vec![ONLY_A, ONLY_B]));
        let resolver =
            CachedKeySetResolver::new(RemoteKeySetResolver::new(Arc::clone(&fetcher), "u"))
                .with_ttl(Duration::ZERO)
                .with_min_refresh_interval(Duration::from_secs(3600));

        assert!(resolver.fetch().await.unwrap().find("A").is_some());
        assert!(resolver.fetch().await.unwrap().find("B").is_some());
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn expired_cache_is_refetched() {
        let fetcher = Arc::new(Counting::new(vec![ONLY_A]));
        let resolver =
            CachedKeySetResolver::new(RemoteKeySetResolver::new(Arc::clone(&fetcher), "u"))
                .with_ttl(Duration::ZERO)
                .with_min_refresh_interval(Duration::ZERO);

        resolver.fetch().await.unwrap();
        resolver.fetch().await.unwrap();
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);

        resolver.invalidate();
        assert!(resolver.cached().is_none());
    }
}
