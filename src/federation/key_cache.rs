//! Public Key Caching
//!
//! Resolves signature key ids to remote public keys, caching fetched keys to
//! reduce remote requests. Concurrent lookups of the same unknown key id
//! share a single fetch.

use std::net::IpAddr;
use std::sync::Arc;

use moka::future::Cache;
use rsa::RsaPublicKey;
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::DecodePublicKey;

use super::signature::actor_id_from_key_id;
use super::verifier::Rejection;
use crate::config::FederationSettings;
use crate::error::AppError;
use crate::metrics::{KEY_CACHE_LOOKUPS_TOTAL, KEY_FETCHES_TOTAL};

/// A public key obtained from a remote actor document
#[derive(Debug, Clone)]
pub struct ResolvedKey {
    /// Key id the key was published under
    pub key_id: String,
    /// Actor that owns the key
    pub owner: String,
    /// PEM as published
    pub public_key_pem: String,
    pub public_key: RsaPublicKey,
}

impl ResolvedKey {
    /// Decode a published PEM (SPKI, or PKCS#1 as some servers emit)
    pub fn from_pem(
        key_id: impl Into<String>,
        owner: impl Into<String>,
        public_key_pem: impl Into<String>,
    ) -> Result<Self, String> {
        let public_key_pem = public_key_pem.into();
        let trimmed = public_key_pem.trim();
        let public_key = RsaPublicKey::from_public_key_pem(trimmed)
            .or_else(|_| RsaPublicKey::from_pkcs1_pem(trimmed))
            .map_err(|e| format!("Invalid public key: {}", e))?;

        Ok(Self {
            key_id: key_id.into(),
            owner: owner.into(),
            public_key_pem,
            public_key,
        })
    }
}

/// Public key cache
///
/// Thread-safe, bounded, TTL-expiring cache for remote actor public keys.
pub struct PublicKeyCache {
    /// key_id -> resolved key
    cache: Cache<String, Arc<ResolvedKey>>,
    /// HTTP client for fetching keys
    http_client: reqwest::Client,
    allow_private_hosts: bool,
}

impl PublicKeyCache {
    /// Create a cache with its own HTTP client
    ///
    /// The client uses the configured fetch timeout and outbound proxy.
    pub fn from_settings(settings: &FederationSettings) -> Result<Self, AppError> {
        let http_client = super::client::build_http_client(settings, settings.fetch_timeout())?;
        Ok(Self::new(settings, http_client))
    }

    /// Create a cache around an existing HTTP client
    pub fn new(settings: &FederationSettings, http_client: reqwest::Client) -> Self {
        let cache = Cache::builder()
            .max_capacity(settings.key_cache_capacity())
            .time_to_live(settings.key_cache_ttl())
            .build();

        Self {
            cache,
            http_client,
            allow_private_hosts: settings.allow_private_hosts(),
        }
    }

    /// Get public key for a key ID
    ///
    /// Checks cache first, fetches from remote if not cached or expired.
    /// Callers racing on the same key id wait for one shared fetch; a failed
    /// fetch is not cached.
    pub async fn get(&self, key_id: &str) -> Result<Arc<ResolvedKey>, Rejection> {
        KEY_CACHE_LOOKUPS_TOTAL.inc();

        self.cache
            .try_get_with(key_id.to_string(), async {
                tracing::debug!(%key_id, "Public key cache miss, fetching");
                let result =
                    fetch_public_key(key_id, &self.http_client, self.allow_private_hosts).await;
                let status = if result.is_ok() { "success" } else { "failure" };
                KEY_FETCHES_TOTAL.with_label_values(&[status]).inc();
                result.map(Arc::new)
            })
            .await
            .map_err(|e| (*e).clone())
    }

    /// Seed the cache with a known key
    pub async fn insert(&self, key: ResolvedKey) {
        self.cache.insert(key.key_id.clone(), Arc::new(key)).await;
    }

    /// Invalidate a cached key
    ///
    /// Useful when a key is known to be invalid or changed.
    pub async fn invalidate(&self, key_id: &str) {
        self.cache.invalidate(key_id).await;
        tracing::debug!(%key_id, "Invalidated public key cache entry");
    }

    /// Whether a key id is currently cached
    pub fn contains(&self, key_id: &str) -> bool {
        self.cache.contains_key(key_id)
    }
}

/// Loopback, private, link-local, shared, multicast and unspecified space.
/// IPv4-mapped IPv6 addresses are judged as the IPv4 address they carry.
fn is_internal_address(ip: IpAddr) -> bool {
    match ip.to_canonical() {
        IpAddr::V4(v4) => {
            let [a, b, ..] = v4.octets();
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_multicast()
                || v4.is_broadcast()
                || v4.is_unspecified()
                || (a == 100 && (64..128).contains(&b))
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unique_local()
                || v6.is_unicast_link_local()
                || v6.is_multicast()
                || v6.is_unspecified()
        }
    }
}

fn is_internal_host<S: AsRef<str>>(host: &url::Host<S>) -> bool {
    match host {
        url::Host::Domain(domain) => {
            let domain = domain.as_ref().trim_end_matches('.').to_ascii_lowercase();
            domain == "localhost" || domain.ends_with(".localhost")
        }
        url::Host::Ipv4(v4) => is_internal_address(IpAddr::V4(*v4)),
        url::Host::Ipv6(v6) => is_internal_address(IpAddr::V6(*v6)),
    }
}

/// Every address `host` resolves to must be public
async fn ensure_public_resolution(host: &str, port: u16) -> Result<(), Rejection> {
    let addresses: Vec<IpAddr> = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| {
            Rejection::KeyResolutionFailed(format!("Failed to resolve actor host: {}", e))
        })?
        .map(|addr| addr.ip())
        .collect();

    if addresses.is_empty() {
        return Err(Rejection::KeyResolutionFailed(format!(
            "No addresses for actor host {}",
            host
        )));
    }

    match addresses.into_iter().find(|ip| is_internal_address(*ip)) {
        Some(ip) => Err(Rejection::KeyResolutionFailed(format!(
            "Actor host {} resolves to internal address {}",
            host, ip
        ))),
        None => Ok(()),
    }
}

/// Validate a key id and return the actor document URL it points to.
///
/// This rejects non-HTTP(S) URLs and, unless allowed, local/private hosts.
async fn actor_document_url(key_id: &str, allow_private_hosts: bool) -> Result<url::Url, Rejection> {
    let actor_url = actor_id_from_key_id(key_id);
    let parsed = url::Url::parse(actor_url)
        .map_err(|e| Rejection::KeyResolutionFailed(format!("Invalid key id: {}", e)))?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(Rejection::KeyResolutionFailed(format!(
                "Unsupported key id scheme: {}",
                scheme
            )));
        }
    }

    if allow_private_hosts {
        return Ok(parsed);
    }

    let host = parsed
        .host()
        .ok_or_else(|| Rejection::KeyResolutionFailed("Missing host in key id".to_string()))?;
    if is_internal_host(&host) {
        return Err(Rejection::KeyResolutionFailed(format!(
            "Key id host {} is not allowed",
            host
        )));
    }

    if let url::Host::Domain(domain) = host {
        let port = parsed.port_or_known_default().ok_or_else(|| {
            Rejection::KeyResolutionFailed("Missing port in key id".to_string())
        })?;
        ensure_public_resolution(domain, port).await?;
    }

    Ok(parsed)
}

/// Fetch public key from key ID URL
///
/// # Arguments
/// * `key_id` - Full URL to the key (e.g., actor#main-key)
/// * `http_client` - HTTP client, carrying the fetch timeout
/// * `allow_private_hosts` - Skip the loopback/private address checks
pub async fn fetch_public_key(
    key_id: &str,
    http_client: &reqwest::Client,
    allow_private_hosts: bool,
) -> Result<ResolvedKey, Rejection> {
    let actor_url = actor_document_url(key_id, allow_private_hosts).await?;

    let response = http_client
        .get(actor_url.clone())
        .header(
            "Accept",
            "application/activity+json, application/ld+json",
        )
        .send()
        .await
        .map_err(|e| Rejection::KeyResolutionFailed(format!("Failed to fetch actor: {}", e)))?;

    if !response.status().is_success() {
        return Err(Rejection::KeyResolutionFailed(format!(
            "Failed to fetch actor: HTTP {}",
            response.status()
        )));
    }

    let actor: serde_json::Value = response
        .json()
        .await
        .map_err(|e| Rejection::KeyResolutionFailed(format!("Failed to parse actor: {}", e)))?;

    key_from_actor_document(key_id, &actor)
}

/// Extract the key published under `key_id` from an actor document
///
/// The key's owner is always the actor `key_id` points at. A document that
/// names any other actor, as `id` or `publicKey.owner`, is refused.
pub fn key_from_actor_document(
    key_id: &str,
    actor: &serde_json::Value,
) -> Result<ResolvedKey, Rejection> {
    let owner = actor_id_from_key_id(key_id);

    let public_key = match actor.get("publicKey") {
        Some(serde_json::Value::Array(keys)) => keys
            .iter()
            .find(|key| key.get("id").and_then(|id| id.as_str()) == Some(key_id))
            .ok_or_else(|| {
                Rejection::KeyResolutionFailed(format!("Actor does not publish key {}", key_id))
            })?,
        Some(key) => key,
        None => {
            return Err(Rejection::KeyResolutionFailed(
                "Missing publicKey in actor".to_string(),
            ));
        }
    };

    // If a key fragment is provided, ensure actor advertises exactly that key id.
    if key_id.contains('#') {
        let advertised_key_id = public_key
            .get("id")
            .and_then(|id| id.as_str())
            .ok_or_else(|| {
                Rejection::KeyResolutionFailed("Missing publicKey.id in actor".to_string())
            })?;

        if advertised_key_id != key_id {
            return Err(Rejection::KeyResolutionFailed(
                "Signature keyId does not match actor public key id".to_string(),
            ));
        }
    }

    for claimed in [actor.get("id"), public_key.get("owner")].into_iter().flatten() {
        if claimed.as_str() != Some(owner) {
            return Err(Rejection::KeyResolutionFailed(format!(
                "Actor document claims {} but key {} belongs to {}",
                claimed, key_id, owner
            )));
        }
    }

    let public_key_pem = public_key
        .get("publicKeyPem")
        .and_then(|pem| pem.as_str())
        .ok_or_else(|| {
            Rejection::KeyResolutionFailed("Missing publicKeyPem in actor".to_string())
        })?;

    ResolvedKey::from_pem(key_id, owner, public_key_pem).map_err(Rejection::KeyResolutionFailed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FederationConfig;
    use axum::{Json, Router, routing::get};
    use rsa::RsaPrivateKey;
    use rsa::pkcs8::{EncodePublicKey, LineEnding};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const KEY_PATH: &str = "/api/v1/activitypub/user/alice";

    fn test_public_key_pem() -> String {
        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, 1024).expect("key generation should work");
        RsaPublicKey::from(&private_key)
            .to_public_key_pem(LineEnding::LF)
            .expect("public key pem")
    }

    fn settings(allow_private_hosts: bool) -> FederationSettings {
        let config = FederationConfig {
            allow_private_hosts,
            fetch_timeout_seconds: 2,
            ..FederationConfig::default()
        };
        FederationSettings::from_config(&config).expect("valid settings")
    }

    fn actor_document(base: &str, pem: &str) -> serde_json::Value {
        let id = format!("{}{}", base, KEY_PATH);
        serde_json::json!({
            "@context": ["https://www.w3.org/ns/activitystreams", "https://w3id.org/security/v1"],
            "id": id,
            "type": "Person",
            "publicKey": {
                "id": format!("{}#main-key", id),
                "owner": id,
                "publicKeyPem": pem,
            }
        })
    }

    /// Serve one actor document, counting hits and delaying each response.
    async fn spawn_key_server(delay: Duration) -> (String, Arc<AtomicUsize>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let base = format!("http://{}", listener.local_addr().expect("addr"));
        let hits = Arc::new(AtomicUsize::new(0));
        let document = actor_document(&base, &test_public_key_pem());

        let counter = hits.clone();
        let app = Router::new().route(
            KEY_PATH,
            get(move || {
                let counter = counter.clone();
                let document = document.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(delay).await;
                    Json(document)
                }
            }),
        );
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve");
        });

        (base, hits)
    }

    #[tokio::test]
    async fn concurrent_lookups_share_one_fetch() {
        let (base, hits) = spawn_key_server(Duration::from_millis(200)).await;
        let cache = Arc::new(PublicKeyCache::from_settings(&settings(true)).expect("cache"));
        let key_id = format!("{}{}#main-key", base, KEY_PATH);

        let lookups = (0..8).map(|_| {
            let cache = cache.clone();
            let key_id = key_id.clone();
            tokio::spawn(async move { cache.get(&key_id).await })
        });
        let results = futures::future::join_all(lookups).await;

        for result in results {
            let key = result.expect("task").expect("key should resolve");
            assert_eq!(key.owner, format!("{}{}", base, KEY_PATH));
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // Served from cache afterwards.
        cache.get(&key_id).await.expect("cached key");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(cache.contains(&key_id));
    }

    #[tokio::test]
    async fn invalidate_forces_refetch() {
        let (base, hits) = spawn_key_server(Duration::ZERO).await;
        let cache = PublicKeyCache::from_settings(&settings(true)).expect("cache");
        let key_id = format!("{}{}#main-key", base, KEY_PATH);

        cache.get(&key_id).await.expect("first fetch");
        cache.invalidate(&key_id).await;
        cache.get(&key_id).await.expect("second fetch");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn private_hosts_are_refused_by_default() {
        let (base, hits) = spawn_key_server(Duration::ZERO).await;
        let cache = PublicKeyCache::from_settings(&settings(false)).expect("cache");

        match cache.get(&format!("{}{}#main-key", base, KEY_PATH)).await {
            Err(Rejection::KeyResolutionFailed(msg)) => assert!(msg.contains("not allowed")),
            other => panic!("expected key resolution failure, got: {other:?}"),
        }
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_document_fails_resolution() {
        let (base, _hits) = spawn_key_server(Duration::ZERO).await;
        let cache = PublicKeyCache::from_settings(&settings(true)).expect("cache");

        match cache
            .get(&format!("{}/api/v1/activitypub/user/nobody#main-key", base))
            .await
        {
            Err(Rejection::KeyResolutionFailed(msg)) => assert!(msg.contains("HTTP 404")),
            other => panic!("expected key resolution failure, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn fetch_times_out() {
        let (base, _hits) = spawn_key_server(Duration::from_secs(5)).await;
        let mut config = FederationConfig {
            allow_private_hosts: true,
            ..FederationConfig::default()
        };
        config.fetch_timeout_seconds = 1;
        let settings = FederationSettings::from_config(&config).expect("settings");
        let cache = PublicKeyCache::from_settings(&settings).expect("cache");

        let result = cache.get(&format!("{}{}#main-key", base, KEY_PATH)).await;
        assert!(matches!(result, Err(Rejection::KeyResolutionFailed(_))));
    }

    #[test]
    fn document_key_id_must_match() {
        let document = actor_document("https://remote.example", &test_public_key_pem());
        let result = key_from_actor_document(
            "https://remote.example/api/v1/activitypub/user/alice#other-key",
            &document,
        );
        match result {
            Err(Rejection::KeyResolutionFailed(msg)) => assert!(msg.contains("does not match")),
            other => panic!("expected key id mismatch, got: {other:?}"),
        }
    }

    #[test]
    fn document_with_key_array_picks_matching_key() {
        let pem = test_public_key_pem();
        let document = serde_json::json!({
            "id": "https://remote.example/actor",
            "publicKey": [
                {"id": "https://remote.example/actor#old", "publicKeyPem": "garbage"},
                {"id": "https://remote.example/actor#main-key", "publicKeyPem": pem},
            ]
        });
        let key = key_from_actor_document(
            "https://remote.example/actor#main-key",
            &document,
        )
        .expect("key should resolve");
        assert_eq!(key.owner, "https://remote.example/actor");
        assert_eq!(key.public_key_pem, pem);
    }

    #[test]
    fn malformed_pem_fails_resolution() {
        let document = actor_document("https://remote.example", "-----BEGIN PUBLIC KEY-----\nnope");
        let result = key_from_actor_document(
            "https://remote.example/api/v1/activitypub/user/alice#main-key",
            &document,
        );
        assert!(matches!(result, Err(Rejection::KeyResolutionFailed(_))));
    }

    #[test]
    fn document_claiming_another_owner_is_refused() {
        let victim = "https://victim.example/api/v1/activitypub/user/admin";
        let document = serde_json::json!({
            "id": "https://evil.example/actor",
            "publicKey": {
                "id": "https://evil.example/actor#main-key",
                "owner": victim,
                "publicKeyPem": test_public_key_pem(),
            }
        });

        let result = key_from_actor_document("https://evil.example/actor#main-key", &document);
        match result {
            Err(Rejection::KeyResolutionFailed(msg)) => assert!(msg.contains(victim)),
            other => panic!("expected owner mismatch, got: {other:?}"),
        }
    }

    #[test]
    fn document_claiming_another_id_is_refused() {
        let document = serde_json::json!({
            "id": "https://victim.example/api/v1/activitypub/user/admin",
            "publicKey": {
                "id": "https://evil.example/actor#main-key",
                "publicKeyPem": test_public_key_pem(),
            }
        });

        let result = key_from_actor_document("https://evil.example/actor#main-key", &document);
        assert!(matches!(result, Err(Rejection::KeyResolutionFailed(_))));
    }

    #[test]
    fn owner_defaults_to_key_id_actor() {
        let document = serde_json::json!({
            "publicKey": {
                "id": "https://remote.example/actor#main-key",
                "publicKeyPem": test_public_key_pem(),
            }
        });

        let key = key_from_actor_document("https://remote.example/actor#main-key", &document)
            .expect("key should resolve");
        assert_eq!(key.owner, "https://remote.example/actor");
    }

    #[test]
    fn internal_hosts() {
        let internal = |host: &str| is_internal_host(&url::Host::parse(host).expect("host"));

        assert!(internal("localhost"));
        assert!(internal("api.localhost."));
        assert!(internal("127.0.0.1"));
        assert!(internal("192.168.1.10"));
        assert!(internal("100.64.0.1"));
        assert!(internal("[::1]"));
        assert!(internal("[::ffff:127.0.0.1]"));
        assert!(internal("[fe80::1]"));
        assert!(!internal("example.com"));
        assert!(!internal("93.184.216.34"));
        assert!(!internal("[2606:4700::1]"));
    }

    #[tokio::test]
    async fn non_http_key_ids_are_refused() {
        match actor_document_url("ftp://remote.example/users/alice#main-key", true).await {
            Err(Rejection::KeyResolutionFailed(msg)) => assert!(msg.contains("scheme")),
            other => panic!("expected scheme rejection, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn resolved_loopback_is_refused() {
        let result = ensure_public_resolution("localhost", 80).await;
        assert!(matches!(result, Err(Rejection::KeyResolutionFailed(_))));
    }
}
