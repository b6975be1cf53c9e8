//! Signing client
//!
//! Builds and sends signed deliveries on behalf of one local actor.

use std::sync::Arc;
use std::time::Duration;

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use chrono::Utc;
use http::header::{CONTENT_TYPE, DATE, HOST, USER_AGENT};
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use rsa::RsaPrivateKey;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey;

use super::algorithm::{KeyType, SignatureAlgorithm};
use super::signature::{
    ACTIVITY_STREAMS_CONTENT_TYPE, SIGNATURE_EXPIRATION_SECS, SignatureParams, http_date,
    path_and_query, signing_string,
};
use crate::config::FederationSettings;
use crate::data::KeyMaterial;
use crate::error::AppError;
use crate::metrics::{DELIVERIES_TOTAL, FEDERATION_REQUEST_DURATION_SECONDS, SIGNED_REQUESTS_TOTAL};

/// `User-Agent` sent with every federation request
pub const USER_AGENT_VALUE: &str = concat!("fedsig/", env!("CARGO_PKG_VERSION"));

static DIGEST: HeaderName = HeaderName::from_static("digest");
static SIGNATURE: HeaderName = HeaderName::from_static("signature");

/// Build an HTTP client for federation traffic
///
/// Only the configured proxy is used; environment proxy variables are ignored.
pub fn build_http_client(
    settings: &FederationSettings,
    timeout: Duration,
) -> Result<reqwest::Client, AppError> {
    let builder = reqwest::Client::builder()
        .user_agent(USER_AGENT_VALUE)
        .timeout(timeout);

    let builder = match settings.proxy() {
        Some(proxy) => builder.proxy(
            reqwest::Proxy::all(proxy.as_str())
                .map_err(|e| AppError::Config(format!("Invalid federation proxy: {}", e)))?,
        ),
        None => builder.no_proxy(),
    };

    builder.build().map_err(|e| AppError::Internal(e.into()))
}

/// Decode a stored private key
///
/// Keys are stored as PKCS#1 PEM; PKCS#8 PEM is accepted as well.
pub fn decode_private_key(private_key_pem: &str) -> Result<RsaPrivateKey, AppError> {
    let pem = private_key_pem.trim();
    let key = RsaPrivateKey::from_pkcs1_pem(pem)
        .or_else(|pkcs1_error| {
            RsaPrivateKey::from_pkcs8_pem(pem).map_err(|_| pkcs1_error)
        })
        .map_err(|e| AppError::KeyMaterial(format!("Invalid private key: {}", e)))?;

    key.validate()
        .map_err(|e| AppError::KeyMaterial(format!("Inconsistent private key: {}", e)))?;

    Ok(key)
}

/// Signing client for one actor
///
/// Cheap to clone; the HTTP client is a shared connection pool.
#[derive(Clone)]
pub struct SigningClient {
    http_client: reqwest::Client,
    settings: Arc<FederationSettings>,
    private_key: RsaPrivateKey,
    /// Full URL to the public key (actor#main-key)
    key_id: String,
}

impl SigningClient {
    /// Create a client with its own connection pool
    ///
    /// # Errors
    /// - `AppError::KeyMaterial` if the private key cannot be decoded
    pub fn new(
        keys: &KeyMaterial,
        key_id: impl Into<String>,
        settings: Arc<FederationSettings>,
    ) -> Result<Self, AppError> {
        let http_client = build_http_client(&settings, settings.delivery_timeout())?;
        Self::with_http_client(keys, key_id, settings, http_client)
    }

    /// Create a client sharing an existing connection pool
    pub fn with_http_client(
        keys: &KeyMaterial,
        key_id: impl Into<String>,
        settings: Arc<FederationSettings>,
        http_client: reqwest::Client,
    ) -> Result<Self, AppError> {
        let private_key = decode_private_key(keys.private_key_pem())?;

        Ok(Self {
            http_client,
            settings,
            private_key,
            key_id: key_id.into(),
        })
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Build a signed POST of `body` to `target`
    ///
    /// Sets `Content-Type`, `Date`, `User-Agent` and `Digest`, then signs the
    /// configured POST header set with a 60 second expiry.
    ///
    /// # Errors
    /// - `AppError::Validation` if `target` is not a URL
    /// - `AppError::Signing` if no configured algorithm fits the key or
    ///   signing fails
    pub fn build_signed_request(
        &self,
        body: &[u8],
        target: &str,
    ) -> Result<reqwest::Request, AppError> {
        let url = url::Url::parse(target)
            .map_err(|e| AppError::Validation(format!("Invalid target URL: {}", e)))?;

        let algorithm = SignatureAlgorithm::negotiate(self.settings.algorithms(), KeyType::Rsa)
            .ok_or_else(|| {
                AppError::Signing("No acceptable signature algorithm for an RSA key".to_string())
            })?;

        let now = Utc::now();
        let created = now.timestamp();
        let expires = created + SIGNATURE_EXPIRATION_SECS;
        let covered = self.settings.post_headers();

        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static(ACTIVITY_STREAMS_CONTENT_TYPE),
        );
        headers.insert(DATE, header_value(&http_date(now))?);
        headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));
        headers.insert(
            DIGEST.clone(),
            header_value(&self.settings.digest_algorithm().header_value(body))?,
        );
        if covered.iter().any(|name| name == "host") {
            headers.insert(HOST, header_value(&host_header(&url)?)?);
        }

        let signing = signing_string(
            covered,
            &Method::POST,
            &path_and_query(&url),
            &headers,
            Some(created),
            Some(expires),
        )
        .map_err(|missing| {
            AppError::Signing(format!("Cannot sign {}: not set on the request", missing))
        })?;

        let signature = algorithm.sign_rsa(&self.private_key, signing.as_bytes())?;

        let params = SignatureParams {
            key_id: self.key_id.clone(),
            algorithm: Some(algorithm.name().to_string()),
            headers: covered.to_vec(),
            signature: BASE64.encode(signature),
            created: Some(created),
            expires: Some(expires),
        };
        headers.insert(SIGNATURE.clone(), header_value(&params.to_header_value())?);

        let request = self
            .http_client
            .post(url)
            .headers(headers)
            .body(body.to_vec())
            .build()
            .map_err(|e| AppError::Signing(format!("Failed to build request: {}", e)))?;

        SIGNED_REQUESTS_TOTAL.inc();
        tracing::debug!(key_id = %self.key_id, %target, %algorithm, "Signed delivery request");

        Ok(request)
    }

    /// Sign and POST `body` to `target`
    ///
    /// No retries; a failed attempt is returned to the caller.
    ///
    /// # Errors
    /// - `AppError::Validation` if `body` exceeds the configured maximum size
    /// - `AppError::Transport` on network failure, timeout, or non-2xx status
    pub async fn deliver(&self, body: &[u8], target: &str) -> Result<reqwest::Response, AppError> {
        if body.len() > self.settings.max_size() {
            return Err(AppError::Validation(format!(
                "Payload of {} bytes exceeds maximum of {} bytes",
                body.len(),
                self.settings.max_size()
            )));
        }

        let request = self.build_signed_request(body, target)?;

        let _timer = FEDERATION_REQUEST_DURATION_SECONDS
            .with_label_values(&["outbound"])
            .start_timer();

        let result = self
            .http_client
            .execute(request)
            .await
            .and_then(|response| response.error_for_status());

        match result {
            Ok(response) => {
                DELIVERIES_TOTAL.with_label_values(&["success"]).inc();
                tracing::info!(%target, status = %response.status(), "Delivered activity");
                Ok(response)
            }
            Err(error) => {
                DELIVERIES_TOTAL.with_label_values(&["failure"]).inc();
                tracing::warn!(%target, %error, "Delivery failed");
                Err(AppError::Transport(error))
            }
        }
    }
}

fn header_value(value: &str) -> Result<HeaderValue, AppError> {
    HeaderValue::from_str(value)
        .map_err(|e| AppError::Signing(format!("Invalid header value: {}", e)))
}

fn host_header(url: &url::Url) -> Result<String, AppError> {
    let host = url
        .host_str()
        .ok_or_else(|| AppError::Validation("Missing host in target URL".to_string()))?;

    Ok(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}
