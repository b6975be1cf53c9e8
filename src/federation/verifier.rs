//! Verification gate
//!
//! Decides whether an inbound delivery is authentically signed by the actor
//! it claims to come from. Each request moves through
//! headers → key resolution → digest → freshness → signature and ends
//! either accepted or rejected with a specific reason. Nothing is retried.

use std::sync::Arc;

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, Utc};
use http::{HeaderMap, Method};
use thiserror::Error;

use super::algorithm::{KeyType, SignatureAlgorithm};
use super::key_cache::{PublicKeyCache, ResolvedKey};
use super::signature::{
    CREATED, EXPIRES, REQUEST_TARGET, SignatureParams, header_value, parse_http_date,
    signing_string,
};
use crate::config::FederationSettings;
use crate::metrics::VERIFICATIONS_TOTAL;

/// Why an inbound request was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    /// A required header is absent or not covered by the signature
    #[error("missing headers: {0}")]
    MissingHeaders(String),

    /// The signer's public key could not be obtained
    #[error("key resolution failed: {0}")]
    KeyResolutionFailed(String),

    /// The body does not hash to the `Digest` header
    #[error("digest mismatch")]
    DigestMismatch,

    /// `Date` outside the skew window or signature expired
    #[error("stale request: {0}")]
    Stale(String),

    /// The signature is malformed, uses an unacceptable algorithm, or does not verify
    #[error("bad signature: {0}")]
    BadSignature(String),
}

impl Rejection {
    /// Short label used for metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            Rejection::MissingHeaders(_) => "missing_headers",
            Rejection::KeyResolutionFailed(_) => "key_resolution_failed",
            Rejection::DigestMismatch => "digest_mismatch",
            Rejection::Stale(_) => "stale",
            Rejection::BadSignature(_) => "bad_signature",
        }
    }
}

/// Identity established by an accepted request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedActor {
    /// Key id the request was signed with
    pub key_id: String,
    /// Actor owning that key
    pub actor_id: String,
}

/// Outcome of verifying one request
pub type VerificationResult = Result<VerifiedActor, Rejection>;

/// The parts of an inbound request the gate looks at
#[derive(Debug, Clone, Copy)]
pub struct InboundRequest<'a> {
    pub method: &'a Method,
    /// Path with query, exactly as received
    pub path_and_query: &'a str,
    pub headers: &'a HeaderMap,
    /// Body, if the method carries one (an empty POST body is `Some(&[])`)
    pub body: Option<&'a [u8]>,
}

/// Verification gate
pub struct VerificationGate {
    settings: Arc<FederationSettings>,
    keys: Arc<PublicKeyCache>,
}

impl VerificationGate {
    pub fn new(settings: Arc<FederationSettings>, keys: Arc<PublicKeyCache>) -> Self {
        Self { settings, keys }
    }

    /// Remote public key cache used during key resolution
    pub fn keys(&self) -> &PublicKeyCache {
        &self.keys
    }

    /// Verify an inbound request
    ///
    /// Any rejection is final; callers must discard the request.
    pub async fn verify(&self, request: &InboundRequest<'_>) -> VerificationResult {
        let result = self.run(request).await;

        match &result {
            Ok(actor) => {
                VERIFICATIONS_TOTAL.with_label_values(&["accepted"]).inc();
                tracing::debug!(key_id = %actor.key_id, actor = %actor.actor_id, "Signature accepted");
            }
            Err(rejection) => {
                VERIFICATIONS_TOTAL
                    .with_label_values(&[rejection.kind()])
                    .inc();
                tracing::info!(
                    path = %request.path_and_query,
                    reason = %rejection,
                    "Signature rejected"
                );
            }
        }

        result
    }

    async fn run(&self, request: &InboundRequest<'_>) -> VerificationResult {
        let params = self.check_headers(request)?;
        let key = self.keys.get(&params.key_id).await?;
        self.check_with_key(request, &params, &key, Utc::now())
    }

    /// Steps that follow key resolution, against a known key and clock
    pub fn check_with_key(
        &self,
        request: &InboundRequest<'_>,
        params: &SignatureParams,
        key: &ResolvedKey,
        now: DateTime<Utc>,
    ) -> VerificationResult {
        self.check_digest(request)?;
        self.check_freshness(request, params, now)?;
        self.check_signature(request, params, key)?;

        Ok(VerifiedActor {
            key_id: params.key_id.clone(),
            actor_id: key.owner.clone(),
        })
    }

    /// Presence of `Signature`, `Date` and `Digest`, and coverage of the
    /// configured header set
    pub fn check_headers(&self, request: &InboundRequest<'_>) -> Result<SignatureParams, Rejection> {
        let signature = request
            .headers
            .get("signature")
            .ok_or_else(|| Rejection::MissingHeaders("Signature header is absent".to_string()))?
            .to_str()
            .map_err(|_| Rejection::BadSignature("Signature header is not ASCII".to_string()))?;

        let params = SignatureParams::parse(signature).map_err(Rejection::BadSignature)?;

        if !request.headers.contains_key("date") {
            return Err(Rejection::MissingHeaders("Date header is absent".to_string()));
        }

        if request.body.is_some() {
            if !request.headers.contains_key("digest") {
                return Err(Rejection::MissingHeaders(
                    "Digest header is absent".to_string(),
                ));
            }
            if !params.headers.iter().any(|h| h == "digest") {
                return Err(Rejection::MissingHeaders(
                    "digest is not covered by the signature".to_string(),
                ));
            }
        }

        for required in self.settings.required_headers(request.method) {
            if !params.headers.contains(required) {
                return Err(Rejection::MissingHeaders(format!(
                    "{} is not covered by the signature",
                    required
                )));
            }
        }

        for covered in &params.headers {
            let present = match covered.as_str() {
                REQUEST_TARGET => true,
                CREATED => params.created.is_some(),
                EXPIRES => params.expires.is_some(),
                name => request.headers.contains_key(name),
            };
            if !present {
                return Err(Rejection::MissingHeaders(format!(
                    "covered header {} is absent",
                    covered
                )));
            }
        }

        Ok(params)
    }

    /// Recompute the body digest with the configured algorithm
    pub fn check_digest(&self, request: &InboundRequest<'_>) -> Result<(), Rejection> {
        let Some(body) = request.body else {
            return Ok(());
        };

        let algorithm = self.settings.digest_algorithm();
        let header = header_value(request.headers, "digest")
            .ok_or_else(|| Rejection::MissingHeaders("Digest header is absent".to_string()))?;

        let declared = header
            .split(',')
            .filter_map(|entry| entry.trim().split_once('='))
            .find(|(name, _)| name.trim().eq_ignore_ascii_case(algorithm.name()))
            .map(|(_, value)| value.trim())
            .ok_or(Rejection::DigestMismatch)?;

        if declared != algorithm.encoded_hash(body) {
            return Err(Rejection::DigestMismatch);
        }

        Ok(())
    }

    /// `Date` within the clock-skew window, signature not expired
    pub fn check_freshness(
        &self,
        request: &InboundRequest<'_>,
        params: &SignatureParams,
        now: DateTime<Utc>,
    ) -> Result<(), Rejection> {
        let skew = self.settings.clock_skew().as_secs();

        let date = header_value(request.headers, "date")
            .and_then(|value| parse_http_date(&value))
            .ok_or_else(|| Rejection::Stale("Date header is not an HTTP date".to_string()))?;

        if now.timestamp().abs_diff(date.timestamp()) > skew {
            return Err(Rejection::Stale(
                "Date header too old or in future".to_string(),
            ));
        }

        if let Some(expires) = params.expires {
            if expires < now.timestamp() {
                return Err(Rejection::Stale("signature has expired".to_string()));
            }
        }

        if let Some(created) = params.created {
            let latest = i64::try_from(skew)
                .ok()
                .and_then(|skew| now.timestamp().checked_add(skew))
                .unwrap_or(i64::MAX);
            if created > latest {
                return Err(Rejection::Stale(
                    "signature created in the future".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Recompute the signing string and verify it against `key`
    pub fn check_signature(
        &self,
        request: &InboundRequest<'_>,
        params: &SignatureParams,
        key: &ResolvedKey,
    ) -> Result<(), Rejection> {
        let algorithm = self.select_algorithm(params.algorithm.as_deref())?;
        if algorithm.key_type() != KeyType::Rsa {
            return Err(Rejection::BadSignature(format!(
                "{} does not match the signer's RSA key",
                algorithm
            )));
        }

        let signing = signing_string(
            &params.headers,
            request.method,
            request.path_and_query,
            request.headers,
            params.created,
            params.expires,
        )
        .map_err(|missing| {
            Rejection::MissingHeaders(format!("covered header {} is absent", missing))
        })?;

        let signature = BASE64
            .decode(&params.signature)
            .map_err(|_| Rejection::BadSignature("Invalid signature encoding".to_string()))?;

        algorithm
            .verify_rsa(&key.public_key, signing.as_bytes(), &signature)
            .map_err(Rejection::BadSignature)
    }

    /// Declared algorithm if acceptable; otherwise the negotiated one when
    /// the signer left the choice to the key (`hs2019` or no parameter)
    fn select_algorithm(&self, declared: Option<&str>) -> Result<SignatureAlgorithm, Rejection> {
        let acceptable = self.settings.algorithms();

        let selected = match declared {
            None => SignatureAlgorithm::negotiate(acceptable, KeyType::Rsa),
            Some(name) if name.eq_ignore_ascii_case("hs2019") => {
                SignatureAlgorithm::negotiate(acceptable, KeyType::Rsa)
            }
            Some(name) => {
                let algorithm = SignatureAlgorithm::parse(name).ok_or_else(|| {
                    Rejection::BadSignature(format!("Unsupported signature algorithm: {}", name))
                })?;
                acceptable.contains(&algorithm).then_some(algorithm)
            }
        };

        selected.ok_or_else(|| {
            Rejection::BadSignature(format!(
                "Signature algorithm {} is not acceptable",
                declared.unwrap_or("(unspecified)")
            ))
        })
    }
}
