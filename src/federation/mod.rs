//! ActivityPub federation module
//!
//! Handles:
//! - HTTP Signatures (signing client and verification gate)
//! - Digest and signature algorithm negotiation
//! - Public key resolution and caching

mod algorithm;
mod client;
mod key_cache;
mod signature;
mod verifier;

pub use algorithm::{DigestAlgorithm, KeyType, SignatureAlgorithm};
pub use client::{SigningClient, USER_AGENT_VALUE, build_http_client, decode_private_key};
pub use key_cache::{PublicKeyCache, ResolvedKey, fetch_public_key, key_from_actor_document};
pub use signature::{
    ACTIVITY_STREAMS_CONTENT_TYPE, CREATED, EXPIRES, REQUEST_TARGET, SIGNATURE_EXPIRATION_SECS,
    SignatureParams, actor_id_from_key_id, current_time, http_date, parse_http_date,
    path_and_query, signing_string,
};
pub use verifier::{InboundRequest, Rejection, VerificationGate, VerificationResult, VerifiedActor};
