//! Data models
//!
//! Local actors and the key material they own.

use std::fmt;

use chrono::{DateTime, Utc};
use rsa::pkcs1::EncodeRsaPrivateKey;
use rsa::pkcs8::{EncodePublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};

use crate::error::AppError;

/// Path under which actor documents are served
pub const ACTOR_PATH_PREFIX: &str = "/api/v1/activitypub/user";

// =============================================================================
// Key material
// =============================================================================

/// An actor's RSA key pair
///
/// The private key is PKCS#1 PEM and never leaves the owning actor record.
/// The public key is SPKI PEM (`-----BEGIN PUBLIC KEY-----`) and is published
/// in the actor document.
#[derive(Clone)]
pub struct KeyMaterial {
    private_key_pem: String,
    public_key_pem: String,
}

impl KeyMaterial {
    /// Generate a fresh key pair
    ///
    /// CPU-bound; call from a blocking context.
    pub fn generate(bits: usize) -> Result<Self, AppError> {
        let mut rng = rand::thread_rng();
        let private_key =
            RsaPrivateKey::new(&mut rng, bits).map_err(|e| AppError::Internal(e.into()))?;
        let public_key = RsaPublicKey::from(&private_key);

        let private_key_pem = private_key
            .to_pkcs1_pem(LineEnding::LF)
            .map_err(|e| AppError::Internal(e.into()))?
            .to_string();
        let public_key_pem = public_key
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| AppError::Internal(e.into()))?;

        Ok(Self {
            private_key_pem,
            public_key_pem,
        })
    }

    /// Wrap stored PEM strings without decoding them
    pub fn from_pem(private_key_pem: String, public_key_pem: String) -> Self {
        Self {
            private_key_pem,
            public_key_pem,
        }
    }

    pub fn private_key_pem(&self) -> &str {
        &self.private_key_pem
    }

    pub fn public_key_pem(&self) -> &str {
        &self.public_key_pem
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("private_key_pem", &"<redacted>")
            .field("public_key_pem", &self.public_key_pem)
            .finish()
    }
}

// =============================================================================
// Actor
// =============================================================================

/// A local federated identity
#[derive(Debug, Clone)]
pub struct Actor {
    pub username: String,
    pub keys: KeyMaterial,
    pub created_at: DateTime<Utc>,
}

impl Actor {
    pub fn new(username: impl Into<String>, keys: KeyMaterial) -> Self {
        Self {
            username: username.into(),
            keys,
            created_at: Utc::now(),
        }
    }

    /// Public URLs of this actor under `base_url`
    pub fn urls(&self, base_url: &str) -> ActorUrls {
        ActorUrls::new(base_url, &self.username)
    }
}

/// Dereferenceable URLs of an actor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorUrls {
    /// Actor document URL
    pub id: String,
    pub inbox: String,
    pub outbox: String,
    /// `<id>#main-key`
    pub key_id: String,
}

impl ActorUrls {
    pub fn new(base_url: &str, username: &str) -> Self {
        let id = format!(
            "{}{}/{}",
            base_url.trim_end_matches('/'),
            ACTOR_PATH_PREFIX,
            username
        );
        Self {
            inbox: format!("{}/inbox", id),
            outbox: format!("{}/outbox", id),
            key_id: format!("{}#main-key", id),
            id,
        }
    }
}
