//! Digest and signature algorithms
//!
//! Algorithm names follow the draft-cavage HTTP Signatures registry used by
//! ActivityPub servers (`rsa-sha256`, `rsa-sha512`, `ed25519`) and the RFC 3230
//! digest names (`SHA-256`, `SHA-512`).

use std::fmt;

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::signature::{RandomizedSigner, SignatureEncoding, Verifier};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256, Sha512};

use crate::error::AppError;

/// Body digest algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
    Sha256,
    Sha512,
}

impl DigestAlgorithm {
    /// Parse a digest algorithm name (case-insensitive)
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_uppercase().as_str() {
            "SHA-256" => Some(Self::Sha256),
            "SHA-512" => Some(Self::Sha512),
            _ => None,
        }
    }

    /// Canonical name as it appears in the `Digest` header
    pub fn name(self) -> &'static str {
        match self {
            Self::Sha256 => "SHA-256",
            Self::Sha512 => "SHA-512",
        }
    }

    /// Base64 encoded hash of `body`
    pub fn encoded_hash(self, body: &[u8]) -> String {
        let hash = match self {
            Self::Sha256 => Sha256::digest(body).to_vec(),
            Self::Sha512 => Sha512::digest(body).to_vec(),
        };
        BASE64.encode(hash)
    }

    /// Full `Digest` header value
    ///
    /// # Returns
    /// `SHA-256=base64(hash)`
    pub fn header_value(self, body: &[u8]) -> String {
        format!("{}={}", self.name(), self.encoded_hash(body))
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Kind of asymmetric key an algorithm operates on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    Rsa,
    Ed25519,
}

/// HTTP signature algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureAlgorithm {
    RsaSha256,
    RsaSha512,
    Ed25519,
}

impl SignatureAlgorithm {
    /// Parse an algorithm name as used in the `Signature` header
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "rsa-sha256" => Some(Self::RsaSha256),
            "rsa-sha512" => Some(Self::RsaSha512),
            "ed25519" => Some(Self::Ed25519),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::RsaSha256 => "rsa-sha256",
            Self::RsaSha512 => "rsa-sha512",
            Self::Ed25519 => "ed25519",
        }
    }

    pub fn key_type(self) -> KeyType {
        match self {
            Self::RsaSha256 | Self::RsaSha512 => KeyType::Rsa,
            Self::Ed25519 => KeyType::Ed25519,
        }
    }

    /// Pick the first configured algorithm usable with `key_type`.
    ///
    /// The configured order is the preference order; there is no further
    /// tie-break.
    pub fn negotiate(acceptable: &[SignatureAlgorithm], key_type: KeyType) -> Option<Self> {
        acceptable
            .iter()
            .copied()
            .find(|algorithm| algorithm.key_type() == key_type)
    }

    /// Sign `message` with an RSA private key (PKCS#1 v1.5)
    pub fn sign_rsa(self, key: &RsaPrivateKey, message: &[u8]) -> Result<Vec<u8>, AppError> {
        let mut rng = rand::thread_rng();
        let signature = match self {
            Self::RsaSha256 => {
                SigningKey::<Sha256>::new(key.clone()).try_sign_with_rng(&mut rng, message)
            }
            Self::RsaSha512 => {
                SigningKey::<Sha512>::new(key.clone()).try_sign_with_rng(&mut rng, message)
            }
            Self::Ed25519 => {
                return Err(AppError::Signing(
                    "ed25519 cannot be used with an RSA key".to_string(),
                ));
            }
        }
        .map_err(|e| AppError::Signing(format!("Failed to sign request: {}", e)))?;

        Ok(signature.to_vec())
    }

    /// Verify a PKCS#1 v1.5 signature against an RSA public key
    pub fn verify_rsa(
        self,
        key: &RsaPublicKey,
        message: &[u8],
        signature: &[u8],
    ) -> Result<(), String> {
        let signature = Signature::try_from(signature)
            .map_err(|e| format!("Invalid signature format: {}", e))?;

        let result = match self {
            Self::RsaSha256 => VerifyingKey::<Sha256>::new(key.clone()).verify(message, &signature),
            Self::RsaSha512 => VerifyingKey::<Sha512>::new(key.clone()).verify(message, &signature),
            Self::Ed25519 => {
                return Err("ed25519 signature cannot be checked with an RSA key".to_string());
            }
        };

        result.map_err(|_| "Signature verification failed".to_string())
    }
}

impl fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
