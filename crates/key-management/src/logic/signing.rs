use std::path::Path;

use base64::Engine;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use shared::error::CommonError;
use tracing::info;
use zeroize::Zeroizing;

pub trait PublicKeySign: Send + Sync {
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, CommonError>;
}

pub trait PublicKeyVerify: Send + Sync {
    fn verify(&self, signature: &[u8], message: &[u8]) -> Result<(), CommonError>;
}

/// Ed25519 signer for key split attestations and data key MACs.
pub struct Ed25519Signer {
    signing_key: SigningKey,
}

impl Ed25519Signer {
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    pub fn from_seed_base64(seed: &str) -> Result<Self, CommonError> {
        let bytes = Zeroizing::new(
            base64::engine::general_purpose::STANDARD
                .decode(seed.trim())
                .map_err(|e| {
                    CommonError::invalid_argument_with_source("Signing key seed is not base64", e)
                })?,
        );
        let seed: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            CommonError::invalid_argument(format!(
                "Invalid signing key seed length: expected 32 bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self {
            signing_key: SigningKey::from_bytes(&seed),
        })
    }

    /// Load the base64 seed stored at `path`, writing a fresh one if the file is missing.
    pub fn load_or_create(path: &Path) -> Result<Self, CommonError> {
        if path.exists() {
            let seed = std::fs::read_to_string(path).map_err(|e| {
                CommonError::internal_with_source(
                    format!("Failed to read signing key file at {}", path.display()),
                    e,
                )
            })?;
            return Self::from_seed_base64(&seed);
        }

        info!("generating signing key at {}", path.display());
        let signer = Self::generate();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let seed = Zeroizing::new(
            base64::engine::general_purpose::STANDARD.encode(signer.signing_key.to_bytes()),
        );
        std::fs::write(path, seed.as_bytes()).map_err(|e| {
            CommonError::internal_with_source(
                format!("Failed to write signing key file at {}", path.display()),
                e,
            )
        })?;
        Ok(signer)
    }

    pub fn verifier(&self) -> Ed25519Verifier {
        Ed25519Verifier {
            verifying_key: self.signing_key.verifying_key(),
        }
    }

    pub fn verifying_key_base64(&self) -> String {
        self.verifier().to_base64()
    }
}

impl PublicKeySign for Ed25519Signer {
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, CommonError> {
        Ok(self.signing_key.sign(message).to_bytes().to_vec())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ed25519Verifier {
    verifying_key: VerifyingKey,
}

impl Ed25519Verifier {
    pub fn from_base64(encoded: &str) -> Result<Self, CommonError> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| {
                CommonError::invalid_argument_with_source("Verifying key is not base64", e)
            })?;
        let bytes: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            CommonError::invalid_argument(format!(
                "Invalid verifying key length: expected 32 bytes, got {}",
                bytes.len()
            ))
        })?;
        let verifying_key = VerifyingKey::from_bytes(&bytes)
            .map_err(|e| CommonError::invalid_argument_with_source("Invalid verifying key", e))?;
        Ok(Self { verifying_key })
    }

    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(self.verifying_key.as_bytes())
    }
}

impl PublicKeyVerify for Ed25519Verifier {
    fn verify(&self, signature: &[u8], message: &[u8]) -> Result<(), CommonError> {
        let signature = Signature::from_slice(signature)
            .map_err(|e| CommonError::invalid_argument_with_source("Malformed signature", e))?;
        self.verifying_key
            .verify(message, &signature)
            .map_err(|e| CommonError::invalid_argument_with_source("Signature does not verify", e))
    }
}

#[cfg(all(test, feature = "unit_test"))]
mod unit_test {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        shared::setup_test!();

        let signer = Ed25519Signer::generate();
        let signature = signer.sign(b"message").unwrap();

        let verifier = signer.verifier();
        verifier.verify(&signature, b"message").unwrap();
        assert!(verifier.verify(&signature, b"other message").is_err());
        assert!(verifier.verify(&signature[..10], b"message").is_err());
    }

    #[test]
    fn test_verifier_base64_round_trip() {
        shared::setup_test!();

        let signer = Ed25519Signer::generate();
        let encoded = signer.verifying_key_base64();
        let verifier = Ed25519Verifier::from_base64(&encoded).unwrap();
        assert_eq!(verifier, signer.verifier());

        assert!(Ed25519Verifier::from_base64("AAAA").is_err());
    }

    #[test]
    fn test_load_or_create_reuses_seed() {
        shared::setup_test!();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("signing.key");

        let first = Ed25519Signer::load_or_create(&path).unwrap();
        let second = Ed25519Signer::load_or_create(&path).unwrap();
        assert_eq!(first.verifying_key_base64(), second.verifying_key_base64());

        let signature = first.sign(b"abc").unwrap();
        second.verifier().verify(&signature, b"abc").unwrap();
    }

    #[test]
    fn test_bad_seed_is_rejected() {
        shared::setup_test!();

        assert!(Ed25519Signer::from_seed_base64("not base64!!").is_err());
        assert!(Ed25519Signer::from_seed_base64("AAAA").is_err());
    }
}
