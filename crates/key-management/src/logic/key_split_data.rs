//! Attach, merge and verify the per-coordinator attestations carried by a key.

use std::collections::{BTreeMap, HashSet};

use base64::Engine;
use shared::{error::CommonError, primitives::WrappedChronoDateTime};

use super::encryption_key::{EncryptionKey, KeySplitData};
use super::signing::{PublicKeySign, PublicKeyVerify};

#[derive(Debug, thiserror::Error)]
pub enum KeySplitDataError {
    #[error("key split data missing for coordinator {0}")]
    MissingCoordinator(String),
    #[error("signature verification failed for coordinator {0}")]
    VerificationFailed(String),
}

impl From<KeySplitDataError> for CommonError {
    fn from(error: KeySplitDataError) -> Self {
        CommonError::invalid_argument_with_source(error.to_string(), error)
    }
}

/// The message every coordinator signs: `key_id|creation_time|public_key_material`.
pub fn signature_message(
    key_id: &str,
    creation_time: &WrappedChronoDateTime,
    public_key_material: &str,
) -> String {
    format!(
        "{key_id}|{}|{public_key_material}",
        creation_time.to_iso8601()
    )
}

fn key_signature_message(key: &EncryptionKey) -> String {
    signature_message(&key.key_id, &key.creation_time, &key.public_key_material)
}

/// Append this coordinator's entry. Existing entries are left alone, even one
/// for the same URI.
pub fn add_key_split_data(
    mut key: EncryptionKey,
    key_encryption_key_uri: &str,
    signer: Option<&dyn PublicKeySign>,
) -> Result<EncryptionKey, CommonError> {
    let public_key_signature = match signer {
        Some(signer) => {
            let signature = signer.sign(key_signature_message(&key).as_bytes())?;
            base64::engine::general_purpose::STANDARD.encode(signature)
        }
        None => String::new(),
    };

    key.key_split_data.push(KeySplitData {
        key_split_key_encryption_key_uri: key_encryption_key_uri.to_string(),
        public_key_signature,
    });
    Ok(key)
}

/// Union by KEK URI. Order of first appearance is kept and the first entry
/// for a URI wins.
pub fn combine_key_split_data(first: &[KeySplitData], second: &[KeySplitData]) -> Vec<KeySplitData> {
    let mut seen = HashSet::new();
    first
        .iter()
        .chain(second.iter())
        .filter(|data| seen.insert(data.key_split_key_encryption_key_uri.as_str()))
        .cloned()
        .collect()
}

/// Check that every listed coordinator signed this key. All or nothing.
pub fn verify_encryption_key_signatures(
    key: &EncryptionKey,
    verifiers: &BTreeMap<String, &dyn PublicKeyVerify>,
) -> Result<(), KeySplitDataError> {
    let message = key_signature_message(key);

    for (uri, verifier) in verifiers {
        let data = key
            .find_key_split_data(uri)
            .ok_or_else(|| KeySplitDataError::MissingCoordinator(uri.clone()))?;

        let signature = base64::engine::general_purpose::STANDARD
            .decode(&data.public_key_signature)
            .map_err(|_| KeySplitDataError::VerificationFailed(uri.clone()))?;

        verifier
            .verify(&signature, message.as_bytes())
            .map_err(|_| KeySplitDataError::VerificationFailed(uri.clone()))?;
    }

    Ok(())
}

#[cfg(all(test, feature = "unit_test"))]
mod unit_test {
    use super::*;
    use crate::logic::encryption_key::KeyType;
    use crate::logic::signing::Ed25519Signer;
    use chrono::TimeZone;

    const URI_A: &str = "local-kek:///keys/a";
    const URI_B: &str = "local-kek:///keys/b";

    fn unsigned_key() -> EncryptionKey {
        let created = chrono::Utc.timestamp_millis_opt(1_714_521_600_123).unwrap();
        EncryptionKey {
            key_id: "K1".to_string(),
            public_key: "cHVi".to_string(),
            public_key_material: "PKM".to_string(),
            key_encryption_key_uri: String::new(),
            encrypted_private_material: String::new(),
            key_split_data: vec![],
            key_type: KeyType::MultiPartyHybridEvenKeysplit,
            creation_time: WrappedChronoDateTime::new(created),
            activation_time: WrappedChronoDateTime::new(created),
            expiration_time: WrappedChronoDateTime::new(created + chrono::Duration::days(8)),
            ttl_time: WrappedChronoDateTime::new(created + chrono::Duration::days(365)),
        }
    }

    fn entry(uri: &str, signature: &str) -> KeySplitData {
        KeySplitData {
            key_split_key_encryption_key_uri: uri.to_string(),
            public_key_signature: signature.to_string(),
        }
    }

    #[test]
    fn test_signature_message_format() {
        let key = unsigned_key();
        assert_eq!(
            signature_message(&key.key_id, &key.creation_time, &key.public_key_material),
            "K1|2024-05-01T00:00:00.123Z|PKM"
        );
    }

    #[test]
    fn test_add_without_signer_leaves_signature_empty() {
        let key = add_key_split_data(unsigned_key(), URI_A, None).unwrap();
        assert_eq!(key.key_split_data, vec![entry(URI_A, "")]);
    }

    #[test]
    fn test_add_appends_even_for_duplicate_uri() {
        let signer = Ed25519Signer::generate();
        let key = add_key_split_data(unsigned_key(), URI_A, Some(&signer)).unwrap();
        let key = add_key_split_data(key, URI_A, Some(&signer)).unwrap();
        assert_eq!(key.key_split_data.len(), 2);
        assert!(
            key.key_split_data
                .iter()
                .all(|data| data.key_split_key_encryption_key_uri == URI_A)
        );
    }

    #[test]
    fn test_combine_first_entry_wins() {
        let combined = combine_key_split_data(
            &[entry(URI_A, "a1"), entry(URI_B, "b1")],
            &[entry(URI_A, "a2"), entry("local-kek:///keys/c", "c1")],
        );
        assert_eq!(
            combined,
            vec![
                entry(URI_A, "a1"),
                entry(URI_B, "b1"),
                entry("local-kek:///keys/c", "c1"),
            ]
        );
    }

    #[test]
    fn test_combine_with_empty_side() {
        assert_eq!(
            combine_key_split_data(&[], &[entry(URI_A, "a")]),
            vec![entry(URI_A, "a")]
        );
        assert!(combine_key_split_data(&[], &[]).is_empty());
    }

    #[test]
    fn test_verify_signatures_from_both_coordinators() {
        let signer_a = Ed25519Signer::generate();
        let signer_b = Ed25519Signer::generate();

        let key = add_key_split_data(unsigned_key(), URI_A, Some(&signer_a)).unwrap();
        let key = add_key_split_data(key, URI_B, Some(&signer_b)).unwrap();

        let verifier_a = signer_a.verifier();
        let verifier_b = signer_b.verifier();
        let mut verifiers: BTreeMap<String, &dyn PublicKeyVerify> = BTreeMap::new();
        verifiers.insert(URI_A.to_string(), &verifier_a);
        verifiers.insert(URI_B.to_string(), &verifier_b);

        verify_encryption_key_signatures(&key, &verifiers).unwrap();
    }

    #[test]
    fn test_verify_reports_missing_coordinator() {
        let signer_a = Ed25519Signer::generate();
        let key = add_key_split_data(unsigned_key(), URI_A, Some(&signer_a)).unwrap();

        let verifier = signer_a.verifier();
        let mut verifiers: BTreeMap<String, &dyn PublicKeyVerify> = BTreeMap::new();
        verifiers.insert(URI_B.to_string(), &verifier);

        match verify_encryption_key_signatures(&key, &verifiers) {
            Err(KeySplitDataError::MissingCoordinator(uri)) => assert_eq!(uri, URI_B),
            other => panic!("expected missing coordinator, got {other:?}"),
        }
    }

    #[test]
    fn test_verify_reports_tampered_key() {
        let signer_a = Ed25519Signer::generate();
        let mut key = add_key_split_data(unsigned_key(), URI_A, Some(&signer_a)).unwrap();
        key.public_key_material = "OTHER".to_string();

        let verifier = signer_a.verifier();
        let mut verifiers: BTreeMap<String, &dyn PublicKeyVerify> = BTreeMap::new();
        verifiers.insert(URI_A.to_string(), &verifier);

        match verify_encryption_key_signatures(&key, &verifiers) {
            Err(KeySplitDataError::VerificationFailed(uri)) => assert_eq!(uri, URI_A),
            other => panic!("expected verification failure, got {other:?}"),
        }
    }

    fn both_signed() -> (EncryptionKey, Ed25519Signer, Ed25519Signer) {
        let signer_a = Ed25519Signer::generate();
        let signer_b = Ed25519Signer::generate();
        let key = add_key_split_data(unsigned_key(), URI_A, Some(&signer_a)).unwrap();
        let key = add_key_split_data(key, URI_B, Some(&signer_b)).unwrap();
        (key, signer_a, signer_b)
    }

    fn verify_both(
        key: &EncryptionKey,
        signer_a: &Ed25519Signer,
        signer_b: &Ed25519Signer,
    ) -> Result<(), KeySplitDataError> {
        let verifier_a = signer_a.verifier();
        let verifier_b = signer_b.verifier();
        let mut verifiers: BTreeMap<String, &dyn PublicKeyVerify> = BTreeMap::new();
        verifiers.insert(URI_A.to_string(), &verifier_a);
        verifiers.insert(URI_B.to_string(), &verifier_b);
        verify_encryption_key_signatures(key, &verifiers)
    }

    #[test]
    fn test_verify_rejects_changed_key_id() {
        let (mut key, signer_a, signer_b) = both_signed();
        verify_both(&key, &signer_a, &signer_b).unwrap();

        key.key_id = "K2".to_string();
        match verify_both(&key, &signer_a, &signer_b) {
            Err(KeySplitDataError::VerificationFailed(uri)) => assert_eq!(uri, URI_A),
            other => panic!("expected verification failure, got {other:?}"),
        }
    }

    #[test]
    fn test_verify_rejects_changed_creation_time() {
        let (mut key, signer_a, signer_b) = both_signed();

        // one millisecond is enough, the signed rendering carries millis
        key.creation_time = WrappedChronoDateTime::new(
            *key.creation_time.get_inner() + chrono::Duration::milliseconds(1),
        );
        match verify_both(&key, &signer_a, &signer_b) {
            Err(KeySplitDataError::VerificationFailed(uri)) => assert_eq!(uri, URI_A),
            other => panic!("expected verification failure, got {other:?}"),
        }
    }

    #[test]
    fn test_verify_names_coordinator_with_corrupted_signature() {
        let (mut key, signer_a, signer_b) = both_signed();

        let entry_b = key
            .key_split_data
            .iter_mut()
            .find(|data| data.key_split_key_encryption_key_uri == URI_B)
            .unwrap();
        let mut signature = base64::engine::general_purpose::STANDARD
            .decode(&entry_b.public_key_signature)
            .unwrap();
        signature[0] ^= 0xff;
        signature[31] ^= 0x01;
        entry_b.public_key_signature = base64::engine::general_purpose::STANDARD.encode(signature);

        match verify_both(&key, &signer_a, &signer_b) {
            Err(KeySplitDataError::VerificationFailed(uri)) => assert_eq!(uri, URI_B),
            other => panic!("expected verification failure for {URI_B}, got {other:?}"),
        }
    }

    #[test]
    fn test_verify_rejects_wrong_signer() {
        let signer_a = Ed25519Signer::generate();
        let other = Ed25519Signer::generate();
        let key = add_key_split_data(unsigned_key(), URI_A, Some(&signer_a)).unwrap();

        let verifier = other.verifier();
        let mut verifiers: BTreeMap<String, &dyn PublicKeyVerify> = BTreeMap::new();
        verifiers.insert(URI_A.to_string(), &verifier);

        let err: CommonError = verify_encryption_key_signatures(&key, &verifiers)
            .unwrap_err()
            .into();
        assert_eq!(err.kind(), shared::error::ErrorKind::InvalidArgument);
        assert!(err.to_string().contains(URI_A));
    }
}
