use std::sync::Arc;

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit, OsRng, Payload},
};
use base64::Engine;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use shared::{error::CommonError, primitives::WrappedChronoDateTime};
use tracing::debug;
use utoipa::ToSchema;
use zeroize::Zeroizing;

use super::kek::{KeyEncryptionAead, KeyEncryptionKeyResolver};
use super::signing::{PublicKeySign, PublicKeyVerify};

const DATA_KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// A short-lived symmetric key issued by a coordinator so a peer can send it a
/// key split without holding encrypt rights on its KEK.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DataKey {
    /// Base64 ciphertext of the data key under the issuer's KEK.
    pub encrypted_data_key: String,
    pub encrypted_data_key_kek_uri: String,
    /// Base64 JSON of the issuing context, also bound into the ciphertext.
    pub data_key_context: String,
    /// Base64 issuer signature over the other three fields.
    pub message_authentication_code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct DataKeyContext {
    issuer: String,
    expires_at: WrappedChronoDateTime,
    nonce: String,
}

impl DataKey {
    fn mac_message(&self) -> String {
        mac_message(
            &self.encrypted_data_key,
            &self.encrypted_data_key_kek_uri,
            &self.data_key_context,
        )
    }

    fn context(&self) -> Result<DataKeyContext, CommonError> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(&self.data_key_context)
            .map_err(|e| {
                CommonError::invalid_argument_with_source("data key context is not base64", e)
            })?;
        serde_json::from_slice(&bytes).map_err(|e| {
            CommonError::invalid_argument_with_source("data key context is malformed", e)
        })
    }

    /// Associated data for the data key ciphertext.
    fn context_bytes(&self) -> &[u8] {
        self.data_key_context.as_bytes()
    }
}

fn mac_message(encrypted_data_key: &str, kek_uri: &str, context: &str) -> String {
    format!("{encrypted_data_key}|{kek_uri}|{context}")
}

/// Issues data keys and checks the ones handed back to it.
pub struct DataKeyExchange {
    kek: Arc<dyn KeyEncryptionAead>,
    signer: Arc<dyn PublicKeySign>,
    verifier: Arc<dyn PublicKeyVerify>,
    validity: chrono::Duration,
}

impl DataKeyExchange {
    pub fn new(
        kek: Arc<dyn KeyEncryptionAead>,
        signer: Arc<dyn PublicKeySign>,
        verifier: Arc<dyn PublicKeyVerify>,
        validity: chrono::Duration,
    ) -> Self {
        Self {
            kek,
            signer,
            verifier,
            validity,
        }
    }

    pub fn key_encryption_key_uri(&self) -> &str {
        self.kek.uri()
    }

    pub async fn issue_data_key(&self) -> Result<DataKey, CommonError> {
        let mut plaintext = Zeroizing::new(vec![0u8; DATA_KEY_LEN]);
        OsRng.fill_bytes(&mut plaintext);

        let expires_at =
            WrappedChronoDateTime::new(*WrappedChronoDateTime::now().get_inner() + self.validity);
        let context = DataKeyContext {
            issuer: self.kek.uri().to_string(),
            expires_at,
            nonce: uuid::Uuid::new_v4().to_string(),
        };
        let data_key_context =
            base64::engine::general_purpose::STANDARD.encode(serde_json::to_vec(&context)?);

        let encrypted_data_key = self
            .kek
            .encrypt(&plaintext, data_key_context.as_bytes())
            .await?;
        let encrypted_data_key_kek_uri = self.kek.uri().to_string();

        let signature = self.signer.sign(
            mac_message(
                &encrypted_data_key,
                &encrypted_data_key_kek_uri,
                &data_key_context,
            )
            .as_bytes(),
        )?;

        debug!(expires_at = %expires_at, "issued data key");

        Ok(DataKey {
            encrypted_data_key,
            encrypted_data_key_kek_uri,
            data_key_context,
            message_authentication_code: base64::engine::general_purpose::STANDARD
                .encode(signature),
        })
    }

    pub fn verify_data_key(&self, data_key: &DataKey) -> Result<(), CommonError> {
        self.verify_data_key_at(data_key, &WrappedChronoDateTime::now())
    }

    /// A data key is accepted only if this coordinator issued it, it is
    /// unmodified and it has not expired.
    pub fn verify_data_key_at(
        &self,
        data_key: &DataKey,
        now: &WrappedChronoDateTime,
    ) -> Result<(), CommonError> {
        let signature = base64::engine::general_purpose::STANDARD
            .decode(&data_key.message_authentication_code)
            .map_err(|e| {
                CommonError::invalid_argument_with_source(
                    "data key authentication code is not base64",
                    e,
                )
            })?;
        self.verifier
            .verify(&signature, data_key.mac_message().as_bytes())
            .map_err(|e| {
                CommonError::invalid_argument_with_source("data key authentication failed", e)
            })?;

        let context = data_key.context()?;
        if context.issuer != self.kek.uri() || data_key.encrypted_data_key_kek_uri != self.kek.uri()
        {
            return Err(CommonError::invalid_argument(format!(
                "data key was not issued for {}",
                self.kek.uri()
            )));
        }
        if *now >= context.expires_at {
            return Err(CommonError::invalid_argument(format!(
                "data key expired at {}",
                context.expires_at
            )));
        }

        Ok(())
    }

    /// Verify a data key and recover its plaintext under this coordinator's KEK.
    pub async fn open_data_key(&self, data_key: &DataKey) -> Result<Zeroizing<Vec<u8>>, CommonError> {
        self.verify_data_key(data_key)?;
        let plaintext = self
            .kek
            .decrypt(&data_key.encrypted_data_key, data_key.context_bytes())
            .await
            .map_err(|e| CommonError::invalid_argument_with_source("data key cannot be decrypted", e))?;
        Ok(Zeroizing::new(plaintext))
    }
}

/// Decrypt a data key under the KEK its URI names.
pub async fn decrypt_data_key(
    resolver: &dyn KeyEncryptionKeyResolver,
    data_key: &DataKey,
) -> Result<Zeroizing<Vec<u8>>, CommonError> {
    let kek = resolver.resolve(&data_key.encrypted_data_key_kek_uri).await?;
    let plaintext = kek
        .decrypt(&data_key.encrypted_data_key, data_key.context_bytes())
        .await?;
    Ok(Zeroizing::new(plaintext))
}

/// Encrypt `payload` under the plaintext of `data_key`.
pub async fn encrypt_with_data_key(
    resolver: &dyn KeyEncryptionKeyResolver,
    data_key: &DataKey,
    payload: &[u8],
    associated_data: &[u8],
) -> Result<String, CommonError> {
    let key = decrypt_data_key(resolver, data_key).await?;
    seal(&key, payload, associated_data)
}

/// AES-256-GCM under a raw data key, `nonce || ciphertext` base64 encoded.
pub fn seal(key: &[u8], payload: &[u8], associated_data: &[u8]) -> Result<String, CommonError> {
    let cipher = cipher_for(key)?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(
            nonce,
            Payload {
                msg: payload,
                aad: associated_data,
            },
        )
        .map_err(|e| CommonError::internal(format!("data key encryption failed: {e}")))?;

    let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    combined.extend_from_slice(&nonce_bytes);
    combined.extend_from_slice(&ciphertext);
    Ok(base64::engine::general_purpose::STANDARD.encode(&combined))
}

pub fn open(
    key: &[u8],
    ciphertext: &str,
    associated_data: &[u8],
) -> Result<Zeroizing<Vec<u8>>, CommonError> {
    let cipher = cipher_for(key)?;

    let encrypted = base64::engine::general_purpose::STANDARD
        .decode(ciphertext)
        .map_err(|e| CommonError::invalid_argument_with_source("ciphertext is not base64", e))?;
    if encrypted.len() < NONCE_LEN {
        return Err(CommonError::invalid_argument(
            "Invalid ciphertext format: missing nonce",
        ));
    }

    let nonce = Nonce::from_slice(&encrypted[..NONCE_LEN]);
    cipher
        .decrypt(
            nonce,
            Payload {
                msg: &encrypted[NONCE_LEN..],
                aad: associated_data,
            },
        )
        .map(Zeroizing::new)
        .map_err(|e| CommonError::invalid_argument(format!("data key decryption failed: {e}")))
}

fn cipher_for(key: &[u8]) -> Result<Aes256Gcm, CommonError> {
    if key.len() != DATA_KEY_LEN {
        return Err(CommonError::invalid_argument(format!(
            "Invalid data key length: expected {DATA_KEY_LEN} bytes, got {}",
            key.len()
        )));
    }
    Ok(Aes256Gcm::new(aes_gcm::Key::<Aes256Gcm>::from_slice(key)))
}
