use std::sync::Arc;

use base64::Engine;
use serde::{Deserialize, Serialize};
use shared::{error::CommonError, primitives::WrappedChronoDateTime};
use tracing::{info, warn};
use utoipa::ToSchema;
use zeroize::Zeroizing;

use super::data_key::{DataKey, DataKeyExchange};
use super::encryption_key::{EncryptionKey, KeySplitEncryptionType, split_associated_data};
use super::kek::KeyEncryptionAead;
use super::key_split_data::add_key_split_data;
use super::signing::PublicKeySign;
use crate::repository::KeyDb;

/// A key split handed over by the initiating coordinator.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateKeyRequest {
    pub key_id: String,
    /// The unsigned key, without private material.
    pub key: EncryptionKey,
    pub key_split_encryption_type: KeySplitEncryptionType,
    /// Base64 ciphertext of this coordinator's split, bound to the key's
    /// public key material.
    pub encrypted_key_split: String,
    /// Required when `key_split_encryption_type` is `DATA_KEY`.
    #[serde(default)]
    pub encrypted_key_split_data_key: Option<DataKey>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct GetEncryptionKeyResponse {
    pub key: EncryptionKey,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ListPublicKeysResponse {
    pub keys: Vec<PublicKeyEntry>,
}

/// What encrypting clients need to know about an active key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PublicKeyEntry {
    pub key_id: String,
    pub public_key_material: String,
    pub activation_time: WrappedChronoDateTime,
    pub expiration_time: WrappedChronoDateTime,
}

impl From<EncryptionKey> for PublicKeyEntry {
    fn from(key: EncryptionKey) -> Self {
        Self {
            key_id: key.key_id,
            public_key_material: key.public_key_material,
            activation_time: key.activation_time,
            expiration_time: key.expiration_time,
        }
    }
}

pub const DEFAULT_PUBLIC_KEY_LIMIT: usize = 5;

/// The receiving side of split key generation.
///
/// Accepts one split per key from the initiating coordinator, stores it
/// re-encrypted under this coordinator's KEK and countersigns the key.
pub struct KeyStorageService<R: KeyDb> {
    inner: Arc<KeyStorageServiceInner<R>>,
}

impl<R: KeyDb> Clone for KeyStorageService<R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct KeyStorageServiceInner<R: KeyDb> {
    key_db: R,
    kek: Arc<dyn KeyEncryptionAead>,
    signer: Option<Arc<dyn PublicKeySign>>,
    data_key_exchange: DataKeyExchange,
}

impl<R: KeyDb> KeyStorageService<R> {
    /// `kek` protects stored splits and must not be the KEK data keys are
    /// issued under, since the initiating coordinator decrypts data keys.
    pub fn new(
        key_db: R,
        kek: Arc<dyn KeyEncryptionAead>,
        signer: Option<Arc<dyn PublicKeySign>>,
        data_key_exchange: DataKeyExchange,
    ) -> Result<Self, CommonError> {
        if data_key_exchange.key_encryption_key_uri() == kek.uri() {
            return Err(CommonError::invalid_argument(format!(
                "data keys must be issued under a different KEK than {}",
                kek.uri()
            )));
        }
        Ok(Self {
            inner: Arc::new(KeyStorageServiceInner {
                key_db,
                kek,
                signer,
                data_key_exchange,
            }),
        })
    }

    pub fn key_db(&self) -> &R {
        &self.inner.key_db
    }

    pub fn key_encryption_key_uri(&self) -> &str {
        self.inner.kek.uri()
    }

    pub async fn get_data_key(&self) -> Result<DataKey, CommonError> {
        self.inner.data_key_exchange.issue_data_key().await
    }

    pub async fn create_key(&self, request: CreateKeyRequest) -> Result<EncryptionKey, CommonError> {
        let CreateKeyRequest {
            key_id,
            key,
            key_split_encryption_type,
            encrypted_key_split,
            encrypted_key_split_data_key,
        } = request;

        validate_incoming_key(&key_id, &key)?;

        let split = self
            .decrypt_incoming_split(
                key_split_encryption_type,
                &encrypted_key_split,
                encrypted_key_split_data_key.as_ref(),
                &key.public_key_material,
            )
            .await?;

        let encrypted_private_material = self
            .inner
            .kek
            .encrypt(&split, &[])
            .await
            .map_err(|e| CommonError::internal_with_source("Failed to re-encrypt key split", e))?;

        let key = EncryptionKey {
            encrypted_private_material,
            key_encryption_key_uri: self.inner.kek.uri().to_string(),
            ..key
        };
        let key = add_key_split_data(key, self.inner.kek.uri(), self.inner.signer.as_deref())?;

        // a key id is stored once, repeated requests must not replace the split
        self.inner.key_db.create_key(&key, false).await?;
        info!(key_id = %key.key_id, "stored key split");

        Ok(key.without_private_material())
    }

    async fn decrypt_incoming_split(
        &self,
        encryption_type: KeySplitEncryptionType,
        encrypted_key_split: &str,
        data_key: Option<&DataKey>,
        public_key_material: &str,
    ) -> Result<Zeroizing<Vec<u8>>, CommonError> {
        let associated_data = split_associated_data(public_key_material)?;
        match encryption_type {
            KeySplitEncryptionType::DataKey => {
                let data_key = data_key.ok_or_else(|| {
                    CommonError::invalid_argument("DATA_KEY split is missing its data key")
                })?;
                let plaintext_key = self.inner.data_key_exchange.open_data_key(data_key).await?;
                super::data_key::open(&plaintext_key, encrypted_key_split, &associated_data)
                .map_err(|e| {
                    CommonError::invalid_argument_with_source("Key split cannot be decrypted", e)
                })
            }
            KeySplitEncryptionType::Direct => self
                .inner
                .kek
                .decrypt(encrypted_key_split, &associated_data)
                .await
                .map(Zeroizing::new)
                .map_err(|e| {
                    warn!("direct key split failed to decrypt");
                    CommonError::invalid_argument_with_source("Key split cannot be decrypted", e)
                }),
        }
    }

    pub async fn get_encryption_key(&self, key_id: &str) -> Result<EncryptionKey, CommonError> {
        self.inner
            .key_db
            .get_key(key_id)
            .await?
            .map(EncryptionKey::without_private_material)
            .ok_or_else(|| CommonError::not_found("Encryption key not found", key_id))
    }

    pub async fn list_active_public_keys(
        &self,
        limit: Option<usize>,
    ) -> Result<Vec<PublicKeyEntry>, CommonError> {
        let keys = self
            .inner
            .key_db
            .get_active_keys(
                limit.unwrap_or(DEFAULT_PUBLIC_KEY_LIMIT),
                &WrappedChronoDateTime::now(),
            )
            .await?;
        Ok(keys.into_iter().map(PublicKeyEntry::from).collect())
    }
}

fn validate_incoming_key(key_id: &str, key: &EncryptionKey) -> Result<(), CommonError> {
    if key_id.is_empty() {
        return Err(CommonError::invalid_argument("key_id must not be empty"));
    }
    if key_id != key.key_id {
        return Err(CommonError::invalid_argument(format!(
            "key_id {key_id} does not match key {}",
            key.key_id
        )));
    }
    if key.public_key_material.is_empty() {
        return Err(CommonError::invalid_argument(
            "public_key_material must not be empty",
        ));
    }
    if base64::engine::general_purpose::STANDARD
        .decode(&key.public_key)
        .is_err()
    {
        return Err(CommonError::invalid_argument("public_key must be base64"));
    }
    if key.activation_time > key.expiration_time {
        return Err(CommonError::invalid_argument(
            "activation_time must not be after expiration_time",
        ));
    }
    Ok(())
}
