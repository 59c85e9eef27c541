use std::path::{Path, PathBuf};
use std::sync::Arc;

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit, OsRng, Payload},
};
use base64::Engine;
use dashmap::DashMap;
use rand::RngCore;
use shared::error::CommonError;
use tracing::debug;

pub const AWS_KMS_URI_PREFIX: &str = "aws-kms://";
pub const LOCAL_KEK_URI_PREFIX: &str = "local-kek://";

const NONCE_LEN: usize = 12;

/// Authenticated encryption under a key encryption key named by a URI.
///
/// Ciphertexts are base64 strings so they can be stored and sent as-is.
#[async_trait::async_trait]
pub trait KeyEncryptionAead: Send + Sync {
    fn uri(&self) -> &str;

    async fn encrypt(&self, plaintext: &[u8], associated_data: &[u8])
    -> Result<String, CommonError>;

    async fn decrypt(
        &self,
        ciphertext: &str,
        associated_data: &[u8],
    ) -> Result<Vec<u8>, CommonError>;
}

/// Extract AWS region from a KMS ARN
/// ARN format: arn:aws:kms:REGION:ACCOUNT:key/KEY-ID or arn:aws:kms:REGION:ACCOUNT:alias/ALIAS-NAME
pub fn extract_region_from_kms_arn(arn: &str) -> Result<String, CommonError> {
    let parts: Vec<&str> = arn.split(':').collect();
    if parts.len() >= 4 && parts[0] == "arn" && parts[1] == "aws" && parts[2] == "kms" {
        Ok(parts[3].to_string())
    } else {
        Err(CommonError::invalid_argument(format!(
            "Invalid KMS ARN format: {arn}"
        )))
    }
}

#[derive(Clone, zeroize::Zeroize, zeroize::ZeroizeOnDrop)]
pub enum KeyEncryptionKey {
    AwsKms {
        uri: String,
        arn: String,
        region: String,
    },
    Local {
        uri: String,
        key_bytes: Vec<u8>,
    },
}

impl std::fmt::Debug for KeyEncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyEncryptionKey")
            .field("uri", &self.uri())
            .finish()
    }
}

impl KeyEncryptionKey {
    /// Resolve a KEK from its URI.
    ///
    /// `aws-kms://<arn>` names a KMS key, `local-kek://<path>` a file holding 32
    /// raw key bytes. Local files are created on first use.
    pub fn from_uri(uri: &str) -> Result<Self, CommonError> {
        if let Some(arn) = uri.strip_prefix(AWS_KMS_URI_PREFIX) {
            let region = extract_region_from_kms_arn(arn)?;
            return Ok(KeyEncryptionKey::AwsKms {
                uri: uri.to_string(),
                arn: arn.to_string(),
                region,
            });
        }

        if let Some(path) = uri.strip_prefix(LOCAL_KEK_URI_PREFIX) {
            if path.is_empty() {
                return Err(CommonError::invalid_argument(format!(
                    "Local KEK uri is missing a path: {uri}"
                )));
            }
            let key_bytes = get_or_create_local_key_bytes(&PathBuf::from(path))?;
            return Ok(KeyEncryptionKey::Local {
                uri: uri.to_string(),
                key_bytes,
            });
        }

        Err(CommonError::invalid_argument(format!(
            "Unsupported key encryption key uri: {uri}"
        )))
    }

    pub fn local(uri: impl Into<String>, key_bytes: Vec<u8>) -> Result<Self, CommonError> {
        if key_bytes.len() != 32 {
            return Err(CommonError::invalid_argument(format!(
                "Invalid local KEK length: expected 32 bytes, got {}",
                key_bytes.len()
            )));
        }
        Ok(KeyEncryptionKey::Local {
            uri: uri.into(),
            key_bytes,
        })
    }

    async fn kms_client(region: &str) -> aws_sdk_kms::Client {
        let mut config = aws_config::load_from_env().await;
        config = config
            .to_builder()
            .region(aws_config::Region::new(region.to_string()))
            .build();
        aws_sdk_kms::Client::new(&config)
    }
}

/// Associated data has no native slot in KMS, so it travels as encryption context.
fn kms_encryption_context(associated_data: &[u8]) -> Option<String> {
    if associated_data.is_empty() {
        None
    } else {
        Some(base64::engine::general_purpose::STANDARD.encode(associated_data))
    }
}

const KMS_ASSOCIATED_DATA_CONTEXT_KEY: &str = "associated_data";

#[async_trait::async_trait]
impl KeyEncryptionAead for KeyEncryptionKey {
    fn uri(&self) -> &str {
        match self {
            KeyEncryptionKey::AwsKms { uri, .. } => uri,
            KeyEncryptionKey::Local { uri, .. } => uri,
        }
    }

    async fn encrypt(
        &self,
        plaintext: &[u8],
        associated_data: &[u8],
    ) -> Result<String, CommonError> {
        match self {
            KeyEncryptionKey::AwsKms { arn, region, .. } => {
                let kms_client = Self::kms_client(region).await;

                let mut request = kms_client
                    .encrypt()
                    .key_id(arn)
                    .plaintext(aws_sdk_kms::primitives::Blob::new(plaintext));
                if let Some(context) = kms_encryption_context(associated_data) {
                    request = request.encryption_context(KMS_ASSOCIATED_DATA_CONTEXT_KEY, context);
                }

                let encrypt_output = request.send().await.map_err(|e| {
                    CommonError::internal_with_source(
                        "Failed to encrypt with AWS KMS",
                        anyhow::anyhow!("{e}"),
                    )
                })?;

                let ciphertext_blob = encrypt_output.ciphertext_blob().ok_or_else(|| {
                    CommonError::internal("AWS KMS encrypt response did not contain ciphertext blob")
                })?;

                Ok(base64::engine::general_purpose::STANDARD.encode(ciphertext_blob.as_ref()))
            }
            KeyEncryptionKey::Local { key_bytes, .. } => {
                let key = aes_gcm::Key::<Aes256Gcm>::from_slice(key_bytes);
                let cipher = Aes256Gcm::new(key);

                let mut nonce_bytes = [0u8; NONCE_LEN];
                OsRng.fill_bytes(&mut nonce_bytes);
                let nonce = Nonce::from_slice(&nonce_bytes);

                let ciphertext = cipher
                    .encrypt(
                        nonce,
                        Payload {
                            msg: plaintext,
                            aad: associated_data,
                        },
                    )
                    .map_err(|e| {
                        CommonError::internal(format!("Local KEK encryption failed: {e}"))
                    })?;

                // nonce || ciphertext
                let mut combined = Vec::with_capacity(nonce_bytes.len() + ciphertext.len());
                combined.extend_from_slice(&nonce_bytes);
                combined.extend_from_slice(&ciphertext);

                Ok(base64::engine::general_purpose::STANDARD.encode(&combined))
            }
        }
    }

    async fn decrypt(
        &self,
        ciphertext: &str,
        associated_data: &[u8],
    ) -> Result<Vec<u8>, CommonError> {
        let encrypted_data = base64::engine::general_purpose::STANDARD
            .decode(ciphertext)
            .map_err(|e| {
                CommonError::invalid_argument_with_source("Failed to decode base64 ciphertext", e)
            })?;

        match self {
            KeyEncryptionKey::AwsKms { arn, region, .. } => {
                let kms_client = Self::kms_client(region).await;

                let mut request = kms_client
                    .decrypt()
                    .key_id(arn)
                    .ciphertext_blob(aws_sdk_kms::primitives::Blob::new(encrypted_data));
                if let Some(context) = kms_encryption_context(associated_data) {
                    request = request.encryption_context(KMS_ASSOCIATED_DATA_CONTEXT_KEY, context);
                }

                let decrypt_output = request.send().await.map_err(|e| {
                    CommonError::internal_with_source(
                        "Failed to decrypt with AWS KMS",
                        anyhow::anyhow!("{e}"),
                    )
                })?;

                let plaintext = decrypt_output.plaintext().ok_or_else(|| {
                    CommonError::internal("AWS KMS decrypt response did not contain plaintext")
                })?;

                Ok(plaintext.as_ref().to_vec())
            }
            KeyEncryptionKey::Local { key_bytes, .. } => {
                if encrypted_data.len() < NONCE_LEN {
                    return Err(CommonError::invalid_argument(
                        "Invalid ciphertext format: missing nonce",
                    ));
                }

                let key = aes_gcm::Key::<Aes256Gcm>::from_slice(key_bytes);
                let cipher = Aes256Gcm::new(key);

                let nonce = Nonce::from_slice(&encrypted_data[..NONCE_LEN]);
                let payload = Payload {
                    msg: &encrypted_data[NONCE_LEN..],
                    aad: associated_data,
                };

                cipher.decrypt(nonce, payload).map_err(|e| {
                    CommonError::internal(format!("Local KEK decryption failed: {e}"))
                })
            }
        }
    }
}

/// Generate or load a 32-byte local KEK.
pub fn get_or_create_local_key_bytes(file_path: &Path) -> Result<Vec<u8>, CommonError> {
    if file_path.exists() {
        let key_bytes = std::fs::read(file_path).map_err(|e| {
            CommonError::internal_with_source(
                format!("Failed to read local KEK file at {}", file_path.display()),
                e,
            )
        })?;

        if key_bytes.len() != 32 {
            return Err(CommonError::invalid_argument(format!(
                "Invalid local KEK length in file {}: expected 32 bytes, got {}",
                file_path.display(),
                key_bytes.len()
            )));
        }

        return Ok(key_bytes);
    }

    debug!("generating local KEK at {}", file_path.display());
    let mut key_bytes = vec![0u8; 32];
    rand::thread_rng().fill_bytes(&mut key_bytes);

    if let Some(parent) = file_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                CommonError::internal_with_source(
                    format!(
                        "Failed to create parent directory for KEK file at {}",
                        file_path.display()
                    ),
                    e,
                )
            })?;
        }
    }

    std::fs::write(file_path, &key_bytes).map_err(|e| {
        CommonError::internal_with_source(
            format!("Failed to write local KEK file at {}", file_path.display()),
            e,
        )
    })?;

    Ok(key_bytes)
}

/// Looks up KEKs by URI.
#[async_trait::async_trait]
pub trait KeyEncryptionKeyResolver: Send + Sync {
    async fn resolve(&self, uri: &str) -> Result<Arc<dyn KeyEncryptionAead>, CommonError>;
}

/// Resolves URIs with [`KeyEncryptionKey::from_uri`] and keeps the result.
#[derive(Clone, Default)]
pub struct CachingKeyEncryptionKeyResolver {
    cache: Arc<DashMap<String, Arc<dyn KeyEncryptionAead>>>,
}

impl CachingKeyEncryptionKeyResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-seed a KEK, so lookups for its URI never touch the filesystem or KMS.
    pub fn with_key(self, key: Arc<dyn KeyEncryptionAead>) -> Self {
        self.cache.insert(key.uri().to_string(), key);
        self
    }
}

#[async_trait::async_trait]
impl KeyEncryptionKeyResolver for CachingKeyEncryptionKeyResolver {
    async fn resolve(&self, uri: &str) -> Result<Arc<dyn KeyEncryptionAead>, CommonError> {
        if let Some(cached) = self.cache.get(uri) {
            return Ok(cached.value().clone());
        }

        let key: Arc<dyn KeyEncryptionAead> = Arc::new(KeyEncryptionKey::from_uri(uri)?);
        self.cache.insert(uri.to_string(), key.clone());
        Ok(key)
    }
}
