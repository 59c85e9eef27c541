//! How the initiating coordinator reaches its peer.
//!
//! The two providers differ only in how the peer's split is protected on the
//! way: under a data key the peer issued, or directly under the peer's KEK.

use std::sync::Arc;

use shared::error::{CommonError, ErrorKind};

use super::data_key::{DataKey, encrypt_with_data_key};
use super::encryption_key::{EncryptionKey, KeySplitEncryptionType, split_associated_data};
use super::kek::{KeyEncryptionAead, KeyEncryptionKeyResolver};
use super::storage::CreateKeyRequest;
use crate::client::KeyStorageClient;

#[async_trait::async_trait]
pub trait PeerCoordinator: Send + Sync {
    /// Obtain whatever is needed to encrypt splits for this batch, if anything.
    async fn fetch_data_key(&self) -> Result<Option<DataKey>, CommonError>;

    async fn encrypt_peer_split(
        &self,
        split: &[u8],
        data_key: Option<&DataKey>,
        public_key_material: &str,
    ) -> Result<String, CommonError>;

    /// Hand the split over and return the key as the peer signed it.
    async fn send_split_to_peer(
        &self,
        unsigned_key: &EncryptionKey,
        encrypted_split: String,
        data_key: Option<DataKey>,
    ) -> Result<EncryptionKey, CommonError>;
}

async fn send_create_key<C: KeyStorageClient>(
    client: &C,
    request: CreateKeyRequest,
) -> Result<EncryptionKey, CommonError> {
    let key_id = request.key_id.clone();
    // transport failures stay internal, anything the peer answered is a rejection
    client.create_key(request).await.map_err(|e| match e {
        CommonError::ReqwestError { .. } => e,
        e if e.kind() == ErrorKind::InvalidArgument => e,
        e => CommonError::invalid_argument_with_source(
            format!("peer coordinator failed to store key {key_id}"),
            e,
        ),
    })
}

/// Encrypts peer splits under data keys the peer issues.
pub struct DataKeyPeerCoordinator<C: KeyStorageClient> {
    client: C,
    resolver: Arc<dyn KeyEncryptionKeyResolver>,
}

impl<C: KeyStorageClient> DataKeyPeerCoordinator<C> {
    pub fn new(client: C, resolver: Arc<dyn KeyEncryptionKeyResolver>) -> Self {
        Self { client, resolver }
    }
}

#[async_trait::async_trait]
impl<C: KeyStorageClient> PeerCoordinator for DataKeyPeerCoordinator<C> {
    async fn fetch_data_key(&self) -> Result<Option<DataKey>, CommonError> {
        self.client
            .get_data_key()
            .await
            .map(Some)
            .map_err(|e| CommonError::internal_with_source("Failed to fetch data key from peer", e))
    }

    async fn encrypt_peer_split(
        &self,
        split: &[u8],
        data_key: Option<&DataKey>,
        public_key_material: &str,
    ) -> Result<String, CommonError> {
        let data_key = data_key
            .ok_or_else(|| CommonError::internal("no data key available for peer split"))?;
        let associated_data = split_associated_data(public_key_material)?;
        encrypt_with_data_key(self.resolver.as_ref(), data_key, split, &associated_data).await
    }

    async fn send_split_to_peer(
        &self,
        unsigned_key: &EncryptionKey,
        encrypted_split: String,
        data_key: Option<DataKey>,
    ) -> Result<EncryptionKey, CommonError> {
        let request = CreateKeyRequest {
            key_id: unsigned_key.key_id.clone(),
            key: unsigned_key.clone(),
            key_split_encryption_type: KeySplitEncryptionType::DataKey,
            encrypted_key_split: encrypted_split,
            encrypted_key_split_data_key: data_key,
        };
        send_create_key(&self.client, request).await
    }
}

/// Encrypts peer splits straight under the peer's KEK.
pub struct DirectPeerCoordinator<C: KeyStorageClient> {
    client: C,
    peer_kek: Arc<dyn KeyEncryptionAead>,
}

impl<C: KeyStorageClient> DirectPeerCoordinator<C> {
    pub fn new(client: C, peer_kek: Arc<dyn KeyEncryptionAead>) -> Self {
        Self { client, peer_kek }
    }
}

#[async_trait::async_trait]
impl<C: KeyStorageClient> PeerCoordinator for DirectPeerCoordinator<C> {
    async fn fetch_data_key(&self) -> Result<Option<DataKey>, CommonError> {
        Ok(None)
    }

    async fn encrypt_peer_split(
        &self,
        split: &[u8],
        _data_key: Option<&DataKey>,
        public_key_material: &str,
    ) -> Result<String, CommonError> {
        let associated_data = split_associated_data(public_key_material)?;
        self.peer_kek.encrypt(split, &associated_data).await
    }

    async fn send_split_to_peer(
        &self,
        unsigned_key: &EncryptionKey,
        encrypted_split: String,
        _data_key: Option<DataKey>,
    ) -> Result<EncryptionKey, CommonError> {
        let request = CreateKeyRequest {
            key_id: unsigned_key.key_id.clone(),
            key: unsigned_key.clone(),
            key_split_encryption_type: KeySplitEncryptionType::Direct,
            encrypted_key_split: encrypted_split,
            encrypted_key_split_data_key: None,
        };
        send_create_key(&self.client, request).await
    }
}
