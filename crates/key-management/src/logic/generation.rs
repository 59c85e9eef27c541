use std::sync::Arc;

use shared::{error::CommonError, primitives::WrappedChronoDateTime};
use tracing::{error, info, warn};

use super::data_key::DataKey;
use super::encryption_key::{EncryptionKey, KeyType};
use super::kek::KeyEncryptionAead;
use super::key_id::KeyIdFactory;
use super::key_split::{HybridKeyPair, KeySplitter, XorKeySplitter};
use super::key_split_data::{add_key_split_data, combine_key_split_data};
use super::peer::PeerCoordinator;
use super::signing::PublicKeySign;
use crate::repository::KeyDb;

/// Keys expiring within this window are replaced ahead of time.
pub const DEFAULT_KEY_REFRESH_WINDOW_DAYS: i64 = 7;

/// Outcome of one generation batch. Individual key failures do not fail the batch.
#[derive(Debug, Default)]
pub struct SplitKeyGenerationReport {
    pub created_key_ids: Vec<String>,
    pub failures: Vec<CommonError>,
}

impl SplitKeyGenerationReport {
    pub fn requested(&self) -> usize {
        self.created_key_ids.len() + self.failures.len()
    }
}

/// Drives split key generation from the initiating coordinator's side.
pub struct SplitKeyGenerationOrchestrator<R: KeyDb, P: PeerCoordinator> {
    key_db: R,
    peer: P,
    kek: Arc<dyn KeyEncryptionAead>,
    signer: Option<Arc<dyn PublicKeySign>>,
    key_id_factory: KeyIdFactory,
    splitter: Arc<dyn KeySplitter>,
    refresh_window: chrono::Duration,
}

impl<R: KeyDb, P: PeerCoordinator> SplitKeyGenerationOrchestrator<R, P> {
    pub fn new(
        key_db: R,
        peer: P,
        kek: Arc<dyn KeyEncryptionAead>,
        signer: Option<Arc<dyn PublicKeySign>>,
        key_id_factory: KeyIdFactory,
    ) -> Self {
        Self {
            key_db,
            peer,
            kek,
            signer,
            key_id_factory,
            splitter: Arc::new(XorKeySplitter::default()),
            refresh_window: chrono::Duration::days(DEFAULT_KEY_REFRESH_WINDOW_DAYS),
        }
    }

    pub fn with_splitter(mut self, splitter: Arc<dyn KeySplitter>) -> Self {
        self.splitter = splitter;
        self
    }

    pub fn with_refresh_window(mut self, refresh_window: chrono::Duration) -> Self {
        self.refresh_window = refresh_window;
        self
    }

    pub fn key_db(&self) -> &R {
        &self.key_db
    }

    /// Generate `count` split keys that become active at `activation_time`.
    pub async fn create_split_key(
        &self,
        count: usize,
        validity_in_days: i64,
        ttl_in_days: i64,
        activation_time: WrappedChronoDateTime,
    ) -> Result<SplitKeyGenerationReport, CommonError> {
        if validity_in_days <= 0 {
            return Err(CommonError::invalid_argument(
                "validity_in_days must be positive",
            ));
        }
        if ttl_in_days < validity_in_days {
            return Err(CommonError::invalid_argument(
                "ttl_in_days must not be shorter than validity_in_days",
            ));
        }

        let mut report = SplitKeyGenerationReport::default();
        if count == 0 {
            return Ok(report);
        }

        self.remove_placeholder_keys().await?;

        let data_key = self.peer.fetch_data_key().await.map_err(|e| match e {
            CommonError::Internal { .. } => e,
            e => CommonError::internal_with_source("Failed to fetch data key from peer", e),
        })?;

        info!(count, "generating split keys");
        for _ in 0..count {
            match self
                .create_one(validity_in_days, ttl_in_days, activation_time, data_key.as_ref())
                .await
            {
                Ok(key_id) => report.created_key_ids.push(key_id),
                Err(e) => {
                    error!("Failed to generate split key: {:?}", e);
                    report.failures.push(e);
                }
            }
        }

        info!(
            created = report.created_key_ids.len(),
            failed = report.failures.len(),
            "split key generation finished"
        );
        Ok(report)
    }

    /// Top up the active key set so `desired` keys stay usable past the refresh window.
    pub async fn replace_expiring_keys(
        &self,
        desired: usize,
        validity_in_days: i64,
        ttl_in_days: i64,
    ) -> Result<SplitKeyGenerationReport, CommonError> {
        let now = WrappedChronoDateTime::now();
        let existing = self.count_keys_valid_past_refresh(desired, &now).await?;
        let missing = desired.saturating_sub(existing);

        if missing == 0 {
            info!(existing, "no expiring keys to replace");
            return Ok(SplitKeyGenerationReport::default());
        }

        info!(existing, missing, "replacing expiring keys");
        self.create_split_key(missing, validity_in_days, ttl_in_days, now)
            .await
    }

    /// Make sure `desired` keys are active now, and that for every distinct
    /// expiration among them `desired` keys will still be active at that
    /// instant. Successors activate one refresh window before the keys they
    /// replace expire, so the two sets overlap.
    pub async fn ensure_active_key_coverage(
        &self,
        desired: usize,
        validity_in_days: i64,
        ttl_in_days: i64,
    ) -> Result<SplitKeyGenerationReport, CommonError> {
        let now = WrappedChronoDateTime::now();
        let mut report = SplitKeyGenerationReport::default();

        let active = self.key_db.get_active_keys(desired, &now).await?;
        info!(active = active.len(), desired, "checking active key coverage");
        if active.len() < desired {
            let batch = self
                .create_split_key(desired - active.len(), validity_in_days, ttl_in_days, now)
                .await?;
            merge_reports(&mut report, batch);
        }
        let active = self.ensure_covered(desired, &now, "active").await?;

        let mut expirations: Vec<WrappedChronoDateTime> =
            active.iter().map(|key| key.expiration_time).collect();
        expirations.sort();
        expirations.dedup();

        for expiration in expirations {
            let successors = self.key_db.get_active_keys(desired, &expiration).await?;
            if successors.len() < desired {
                let activation =
                    WrappedChronoDateTime::new(*expiration.get_inner() - self.refresh_window);
                info!(
                    %expiration,
                    %activation,
                    missing = desired - successors.len(),
                    "scheduling successor keys"
                );
                let batch = self
                    .create_split_key(
                        desired - successors.len(),
                        validity_in_days,
                        ttl_in_days,
                        activation,
                    )
                    .await?;
                merge_reports(&mut report, batch);
            }
            self.ensure_covered(desired, &expiration, "pending-active").await?;
        }

        Ok(report)
    }

    async fn ensure_covered(
        &self,
        desired: usize,
        at: &WrappedChronoDateTime,
        what: &str,
    ) -> Result<Vec<EncryptionKey>, CommonError> {
        let keys = self.key_db.get_active_keys(desired, at).await?;
        if keys.len() < desired {
            return Err(CommonError::internal(format!(
                "only {} of {desired} {what} keys at {at} after generation",
                keys.len()
            )));
        }
        Ok(keys)
    }

    async fn count_keys_valid_past_refresh(
        &self,
        desired: usize,
        now: &WrappedChronoDateTime,
    ) -> Result<usize, CommonError> {
        let refresh_cutoff = WrappedChronoDateTime::new(*now.get_inner() + self.refresh_window);
        let active = self.key_db.get_active_keys(usize::MAX, now).await?;
        Ok(active
            .iter()
            .filter(|key| key.expiration_time > refresh_cutoff)
            .count()
            .min(desired))
    }

    async fn remove_placeholder_keys(&self) -> Result<(), CommonError> {
        for key in self.key_db.list_placeholder_keys().await? {
            warn!(key_id = %key.key_id, "removing leftover placeholder key");
            self.key_db.delete_key(&key.key_id).await?;
        }
        Ok(())
    }

    async fn create_one(
        &self,
        validity_in_days: i64,
        ttl_in_days: i64,
        activation_time: WrappedChronoDateTime,
        data_key: Option<&DataKey>,
    ) -> Result<String, CommonError> {
        let creation_time = now_millis();
        let key_id = self.key_id_factory.next_key_id(&self.key_db).await?;

        let keypair = HybridKeyPair::generate();
        let splits = self.splitter.split(keypair.private_key())?;
        let [local_split, peer_split] = splits.as_slice() else {
            return Err(CommonError::internal(format!(
                "expected 2 key splits, got {}",
                splits.len()
            )));
        };

        let key = self.build_encryption_key(
            key_id,
            creation_time,
            activation_time,
            validity_in_days,
            ttl_in_days,
            &keypair,
        )?;

        let local_key = EncryptionKey {
            encrypted_private_material: self
                .kek
                .encrypt(local_split, &[])
                .await
                .map_err(|e| CommonError::internal_with_source("Failed to encrypt local split", e))?,
            key_encryption_key_uri: self.kek.uri().to_string(),
            ..key.clone()
        };
        let peer_key = EncryptionKey {
            encrypted_private_material: String::new(),
            key_encryption_key_uri: String::new(),
            ..key
        };

        let encrypted_peer_split = self
            .peer
            .encrypt_peer_split(peer_split, data_key, &peer_key.public_key_material)
            .await
            .map_err(|e| match e {
                CommonError::InvalidArgument { .. } => e,
                e => CommonError::invalid_argument_with_source("Failed to encrypt peer split", e),
            })?;

        // reserve the id with a key that is never active
        info!(key_id = %local_key.key_id, "inserting placeholder key");
        let placeholder = EncryptionKey {
            activation_time: local_key.expiration_time,
            ..local_key.clone()
        };
        self.key_db.create_key(&placeholder, false).await?;

        match self
            .finish_with_peer(&local_key, &peer_key, encrypted_peer_split, data_key)
            .await
        {
            Ok(()) => Ok(local_key.key_id),
            Err(e) => {
                warn!(key_id = %local_key.key_id, "deleting placeholder key after failure");
                if let Err(delete_error) = self.key_db.delete_key(&local_key.key_id).await {
                    error!("Failed to delete placeholder key: {:?}", delete_error);
                }
                Err(e)
            }
        }
    }

    async fn finish_with_peer(
        &self,
        local_key: &EncryptionKey,
        peer_key: &EncryptionKey,
        encrypted_peer_split: String,
        data_key: Option<&DataKey>,
    ) -> Result<(), CommonError> {
        let peer_response = self
            .peer
            .send_split_to_peer(peer_key, encrypted_peer_split, data_key.cloned())
            .await?;
        info!(key_id = %peer_key.key_id, "peer coordinator stored key split");

        if peer_response.key_id != local_key.key_id
            || peer_response.public_key_material != local_key.public_key_material
        {
            return Err(CommonError::invalid_argument(format!(
                "peer coordinator returned a different key for {}",
                local_key.key_id
            )));
        }

        let signed_key = EncryptionKey {
            key_split_data: combine_key_split_data(
                &peer_response.key_split_data,
                &local_key.key_split_data,
            ),
            ..local_key.clone()
        };
        self.key_db.upsert_key(&signed_key).await?;
        info!(key_id = %signed_key.key_id, "stored split key");
        Ok(())
    }

    fn build_encryption_key(
        &self,
        key_id: String,
        creation_time: WrappedChronoDateTime,
        activation_time: WrappedChronoDateTime,
        validity_in_days: i64,
        ttl_in_days: i64,
        keypair: &HybridKeyPair,
    ) -> Result<EncryptionKey, CommonError> {
        use base64::Engine;

        let activation = *activation_time.get_inner();
        let key = EncryptionKey {
            key_id,
            public_key: base64::engine::general_purpose::STANDARD.encode(&keypair.public_key),
            public_key_material: keypair.public_key_material.clone(),
            key_encryption_key_uri: String::new(),
            encrypted_private_material: String::new(),
            key_split_data: vec![],
            key_type: KeyType::MultiPartyHybridEvenKeysplit,
            creation_time,
            activation_time,
            expiration_time: WrappedChronoDateTime::new(
                activation + chrono::Duration::days(validity_in_days),
            ),
            ttl_time: WrappedChronoDateTime::new(activation + chrono::Duration::days(ttl_in_days)),
        };
        add_key_split_data(key, self.kek.uri(), self.signer.as_deref())
    }
}

fn merge_reports(into: &mut SplitKeyGenerationReport, from: SplitKeyGenerationReport) {
    into.created_key_ids.extend(from.created_key_ids);
    into.failures.extend(from.failures);
}

/// Signatures cover the ISO rendering of the creation time, which carries millis.
fn now_millis() -> WrappedChronoDateTime {
    let now = chrono::Utc::now();
    let truncated = chrono::DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now);
    WrappedChronoDateTime::new(truncated)
}
