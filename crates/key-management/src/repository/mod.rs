mod sqlite;

pub use sqlite::Repository;

use shared::{error::CommonError, primitives::WrappedChronoDateTime};

use crate::logic::encryption_key::EncryptionKey;

// Repository trait for split key storage
#[async_trait::async_trait]
pub trait KeyDb: Send + Sync {
    async fn get_key(&self, key_id: &str) -> Result<Option<EncryptionKey>, CommonError>;

    /// Keys whose creation time falls within `max_age` of now.
    async fn list_recent_keys(
        &self,
        max_age: chrono::Duration,
    ) -> Result<Vec<EncryptionKey>, CommonError>;

    /// Insert a key. With `overwrite` unset an existing key id is an
    /// `InvalidArgument` error, otherwise the stored record is replaced.
    async fn create_key(&self, key: &EncryptionKey, overwrite: bool) -> Result<(), CommonError>;

    async fn delete_key(&self, key_id: &str) -> Result<(), CommonError>;

    /// Up to `limit` keys active at `at`, soonest expiring first.
    async fn get_active_keys(
        &self,
        limit: usize,
        at: &WrappedChronoDateTime,
    ) -> Result<Vec<EncryptionKey>, CommonError>;

    /// Keys that were inserted as placeholders and never completed.
    async fn list_placeholder_keys(&self) -> Result<Vec<EncryptionKey>, CommonError>;

    async fn upsert_key(&self, key: &EncryptionKey) -> Result<(), CommonError> {
        self.create_key(key, true).await
    }
}
