#![allow(non_camel_case_types)]
mod raw;

use std::collections::BTreeMap;

use anyhow::Context;
use shared::{
    error::CommonError,
    primitives::{SqlMigrationLoader, WrappedChronoDateTime},
};

use crate::logic::encryption_key::{EncryptionKey, KeySplitData, KeyType};
use crate::repository::KeyDb;
use raw::{Row_encryption_key, encryption_key_params};

fn repository_error(e: anyhow::Error) -> CommonError {
    CommonError::Repository {
        msg: e.to_string(),
        source: Some(e),
    }
}

impl TryFrom<Row_encryption_key> for EncryptionKey {
    type Error = CommonError;

    fn try_from(row: Row_encryption_key) -> Result<Self, Self::Error> {
        let key_split_data: Vec<KeySplitData> = serde_json::from_str(&row.key_split_data)
            .with_context(|| format!("Invalid key_split_data stored for key {}", row.key_id))
            .map_err(repository_error)?;

        let key_type: KeyType = row
            .key_type
            .parse::<KeyType>()
            .map_err(anyhow::Error::from)
            .with_context(|| format!("Invalid key_type stored for key {}", row.key_id))
            .map_err(repository_error)?;
        let stored_time = |column: &str, value: String| {
            WrappedChronoDateTime::try_from(value)
                .with_context(|| format!("Invalid {column} stored for key {}", row.key_id))
                .map_err(repository_error)
        };

        Ok(EncryptionKey {
            creation_time: stored_time("creation_time", row.creation_time)?,
            activation_time: stored_time("activation_time", row.activation_time)?,
            expiration_time: stored_time("expiration_time", row.expiration_time)?,
            ttl_time: stored_time("ttl_time", row.ttl_time)?,
            key_id: row.key_id,
            public_key: row.public_key,
            public_key_material: row.public_key_material,
            key_encryption_key_uri: row.key_encryption_key_uri,
            encrypted_private_material: row.encrypted_private_material,
            key_split_data,
            key_type,
        })
    }
}

fn rows_into_keys(rows: Vec<Row_encryption_key>) -> Result<Vec<EncryptionKey>, CommonError> {
    rows.into_iter().map(EncryptionKey::try_from).collect()
}

#[derive(Clone)]
pub struct Repository {
    conn: shared::libsql::Connection,
}

impl Repository {
    pub fn new(conn: shared::libsql::Connection) -> Self {
        Self { conn }
    }
}

/// Serialized split data plus the bookkeeping timestamp, owned so that
/// [`encryption_key_params`] can borrow from it.
struct StoredFields {
    key_split_data: String,
    now: WrappedChronoDateTime,
}

impl StoredFields {
    fn for_key(key: &EncryptionKey) -> Result<Self, CommonError> {
        Ok(Self {
            key_split_data: serde_json::to_string(&key.key_split_data)?,
            now: WrappedChronoDateTime::now(),
        })
    }

    fn params<'a>(&'a self, key: &'a EncryptionKey) -> encryption_key_params<'a> {
        encryption_key_params {
            key_id: &key.key_id,
            public_key: &key.public_key,
            public_key_material: &key.public_key_material,
            encrypted_private_material: &key.encrypted_private_material,
            key_split_data: &self.key_split_data,
            key_type: &key.key_type,
            key_encryption_key_uri: &key.key_encryption_key_uri,
            creation_time: &key.creation_time,
            activation_time: &key.activation_time,
            expiration_time: &key.expiration_time,
            ttl_time: &key.ttl_time,
            created_at: &self.now,
            updated_at: &self.now,
        }
    }
}

#[async_trait::async_trait]
impl KeyDb for Repository {
    async fn get_key(&self, key_id: &str) -> Result<Option<EncryptionKey>, CommonError> {
        let row = raw::get_encryption_key_by_id(&self.conn, key_id)
            .await
            .context("Failed to get encryption key by id")
            .map_err(repository_error)?;

        row.map(EncryptionKey::try_from).transpose()
    }

    async fn list_recent_keys(
        &self,
        max_age: chrono::Duration,
    ) -> Result<Vec<EncryptionKey>, CommonError> {
        let since = WrappedChronoDateTime::new(chrono::Utc::now() - max_age);
        let rows = raw::get_encryption_keys_created_since(&self.conn, &since)
            .await
            .context("Failed to list recent encryption keys")
            .map_err(repository_error)?;

        rows_into_keys(rows)
    }

    async fn create_key(&self, key: &EncryptionKey, overwrite: bool) -> Result<(), CommonError> {
        let stored = StoredFields::for_key(key)?;

        if overwrite {
            raw::upsert_encryption_key(&self.conn, stored.params(key))
                .await
                .context("Failed to upsert encryption key")
                .map_err(repository_error)?;
            return Ok(());
        }

        let inserted = raw::insert_encryption_key(&self.conn, stored.params(key))
            .await
            .context("Failed to create encryption key")
            .map_err(repository_error)?;
        if inserted == 0 {
            return Err(CommonError::invalid_argument(format!(
                "encryption key {} already exists",
                key.key_id
            )));
        }
        Ok(())
    }

    async fn delete_key(&self, key_id: &str) -> Result<(), CommonError> {
        raw::delete_encryption_key(&self.conn, key_id)
            .await
            .context("Failed to delete encryption key")
            .map_err(repository_error)?;
        Ok(())
    }

    async fn get_active_keys(
        &self,
        limit: usize,
        at: &WrappedChronoDateTime,
    ) -> Result<Vec<EncryptionKey>, CommonError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = raw::get_active_encryption_keys(&self.conn, at, limit)
            .await
            .context("Failed to get active encryption keys")
            .map_err(repository_error)?;

        rows_into_keys(rows)
    }

    async fn list_placeholder_keys(&self) -> Result<Vec<EncryptionKey>, CommonError> {
        let rows = raw::get_placeholder_encryption_keys(&self.conn)
            .await
            .context("Failed to list placeholder encryption keys")
            .map_err(repository_error)?;

        rows_into_keys(rows)
    }
}

impl SqlMigrationLoader for Repository {
    fn load_sql_migrations() -> BTreeMap<&'static str, BTreeMap<&'static str, &'static str>> {
        let mut sqlite = BTreeMap::new();
        sqlite.insert(
            "20250301000000_encryption_key.up.sql",
            include_str!("../../../dbs/key-management/migrations/20250301000000_encryption_key.up.sql"),
        );
        sqlite.insert(
            "20250301000000_encryption_key.down.sql",
            include_str!("../../../dbs/key-management/migrations/20250301000000_encryption_key.down.sql"),
        );

        let mut migrations = BTreeMap::new();
        migrations.insert("sqlite", sqlite);
        migrations
    }
}

#[cfg(all(test, feature = "unit_test"))]
mod unit_test {
    use super::*;
    use shared::error::ErrorKind;
    use shared::test_utils::repository::setup_in_memory_database;

    async fn setup_repository() -> (libsql::Database, Repository) {
        let (db, conn) = setup_in_memory_database(vec![Repository::load_sql_migrations()])
            .await
            .unwrap();
        (db, Repository::new(conn))
    }

    fn key_at(key_id: &str, activation: chrono::DateTime<chrono::Utc>, days: i64) -> EncryptionKey {
        let activation =
            chrono::DateTime::from_timestamp_millis(activation.timestamp_millis()).unwrap();
        EncryptionKey {
            key_id: key_id.to_string(),
            public_key: "cHVi".to_string(),
            public_key_material: format!("material-{key_id}"),
            key_encryption_key_uri: "local-kek:///a".to_string(),
            encrypted_private_material: "c2VjcmV0".to_string(),
            key_split_data: vec![KeySplitData {
                key_split_key_encryption_key_uri: "local-kek:///a".to_string(),
                public_key_signature: "c2ln".to_string(),
            }],
            key_type: KeyType::MultiPartyHybridEvenKeysplit,
            creation_time: WrappedChronoDateTime::new(activation),
            activation_time: WrappedChronoDateTime::new(activation),
            expiration_time: WrappedChronoDateTime::new(activation + chrono::Duration::days(days)),
            ttl_time: WrappedChronoDateTime::new(activation + chrono::Duration::days(365)),
        }
    }

    #[tokio::test]
    async fn test_create_and_get_key() {
        shared::setup_test!();

        let (_db, repo) = setup_repository().await;
        let key = key_at("k1", chrono::Utc::now(), 8);
        repo.create_key(&key, false).await.unwrap();

        let stored = repo.get_key("k1").await.unwrap().unwrap();
        assert_eq!(stored, key);
        assert!(repo.get_key("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_without_overwrite_rejects_existing() {
        shared::setup_test!();

        let (_db, repo) = setup_repository().await;
        let key = key_at("k1", chrono::Utc::now(), 8);
        repo.create_key(&key, false).await.unwrap();

        let err = repo.create_key(&key, false).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn test_overwrite_replaces_record() {
        shared::setup_test!();

        let (_db, repo) = setup_repository().await;
        let mut key = key_at("k1", chrono::Utc::now(), 8);
        repo.create_key(&key, false).await.unwrap();

        key.key_split_data.push(KeySplitData {
            key_split_key_encryption_key_uri: "local-kek:///b".to_string(),
            public_key_signature: String::new(),
        });
        repo.upsert_key(&key).await.unwrap();

        let stored = repo.get_key("k1").await.unwrap().unwrap();
        assert_eq!(stored.key_split_data.len(), 2);
    }

    #[tokio::test]
    async fn test_delete_key() {
        shared::setup_test!();

        let (_db, repo) = setup_repository().await;
        repo.create_key(&key_at("k1", chrono::Utc::now(), 8), false)
            .await
            .unwrap();
        repo.delete_key("k1").await.unwrap();
        assert!(repo.get_key("k1").await.unwrap().is_none());

        // deleting a missing key is not an error
        repo.delete_key("k1").await.unwrap();
    }

    #[tokio::test]
    async fn test_list_recent_keys_filters_by_creation_time() {
        shared::setup_test!();

        let (_db, repo) = setup_repository().await;
        let now = chrono::Utc::now();
        repo.create_key(&key_at("new", now, 8), false).await.unwrap();
        repo.create_key(&key_at("old", now - chrono::Duration::days(60), 8), false)
            .await
            .unwrap();

        let recent = repo
            .list_recent_keys(chrono::Duration::days(30))
            .await
            .unwrap();
        let ids: Vec<_> = recent.iter().map(|key| key.key_id.as_str()).collect();
        assert_eq!(ids, vec!["new"]);
    }

    #[tokio::test]
    async fn test_active_keys_and_placeholders() {
        shared::setup_test!();

        let (_db, repo) = setup_repository().await;
        let now = chrono::Utc::now();

        repo.create_key(&key_at("active-long", now - chrono::Duration::days(1), 30), false)
            .await
            .unwrap();
        repo.create_key(&key_at("active-short", now - chrono::Duration::days(1), 3), false)
            .await
            .unwrap();
        repo.create_key(&key_at("future", now + chrono::Duration::days(2), 8), false)
            .await
            .unwrap();
        repo.create_key(&key_at("expired", now - chrono::Duration::days(20), 8), false)
            .await
            .unwrap();

        let mut placeholder = key_at("placeholder", now - chrono::Duration::days(1), 8);
        placeholder.activation_time = placeholder.expiration_time;
        repo.create_key(&placeholder, false).await.unwrap();

        let at = WrappedChronoDateTime::new(now);
        let active = repo.get_active_keys(10, &at).await.unwrap();
        let ids: Vec<_> = active.iter().map(|key| key.key_id.as_str()).collect();
        assert_eq!(ids, vec!["active-short", "active-long"]);

        let limited = repo.get_active_keys(1, &at).await.unwrap();
        assert_eq!(limited.len(), 1);

        let placeholders = repo.list_placeholder_keys().await.unwrap();
        assert_eq!(placeholders.len(), 1);
        assert_eq!(placeholders[0].key_id, "placeholder");
    }

    #[tokio::test]
    async fn test_rows_are_decoded_from_stored_text() {
        shared::setup_test!();

        let (_db, repo) = setup_repository().await;
        let insert = "INSERT INTO encryption_key (key_id, public_key, public_key_material, encrypted_private_material, key_split_data, key_type, key_encryption_key_uri, creation_time, activation_time, expiration_time, ttl_time, created_at, updated_at)
VALUES (?, 'cHVi', 'PKM', '', '[]', ?, '', '2024-05-01 00:00:00.250', '2024-05-01 00:00:00.250', ?, '2025-05-01 00:00:00.000', '2024-05-01 00:00:00.000', '2024-05-01 00:00:00.000')";

        repo.conn
            .execute(insert, libsql::params!["legacy", "", "2024-05-09 00:00:00.000"])
            .await
            .unwrap();
        let legacy = repo.get_key("legacy").await.unwrap().unwrap();
        assert_eq!(legacy.key_type, KeyType::SinglePartyHybridKey);
        assert_eq!(legacy.creation_time.to_iso8601(), "2024-05-01T00:00:00.250Z");
        assert_eq!(legacy.expiration_time.to_iso8601(), "2024-05-09T00:00:00.000Z");

        repo.conn
            .execute(insert, libsql::params!["broken", "MULTI_PARTY_HYBRID_KEY", "next week"])
            .await
            .unwrap();
        let err = repo.get_key("broken").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(err.to_string().contains("expiration_time"));
    }
}
