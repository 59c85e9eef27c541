pub mod generate;
pub mod serve;
pub mod signing_key;

use std::path::Path;
use std::sync::Arc;

use key_management::logic::kek::{KeyEncryptionAead, KeyEncryptionKey};
use key_management::logic::signing::Ed25519Signer;
use key_management::repository::Repository;
use shared::error::CommonError;
use shared::libsql::establish_db_connection;
use shared::primitives::SqlMigrationLoader;
use tracing::info;
use url::Url;

pub const DEFAULT_DATABASE_URL: &str = "libsql://./.data/coordinator.db?mode=local";
pub const DEFAULT_SIGNING_KEY_FILE: &str = "./.data/signing-key";
pub const DEFAULT_DATA_KEY_SIGNING_KEY_FILE: &str = "./.data/data-key-signing-key";

/// Open the key database, applying migrations. The returned database handle
/// must outlive the repository.
pub async fn open_repository(
    database_url: &Url,
) -> Result<(libsql::Database, Repository), CommonError> {
    let (db, conn) =
        establish_db_connection(database_url, Some(Repository::load_sql_migrations())).await?;
    Ok((db, Repository::new(conn)))
}

pub fn resolve_kek(uri: &str) -> Result<Arc<dyn KeyEncryptionAead>, CommonError> {
    let kek = KeyEncryptionKey::from_uri(uri)?;
    info!("using key encryption key {}", uri);
    Ok(Arc::new(kek))
}

pub fn load_signer(path: &Path) -> Result<Arc<Ed25519Signer>, CommonError> {
    Ok(Arc::new(Ed25519Signer::load_or_create(path)?))
}

pub fn cmd_openapi() -> Result<(), CommonError> {
    let spec = crate::router::generate_openapi_spec();
    let json = spec
        .to_pretty_json()
        .map_err(|e| CommonError::internal_with_source("Failed to render OpenAPI document", e))?;
    println!("{json}");
    Ok(())
}
