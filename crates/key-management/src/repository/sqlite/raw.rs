//! Statements against the `encryption_key` table.

use libsql::params::Params;
use shared::primitives::WrappedChronoDateTime;

use crate::logic::encryption_key::KeyType;

const ENCRYPTION_KEY_COLUMNS: &str = "key_id, public_key, public_key_material, encrypted_private_material, key_split_data, key_type, key_encryption_key_uri, creation_time, activation_time, expiration_time, ttl_time, created_at, updated_at";

#[allow(non_camel_case_types)]
pub struct encryption_key_params<'a> {
    pub key_id: &'a String,
    pub public_key: &'a String,
    pub public_key_material: &'a String,
    pub encrypted_private_material: &'a String,
    pub key_split_data: &'a String,
    pub key_type: &'a KeyType,
    pub key_encryption_key_uri: &'a String,
    pub creation_time: &'a WrappedChronoDateTime,
    pub activation_time: &'a WrappedChronoDateTime,
    pub expiration_time: &'a WrappedChronoDateTime,
    pub ttl_time: &'a WrappedChronoDateTime,
    pub created_at: &'a WrappedChronoDateTime,
    pub updated_at: &'a WrappedChronoDateTime,
}

impl encryption_key_params<'_> {
    fn into_params(self) -> Params {
        Params::Positional(vec![
            libsql::Value::Text(self.key_id.clone()),
            libsql::Value::Text(self.public_key.clone()),
            libsql::Value::Text(self.public_key_material.clone()),
            libsql::Value::Text(self.encrypted_private_material.clone()),
            libsql::Value::Text(self.key_split_data.clone()),
            (*self.key_type).into(),
            libsql::Value::Text(self.key_encryption_key_uri.clone()),
            (*self.creation_time).into(),
            (*self.activation_time).into(),
            (*self.expiration_time).into(),
            (*self.ttl_time).into(),
            (*self.created_at).into(),
            (*self.updated_at).into(),
        ])
    }
}

#[allow(non_camel_case_types)]
#[derive(Debug)]
pub struct Row_encryption_key {
    pub key_id: String,
    pub public_key: String,
    pub public_key_material: String,
    pub encrypted_private_material: String,
    pub key_split_data: String,
    /// Empty for records written before key types existed.
    pub key_type: String,
    pub key_encryption_key_uri: String,
    pub creation_time: String,
    pub activation_time: String,
    pub expiration_time: String,
    pub ttl_time: String,
    pub created_at: String,
    pub updated_at: String,
}

impl Row_encryption_key {
    fn from_row(row: &libsql::Row) -> Result<Self, libsql::Error> {
        Ok(Self {
            key_id: row.get(0)?,
            public_key: row.get(1)?,
            public_key_material: row.get(2)?,
            encrypted_private_material: row.get(3)?,
            key_split_data: row.get(4)?,
            key_type: row.get(5)?,
            key_encryption_key_uri: row.get(6)?,
            creation_time: row.get(7)?,
            activation_time: row.get(8)?,
            expiration_time: row.get(9)?,
            ttl_time: row.get(10)?,
            created_at: row.get(11)?,
            updated_at: row.get(12)?,
        })
    }
}

async fn collect_rows(mut rows: libsql::Rows) -> Result<Vec<Row_encryption_key>, libsql::Error> {
    let mut out = Vec::new();
    while let Some(row) = rows.next().await? {
        out.push(Row_encryption_key::from_row(&row)?);
    }
    Ok(out)
}

/// Returns the number of inserted rows, zero when the key id already exists.
pub async fn insert_encryption_key(
    conn: &libsql::Connection,
    params: encryption_key_params<'_>,
) -> Result<u64, libsql::Error> {
    conn.execute(
        &format!(
            "INSERT INTO encryption_key ({ENCRYPTION_KEY_COLUMNS})
VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
ON CONFLICT (key_id) DO NOTHING"
        ),
        params.into_params(),
    )
    .await
}

pub async fn upsert_encryption_key(
    conn: &shared::libsql::Connection,
    params: encryption_key_params<'_>,
) -> Result<u64, libsql::Error> {
    conn.execute(
        &format!(
            "INSERT INTO encryption_key ({ENCRYPTION_KEY_COLUMNS})
VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
ON CONFLICT (key_id) DO UPDATE SET
    public_key = excluded.public_key,
    public_key_material = excluded.public_key_material,
    encrypted_private_material = excluded.encrypted_private_material,
    key_split_data = excluded.key_split_data,
    key_type = excluded.key_type,
    key_encryption_key_uri = excluded.key_encryption_key_uri,
    creation_time = excluded.creation_time,
    activation_time = excluded.activation_time,
    expiration_time = excluded.expiration_time,
    ttl_time = excluded.ttl_time,
    updated_at = excluded.updated_at"
        ),
        params.into_params(),
    )
    .await
}

pub async fn get_encryption_key_by_id(
    conn: &shared::libsql::Connection,
    key_id: &str,
) -> Result<Option<Row_encryption_key>, libsql::Error> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {ENCRYPTION_KEY_COLUMNS}
FROM encryption_key
WHERE key_id = ?"
        ))
        .await?;
    let res = stmt.query_row(libsql::params![key_id.to_string()]).await;

    match res {
        Ok(row) => Ok(Some(Row_encryption_key::from_row(&row)?)),
        Err(libsql::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e),
    }
}

pub async fn get_encryption_keys_created_since(
    conn: &shared::libsql::Connection,
    since: &WrappedChronoDateTime,
) -> Result<Vec<Row_encryption_key>, libsql::Error> {
    let rows = conn
        .query(
            &format!(
                "SELECT {ENCRYPTION_KEY_COLUMNS}
FROM encryption_key
WHERE creation_time >= ?
ORDER BY creation_time ASC"
            ),
            libsql::params![libsql::Value::from(*since)],
        )
        .await?;
    collect_rows(rows).await
}

pub async fn get_active_encryption_keys(
    conn: &shared::libsql::Connection,
    at: &WrappedChronoDateTime,
    limit: i64,
) -> Result<Vec<Row_encryption_key>, libsql::Error> {
    let rows = conn
        .query(
            &format!(
                "SELECT {ENCRYPTION_KEY_COLUMNS}
FROM encryption_key
WHERE activation_time <= ? AND expiration_time > ?
ORDER BY expiration_time ASC, key_id ASC
LIMIT ?"
            ),
            libsql::params![libsql::Value::from(*at), libsql::Value::from(*at), limit],
        )
        .await?;
    collect_rows(rows).await
}

pub async fn get_placeholder_encryption_keys(
    conn: &shared::libsql::Connection,
) -> Result<Vec<Row_encryption_key>, libsql::Error> {
    let rows = conn
        .query(
            &format!(
                "SELECT {ENCRYPTION_KEY_COLUMNS}
FROM encryption_key
WHERE activation_time = expiration_time"
            ),
            (),
        )
        .await?;
    collect_rows(rows).await
}

pub async fn delete_encryption_key(
    conn: &shared::libsql::Connection,
    key_id: &str,
) -> Result<u64, libsql::Error> {
    conn.execute(
        "DELETE FROM encryption_key WHERE key_id = ?",
        libsql::params![key_id.to_string()],
    )
    .await
}
