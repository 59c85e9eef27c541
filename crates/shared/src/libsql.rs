use std::collections::BTreeMap;
use std::ops::Deref;
use std::path::{Path, PathBuf};

use crate::error::CommonError;
use libsql::params::IntoParams;
use libsql::{BatchRows, Database, Rows};
use tracing::{debug, info};
use url::Url;

#[derive(Debug, Clone)]
pub struct Connection(pub libsql::Connection);

impl Connection {
    pub fn new(connection: libsql::Connection) -> Self {
        Self(connection)
    }
}

impl Deref for Connection {
    type Target = libsql::Connection;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[macro_export]
macro_rules! execute_with_retry {
    ($operation:expr) => {
        execute_with_retry!($operation, 10)
    };
    ($operation:expr, $max_retries:expr) => {{
        async {
            let mut _retries = 0u32;
            let _max_retries: u32 = $max_retries;

            loop {
                match $operation.await {
                    Ok(result) => break Ok(result),
                    Err(err) => {
                        let err_str = err.to_string();
                        if err_str.contains("database is locked") || err_str.contains("SQLITE_BUSY")
                        {
                            tracing::warn!("Database is locked, retrying... {:?}", err);
                            if _retries >= _max_retries {
                                break Err(err);
                            }

                            _retries += 1;

                            let delay_us = 10_000 * (1 << _retries.min(6));
                            tokio::time::sleep(std::time::Duration::from_micros(delay_us)).await;
                        } else {
                            tracing::error!("Error executing with retry: {:?}", err);
                            break Err(err);
                        }
                    }
                }
            }
        }
        .await
    }};
}

impl Connection {
    /// Execute a statement, retrying while the database is locked. Returns the
    /// number of changed rows.
    pub async fn execute(&self, sql: &str, params: impl IntoParams) -> libsql::Result<u64> {
        tracing::trace!("executing `{}`", sql);
        let params = params.into_params()?;
        execute_with_retry!(self.0.execute(sql, params.clone()), 10)
    }

    pub async fn execute_batch(&self, sql: &str) -> libsql::Result<BatchRows> {
        tracing::trace!("executing batch `{}`", sql);
        execute_with_retry!(self.0.execute_batch(sql), 10)
    }

    pub async fn query(&self, sql: &str, params: impl IntoParams) -> libsql::Result<Rows> {
        let stmt = self.prepare(sql).await?;
        let params = params.into_params()?;
        execute_with_retry!(stmt.query(params.clone()), 10)
    }
}

/// Where a database lives, parsed from a `libsql://` url.
///
/// `libsql://./data/keys.db?mode=local` opens a local file, `mode=memory` an
/// in-process database and `libsql://host?mode=remote&auth=...` a remote one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionType {
    Local { path_to_db_file: PathBuf },
    Memory,
    Remote { remote_url: String, auth_token: String },
}

fn get_libsql_path(url: &Url) -> String {
    if url.as_str().starts_with("libsql://./") {
        format!(".{}", url.path())
    } else {
        url.path().to_string()
    }
}

fn query_param(url: &Url, key: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, value)| value.to_string())
}

impl TryFrom<Url> for ConnectionType {
    type Error = CommonError;

    fn try_from(url: Url) -> Result<Self, Self::Error> {
        if url.scheme() != "libsql" {
            let scheme = url.scheme();
            return Err(CommonError::invalid_argument(format!(
                "invalid database url scheme: {scheme}"
            )));
        }

        let mode = query_param(&url, "mode")
            .ok_or_else(|| CommonError::invalid_argument("missing mode query parameter"))?;

        match mode.as_str() {
            "local" => Ok(ConnectionType::Local {
                path_to_db_file: PathBuf::from(get_libsql_path(&url)),
            }),
            "memory" => Ok(ConnectionType::Memory),
            "remote" => {
                let auth_token = query_param(&url, "auth").ok_or_else(|| {
                    CommonError::invalid_argument("missing auth query parameter for remote")
                })?;
                let mut remote_url = url.clone();
                remote_url.set_query(None);
                Ok(ConnectionType::Remote {
                    remote_url: remote_url.to_string(),
                    auth_token,
                })
            }
            _ => Err(CommonError::invalid_argument(format!(
                "invalid database mode: {mode}"
            ))),
        }
    }
}

pub type Migrations<'a> = BTreeMap<&'a str, BTreeMap<&'a str, &'a str>>;

/// Apply the `.up.` sqlite migrations in file-name order.
pub async fn run_migrations(conn: &Connection, migrations: &Migrations<'_>) -> Result<(), CommonError> {
    let Some(sqlite_migrations) = migrations.get("sqlite") else {
        return Ok(());
    };

    for (file_name, contents) in sqlite_migrations
        .iter()
        .filter(|(file_name, _)| file_name.contains(".up."))
    {
        debug!("applying migration {}", file_name);
        conn.execute_batch(contents).await?;
    }

    Ok(())
}

fn create_db_file_parent_dir(parent_path: Option<&Path>) -> Result<(), CommonError> {
    if let Some(path) = parent_path {
        if !path.as_os_str().is_empty() && !std::fs::exists(path)? {
            std::fs::create_dir_all(path)?;
        }
    }
    Ok(())
}

pub async fn establish_db_connection(
    connection_string: &Url,
    migrations: Option<Migrations<'_>>,
) -> Result<(Database, Connection), CommonError> {
    let connection_type = ConnectionType::try_from(connection_string.clone())?;

    let db = match connection_type {
        ConnectionType::Local { path_to_db_file } => {
            info!("establishing local connection");
            create_db_file_parent_dir(path_to_db_file.parent())?;
            libsql::Builder::new_local(path_to_db_file).build().await?
        }
        ConnectionType::Memory => {
            info!("establishing in-memory connection");
            libsql::Builder::new_local(":memory:").build().await?
        }
        ConnectionType::Remote {
            remote_url,
            auth_token,
        } => {
            info!("establishing remote connection");
            libsql::Builder::new_remote(remote_url, auth_token)
                .build()
                .await?
        }
    };
    let conn = Connection(db.connect()?);

    if let Some(migrations) = migrations {
        run_migrations(&conn, &migrations).await?;
    }

    Ok((db, conn))
}

#[cfg(all(test, feature = "unit_test"))]
mod unit_test {
    use super::*;

    #[test]
    fn test_parse_local_relative_url() {
        let url = Url::parse("libsql://./data/keys.db?mode=local").unwrap();
        let parsed = ConnectionType::try_from(url).unwrap();
        assert_eq!(
            parsed,
            ConnectionType::Local {
                path_to_db_file: PathBuf::from("./data/keys.db")
            }
        );
    }

    #[test]
    fn test_parse_remote_url_requires_auth() {
        let url = Url::parse("libsql://db.example.com?mode=remote").unwrap();
        let err = ConnectionType::try_from(url).unwrap_err();
        assert!(err.to_string().contains("auth"), "got: {err}");

        let url = Url::parse("libsql://db.example.com?mode=remote&auth=token").unwrap();
        match ConnectionType::try_from(url).unwrap() {
            ConnectionType::Remote {
                remote_url,
                auth_token,
            } => {
                assert_eq!(auth_token, "token");
                assert!(!remote_url.contains("auth="));
            }
            other => panic!("expected remote connection, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_rejects_other_schemes() {
        let url = Url::parse("postgres://localhost/keys").unwrap();
        assert!(ConnectionType::try_from(url).is_err());
    }

    #[tokio::test]
    async fn test_memory_connection_runs_migrations() {
        let mut files = BTreeMap::new();
        files.insert(
            "0001_init.up.sql",
            "CREATE TABLE IF NOT EXISTS t (id TEXT PRIMARY KEY);",
        );
        files.insert("0001_init.down.sql", "DROP TABLE t;");
        let mut migrations = Migrations::new();
        migrations.insert("sqlite", files);

        let url = Url::parse("libsql://memory?mode=memory").unwrap();
        let (_db, conn) = establish_db_connection(&url, Some(migrations))
            .await
            .unwrap();

        conn.execute("INSERT INTO t (id) VALUES (?)", libsql::params!["a"])
            .await
            .unwrap();
        let mut rows = conn.query("SELECT id FROM t", ()).await.unwrap();
        let row = rows.next().await.unwrap().unwrap();
        let id: String = row.get(0).unwrap();
        assert_eq!(id, "a");
    }
}
