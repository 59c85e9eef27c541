use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use key_management::logic::data_key::DataKeyExchange;
use key_management::logic::signing::{PublicKeySign, PublicKeyVerify};
use key_management::logic::storage::KeyStorageService;
use shared::error::CommonError;
use tracing::info;
use url::Url;

use super::{
    DEFAULT_DATA_KEY_SIGNING_KEY_FILE, DEFAULT_DATABASE_URL, DEFAULT_SIGNING_KEY_FILE, load_signer,
    open_repository, resolve_kek,
};
use crate::router;

const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Args, Debug, Clone)]
pub struct ServeParams {
    #[arg(long, env = "COORDINATOR_HOST", default_value = "127.0.0.1")]
    pub host: String,
    #[arg(long, env = "COORDINATOR_PORT", default_value = "3000")]
    pub port: u16,
    /// Key encryption key stored splits are kept under (aws-kms://<arn> or local-kek://<path>)
    #[arg(long, env = "COORDINATOR_KEK_URI")]
    pub kek_uri: String,
    /// Base64 Ed25519 seed used to sign stored keys, created if missing
    #[arg(long, env = "COORDINATOR_SIGNING_KEY_FILE", default_value = DEFAULT_SIGNING_KEY_FILE)]
    pub signing_key_file: PathBuf,
    /// Key encryption key data keys are issued under. The peer coordinator
    /// decrypts data keys with it, so it must differ from `--kek-uri`
    #[arg(long, env = "COORDINATOR_DATA_KEY_KEK_URI")]
    pub data_key_kek_uri: String,
    /// Base64 Ed25519 seed used to sign issued data keys, created if missing
    #[arg(
        long,
        env = "COORDINATOR_DATA_KEY_SIGNING_KEY_FILE",
        default_value = DEFAULT_DATA_KEY_SIGNING_KEY_FILE
    )]
    pub data_key_signing_key_file: PathBuf,
    /// How long an issued data key stays usable
    #[arg(long, env = "COORDINATOR_DATA_KEY_VALIDITY_SECS", default_value = "3600")]
    pub data_key_validity_secs: u32,
    #[arg(long, env = "COORDINATOR_DATABASE_URL", default_value = DEFAULT_DATABASE_URL)]
    pub database_url: Url,
}

pub async fn cmd_serve(params: ServeParams) -> Result<(), CommonError> {
    let addr: SocketAddr = format!("{}:{}", params.host, params.port)
        .parse()
        .map_err(|e| CommonError::AddrParseError { source: e })?;

    let (_db, repository) = open_repository(&params.database_url).await?;
    let kek = resolve_kek(&params.kek_uri)?;
    let signer: Arc<dyn PublicKeySign> = load_signer(&params.signing_key_file)?;

    let data_key_signer = load_signer(&params.data_key_signing_key_file)?;
    let data_key_verifier: Arc<dyn PublicKeyVerify> = Arc::new(data_key_signer.verifier());
    let exchange = DataKeyExchange::new(
        resolve_kek(&params.data_key_kek_uri)?,
        data_key_signer,
        data_key_verifier,
        chrono::Duration::seconds(i64::from(params.data_key_validity_secs)),
    );
    let service = KeyStorageService::new(repository, kek, Some(signer), exchange)?;
    let router = router::initiate_routers(service);

    info!("Starting server on {}", addr);

    let handle = axum_server::Handle::new();
    let shutdown_handle = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutting down axum server");
            shutdown_handle.graceful_shutdown(Some(GRACEFUL_SHUTDOWN_TIMEOUT));
        }
    });

    axum_server::bind(addr)
        .handle(handle)
        .serve(router.into_make_service())
        .await?;

    info!("Axum server shut down");
    Ok(())
}
