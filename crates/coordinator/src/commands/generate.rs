use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, ValueEnum};
use key_management::client::HttpKeyStorageClient;
use key_management::logic::generation::{SplitKeyGenerationOrchestrator, SplitKeyGenerationReport};
use key_management::logic::kek::CachingKeyEncryptionKeyResolver;
use key_management::logic::key_id::KeyIdFactory;
use key_management::logic::peer::{DataKeyPeerCoordinator, DirectPeerCoordinator, PeerCoordinator};
use key_management::logic::signing::PublicKeySign;
use key_management::repository::Repository;
use shared::error::CommonError;
use shared::primitives::WrappedChronoDateTime;
use tracing::{error, info};
use url::Url;

use super::{DEFAULT_DATABASE_URL, DEFAULT_SIGNING_KEY_FILE, load_signer, open_repository, resolve_kek};

/// How the peer's key split is protected in transit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum KeySplitProvider {
    /// Encrypt under a data key the peer issues for the batch
    DataKey,
    /// Encrypt directly under the peer's key encryption key
    Direct,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum KeyIdType {
    Uuid,
    Sequence,
}

impl From<KeyIdType> for KeyIdFactory {
    fn from(value: KeyIdType) -> Self {
        match value {
            KeyIdType::Uuid => KeyIdFactory::Uuid,
            KeyIdType::Sequence => KeyIdFactory::Sequence,
        }
    }
}

/// Where the peer coordinator is and how to reach it.
#[derive(Args, Debug, Clone)]
pub struct PeerArgs {
    #[arg(long, env = "KEY_STORAGE_SERVICE_BASE_URL")]
    pub key_storage_service_base_url: Url,
    /// Fetch data keys from here instead of the key storage service
    #[arg(long, env = "GET_DATA_KEY_OVERRIDE_BASE_URL")]
    pub get_data_key_override_base_url: Option<Url>,
    #[arg(long, env = "KEY_SPLIT_PROVIDER", value_enum, default_value_t = KeySplitProvider::DataKey)]
    pub provider: KeySplitProvider,
    /// The peer's key encryption key, required by the direct provider
    #[arg(long, env = "PEER_KEK_URI")]
    pub peer_kek_uri: Option<String>,
    /// Per request timeout when talking to the peer
    #[arg(long, env = "PEER_REQUEST_TIMEOUT_SECS", default_value = "60")]
    pub request_timeout_secs: u64,
}

#[derive(Args, Debug, Clone)]
pub struct KeyArgs {
    /// This coordinator's key encryption key (aws-kms://<arn> or local-kek://<path>)
    #[arg(long, env = "COORDINATOR_KEK_URI")]
    pub kek_uri: String,
    #[arg(long, env = "COORDINATOR_SIGNING_KEY_FILE", default_value = DEFAULT_SIGNING_KEY_FILE)]
    pub signing_key_file: PathBuf,
    #[arg(long, env = "KEY_VALIDITY_IN_DAYS", default_value = "8")]
    pub validity_in_days: i64,
    #[arg(long, env = "KEY_TTL_IN_DAYS", default_value = "365")]
    pub ttl_in_days: i64,
    #[arg(long, env = "KEY_ID_TYPE", value_enum, default_value_t = KeyIdType::Uuid)]
    pub key_id_type: KeyIdType,
    #[arg(long, env = "COORDINATOR_DATABASE_URL", default_value = DEFAULT_DATABASE_URL)]
    pub database_url: Url,
}

#[derive(Args, Debug, Clone)]
pub struct GenerateParams {
    #[command(flatten)]
    pub peer: PeerArgs,
    #[command(flatten)]
    pub key: KeyArgs,
    #[arg(long, env = "KEY_COUNT", default_value = "5")]
    pub key_count: usize,
}

#[derive(Args, Debug, Clone)]
pub struct CoverageParams {
    #[command(flatten)]
    pub peer: PeerArgs,
    #[command(flatten)]
    pub key: KeyArgs,
    /// Number of keys that should be usable at any time
    #[arg(long, env = "KEY_COUNT", default_value = "5")]
    pub key_count: usize,
}

#[derive(Debug, Clone, Copy)]
enum GenerationMode {
    Now { count: usize },
    ReplaceExpiring { desired: usize },
    EnsureCoverage { desired: usize },
}

pub async fn cmd_generate(params: GenerateParams) -> Result<(), CommonError> {
    run(
        params.peer,
        params.key,
        GenerationMode::Now {
            count: params.key_count,
        },
    )
    .await
}

pub async fn cmd_replace_expiring(params: CoverageParams) -> Result<(), CommonError> {
    run(
        params.peer,
        params.key,
        GenerationMode::ReplaceExpiring {
            desired: params.key_count,
        },
    )
    .await
}

pub async fn cmd_ensure_coverage(params: CoverageParams) -> Result<(), CommonError> {
    run(
        params.peer,
        params.key,
        GenerationMode::EnsureCoverage {
            desired: params.key_count,
        },
    )
    .await
}

async fn run(peer: PeerArgs, key: KeyArgs, mode: GenerationMode) -> Result<(), CommonError> {
    let (_db, repository) = open_repository(&key.database_url).await?;
    let kek = resolve_kek(&key.kek_uri)?;
    let signer: Arc<dyn PublicKeySign> = load_signer(&key.signing_key_file)?;
    let client = HttpKeyStorageClient::new(
        peer.key_storage_service_base_url.clone(),
        peer.get_data_key_override_base_url.clone(),
    )?
    .with_request_timeout(Duration::from_secs(peer.request_timeout_secs));

    let report = match peer.provider {
        KeySplitProvider::DataKey => {
            // the data key names the peer KEK it was issued under
            let resolver = CachingKeyEncryptionKeyResolver::new();
            let orchestrator = SplitKeyGenerationOrchestrator::new(
                repository,
                DataKeyPeerCoordinator::new(client, Arc::new(resolver)),
                kek,
                Some(signer),
                key.key_id_type.into(),
            );
            generate(&orchestrator, &key, mode).await?
        }
        KeySplitProvider::Direct => {
            let peer_kek_uri = peer.peer_kek_uri.as_deref().ok_or_else(|| {
                CommonError::invalid_argument("--peer-kek-uri is required by the direct provider")
            })?;
            let orchestrator = SplitKeyGenerationOrchestrator::new(
                repository,
                DirectPeerCoordinator::new(client, resolve_kek(peer_kek_uri)?),
                kek,
                Some(signer),
                key.key_id_type.into(),
            );
            generate(&orchestrator, &key, mode).await?
        }
    };

    summarize(&report)
}

async fn generate<P: PeerCoordinator>(
    orchestrator: &SplitKeyGenerationOrchestrator<Repository, P>,
    key: &KeyArgs,
    mode: GenerationMode,
) -> Result<SplitKeyGenerationReport, CommonError> {
    match mode {
        GenerationMode::Now { count } => {
            orchestrator
                .create_split_key(
                    count,
                    key.validity_in_days,
                    key.ttl_in_days,
                    WrappedChronoDateTime::now(),
                )
                .await
        }
        GenerationMode::ReplaceExpiring { desired } => {
            orchestrator
                .replace_expiring_keys(desired, key.validity_in_days, key.ttl_in_days)
                .await
        }
        GenerationMode::EnsureCoverage { desired } => {
            orchestrator
                .ensure_active_key_coverage(desired, key.validity_in_days, key.ttl_in_days)
                .await
        }
    }
}

fn summarize(report: &SplitKeyGenerationReport) -> Result<(), CommonError> {
    for key_id in &report.created_key_ids {
        println!("{key_id}");
    }
    info!(
        created = report.created_key_ids.len(),
        failed = report.failures.len(),
        "key generation done"
    );

    if report.failures.is_empty() {
        return Ok(());
    }
    for failure in &report.failures {
        error!("{:?}", failure);
    }
    Err(CommonError::internal(format!(
        "{} of {} keys failed to generate",
        report.failures.len(),
        report.requested()
    )))
}
