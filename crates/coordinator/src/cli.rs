use std::error::Error;

use clap::{Parser, Subcommand};
use shared::error::CommonError;

use crate::commands::{
    self,
    generate::{CoverageParams, GenerateParams},
    serve::ServeParams,
    signing_key::SigningKeyParams,
};

pub const CLI_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "coordinator", version = CLI_VERSION)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[allow(clippy::large_enum_variant)]
#[derive(Subcommand)]
pub enum Commands {
    /// Run the key storage service the peer coordinator sends key splits to
    Serve(ServeParams),
    /// Generate split keys together with the peer coordinator
    Generate(GenerateParams),
    /// Replace keys that expire within the refresh window
    #[command(name = "replace-expiring")]
    ReplaceExpiring(CoverageParams),
    /// Keep enough keys active now and scheduled for when they expire
    #[command(name = "ensure-coverage")]
    EnsureCoverage(CoverageParams),
    /// Print the public key peers use to verify this coordinator's signatures
    #[command(name = "public-signing-key")]
    PublicSigningKey(SigningKeyParams),
    /// Print the key storage service OpenAPI document
    Openapi,
}

fn log_error_chain(err: &(dyn Error)) {
    let mut current: Option<&(dyn Error)> = err.source();

    while let Some(e) = current {
        eprintln!("Caused by: {e}");
        current = e.source();
    }
}

fn handle_error(err: &CommonError) {
    eprintln!("Error: {err}");
    log_error_chain(err);
    ::std::process::exit(1);
}

pub async fn run_cli(cli: Cli) -> Result<(), anyhow::Error> {
    let cmd_res = match cli.command {
        Commands::Serve(params) => commands::serve::cmd_serve(params).await,
        Commands::Generate(params) => commands::generate::cmd_generate(params).await,
        Commands::ReplaceExpiring(params) => {
            commands::generate::cmd_replace_expiring(params).await
        }
        Commands::EnsureCoverage(params) => commands::generate::cmd_ensure_coverage(params).await,
        Commands::PublicSigningKey(params) => commands::signing_key::cmd_public_signing_key(params),
        Commands::Openapi => commands::cmd_openapi(),
    };

    if let Err(e) = cmd_res {
        handle_error(&e);
    }
    Ok(())
}

#[cfg(all(test, feature = "unit_test"))]
mod unit_test {
    use super::*;
    use crate::commands::generate::{KeyIdType, KeySplitProvider};

    #[test]
    fn test_generate_defaults() {
        let cli = Cli::try_parse_from([
            "coordinator",
            "generate",
            "--key-storage-service-base-url",
            "https://coordinator-b.example.com",
            "--kek-uri",
            "local-kek://./keys/a.key",
        ])
        .unwrap();

        let Commands::Generate(params) = cli.command else {
            panic!("expected generate");
        };
        assert_eq!(params.key_count, 5);
        assert_eq!(params.key.validity_in_days, 8);
        assert_eq!(params.key.ttl_in_days, 365);
        assert_eq!(params.key.key_id_type, KeyIdType::Uuid);
        assert_eq!(params.peer.provider, KeySplitProvider::DataKey);
        assert!(params.peer.get_data_key_override_base_url.is_none());
        assert_eq!(params.peer.request_timeout_secs, 60);
    }

    #[test]
    fn test_generate_direct_with_sequence_ids() {
        let cli = Cli::try_parse_from([
            "coordinator",
            "generate",
            "--key-storage-service-base-url",
            "https://coordinator-b.example.com",
            "--kek-uri",
            "local-kek://./keys/a.key",
            "--provider",
            "direct",
            "--peer-kek-uri",
            "local-kek://./keys/b.key",
            "--key-id-type",
            "sequence",
            "--key-count",
            "2",
            "--request-timeout-secs",
            "5",
        ])
        .unwrap();

        let Commands::Generate(params) = cli.command else {
            panic!("expected generate");
        };
        assert_eq!(params.key_count, 2);
        assert_eq!(params.peer.provider, KeySplitProvider::Direct);
        assert_eq!(params.key.key_id_type, KeyIdType::Sequence);
        assert_eq!(params.peer.request_timeout_secs, 5);
        assert_eq!(
            params.peer.peer_kek_uri.as_deref(),
            Some("local-kek://./keys/b.key")
        );
    }

    #[test]
    fn test_serve_defaults() {
        let cli = Cli::try_parse_from([
            "coordinator",
            "serve",
            "--kek-uri",
            "local-kek://./b.key",
            "--data-key-kek-uri",
            "local-kek://./b-data-keys.key",
        ])
        .unwrap();

        let Commands::Serve(params) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(params.port, 3000);
        assert_eq!(params.host, "127.0.0.1");
        assert_eq!(params.data_key_validity_secs, 3600);
        assert_eq!(params.data_key_kek_uri, "local-kek://./b-data-keys.key");
        assert_ne!(params.data_key_signing_key_file, params.signing_key_file);
    }

    #[test]
    fn test_serve_requires_data_key_kek() {
        assert!(
            Cli::try_parse_from(["coordinator", "serve", "--kek-uri", "local-kek://./b.key"])
                .is_err()
        );
    }

    #[test]
    fn test_unknown_provider_is_rejected() {
        assert!(
            Cli::try_parse_from([
                "coordinator",
                "generate",
                "--key-storage-service-base-url",
                "https://coordinator-b.example.com",
                "--kek-uri",
                "local-kek://./keys/a.key",
                "--provider",
                "carrier-pigeon",
            ])
            .is_err()
        );
    }
}
