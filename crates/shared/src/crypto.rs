use std::sync::OnceLock;

use tokio_rustls::rustls::crypto::CryptoProvider;

static CRYPTO_REGISTRATION: OnceLock<Result<(), String>> = OnceLock::new();

/// Process-wide crypto setup. Must run before any AEAD, signing or TLS
/// primitive is constructed; calling it again is a no-op returning the first outcome.
pub fn ensure_crypto_registered() -> Result<(), anyhow::Error> {
    CRYPTO_REGISTRATION
        .get_or_init(install_default_provider)
        .clone()
        .map_err(|e| anyhow::anyhow!(e))
}

fn install_default_provider() -> Result<(), String> {
    if CryptoProvider::get_default().is_some() {
        return Ok(());
    }

    match tokio_rustls::rustls::crypto::ring::default_provider().install_default() {
        Ok(()) => Ok(()),
        // lost a race with another installer, which is fine as long as one is present
        Err(_) if CryptoProvider::get_default().is_some() => Ok(()),
        Err(e) => Err(format!("Failed to install rustls crypto provider: {e:?}")),
    }
}
