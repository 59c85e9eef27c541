use std::path::PathBuf;

use clap::Args;
use shared::error::CommonError;

use super::{DEFAULT_SIGNING_KEY_FILE, load_signer};

#[derive(Args, Debug, Clone)]
pub struct SigningKeyParams {
    #[arg(long, env = "COORDINATOR_SIGNING_KEY_FILE", default_value = DEFAULT_SIGNING_KEY_FILE)]
    pub signing_key_file: PathBuf,
}

pub fn cmd_public_signing_key(params: SigningKeyParams) -> Result<(), CommonError> {
    let signer = load_signer(&params.signing_key_file)?;
    println!("{}", signer.verifying_key_base64());
    Ok(())
}
