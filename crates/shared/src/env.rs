use std::path::PathBuf;

use tracing::{debug, trace, warn};

const ENV_FILES: [&str; 2] = [".env", ".env.secrets"];

fn find_env_file(file_name: &str) -> Option<PathBuf> {
    let in_cwd = PathBuf::from(file_name);
    let in_workspace_root = PathBuf::from("./../../").join(file_name);

    [in_cwd, in_workspace_root]
        .into_iter()
        .find(|candidate| candidate.exists())
        .inspect(|path| trace!("Loading environment variables from: {}", path.display()))
}

fn load_optional_env_file(file_name: &str) {
    let Some(path) = find_env_file(file_name) else {
        debug!(
            "No environment variables file found with name: {:?} in current directory or workspace root",
            file_name
        );
        return;
    };

    match dotenv::from_filename(&path) {
        Ok(_) => debug!("Loaded environment variables from: {}", path.display()),
        Err(e) => warn!(
            "Failed to load environment variables from {}: {}",
            path.display(),
            e
        ),
    }
}

pub fn load_optional_env_files() {
    for file_name in ENV_FILES {
        load_optional_env_file(file_name);
    }
}

pub fn configure_env() -> Result<(), anyhow::Error> {
    load_optional_env_files();
    Ok(())
}
