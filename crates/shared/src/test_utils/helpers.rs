use std::path::PathBuf;
use std::sync::Once;

pub fn get_workspace_root() -> String {
    let crate_root = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    // crates/<name> -> workspace root
    crate_root
        .ancestors()
        .nth(2)
        .unwrap_or(crate_root.as_path())
        .to_string_lossy()
        .to_string()
}

pub struct TestContext {
    pub workspace_root: String,
    pub crate_root: String,
}

pub static INIT_TEST_ONCE: Once = Once::new();

#[macro_export]
macro_rules! setup_test {
    () => {{
        $crate::test_utils::helpers::INIT_TEST_ONCE.call_once(|| {
            $crate::crypto::ensure_crypto_registered().unwrap();
            $crate::env::load_optional_env_files();
            $crate::logging::configure_logging().unwrap();
        });

        $crate::test_utils::helpers::TestContext {
            workspace_root: $crate::test_utils::helpers::get_workspace_root(),
            crate_root: env!("CARGO_MANIFEST_DIR").to_string(),
        }
    }};
}
