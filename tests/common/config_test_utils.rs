use std::ffi::OsString;
use std::sync::{Mutex, OnceLock};

use tempfile::TempDir;

const VARS: &[&str] = &[
    "MSGLINK_SERVER__PROTOCOL_CHECK_URL",
    "MSGLINK_DEVICE__MOBILE_ID",
    "MSGLINK_HTTP__REQUEST_TIMEOUT_SECS",
    "MSGLINK_HTTP__ARCHIVE_TIMEOUT_SECS",
    "MSGLINK_ORG_SYNC__DB_FILE_NAME",
    "MSGLINK_ORG_SYNC__SETTLE_DELAY_MS",
];

fn env_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

struct EnvRestore {
    saved: Vec<(&'static str, Option<OsString>)>,
}

impl Drop for EnvRestore {
    fn drop(&mut self) {
        for (name, value) in self.saved.drain(..) {
            match value {
                Some(value) => std::env::set_var(name, value),
                None => std::env::remove_var(name),
            }
        }
    }
}

/// Run `f` with a config file holding `config_toml` and every `MSGLINK_`
/// variable this suite touches cleared. `f` receives the file path.
pub fn with_config_env<T>(config_toml: &str, f: impl FnOnce(&std::path::Path) -> T) -> T {
    let _guard = env_lock().lock().unwrap_or_else(|e| e.into_inner());
    let temp_dir = TempDir::new().expect("temp dir");
    let path = temp_dir.path().join("config.toml");
    std::fs::write(&path, config_toml).expect("write config");

    let restore = EnvRestore {
        saved: VARS.iter().map(|v| (*v, std::env::var_os(v))).collect(),
    };
    for var in VARS {
        std::env::remove_var(var);
    }

    let result = f(&path);
    drop(restore);
    result
}
