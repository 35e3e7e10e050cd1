//! Default paths for caretaker components
//!
//! Paths are user-writable by default (no root required):
//! - Config: `$XDG_CONFIG_HOME/caretaker/config.toml` or `~/.config/caretaker/config.toml`
//! - Data: `$XDG_DATA_HOME/caretaker` or `~/.local/share/caretaker`

use std::path::PathBuf;

/// Environment variable for overriding the config file path
pub const CARETAKER_CONFIG_ENV: &str = "CARETAKER_CONFIG";

/// Environment variable for overriding the data directory
pub const CARETAKER_DATA_DIR_ENV: &str = "CARETAKER_DATA_DIR";

/// Application subdirectory name
const APP_DIR: &str = "caretaker";

/// Config filename within the config directory
const CONFIG_FILENAME: &str = "config.toml";

/// Database filename within the data directory
pub const DATABASE_FILENAME: &str = "caretaker.db";

/// Get the default config file path.
///
/// Order of precedence:
/// 1. `$CARETAKER_CONFIG` environment variable (if set)
/// 2. `$XDG_CONFIG_HOME/caretaker/config.toml` (via the platform config dir)
/// 3. `/tmp/caretaker/config.toml` (fallback)
pub fn default_config_path() -> PathBuf {
    if let Ok(path) = std::env::var(CARETAKER_CONFIG_ENV) {
        return PathBuf::from(path);
    }

    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(APP_DIR)
        .join(CONFIG_FILENAME)
}

/// Get the default data directory.
///
/// Order of precedence:
/// 1. `$CARETAKER_DATA_DIR` environment variable (if set)
/// 2. `$XDG_DATA_HOME/caretaker` (via the platform data dir)
/// 3. `/tmp/caretaker/data` (fallback)
pub fn default_data_dir() -> PathBuf {
    if let Ok(path) = std::env::var(CARETAKER_DATA_DIR_ENV) {
        return PathBuf::from(path);
    }

    data_dir_without_env()
}

/// Get the data directory without checking CARETAKER_DATA_DIR env var.
/// Used for default values in configs where the env var is checked separately.
pub fn data_dir_without_env() -> PathBuf {
    match dirs::data_dir() {
        Some(dir) => dir.join(APP_DIR),
        None => PathBuf::from("/tmp").join(APP_DIR).join("data"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_dir_contains_caretaker() {
        let path = data_dir_without_env();
        assert!(path.to_string_lossy().contains("caretaker"));
    }

    #[test]
    fn config_path_is_toml() {
        let path = default_config_path();
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("toml"));
    }
}
