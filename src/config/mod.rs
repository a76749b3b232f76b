//! Configuration loading
//!
//! Handles the JSON configuration file and state-directory resolution.
//! Section-specific settings are decoded next to their consumers
//! (`build_http_config` in `server::http`, `build_poll_config` in
//! `poller::runner`, and so on); this module only locates, reads, and
//! parses the file.

use serde_json::Value;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {message}")]
    ReadError { path: String, message: String },

    #[error("Failed to parse JSON at {path}: {message}")]
    ParseError { path: String, message: String },

    #[error("Config root must be an object at {path}")]
    NotAnObject { path: String },
}

/// Get the config file path.
/// Priority: TELSON_CONFIG_PATH > TELSON_STATE_DIR/telson.json > ~/.telson/telson.json
pub fn get_config_path() -> PathBuf {
    if let Ok(path) = env::var("TELSON_CONFIG_PATH") {
        return PathBuf::from(path);
    }

    resolve_state_dir().join("telson.json")
}

/// Get the state directory holding the cursor row, session rows, and
/// archive blobs.
/// Priority: TELSON_STATE_DIR > ~/.telson
pub fn resolve_state_dir() -> PathBuf {
    if let Ok(state_dir) = env::var("TELSON_STATE_DIR") {
        return PathBuf::from(state_dir);
    }

    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".telson")
}

/// Load and parse the configuration file.
/// Returns an empty object `{}` if the file doesn't exist, so every
/// section falls back to its defaults.
pub fn load_config() -> Result<Value, ConfigError> {
    load_config_from(&get_config_path())
}

/// Load config from an explicit path.
pub fn load_config_from(path: &Path) -> Result<Value, ConfigError> {
    if !path.exists() {
        return Ok(Value::Object(serde_json::Map::new()));
    }

    let content = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;

    let value: Value = serde_json::from_str(&content).map_err(|e| ConfigError::ParseError {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;

    if !value.is_object() {
        return Err(ConfigError::NotAnObject {
            path: path.display().to_string(),
        });
    }

    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Mutex to serialize tests that modify environment variables
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn create_temp_config(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_load_config_basic() {
        let dir = TempDir::new().unwrap();
        let path = create_temp_config(
            &dir,
            "telson.json",
            r#"{ "telegram": { "botToken": "123:abc" }, "poll": { "intervalSecs": 2 } }"#,
        );

        let config = load_config_from(&path).unwrap();

        assert_eq!(config["telegram"]["botToken"], "123:abc");
        assert_eq!(config["poll"]["intervalSecs"], 2);
    }

    #[test]
    fn test_load_config_missing_returns_empty_object() {
        let path = PathBuf::from("/nonexistent/path/telson.json");
        let config = load_config_from(&path).unwrap();

        assert!(config.is_object());
        assert!(config.as_object().unwrap().is_empty());
    }

    #[test]
    fn test_load_config_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = create_temp_config(&dir, "telson.json", "{ not valid json ");

        let result = load_config_from(&path);

        assert!(matches!(result, Err(ConfigError::ParseError { .. })));
    }

    #[test]
    fn test_load_config_rejects_non_object_root() {
        let dir = TempDir::new().unwrap();
        let path = create_temp_config(&dir, "telson.json", r#"[1, 2, 3]"#);

        let result = load_config_from(&path);

        assert!(matches!(result, Err(ConfigError::NotAnObject { .. })));
    }

    #[test]
    fn test_get_config_path_override() {
        let _lock = ENV_LOCK.lock().unwrap();
        env::remove_var("TELSON_STATE_DIR");
        env::set_var("TELSON_CONFIG_PATH", "/custom/path/config.json");

        let path = get_config_path();
        assert_eq!(path, PathBuf::from("/custom/path/config.json"));

        env::remove_var("TELSON_CONFIG_PATH");
    }

    #[test]
    fn test_get_config_path_state_dir() {
        let _lock = ENV_LOCK.lock().unwrap();
        env::remove_var("TELSON_CONFIG_PATH");
        env::set_var("TELSON_STATE_DIR", "/custom/state");

        let path = get_config_path();
        assert_eq!(path, PathBuf::from("/custom/state/telson.json"));

        env::remove_var("TELSON_STATE_DIR");
    }

    #[test]
    fn test_resolve_state_dir_default() {
        let _lock = ENV_LOCK.lock().unwrap();
        env::remove_var("TELSON_STATE_DIR");

        let dir = resolve_state_dir();
        assert!(dir.ends_with(".telson"));
    }
}
