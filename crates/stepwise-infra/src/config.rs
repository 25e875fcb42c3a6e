//! Engine configuration loader for Stepwise.
//!
//! Reads `config.toml` from the data directory (`~/.stepwise/` in production)
//! or an explicit path and deserializes it into [`EngineConfig`]. Falls back
//! to defaults when the file is missing or malformed. Environment variables
//! win over the file.

use std::path::{Path, PathBuf};

use stepwise_types::config::EngineConfig;

use crate::sqlite::pool::database_url_for;

/// Overrides the data directory.
pub const DATA_DIR_ENV: &str = "STEPWISE_DATA_DIR";

/// Overrides `database_url`.
pub const DATABASE_URL_ENV: &str = "STEPWISE_DATABASE_URL";

/// Resolve the data directory: `STEPWISE_DATA_DIR`, else `~/.stepwise`.
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".stepwise")
}

/// Load engine configuration.
///
/// - `path` given: read that file; otherwise `{data_dir}/config.toml`.
/// - If the file does not exist, returns [`EngineConfig::default()`].
/// - If the file exists but fails to parse, logs a warning and returns the default.
/// - `STEPWISE_DATABASE_URL` replaces `database_url` either way.
pub async fn load_engine_config(path: Option<&Path>) -> EngineConfig {
    let config_path = match path {
        Some(p) => p.to_path_buf(),
        None => resolve_data_dir().join("config.toml"),
    };

    let mut config = read_config_file(&config_path).await;
    if let Ok(url) = std::env::var(DATABASE_URL_ENV) {
        config.database_url = Some(url);
    }
    config
}

async fn read_config_file(config_path: &Path) -> EngineConfig {
    let content = match tokio::fs::read_to_string(config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", config_path.display());
            return EngineConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return EngineConfig::default();
        }
    };

    match toml::from_str::<EngineConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            EngineConfig::default()
        }
    }
}

/// The database URL to open: the configured one, else the data-dir default.
pub fn resolve_database_url(config: &EngineConfig, data_dir: &Path) -> String {
    config
        .database_url
        .clone()
        .unwrap_or_else(|| database_url_for(data_dir))
}

/// Directory scanned for simple-workflow files.
pub fn resolve_workflows_dir(config: &EngineConfig, data_dir: &Path) -> PathBuf {
    config
        .engine
        .workflows_dir
        .clone()
        .unwrap_or_else(|| data_dir.join("workflows"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn load_engine_config_missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = read_config_file(&tmp.path().join("config.toml")).await;
        assert_eq!(config.server.port, 4002);
        assert!(config.database_url.is_none());
    }

    #[tokio::test]
    async fn load_engine_config_valid_toml_returns_parsed() {
        let tmp = TempDir::new().unwrap();
        let config_path = tmp.path().join("stepwise.toml");
        tokio::fs::write(
            &config_path,
            r#"
[server]
host = "0.0.0.0"
port = 9000

[poll]
interval_ms = 500

[engine]
resume_on_startup = false
workflows_dir = "/srv/workflows"
"#,
        )
        .await
        .unwrap();

        let config = read_config_file(&config_path).await;
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.poll.interval_ms, 500);
        assert_eq!(config.poll.timeout_ms, 30_000);
        assert!(!config.engine.resume_on_startup);
        assert_eq!(
            resolve_workflows_dir(&config, tmp.path()),
            PathBuf::from("/srv/workflows")
        );
    }

    #[tokio::test]
    async fn load_engine_config_invalid_toml_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config_path = tmp.path().join("config.toml");
        tokio::fs::write(&config_path, "this is not { valid toml !!!")
            .await
            .unwrap();

        let config = read_config_file(&config_path).await;
        assert_eq!(config.server.port, 4002);
        assert!(config.engine.resume_on_startup);
    }

    #[test]
    fn resolve_database_url_prefers_configured_value() {
        let tmp = TempDir::new().unwrap();
        let mut config = EngineConfig::default();
        assert!(resolve_database_url(&config, tmp.path()).ends_with("stepwise.db?mode=rwc"));

        config.database_url = Some("sqlite::memory:".to_string());
        assert_eq!(resolve_database_url(&config, tmp.path()), "sqlite::memory:");
    }

    #[test]
    fn resolve_workflows_dir_defaults_under_data_dir() {
        let config = EngineConfig::default();
        assert_eq!(
            resolve_workflows_dir(&config, Path::new("/data")),
            PathBuf::from("/data/workflows")
        );
    }
}
