//! Engine configuration loader.
//!
//! Reads `config.toml` from the data directory (`~/.skillchain/` in production)
//! and deserializes it into [`EngineConfig`]. Falls back to defaults when the
//! file is missing or malformed.

use std::path::{Path, PathBuf};

use skillchain_types::config::EngineConfig;

/// Resolve the data directory from environment or platform defaults.
///
/// Priority:
/// 1. `SKILLCHAIN_DATA_DIR` environment variable
/// 2. `~/.skillchain`
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("SKILLCHAIN_DATA_DIR") {
        return PathBuf::from(dir);
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".skillchain");
    }

    PathBuf::from(".skillchain")
}

/// Load engine configuration from `{data_dir}/config.toml`.
///
/// A missing file yields [`EngineConfig::default()`]. A file that cannot be
/// read or parsed is logged at warn level and also yields the defaults.
pub async fn load_engine_config(data_dir: &Path) -> EngineConfig {
    let config_path = data_dir.join("config.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
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

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config.default_max_retries, 3);
        assert_eq!(config.max_context_bytes, 10_485_760);
    }

    #[tokio::test]
    async fn valid_toml_is_parsed() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(
            tmp.path().join("config.toml"),
            r#"
default_max_total_failures = 25
max_context_bytes = 4096
"#,
        )
        .await
        .unwrap();

        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config.default_max_total_failures, 25);
        assert_eq!(config.max_context_bytes, 4096);
        assert_eq!(config.event_capacity, 1024);
    }

    #[tokio::test]
    async fn invalid_toml_returns_default() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(tmp.path().join("config.toml"), "max_context_bytes = [oops")
            .await
            .unwrap();

        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config.max_context_bytes, 10_485_760);
    }

    #[test]
    fn data_dir_from_env() {
        // SAFETY: This test is single-threaded and restores the env var immediately.
        unsafe {
            std::env::set_var("SKILLCHAIN_DATA_DIR", "/tmp/test-skillchain");
        }
        let dir = resolve_data_dir();
        assert_eq!(dir, PathBuf::from("/tmp/test-skillchain"));
        unsafe {
            std::env::remove_var("SKILLCHAIN_DATA_DIR");
        }
    }
}
