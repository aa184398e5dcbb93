use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Environment variable that overrides `security.token_secret`.
pub const TOKEN_SECRET_ENV: &str = "ATELIER_TOKEN_SECRET";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,

    pub server: ServerConfig,

    pub security: SecurityConfig,

    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Directory holding the JSON collections, their lock files and drawing images.
    pub data_dir: String,

    /// SQLite URL for posts and comments.
    pub database_path: String,

    pub log_level: String,

    /// "pretty" or "json"
    pub log_format: String,

    /// Number of tokio worker threads (default: 4)
    /// Set to 0 to use the number of CPU cores
    pub worker_threads: usize,

    /// Maximum database connections (default: 5)
    pub max_db_connections: u32,

    /// Minimum database connections (default: 1)
    pub min_db_connections: u32,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "data".to_string(),
            database_path: "sqlite:data/blog.db".to_string(),
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            worker_threads: 4,
            max_db_connections: 5,
            min_db_connections: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,

    pub cors_allowed_origins: Vec<String>,

    /// Upper bound on request bodies; drawings arrive base64 encoded.
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8040,
            cors_allowed_origins: vec![
                "http://localhost:8040".to_string(),
                "http://127.0.0.1:8040".to_string(),
            ],
            max_body_bytes: 4 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// HMAC key for bearer tokens. Overridden by `ATELIER_TOKEN_SECRET`.
    /// Never serialized back to disk.
    #[serde(skip_serializing)]
    pub token_secret: Option<String>,

    /// Lifetime of an issued token in seconds (default: one hour)
    pub token_ttl_seconds: u64,

    /// Argon2 memory cost in KiB (default: 8192 = 8MB)
    pub argon2_memory_cost_kib: u32,

    /// Argon2 time cost (iterations)
    pub argon2_time_cost: u32,

    /// Argon2 parallelism (default: 1)
    pub argon2_parallelism: u32,

    pub min_password_length: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            token_secret: None,
            token_ttl_seconds: 60 * 60,
            argon2_memory_cost_kib: 8192,
            argon2_time_cost: 3,
            argon2_parallelism: 1,
            min_password_length: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub metrics_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: true,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let paths = Self::config_paths();

        let mut config = None;
        for path in &paths {
            if path.exists() {
                info!("Loading config from: {}", path.display());
                config = Some(Self::load_from_path(path)?);
                break;
            }
        }

        let mut config = config.unwrap_or_else(|| {
            info!("No config file found, using defaults");
            Self::default()
        });
        config.apply_env();
        Ok(config)
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Environment overrides win over the file.
    pub fn apply_env(&mut self) {
        if let Ok(secret) = std::env::var(TOKEN_SECRET_ENV)
            && !secret.is_empty()
        {
            self.security.token_secret = Some(secret);
        }
    }

    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Config saved to: {}", path.display());
        Ok(())
    }

    fn config_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("config.toml")];

        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("atelier").join("config.toml"));
        }

        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".atelier").join("config.toml"));
        }

        paths
    }

    fn default_config_path() -> PathBuf {
        PathBuf::from("config.toml")
    }

    pub fn create_default_if_missing() -> Result<bool> {
        let path = Self::default_config_path();
        if path.exists() {
            Ok(false)
        } else {
            Self::default().save_to_path(&path)?;
            info!("Created default config file: {}", path.display());
            Ok(true)
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self.security.token_secret.as_deref() {
            None | Some("") => anyhow::bail!(
                "Token secret is not configured; set security.token_secret or {TOKEN_SECRET_ENV}"
            ),
            Some(_) => {}
        }

        if self.security.token_ttl_seconds == 0 {
            anyhow::bail!("security.token_ttl_seconds must be > 0");
        }

        if self.general.data_dir.trim().is_empty() {
            anyhow::bail!("general.data_dir cannot be empty");
        }

        Ok(())
    }

    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(&self.general.data_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.security.token_ttl_seconds, 3600);
        assert_eq!(config.general.data_dir, "data");
        assert!(config.security.token_secret.is_none());
    }

    #[test]
    fn test_missing_secret_fails_validation() {
        let config = Config::default();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Token secret"));

        let mut config = Config::default();
        config.security.token_secret = Some(String::new());
        assert!(config.validate().is_err());

        config.security.token_secret = Some("s3cret".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_secret_is_not_serialized() {
        let mut config = Config::default();
        config.security.token_secret = Some("do-not-write".to_string());
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[security]"));
        assert!(!toml_str.contains("do-not-write"));
    }

    #[test]
    fn test_config_deserialization() {
        let toml_str = r#"
            [general]
            log_level = "debug"

            [security]
            token_secret = "abc"
            token_ttl_seconds = 60
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.general.log_level, "debug");
        assert_eq!(config.security.token_secret.as_deref(), Some("abc"));
        assert_eq!(config.security.token_ttl_seconds, 60);
        assert_eq!(config.server.port, 8040);
    }
}
