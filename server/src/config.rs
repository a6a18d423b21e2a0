//! Configuration management for EventHub Server

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::fs;

use crate::models::PageWindow;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub auth: AuthConfig,
    pub admin: AdminConfig,
    pub limits: LimitsConfig,
    pub realtime: RealtimeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub database_path: String,
    pub uploads_path: String,
    pub cleanup_interval_minutes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub session_ttl_hours: i64,
    /// How long an unauthenticated socket may wait before sending `authenticate`
    pub socket_auth_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    pub master_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    pub max_file_size_mb: u64,
    pub max_attachments: usize,
    pub default_page_size: u32,
    pub max_page_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    pub delivery_check_delay_ms: u64,
    pub ring_timeout_secs: u64,
}

impl Config {
    pub async fn load(path: &str) -> anyhow::Result<Self> {
        if Path::new(path).exists() {
            let content = fs::read_to_string(path).await?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            let content = toml::to_string_pretty(&config)?;
            fs::write(path, content).await?;
            tracing::info!("Created default config at {}", path);
            Ok(config)
        }
    }
}

impl LimitsConfig {
    pub fn max_file_size_bytes(&self) -> usize {
        (self.max_file_size_mb as usize) * 1024 * 1024
    }

    pub fn page_window(&self, page: Option<u32>, limit: Option<u32>) -> PageWindow {
        PageWindow::new(page, limit, self.default_page_size, self.max_page_size)
    }
}

impl RealtimeConfig {
    pub fn delivery_check_delay(&self) -> Duration {
        Duration::from_millis(self.delivery_check_delay_ms)
    }

    pub fn ring_timeout(&self) -> Duration {
        Duration::from_secs(self.ring_timeout_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
            },
            storage: StorageConfig {
                database_path: "./data/eventhub.db".to_string(),
                uploads_path: "./data/uploads".to_string(),
                cleanup_interval_minutes: 60,
            },
            auth: AuthConfig {
                session_ttl_hours: 24 * 30,
                socket_auth_timeout_secs: 10,
            },
            admin: AdminConfig {
                master_key: "CHANGE-THIS-ADMIN-KEY-IMMEDIATELY".to_string(),
            },
            limits: LimitsConfig {
                max_file_size_mb: 25,
                max_attachments: 10,
                default_page_size: 50,
                max_page_size: 100,
            },
            realtime: RealtimeConfig {
                delivery_check_delay_ms: 1_000,
                ring_timeout_secs: 45,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_roundtrips_through_toml() {
        let config = Config::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();

        assert_eq!(parsed.server.port, 8080);
        assert_eq!(parsed.limits.max_page_size, 100);
        assert_eq!(parsed.realtime.delivery_check_delay(), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_load_writes_default_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let path = path.to_str().unwrap();

        let config = Config::load(path).await.unwrap();
        assert!(Path::new(path).exists());
        assert_eq!(config.limits.max_attachments, 10);
    }
}
