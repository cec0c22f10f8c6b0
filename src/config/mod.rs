use crate::global;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

/// Overrides `[backend] base_url` without touching the config file.
pub const BACKEND_URL_ENV: &str = "NOTETAKER_BACKEND_URL";

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub backend: BackendConfig,
    pub auth: AuthConfig,
    pub recording: RecordingConfig,
    pub engine: EngineConfig,
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub base_url: String,
    /// Bounded wait for every outbound backend call.
    pub request_timeout_seconds: u64,
    pub upload_token_path: String,
    pub register_meeting_path: String,
    pub diagnostics_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub authorize_url: String,
    pub token_url: String,
    pub userinfo_url: Option<String>,
    pub client_id: String,
    pub scopes: Vec<String>,
    pub audience: Option<String>,
    /// Port of the loopback receiver that catches the authorization redirect.
    pub callback_port: u16,
    pub login_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Platforms detected by the engine that are never offered for recording.
    pub excluded_platforms: Vec<String>,
    pub registration_throttle_seconds: u64,
    pub request_missing_permissions: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Executable hosting the detection/recording SDK.
    pub command: String,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub port: u16,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.notetaker.app".to_string(),
            request_timeout_seconds: 10,
            upload_token_path: "/upload-token".to_string(),
            register_meeting_path: "/register-meeting-url".to_string(),
            diagnostics_path: "/diagnostics".to_string(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            authorize_url: "https://auth.notetaker.app/authorize".to_string(),
            token_url: "https://auth.notetaker.app/oauth/token".to_string(),
            userinfo_url: Some("https://auth.notetaker.app/userinfo".to_string()),
            client_id: String::new(),
            scopes: vec![
                "openid".to_string(),
                "profile".to_string(),
                "email".to_string(),
                "offline_access".to_string(),
            ],
            audience: None,
            callback_port: 53682,
            login_timeout_seconds: 300,
        }
    }
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            excluded_platforms: vec!["slack".to_string()],
            registration_throttle_seconds: 15,
            request_missing_permissions: true,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            command: "notetaker-engine".to_string(),
            args: Vec::new(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { port: 3838 }
    }
}

impl BackendConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds.max(1))
    }
}

impl AuthConfig {
    pub fn redirect_uri(&self) -> String {
        format!("http://127.0.0.1:{}/callback", self.callback_port)
    }

    pub fn login_timeout(&self) -> Duration {
        Duration::from_secs(self.login_timeout_seconds.max(1))
    }
}

impl RecordingConfig {
    pub fn registration_throttle(&self) -> Duration {
        Duration::from_secs(self.registration_throttle_seconds)
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        let mut config = if !config_path.exists() {
            info!(
                "Config file not found, creating default at {:?}",
                config_path
            );
            let config = Self::default();
            config.save()?;
            config
        } else {
            let content =
                std::fs::read_to_string(&config_path).context("Failed to read config file")?;
            let config: Self = Self::parse(&content)?;
            info!("Loaded config from {:?}", config_path);
            config
        };

        if let Ok(url) = std::env::var(BACKEND_URL_ENV) {
            if !url.trim().is_empty() {
                info!("Backend URL overridden by {}", BACKEND_URL_ENV);
                config.backend.base_url = url.trim().to_string();
            }
        }

        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config file")
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(&config_path, content).context("Failed to write config file")?;

        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        global::config_file()
    }
}
