//! HTTP client for the notetaker backend.
//!
//! Issues upload credentials, registers meeting URLs and receives
//! diagnostics reports. Every request is bounded by the configured timeout.

pub mod upload_token;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::auth::AccessToken;
use crate::config::BackendConfig;

pub use upload_token::parse_upload_credential;

/// One-time credential that lets the engine upload a specific recording.
#[derive(Clone, PartialEq, Eq)]
pub struct UploadCredential {
    pub upload_token: String,
    pub recording_id: Option<String>,
    pub sdk_upload_id: Option<String>,
}

impl fmt::Debug for UploadCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadCredential")
            .field("upload_token", &"***")
            .field("recording_id", &self.recording_id)
            .field("sdk_upload_id", &self.sdk_upload_id)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UploadCredentialError {
    #[error("upload credential request failed with status {status}: {body}")]
    Http { status: u16, body: String },
    #[error("upload credential request failed: {0}")]
    Transport(String),
    #[error("upload credential response could not be read: {0}")]
    Normalization(String),
}

impl UploadCredentialError {
    pub const ENTITLEMENT_DENIED_STATUS: u16 = 403;

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// The account is signed in but recording is not enabled for it.
    pub fn is_entitlement_denied(&self) -> bool {
        self.status() == Some(Self::ENTITLEMENT_DENIED_STATUS)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("backend returned status {status}: {body}")]
    Http { status: u16, body: String },
    #[error("backend request failed: {0}")]
    Transport(String),
}

/// Body of `POST /register-meeting-url`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetingRegistration {
    pub meeting_url: String,
    pub recording_id: String,
    pub sdk_upload_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticsReport {
    pub app_version: String,
    pub os: String,
    pub arch: String,
    pub user_id: Option<String>,
    pub reported_at: DateTime<Utc>,
}

impl DiagnosticsReport {
    pub fn current(user_id: Option<String>) -> Self {
        Self {
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            user_id,
            reported_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait UploadCredentialSource: Send + Sync {
    /// Creates a new recording on the backend; never call twice per meeting.
    async fn fetch_upload_credential(
        &self,
        token: &AccessToken,
    ) -> Result<UploadCredential, UploadCredentialError>;
}

#[async_trait]
pub trait MeetingRegistry: Send + Sync {
    async fn register_meeting_url(
        &self,
        token: &AccessToken,
        registration: &MeetingRegistration,
    ) -> Result<(), BackendError>;
}

#[async_trait]
pub trait DiagnosticsSink: Send + Sync {
    async fn report(&self, token: &AccessToken, report: &DiagnosticsReport)
        -> Result<(), BackendError>;
}

pub struct BackendClient {
    client: reqwest::Client,
    base_url: String,
    config: BackendConfig,
}

impl BackendClient {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .context("Failed to build backend HTTP client")?;

        info!("Backend client targeting {}", config.base_url);

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            config: config.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        token: &AccessToken,
        body: &T,
    ) -> Result<(u16, String), reqwest::Error> {
        let response = self
            .client
            .post(self.url(path))
            .bearer_auth(token.as_str())
            .json(body)
            .send()
            .await?;

        let status = response.status().as_u16();
        let text = response.text().await?;
        Ok((status, text))
    }
}

fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}

#[async_trait]
impl UploadCredentialSource for BackendClient {
    async fn fetch_upload_credential(
        &self,
        token: &AccessToken,
    ) -> Result<UploadCredential, UploadCredentialError> {
        debug!("Requesting upload credential");

        let (status, body) = self
            .post_json(&self.config.upload_token_path, token, &serde_json::json!({}))
            .await
            .map_err(|e| UploadCredentialError::Transport(e.to_string()))?;

        if !is_success(status) {
            error!("Upload credential request failed with status {}: {}", status, body);
            return Err(UploadCredentialError::Http { status, body });
        }

        let credential = parse_upload_credential(&body)?;
        info!(
            "Upload credential issued (recording_id: {:?}, sdk_upload_id: {:?})",
            credential.recording_id, credential.sdk_upload_id
        );
        Ok(credential)
    }
}

#[async_trait]
impl MeetingRegistry for BackendClient {
    async fn register_meeting_url(
        &self,
        token: &AccessToken,
        registration: &MeetingRegistration,
    ) -> Result<(), BackendError> {
        let (status, body) = self
            .post_json(&self.config.register_meeting_path, token, registration)
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        if !is_success(status) {
            return Err(BackendError::Http { status, body });
        }
        Ok(())
    }
}

#[async_trait]
impl DiagnosticsSink for BackendClient {
    async fn report(
        &self,
        token: &AccessToken,
        report: &DiagnosticsReport,
    ) -> Result<(), BackendError> {
        let (status, body) = self
            .post_json(&self.config.diagnostics_path, token, report)
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        if !is_success(status) {
            return Err(BackendError::Http { status, body });
        }
        Ok(())
    }
}
