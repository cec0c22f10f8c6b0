//! The meeting detection/recording engine, seen from the controller.

pub mod sidecar;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub use sidecar::SidecarEngine;

/// Engine-assigned identifier of a meeting window.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WindowId(String);

impl WindowId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WindowId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum EngineStateCode {
    Recording,
    Idle,
    Other(String),
}

impl From<String> for EngineStateCode {
    fn from(code: String) -> Self {
        match code.as_str() {
            "recording" => Self::Recording,
            "idle" => Self::Idle,
            _ => Self::Other(code),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum EngineEvent {
    MeetingDetected {
        #[serde(rename = "windowId")]
        window_id: WindowId,
        #[serde(default)]
        platform: Option<String>,
    },
    MeetingUpdated {
        #[serde(rename = "windowId")]
        window_id: WindowId,
        url: String,
    },
    #[serde(rename = "sdk-state-change")]
    StateChanged { code: EngineStateCode },
    RecordingEnded {
        #[serde(rename = "windowId")]
        window_id: WindowId,
    },
    PermissionStatus { permission: String, status: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// The recording was already over when we asked to stop it.
    #[error("recording already ended")]
    AlreadyEnded,
    #[error("engine call failed: {0}")]
    Failed(String),
    #[error("engine is not running")]
    Disconnected,
}

#[async_trait]
pub trait RecordingEngine: Send + Sync {
    async fn start_recording(
        &self,
        window_id: &WindowId,
        upload_token: &str,
    ) -> Result<(), EngineError>;
    async fn stop_recording(&self, window_id: &WindowId) -> Result<(), EngineError>;
    async fn pause_recording(&self, window_id: &WindowId) -> Result<(), EngineError>;
    async fn resume_recording(&self, window_id: &WindowId) -> Result<(), EngineError>;
    async fn request_permission(&self, permission: &str) -> Result<(), EngineError>;
}
