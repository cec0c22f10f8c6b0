//! Recording state and the read-only view handed to API handlers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::consent::ConsentState;
use crate::engine::WindowId;

/// Where the controller believes the engine's recording is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingState {
    #[default]
    Idle,
    Starting,
    Recording,
    Paused,
    Stopping,
}

impl RecordingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Recording => "recording",
            Self::Paused => "paused",
            Self::Stopping => "stopping",
        }
    }

    /// Whether a recording exists that a stop request would have to end.
    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Idle)
    }
}

/// Point-in-time copy of the controller state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ControllerSnapshot {
    pub recording: RecordingState,
    pub recording_started: bool,
    pub session_id: Option<String>,
    pub window_id: Option<WindowId>,
    pub platform: Option<String>,
    pub meeting_url: Option<String>,
    pub consent: Option<ConsentState>,
    pub has_upload_credential: bool,
    pub registered_url: Option<String>,
    pub detected_at: Option<DateTime<Utc>>,
    pub suppressed_windows: Vec<WindowId>,
}

impl ControllerSnapshot {
    /// Seconds since the current meeting was first detected.
    pub fn session_age_seconds(&self) -> Option<u64> {
        self.detected_at.map(|detected| {
            let elapsed = Utc::now() - detected;
            elapsed.num_seconds().max(0) as u64
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_state_as_str() {
        assert_eq!(RecordingState::Idle.as_str(), "idle");
        assert_eq!(RecordingState::Starting.as_str(), "starting");
        assert_eq!(RecordingState::Recording.as_str(), "recording");
        assert_eq!(RecordingState::Paused.as_str(), "paused");
        assert_eq!(RecordingState::Stopping.as_str(), "stopping");
    }

    #[test]
    fn test_recording_state_serialization() {
        let json = serde_json::to_string(&RecordingState::Paused).unwrap();
        assert_eq!(json, "\"paused\"");

        let parsed: RecordingState = serde_json::from_str("\"recording\"").unwrap();
        assert_eq!(parsed, RecordingState::Recording);
    }

    #[test]
    fn test_only_idle_is_inactive() {
        assert!(!RecordingState::Idle.is_active());
        assert!(RecordingState::Starting.is_active());
        assert!(RecordingState::Paused.is_active());
        assert!(RecordingState::Stopping.is_active());
    }

    #[test]
    fn test_snapshot_default_is_idle() {
        let snapshot = ControllerSnapshot::default();
        assert_eq!(snapshot.recording, RecordingState::Idle);
        assert!(snapshot.window_id.is_none());
        assert!(snapshot.session_age_seconds().is_none());
    }
}
