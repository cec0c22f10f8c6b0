//! Contract with the UI surfaces (consent popup, tray, debug panel).
//!
//! Surfaces send `UiCommand`s to the controller and receive `UiEvent`s back.
//! `UiHub` fans events out to subscribers and keeps the latest snapshot for
//! the status endpoint.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::engine::WindowId;

/// Requests the UI surfaces can make of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UiCommand {
    ConfirmRecording,
    DeclineRecording,
    EndRecording,
    TogglePause,
    Stop,
}

impl UiCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConfirmRecording => "confirm-recording",
            Self::DeclineRecording => "decline-recording",
            Self::EndRecording => "end-recording",
            Self::TogglePause => "toggle-pause",
            Self::Stop => "stop",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum UiEvent {
    ConsentRequested {
        window_id: WindowId,
        platform: Option<String>,
    },
    ConsentDismissed {
        window_id: WindowId,
    },
    RecordingStarted {
        window_id: WindowId,
    },
    RecordingEnded {
        window_id: Option<WindowId>,
    },
    StateChanged {
        recording: bool,
        paused: bool,
        window_id: Option<WindowId>,
    },
    /// Blocking dialog shown to the user.
    ErrorDialog { title: String, message: String },
}

impl UiEvent {
    /// Wire name, matching the `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConsentRequested { .. } => "consent-requested",
            Self::ConsentDismissed { .. } => "consent-dismissed",
            Self::RecordingStarted { .. } => "recording-started",
            Self::RecordingEnded { .. } => "recording-ended",
            Self::StateChanged { .. } => "state-changed",
            Self::ErrorDialog { .. } => "error-dialog",
        }
    }
}

pub trait UiNotifier: Send + Sync {
    fn notify(&self, event: UiEvent);
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsentPrompt {
    pub window_id: WindowId,
    pub platform: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dialog {
    pub title: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UiSnapshot {
    pub pending_consent: Option<ConsentPrompt>,
    pub recording: bool,
    pub paused: bool,
    pub window_id: Option<WindowId>,
    pub last_dialog: Option<Dialog>,
}

impl UiSnapshot {
    fn apply(&mut self, event: &UiEvent) {
        match event {
            UiEvent::ConsentRequested {
                window_id,
                platform,
            } => {
                self.pending_consent = Some(ConsentPrompt {
                    window_id: window_id.clone(),
                    platform: platform.clone(),
                });
            }
            UiEvent::ConsentDismissed { window_id } => {
                if self
                    .pending_consent
                    .as_ref()
                    .is_some_and(|prompt| &prompt.window_id == window_id)
                {
                    self.pending_consent = None;
                }
            }
            UiEvent::RecordingStarted { window_id } => {
                self.recording = true;
                self.paused = false;
                self.window_id = Some(window_id.clone());
            }
            UiEvent::RecordingEnded { .. } => {
                self.recording = false;
                self.paused = false;
                self.window_id = None;
                self.pending_consent = None;
            }
            UiEvent::StateChanged {
                recording,
                paused,
                window_id,
            } => {
                self.recording = *recording;
                self.paused = *paused;
                self.window_id = window_id.clone();
            }
            UiEvent::ErrorDialog { title, message } => {
                self.last_dialog = Some(Dialog {
                    title: title.clone(),
                    message: message.clone(),
                });
            }
        }
    }
}

#[derive(Clone)]
pub struct UiHub {
    events: broadcast::Sender<UiEvent>,
    snapshot: Arc<Mutex<UiSnapshot>>,
}

impl Default for UiHub {
    fn default() -> Self {
        Self::new(32)
    }
}

impl UiHub {
    pub fn new(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity);
        Self {
            events,
            snapshot: Arc::default(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UiEvent> {
        self.events.subscribe()
    }

    pub fn snapshot(&self) -> UiSnapshot {
        self.snapshot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl UiNotifier for UiHub {
    fn notify(&self, event: UiEvent) {
        match &event {
            UiEvent::ErrorDialog { title, message } => warn!("Dialog: {}: {}", title, message),
            other => info!("UI event: {:?}", other),
        }

        self.snapshot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .apply(&event);

        // No subscribers is fine; the snapshot still reflects the event.
        let _ = self.events.send(event);
    }
}
