use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use super::consent::ConsentState;
use super::registrar::RegistrationState;
use crate::backend::{UploadCredential, UploadCredentialError};
use crate::engine::WindowId;
use crate::inflight::InFlight;

pub type UploadFetch = InFlight<Result<UploadCredential, UploadCredentialError>>;

/// Everything known about the meeting currently on screen.
#[derive(Debug)]
pub struct MeetingSession {
    pub id: Uuid,
    pub window_id: WindowId,
    pub platform: Option<String>,
    pub meeting_url: Option<String>,
    /// Fetched at most once per session; a retry reuses it.
    pub upload: Option<UploadCredential>,
    pub registration: RegistrationState,
    pub consent: ConsentState,
    pub detected_at: DateTime<Utc>,
    upload_fetch: Arc<UploadFetch>,
}

impl MeetingSession {
    pub fn new(window_id: WindowId, platform: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            window_id,
            platform,
            meeting_url: None,
            upload: None,
            registration: RegistrationState::default(),
            consent: ConsentState::default(),
            detected_at: Utc::now(),
            upload_fetch: Arc::new(InFlight::new()),
        }
    }

    pub fn is_for(&self, window_id: &WindowId) -> bool {
        &self.window_id == window_id
    }

    /// Latch shared by concurrent starts of this session.
    pub fn upload_fetch(&self) -> Arc<UploadFetch> {
        Arc::clone(&self.upload_fetch)
    }
}

/// The session, but only if it belongs to `window_id`.
pub fn session_for<'a>(
    session: &'a mut Option<MeetingSession>,
    window_id: &WindowId,
) -> Option<&'a mut MeetingSession> {
    session.as_mut().filter(|session| session.is_for(window_id))
}
