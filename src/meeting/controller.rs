//! Meeting recording orchestrator.
//!
//! Turns engine events and UI commands into one coherent recording
//! lifecycle:
//! detected → consent → credential → register → start → pause/resume → stop
//!
//! State lives behind a synchronous lock that is never held across an
//! await. Every collaborator call re-validates the session afterwards,
//! because events keep arriving while it is pending.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::consent::ConsentState;
use super::registrar::{MeetingRegistrar, RegistrationOutcome};
use super::session::{session_for, MeetingSession};
use super::status::{ControllerSnapshot, RecordingState};
use super::suppression::SuppressionSet;
use crate::auth::{AuthError, CredentialProvider};
use crate::backend::{
    MeetingRegistration, MeetingRegistry, UploadCredentialError, UploadCredentialSource,
};
use crate::config::RecordingConfig;
use crate::engine::{EngineError, EngineEvent, EngineStateCode, RecordingEngine, WindowId};
use crate::ui::{UiCommand, UiEvent, UiNotifier};

pub const ENTITLEMENT_TITLE: &str = "Recording isn't enabled";
pub const ENTITLEMENT_MESSAGE: &str =
    "Meeting recording is not enabled for your account. Ask your workspace admin to turn it on.";
pub const CREDENTIAL_FAILURE_TITLE: &str = "Couldn't start recording";
pub const CREDENTIAL_FAILURE_MESSAGE: &str =
    "We couldn't prepare this recording. Check your connection and try again.";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControllerError {
    #[error("no meeting is currently active")]
    NoActiveSession,
    #[error("meeting {0} is no longer the current meeting")]
    SessionSuperseded(WindowId),
    #[error("not signed in")]
    NotAuthenticated,
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    UploadCredential(#[from] UploadCredentialError),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Everything the controller reacts to, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerInput {
    Engine(EngineEvent),
    Ui(UiCommand),
}

pub struct Collaborators {
    pub engine: Arc<dyn RecordingEngine>,
    pub credentials: Arc<dyn CredentialProvider>,
    pub uploads: Arc<dyn UploadCredentialSource>,
    pub registry: Arc<dyn MeetingRegistry>,
    pub ui: Arc<dyn UiNotifier>,
}

#[derive(Debug, Default)]
struct ControllerState {
    session: Option<MeetingSession>,
    recording: RecordingState,
    /// Set synchronously before the engine start call; guards double starts.
    recording_started: bool,
    suppressed: SuppressionSet,
    last_window_id: Option<WindowId>,
    requested_permissions: HashSet<String>,
}

struct Inner {
    state: Mutex<ControllerState>,
    engine: Arc<dyn RecordingEngine>,
    credentials: Arc<dyn CredentialProvider>,
    uploads: Arc<dyn UploadCredentialSource>,
    registrar: MeetingRegistrar,
    ui: Arc<dyn UiNotifier>,
    excluded_platforms: Vec<String>,
    request_missing_permissions: bool,
}

#[derive(Clone)]
pub struct SessionController {
    inner: Arc<Inner>,
}

impl SessionController {
    pub fn new(collaborators: Collaborators, config: &RecordingConfig) -> Self {
        let registrar = MeetingRegistrar::new(
            Arc::clone(&collaborators.credentials),
            collaborators.registry,
            config.registration_throttle(),
        );

        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(ControllerState::default()),
                engine: collaborators.engine,
                credentials: collaborators.credentials,
                uploads: collaborators.uploads,
                registrar,
                ui: collaborators.ui,
                excluded_platforms: config.excluded_platforms.clone(),
                request_missing_permissions: config.request_missing_permissions,
            }),
        }
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut ControllerState) -> R) -> R {
        let mut state = self
            .inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    fn notify(&self, event: UiEvent) {
        self.inner.ui.notify(event);
    }

    fn publish_state(&self) {
        let event = self.with_state(|s| {
            let active = matches!(s.recording, RecordingState::Recording | RecordingState::Paused);
            UiEvent::StateChanged {
                recording: active,
                paused: s.recording == RecordingState::Paused,
                window_id: active
                    .then(|| s.session.as_ref().map(|session| session.window_id.clone()))
                    .flatten(),
            }
        });
        self.notify(event);
    }

    pub fn snapshot(&self) -> ControllerSnapshot {
        self.with_state(|s| {
            let session = s.session.as_ref();
            ControllerSnapshot {
                recording: s.recording,
                recording_started: s.recording_started,
                session_id: session.map(|x| x.id.to_string()),
                window_id: session.map(|x| x.window_id.clone()),
                platform: session.and_then(|x| x.platform.clone()),
                meeting_url: session.and_then(|x| x.meeting_url.clone()),
                consent: session.map(|x| x.consent),
                has_upload_credential: session.is_some_and(|x| x.upload.is_some()),
                registered_url: session.and_then(|x| x.registration.last_registered_url.clone()),
                detected_at: session.map(|x| x.detected_at),
                suppressed_windows: s.suppressed.windows(),
            }
        })
    }

    pub async fn dispatch(&self, input: ControllerInput) -> Result<(), ControllerError> {
        match input {
            ControllerInput::Engine(event) => {
                self.handle_engine_event(event).await;
                Ok(())
            }
            ControllerInput::Ui(command) => self.handle_command(command).await,
        }
    }

    async fn handle_engine_event(&self, event: EngineEvent) {
        match event {
            EngineEvent::MeetingDetected {
                window_id,
                platform,
            } => self.on_meeting_detected(window_id, platform),
            EngineEvent::MeetingUpdated { window_id, url } => {
                self.on_meeting_updated(window_id, url).await
            }
            EngineEvent::StateChanged { code } => self.on_engine_state_change(code),
            EngineEvent::RecordingEnded { window_id } => self.on_recording_ended(window_id),
            EngineEvent::PermissionStatus { permission, status } => {
                self.on_permission_status(permission, status).await
            }
        }
    }

    async fn handle_command(&self, command: UiCommand) -> Result<(), ControllerError> {
        debug!("UI command: {}", command.as_str());
        match command {
            UiCommand::ConfirmRecording => self.on_user_confirm().await,
            UiCommand::DeclineRecording => self.on_user_decline().await,
            UiCommand::EndRecording | UiCommand::Stop => self.on_user_stop().await,
            UiCommand::TogglePause => self.toggle_pause().await,
        }
    }

    fn is_excluded(&self, platform: Option<&str>) -> bool {
        platform.is_some_and(|platform| {
            self.inner
                .excluded_platforms
                .iter()
                .any(|excluded| excluded.eq_ignore_ascii_case(platform))
        })
    }

    pub fn on_meeting_detected(&self, window_id: WindowId, platform: Option<String>) {
        let excluded = self.is_excluded(platform.as_deref());
        let opened = self.with_state(|s| {
            if s.suppressed.is_suppressed(&window_id) {
                debug!("Window {} is suppressed, ignoring detection", window_id);
                return false;
            }
            if excluded {
                info!(
                    "Ignoring meeting on excluded platform {:?} (window {})",
                    platform, window_id
                );
                return false;
            }
            if s.recording.is_active() {
                info!(
                    "Already {}, ignoring meeting in window {}",
                    s.recording.as_str(),
                    window_id
                );
                return false;
            }

            s.recording_started = false;
            s.session = Some(MeetingSession::new(window_id.clone(), platform.clone()));
            s.last_window_id = Some(window_id.clone());
            true
        });

        if opened {
            info!("Meeting detected in window {} ({:?})", window_id, platform);
            self.notify(UiEvent::ConsentRequested {
                window_id,
                platform,
            });
        }
    }

    pub async fn on_meeting_updated(&self, window_id: WindowId, url: String) {
        let accepted = self.with_state(|s| -> Option<bool> {
            let session = session_for(&mut s.session, &window_id)?;
            session.meeting_url = Some(url.clone());
            Some(session.consent.is_accepted())
        });

        match accepted {
            None => debug!("Ignoring URL for stale window {}", window_id),
            Some(false) => debug!("Meeting URL noted, registration waits for consent"),
            Some(true) => self.register_if_needed(&window_id).await,
        }
    }

    async fn register_if_needed(&self, window_id: &WindowId) {
        let registration = self.with_state(|s| -> Option<MeetingRegistration> {
            let session = session_for(&mut s.session, window_id)?;
            self.inner.registrar.prepare(session, Instant::now())
        });
        let Some(registration) = registration else {
            return;
        };

        let outcome = self.inner.registrar.submit(&registration).await;
        if outcome == RegistrationOutcome::Failed {
            return;
        }
        self.with_state(|s| {
            if let Some(session) = session_for(&mut s.session, window_id) {
                MeetingRegistrar::settle(session, &registration, outcome);
            }
        });
    }

    pub async fn on_user_confirm(&self) -> Result<(), ControllerError> {
        let window_id = self.with_state(|s| {
            let session = s.session.as_mut().ok_or(ControllerError::NoActiveSession)?;
            session.consent.accept();
            Ok::<_, ControllerError>(session.window_id.clone())
        })?;

        info!("Recording confirmed for window {}", window_id);
        self.notify(UiEvent::ConsentDismissed {
            window_id: window_id.clone(),
        });

        match self.start_sequence(&window_id).await {
            Ok(()) => Ok(()),
            Err(err) => {
                self.with_state(|s| {
                    if let Some(session) = session_for(&mut s.session, &window_id) {
                        session.consent.reopen();
                    }
                    if s.recording == RecordingState::Idle {
                        s.recording_started = false;
                    }
                });
                // Credential failures are reported once, by the fetch leader.
                if !matches!(err, ControllerError::UploadCredential(_)) {
                    self.report_start_failure(&err);
                }
                Err(err)
            }
        }
    }

    async fn start_sequence(&self, window_id: &WindowId) -> Result<(), ControllerError> {
        let token = self
            .inner
            .credentials
            .get_access_token(true)
            .await?
            .ok_or(ControllerError::NotAuthenticated)?;

        let pending_fetch = self.with_state(|s| {
            let session = session_for(&mut s.session, window_id)
                .ok_or_else(|| ControllerError::SessionSuperseded(window_id.clone()))?;
            Ok::<_, ControllerError>(session.upload.is_none().then(|| session.upload_fetch()))
        })?;

        if let Some(fetch) = pending_fetch {
            let uploads = Arc::clone(&self.inner.uploads);
            let mut led = false;
            let fetched = fetch
                .run(|| {
                    led = true;
                    async move { uploads.fetch_upload_credential(&token).await }
                })
                .await
                .unwrap_or_else(|| {
                    Err(UploadCredentialError::Transport(
                        "upload credential request was abandoned".to_string(),
                    ))
                });
            let credential = match fetched {
                Ok(credential) => credential,
                Err(e) => {
                    let err = ControllerError::from(e);
                    if led {
                        self.report_start_failure(&err);
                    }
                    return Err(err);
                }
            };

            self.with_state(|s| {
                let session = session_for(&mut s.session, window_id)
                    .ok_or_else(|| ControllerError::SessionSuperseded(window_id.clone()))?;
                if session.upload.is_none() {
                    session.upload = Some(credential);
                }
                Ok::<_, ControllerError>(())
            })?;
        }

        self.register_if_needed(window_id).await;

        let upload_token = self.with_state(|s| -> Result<Option<String>, ControllerError> {
            let session = session_for(&mut s.session, window_id)
                .ok_or_else(|| ControllerError::SessionSuperseded(window_id.clone()))?;
            if s.recording_started {
                return Ok(None);
            }
            let Some(upload) = session.upload.as_ref() else {
                return Err(ControllerError::SessionSuperseded(window_id.clone()));
            };
            s.recording_started = true;
            s.recording = RecordingState::Starting;
            Ok(Some(upload.upload_token.clone()))
        })?;

        let Some(upload_token) = upload_token else {
            debug!("Recording for window {} already starting", window_id);
            return Ok(());
        };

        match self
            .inner
            .engine
            .start_recording(window_id, &upload_token)
            .await
        {
            Ok(()) => {
                let started = self.with_state(|s| {
                    let current = session_for(&mut s.session, window_id).is_some();
                    if current && s.recording == RecordingState::Starting {
                        s.recording = RecordingState::Recording;
                        true
                    } else {
                        false
                    }
                });
                if started {
                    info!("Recording started for window {}", window_id);
                    self.notify(UiEvent::RecordingStarted {
                        window_id: window_id.clone(),
                    });
                    self.publish_state();
                }
                Ok(())
            }
            Err(e) => {
                error!("Engine failed to start recording: {}", e);
                self.with_state(|s| {
                    if s.recording == RecordingState::Starting {
                        s.recording = RecordingState::Idle;
                        s.recording_started = false;
                    }
                });
                Err(e.into())
            }
        }
    }

    fn report_start_failure(&self, err: &ControllerError) {
        match err {
            ControllerError::UploadCredential(e) if e.is_entitlement_denied() => {
                warn!("Recording not enabled for this account: {}", e);
                self.notify(UiEvent::ErrorDialog {
                    title: ENTITLEMENT_TITLE.to_string(),
                    message: ENTITLEMENT_MESSAGE.to_string(),
                });
            }
            ControllerError::UploadCredential(e) => {
                error!("Failed to obtain upload credential: {}", e);
                self.notify(UiEvent::ErrorDialog {
                    title: CREDENTIAL_FAILURE_TITLE.to_string(),
                    message: CREDENTIAL_FAILURE_MESSAGE.to_string(),
                });
            }
            ControllerError::SessionSuperseded(window_id) => {
                info!("Start for window {} abandoned, meeting changed", window_id);
            }
            other => warn!("Recording did not start: {}", other),
        }
    }

    pub async fn on_user_decline(&self) -> Result<(), ControllerError> {
        self.end_by_user("declined").await
    }

    /// Same as a decline once consent was given: the window stays quiet.
    pub async fn on_user_stop(&self) -> Result<(), ControllerError> {
        self.end_by_user("stopped").await
    }

    async fn end_by_user(&self, reason: &str) -> Result<(), ControllerError> {
        let (window_id, active) = self.with_state(|s| {
            let session = s.session.as_mut().ok_or(ControllerError::NoActiveSession)?;
            session.consent.decline();
            let window_id = session.window_id.clone();
            s.suppressed.suppress(window_id.clone());
            Ok::<_, ControllerError>((window_id, s.recording.is_active()))
        })?;

        info!("User {} recording for window {}", reason, window_id);

        if active {
            self.stop_sequence().await;
        }

        self.with_state(|s| {
            if session_for(&mut s.session, &window_id).is_some() {
                s.session = None;
            }
            if s.recording == RecordingState::Idle {
                s.recording_started = false;
            }
        });
        self.notify(UiEvent::ConsentDismissed { window_id });
        Ok(())
    }

    /// Ends the current recording. Never fails: whatever the engine says, the
    /// controller ends up idle with no session.
    pub async fn stop_sequence(&self) {
        let window_id = self.with_state(|s| match s.recording {
            RecordingState::Idle | RecordingState::Stopping => None,
            _ => match s.session.as_ref() {
                Some(session) => {
                    s.recording = RecordingState::Stopping;
                    Some(session.window_id.clone())
                }
                None => {
                    warn!("Recording marked {} without a session", s.recording.as_str());
                    s.recording = RecordingState::Idle;
                    s.recording_started = false;
                    None
                }
            },
        });
        let Some(window_id) = window_id else {
            return;
        };

        match self.inner.engine.stop_recording(&window_id).await {
            Ok(()) => info!("Recording stopped for window {}", window_id),
            Err(EngineError::AlreadyEnded) => {
                info!("Recording for window {} had already ended", window_id)
            }
            Err(e) => warn!("Engine stop failed, treating recording as ended: {}", e),
        }

        // The engine may have ended the recording, and a new meeting may have
        // started, while the stop call was pending.
        let current = self.with_state(|s| {
            let same_meeting = s
                .session
                .as_ref()
                .map_or(true, |session| session.is_for(&window_id));
            if s.recording != RecordingState::Stopping || !same_meeting {
                return false;
            }
            s.recording = RecordingState::Idle;
            s.recording_started = false;
            s.session = None;
            true
        });
        if !current {
            debug!("Stop for window {} resolved after the recording moved on", window_id);
            return;
        }
        self.notify(UiEvent::RecordingEnded {
            window_id: Some(window_id),
        });
        self.publish_state();
    }

    pub async fn pause(&self) -> Result<(), ControllerError> {
        let Some(window_id) = self.window_in(RecordingState::Recording, "pause")? else {
            return Ok(());
        };
        self.inner.engine.pause_recording(&window_id).await?;
        if self.transition(&window_id, RecordingState::Recording, RecordingState::Paused) {
            self.publish_state();
        }
        Ok(())
    }

    pub async fn resume(&self) -> Result<(), ControllerError> {
        let Some(window_id) = self.window_in(RecordingState::Paused, "resume")? else {
            return Ok(());
        };
        self.inner.engine.resume_recording(&window_id).await?;
        if self.transition(&window_id, RecordingState::Paused, RecordingState::Recording) {
            self.publish_state();
        }
        Ok(())
    }

    pub async fn toggle_pause(&self) -> Result<(), ControllerError> {
        match self.with_state(|s| s.recording) {
            RecordingState::Recording => self.pause().await,
            RecordingState::Paused => self.resume().await,
            other => {
                info!("Nothing to pause or resume while {}", other.as_str());
                Ok(())
            }
        }
    }

    fn window_in(
        &self,
        expected: RecordingState,
        action: &str,
    ) -> Result<Option<WindowId>, ControllerError> {
        self.with_state(|s| -> Result<Option<WindowId>, ControllerError> {
            if s.recording != expected {
                info!("Cannot {} while {}", action, s.recording.as_str());
                return Ok(None);
            }
            let session = s.session.as_ref().ok_or(ControllerError::NoActiveSession)?;
            Ok(Some(session.window_id.clone()))
        })
    }

    fn transition(&self, window_id: &WindowId, from: RecordingState, to: RecordingState) -> bool {
        self.with_state(|s| {
            if s.recording == from && session_for(&mut s.session, window_id).is_some() {
                s.recording = to;
                true
            } else {
                false
            }
        })
    }

    pub fn on_engine_state_change(&self, code: EngineStateCode) {
        match code {
            EngineStateCode::Recording => self.on_engine_recording(),
            EngineStateCode::Idle => self.on_engine_idle(),
            EngineStateCode::Other(code) => debug!("Engine state: {}", code),
        }
    }

    fn on_engine_recording(&self) {
        let started = self.with_state(|s| {
            if matches!(s.recording, RecordingState::Recording | RecordingState::Stopping) {
                return None;
            }
            let Some(session) = s.session.as_ref() else {
                debug!("Engine recording with no meeting session");
                return None;
            };
            let window_id = session.window_id.clone();
            let was_paused = s.recording == RecordingState::Paused;
            s.recording = RecordingState::Recording;
            s.recording_started = true;
            Some((window_id, was_paused))
        });

        if let Some((window_id, was_paused)) = started {
            if !was_paused {
                self.notify(UiEvent::RecordingStarted { window_id });
            }
            self.publish_state();
        }
    }

    fn on_engine_idle(&self) {
        enum Outcome {
            Ignored,
            Ended(Option<WindowId>, bool),
        }

        let outcome = self.with_state(|s| match s.recording {
            // The engine reports idle while paused; that is not an end.
            RecordingState::Paused => Outcome::Ignored,
            // Idle before the start call resolves is stale.
            RecordingState::Starting => Outcome::Ignored,
            previous => {
                let window_id = s
                    .session
                    .as_ref()
                    .map(|session| session.window_id.clone())
                    .or_else(|| s.last_window_id.clone());
                if let Some(window_id) = window_id.as_ref() {
                    s.suppressed.release(window_id);
                }
                s.recording = RecordingState::Idle;
                s.recording_started = false;
                s.session = None;
                Outcome::Ended(window_id, previous.is_active())
            }
        });

        if let Outcome::Ended(window_id, was_recording) = outcome {
            debug!("Engine idle, session for {:?} cleared", window_id);
            if was_recording {
                self.notify(UiEvent::RecordingEnded { window_id });
                self.publish_state();
            } else if let Some(window_id) = window_id {
                self.notify(UiEvent::ConsentDismissed { window_id });
            }
        }
    }

    pub fn on_recording_ended(&self, window_id: WindowId) {
        self.with_state(|s| {
            s.recording = RecordingState::Idle;
            s.recording_started = false;
            s.suppressed.release(&window_id);
            if session_for(&mut s.session, &window_id).is_some() {
                s.session = None;
            }
        });
        info!("Recording ended for window {}", window_id);
        self.notify(UiEvent::RecordingEnded {
            window_id: Some(window_id),
        });
        self.publish_state();
    }

    pub async fn on_permission_status(&self, permission: String, status: String) {
        if status == "granted" {
            debug!("Permission {} granted", permission);
            return;
        }
        warn!("Permission {} is {}", permission, status);

        if !self.inner.request_missing_permissions {
            return;
        }
        let first_request = self.with_state(|s| s.requested_permissions.insert(permission.clone()));
        if !first_request {
            return;
        }
        if let Err(e) = self.inner.engine.request_permission(&permission).await {
            warn!("Failed to request permission {}: {}", permission, e);
        }
    }

    /// Stop any active recording before the process exits.
    pub async fn shutdown(&self) {
        if self.with_state(|s| s.recording.is_active()) {
            info!("Stopping active recording before shutdown");
        }
        self.stop_sequence().await;
    }

    pub fn consent(&self) -> Option<ConsentState> {
        self.with_state(|s| s.session.as_ref().map(|session| session.consent))
    }
}
