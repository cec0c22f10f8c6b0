//! Associates a meeting URL with the backend recording.
//!
//! Registration is best effort and never blocks recording. A URL is sent
//! at most once per session once it succeeds, and retries of the same URL
//! are throttled. Preparing a request is synchronous so the controller can
//! do it under its state lock; submitting happens after the lock is gone.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::session::MeetingSession;
use crate::auth::CredentialProvider;
use crate::backend::{MeetingRegistration, MeetingRegistry};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrationState {
    pub last_registered_url: Option<String>,
    pub last_attempt_url: Option<String>,
    pub last_attempt_at: Option<Instant>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationOutcome {
    Registered,
    /// Preconditions unmet, already registered, or throttled.
    Skipped,
    /// No access token was available; the attempt does not count.
    NotSignedIn,
    Failed,
}

pub struct MeetingRegistrar {
    credentials: Arc<dyn CredentialProvider>,
    registry: Arc<dyn MeetingRegistry>,
    throttle: Duration,
}

impl MeetingRegistrar {
    pub fn new(
        credentials: Arc<dyn CredentialProvider>,
        registry: Arc<dyn MeetingRegistry>,
        throttle: Duration,
    ) -> Self {
        Self {
            credentials,
            registry,
            throttle,
        }
    }

    /// Build the request if one should be sent now, recording the attempt.
    pub fn prepare(&self, session: &mut MeetingSession, now: Instant) -> Option<MeetingRegistration> {
        if !session.consent.is_accepted() {
            return None;
        }
        let meeting_url = session.meeting_url.clone()?;
        let upload = session.upload.as_ref()?;
        let (Some(recording_id), Some(sdk_upload_id)) =
            (upload.recording_id.clone(), upload.sdk_upload_id.clone())
        else {
            debug!("Upload credential carries no recording ids, skipping registration");
            return None;
        };

        let state = &mut session.registration;
        if state.last_registered_url.as_deref() == Some(meeting_url.as_str()) {
            return None;
        }
        if state.last_attempt_url.as_deref() == Some(meeting_url.as_str()) {
            if let Some(at) = state.last_attempt_at {
                if now.saturating_duration_since(at) < self.throttle {
                    debug!("Registration of {} throttled", meeting_url);
                    return None;
                }
            }
        }

        state.last_attempt_url = Some(meeting_url.clone());
        state.last_attempt_at = Some(now);

        Some(MeetingRegistration {
            meeting_url,
            recording_id,
            sdk_upload_id,
        })
    }

    pub async fn submit(&self, registration: &MeetingRegistration) -> RegistrationOutcome {
        let token = match self.credentials.get_access_token(false).await {
            Ok(Some(token)) => token,
            Ok(None) => {
                debug!("Not signed in, deferring meeting registration");
                return RegistrationOutcome::NotSignedIn;
            }
            Err(e) => {
                debug!("No token for meeting registration: {}", e);
                return RegistrationOutcome::NotSignedIn;
            }
        };

        match self
            .registry
            .register_meeting_url(&token, registration)
            .await
        {
            Ok(()) => {
                info!(
                    "Registered meeting URL {} for recording {}",
                    registration.meeting_url, registration.recording_id
                );
                RegistrationOutcome::Registered
            }
            Err(e) => {
                warn!("Meeting URL registration failed: {}", e);
                RegistrationOutcome::Failed
            }
        }
    }

    /// Fold the result of `submit` back into the session.
    pub fn settle(
        session: &mut MeetingSession,
        registration: &MeetingRegistration,
        outcome: RegistrationOutcome,
    ) {
        let state = &mut session.registration;
        match outcome {
            RegistrationOutcome::Registered => {
                state.last_registered_url = Some(registration.meeting_url.clone());
            }
            RegistrationOutcome::NotSignedIn => {
                if state.last_attempt_url.as_deref() == Some(registration.meeting_url.as_str()) {
                    state.last_attempt_url = None;
                    state.last_attempt_at = None;
                }
            }
            RegistrationOutcome::Skipped | RegistrationOutcome::Failed => {}
        }
    }

    /// Prepare, submit and settle against a session the caller owns outright.
    pub async fn register_if_needed(&self, session: &mut MeetingSession) -> RegistrationOutcome {
        let Some(registration) = self.prepare(session, Instant::now()) else {
            return RegistrationOutcome::Skipped;
        };
        let outcome = self.submit(&registration).await;
        Self::settle(session, &registration, outcome);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AccessToken, AuthError};
    use crate::backend::{BackendError, UploadCredential};
    use crate::engine::WindowId;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct Tokens {
        signed_in: AtomicBool,
    }

    #[async_trait]
    impl CredentialProvider for Tokens {
        async fn get_access_token(&self, interactive: bool) -> Result<Option<AccessToken>, AuthError> {
            assert!(!interactive, "registration must never prompt");
            Ok(self
                .signed_in
                .load(Ordering::SeqCst)
                .then(|| AccessToken::new("access-1")))
        }
    }

    #[derive(Default)]
    struct Registry {
        calls: AtomicUsize,
        fail: AtomicBool,
        urls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl MeetingRegistry for Registry {
        async fn register_meeting_url(
            &self,
            _token: &AccessToken,
            registration: &MeetingRegistration,
        ) -> Result<(), BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.urls
                .lock()
                .unwrap()
                .push(registration.meeting_url.clone());
            if self.fail.load(Ordering::SeqCst) {
                return Err(BackendError::Http {
                    status: 500,
                    body: "boom".to_string(),
                });
            }
            Ok(())
        }
    }

    fn registrar(signed_in: bool) -> (MeetingRegistrar, Arc<Registry>, Arc<Tokens>) {
        let registry = Arc::new(Registry::default());
        let tokens = Arc::new(Tokens {
            signed_in: AtomicBool::new(signed_in),
        });
        let registrar =
            MeetingRegistrar::new(tokens.clone(), registry.clone(), Duration::from_secs(15));
        (registrar, registry, tokens)
    }

    fn ready_session(url: &str) -> MeetingSession {
        let mut session = MeetingSession::new(WindowId::new("w1"), Some("zoom".to_string()));
        session.consent.accept();
        session.meeting_url = Some(url.to_string());
        session.upload = Some(UploadCredential {
            upload_token: "tok1".to_string(),
            recording_id: Some("r1".to_string()),
            sdk_upload_id: Some("s1".to_string()),
        });
        session
    }

    #[tokio::test]
    async fn test_registers_once_per_url() {
        let (registrar, registry, _) = registrar(true);
        let mut session = ready_session("https://zoom.us/j/1");

        assert_eq!(
            registrar.register_if_needed(&mut session).await,
            RegistrationOutcome::Registered
        );
        assert_eq!(
            registrar.register_if_needed(&mut session).await,
            RegistrationOutcome::Skipped
        );
        assert_eq!(registry.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            session.registration.last_registered_url.as_deref(),
            Some("https://zoom.us/j/1")
        );
    }

    #[tokio::test]
    async fn test_failed_url_is_throttled() {
        let (registrar, registry, _) = registrar(true);
        registry.fail.store(true, Ordering::SeqCst);
        let mut session = ready_session("https://zoom.us/j/1");

        assert_eq!(
            registrar.register_if_needed(&mut session).await,
            RegistrationOutcome::Failed
        );
        assert_eq!(
            registrar.register_if_needed(&mut session).await,
            RegistrationOutcome::Skipped
        );
        assert_eq!(registry.calls.load(Ordering::SeqCst), 1);
        assert!(session.registration.last_registered_url.is_none());
    }

    #[test]
    fn test_throttle_window_expires() {
        let (registrar, _, _) = registrar(true);
        let mut session = ready_session("https://zoom.us/j/1");
        let start = Instant::now();

        assert!(registrar.prepare(&mut session, start).is_some());
        assert!(registrar
            .prepare(&mut session, start + Duration::from_secs(14))
            .is_none());
        assert!(registrar
            .prepare(&mut session, start + Duration::from_secs(15))
            .is_some());
    }

    #[test]
    fn test_new_url_is_not_throttled() {
        let (registrar, _, _) = registrar(true);
        let mut session = ready_session("https://zoom.us/j/1");
        let start = Instant::now();

        assert!(registrar.prepare(&mut session, start).is_some());
        session.meeting_url = Some("https://zoom.us/j/2".to_string());
        let second = registrar
            .prepare(&mut session, start + Duration::from_secs(1))
            .unwrap();
        assert_eq!(second.meeting_url, "https://zoom.us/j/2");
    }

    #[test]
    fn test_preconditions() {
        let (registrar, _, _) = registrar(true);
        let now = Instant::now();

        let mut undecided = ready_session("https://zoom.us/j/1");
        undecided.consent = Default::default();
        assert!(registrar.prepare(&mut undecided, now).is_none());

        let mut no_url = ready_session("https://zoom.us/j/1");
        no_url.meeting_url = None;
        assert!(registrar.prepare(&mut no_url, now).is_none());

        let mut no_upload = ready_session("https://zoom.us/j/1");
        no_upload.upload = None;
        assert!(registrar.prepare(&mut no_upload, now).is_none());

        let mut no_ids = ready_session("https://zoom.us/j/1");
        if let Some(upload) = no_ids.upload.as_mut() {
            upload.sdk_upload_id = None;
        }
        assert!(registrar.prepare(&mut no_ids, now).is_none());

        // Skipped preconditions never count as an attempt.
        assert!(no_ids.registration.last_attempt_at.is_none());
    }

    #[tokio::test]
    async fn test_missing_token_does_not_count_as_attempt() {
        let (registrar, registry, tokens) = registrar(false);
        let mut session = ready_session("https://zoom.us/j/1");

        assert_eq!(
            registrar.register_if_needed(&mut session).await,
            RegistrationOutcome::NotSignedIn
        );
        assert!(session.registration.last_attempt_url.is_none());
        assert_eq!(registry.calls.load(Ordering::SeqCst), 0);

        tokens.signed_in.store(true, Ordering::SeqCst);
        assert_eq!(
            registrar.register_if_needed(&mut session).await,
            RegistrationOutcome::Registered
        );
    }
}
