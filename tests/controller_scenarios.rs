//! End-to-end meeting scenarios: a scripted engine helper over in-memory
//! pipes, the real backend client against a mock server, and the session
//! controller in between.

use async_trait::async_trait;
use mockito::Matcher;
use notetaker::auth::{
    AccessToken, AuthError, AuthManager, AuthorizationServer, MemoryTokenStore, StoredTokens,
    UserIdentity,
};
use notetaker::backend::BackendClient;
use notetaker::config::{BackendConfig, RecordingConfig};
use notetaker::engine::{EngineEvent, SidecarEngine};
use notetaker::meeting::controller::ENTITLEMENT_MESSAGE;
use notetaker::meeting::{
    Collaborators, ConsentState, ControllerError, ControllerInput, RecordingState,
    SessionController,
};
use notetaker::ui::{UiCommand, UiHub};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::sync::mpsc;

struct NoBrowser;

#[async_trait]
impl AuthorizationServer for NoBrowser {
    async fn authorize(&self) -> Result<StoredTokens, AuthError> {
        Err(AuthError::LoginFailed("no browser in tests".to_string()))
    }

    async fn refresh(&self, _refresh_token: &str) -> Result<StoredTokens, AuthError> {
        Err(AuthError::LoginFailed("no refresh in tests".to_string()))
    }

    async fn user_info(&self, _token: &AccessToken) -> Result<UserIdentity, AuthError> {
        Err(AuthError::LoginFailed("no profile in tests".to_string()))
    }
}

/// Stands in for the engine helper process.
#[derive(Clone)]
struct Helper {
    output: Arc<tokio::sync::Mutex<DuplexStream>>,
    requests: Arc<Mutex<Vec<Value>>>,
    stop_already_ended: Arc<AtomicBool>,
}

impl Helper {
    async fn emit(&self, event: Value) {
        let mut line = event.to_string();
        line.push('\n');
        self.output
            .lock()
            .await
            .write_all(line.as_bytes())
            .await
            .unwrap();
    }

    fn commands(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r["command"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    fn request(&self, command: &str) -> Option<Value> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .find(|r| r["command"] == command)
            .cloned()
    }

    fn spawn_responder(&self, input: DuplexStream) {
        let helper = self.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(input).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let request: Value = serde_json::from_str(&line).unwrap();
                helper.requests.lock().unwrap().push(request.clone());

                let reply = if request["command"] == "stopRecording"
                    && helper.stop_already_ended.load(Ordering::SeqCst)
                {
                    json!({ "id": request["id"], "ok": false, "code": "already_ended", "error": "Recording already ended" })
                } else {
                    json!({ "id": request["id"], "ok": true })
                };
                helper.emit(reply).await;
            }
        });
    }
}

struct Scenario {
    controller: SessionController,
    helper: Helper,
    hub: UiHub,
    events: mpsc::Receiver<EngineEvent>,
}

impl Scenario {
    fn new(server: &mockito::Server) -> Self {
        let (engine_in, helper_in) = tokio::io::duplex(8192);
        let (helper_out, engine_out) = tokio::io::duplex(8192);
        let (event_tx, events) = mpsc::channel(16);
        let (engine, _reader) = SidecarEngine::from_io(engine_in, engine_out, event_tx);

        let helper = Helper {
            output: Arc::new(tokio::sync::Mutex::new(helper_out)),
            requests: Arc::default(),
            stop_already_ended: Arc::new(AtomicBool::new(false)),
        };
        helper.spawn_responder(helper_in);

        let backend = Arc::new(
            BackendClient::new(&BackendConfig {
                base_url: server.url(),
                request_timeout_seconds: 2,
                ..BackendConfig::default()
            })
            .unwrap(),
        );
        let auth = Arc::new(AuthManager::new(
            Arc::new(NoBrowser),
            Arc::new(MemoryTokenStore::with_tokens(StoredTokens {
                access_token: "access-1".to_string(),
                refresh_token: None,
                expires_at: None,
                token_type: "Bearer".to_string(),
            })),
        ));

        let hub = UiHub::default();
        let controller = SessionController::new(
            Collaborators {
                engine: Arc::new(engine),
                credentials: auth,
                uploads: backend.clone(),
                registry: backend,
                ui: Arc::new(hub.clone()),
            },
            &RecordingConfig::default(),
        );

        Self {
            controller,
            helper,
            hub,
            events,
        }
    }

    /// Emit an engine event through the helper and dispatch what arrives.
    async fn engine_says(&mut self, event: Value) {
        self.helper.emit(event).await;
        let event = self.events.recv().await.unwrap();
        self.controller
            .dispatch(ControllerInput::Engine(event))
            .await
            .unwrap();
    }

    async fn user(&self, command: UiCommand) -> Result<(), ControllerError> {
        self.controller.dispatch(ControllerInput::Ui(command)).await
    }
}

#[tokio::test]
async fn test_full_meeting_lifecycle() {
    let mut server = mockito::Server::new_async().await;
    let upload = server
        .mock("POST", "/upload-token")
        .match_header("authorization", "Bearer access-1")
        .with_status(200)
        .with_body(r#"{"upload_token": {"token": "tok-A", "recording_id": "rec-1", "sdk_upload_id": "sdk-1"}}"#)
        .expect(1)
        .create_async()
        .await;
    let register = server
        .mock("POST", "/register-meeting-url")
        .match_body(Matcher::Json(json!({
            "meetingUrl": "https://zoom.us/j/42",
            "recordingId": "rec-1",
            "sdkUploadId": "sdk-1",
        })))
        .with_status(200)
        .with_body("{}")
        .expect(1)
        .create_async()
        .await;

    let mut scenario = Scenario::new(&server);

    scenario
        .engine_says(json!({ "event": "meeting-detected", "windowId": "w1", "platform": "zoom" }))
        .await;
    assert!(scenario.hub.snapshot().pending_consent.is_some());

    scenario.user(UiCommand::ConfirmRecording).await.unwrap();
    let snapshot = scenario.controller.snapshot();
    assert_eq!(snapshot.recording, RecordingState::Recording);
    assert_eq!(snapshot.consent, Some(ConsentState::Accepted));

    let start = scenario.helper.request("startRecording").unwrap();
    assert_eq!(start["windowId"], "w1");
    assert_eq!(start["uploadToken"], "tok-A");

    for _ in 0..2 {
        scenario
            .engine_says(json!({ "event": "meeting-updated", "windowId": "w1", "url": "https://zoom.us/j/42" }))
            .await;
    }

    scenario.user(UiCommand::TogglePause).await.unwrap();
    assert_eq!(scenario.controller.snapshot().recording, RecordingState::Paused);

    // The engine reports idle while paused; the recording is not over.
    scenario
        .engine_says(json!({ "event": "sdk-state-change", "code": "idle" }))
        .await;
    assert_eq!(scenario.controller.snapshot().recording, RecordingState::Paused);

    scenario.helper.stop_already_ended.store(true, Ordering::SeqCst);
    scenario.user(UiCommand::EndRecording).await.unwrap();

    let snapshot = scenario.controller.snapshot();
    assert_eq!(snapshot.recording, RecordingState::Idle);
    assert!(snapshot.window_id.is_none());
    assert!(!scenario.hub.snapshot().recording);
    assert_eq!(
        scenario.helper.commands(),
        vec!["startRecording", "pauseRecording", "stopRecording"]
    );

    upload.assert_async().await;
    register.assert_async().await;
}

#[tokio::test]
async fn test_entitlement_denied_keeps_meeting_open() {
    let mut server = mockito::Server::new_async().await;
    let upload = server
        .mock("POST", "/upload-token")
        .with_status(403)
        .with_body(r#"{"error": "recording not enabled"}"#)
        .expect(1)
        .create_async()
        .await;

    let mut scenario = Scenario::new(&server);
    scenario
        .engine_says(json!({ "event": "meeting-detected", "windowId": "w1", "platform": "meet" }))
        .await;

    let err = scenario.user(UiCommand::ConfirmRecording).await.unwrap_err();
    assert!(matches!(err, ControllerError::UploadCredential(ref e) if e.is_entitlement_denied()));

    let snapshot = scenario.controller.snapshot();
    assert_eq!(snapshot.window_id.as_ref().map(|w| w.as_str()), Some("w1"));
    assert_eq!(snapshot.consent, Some(ConsentState::Undecided));
    assert!(!snapshot.recording_started);

    let dialog = scenario.hub.snapshot().last_dialog.unwrap();
    assert_eq!(dialog.message, ENTITLEMENT_MESSAGE);
    assert!(scenario.helper.commands().is_empty());

    upload.assert_async().await;
}

#[tokio::test]
async fn test_declined_window_stays_quiet_until_meeting_ends() {
    let server = mockito::Server::new_async().await;
    let mut scenario = Scenario::new(&server);

    scenario
        .engine_says(json!({ "event": "meeting-detected", "windowId": "w1" }))
        .await;
    scenario.user(UiCommand::DeclineRecording).await.unwrap();
    assert!(scenario.hub.snapshot().pending_consent.is_none());

    scenario
        .engine_says(json!({ "event": "meeting-detected", "windowId": "w1" }))
        .await;
    assert!(scenario.controller.snapshot().window_id.is_none());
    assert!(scenario.hub.snapshot().pending_consent.is_none());

    scenario
        .engine_says(json!({ "event": "recording-ended", "windowId": "w1" }))
        .await;
    scenario
        .engine_says(json!({ "event": "meeting-detected", "windowId": "w1" }))
        .await;
    assert!(scenario.hub.snapshot().pending_consent.is_some());
    assert!(scenario.helper.commands().is_empty());
}

#[tokio::test]
async fn test_slack_huddles_are_never_offered() {
    let server = mockito::Server::new_async().await;
    let mut scenario = Scenario::new(&server);

    scenario
        .engine_says(json!({ "event": "meeting-detected", "windowId": "w1", "platform": "slack" }))
        .await;

    assert!(scenario.controller.snapshot().window_id.is_none());
    assert!(scenario.hub.snapshot().pending_consent.is_none());
}

#[tokio::test]
async fn test_missing_permission_is_requested_once() {
    let server = mockito::Server::new_async().await;
    let mut scenario = Scenario::new(&server);

    for _ in 0..2 {
        scenario
            .engine_says(json!({ "event": "permission-status", "permission": "microphone", "status": "denied" }))
            .await;
    }

    let request = scenario.helper.request("requestPermission").unwrap();
    assert_eq!(request["permission"], "microphone");
    assert_eq!(scenario.helper.commands(), vec!["requestPermission"]);
}

#[tokio::test]
async fn test_flat_credential_then_engine_confirms_recording() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/upload-token")
        .with_status(200)
        .with_body(r#"{"upload_token": "tok1", "recording_id": "r1"}"#)
        .expect(1)
        .create_async()
        .await;

    let mut scenario = Scenario::new(&server);
    scenario
        .engine_says(json!({ "event": "meeting-detected", "windowId": "1", "platform": "zoom" }))
        .await;

    let (first, second) = tokio::join!(
        scenario.user(UiCommand::ConfirmRecording),
        scenario.user(UiCommand::ConfirmRecording)
    );
    first.unwrap();
    second.unwrap();

    scenario
        .engine_says(json!({ "event": "sdk-state-change", "code": "recording" }))
        .await;

    assert_eq!(scenario.controller.snapshot().recording, RecordingState::Recording);
    assert_eq!(scenario.helper.commands(), vec!["startRecording"]);
    let start = scenario.helper.request("startRecording").unwrap();
    assert_eq!(start["windowId"], "1");
    assert_eq!(start["uploadToken"], "tok1");
}
