//! Engine hosted in a helper process.
//!
//! The helper speaks newline-delimited JSON on stdin/stdout. Requests carry an
//! `id`; the matching response line echoes it. Lines without an `id` are
//! engine events and are forwarded to the dispatcher.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{EngineError, EngineEvent, RecordingEngine, WindowId};
use crate::config::EngineConfig;

/// Structured error code for a stop that found nothing to stop.
const ALREADY_ENDED_CODE: &str = "already_ended";

/// Message fragments older engine builds use for the same condition.
const ALREADY_ENDED_MESSAGES: &[&str] = &["recording already ended", "no active recording"];

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<(), EngineError>>>>>;

#[derive(Debug, Serialize)]
#[serde(tag = "command", rename_all = "camelCase")]
enum EngineCommand<'a> {
    StartRecording {
        #[serde(rename = "windowId")]
        window_id: &'a WindowId,
        #[serde(rename = "uploadToken")]
        upload_token: &'a str,
    },
    StopRecording {
        #[serde(rename = "windowId")]
        window_id: &'a WindowId,
    },
    PauseRecording {
        #[serde(rename = "windowId")]
        window_id: &'a WindowId,
    },
    ResumeRecording {
        #[serde(rename = "windowId")]
        window_id: &'a WindowId,
    },
    RequestPermission {
        permission: &'a str,
    },
}

impl EngineCommand<'_> {
    fn name(&self) -> &'static str {
        match self {
            Self::StartRecording { .. } => "startRecording",
            Self::StopRecording { .. } => "stopRecording",
            Self::PauseRecording { .. } => "pauseRecording",
            Self::ResumeRecording { .. } => "resumeRecording",
            Self::RequestPermission { .. } => "requestPermission",
        }
    }
}

#[derive(Debug, Serialize)]
struct Request<'a> {
    id: u64,
    #[serde(flatten)]
    command: EngineCommand<'a>,
}

#[derive(Debug, Deserialize)]
struct Response {
    id: u64,
    ok: bool,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Line {
    Response(Response),
    Event(EngineEvent),
}

impl Response {
    fn into_result(self) -> Result<(), EngineError> {
        if self.ok {
            return Ok(());
        }
        let message = self.error.unwrap_or_else(|| "unknown engine error".to_string());
        if self.code.as_deref() == Some(ALREADY_ENDED_CODE) || is_already_ended_message(&message)
        {
            return Err(EngineError::AlreadyEnded);
        }
        Err(EngineError::Failed(message))
    }
}

fn is_already_ended_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    ALREADY_ENDED_MESSAGES
        .iter()
        .any(|fragment| lower.contains(fragment))
}

pub struct SidecarEngine {
    writer: tokio::sync::Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
    pending: Pending,
    closed: Arc<AtomicBool>,
    next_id: AtomicU64,
    _child: Option<Child>,
}

impl SidecarEngine {
    /// Launches the helper process and starts forwarding its events.
    pub fn spawn(
        config: &EngineConfig,
        events: mpsc::Sender<EngineEvent>,
    ) -> Result<(Self, JoinHandle<()>)> {
        info!("Starting engine: {} {:?}", config.command, config.args);

        let mut child = Command::new(&config.command)
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to start engine {:?}", config.command))?;

        let stdin = child.stdin.take().context("Engine stdin unavailable")?;
        let stdout = child.stdout.take().context("Engine stdout unavailable")?;

        let (mut engine, reader) = Self::from_io(stdin, stdout, events);
        engine._child = Some(child);
        Ok((engine, reader))
    }

    pub fn from_io<W, R>(writer: W, reader: R, events: mpsc::Sender<EngineEvent>) -> (Self, JoinHandle<()>)
    where
        W: AsyncWrite + Send + Unpin + 'static,
        R: AsyncRead + Send + Unpin + 'static,
    {
        let pending: Pending = Arc::default();
        let closed = Arc::new(AtomicBool::new(false));

        let handle = tokio::spawn(read_loop(reader, events, pending.clone(), closed.clone()));

        let engine = Self {
            writer: tokio::sync::Mutex::new(Box::new(writer)),
            pending,
            closed,
            next_id: AtomicU64::new(1),
            _child: None,
        };
        (engine, handle)
    }

    async fn call(&self, command: EngineCommand<'_>) -> Result<(), EngineError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(EngineError::Disconnected);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let name = command.name();
        let mut line = serde_json::to_string(&Request { id, command })
            .map_err(|e| EngineError::Failed(format!("cannot encode {name}: {e}")))?;
        line.push('\n');

        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, tx);

        debug!("-> engine {} (id {})", name, id);
        let written = {
            let mut writer = self.writer.lock().await;
            match writer.write_all(line.as_bytes()).await {
                Ok(()) => writer.flush().await,
                Err(e) => Err(e),
            }
        };
        if let Err(e) = written {
            warn!("Failed to send {} to engine: {}", name, e);
            self.pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&id);
            return Err(EngineError::Disconnected);
        }

        rx.await.unwrap_or(Err(EngineError::Disconnected))
    }
}

async fn read_loop<R>(reader: R, events: mpsc::Sender<EngineEvent>, pending: Pending, closed: Arc<AtomicBool>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!("Failed to read from engine: {}", e);
                break;
            }
        };

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        match serde_json::from_str::<Line>(trimmed) {
            Ok(Line::Response(response)) => {
                let waiter = pending
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&response.id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(response.into_result());
                    }
                    None => warn!("Engine answered unknown request {}", response.id),
                }
            }
            Ok(Line::Event(event)) => {
                debug!("<- engine {:?}", event);
                if events.send(event).await.is_err() {
                    debug!("Event receiver gone, stopping engine reader");
                    break;
                }
            }
            Err(_) => warn!("Ignoring unrecognized engine output: {}", trimmed),
        }
    }

    info!("Engine output closed");
    closed.store(true, Ordering::SeqCst);
    for (_, tx) in pending
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .drain()
    {
        let _ = tx.send(Err(EngineError::Disconnected));
    }
}

#[async_trait]
impl RecordingEngine for SidecarEngine {
    async fn start_recording(
        &self,
        window_id: &WindowId,
        upload_token: &str,
    ) -> Result<(), EngineError> {
        self.call(EngineCommand::StartRecording {
            window_id,
            upload_token,
        })
        .await
    }

    async fn stop_recording(&self, window_id: &WindowId) -> Result<(), EngineError> {
        self.call(EngineCommand::StopRecording { window_id }).await
    }

    async fn pause_recording(&self, window_id: &WindowId) -> Result<(), EngineError> {
        self.call(EngineCommand::PauseRecording { window_id }).await
    }

    async fn resume_recording(&self, window_id: &WindowId) -> Result<(), EngineError> {
        self.call(EngineCommand::ResumeRecording { window_id }).await
    }

    async fn request_permission(&self, permission: &str) -> Result<(), EngineError> {
        self.call(EngineCommand::RequestPermission { permission }).await
    }
}
