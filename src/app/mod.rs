use crate::api::{ApiServer, ApiState};
use crate::auth::{AuthManager, FileTokenStore, OAuthClient};
use crate::backend::BackendClient;
use crate::config::Config;
use crate::engine::{EngineEvent, SidecarEngine};
use crate::global;
use crate::meeting::{Collaborators, ControllerInput, SessionController};
use crate::ui::UiHub;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::LocalSet;
use tracing::{error, info, warn};

const INPUT_QUEUE: usize = 64;

/// Runs the service until the engine exits or the user interrupts it.
///
/// Every controller operation is spawned on a `LocalSet`, so handlers start
/// in arrival order on one thread and only interleave at await points.
pub async fn run_service() -> Result<()> {
    let local = LocalSet::new();
    local.run_until(serve()).await
}

async fn serve() -> Result<()> {
    info!("Starting notetaker service");

    let config = Config::load()?;
    let backend = Arc::new(BackendClient::new(&config.backend)?);
    let auth = Arc::new(build_auth_manager(&config, backend.clone())?);

    let (event_tx, mut event_rx) = mpsc::channel::<EngineEvent>(INPUT_QUEUE);
    let (input_tx, mut input_rx) = mpsc::channel::<ControllerInput>(INPUT_QUEUE);

    let (engine, engine_reader) = SidecarEngine::spawn(&config.engine, event_tx)?;
    let hub = UiHub::default();

    let controller = SessionController::new(
        Collaborators {
            engine: Arc::new(engine),
            credentials: auth.clone(),
            uploads: backend.clone(),
            registry: backend,
            ui: Arc::new(hub.clone()),
        },
        &config.recording,
    );

    let api_server = ApiServer::new(
        ApiState {
            inputs: input_tx,
            controller: controller.clone(),
            hub,
            auth,
        },
        config.api.port,
    );
    tokio::spawn(async move {
        if let Err(e) = api_server.start().await {
            error!("API server failed: {}", e);
        }
    });

    info!("notetaker is ready, waiting for meetings");

    loop {
        let input = tokio::select! {
            event = event_rx.recv() => match event {
                Some(event) => ControllerInput::Engine(event),
                None => {
                    warn!("Engine event stream closed");
                    break;
                }
            },
            Some(input) = input_rx.recv() => input,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
        };
        dispatch(&controller, input);
    }

    controller.shutdown().await;
    engine_reader.abort();
    info!("notetaker stopped");
    Ok(())
}

fn dispatch(controller: &SessionController, input: ControllerInput) {
    let controller = controller.clone();
    tokio::task::spawn_local(async move {
        let label = format!("{:?}", input);
        if let Err(e) = controller.dispatch(input).await {
            warn!("{} failed: {}", label, e);
        }
    });
}

/// Auth manager backed by the on-disk token store.
pub fn build_auth_manager(config: &Config, backend: Arc<BackendClient>) -> Result<AuthManager> {
    let server = OAuthClient::new(config.auth.clone(), config.backend.request_timeout())
        .context("Failed to configure sign-in")?;
    let store = FileTokenStore::new(global::token_file()?);

    Ok(AuthManager::new(Arc::new(server), Arc::new(store)).with_diagnostics(backend))
}
