//! GET /events: server-sent stream of UI events.

use async_stream::stream;
use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Router,
};
use futures_util::Stream;
use std::convert::Infallible;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use super::super::ApiState;

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/events", get(events))
        .with_state(state)
}

/// One subscription per connection; it ends when the client goes away.
async fn events(State(state): State<ApiState>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    debug!("UI event stream connected");
    let mut rx = state.hub.subscribe();

    let stream = stream! {
        loop {
            match rx.recv().await {
                Ok(event) => match Event::default().event(event.kind()).json_data(&event) {
                    Ok(frame) => yield Ok::<_, Infallible>(frame),
                    Err(e) => warn!("Failed to encode UI event {}: {}", event.kind(), e),
                },
                Err(RecvError::Lagged(skipped)) => {
                    warn!("UI event stream fell behind, {} events dropped", skipped)
                }
                Err(RecvError::Closed) => break,
            }
        }
        debug!("UI event stream closed");
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}
