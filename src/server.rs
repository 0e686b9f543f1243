// server.rs: HTTP surface: WebSocket subscribers, health probe, static frontend

use crate::hub::{Hub, Subscription};
use axum::{
    Json, Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
    routing::get,
};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
struct AppState {
    hub: Arc<Hub>,
}

#[derive(Debug, Serialize, PartialEq)]
struct Health {
    status: &'static str,
    subscribers: usize,
    title: Option<String>,
}

/// Router for `/ws`, `/health` and the frontend under `static_dir`.
/// Unknown paths get `index.html` so client-side routes resolve.
pub fn router(hub: Arc<Hub>, static_dir: &Path) -> Router {
    let frontend = ServeDir::new(static_dir).fallback(ServeFile::new(static_dir.join("index.html")));
    Router::new()
        .route("/ws", get(handle_websocket))
        .route("/health", get(health))
        .fallback_service(frontend)
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { hub })
}

async fn health(State(state): State<AppState>) -> Json<Health> {
    Json(Health {
        status: "ok",
        subscribers: state.hub.subscriber_count(),
        title: state.hub.current_title(),
    })
}

async fn handle_websocket(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state.hub))
}

async fn handle_socket(socket: WebSocket, hub: Arc<Hub>) {
    let (sink, stream) = socket.split();
    serve_subscriber(hub, sink, stream).await;
}

/// Pump hub frames into `sink` until either side goes away, then unregister.
async fn serve_subscriber<S, R, E>(hub: Arc<Hub>, mut sink: S, mut stream: R)
where
    S: Sink<Message> + Unpin + Send + 'static,
    R: Stream<Item = Result<Message, E>> + Unpin + Send + 'static,
    E: Send + 'static,
{
    let Subscription { id, mut frames } = hub.register();

    let mut writer = tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            if sink.send(Message::Text(String::from(&*frame).into())).await.is_err() {
                break;
            }
        }
    });
    // Subscribers have nothing to say; just notice when they leave.
    let mut reader = tokio::spawn(async move {
        while let Some(msg) = stream.next().await {
            match msg {
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    });

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }
    hub.unregister(id);
}
