//! The Coinstreak state server.
//!
//! One WebSocket endpoint per game-state id carries the whole protocol:
//! `get` asks for the stored snapshot (answered with the state, or an
//! explicit null when the id is new), `put` replaces it. Every put is also
//! pushed as a `get` frame to the *other* sockets subscribed to the same id,
//! so a second window watching the same save sees progress live.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::Method;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use coinstreak_protocol::WireMessage;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, warn};

mod store;
pub use store::Store;


#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub hub: Hub,
}

/// Live subscribers, keyed by game-state id then connection id. Frames are
/// fanned out as already-encoded text.
#[derive(Clone, Default)]
pub struct Hub {
    inner: Arc<Mutex<HashMap<String, HashMap<u64, mpsc::UnboundedSender<String>>>>>,
    next_conn: Arc<AtomicU64>,
}

impl Hub {
    fn register(&self, id: &str, tx: mpsc::UnboundedSender<String>) -> u64 {
        let conn = self.next_conn.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.entry(id.to_string()).or_default().insert(conn, tx);
        conn
    }

    fn unregister(&self, id: &str, conn: u64) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(subs) = inner.get_mut(id) {
            subs.remove(&conn);
            if subs.is_empty() {
                inner.remove(id);
            }
        }
    }

    /// Push a frame to every subscriber of `id` except `from`. The writer
    /// already has this state; echoing it back would be a pointless loop.
    fn push_others(&self, id: &str, from: u64, frame: &str) {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(subs) = inner.get(id) {
            for (&conn, tx) in subs {
                if conn != from {
                    let _ = tx.send(frame.to_string());
                }
            }
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/state/{id}", get(state_channel))
        .with_state(Arc::new(state))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET]),
        )
}

async fn health() -> &'static str {
    "ok"
}

async fn state_channel(
    ws: WebSocketUpgrade,
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, id, state))
}

async fn handle_socket(socket: WebSocket, id: String, state: Arc<AppState>) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let conn = state.hub.register(&id, tx.clone());
    debug!(%id, conn, "state channel subscribed");

    // Replies and pushes alike go through the mpsc so writes never interleave.
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sink.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = stream.next().await {
        let text = match msg {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        let Some(msg) = WireMessage::parse(text.as_str()) else {
            warn!(%id, conn, "dropping malformed frame");
            continue;
        };
        match msg {
            WireMessage::Get { id: want, .. } => {
                let stored = match state.store.get(&want) {
                    Ok(stored) => stored,
                    Err(e) => {
                        warn!(%want, "read failed: {e:#}");
                        continue;
                    }
                };
                let reply = WireMessage::Get {
                    id: want,
                    // Explicit null tells a fresh client there is nothing to
                    // restore, as opposed to the server being unreachable.
                    state: Some(stored.unwrap_or(Value::Null)),
                };
                if tx.send(reply.encode()).is_err() {
                    break;
                }
            }
            WireMessage::Put { id: target, state: snapshot } => {
                if !snapshot.is_object() {
                    warn!(%target, "rejecting non-object snapshot");
                    continue;
                }
                match state.store.put(&target, &snapshot) {
                    Ok(rev) => {
                        debug!(%target, rev, "snapshot stored");
                        let push = WireMessage::Get {
                            id: target.clone(),
                            state: Some(snapshot),
                        };
                        state.hub.push_others(&target, conn, &push.encode());
                    }
                    Err(e) => warn!(%target, "write failed: {e:#}"),
                }
            }
        }
    }

    state.hub.unregister(&id, conn);
    writer.abort();
    debug!(%id, conn, "state channel closed");
}

pub async fn serve(addr: SocketAddr, db_path: PathBuf) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    serve_listener(listener, db_path, async {
        std::future::pending::<()>().await
    })
    .await?;
    Ok(())
}

pub async fn serve_listener(
    listener: tokio::net::TcpListener,
    db_path: PathBuf,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<SocketAddr> {
    let store = Store::new(db_path);
    // Fail fast if sqlite is unusable.
    store.open()?;
    let app = build_router(AppState {
        store,
        hub: Hub::default(),
    });
    let addr = listener.local_addr()?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(addr)
}
