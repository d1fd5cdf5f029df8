//! pawtrail integration test harness.
//!
//! Tests here drive the real transports over loopback: the WebSocket feed
//! against a local tokio-tungstenite server, the REST client against a local
//! axum stub of the runner API.
//!
//!   cargo test --test integration
//!
//! Every server binds port 0, so tests can run in parallel.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::routing::post;
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;

mod backend;
mod feed;

pub const FRAME: &str = r#"{"booking_id":"b1","runner_id":"r1","latitude":3.139,"longitude":101.6869,"speed_kmh":42,"heading_degrees":90,"timestamp":"2024-01-01T00:00:00Z"}"#;

/// Upper bound on any single wait in these tests.
pub const WAIT: Duration = Duration::from_secs(5);

// ── Feed server ───────────────────────────────────────────────────────────────

/// What the feed server does with one accepted connection.
pub struct Script {
    pub frames: Vec<Message>,
    /// Send a close frame after `frames`; otherwise hold the connection open
    /// until the client goes away.
    pub close: bool,
}

impl Script {
    pub fn close_after(frames: &[&str]) -> Self {
        Self {
            frames: frames.iter().map(|f| Message::Text(f.to_string())).collect(),
            close: true,
        }
    }

    pub fn hold_after(frames: &[&str]) -> Self {
        Self {
            frames: frames.iter().map(|f| Message::Text(f.to_string())).collect(),
            close: false,
        }
    }

    /// Send `frames` as they are, then hold the connection open.
    pub fn hold_after_messages(frames: Vec<Message>) -> Self {
        Self { frames, close: false }
    }
}

pub struct FeedServer {
    pub base_url: String,
    /// Request target (path and query) of every accepted handshake.
    pub requests: mpsc::UnboundedReceiver<String>,
}

/// Serve one script per accepted connection, in order. Connections beyond
/// the last script are not accepted.
pub async fn spawn_feed_server(scripts: Vec<Script>) -> Result<FeedServer> {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .context("failed to bind feed server")?;
    let addr = listener.local_addr()?;
    let (request_tx, requests) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        for script in scripts {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let request_tx = request_tx.clone();
            tokio::spawn(async move {
                let record = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                    let _ = request_tx.send(req.uri().to_string());
                    Ok(resp)
                };
                let Ok(mut ws) = tokio_tungstenite::accept_hdr_async(stream, record).await else {
                    return;
                };
                for frame in script.frames {
                    if ws.send(frame).await.is_err() {
                        return;
                    }
                }
                if script.close {
                    let _ = ws.close(None).await;
                }
                while let Some(Ok(_)) = ws.next().await {}
            });
        }
    });

    Ok(FeedServer {
        base_url: format!("ws://{addr}"),
        requests,
    })
}

/// An address with nothing listening on it.
pub async fn closed_addr() -> Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);
    Ok(addr)
}

// ── Backend stub ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Hit {
    pub path: String,
    pub authorization: Option<String>,
    pub body: Option<serde_json::Value>,
}

#[derive(Clone, Default)]
pub struct Backend {
    hits: Arc<Mutex<Vec<Hit>>>,
    /// When set, every call is answered 503 with this error message.
    reject: Option<String>,
}

impl Backend {
    pub fn rejecting(message: &str) -> Self {
        Self {
            reject: Some(message.to_string()),
            ..Self::default()
        }
    }

    pub fn hits(&self) -> Vec<Hit> {
        self.hits.lock().unwrap().clone()
    }

    pub fn paths(&self) -> Vec<String> {
        self.hits().into_iter().map(|h| h.path).collect()
    }
}

async fn record(
    State(backend): State<Backend>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<serde_json::Value>) {
    let authorization = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = serde_json::from_slice(&body).ok();
    backend.hits.lock().unwrap().push(Hit {
        path: uri.path().to_string(),
        authorization,
        body,
    });

    match &backend.reject {
        Some(message) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "error": message })),
        ),
        None => (StatusCode::OK, Json(serde_json::json!({ "ok": true }))),
    }
}

/// Serve the runner endpoints on loopback. Returns the base URL.
pub async fn spawn_backend(backend: Backend) -> Result<String> {
    let app = Router::new()
        .route("/api/v1/runners/me/location", post(record))
        .route("/api/v1/runners/me/online", post(record))
        .route("/api/v1/runners/me/offline", post(record))
        .with_state(backend);

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .context("failed to bind backend stub")?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok(format!("http://{addr}"))
}
