use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use pawtrail_core::TrackingUpdate;
use pawtrail_tracking::{
    ConnectionManager, ConnectionState, ReconnectPolicy, StaticToken, TrackingError, Transport,
    WsTransport,
};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

use crate::*;

// ══════════════════════════════════════════════════════════════════════════════
//  Tracking feed over a real WebSocket
// ══════════════════════════════════════════════════════════════════════════════

fn fast_policy(max_attempts: u32) -> ReconnectPolicy {
    ReconnectPolicy {
        max_attempts,
        base_delay: Duration::from_millis(10),
    }
}

/// Manager wired to channels so tests can await callbacks.
fn manager(
    base_url: &str,
    token: &str,
    policy: ReconnectPolicy,
) -> ConnectionManager {
    ConnectionManager::new(
        Arc::new(WsTransport),
        Arc::new(StaticToken::new(token)),
        base_url,
        policy,
        Duration::from_secs(2),
    )
}

fn connect(
    manager: &ConnectionManager,
    booking_id: &str,
) -> (
    mpsc::UnboundedReceiver<TrackingUpdate>,
    mpsc::UnboundedReceiver<TrackingError>,
) {
    let (update_tx, updates) = mpsc::unbounded_channel();
    let (error_tx, errors) = mpsc::unbounded_channel();
    manager.connect(
        booking_id,
        move |update| {
            let _ = update_tx.send(update);
        },
        move |error| {
            let _ = error_tx.send(error);
        },
    );
    (updates, errors)
}

#[tokio::test]
async fn ws_transport_yields_text_frames_until_close() {
    let mut server = spawn_feed_server(vec![Script::close_after(&[FRAME, "second"])])
        .await
        .unwrap();

    let url = format!("{}/ws/tracking/b1?token=t", server.base_url);
    let frames = WsTransport.open(&url).await.unwrap();
    let frames: Vec<Vec<u8>> = timeout(WAIT, frames.map(|f| f.unwrap()).collect())
        .await
        .expect("stream should end after close frame");

    assert_eq!(frames, vec![FRAME.as_bytes().to_vec(), b"second".to_vec()]);
    assert_eq!(server.requests.recv().await.unwrap(), "/ws/tracking/b1?token=t");
}

#[tokio::test]
async fn ws_transport_reports_refused_handshake() {
    let addr = closed_addr().await.unwrap();
    let result = WsTransport.open(&format!("ws://{addr}/ws/tracking/b1?token=t")).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn manager_delivers_live_frame_with_encoded_token() {
    let mut server = spawn_feed_server(vec![Script::hold_after(&[FRAME])]).await.unwrap();
    let m = manager(&server.base_url, "secret token", fast_policy(5));

    let (mut updates, _errors) = connect(&m, "b1");
    let update = timeout(WAIT, updates.recv()).await.unwrap().unwrap();

    assert_eq!(update, TrackingUpdate::decode(FRAME).unwrap());
    assert_eq!(
        server.requests.recv().await.unwrap(),
        "/ws/tracking/b1?token=secret%20token"
    );
    assert!(m.is_connected());
    assert_eq!(m.attempts(), 0);

    m.disconnect();
    assert_eq!(m.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn manager_reconnects_after_server_close() {
    let mut server = spawn_feed_server(vec![
        Script::close_after(&[]),
        Script::hold_after(&[FRAME]),
    ])
    .await
    .unwrap();
    let m = manager(&server.base_url, "tok", fast_policy(5));

    let (mut updates, mut errors) = connect(&m, "b1");
    let update = timeout(WAIT, updates.recv()).await.unwrap().unwrap();

    assert_eq!(update.booking_id, "b1");
    assert!(server.requests.recv().await.is_some());
    assert!(server.requests.recv().await.is_some());
    assert_eq!(m.attempts(), 0);
    assert!(errors.try_recv().is_err());
}

#[tokio::test]
async fn manager_gives_up_when_nothing_listens() {
    let addr = closed_addr().await.unwrap();
    let m = manager(&format!("ws://{addr}"), "tok", fast_policy(2));

    let (_updates, mut errors) = connect(&m, "b1");
    let error = timeout(WAIT, errors.recv()).await.unwrap().unwrap();

    assert_eq!(error, TrackingError::ReconnectExhausted { attempts: 2 });
    assert_eq!(m.state(), ConnectionState::Failed);

    // no further callbacks once failed
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(errors.try_recv().is_err());
}

#[tokio::test]
async fn garbage_frame_is_reported_and_feed_stays_open() {
    let server = spawn_feed_server(vec![Script::hold_after(&["not json", FRAME])])
        .await
        .unwrap();
    let m = manager(&server.base_url, "tok", fast_policy(5));

    let (mut updates, mut errors) = connect(&m, "b1");
    let error = timeout(WAIT, errors.recv()).await.unwrap().unwrap();
    let update = timeout(WAIT, updates.recv()).await.unwrap().unwrap();

    assert!(matches!(error, TrackingError::Decode(_)));
    assert!(!error.is_terminal());
    assert_eq!(update.runner_id, "r1");
    assert_eq!(m.state(), ConnectionState::Open);
}

#[tokio::test]
async fn binary_frame_with_invalid_utf8_is_a_decode_fault() {
    let mut corrupt = FRAME.as_bytes().to_vec();
    corrupt[FRAME.find("r1").unwrap()] = 0xff;
    let server = spawn_feed_server(vec![Script::hold_after_messages(vec![
        Message::Binary(corrupt),
        Message::Binary(FRAME.as_bytes().to_vec()),
    ])])
    .await
    .unwrap();
    let m = manager(&server.base_url, "tok", fast_policy(5));

    let (mut updates, mut errors) = connect(&m, "b1");
    let error = timeout(WAIT, errors.recv()).await.unwrap().unwrap();
    let update = timeout(WAIT, updates.recv()).await.unwrap().unwrap();

    assert!(matches!(error, TrackingError::Decode(_)));
    assert_eq!(update.runner_id, "r1");
    assert!(errors.try_recv().is_err());
}
