use std::sync::Arc;
use std::time::Duration;

use pawtrail_core::config::{ApiConfig, SamplerConfig};
use pawtrail_core::Coordinates;
use pawtrail_tracking::geolocation::FixedSource;
use pawtrail_tracking::{
    ApiError, LocationSampler, LocationSink, PresenceApi, RunnerApi, RunnerPresence, StaticToken,
};

use crate::*;

// ══════════════════════════════════════════════════════════════════════════════
//  Runner REST API against a stub backend
// ══════════════════════════════════════════════════════════════════════════════

fn api(base_url: &str, token: &str) -> RunnerApi {
    let config = ApiConfig {
        base_url: base_url.to_string(),
        request_timeout_secs: 2,
        ..ApiConfig::default()
    };
    RunnerApi::new(&config, Arc::new(StaticToken::new(token))).unwrap()
}

#[tokio::test]
async fn upload_posts_coordinates_with_bearer_token() {
    let backend = Backend::default();
    let url = spawn_backend(backend.clone()).await.unwrap();

    api(&url, "tok")
        .upload_location(Coordinates::new(3.139, 101.6869))
        .await
        .unwrap();

    let hits = backend.hits();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].path, "/api/v1/runners/me/location");
    assert_eq!(hits[0].authorization.as_deref(), Some("Bearer tok"));
    assert_eq!(
        hits[0].body,
        Some(serde_json::json!({ "latitude": 3.139, "longitude": 101.6869 }))
    );
}

#[tokio::test]
async fn backend_error_message_is_surfaced() {
    let backend = Backend::rejecting("runner suspended");
    let url = spawn_backend(backend.clone()).await.unwrap();

    let err = api(&url, "tok").go_offline().await.unwrap_err();

    match err {
        ApiError::Status { status, message } => {
            assert_eq!(status, 503);
            assert_eq!(message, "runner suspended");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(backend.paths(), vec!["/api/v1/runners/me/offline"]);
}

#[tokio::test]
async fn unreachable_backend_is_a_request_error() {
    let addr = closed_addr().await.unwrap();
    let err = api(&format!("http://{addr}"), "tok")
        .upload_location(Coordinates::new(1.0, 2.0))
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Request(_)));
}

/// Online, a few sampling ticks, offline: the backend sees them in order.
#[tokio::test]
async fn presence_round_trip() {
    let backend = Backend::default();
    let url = spawn_backend(backend.clone()).await.unwrap();
    let runner_api = Arc::new(api(&url, "tok"));
    let source = Arc::new(FixedSource::new(3.139, 101.6869));

    let sampler_config = SamplerConfig {
        upload_interval_secs: 1,
        ..SamplerConfig::default()
    };
    let sampler = LocationSampler::new(source.clone(), runner_api.clone(), sampler_config);
    let presence = RunnerPresence::new(
        source,
        runner_api,
        Arc::new(sampler),
        Duration::from_secs(2),
    );

    presence.go_online().await.unwrap();
    tokio::time::sleep(Duration::from_millis(1500)).await;
    presence.go_offline().await.unwrap();

    let paths = backend.paths();
    assert_eq!(paths.first().map(String::as_str), Some("/api/v1/runners/me/online"));
    assert_eq!(paths.last().map(String::as_str), Some("/api/v1/runners/me/offline"));
    let uploads = paths
        .iter()
        .filter(|p| p.as_str() == "/api/v1/runners/me/location")
        .count();
    assert!(uploads >= 2, "paths {paths:?}");

    let online = &backend.hits()[0];
    assert_eq!(
        online.body,
        Some(serde_json::json!({ "latitude": 3.139, "longitude": 101.6869 }))
    );

    // nothing after offline
    let settled = backend.hits().len();
    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert_eq!(backend.hits().len(), settled);
}
