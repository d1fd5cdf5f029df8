//! REST calls the tracking client makes against the runner API.
//!
//! Only three endpoints are used, all fire-and-forget: the response body is
//! read solely to report a backend error message.

use std::sync::Arc;

use async_trait::async_trait;
use pawtrail_core::config::ApiConfig;
use pawtrail_core::Coordinates;
use serde::{Deserialize, Serialize};

use crate::token::TokenProvider;

const LOCATION_PATH: &str = "/api/v1/runners/me/location";
const ONLINE_PATH: &str = "/api/v1/runners/me/online";
const OFFLINE_PATH: &str = "/api/v1/runners/me/offline";

/// Where the sampler sends position samples.
#[async_trait]
pub trait LocationSink: Send + Sync + 'static {
    async fn upload_location(&self, coords: Coordinates) -> Result<(), ApiError>;
}

/// Online/offline transitions for the runner.
#[async_trait]
pub trait PresenceApi: Send + Sync + 'static {
    async fn go_online(&self, coords: Coordinates) -> Result<(), ApiError>;
    async fn go_offline(&self) -> Result<(), ApiError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("no authentication token")]
    MissingToken,
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("backend returned {status}: {message}")]
    Status { status: u16, message: String },
}

#[derive(Deserialize)]
struct ErrorBody {
    error: Option<String>,
}

/// reqwest-backed client for the runner endpoints.
#[derive(Clone)]
pub struct RunnerApi {
    client: reqwest::Client,
    base_url: String,
    tokens: Arc<dyn TokenProvider>,
}

impl RunnerApi {
    pub fn new(config: &ApiConfig, tokens: Arc<dyn TokenProvider>) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            tokens,
        })
    }

    async fn post<T: Serialize + ?Sized>(&self, path: &str, body: Option<&T>) -> Result<(), ApiError> {
        let token = self.tokens.access_token().ok_or(ApiError::MissingToken)?;

        let mut request = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(token);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let message = response
            .json::<ErrorBody>()
            .await
            .ok()
            .and_then(|b| b.error)
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());
        Err(ApiError::Status {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl LocationSink for RunnerApi {
    async fn upload_location(&self, coords: Coordinates) -> Result<(), ApiError> {
        self.post(LOCATION_PATH, Some(&coords)).await
    }
}

#[async_trait]
impl PresenceApi for RunnerApi {
    async fn go_online(&self, coords: Coordinates) -> Result<(), ApiError> {
        self.post(ONLINE_PATH, Some(&coords)).await
    }

    async fn go_offline(&self) -> Result<(), ApiError> {
        self.post::<()>(OFFLINE_PATH, None).await
    }
}
