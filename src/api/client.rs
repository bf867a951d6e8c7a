use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::RwLock;
use tokio_util::io::ReaderStream;
use tracing::debug;

use super::types::*;

/// Error from the backend REST surface.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Non-success HTTP response, body kept for diagnostics.
    #[error("HTTP {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl ApiError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ApiError::Status { status, .. } if *status == reqwest::StatusCode::NOT_FOUND
        )
    }
}

/// Typed client for the `/v1` backend API.
///
/// The bearer token is settable after construction because anonymous auth is
/// itself one of the calls.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    token: RwLock<Option<String>>,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            token: RwLock::new(None),
        }
    }

    pub fn set_token(&self, token: Option<String>) {
        if let Ok(mut slot) = self.token.write() {
            *slot = token;
        }
    }

    pub fn token(&self) -> Option<String> {
        self.token.read().ok().and_then(|slot| slot.clone())
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1{}", self.base_url.trim_end_matches('/'), path)
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.token() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send<T: DeserializeOwned>(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<T, ApiError> {
        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Status { status, body });
        }
        Ok(response.json().await?)
    }

    pub async fn auth_anonymous(&self, device_id: &str) -> Result<AuthResponse, ApiError> {
        let body = AnonymousAuthRequest {
            device_id: device_id.to_string(),
        };
        self.send(self.http.post(self.url("/auth/anonymous")).json(&body))
            .await
    }

    pub async fn whoami(&self) -> Result<WhoamiResponse, ApiError> {
        self.send(self.authed(self.http.get(self.url("/auth/whoami"))))
            .await
    }

    pub async fn register_device(
        &self,
        device_id: &str,
        platform: &str,
    ) -> Result<DeviceResponse, ApiError> {
        let body = DeviceRegistration {
            device_id: device_id.to_string(),
            platform: platform.to_string(),
        };
        self.send(self.authed(self.http.post(self.url("/devices")).json(&body)))
            .await
    }

    pub async fn create_event(&self, event: &EventCreate) -> Result<EventResponse, ApiError> {
        self.send(self.authed(self.http.post(self.url("/events")).json(event)))
            .await
    }

    pub async fn patch_event(
        &self,
        event_id: &str,
        patch: &EventPatch,
    ) -> Result<EventResponse, ApiError> {
        let url = self.url(&format!("/events/{event_id}"));
        self.send(self.authed(self.http.patch(url).json(patch)))
            .await
    }

    pub async fn event_status(&self, event_id: &str) -> Result<EventStatusResponse, ApiError> {
        let url = self.url(&format!("/events/{event_id}/status"));
        self.send(self.authed(self.http.get(url))).await
    }

    pub async fn presign_upload(
        &self,
        request: &UploadRequest,
    ) -> Result<UploadTicket, ApiError> {
        self.send(self.authed(self.http.post(self.url("/uploads/recording")).json(request)))
            .await
    }

    /// Raw `PUT` of file bytes to a presigned URL. Not under `/v1` and not
    /// authenticated; the URL itself carries the grant.
    pub async fn put_file(
        &self,
        upload_url: &str,
        path: &Path,
        content_type: &str,
    ) -> Result<(), ApiError> {
        let file = tokio::fs::File::open(path).await?;
        let size = file.metadata().await?.len();
        debug!("PUT {} ({} bytes) -> {}", path.display(), size, upload_url);

        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
        let response = self
            .http
            .put(upload_url)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .header(reqwest::header::CONTENT_LENGTH, size)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Status { status, body });
        }
        Ok(())
    }

    pub async fn create_memory(&self, memory: &MemoryCreate) -> Result<MemoryResponse, ApiError> {
        self.send(self.authed(self.http.post(self.url("/memory")).json(memory)))
            .await
    }
}
