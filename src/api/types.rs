use serde::{Deserialize, Serialize};

// Request/response bodies for the backend REST surface. Wire names are
// snake_case, so the field names map directly.

#[derive(Debug, Clone, Serialize)]
pub struct AnonymousAuthRequest {
    pub device_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthResponse {
    pub token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WhoamiResponse {
    pub device_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeviceRegistration {
    pub device_id: String,
    pub platform: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceResponse {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct EventCreate {
    /// Event kind, `voice` or `recording`
    pub kind: String,
    pub device_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_sec: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct EventPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_sec: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventResponse {
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventStatusResponse {
    pub id: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadRequest {
    pub file_name: String,
    pub content_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
}

/// Presigned destination plus the public URL the event is patched with.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadTicket {
    pub upload_url: String,
    pub file_url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemoryCreate {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MemoryResponse {
    pub id: String,
}
