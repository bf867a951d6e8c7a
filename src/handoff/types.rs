use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Lifecycle status of the capture process, shared through the container.
///
/// Written only by the capture process; the host polls it and treats it as a
/// hint for banners, never as proof that data exists. Readers may observe any
/// value at any poll tick (last write wins).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BroadcastStatus {
    Recording,
    Paused,
    Finished,
    PendingUpload,
    Uploading,
    Uploaded,
    AutoStopping,
    WriterFailed,
}

impl BroadcastStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BroadcastStatus::Recording => "recording",
            BroadcastStatus::Paused => "paused",
            BroadcastStatus::Finished => "finished",
            BroadcastStatus::PendingUpload => "pending_upload",
            BroadcastStatus::Uploading => "uploading",
            BroadcastStatus::Uploaded => "uploaded",
            BroadcastStatus::AutoStopping => "auto_stopping",
            BroadcastStatus::WriterFailed => "writer_failed",
        }
    }
}

/// One finished recording queued for upload.
///
/// Created by the capture process at finalize time and consumed exactly once
/// by the host coordinator. The `id` is the idempotency token: appends with a
/// known id are skipped, removals of a missing id are no-ops, so both sides
/// stay safe under re-polls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastUploadItem {
    pub id: Uuid,
    pub screen_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_path: Option<PathBuf>,
    /// Recording length in seconds, clamped to at least 1.
    pub duration_sec: u64,
    /// Why the capture ended ("user_stopped", "auto_stop", ...).
    pub reason: String,
    /// Epoch seconds when the capture finished.
    pub ended_at: i64,
}

impl BroadcastUploadItem {
    pub fn new(
        screen_path: PathBuf,
        audio_path: Option<PathBuf>,
        duration_sec: u64,
        reason: impl Into<String>,
        ended_at: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            screen_path,
            audio_path,
            duration_sec: duration_sec.max(1),
            reason: reason.into(),
            ended_at,
        }
    }
}

/// Device identity + bearer token shared with the capture process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub device_id: String,
    pub token: String,
}

/// Container keys. The host and the capture process agree on these strings;
/// each key maps to one JSON file in the shared directory.
pub mod keys {
    pub const STATUS: &str = "broadcast.status";
    pub const STARTED_AT: &str = "broadcast.startedAt";
    pub const STOPPED_AT: &str = "broadcast.stoppedAt";
    pub const PENDING_UPLOADS: &str = "broadcast.pendingUploads";
    pub const LAST_EVENT_ID: &str = "broadcast.lastEventId";
    pub const LAST_UPLOAD_PHASE: &str = "broadcast.lastUploadPhase";
    pub const LAST_UPLOAD_ERROR: &str = "broadcast.lastUploadError";
    pub const LAST_UPLOAD_UPDATED_AT: &str = "broadcast.lastUploadUpdatedAt";
    pub const AUTH_TOKEN: &str = "shared.authToken";
    pub const DEVICE_ID: &str = "shared.deviceId";
}
