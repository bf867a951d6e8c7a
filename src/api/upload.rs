// Upload pipeline shared by the capture process and the host coordinator:
// register device, create the event record, push file bytes through presigned
// URLs, patch the event with the public URLs.

use std::future::Future;
use std::path::Path;
use tracing::{info, warn};

use super::client::{ApiClient, ApiError};
use super::types::{EventCreate, EventPatch, UploadRequest};
use crate::audio::VoiceRecording;
use crate::handoff::{BroadcastUploadItem, SharedStore};

pub const DEVICE_PLATFORM: &str = "daemon";

#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub event_id: String,
    pub file_url: String,
    pub audio_url: Option<String>,
}

/// Upload one queued broadcast recording. Each step is independently
/// fallible; the first failure aborts the attempt and the caller decides what
/// happens to the queue entry. Phase and error breadcrumbs go into `store`
/// when one is given; they are hints only.
pub async fn upload_recording(
    api: &ApiClient,
    device_id: &str,
    item: &BroadcastUploadItem,
    store: Option<&SharedStore>,
) -> Result<UploadOutcome, ApiError> {
    let result = run_pipeline(api, device_id, item, store).await;
    if let Err(e) = &result {
        note_error(store, &e.to_string());
    }
    result
}

async fn run_pipeline(
    api: &ApiClient,
    device_id: &str,
    item: &BroadcastUploadItem,
    store: Option<&SharedStore>,
) -> Result<UploadOutcome, ApiError> {
    note_phase(store, "register");
    api.register_device(device_id, DEVICE_PLATFORM).await?;

    note_phase(store, "create_event");
    let event = EventCreate {
        kind: "recording".to_string(),
        device_id: device_id.to_string(),
        started_at: Some(item.ended_at - item.duration_sec as i64),
        duration_sec: Some(item.duration_sec),
        reason: Some(item.reason.clone()),
    };
    let created = with_device_retry(api, device_id, || api.create_event(&event)).await?;
    if let Some(store) = store {
        let _ = store.set_last_event_id(&created.id);
    }

    note_phase(store, "upload_screen");
    let file_url = upload_file(api, &item.screen_path, "application/octet-stream").await?;

    let audio_url = match &item.audio_path {
        Some(path) => {
            note_phase(store, "upload_audio");
            Some(upload_file(api, path, "audio/wav").await?)
        }
        None => None,
    };

    note_phase(store, "patch_event");
    let patch = EventPatch {
        file_url: Some(file_url.clone()),
        audio_url: audio_url.clone(),
        duration_sec: Some(item.duration_sec),
        status: Some("uploaded".to_string()),
    };
    with_device_retry(api, device_id, || api.patch_event(&created.id, &patch)).await?;

    note_phase(store, "done");
    info!("Recording uploaded: event {} ({})", created.id, file_url);

    Ok(UploadOutcome {
        event_id: created.id,
        file_url,
        audio_url,
    })
}

/// Presign a destination and `PUT` the file there. Returns the public URL.
pub async fn upload_file(
    api: &ApiClient,
    path: &Path,
    content_type: &str,
) -> Result<String, ApiError> {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "recording.bin".to_string());
    let size_bytes = tokio::fs::metadata(path).await.ok().map(|meta| meta.len());

    let ticket = api
        .presign_upload(&UploadRequest {
            file_name,
            content_type: content_type.to_string(),
            size_bytes,
        })
        .await?;
    api.put_file(&ticket.upload_url, path, content_type).await?;
    Ok(ticket.file_url)
}

/// Upload a finished voice recording and patch its already-created event.
pub async fn upload_voice_recording(
    api: &ApiClient,
    event_id: &str,
    recording: &VoiceRecording,
) -> Result<String, ApiError> {
    let file_url = upload_file(api, &recording.path, "audio/wav").await?;
    let patch = EventPatch {
        file_url: Some(file_url.clone()),
        duration_sec: Some(recording.duration_secs.round() as u64),
        status: Some("uploaded".to_string()),
        ..Default::default()
    };
    api.patch_event(event_id, &patch).await?;
    Ok(file_url)
}

/// Retry `call` once after re-registering the device when the backend reports
/// it unknown.
async fn with_device_retry<T, F, Fut>(
    api: &ApiClient,
    device_id: &str,
    call: F,
) -> Result<T, ApiError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    match call().await {
        Err(e) if e.is_not_found() => {
            warn!("Backend does not know this device, re-registering and retrying");
            api.register_device(device_id, DEVICE_PLATFORM).await?;
            call().await
        }
        other => other,
    }
}

fn note_phase(store: Option<&SharedStore>, phase: &str) {
    if let Some(store) = store {
        if let Err(e) = store.record_upload_phase(phase) {
            warn!("Failed to record upload phase: {:#}", e);
        }
    }
}

fn note_error(store: Option<&SharedStore>, error: &str) {
    if let Some(store) = store {
        if let Err(e) = store.record_upload_error(error) {
            warn!("Failed to record upload error: {:#}", e);
        }
    }
}
