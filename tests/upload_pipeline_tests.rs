// Integration tests for the recording upload pipeline, run against an
// in-process mock of the backend REST surface.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use axum::extract::{Path as UrlPath, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, patch, post, put};
use axum::{Json, Router};
use tempfile::TempDir;
use tokio::net::TcpListener;

use nestling::api::{upload_recording, upload_voice_recording, ApiClient};
use nestling::audio::VoiceRecording;
use nestling::handoff::{BroadcastUploadItem, SharedStore};

#[derive(Clone)]
struct BackendState {
    base: String,
    calls: Arc<Mutex<Vec<String>>>,
    events: Arc<Mutex<Vec<serde_json::Value>>>,
    patches: Arc<Mutex<Vec<serde_json::Value>>>,
    blobs: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    /// Authorization header seen by each auth-aware handler, in call order.
    bearers: Arc<Mutex<Vec<Option<String>>>>,
    /// How many create-event calls to reject with 404 before succeeding.
    create_event_404s: Arc<AtomicUsize>,
    presign_500: bool,
}

impl BackendState {
    fn note(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    fn note_bearer(&self, headers: &HeaderMap) {
        let bearer = headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .map(String::from);
        self.bearers.lock().unwrap().push(bearer);
    }
}

struct MockBackend {
    addr: SocketAddr,
    calls: Arc<Mutex<Vec<String>>>,
    events: Arc<Mutex<Vec<serde_json::Value>>>,
    patches: Arc<Mutex<Vec<serde_json::Value>>>,
    blobs: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    bearers: Arc<Mutex<Vec<Option<String>>>>,
}

impl MockBackend {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn events(&self) -> Vec<serde_json::Value> {
        self.events.lock().unwrap().clone()
    }

    fn patches(&self) -> Vec<serde_json::Value> {
        self.patches.lock().unwrap().clone()
    }

    fn blob(&self, name: &str) -> Option<Vec<u8>> {
        self.blobs.lock().unwrap().get(name).cloned()
    }

    fn blob_count(&self) -> usize {
        self.blobs.lock().unwrap().len()
    }

    fn bearers(&self) -> Vec<Option<String>> {
        self.bearers.lock().unwrap().clone()
    }
}

async fn mock_backend(create_event_404s: usize, presign_500: bool) -> Result<MockBackend> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    let state = BackendState {
        base: format!("http://{addr}"),
        calls: Arc::new(Mutex::new(Vec::new())),
        events: Arc::new(Mutex::new(Vec::new())),
        patches: Arc::new(Mutex::new(Vec::new())),
        blobs: Arc::new(Mutex::new(HashMap::new())),
        bearers: Arc::new(Mutex::new(Vec::new())),
        create_event_404s: Arc::new(AtomicUsize::new(create_event_404s)),
        presign_500,
    };
    let backend = MockBackend {
        addr,
        calls: state.calls.clone(),
        events: state.events.clone(),
        patches: state.patches.clone(),
        blobs: state.blobs.clone(),
        bearers: state.bearers.clone(),
    };

    let app = Router::new()
        .route("/v1/auth/anonymous", post(anonymous_auth))
        .route("/v1/auth/whoami", get(whoami))
        .route("/v1/devices", post(register_device))
        .route("/v1/events", post(create_event))
        .route("/v1/events/:id", patch(patch_event))
        .route("/v1/events/:id/status", get(event_status))
        .route("/v1/uploads/recording", post(presign))
        .route("/blob/:name", put(put_blob))
        .with_state(state);
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    Ok(backend)
}

async fn anonymous_auth(
    State(state): State<BackendState>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Json<serde_json::Value> {
    state.note(format!("auth:{}", body["device_id"].as_str().unwrap_or("?")));
    state.note_bearer(&headers);
    Json(serde_json::json!({"token": "anon-token-9"}))
}

async fn whoami(State(state): State<BackendState>, headers: HeaderMap) -> Json<serde_json::Value> {
    state.note("whoami");
    state.note_bearer(&headers);
    Json(serde_json::json!({"device_id": "device-1"}))
}

async fn event_status(
    State(state): State<BackendState>,
    UrlPath(id): UrlPath<String>,
    headers: HeaderMap,
) -> Json<serde_json::Value> {
    state.note(format!("status:{id}"));
    state.note_bearer(&headers);
    Json(serde_json::json!({"id": id, "status": "processed"}))
}

async fn register_device(
    State(state): State<BackendState>,
    Json(body): Json<serde_json::Value>,
) -> Json<serde_json::Value> {
    state.note(format!(
        "register:{}",
        body["device_id"].as_str().unwrap_or("?")
    ));
    Json(serde_json::json!({"id": "backend-device-1"}))
}

async fn create_event(
    State(state): State<BackendState>,
    Json(body): Json<serde_json::Value>,
) -> (StatusCode, Json<serde_json::Value>) {
    state.note("create_event");
    let reject = state
        .create_event_404s
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if reject {
        return (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "unknown device"})),
        );
    }
    state.events.lock().unwrap().push(body);
    (StatusCode::OK, Json(serde_json::json!({"id": "event-1"})))
}

async fn patch_event(
    State(state): State<BackendState>,
    UrlPath(id): UrlPath<String>,
    Json(body): Json<serde_json::Value>,
) -> Json<serde_json::Value> {
    state.note(format!("patch:{id}"));
    state.patches.lock().unwrap().push(body);
    Json(serde_json::json!({"id": id, "status": "uploaded"}))
}

async fn presign(
    State(state): State<BackendState>,
    Json(body): Json<serde_json::Value>,
) -> (StatusCode, Json<serde_json::Value>) {
    let name = body["file_name"].as_str().unwrap_or("unnamed").to_string();
    state.note(format!("presign:{name}"));
    if state.presign_500 {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"error": "storage down"})),
        );
    }
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "upload_url": format!("{}/blob/{name}", state.base),
            "file_url": format!("https://cdn.test/{name}"),
        })),
    )
}

async fn put_blob(
    State(state): State<BackendState>,
    UrlPath(name): UrlPath<String>,
    body: axum::body::Bytes,
) -> StatusCode {
    state.note(format!("put:{name}"));
    state.blobs.lock().unwrap().insert(name, body.to_vec());
    StatusCode::OK
}

fn client_for(backend: &MockBackend) -> ApiClient {
    let api = ApiClient::new(format!("http://{}", backend.addr));
    api.set_token(Some("token-1".to_string()));
    api
}

#[tokio::test]
async fn pipeline_uploads_screen_and_audio_then_patches() -> Result<()> {
    let backend = mock_backend(0, false).await?;
    let temp = TempDir::new()?;
    let screen = temp.path().join("broadcast.nsv");
    let audio = temp.path().join("broadcast.wav");
    std::fs::write(&screen, b"video-bytes")?;
    std::fs::write(&audio, b"audio-bytes")?;
    let store = SharedStore::open(temp.path().join("container"))?;

    let api = client_for(&backend);
    let item = BroadcastUploadItem::new(screen, Some(audio), 42, "user_stopped", 1_700_000_000);
    let outcome = upload_recording(&api, "device-1", &item, Some(&store)).await?;

    assert_eq!(outcome.event_id, "event-1");
    assert_eq!(outcome.file_url, "https://cdn.test/broadcast.nsv");
    assert_eq!(
        outcome.audio_url.as_deref(),
        Some("https://cdn.test/broadcast.wav")
    );

    assert_eq!(
        backend.calls(),
        vec![
            "register:device-1",
            "create_event",
            "presign:broadcast.nsv",
            "put:broadcast.nsv",
            "presign:broadcast.wav",
            "put:broadcast.wav",
            "patch:event-1",
        ]
    );
    assert_eq!(backend.blob("broadcast.nsv"), Some(b"video-bytes".to_vec()));
    assert_eq!(backend.blob("broadcast.wav"), Some(b"audio-bytes".to_vec()));

    let event = backend.events().remove(0);
    assert_eq!(event["kind"], "recording");
    assert_eq!(event["device_id"], "device-1");
    assert_eq!(event["started_at"], 1_700_000_000 - 42);
    assert_eq!(event["duration_sec"], 42);
    assert_eq!(event["reason"], "user_stopped");

    let patched = backend.patches().remove(0);
    assert_eq!(patched["status"], "uploaded");
    assert_eq!(patched["file_url"], "https://cdn.test/broadcast.nsv");
    assert_eq!(patched["audio_url"], "https://cdn.test/broadcast.wav");
    assert_eq!(patched["duration_sec"], 42);

    // Breadcrumbs land in the shared container.
    assert_eq!(store.last_upload_phase().as_deref(), Some("done"));
    assert_eq!(store.last_event_id().as_deref(), Some("event-1"));
    assert_eq!(store.last_upload_error(), None);
    Ok(())
}

#[tokio::test]
async fn unknown_device_is_reregistered_and_retried_once() -> Result<()> {
    let backend = mock_backend(1, false).await?;
    let temp = TempDir::new()?;
    let screen = temp.path().join("broadcast.nsv");
    std::fs::write(&screen, b"video-bytes")?;

    let api = client_for(&backend);
    let item = BroadcastUploadItem::new(screen, None, 10, "auto_stop", 1_700_000_000);
    let outcome = upload_recording(&api, "device-1", &item, None).await?;

    assert_eq!(outcome.event_id, "event-1");
    assert_eq!(outcome.audio_url, None);
    assert_eq!(
        backend.calls(),
        vec![
            "register:device-1",
            "create_event",
            "register:device-1",
            "create_event",
            "presign:broadcast.nsv",
            "put:broadcast.nsv",
            "patch:event-1",
        ]
    );
    Ok(())
}

#[tokio::test]
async fn presign_failure_aborts_and_records_the_error() -> Result<()> {
    let backend = mock_backend(0, true).await?;
    let temp = TempDir::new()?;
    let screen = temp.path().join("broadcast.nsv");
    std::fs::write(&screen, b"video-bytes")?;
    let store = SharedStore::open(temp.path().join("container"))?;

    let api = client_for(&backend);
    let item = BroadcastUploadItem::new(screen, None, 10, "user_stopped", 1_700_000_000);
    let err = upload_recording(&api, "device-1", &item, Some(&store))
        .await
        .expect_err("presign was down");

    assert!(err.to_string().contains("500"), "got: {err}");
    assert_eq!(backend.blob_count(), 0, "nothing should have been PUT");
    assert!(backend.patches().is_empty(), "the event must not be patched");

    // The attempt stalled at the screen upload and the error was recorded.
    assert_eq!(store.last_upload_phase().as_deref(), Some("upload_screen"));
    assert!(store
        .last_upload_error()
        .expect("error breadcrumb")
        .contains("500"));
    Ok(())
}

#[tokio::test]
async fn voice_recording_patches_its_existing_event() -> Result<()> {
    let backend = mock_backend(0, false).await?;
    let temp = TempDir::new()?;
    let path = temp.path().join("voice-123.wav");
    std::fs::write(&path, b"wav-bytes")?;

    let api = client_for(&backend);
    let recording = VoiceRecording {
        path,
        duration_secs: 2.6,
        sample_count: 41_600,
    };
    let url = upload_voice_recording(&api, "event-7", &recording).await?;

    assert_eq!(url, "https://cdn.test/voice-123.wav");
    assert_eq!(backend.blob("voice-123.wav"), Some(b"wav-bytes".to_vec()));
    assert_eq!(
        backend.calls(),
        vec!["presign:voice-123.wav", "put:voice-123.wav", "patch:event-7"]
    );

    let patched = backend.patches().remove(0);
    assert_eq!(patched["duration_sec"], 3);
    assert_eq!(patched["status"], "uploaded");
    assert!(patched.get("audio_url").is_none());
    Ok(())
}

#[tokio::test]
async fn bearer_token_is_attached_after_anonymous_auth() -> Result<()> {
    let backend = mock_backend(0, false).await?;
    let api = ApiClient::new(format!("http://{}", backend.addr));

    let auth = api.auth_anonymous("device-1").await?;
    assert_eq!(auth.token, "anon-token-9");
    api.set_token(Some(auth.token));

    let who = api.whoami().await?;
    assert_eq!(who.device_id, "device-1");

    let status = api.event_status("event-3").await?;
    assert_eq!(status.id, "event-3");
    assert_eq!(status.status, "processed");

    assert_eq!(backend.calls(), vec!["auth:device-1", "whoami", "status:event-3"]);
    // The auth call itself is unauthenticated; everything after carries the token.
    assert_eq!(
        backend.bearers(),
        vec![
            None,
            Some("Bearer anon-token-9".to_string()),
            Some("Bearer anon-token-9".to_string()),
        ]
    );
    Ok(())
}
