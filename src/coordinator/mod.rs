//! Host-side recording coordinator.
//!
//! Polls the shared container on a fixed interval, maps the capture process
//! status onto a banner for the control surface, and consumes the pending
//! upload queue. The capture process is never trusted to be alive: every
//! decision is made from what the poll observes, and anything left over from
//! a previous session is consumed once and then discarded.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::api::{upload_recording, ApiClient, ApiError, UploadOutcome};
use crate::handoff::{BroadcastStatus, BroadcastUploadItem, Credentials, SharedStore};

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub poll_interval: Duration,
    /// `uploading` with no observable progress for this long is force-cleared
    pub stale_upload_window: Duration,
    /// How long the success banner stays up
    pub banner_clear_delay: Duration,
    /// Host-private state (the foreground cutoff survives restarts here)
    pub data_dir: PathBuf,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(700),
            stale_upload_window: Duration::from_secs(45),
            banner_clear_delay: Duration::from_secs(4),
            data_dir: PathBuf::from("."),
        }
    }
}

/// What the control surface should show for the broadcast pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Banner {
    /// A capture is running
    Active,
    /// A recording is being finalized or uploaded
    Processing,
    /// Upload landed
    Success,
    /// Something needs another attempt
    Retry,
}

#[derive(Debug, Serialize, Deserialize)]
struct HostState {
    last_active_at: i64,
}

#[derive(Debug)]
enum Internal {
    UploadFinished {
        item: BroadcastUploadItem,
        result: Result<UploadOutcome, ApiError>,
    },
}

pub struct Coordinator {
    config: CoordinatorConfig,
    store: SharedStore,
    api: Arc<ApiClient>,
    banner_tx: watch::Sender<Option<Banner>>,
    current_banner: Option<Banner>,
    banner_clear_at: Option<Instant>,
    /// When `uploading` was first observed and the progress stamp seen then.
    uploading_observed: Option<(Instant, Option<i64>)>,
    /// Items with `ended_at` before this are stale leftovers.
    cutoff: i64,
    internal_tx: mpsc::Sender<Internal>,
    internal_rx: mpsc::Receiver<Internal>,
}

impl Coordinator {
    pub fn new(
        config: CoordinatorConfig,
        store: SharedStore,
        api: Arc<ApiClient>,
    ) -> (Self, watch::Receiver<Option<Banner>>) {
        let (banner_tx, banner_rx) = watch::channel(None);
        let (internal_tx, internal_rx) = mpsc::channel(16);
        let coordinator = Self {
            config,
            store,
            api,
            banner_tx,
            current_banner: None,
            banner_clear_at: None,
            uploading_observed: None,
            cutoff: 0,
            internal_tx,
            internal_rx,
        };
        (coordinator, banner_rx)
    }

    /// Poll until the task is dropped.
    pub async fn run(mut self) {
        self.activate();
        let mut poll = tokio::time::interval(self.config.poll_interval);
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = poll.tick() => self.poll(),
                internal = self.internal_rx.recv() => {
                    if let Some(internal) = internal {
                        self.handle_internal(internal);
                    }
                }
            }
        }
    }

    /// Startup pass: consume valid leftovers once against the previous
    /// session's cutoff, then clear whatever remains. Belated capture state
    /// is not trusted across sessions.
    fn activate(&mut self) {
        let previous_cutoff = self.load_cutoff();
        let session_start = chrono::Utc::now().timestamp();

        let leftovers = self.store.pending_uploads();
        if !leftovers.is_empty() {
            info!(
                "Found {} queued recording(s) from a previous session",
                leftovers.len()
            );
        }
        let creds = self.store.credentials();
        for item in leftovers {
            let _ = self.store.remove_pending_upload(item.id);
            if !self.validate(&item, previous_cutoff) {
                debug!("Dropping stale leftover {}", item.id);
                continue;
            }
            match &creds {
                Some(creds) => self.dispatch(item, creds.clone()),
                None => debug!("Leftover {} valid but no credentials, dropping", item.id),
            }
        }
        self.store.clear_pending_uploads();
        self.store.clear_status();

        self.cutoff = session_start;
        self.save_cutoff(session_start);
        info!("Recording coordinator active");
    }

    fn poll(&mut self) {
        self.poll_status();
        self.consume_queue();
        self.expire_banner();
    }

    fn poll_status(&mut self) {
        match self.store.status() {
            Some(BroadcastStatus::Recording) | Some(BroadcastStatus::Paused) => {
                self.uploading_observed = None;
                self.set_banner(Some(Banner::Active));
            }
            Some(BroadcastStatus::AutoStopping) | Some(BroadcastStatus::Finished) => {
                self.uploading_observed = None;
                self.set_banner(Some(Banner::Processing));
            }
            Some(BroadcastStatus::Uploading) => self.watch_stale_upload(),
            Some(BroadcastStatus::Uploaded) => {
                self.uploading_observed = None;
                // Terminal: consume the status so success shows exactly once.
                self.store.clear_status();
                self.set_banner(Some(Banner::Success));
                self.banner_clear_at = Some(Instant::now() + self.config.banner_clear_delay);
            }
            Some(BroadcastStatus::PendingUpload) | Some(BroadcastStatus::WriterFailed) => {
                self.uploading_observed = None;
                self.set_banner(Some(Banner::Retry));
            }
            None => self.uploading_observed = None,
        }
    }

    /// The capture process may be suspended mid-upload and never write again.
    /// When `uploading` sits still past the window, clear it and move on.
    fn watch_stale_upload(&mut self) {
        self.set_banner(Some(Banner::Processing));
        let progress = self.store.last_upload_updated_at();
        match self.uploading_observed {
            Some((since, seen)) if seen == progress => {
                if since.elapsed() >= self.config.stale_upload_window {
                    warn!(
                        "Upload status stale for {:?}, force-clearing",
                        self.config.stale_upload_window
                    );
                    self.store.clear_status();
                    self.uploading_observed = None;
                }
            }
            _ => self.uploading_observed = Some((Instant::now(), progress)),
        }
    }

    fn consume_queue(&mut self) {
        let queue = self.store.pending_uploads();
        if queue.is_empty() {
            return;
        }
        let creds = self.store.credentials();

        for item in queue {
            if !self.validate(&item, self.cutoff) {
                debug!("Dropping invalid queue entry {}", item.id);
                let _ = self.store.remove_pending_upload(item.id);
                continue;
            }
            let Some(creds) = &creds else {
                // Valid but not uploadable until the app has authenticated.
                continue;
            };
            let _ = self.store.remove_pending_upload(item.id);
            self.dispatch(item, creds.clone());
        }
    }

    /// Screen file present and non-empty, and not from before the cutoff.
    fn validate(&self, item: &BroadcastUploadItem, cutoff: i64) -> bool {
        if item.ended_at < cutoff {
            return false;
        }
        matches!(std::fs::metadata(&item.screen_path), Ok(meta) if meta.len() > 0)
    }

    fn dispatch(&mut self, item: BroadcastUploadItem, creds: Credentials) {
        info!("Dispatching recording {} for upload", item.id);
        self.set_banner(Some(Banner::Processing));
        let Credentials { device_id, token } = creds;
        self.api.set_token(Some(token));

        let api = self.api.clone();
        let store = self.store.clone();
        let internal = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = upload_recording(&api, &device_id, &item, Some(&store)).await;
            let _ = internal.send(Internal::UploadFinished { item, result }).await;
        });
    }

    fn handle_internal(&mut self, internal: Internal) {
        match internal {
            Internal::UploadFinished { item, result } => match result {
                Ok(outcome) => {
                    info!("Recording uploaded: event {}", outcome.event_id);
                    remove_quietly(&item.screen_path);
                    if let Some(audio) = &item.audio_path {
                        remove_quietly(audio);
                    }
                    self.set_banner(Some(Banner::Success));
                    self.banner_clear_at = Some(Instant::now() + self.config.banner_clear_delay);
                }
                Err(e) => {
                    warn!("Host upload failed, re-queueing {}: {}", item.id, e);
                    if let Err(e) = self.store.append_pending_upload(&item) {
                        warn!("Failed to re-queue {}: {:#}", item.id, e);
                    }
                    self.set_banner(Some(Banner::Retry));
                }
            },
        }
    }

    fn expire_banner(&mut self) {
        let Some(clear_at) = self.banner_clear_at else {
            return;
        };
        if Instant::now() >= clear_at {
            self.banner_clear_at = None;
            if self.current_banner == Some(Banner::Success) {
                self.set_banner(None);
            }
        }
    }

    fn set_banner(&mut self, banner: Option<Banner>) {
        if self.current_banner == banner {
            return;
        }
        debug!("Banner {:?} -> {:?}", self.current_banner, banner);
        if banner != Some(Banner::Success) {
            self.banner_clear_at = None;
        }
        self.current_banner = banner;
        let _ = self.banner_tx.send(banner);
    }

    fn state_path(&self) -> PathBuf {
        self.config.data_dir.join("coordinator.json")
    }

    fn load_cutoff(&self) -> i64 {
        let Ok(bytes) = std::fs::read(self.state_path()) else {
            return 0;
        };
        serde_json::from_slice::<HostState>(&bytes)
            .map(|state| state.last_active_at)
            .unwrap_or(0)
    }

    fn save_cutoff(&self, last_active_at: i64) {
        if let Err(e) = std::fs::create_dir_all(&self.config.data_dir) {
            warn!("Failed to create data directory: {}", e);
            return;
        }
        let state = HostState { last_active_at };
        match serde_json::to_vec(&state) {
            Ok(bytes) => {
                if let Err(e) = std::fs::write(self.state_path(), bytes) {
                    warn!("Failed to persist coordinator state: {}", e);
                }
            }
            Err(e) => warn!("Failed to encode coordinator state: {}", e),
        }
    }
}

fn remove_quietly(path: &std::path::Path) {
    if let Err(e) = std::fs::remove_file(path) {
        warn!("Failed to remove {}: {}", path.display(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn coordinator(dir: &TempDir) -> (Coordinator, watch::Receiver<Option<Banner>>) {
        let store = SharedStore::open(dir.path().join("container")).unwrap();
        let api = Arc::new(ApiClient::new("http://127.0.0.1:9"));
        let config = CoordinatorConfig {
            data_dir: dir.path().join("data"),
            ..CoordinatorConfig::default()
        };
        Coordinator::new(config, store, api)
    }

    fn queued_item(dir: &TempDir, name: &str, ended_at: i64, bytes: &[u8]) -> BroadcastUploadItem {
        let path = dir.path().join(name);
        std::fs::write(&path, bytes).unwrap();
        BroadcastUploadItem::new(path, None, 5, "user_stopped", ended_at)
    }

    #[tokio::test(start_paused = true)]
    async fn activation_clears_leftover_state() {
        let dir = TempDir::new().unwrap();
        let (mut coordinator, _banner) = coordinator(&dir);
        let store = coordinator.store.clone();

        store.set_status(BroadcastStatus::Recording).unwrap();
        let stale = queued_item(&dir, "old.nsv", 0, b"bytes");
        store.append_pending_upload(&stale).unwrap();

        coordinator.activate();

        assert!(store.status().is_none());
        assert!(store.pending_uploads().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn statuses_map_to_banners() {
        let dir = TempDir::new().unwrap();
        let (mut coordinator, banner) = coordinator(&dir);
        let store = coordinator.store.clone();
        coordinator.activate();

        store.set_status(BroadcastStatus::Recording).unwrap();
        coordinator.poll();
        assert_eq!(*banner.borrow(), Some(Banner::Active));

        store.set_status(BroadcastStatus::Finished).unwrap();
        coordinator.poll();
        assert_eq!(*banner.borrow(), Some(Banner::Processing));

        store.set_status(BroadcastStatus::PendingUpload).unwrap();
        coordinator.poll();
        assert_eq!(*banner.borrow(), Some(Banner::Retry));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_uploading_is_force_cleared() {
        let dir = TempDir::new().unwrap();
        let (mut coordinator, banner) = coordinator(&dir);
        let store = coordinator.store.clone();
        coordinator.activate();

        store.set_status(BroadcastStatus::Uploading).unwrap();
        coordinator.poll();
        assert_eq!(*banner.borrow(), Some(Banner::Processing));
        assert_eq!(store.status(), Some(BroadcastStatus::Uploading));

        tokio::time::advance(Duration::from_secs(46)).await;
        coordinator.poll();

        assert!(store.status().is_none());
        assert_eq!(*banner.borrow(), Some(Banner::Processing));
    }

    #[tokio::test(start_paused = true)]
    async fn upload_progress_resets_the_stale_window() {
        let dir = TempDir::new().unwrap();
        let (mut coordinator, _banner) = coordinator(&dir);
        let store = coordinator.store.clone();
        coordinator.activate();

        store.set_status(BroadcastStatus::Uploading).unwrap();
        coordinator.poll();

        tokio::time::advance(Duration::from_secs(30)).await;
        store.record_upload_phase("upload_screen").unwrap();
        coordinator.poll();

        // 30s later the original window would have expired, but progress
        // restarted it.
        tokio::time::advance(Duration::from_secs(30)).await;
        coordinator.poll();
        assert_eq!(store.status(), Some(BroadcastStatus::Uploading));

        tokio::time::advance(Duration::from_secs(46)).await;
        coordinator.poll();
        assert!(store.status().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn items_before_the_cutoff_are_never_dispatched() {
        let dir = TempDir::new().unwrap();
        let (mut coordinator, _banner) = coordinator(&dir);
        let store = coordinator.store.clone();
        coordinator.activate();

        let now = chrono::Utc::now().timestamp();
        let old = queued_item(&dir, "old.nsv", coordinator.cutoff - 100, b"bytes");
        let fresh = queued_item(&dir, "fresh.nsv", now + 100, b"bytes");
        store.append_pending_upload(&old).unwrap();
        store.append_pending_upload(&fresh).unwrap();

        coordinator.poll();

        // The old item is dropped; the fresh one waits for credentials.
        let remaining = store.pending_uploads();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, fresh.id);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_screen_file_drops_the_item() {
        let dir = TempDir::new().unwrap();
        let (mut coordinator, _banner) = coordinator(&dir);
        let store = coordinator.store.clone();
        coordinator.activate();

        let now = chrono::Utc::now().timestamp();
        let ghost = BroadcastUploadItem::new(
            dir.path().join("never-written.nsv"),
            None,
            5,
            "user_stopped",
            now + 100,
        );
        let empty = queued_item(&dir, "empty.nsv", now + 100, b"");
        store.append_pending_upload(&ghost).unwrap();
        store.append_pending_upload(&empty).unwrap();

        coordinator.poll();
        assert!(store.pending_uploads().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn success_banner_auto_clears() {
        let dir = TempDir::new().unwrap();
        let (mut coordinator, banner) = coordinator(&dir);
        let store = coordinator.store.clone();
        coordinator.activate();

        store.set_status(BroadcastStatus::Uploaded).unwrap();
        coordinator.poll();
        assert_eq!(*banner.borrow(), Some(Banner::Success));
        // Status was consumed so success cannot re-trigger.
        assert!(store.status().is_none());

        tokio::time::advance(Duration::from_secs(5)).await;
        coordinator.poll();
        assert_eq!(*banner.borrow(), None);
    }
}
