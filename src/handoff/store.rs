use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

use super::types::{keys, BroadcastStatus, BroadcastUploadItem, Credentials};

/// File-per-key store over the shared container directory.
///
/// This is the only channel between the host and the capture process: two
/// separate OS processes, no lock, no cross-key transaction. Each write
/// replaces one key atomically (temp file + rename), so a reader sees either
/// the old or the new value, never a torn one. The pending-upload queue is
/// append-only on the producer side and remove-after-validate on the consumer
/// side, which keeps re-polls idempotent.
#[derive(Debug, Clone)]
pub struct SharedStore {
    root: PathBuf,
}

impl SharedStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create shared container at {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    fn read<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let path = self.key_path(key);
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(_) => return None,
        };
        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Ignoring corrupt container value {}: {}", key, e);
                None
            }
        }
    }

    fn write<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let path = self.key_path(key);
        let tmp = self.root.join(format!("{key}.tmp"));
        let bytes = serde_json::to_vec(value)?;
        fs::write(&tmp, bytes)
            .with_context(|| format!("Failed to stage container value {key}"))?;
        fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to commit container value {key}"))?;
        Ok(())
    }

    fn remove(&self, key: &str) {
        let path = self.key_path(key);
        if let Err(e) = fs::remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove container value {}: {}", key, e);
            }
        }
    }

    // --- broadcast status -------------------------------------------------

    pub fn status(&self) -> Option<BroadcastStatus> {
        self.read(keys::STATUS)
    }

    pub fn set_status(&self, status: BroadcastStatus) -> Result<()> {
        debug!("Container status -> {}", status.as_str());
        self.write(keys::STATUS, &status)
    }

    pub fn clear_status(&self) {
        self.remove(keys::STATUS);
    }

    pub fn started_at(&self) -> Option<i64> {
        self.read(keys::STARTED_AT)
    }

    pub fn set_started_at(&self, epoch_secs: i64) -> Result<()> {
        self.write(keys::STARTED_AT, &epoch_secs)
    }

    pub fn stopped_at(&self) -> Option<i64> {
        self.read(keys::STOPPED_AT)
    }

    pub fn set_stopped_at(&self, epoch_secs: i64) -> Result<()> {
        self.write(keys::STOPPED_AT, &epoch_secs)
    }

    // --- pending upload queue --------------------------------------------

    pub fn pending_uploads(&self) -> Vec<BroadcastUploadItem> {
        self.read(keys::PENDING_UPLOADS).unwrap_or_default()
    }

    /// Append an item unless its id is already queued.
    pub fn append_pending_upload(&self, item: &BroadcastUploadItem) -> Result<()> {
        let mut items = self.pending_uploads();
        if items.iter().any(|existing| existing.id == item.id) {
            debug!("Upload item {} already queued, skipping append", item.id);
            return Ok(());
        }
        items.push(item.clone());
        self.write(keys::PENDING_UPLOADS, &items)
    }

    /// Remove an item by id. Missing ids are fine (already consumed).
    pub fn remove_pending_upload(&self, id: Uuid) -> Result<()> {
        let mut items = self.pending_uploads();
        let before = items.len();
        items.retain(|item| item.id != id);
        if items.len() == before {
            return Ok(());
        }
        self.write(keys::PENDING_UPLOADS, &items)
    }

    pub fn clear_pending_uploads(&self) {
        self.remove(keys::PENDING_UPLOADS);
    }

    // --- upload breadcrumbs ----------------------------------------------

    pub fn last_event_id(&self) -> Option<String> {
        self.read(keys::LAST_EVENT_ID)
    }

    pub fn set_last_event_id(&self, event_id: &str) -> Result<()> {
        self.write(keys::LAST_EVENT_ID, &event_id)
    }

    /// Record the current upload phase and bump the freshness timestamp the
    /// host uses to spot a stalled upload.
    pub fn record_upload_phase(&self, phase: &str) -> Result<()> {
        self.write(keys::LAST_UPLOAD_PHASE, &phase)?;
        self.write(keys::LAST_UPLOAD_UPDATED_AT, &chrono::Utc::now().timestamp())
    }

    pub fn record_upload_error(&self, error: &str) -> Result<()> {
        self.write(keys::LAST_UPLOAD_ERROR, &error)?;
        self.write(keys::LAST_UPLOAD_UPDATED_AT, &chrono::Utc::now().timestamp())
    }

    pub fn last_upload_phase(&self) -> Option<String> {
        self.read(keys::LAST_UPLOAD_PHASE)
    }

    pub fn last_upload_error(&self) -> Option<String> {
        self.read(keys::LAST_UPLOAD_ERROR)
    }

    pub fn last_upload_updated_at(&self) -> Option<i64> {
        self.read(keys::LAST_UPLOAD_UPDATED_AT)
    }

    // --- shared credentials ----------------------------------------------

    pub fn credentials(&self) -> Option<Credentials> {
        let device_id: String = self.read(keys::DEVICE_ID)?;
        let token: String = self.read(keys::AUTH_TOKEN)?;
        Some(Credentials { device_id, token })
    }

    pub fn set_credentials(&self, creds: &Credentials) -> Result<()> {
        self.write(keys::DEVICE_ID, &creds.device_id)?;
        self.write(keys::AUTH_TOKEN, &creds.token)
    }

    pub fn clear_credentials(&self) {
        self.remove(keys::DEVICE_ID);
        self.remove(keys::AUTH_TOKEN);
    }
}
