// Broadcast capture session.
//
// One task owns both track writers and consumes frames until a stop arrives
// from the user, the source, or the auto-stop timer. Finalize is raced
// against a watchdog so a wedged writer can never hold the handoff hostage;
// promotion then moves whatever hit disk into the shared container and the
// host takes it from there.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::writer::{AudioTrackWriter, VideoTrackWriter};
use crate::api::{upload_recording, ApiClient};
use crate::audio::{AudioSource, FrameSource};
use crate::handoff::{BroadcastStatus, BroadcastUploadItem, SharedStore};

#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Shared container the host polls for finished recordings
    pub container_dir: PathBuf,
    /// Scratch space for in-progress tracks
    pub work_dir: PathBuf,
    pub api_base_url: String,
    /// Hard cap on capture length
    pub auto_stop: Duration,
    /// How long finalize may run before promotion proceeds without it
    pub finalize_watchdog: Duration,
}

#[derive(Debug)]
pub enum CaptureCommand {
    Pause,
    Resume,
    Finish { reason: String },
}

#[derive(Debug)]
pub struct CaptureOutcome {
    /// The queued recording; `None` when the video track could not be
    /// promoted and the capture was dropped.
    pub item: Option<BroadcastUploadItem>,
    pub uploaded: bool,
    pub reason: String,
}

pub struct CaptureSession {
    config: CaptureConfig,
    store: SharedStore,
}

impl CaptureSession {
    pub fn new(config: CaptureConfig, store: SharedStore) -> Self {
        Self { config, store }
    }

    /// Run one capture from first frame to handoff.
    pub async fn run(
        self,
        mut video: Box<dyn FrameSource>,
        mut audio: Box<dyn AudioSource>,
        mut commands: mpsc::Receiver<CaptureCommand>,
    ) -> Result<CaptureOutcome> {
        tokio::fs::create_dir_all(&self.config.work_dir)
            .await
            .context("Failed to create capture work directory")?;

        let stamp = chrono::Utc::now().format("%Y%m%d-%H%M%S");
        let screen_path = self.config.work_dir.join(format!("broadcast-{stamp}.nsv"));
        let audio_path = self.config.work_dir.join(format!("broadcast-{stamp}.wav"));
        let mut video_writer = VideoTrackWriter::new(&screen_path);
        let mut audio_writer = AudioTrackWriter::new(&audio_path);

        let mut video_rx = video.start().await.context("Failed to start frame source")?;
        let mut audio_rx = audio.start().await.context("Failed to start audio source")?;

        let started = tokio::time::Instant::now();
        self.store.set_started_at(chrono::Utc::now().timestamp())?;
        self.store.set_status(BroadcastStatus::Recording)?;
        info!(
            "Broadcast capture started ({} + {})",
            video.name(),
            audio.name()
        );

        let auto_stop_at = started + self.config.auto_stop;
        let mut paused = false;
        let mut video_failed = false;
        let mut audio_failed = false;

        let reason = loop {
            tokio::select! {
                frame = video_rx.recv() => match frame {
                    Some(frame) => {
                        if !paused && !video_failed {
                            if let Err(e) = video_writer.write(&frame) {
                                warn!("Video writer failed, capture continues without video: {:#}", e);
                                let _ = self.store.record_upload_error(&format!("video writer: {e:#}"));
                                let _ = self.store.set_status(BroadcastStatus::WriterFailed);
                                video_failed = true;
                            }
                        }
                    }
                    None => break "source_ended".to_string(),
                },
                block = audio_rx.recv() => match block {
                    Some(block) => {
                        if !paused && !audio_failed {
                            if let Err(e) = audio_writer.write(&block) {
                                warn!("Audio writer failed, capture continues without audio: {:#}", e);
                                let _ = self.store.record_upload_error(&format!("audio writer: {e:#}"));
                                audio_failed = true;
                            }
                        }
                    }
                    None => break "source_ended".to_string(),
                },
                command = commands.recv() => match command {
                    Some(CaptureCommand::Pause) => {
                        if !paused {
                            paused = true;
                            let _ = self.store.set_status(BroadcastStatus::Paused);
                            info!("Broadcast capture paused");
                        }
                    }
                    Some(CaptureCommand::Resume) => {
                        if paused {
                            paused = false;
                            let status = if video_failed {
                                BroadcastStatus::WriterFailed
                            } else {
                                BroadcastStatus::Recording
                            };
                            let _ = self.store.set_status(status);
                            info!("Broadcast capture resumed");
                        }
                    }
                    Some(CaptureCommand::Finish { reason }) => break reason,
                    None => break "user_stopped".to_string(),
                },
                _ = tokio::time::sleep_until(auto_stop_at) => {
                    let _ = self.store.set_status(BroadcastStatus::AutoStopping);
                    info!("Capture length cap reached, stopping");
                    break "auto_stop".to_string();
                }
            }
        };

        if let Err(e) = video.stop().await {
            warn!("Failed to stop frame source: {:#}", e);
        }
        if let Err(e) = audio.stop().await {
            warn!("Failed to stop audio source: {:#}", e);
        }
        drop(video_rx);
        drop(audio_rx);

        self.store.set_stopped_at(chrono::Utc::now().timestamp())?;
        let duration_sec = started.elapsed().as_secs();
        info!("Capture stopping after {}s ({})", duration_sec, reason);

        let finalize = tokio::task::spawn_blocking(move || {
            (video_writer.finalize(), audio_writer.finalize())
        });
        match finalize_with_watchdog(finalize, self.config.finalize_watchdog).await {
            Some(Ok((video_result, audio_result))) => {
                if let Err(e) = video_result {
                    warn!("Video finalize failed: {:#}", e);
                }
                if let Err(e) = audio_result {
                    warn!("Audio finalize failed: {:#}", e);
                }
            }
            Some(Err(e)) => warn!("Finalize task panicked: {}", e),
            None => warn!(
                "Finalize watchdog fired after {:?}, promoting what already hit disk",
                self.config.finalize_watchdog
            ),
        }

        let ended_at = chrono::Utc::now().timestamp();
        self.promote_and_enqueue(&screen_path, &audio_path, duration_sec, &reason, ended_at)
            .await
    }

    /// Move finished tracks into the shared container and queue the upload.
    /// The video track is mandatory: without it nothing is enqueued.
    async fn promote_and_enqueue(
        &self,
        screen_path: &Path,
        audio_path: &Path,
        duration_sec: u64,
        reason: &str,
        ended_at: i64,
    ) -> Result<CaptureOutcome> {
        tokio::fs::create_dir_all(&self.config.container_dir)
            .await
            .context("Failed to create shared container directory")?;

        let promoted_screen = match promote_file(screen_path, &self.config.container_dir).await {
            Ok(Some(path)) => path,
            Ok(None) => {
                warn!("No video track to promote, dropping this capture");
                let _ = self.store.set_status(BroadcastStatus::PendingUpload);
                return Ok(CaptureOutcome {
                    item: None,
                    uploaded: false,
                    reason: reason.to_string(),
                });
            }
            Err(e) => {
                warn!("Failed to promote video track, recording lost: {:#}", e);
                let _ = self.store.record_upload_error(&format!("promote: {e:#}"));
                let _ = self.store.set_status(BroadcastStatus::PendingUpload);
                return Ok(CaptureOutcome {
                    item: None,
                    uploaded: false,
                    reason: reason.to_string(),
                });
            }
        };

        let promoted_audio = match promote_file(audio_path, &self.config.container_dir).await {
            Ok(path) => path,
            Err(e) => {
                warn!("Failed to promote audio track, continuing without audio: {:#}", e);
                None
            }
        };

        let item = BroadcastUploadItem::new(
            promoted_screen,
            promoted_audio,
            duration_sec,
            reason,
            ended_at,
        );
        self.store.append_pending_upload(&item)?;
        let _ = self.store.set_status(BroadcastStatus::Finished);
        info!("Capture queued for upload: {}", item.id);

        let uploaded = self.try_immediate_upload(&item).await;
        Ok(CaptureOutcome {
            item: Some(item),
            uploaded,
            reason: reason.to_string(),
        })
    }

    /// Upload in-process when shared credentials exist. Any failure leaves
    /// the item queued for the host; there is no retry here.
    async fn try_immediate_upload(&self, item: &BroadcastUploadItem) -> bool {
        let Some(creds) = self.store.credentials() else {
            info!("No shared credentials, open the app to upload this recording");
            let _ = self.store.set_status(BroadcastStatus::PendingUpload);
            return false;
        };

        let _ = self.store.set_status(BroadcastStatus::Uploading);
        let api = ApiClient::new(self.config.api_base_url.clone());
        api.set_token(Some(creds.token.clone()));

        match upload_recording(&api, &creds.device_id, item, Some(&self.store)).await {
            Ok(outcome) => {
                if let Err(e) = self.store.remove_pending_upload(item.id) {
                    warn!("Uploaded but failed to dequeue {}: {:#}", item.id, e);
                }
                remove_quietly(&item.screen_path).await;
                if let Some(audio) = &item.audio_path {
                    remove_quietly(audio).await;
                }
                let _ = self.store.set_status(BroadcastStatus::Uploaded);
                info!("Recording uploaded in-process: event {}", outcome.event_id);
                true
            }
            Err(e) => {
                warn!("In-process upload failed, leaving queued for the app: {}", e);
                let _ = self.store.set_status(BroadcastStatus::PendingUpload);
                false
            }
        }
    }
}

/// Race `finalize` against the watchdog. `None` when the watchdog wins.
async fn finalize_with_watchdog<F: Future>(finalize: F, watchdog: Duration) -> Option<F::Output> {
    tokio::select! {
        output = finalize => Some(output),
        _ = tokio::time::sleep(watchdog) => None,
    }
}

/// Move `path` into `dir`, falling back to copy when rename crosses
/// filesystems. `Ok(None)` when the source never materialized or is empty.
async fn promote_file(path: &Path, dir: &Path) -> Result<Option<PathBuf>> {
    let Ok(meta) = tokio::fs::metadata(path).await else {
        return Ok(None);
    };
    if meta.len() == 0 {
        return Ok(None);
    }

    let file_name = path.file_name().context("Track path has no file name")?;
    let target = dir.join(file_name);
    if tokio::fs::rename(path, &target).await.is_err() {
        tokio::fs::copy(path, &target)
            .await
            .with_context(|| format!("Failed to copy {} into container", path.display()))?;
        let _ = tokio::fs::remove_file(path).await;
    }
    Ok(Some(target))
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!("Failed to remove {}: {}", path.display(), e);
    }
}
