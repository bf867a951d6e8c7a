use anyhow::{bail, Context, Result};
use hound::WavReader;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use super::frame::{AudioFormat, AudioFrame, VideoFrame};

/// Microphone-style audio source
///
/// Platform capture plugs in behind this trait; the bundled implementations
/// stream from a WAV file or synthesize silence, which is enough for the
/// daemon to run headless and for tests to drive the full pipeline.
#[async_trait::async_trait]
pub trait AudioSource: Send + Sync {
    /// Start capturing audio
    ///
    /// Returns a channel receiver that will receive audio frames
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>>;

    /// Stop capturing audio
    async fn stop(&mut self) -> Result<()>;

    /// Check if source is currently capturing
    fn is_capturing(&self) -> bool;

    /// Get source name for logging
    fn name(&self) -> &str;
}

/// Screen-style video frame source, same shape as [`AudioSource`].
#[async_trait::async_trait]
pub trait FrameSource: Send + Sync {
    async fn start(&mut self) -> Result<mpsc::Receiver<VideoFrame>>;

    async fn stop(&mut self) -> Result<()>;

    fn name(&self) -> &str;
}

/// Streams a WAV file as paced, real-time-sized blocks.
pub struct WavFileSource {
    path: PathBuf,
    block_ms: u64,
    capturing: bool,
    task: Option<JoinHandle<()>>,
}

impl WavFileSource {
    pub fn new(path: impl AsRef<Path>, block_ms: u64) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            block_ms: block_ms.max(10),
            capturing: false,
            task: None,
        }
    }
}

#[async_trait::async_trait]
impl AudioSource for WavFileSource {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        if self.capturing {
            bail!("Already capturing");
        }

        let reader = WavReader::open(&self.path)
            .with_context(|| format!("Failed to open WAV file: {}", self.path.display()))?;
        let spec = reader.spec();
        let samples: Vec<i16> = reader
            .into_samples::<i16>()
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to read audio samples")?;

        info!(
            "WAV source loaded: {} ({}Hz, {} channels, {} samples)",
            self.path.display(),
            spec.sample_rate,
            spec.channels,
            samples.len()
        );

        let block_ms = self.block_ms;
        let block_len =
            (spec.sample_rate as u64 * spec.channels as u64 * block_ms / 1000).max(1) as usize;
        let (tx, rx) = mpsc::channel(100);

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(block_ms));
            let mut timestamp_ms = 0u64;
            for block in samples.chunks(block_len) {
                interval.tick().await;
                let frame = AudioFrame {
                    samples: block.to_vec(),
                    sample_rate: spec.sample_rate,
                    channels: spec.channels,
                    timestamp_ms,
                };
                if tx.send(frame).await.is_err() {
                    break;
                }
                timestamp_ms += block_ms;
            }
        });

        self.task = Some(task);
        self.capturing = true;
        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.capturing = false;
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing
    }

    fn name(&self) -> &str {
        "wav-file"
    }
}

/// Emits zeroed blocks in a fixed format until stopped. Demo stand-in for a
/// live microphone.
pub struct SilenceSource {
    format: AudioFormat,
    block_ms: u64,
    capturing: bool,
    task: Option<JoinHandle<()>>,
}

impl SilenceSource {
    pub fn new(format: AudioFormat, block_ms: u64) -> Self {
        Self {
            format,
            block_ms: block_ms.max(10),
            capturing: false,
            task: None,
        }
    }
}

#[async_trait::async_trait]
impl AudioSource for SilenceSource {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        if self.capturing {
            bail!("Already capturing");
        }

        let format = self.format;
        let block_ms = self.block_ms;
        let block_len =
            (format.sample_rate as u64 * format.channels as u64 * block_ms / 1000).max(1) as usize;
        let (tx, rx) = mpsc::channel(100);

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(block_ms));
            let mut timestamp_ms = 0u64;
            loop {
                interval.tick().await;
                let frame = AudioFrame {
                    samples: vec![0; block_len],
                    sample_rate: format.sample_rate,
                    channels: format.channels,
                    timestamp_ms,
                };
                if tx.send(frame).await.is_err() {
                    break;
                }
                timestamp_ms += block_ms;
            }
        });

        self.task = Some(task);
        self.capturing = true;
        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.capturing = false;
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing
    }

    fn name(&self) -> &str {
        "silence"
    }
}

/// Generates deterministic encoded frames at a fixed rate and size. Demo
/// stand-in for a live screen feed.
pub struct SyntheticFrameSource {
    width: u32,
    height: u32,
    fps: u32,
    task: Option<JoinHandle<()>>,
}

impl SyntheticFrameSource {
    pub fn new(width: u32, height: u32, fps: u32) -> Self {
        Self {
            width,
            height,
            fps: fps.clamp(1, 60),
            task: None,
        }
    }
}

#[async_trait::async_trait]
impl FrameSource for SyntheticFrameSource {
    async fn start(&mut self) -> Result<mpsc::Receiver<VideoFrame>> {
        if self.task.is_some() {
            bail!("Already capturing");
        }

        let (width, height) = (self.width, self.height);
        let frame_ms = 1000 / self.fps as u64;
        let (tx, rx) = mpsc::channel(100);

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(frame_ms.max(1)));
            let mut index = 0u64;
            loop {
                interval.tick().await;
                let frame = VideoFrame {
                    payload: vec![(index & 0xFF) as u8; 1024],
                    width,
                    height,
                    timestamp_ms: index * frame_ms,
                };
                if tx.send(frame).await.is_err() {
                    break;
                }
                index += 1;
            }
        });

        self.task = Some(task);
        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "synthetic-frames"
    }
}
