// Track writers for the broadcast capture process.
//
// Both writers are lazy: nothing touches disk until the first frame arrives,
// so an aborted capture leaves no empty files behind. The video container is
// a length-prefixed frame log with a fixed header, headless counterpart of a
// movie mux.

use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::audio::{AudioFrame, VideoFrame};

const VIDEO_MAGIC: &[u8; 4] = b"NSTV";
const VIDEO_VERSION: u16 = 1;
/// Byte offset of the frame-count field patched at finalize time.
const FRAME_COUNT_OFFSET: u64 = 14;

#[derive(Debug, Clone)]
pub struct VideoTrack {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub frames: u64,
    pub duration_ms: u64,
}

/// Appends encoded frames to a frame log. The header is written from the
/// first frame, with dimensions rounded down to even values.
pub struct VideoTrackWriter {
    path: PathBuf,
    file: Option<BufWriter<File>>,
    width: u32,
    height: u32,
    frames: u64,
    first_timestamp_ms: Option<u64>,
    last_timestamp_ms: u64,
}

impl VideoTrackWriter {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            file: None,
            width: 0,
            height: 0,
            frames: 0,
            first_timestamp_ms: None,
            last_timestamp_ms: 0,
        }
    }

    pub fn write(&mut self, frame: &VideoFrame) -> Result<()> {
        if self.file.is_none() {
            self.start(frame)?;
        }
        let first = *self.first_timestamp_ms.get_or_insert(frame.timestamp_ms);
        let timestamp = frame.timestamp_ms.saturating_sub(first);

        let file = self
            .file
            .as_mut()
            .context("Video writer has no open file")?;
        file.write_all(&(frame.payload.len() as u32).to_le_bytes())?;
        file.write_all(&timestamp.to_le_bytes())?;
        file.write_all(&frame.payload)?;

        self.frames += 1;
        self.last_timestamp_ms = timestamp;
        Ok(())
    }

    fn start(&mut self, frame: &VideoFrame) -> Result<()> {
        // Encoders reject odd dimensions, so round down.
        self.width = frame.width & !1;
        self.height = frame.height & !1;

        let file = File::create(&self.path).with_context(|| {
            format!("Failed to create video track: {}", self.path.display())
        })?;
        let mut writer = BufWriter::new(file);
        writer.write_all(VIDEO_MAGIC)?;
        writer.write_all(&VIDEO_VERSION.to_le_bytes())?;
        writer.write_all(&self.width.to_le_bytes())?;
        writer.write_all(&self.height.to_le_bytes())?;
        writer.write_all(&0u32.to_le_bytes())?;
        self.file = Some(writer);

        info!(
            "Video track started: {} ({}x{})",
            self.path.display(),
            self.width,
            self.height
        );
        Ok(())
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Patch the frame count into the header and close the file. Returns
    /// `None` when no frame was ever written.
    pub fn finalize(mut self) -> Result<Option<VideoTrack>> {
        let Some(mut file) = self.file.take() else {
            return Ok(None);
        };
        file.flush()?;
        file.seek(SeekFrom::Start(FRAME_COUNT_OFFSET))?;
        file.write_all(&(self.frames.min(u32::MAX as u64) as u32).to_le_bytes())?;
        file.flush().context("Failed to finalize video track")?;

        Ok(Some(VideoTrack {
            path: self.path.clone(),
            width: self.width,
            height: self.height,
            frames: self.frames,
            duration_ms: self.last_timestamp_ms,
        }))
    }
}

impl Drop for VideoTrackWriter {
    fn drop(&mut self) {
        if let Some(mut file) = self.file.take() {
            if let Err(e) = file.flush() {
                warn!("Failed to flush dropped video track: {}", e);
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct AudioTrack {
    pub path: PathBuf,
    pub duration_secs: f64,
    pub samples: u64,
}

/// WAV track for the broadcast audio mix. Lazy like the video writer and
/// fully independent of it.
pub struct AudioTrackWriter {
    path: PathBuf,
    writer: Option<hound::WavWriter<BufWriter<File>>>,
    sample_rate: u32,
    channels: u16,
    samples: u64,
}

impl AudioTrackWriter {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            writer: None,
            sample_rate: 0,
            channels: 0,
            samples: 0,
        }
    }

    pub fn write(&mut self, frame: &AudioFrame) -> Result<()> {
        if self.writer.is_none() {
            let spec = hound::WavSpec {
                channels: frame.channels,
                sample_rate: frame.sample_rate,
                bits_per_sample: 16,
                sample_format: hound::SampleFormat::Int,
            };
            let writer = hound::WavWriter::create(&self.path, spec).with_context(|| {
                format!("Failed to create audio track: {}", self.path.display())
            })?;
            self.writer = Some(writer);
            self.sample_rate = frame.sample_rate;
            self.channels = frame.channels.max(1);
            info!(
                "Audio track started: {} ({})",
                self.path.display(),
                frame.format()
            );
        }

        let writer = self
            .writer
            .as_mut()
            .context("Audio writer has no open file")?;
        for &sample in &frame.samples {
            writer.write_sample(sample)?;
        }
        self.samples += frame.samples.len() as u64;
        Ok(())
    }

    pub fn finalize(mut self) -> Result<Option<AudioTrack>> {
        let Some(writer) = self.writer.take() else {
            return Ok(None);
        };
        writer.finalize().context("Failed to finalize audio track")?;

        let per_sec = self.sample_rate as u64 * self.channels as u64;
        let duration_secs = if per_sec == 0 {
            0.0
        } else {
            self.samples as f64 / per_sec as f64
        };
        Ok(Some(AudioTrack {
            path: self.path.clone(),
            duration_secs,
            samples: self.samples,
        }))
    }
}

impl Drop for AudioTrackWriter {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            if let Err(e) = writer.finalize() {
                warn!("Failed to finalize dropped audio track: {}", e);
            }
        }
    }
}
