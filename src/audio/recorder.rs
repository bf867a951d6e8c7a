use anyhow::{Context, Result};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::frame::AudioFrame;

/// Finished local recording.
#[derive(Debug, Clone)]
pub struct VoiceRecording {
    pub path: PathBuf,
    pub duration_secs: f64,
    pub sample_count: usize,
}

/// Writes raw microphone blocks to a WAV file for end-of-session upload.
///
/// The writer is constructed lazily from the first block's format, since the
/// hardware format is unknown until the tap delivers audio. Blocks are written
/// un-resampled; the wire-format conversion happens on a separate copy.
pub struct VoiceRecorder {
    path: PathBuf,
    writer: Option<hound::WavWriter<BufWriter<File>>>,
    sample_rate: u32,
    channels: u16,
    sample_count: usize,
}

impl VoiceRecorder {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            writer: None,
            sample_rate: 0,
            channels: 0,
            sample_count: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
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
                format!("Failed to create voice recording: {}", self.path.display())
            })?;
            info!(
                "Voice recording started: {} ({}Hz, {} channels)",
                self.path.display(),
                frame.sample_rate,
                frame.channels
            );
            self.writer = Some(writer);
            self.sample_rate = frame.sample_rate;
            self.channels = frame.channels;
        }

        if let Some(writer) = &mut self.writer {
            for &sample in &frame.samples {
                writer
                    .write_sample(sample)
                    .context("Failed to write sample to voice recording")?;
            }
            self.sample_count += frame.samples.len();
        }

        Ok(())
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 || self.channels == 0 {
            return 0.0;
        }
        self.sample_count as f64 / (self.sample_rate as f64 * self.channels as f64)
    }

    /// Finalize the WAV header. Returns `None` when no audio was ever written.
    pub fn finalize(mut self) -> Result<Option<VoiceRecording>> {
        let Some(writer) = self.writer.take() else {
            return Ok(None);
        };
        let duration_secs = self.duration_secs();
        writer
            .finalize()
            .context("Failed to finalize voice recording")?;
        info!(
            "Voice recording finalized: {} ({:.1}s, {} samples)",
            self.path.display(),
            duration_secs,
            self.sample_count
        );
        Ok(Some(VoiceRecording {
            path: self.path.clone(),
            duration_secs,
            sample_count: self.sample_count,
        }))
    }
}

impl Drop for VoiceRecorder {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            if let Err(e) = writer.finalize() {
                warn!("Failed to finalize voice recording on drop: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn frame(samples: Vec<i16>) -> AudioFrame {
        AudioFrame {
            samples,
            sample_rate: 16000,
            channels: 1,
            timestamp_ms: 0,
        }
    }

    #[test]
    fn no_blocks_means_no_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("voice.wav");
        let recorder = VoiceRecorder::new(&path);

        assert!(recorder.finalize().unwrap().is_none());
        assert!(!path.exists());
    }

    #[test]
    fn file_format_follows_first_block() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("voice.wav");
        let mut recorder = VoiceRecorder::new(&path);

        recorder.write(&frame(vec![1; 16000])).unwrap();
        recorder.write(&frame(vec![2; 8000])).unwrap();
        let recording = recorder.finalize().unwrap().unwrap();

        assert_eq!(recording.sample_count, 24000);
        assert!((recording.duration_secs - 1.5).abs() < 0.01);

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, 16000);
        assert_eq!(reader.spec().channels, 1);
        assert_eq!(reader.len(), 24000);
    }
}
