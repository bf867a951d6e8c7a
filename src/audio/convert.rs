// PCM format conversion: channel mixdown plus linear-interpolation resampling.
//
// Conversion happens on every microphone block and on every inbound playback
// chunk, so the converter for a given (source, target) pair is built once and
// reused until the source format changes (a route change mid-session).

use tracing::debug;

use super::frame::{AudioFormat, AudioFrame};

/// Converts interleaved i16 PCM from one fixed format to another.
#[derive(Debug, Clone)]
pub struct FormatConverter {
    source: AudioFormat,
    target: AudioFormat,
}

impl FormatConverter {
    pub fn new(source: AudioFormat, target: AudioFormat) -> Self {
        debug!("Format converter created: {} -> {}", source, target);
        Self { source, target }
    }

    pub fn source(&self) -> AudioFormat {
        self.source
    }

    pub fn target(&self) -> AudioFormat {
        self.target
    }

    /// Convert one block of interleaved samples in the source format.
    pub fn convert(&self, samples: &[i16]) -> Vec<i16> {
        if samples.is_empty() {
            return Vec::new();
        }
        if self.source == self.target {
            return samples.to_vec();
        }

        let mono = mixdown(samples, self.source.channels);
        let resampled = if self.source.sample_rate == self.target.sample_rate {
            mono
        } else {
            resample(&mono, self.source.sample_rate, self.target.sample_rate)
        };

        if self.target.channels <= 1 {
            resampled
        } else {
            fan_out(&resampled, self.target.channels)
        }
    }
}

/// One-slot converter cache keyed by the incoming block's format.
///
/// The target format is fixed for the lifetime of the cache (the wire format
/// on the send path, the sink's mixer format on the playback path); the
/// converter is rebuilt only when a block arrives in a new source format.
#[derive(Debug)]
pub struct CachedConverter {
    target: AudioFormat,
    converter: Option<FormatConverter>,
}

impl CachedConverter {
    pub fn new(target: AudioFormat) -> Self {
        Self {
            target,
            converter: None,
        }
    }

    pub fn target(&self) -> AudioFormat {
        self.target
    }

    pub fn convert_frame(&mut self, frame: &AudioFrame) -> Vec<i16> {
        self.convert(&frame.samples, frame.format())
    }

    pub fn convert(&mut self, samples: &[i16], source: AudioFormat) -> Vec<i16> {
        let needs_rebuild = match &self.converter {
            Some(c) => c.source() != source,
            None => true,
        };
        if needs_rebuild {
            self.converter = Some(FormatConverter::new(source, self.target));
        }
        match &self.converter {
            Some(c) => c.convert(samples),
            None => Vec::new(),
        }
    }
}

/// Average interleaved channels down to mono.
fn mixdown(samples: &[i16], channels: u16) -> Vec<i16> {
    if channels <= 1 {
        return samples.to_vec();
    }
    let channels = channels as usize;
    samples
        .chunks_exact(channels)
        .map(|group| {
            let sum: i32 = group.iter().map(|&s| s as i32).sum();
            (sum / channels as i32) as i16
        })
        .collect()
}

/// Duplicate a mono signal across N interleaved channels.
fn fan_out(samples: &[i16], channels: u16) -> Vec<i16> {
    let channels = channels as usize;
    let mut out = Vec::with_capacity(samples.len() * channels);
    for &sample in samples {
        for _ in 0..channels {
            out.push(sample);
        }
    }
    out
}

/// Linear-interpolation resample of a mono signal.
fn resample(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if samples.is_empty() || from_rate == 0 || to_rate == 0 {
        return Vec::new();
    }
    if from_rate == to_rate {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = ((samples.len() as f64) / ratio).round() as usize;
    let mut out = Vec::with_capacity(out_len.max(1));

    for i in 0..out_len {
        let pos = i as f64 * ratio;
        let idx = pos as usize;
        let frac = pos - idx as f64;
        let s0 = samples[idx.min(samples.len() - 1)] as f64;
        let s1 = samples[(idx + 1).min(samples.len() - 1)] as f64;
        out.push((s0 + (s1 - s0) * frac).round() as i16);
    }

    out
}
