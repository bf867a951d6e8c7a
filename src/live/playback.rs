use std::collections::VecDeque;
use tokio::time::Instant;

use crate::audio::AudioFormat;

/// Playback end of the live session: inbound audio buffers are queued here
/// after format conversion.
///
/// The pending count is what defers turn completion: a completion signal is
/// not surfaced while scheduled buffers are still playing.
pub trait AudioSink: Send {
    /// Mixer format buffers must be converted to before scheduling.
    fn format(&self) -> AudioFormat;

    /// Queue one buffer behind those already scheduled.
    fn schedule(&mut self, samples: Vec<i16>);

    /// Buffers scheduled but not yet finished playing.
    fn pending(&mut self) -> usize;

    /// Drop all scheduled audio immediately.
    fn stop(&mut self);
}

/// Timer-backed sink: each buffer "plays" for its PCM duration, queued behind
/// the previous one. Headless stand-in for a hardware output node.
pub struct ClockSink {
    format: AudioFormat,
    /// Deadline at which each scheduled buffer finishes.
    deadlines: VecDeque<Instant>,
}

impl ClockSink {
    pub fn new(format: AudioFormat) -> Self {
        Self {
            format,
            deadlines: VecDeque::new(),
        }
    }
}

impl AudioSink for ClockSink {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn schedule(&mut self, samples: Vec<i16>) {
        let per_sec = self.format.sample_rate as u64 * self.format.channels as u64;
        if per_sec == 0 {
            return;
        }
        let duration_ms = samples.len() as u64 * 1000 / per_sec;
        let now = Instant::now();
        let start = self.deadlines.back().copied().unwrap_or(now).max(now);
        self.deadlines
            .push_back(start + std::time::Duration::from_millis(duration_ms));
    }

    fn pending(&mut self) -> usize {
        let now = Instant::now();
        while matches!(self.deadlines.front(), Some(&deadline) if deadline <= now) {
            self.deadlines.pop_front();
        }
        self.deadlines.len()
    }

    fn stop(&mut self) {
        self.deadlines.clear();
    }
}

/// Sink that plays everything instantly. Used where playback timing is
/// irrelevant.
pub struct NullSink {
    format: AudioFormat,
}

impl NullSink {
    pub fn new(format: AudioFormat) -> Self {
        Self { format }
    }
}

impl AudioSink for NullSink {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn schedule(&mut self, _samples: Vec<i16>) {}

    fn pending(&mut self) -> usize {
        0
    }

    fn stop(&mut self) {}
}
