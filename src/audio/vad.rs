// Energy-based voice activity detection.
//
// The remote endpoint's own turn detection is the source of truth for the
// conversation; this detector is a fast local approximation used for UI
// responsiveness and for recording boundaries. It is driven entirely by block
// timestamps, so it is deterministic given a frame trace.

use tracing::debug;

use super::frame::AudioFrame;

/// Thresholds for the energy detector.
#[derive(Debug, Clone)]
pub struct VadConfig {
    /// RMS threshold on normalized samples (1.0 = full scale)
    pub threshold: f32,
    /// Continuous time above threshold before a start fires (ms)
    pub start_sustain_ms: u64,
    /// Continuous time below threshold after a start before an end fires (ms)
    pub end_sustain_ms: u64,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            threshold: 0.015,
            start_sustain_ms: 250,
            end_sustain_ms: 1000,
        }
    }
}

/// Speech boundary events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadEvent {
    SpeechStarted,
    SpeechEnded,
}

/// Per-block RMS detector with sustain windows on both edges.
///
/// A start fires at most once per continuous above-threshold run; an end
/// fires only after the below-threshold sustain elapses following a start.
/// Runs shorter than the start sustain produce no events at all.
#[derive(Debug)]
pub struct VoiceActivityDetector {
    config: VadConfig,
    speaking: bool,
    above_since_ms: Option<u64>,
    last_speech_ms: u64,
}

impl VoiceActivityDetector {
    pub fn new(config: VadConfig) -> Self {
        Self {
            config,
            speaking: false,
            above_since_ms: None,
            last_speech_ms: 0,
        }
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking
    }

    /// Clear detector state. Called at microphone start and stop.
    pub fn reset(&mut self) {
        self.speaking = false;
        self.above_since_ms = None;
        self.last_speech_ms = 0;
    }

    /// Feed one block; returns a boundary event when one fires.
    pub fn process(&mut self, frame: &AudioFrame) -> Option<VadEvent> {
        let energy = rms(&frame.samples);
        let now_ms = frame.timestamp_ms;

        if energy >= self.config.threshold {
            let above_since = *self.above_since_ms.get_or_insert(now_ms);
            self.last_speech_ms = now_ms;

            if !self.speaking && now_ms.saturating_sub(above_since) >= self.config.start_sustain_ms
            {
                self.speaking = true;
                debug!("Speech started at {}ms (rms {:.4})", now_ms, energy);
                return Some(VadEvent::SpeechStarted);
            }
        } else {
            self.above_since_ms = None;

            if self.speaking
                && now_ms.saturating_sub(self.last_speech_ms) >= self.config.end_sustain_ms
            {
                self.speaking = false;
                debug!("Speech ended at {}ms", now_ms);
                return Some(VadEvent::SpeechEnded);
            }
        }

        None
    }
}

/// RMS energy of an i16 block, normalized to [0, 1].
pub fn rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f64 = samples
        .iter()
        .map(|&s| {
            let x = s as f64 / i16::MAX as f64;
            x * x
        })
        .sum();
    (sum_squares / samples.len() as f64).sqrt() as f32
}
