//! Broadcast capture process: track writers, session lifecycle, handoff.

pub mod session;
pub mod writer;

pub use session::{CaptureCommand, CaptureConfig, CaptureOutcome, CaptureSession};
pub use writer::{AudioTrack, AudioTrackWriter, VideoTrack, VideoTrackWriter};
