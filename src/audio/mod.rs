pub mod convert;
pub mod frame;
pub mod recorder;
pub mod source;
pub mod vad;

pub use convert::{CachedConverter, FormatConverter};
pub use frame::{AudioFormat, AudioFrame, VideoFrame};
pub use recorder::{VoiceRecorder, VoiceRecording};
pub use source::{AudioSource, FrameSource, SilenceSource, SyntheticFrameSource, WavFileSource};
pub use vad::{rms, VadConfig, VadEvent, VoiceActivityDetector};
