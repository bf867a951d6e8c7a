pub mod api;
pub mod audio;
pub mod avatar;
pub mod capture;
pub mod config;
pub mod conversation;
pub mod coordinator;
pub mod handoff;
pub mod http;
pub mod live;

pub use api::{ApiClient, ApiError};
pub use audio::{AudioFormat, AudioFrame, AudioSource, FrameSource};
pub use avatar::{AvatarController, ClipLibrary};
pub use capture::{CaptureCommand, CaptureConfig, CaptureSession};
pub use config::Config;
pub use conversation::{ConversationState, Engine, EngineConfig, EngineHandle};
pub use coordinator::{Banner, Coordinator, CoordinatorConfig};
pub use handoff::{BroadcastStatus, BroadcastUploadItem, SharedStore};
pub use http::{create_router, AppState};
pub use live::{LiveClient, LiveConfig, LiveEvent};
