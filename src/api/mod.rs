//! Typed client for the companion backend plus the recording upload pipeline.

pub mod client;
pub mod types;
pub mod upload;

pub use client::{ApiClient, ApiError};
pub use types::{
    AuthResponse, DeviceResponse, EventCreate, EventPatch, EventResponse, EventStatusResponse,
    MemoryCreate, MemoryResponse, UploadRequest, UploadTicket, WhoamiResponse,
};
pub use upload::{upload_recording, upload_voice_recording, UploadOutcome, DEVICE_PLATFORM};
