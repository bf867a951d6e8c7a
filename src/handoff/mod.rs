//! Shared-container handoff between the host daemon and the capture process.
//!
//! The two processes never talk directly. The capture side publishes its
//! status and finished recordings into a shared directory, and the host polls
//! that directory to drive banners and consume the upload queue.

pub mod store;
pub mod types;

pub use store::SharedStore;
pub use types::{keys, BroadcastStatus, BroadcastUploadItem, Credentials};
