//! HTTP control surface, the daemon-world stand-in for the app's buttons
//! and banners:
//! - GET /health - Health check
//! - GET /status - Conversation state, banner, broadcast pipeline
//! - POST /mic/on - Enable the microphone (connects if needed)
//! - POST /mic/off - Disable the microphone
//! - POST /interrupt - Discard the in-flight response
//! - POST /reset - Tear the session down to defaults

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;
