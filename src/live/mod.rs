//! Duplex streaming session with the realtime inference endpoint.
//!
//! One websocket carries JSON text frames both directions: outbound
//! microphone audio as base64 PCM chunks, inbound model turns as text and
//! inline audio. The session task owns all per-connection state; the handle
//! and the event receiver are the only surfaces the rest of the daemon sees.

pub mod client;
pub mod playback;
pub mod protocol;

pub use client::{LiveClient, LiveConfig, LiveEvent, LiveStats};
pub use playback::{AudioSink, ClockSink, NullSink};
