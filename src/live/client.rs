use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use base64::Engine;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::playback::AudioSink;
use super::protocol::{self, ClientFrame, InlineData, ServerFrame};
use crate::audio::{
    AudioFormat, AudioFrame, CachedConverter, VadConfig, VadEvent, VoiceActivityDetector,
    VoiceRecorder, VoiceRecording,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, WsMessage>;

/// Configuration for one live session.
#[derive(Debug, Clone)]
pub struct LiveConfig {
    /// Full websocket URL, token included
    pub url: String,
    pub model: String,
    pub response_modality: String,
    pub voice: Option<String>,
    /// Wire format for outbound microphone audio
    pub send_format: AudioFormat,
    /// Force-open the audio gate when no setup ack arrives within this window
    pub ready_fallback: Duration,
    /// Silence window after which an active response counts as complete
    pub completion_debounce: Duration,
    pub vad: VadConfig,
    /// Directory for local voice recordings; `None` disables recording
    pub recording_dir: Option<PathBuf>,
}

impl LiveConfig {
    pub fn new(url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            model: model.into(),
            response_modality: "AUDIO".to_string(),
            voice: None,
            send_format: AudioFormat::wire(),
            ready_fallback: Duration::from_millis(100),
            completion_debounce: Duration::from_millis(1000),
            vad: VadConfig::default(),
            recording_dir: None,
        }
    }
}

/// Events emitted by the live session.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveEvent {
    /// Socket opened, setup sent.
    Connected,
    /// Audio send gate opened (setup ack or fallback timer).
    Ready,
    /// Local VAD detected the start of user speech.
    UserSpeechStarted,
    /// Local VAD detected the end of user speech.
    UserSpeechEnded,
    /// First content of a remote turn arrived.
    ResponseStarted,
    /// A text part arrived.
    TextReceived(String),
    /// Remote turn finished and all scheduled audio drained.
    ResponseCompleted,
    /// Socket closed; the session is gone. No automatic reconnect.
    Disconnected { reason: Option<String> },
}

#[derive(Debug)]
enum Command {
    SendAudio(AudioFrame),
    RotateRecording(oneshot::Sender<Option<VoiceRecording>>),
    StopPlayback,
    Disconnect,
}

#[derive(Debug, Default)]
struct Shared {
    connected: AtomicBool,
    ready: AtomicBool,
    sent_audio_chunks: AtomicU64,
    received_audio_chunks: AtomicU64,
    received_messages: AtomicU64,
}

/// Counter snapshot for status surfaces.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct LiveStats {
    pub sent_audio_chunks: u64,
    pub received_audio_chunks: u64,
    pub received_messages: u64,
}

/// Handle to one live streaming session.
///
/// All methods forward to the background session task. The session never
/// reconnects on its own: after [`LiveEvent::Disconnected`] the handle is
/// dead and the owner connects again with fresh configuration.
#[derive(Clone)]
pub struct LiveClient {
    command_tx: mpsc::Sender<Command>,
    shared: Arc<Shared>,
}

impl LiveClient {
    /// Open the websocket, send the setup handshake, and start the session
    /// task. Returns the handle and the event stream.
    pub async fn connect(
        config: LiveConfig,
        sink: Box<dyn AudioSink>,
    ) -> Result<(Self, mpsc::Receiver<LiveEvent>)> {
        info!(model = %config.model, "Connecting live session");
        let (ws, _) = tokio_tungstenite::connect_async(&config.url)
            .await
            .context("Failed to open realtime websocket")?;

        let (event_tx, event_rx) = mpsc::channel(256);
        let (command_tx, command_rx) = mpsc::channel(64);
        let shared = Arc::new(Shared::default());
        shared.connected.store(true, Ordering::SeqCst);
        let _ = event_tx.send(LiveEvent::Connected).await;

        let inbound_target = sink.format();
        let session = Session {
            sink,
            shared: shared.clone(),
            event_tx,
            outbound: CachedConverter::new(config.send_format),
            inbound: CachedConverter::new(inbound_target),
            vad: VoiceActivityDetector::new(config.vad.clone()),
            recorder: None,
            recorder_failed: false,
            response_active: false,
            completion_pending: false,
            last_content: Instant::now(),
            ready_deadline: Instant::now() + config.ready_fallback,
            config,
        };
        tokio::spawn(session.run(ws, command_rx));

        Ok((Self { command_tx, shared }, event_rx))
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    pub fn is_ready(&self) -> bool {
        self.shared.ready.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> LiveStats {
        LiveStats {
            sent_audio_chunks: self.shared.sent_audio_chunks.load(Ordering::Relaxed),
            received_audio_chunks: self.shared.received_audio_chunks.load(Ordering::Relaxed),
            received_messages: self.shared.received_messages.load(Ordering::Relaxed),
        }
    }

    /// Feed one microphone block into the session.
    pub async fn send_audio(&self, frame: AudioFrame) {
        let _ = self.command_tx.send(Command::SendAudio(frame)).await;
    }

    /// Finalize the current voice recording and start a fresh one on the next
    /// block. Returns the finished recording, if any audio was captured.
    pub async fn rotate_recording(&self) -> Option<VoiceRecording> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .command_tx
            .send(Command::RotateRecording(reply_tx))
            .await
            .is_err()
        {
            return None;
        }
        reply_rx.await.ok().flatten()
    }

    /// Discard the in-flight response: drop scheduled playback and close the
    /// current turn without a completion event.
    pub async fn stop_playback(&self) {
        let _ = self.command_tx.send(Command::StopPlayback).await;
    }

    pub async fn disconnect(&self) {
        let _ = self.command_tx.send(Command::Disconnect).await;
    }
}

struct Session {
    config: LiveConfig,
    sink: Box<dyn AudioSink>,
    shared: Arc<Shared>,
    event_tx: mpsc::Sender<LiveEvent>,
    /// Microphone blocks -> wire format
    outbound: CachedConverter,
    /// Inbound chunks -> sink mixer format
    inbound: CachedConverter,
    vad: VoiceActivityDetector,
    recorder: Option<VoiceRecorder>,
    recorder_failed: bool,
    response_active: bool,
    /// A completion signal arrived while buffers were still playing.
    completion_pending: bool,
    last_content: Instant,
    ready_deadline: Instant,
}

impl Session {
    async fn run(mut self, ws: WsStream, mut command_rx: mpsc::Receiver<Command>) {
        let (mut ws_write, mut ws_read) = ws.split();

        let setup = ClientFrame::setup(
            &self.config.model,
            &self.config.response_modality,
            self.config.voice.as_deref(),
        );
        match serde_json::to_string(&setup) {
            Ok(json) => {
                if let Err(e) = ws_write.send(WsMessage::Text(json.into())).await {
                    self.teardown(Some(format!("setup send failed: {e}"))).await;
                    return;
                }
            }
            Err(e) => {
                self.teardown(Some(format!("setup encode failed: {e}"))).await;
                return;
            }
        }

        let mut tick = tokio::time::interval(Duration::from_millis(50));

        let reason = loop {
            tokio::select! {
                message = ws_read.next() => match message {
                    Some(Ok(WsMessage::Text(text))) => self.handle_frame(&text).await,
                    Some(Ok(WsMessage::Close(_))) => break None,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break Some(e.to_string()),
                    None => break None,
                },
                command = command_rx.recv() => match command {
                    Some(Command::SendAudio(frame)) => {
                        self.handle_audio(&mut ws_write, frame).await;
                    }
                    Some(Command::RotateRecording(reply)) => {
                        let _ = reply.send(self.rotate_recording());
                    }
                    Some(Command::StopPlayback) => {
                        self.sink.stop();
                        self.response_active = false;
                        self.completion_pending = false;
                    }
                    Some(Command::Disconnect) | None => {
                        let _ = ws_write.send(WsMessage::Close(None)).await;
                        break None;
                    }
                },
                _ = tick.tick() => self.housekeeping().await,
            }
        };

        self.teardown(reason).await;
    }

    async fn handle_frame(&mut self, text: &str) {
        self.shared.received_messages.fetch_add(1, Ordering::Relaxed);

        let frame: ServerFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                debug!("Ignoring unparseable frame: {}", e);
                return;
            }
        };

        if frame.setup_complete.is_some() {
            self.open_audio_gate("setup ack").await;
        }

        let mut completion = frame.done == Some(true);
        if let Some(event_type) = &frame.event_type {
            if protocol::is_completion_marker(event_type) {
                completion = true;
            }
        }

        if let Some(content) = frame.server_content {
            if content.turn_complete == Some(true) {
                completion = true;
            }
            if let Some(turn) = content.model_turn {
                for part in turn.parts {
                    if let Some(text) = part.text {
                        self.note_content().await;
                        let _ = self.event_tx.send(LiveEvent::TextReceived(text)).await;
                    }
                    if let Some(inline) = part.inline_data {
                        self.handle_inline_audio(inline).await;
                    }
                }
            }
        }

        if completion {
            self.note_completion().await;
        }
    }

    async fn handle_inline_audio(&mut self, inline: InlineData) {
        let bytes = match base64::engine::general_purpose::STANDARD.decode(inline.data.as_bytes())
        {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!("Ignoring undecodable audio chunk: {}", e);
                return;
            }
        };
        let samples: Vec<i16> = bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        if samples.is_empty() {
            return;
        }

        // Chunks arrive mono at whatever rate the mime type declares.
        let declared_rate = protocol::parse_pcm_rate(&inline.mime_type).unwrap_or(24000);
        let source = AudioFormat::new(declared_rate, 1);
        let samples = if source == self.sink.format() {
            samples
        } else {
            self.inbound.convert(&samples, source)
        };

        self.note_content().await;
        self.sink.schedule(samples);
        self.shared
            .received_audio_chunks
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Record content activity; the first content of a turn opens a response.
    async fn note_content(&mut self) {
        self.last_content = Instant::now();
        if !self.response_active {
            self.response_active = true;
            self.completion_pending = false;
            let _ = self.event_tx.send(LiveEvent::ResponseStarted).await;
        }
    }

    async fn note_completion(&mut self) {
        if !self.response_active {
            return;
        }
        let pending = self.sink.pending();
        if pending > 0 {
            debug!("Turn complete with {} buffers pending, deferring", pending);
            self.completion_pending = true;
        } else {
            self.finish_response().await;
        }
    }

    async fn finish_response(&mut self) {
        self.response_active = false;
        self.completion_pending = false;
        let _ = self.event_tx.send(LiveEvent::ResponseCompleted).await;
    }

    async fn housekeeping(&mut self) {
        if !self.shared.ready.load(Ordering::SeqCst) && Instant::now() >= self.ready_deadline {
            self.open_audio_gate("no setup ack within fallback window").await;
        }

        if self.completion_pending {
            if self.sink.pending() == 0 {
                self.finish_response().await;
            }
            return;
        }

        if self.response_active
            && Instant::now().duration_since(self.last_content) >= self.config.completion_debounce
        {
            debug!("No content within debounce window, treating turn as complete");
            if self.sink.pending() > 0 {
                self.completion_pending = true;
            } else {
                self.finish_response().await;
            }
        }
    }

    async fn open_audio_gate(&mut self, why: &str) {
        if self.shared.ready.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Audio send gate open ({})", why);
        let _ = self.event_tx.send(LiveEvent::Ready).await;
    }

    async fn handle_audio(&mut self, ws_write: &mut WsSink, frame: AudioFrame) {
        // The local recording gets the raw, un-resampled block.
        if let Some(dir) = &self.config.recording_dir {
            if self.recorder.is_none() && !self.recorder_failed {
                let name = format!("voice-{}.wav", chrono::Utc::now().timestamp_millis());
                self.recorder = Some(VoiceRecorder::new(dir.join(name)));
            }
            if let Some(recorder) = &mut self.recorder {
                if let Err(e) = recorder.write(&frame) {
                    warn!("Voice recording failed, continuing without it: {:#}", e);
                    self.recorder_failed = true;
                    self.recorder = None;
                }
            }
        }

        match self.vad.process(&frame) {
            Some(VadEvent::SpeechStarted) => {
                let _ = self.event_tx.send(LiveEvent::UserSpeechStarted).await;
            }
            Some(VadEvent::SpeechEnded) => {
                let _ = self.event_tx.send(LiveEvent::UserSpeechEnded).await;
            }
            None => {}
        }

        if !self.shared.ready.load(Ordering::SeqCst) {
            return;
        }

        let samples = self.outbound.convert_frame(&frame);
        if samples.is_empty() {
            return;
        }
        let mut bytes = Vec::with_capacity(samples.len() * 2);
        for sample in samples {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        let data = base64::engine::general_purpose::STANDARD.encode(&bytes);
        let mime_type = protocol::pcm_mime_type(self.config.send_format.sample_rate);
        let envelope = ClientFrame::audio_chunk(&mime_type, data);

        match serde_json::to_string(&envelope) {
            Ok(json) => {
                if ws_write.send(WsMessage::Text(json.into())).await.is_ok() {
                    self.shared.sent_audio_chunks.fetch_add(1, Ordering::Relaxed);
                }
            }
            Err(e) => debug!("Failed to encode audio envelope: {}", e),
        }
    }

    fn rotate_recording(&mut self) -> Option<VoiceRecording> {
        let recorder = self.recorder.take()?;
        match recorder.finalize() {
            Ok(recording) => recording,
            Err(e) => {
                warn!("Failed to finalize voice recording: {:#}", e);
                None
            }
        }
    }

    async fn teardown(mut self, reason: Option<String>) {
        self.sink.stop();
        if let Some(recorder) = self.recorder.take() {
            if let Err(e) = recorder.finalize() {
                warn!("Failed to finalize voice recording: {:#}", e);
            }
        }
        self.shared.connected.store(false, Ordering::SeqCst);
        self.shared.ready.store(false, Ordering::SeqCst);
        match &reason {
            Some(reason) => warn!("Live session closed: {}", reason),
            None => info!("Live session closed"),
        }
        let _ = self.event_tx.send(LiveEvent::Disconnected { reason }).await;
    }
}
