// Conversation engine.
//
// One task owns every piece of mutable conversation state: the phase enum,
// the mic flag, the live session handle, the avatar controller, and the
// pending voice-upload timer. The live session and the control surface talk
// to it over channels, so transitions are serialized by construction.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::state::ConversationState;
use crate::api::{upload_voice_recording, ApiClient, EventCreate, MemoryCreate};
use crate::audio::{AudioFormat, AudioFrame, AudioSource};
use crate::avatar::{clips, AvatarController, ClipLibrary};
use crate::handoff::{Credentials, SharedStore};
use crate::live::{ClockSink, LiveClient, LiveConfig, LiveEvent, LiveStats};

/// Format inbound model audio is mixed to for playback.
const PLAYBACK_FORMAT: AudioFormat = AudioFormat::new(24000, 1);

pub struct EngineConfig {
    pub live: LiveConfig,
    pub device_id: String,
    /// Idle window after speech ends before the local recording is uploaded
    pub voice_upload_delay: Duration,
}

/// Commands accepted by the engine task.
#[derive(Debug)]
pub enum EngineCommand {
    MicOn,
    MicOff,
    Interrupt,
    Reset,
    Status(oneshot::Sender<EngineStatus>),
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct EngineStatus {
    pub state: ConversationState,
    pub mic_enabled: bool,
    pub is_speaking: bool,
    pub is_processing_audio: bool,
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub live: Option<LiveStats>,
}

/// Results of work the engine farmed out to spawned tasks.
#[derive(Debug)]
enum Internal {
    VoiceEventCreated(String),
    VoiceEventFailed,
    VoiceUploadDue(u64),
}

/// Cloneable handle for sending commands to a running engine.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineCommand>,
}

impl EngineHandle {
    pub async fn mic_on(&self) {
        let _ = self.tx.send(EngineCommand::MicOn).await;
    }

    pub async fn mic_off(&self) {
        let _ = self.tx.send(EngineCommand::MicOff).await;
    }

    pub async fn interrupt(&self) {
        let _ = self.tx.send(EngineCommand::Interrupt).await;
    }

    pub async fn reset(&self) {
        let _ = self.tx.send(EngineCommand::Reset).await;
    }

    pub async fn status(&self) -> Option<EngineStatus> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx.send(EngineCommand::Status(reply_tx)).await.ok()?;
        reply_rx.await.ok()
    }
}

pub struct Engine {
    config: EngineConfig,
    api: Arc<ApiClient>,
    store: SharedStore,
    avatar: AvatarController,
    clips: ClipLibrary,
    mic: Box<dyn AudioSource>,

    state: ConversationState,
    mic_enabled: bool,
    processing_audio: bool,

    live: Option<LiveClient>,
    live_events: Option<mpsc::Receiver<LiveEvent>>,
    pump: Option<JoinHandle<()>>,

    voice_event_id: Option<String>,
    voice_event_inflight: bool,
    voice_upload_timer: Option<JoinHandle<()>>,
    voice_upload_generation: u64,
    response_text: String,

    command_rx: mpsc::Receiver<EngineCommand>,
    internal_tx: mpsc::Sender<Internal>,
    internal_rx: mpsc::Receiver<Internal>,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        api: Arc<ApiClient>,
        store: SharedStore,
        avatar: AvatarController,
        clips: ClipLibrary,
        mic: Box<dyn AudioSource>,
    ) -> (Self, EngineHandle) {
        let (command_tx, command_rx) = mpsc::channel(32);
        let (internal_tx, internal_rx) = mpsc::channel(32);
        let engine = Self {
            config,
            api,
            store,
            avatar,
            clips,
            mic,
            state: ConversationState::Idle,
            mic_enabled: false,
            processing_audio: false,
            live: None,
            live_events: None,
            pump: None,
            voice_event_id: None,
            voice_event_inflight: false,
            voice_upload_timer: None,
            voice_upload_generation: 0,
            response_text: String::new(),
            command_rx,
            internal_tx,
            internal_rx,
        };
        (engine, EngineHandle { tx: command_tx })
    }

    /// Drive the engine until every command handle is gone.
    pub async fn run(mut self) {
        self.avatar
            .play_loop(self.clips.resolve(clips::IDLE_LOOP))
            .await;
        info!("Conversation engine started");

        loop {
            tokio::select! {
                command = self.command_rx.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                event = next_event(&mut self.live_events) => match event {
                    Some(event) => self.handle_live_event(event).await,
                    None => self.handle_disconnect(None).await,
                },
                internal = self.internal_rx.recv() => {
                    if let Some(internal) = internal {
                        self.handle_internal(internal).await;
                    }
                }
            }
        }

        self.teardown_session().await;
        info!("Conversation engine stopped");
    }

    async fn handle_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::MicOn => {
                if let Err(e) = self.enable_mic().await {
                    warn!("Failed to enable microphone: {:#}", e);
                    self.teardown_session().await;
                }
            }
            EngineCommand::MicOff => self.disable_mic().await,
            EngineCommand::Interrupt => self.interrupt().await,
            EngineCommand::Reset => self.reset_to_default().await,
            EngineCommand::Status(reply) => {
                let _ = reply.send(self.status());
            }
        }
    }

    async fn handle_live_event(&mut self, event: LiveEvent) {
        match event {
            LiveEvent::Connected => debug!("Live session connected"),
            LiveEvent::Ready => debug!("Live session ready for audio"),
            LiveEvent::UserSpeechStarted => self.on_user_speech_started(),
            LiveEvent::UserSpeechEnded => self.on_user_speech_ended(),
            LiveEvent::ResponseStarted => self.start_responding().await,
            LiveEvent::TextReceived(text) => self.response_text.push_str(&text),
            LiveEvent::ResponseCompleted => self.on_response_completed().await,
            LiveEvent::Disconnected { reason } => self.handle_disconnect(reason).await,
        }
    }

    async fn handle_internal(&mut self, internal: Internal) {
        match internal {
            Internal::VoiceEventCreated(id) => {
                debug!("Voice event {} created", id);
                self.voice_event_inflight = false;
                self.voice_event_id = Some(id);
            }
            Internal::VoiceEventFailed => {
                self.voice_event_inflight = false;
            }
            Internal::VoiceUploadDue(generation) => {
                if generation != self.voice_upload_generation {
                    return;
                }
                self.voice_upload_timer = None;
                self.upload_voice_recording().await;
            }
        }
    }

    /// Connect (when not already connected) and start pumping mic blocks into
    /// the session. Enabling an already-enabled mic is a no-op.
    async fn enable_mic(&mut self) -> Result<()> {
        if self.mic_enabled && self.live.is_some() {
            debug!("Microphone already enabled");
            return Ok(());
        }

        if self.live.is_none() {
            let token = self.ensure_credentials().await?;
            let mut live_config = self.config.live.clone();
            live_config.url = with_access_token(&live_config.url, &token);
            let sink = Box::new(ClockSink::new(PLAYBACK_FORMAT));
            let (client, events) = LiveClient::connect(live_config, sink).await?;
            self.live = Some(client);
            self.live_events = Some(events);
        }

        if self.pump.is_none() {
            let frames = self
                .mic
                .start()
                .await
                .context("Failed to start microphone source")?;
            if let Some(client) = self.live.clone() {
                self.pump = Some(tokio::spawn(pump_audio(frames, client)));
            }
        }

        self.mic_enabled = true;
        info!("Microphone enabled");
        Ok(())
    }

    async fn disable_mic(&mut self) {
        if !self.mic_enabled {
            return;
        }
        self.mic_enabled = false;
        self.stop_mic_pump().await;
        info!("Microphone disabled");
    }

    /// Force `Idle` from any state and discard the in-flight response.
    async fn interrupt(&mut self) {
        info!("Interrupt: discarding in-flight response");
        if let Some(live) = &self.live {
            live.stop_playback().await;
        }
        self.response_text.clear();
        self.cancel_voice_upload();
        self.enter_idle().await;
    }

    /// Full teardown back to the default visuals: session gone, mic off,
    /// pending voice work dropped.
    async fn reset_to_default(&mut self) {
        info!("Resetting conversation to defaults");
        self.teardown_session().await;
        self.response_text.clear();
        self.voice_event_id = None;
        self.cancel_voice_upload();
        self.enter_idle().await;
    }

    /// Enter `SpeakingLoop` when a response begins. Ignored while the mic is
    /// disabled or a speaking animation is already up.
    async fn start_responding(&mut self) {
        if !self.mic_enabled {
            debug!("Response started with microphone off, ignoring");
            return;
        }
        if matches!(
            self.state,
            ConversationState::SpeakingIntro | ConversationState::SpeakingLoop
        ) {
            return;
        }
        self.state = ConversationState::SpeakingLoop;
        self.processing_audio = true;
        self.avatar
            .play_loop(self.clips.resolve(clips::SPEAKING_LOOP))
            .await;
    }

    /// Leave the speaking animation. A no-op unless a speaking state is
    /// actually up, so a stray completion cannot knock over `Idle`.
    async fn finish_speaking(&mut self) {
        if !matches!(
            self.state,
            ConversationState::SpeakingLoop | ConversationState::SpeakingIntro
        ) {
            return;
        }
        self.enter_idle().await;
    }

    async fn on_response_completed(&mut self) {
        let text = std::mem::take(&mut self.response_text);
        if !text.trim().is_empty() {
            let api = self.api.clone();
            tokio::spawn(async move {
                let memory = MemoryCreate {
                    text,
                    source: Some("conversation".to_string()),
                };
                match api.create_memory(&memory).await {
                    Ok(created) => debug!("Stored conversation memory {}", created.id),
                    Err(e) => warn!("Failed to store conversation memory: {}", e),
                }
            });
        }
        self.finish_speaking().await;
    }

    fn on_user_speech_started(&mut self) {
        self.processing_audio = true;
        self.cancel_voice_upload();

        // One voice event per recording; created lazily on the first speech.
        if self.voice_event_id.is_none() && !self.voice_event_inflight {
            self.voice_event_inflight = true;
            let api = self.api.clone();
            let internal = self.internal_tx.clone();
            let event = EventCreate {
                kind: "voice".to_string(),
                device_id: self.config.device_id.clone(),
                started_at: Some(chrono::Utc::now().timestamp()),
                ..Default::default()
            };
            tokio::spawn(async move {
                let message = match api.create_event(&event).await {
                    Ok(created) => Internal::VoiceEventCreated(created.id),
                    Err(e) => {
                        warn!("Failed to create voice event: {}", e);
                        Internal::VoiceEventFailed
                    }
                };
                let _ = internal.send(message).await;
            });
        }
    }

    fn on_user_speech_ended(&mut self) {
        self.processing_audio = false;
        self.arm_voice_upload();
    }

    /// Schedule the end-of-session voice upload. Cancelled when speech
    /// resumes before the idle window elapses.
    fn arm_voice_upload(&mut self) {
        self.cancel_voice_upload();
        self.voice_upload_generation += 1;
        let generation = self.voice_upload_generation;
        let delay = self.config.voice_upload_delay;
        let internal = self.internal_tx.clone();
        self.voice_upload_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = internal.send(Internal::VoiceUploadDue(generation)).await;
        }));
    }

    fn cancel_voice_upload(&mut self) {
        if let Some(timer) = self.voice_upload_timer.take() {
            timer.abort();
        }
    }

    /// Rotate the local voice recording out of the session and upload it
    /// against the open voice event, when both exist.
    async fn upload_voice_recording(&mut self) {
        let Some(live) = &self.live else { return };
        let Some(recording) = live.rotate_recording().await else {
            debug!("No voice recording to upload");
            return;
        };
        let Some(event_id) = self.voice_event_id.take() else {
            debug!(
                "No voice event for recording {}, leaving it on disk",
                recording.path.display()
            );
            return;
        };

        let api = self.api.clone();
        tokio::spawn(async move {
            match upload_voice_recording(&api, &event_id, &recording).await {
                Ok(url) => {
                    info!("Voice recording uploaded to {}", url);
                    if let Err(e) = tokio::fs::remove_file(&recording.path).await {
                        debug!("Failed to remove local voice recording: {}", e);
                    }
                }
                Err(e) => warn!("Voice recording upload failed: {}", e),
            }
        });
    }

    async fn handle_disconnect(&mut self, reason: Option<String>) {
        match &reason {
            Some(reason) => warn!("Live session lost: {}", reason),
            None => info!("Live session closed"),
        }
        self.live = None;
        self.live_events = None;
        self.mic_enabled = false;
        self.stop_mic_pump().await;
        self.cancel_voice_upload();
        self.voice_event_id = None;
        self.response_text.clear();
        if self.state.is_speaking() {
            self.enter_idle().await;
        } else {
            self.processing_audio = false;
        }
    }

    async fn teardown_session(&mut self) {
        self.mic_enabled = false;
        self.stop_mic_pump().await;
        if let Some(live) = self.live.take() {
            live.disconnect().await;
        }
        self.live_events = None;
    }

    async fn stop_mic_pump(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        if self.mic.is_capturing() {
            if let Err(e) = self.mic.stop().await {
                warn!("Failed to stop microphone source: {:#}", e);
            }
        }
    }

    async fn enter_idle(&mut self) {
        self.state = ConversationState::Idle;
        self.processing_audio = false;
        self.avatar
            .play_loop(self.clips.resolve(clips::IDLE_LOOP))
            .await;
    }

    async fn ensure_credentials(&mut self) -> Result<String> {
        if let Some(creds) = self.store.credentials() {
            self.api.set_token(Some(creds.token.clone()));
            return Ok(creds.token);
        }

        info!("No stored credentials, performing anonymous auth");
        let auth = self
            .api
            .auth_anonymous(&self.config.device_id)
            .await
            .context("Anonymous auth failed")?;
        self.api.set_token(Some(auth.token.clone()));
        let creds = Credentials {
            device_id: self.config.device_id.clone(),
            token: auth.token.clone(),
        };
        self.store
            .set_credentials(&creds)
            .context("Failed to persist credentials")?;
        Ok(auth.token)
    }

    fn status(&self) -> EngineStatus {
        EngineStatus {
            state: self.state,
            mic_enabled: self.mic_enabled,
            is_speaking: self.state.is_speaking(),
            is_processing_audio: self.processing_audio,
            connected: self
                .live
                .as_ref()
                .map(|live| live.is_connected())
                .unwrap_or(false),
            live: self.live.as_ref().map(|live| live.stats()),
        }
    }
}

async fn pump_audio(mut frames: mpsc::Receiver<AudioFrame>, client: LiveClient) {
    while let Some(frame) = frames.recv().await {
        client.send_audio(frame).await;
    }
}

/// Receive from the live event channel, or park forever when no session is up.
async fn next_event(rx: &mut Option<mpsc::Receiver<LiveEvent>>) -> Option<LiveEvent> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

fn with_access_token(url: &str, token: &str) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{url}{separator}access_token={token}")
}
