use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use serde::Deserialize;

use crate::audio::VadConfig;
use crate::capture::CaptureConfig;
use crate::coordinator::CoordinatorConfig;
use crate::live::LiveConfig;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub api: ApiConfig,
    pub live: LiveSettings,
    pub audio: AudioSettings,
    pub avatar: AvatarSettings,
    pub broadcast: BroadcastSettings,
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "nestling".to_string(),
            http: HttpConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8787,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LiveSettings {
    pub url: String,
    pub model: String,
    pub voice: Option<String>,
    pub response_modality: String,
    pub ready_fallback_ms: u64,
    pub completion_debounce_ms: u64,
    /// Idle window after speech ends before the voice recording is uploaded
    pub voice_upload_delay_ms: u64,
}

impl Default for LiveSettings {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8080/v1/live".to_string(),
            model: "companion-live".to_string(),
            voice: None,
            response_modality: "AUDIO".to_string(),
            ready_fallback_ms: 100,
            completion_debounce_ms: 1000,
            voice_upload_delay_ms: 3000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    pub vad_threshold: f32,
    pub vad_start_sustain_ms: u64,
    pub vad_end_sustain_ms: u64,
    /// WAV file streamed as the microphone; silence when unset
    pub mic_wav: Option<PathBuf>,
    pub mic_block_ms: u64,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            vad_threshold: 0.015,
            vad_start_sustain_ms: 250,
            vad_end_sustain_ms: 1000,
            mic_wav: None,
            mic_block_ms: 20,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AvatarSettings {
    pub assets_dir: PathBuf,
    pub crossfade_ms: u64,
}

impl Default for AvatarSettings {
    fn default() -> Self {
        Self {
            assets_dir: PathBuf::from("assets"),
            crossfade_ms: 160,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BroadcastSettings {
    pub auto_stop_secs: u64,
    pub finalize_watchdog_secs: u64,
    pub poll_interval_ms: u64,
    pub stale_upload_secs: u64,
    pub banner_clear_secs: u64,
    pub frame_width: u32,
    pub frame_height: u32,
    pub fps: u32,
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            auto_stop_secs: 30 * 60,
            finalize_watchdog_secs: 8,
            poll_interval_ms: 700,
            stale_upload_secs: 45,
            banner_clear_secs: 4,
            frame_width: 1280,
            frame_height: 720,
            fps: 15,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Shared container both processes read and write
    pub container_dir: PathBuf,
    /// Scratch space for in-progress capture tracks
    pub work_dir: PathBuf,
    /// Host-private state
    pub data_dir: PathBuf,
    /// Local voice recordings before upload
    pub recordings_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        let base = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("nestling");
        Self {
            container_dir: base.join("container"),
            work_dir: base.join("work"),
            data_dir: base.join("data"),
            recordings_dir: base.join("recordings"),
        }
    }
}

impl Config {
    /// Load from `path` (extension optional, file optional). Missing file
    /// means defaults across the board.
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    pub fn live_config(&self) -> LiveConfig {
        let mut live = LiveConfig::new(&self.live.url, &self.live.model);
        live.voice = self.live.voice.clone();
        live.response_modality = self.live.response_modality.clone();
        live.ready_fallback = Duration::from_millis(self.live.ready_fallback_ms);
        live.completion_debounce = Duration::from_millis(self.live.completion_debounce_ms);
        live.vad = VadConfig {
            threshold: self.audio.vad_threshold,
            start_sustain_ms: self.audio.vad_start_sustain_ms,
            end_sustain_ms: self.audio.vad_end_sustain_ms,
        };
        live.recording_dir = Some(self.paths.recordings_dir.clone());
        live
    }

    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            container_dir: self.paths.container_dir.clone(),
            work_dir: self.paths.work_dir.clone(),
            api_base_url: self.api.base_url.clone(),
            auto_stop: Duration::from_secs(self.broadcast.auto_stop_secs),
            finalize_watchdog: Duration::from_secs(self.broadcast.finalize_watchdog_secs),
        }
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            poll_interval: Duration::from_millis(self.broadcast.poll_interval_ms),
            stale_upload_window: Duration::from_secs(self.broadcast.stale_upload_secs),
            banner_clear_delay: Duration::from_secs(self.broadcast.banner_clear_secs),
            data_dir: self.paths.data_dir.clone(),
        }
    }
}
