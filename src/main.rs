use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{info, warn};

use nestling::audio::{AudioFormat, AudioSource, SilenceSource, SyntheticFrameSource, WavFileSource};
use nestling::capture::{CaptureCommand, CaptureSession};
use nestling::conversation::{Engine, EngineConfig};
use nestling::coordinator::Coordinator;
use nestling::{create_router, ApiClient, AppState, AvatarController, ClipLibrary, Config, SharedStore};

#[derive(Parser)]
#[command(name = "nestling", version, about = "Pocket companion daemon")]
struct Cli {
    /// Config file stem, loaded when present
    #[arg(long, default_value = "config/nestling")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the companion daemon: engine, coordinator, HTTP control surface
    Run,
    /// Run one broadcast capture and hand it off
    Capture {
        /// Stop after this many seconds; the length cap still applies
        #[arg(long)]
        duration: Option<u64>,
    },
    /// Print the shared container status and exit
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;

    match cli.command {
        Command::Run => run(config).await,
        Command::Capture { duration } => capture(config, duration).await,
        Command::Status => status(config),
    }
}

async fn run(config: Config) -> Result<()> {
    info!("{} v{}", config.service.name, env!("CARGO_PKG_VERSION"));

    let store = SharedStore::open(&config.paths.container_dir)?;
    let api = Arc::new(ApiClient::new(config.api.base_url.clone()));
    let device_id = ensure_device_id(&config.paths.data_dir)?;

    let (coordinator, banner_rx) =
        Coordinator::new(config.coordinator_config(), store.clone(), api.clone());
    tokio::spawn(coordinator.run());

    let avatar =
        AvatarController::with_clock_players(Duration::from_millis(config.avatar.crossfade_ms));
    let clips = ClipLibrary::load(&config.avatar.assets_dir);
    let mic: Box<dyn AudioSource> = match &config.audio.mic_wav {
        Some(path) => Box::new(WavFileSource::new(path, config.audio.mic_block_ms)),
        None => Box::new(SilenceSource::new(
            AudioFormat::wire(),
            config.audio.mic_block_ms,
        )),
    };
    let engine_config = EngineConfig {
        live: config.live_config(),
        device_id,
        voice_upload_delay: Duration::from_millis(config.live.voice_upload_delay_ms),
    };
    let (engine, handle) = Engine::new(
        engine_config,
        api.clone(),
        store.clone(),
        avatar,
        clips,
        mic,
    );
    tokio::spawn(engine.run());

    let state = AppState::new(handle, store, banner_rx);
    let router = create_router(state);
    let addr = format!("{}:{}", config.service.http.bind, config.service.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("HTTP control surface on {}", addr);
    axum::serve(listener, router).await?;
    Ok(())
}

async fn capture(config: Config, duration: Option<u64>) -> Result<()> {
    let store = SharedStore::open(&config.paths.container_dir)?;
    let session = CaptureSession::new(config.capture_config(), store);

    let video = Box::new(SyntheticFrameSource::new(
        config.broadcast.frame_width,
        config.broadcast.frame_height,
        config.broadcast.fps,
    ));
    let audio = Box::new(SilenceSource::new(
        AudioFormat::wire(),
        config.audio.mic_block_ms,
    ));

    let (command_tx, command_rx) = mpsc::channel(8);
    if let Some(secs) = duration {
        let tx = command_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            let _ = tx
                .send(CaptureCommand::Finish {
                    reason: "user_stopped".to_string(),
                })
                .await;
        });
    }
    let tx = command_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = tx
                .send(CaptureCommand::Finish {
                    reason: "user_stopped".to_string(),
                })
                .await;
        }
    });

    let outcome = session.run(video, audio, command_rx).await?;
    match &outcome.item {
        Some(item) if outcome.uploaded => info!("Capture uploaded ({})", item.id),
        Some(item) => info!("Capture queued for the app ({})", item.id),
        None => warn!("Capture produced nothing to hand off"),
    }
    Ok(())
}

fn status(config: Config) -> Result<()> {
    let store = SharedStore::open(&config.paths.container_dir)?;
    let snapshot = serde_json::json!({
        "status": store.status().map(|s| s.as_str()),
        "started_at": store.started_at(),
        "stopped_at": store.stopped_at(),
        "pending_uploads": store.pending_uploads().len(),
        "last_event_id": store.last_event_id(),
        "last_upload_phase": store.last_upload_phase(),
        "last_upload_error": store.last_upload_error(),
    });
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

/// Stable per-install device identity, minted on first use.
fn ensure_device_id(data_dir: &Path) -> Result<String> {
    let path = data_dir.join("device_id");
    if let Ok(existing) = std::fs::read_to_string(&path) {
        let existing = existing.trim();
        if !existing.is_empty() {
            return Ok(existing.to_string());
        }
    }
    std::fs::create_dir_all(data_dir).context("Failed to create data directory")?;
    let id = format!("device-{}", uuid::Uuid::new_v4());
    std::fs::write(&path, &id).context("Failed to persist device id")?;
    info!("Minted device id {}", id);
    Ok(id)
}
