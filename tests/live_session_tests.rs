// Integration tests for the realtime websocket session, run against an
// in-process server that scripts the wire frames.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use base64::Engine;
use futures::{SinkExt, StreamExt};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message;

use nestling::audio::{AudioFormat, AudioFrame};
use nestling::live::{ClockSink, LiveClient, LiveConfig, LiveEvent, NullSink};

struct WireServer {
    addr: SocketAddr,
    /// Frames the client sent, parsed as JSON.
    from_client: mpsc::Receiver<serde_json::Value>,
    /// Raw frames to push to the client.
    to_client: mpsc::Sender<String>,
    accepts: Arc<AtomicUsize>,
}

/// Accepts websocket connections on an ephemeral port. Only the first
/// connection is scripted; later ones just bump the accept counter so tests
/// can assert that nothing dials back in.
async fn wire_server() -> Result<WireServer> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let (from_tx, from_rx) = mpsc::channel::<serde_json::Value>(64);
    let (to_tx, to_rx) = mpsc::channel::<String>(64);
    let accepts = Arc::new(AtomicUsize::new(0));
    let accepts_task = accepts.clone();

    tokio::spawn(async move {
        let mut scripted = Some(to_rx);
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            accepts_task.fetch_add(1, Ordering::SeqCst);
            let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                continue;
            };
            let (mut write, mut read) = ws.split();

            if let Some(mut to_rx) = scripted.take() {
                tokio::spawn(async move {
                    while let Some(frame) = to_rx.recv().await {
                        if write.send(Message::Text(frame.into())).await.is_err() {
                            return;
                        }
                    }
                });
            }

            let from_tx = from_tx.clone();
            tokio::spawn(async move {
                while let Some(Ok(message)) = read.next().await {
                    if let Message::Text(text) = message {
                        let Ok(value) = serde_json::from_str(&text) else {
                            continue;
                        };
                        if from_tx.send(value).await.is_err() {
                            return;
                        }
                    }
                }
            });
        }
    });

    Ok(WireServer {
        addr,
        from_client: from_rx,
        to_client: to_tx,
        accepts,
    })
}

fn test_config(addr: SocketAddr) -> LiveConfig {
    let mut config = LiveConfig::new(format!("ws://{addr}"), "companion-live");
    config.ready_fallback = Duration::from_millis(80);
    config.completion_debounce = Duration::from_millis(200);
    config
}

fn null_sink() -> Box<NullSink> {
    Box::new(NullSink::new(AudioFormat::new(24000, 1)))
}

/// One silent microphone block at the wire format.
fn mic_block(ms: u64) -> AudioFrame {
    AudioFrame {
        samples: vec![0; (16 * ms) as usize],
        sample_rate: 16000,
        channels: 1,
        timestamp_ms: 0,
    }
}

async fn next_event(events: &mut mpsc::Receiver<LiveEvent>) -> LiveEvent {
    timeout(Duration::from_secs(3), events.recv())
        .await
        .expect("timed out waiting for a session event")
        .expect("session event stream ended early")
}

#[tokio::test]
async fn setup_is_sent_first_and_fallback_opens_the_gate() -> Result<()> {
    let mut server = wire_server().await?;
    let (client, mut events) = LiveClient::connect(test_config(server.addr), null_sink()).await?;

    assert_eq!(next_event(&mut events).await, LiveEvent::Connected);

    let setup = timeout(Duration::from_secs(3), server.from_client.recv())
        .await?
        .expect("server saw no frame");
    assert_eq!(setup["setup"]["model"], "companion-live");
    assert_eq!(
        setup["setup"]["generationConfig"]["responseModalities"][0],
        "AUDIO"
    );

    // The server never acks; the fallback timer opens the gate anyway.
    assert_eq!(next_event(&mut events).await, LiveEvent::Ready);
    assert!(client.is_ready());

    client.disconnect().await;
    Ok(())
}

#[tokio::test]
async fn audio_is_dropped_until_the_server_acks_setup() -> Result<()> {
    let mut server = wire_server().await?;
    let mut config = test_config(server.addr);
    config.ready_fallback = Duration::from_secs(30); // only the ack can open the gate

    let (client, mut events) = LiveClient::connect(config, null_sink()).await?;
    assert_eq!(next_event(&mut events).await, LiveEvent::Connected);
    let _setup = timeout(Duration::from_secs(3), server.from_client.recv()).await?;

    client.send_audio(mic_block(20)).await;
    sleep(Duration::from_millis(150)).await;
    assert!(
        server.from_client.try_recv().is_err(),
        "pre-ack audio must not reach the wire"
    );
    assert_eq!(client.stats().sent_audio_chunks, 0);

    server
        .to_client
        .send(r#"{"setupComplete":{}}"#.to_string())
        .await?;
    assert_eq!(next_event(&mut events).await, LiveEvent::Ready);

    client.send_audio(mic_block(20)).await;
    let chunk = timeout(Duration::from_secs(3), server.from_client.recv())
        .await?
        .expect("post-ack audio chunk");
    let media = &chunk["realtimeInput"]["mediaChunks"][0];
    assert_eq!(media["mimeType"], "audio/pcm;rate=16000");
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(media["data"].as_str().unwrap())?;
    // 20ms at 16kHz mono, two bytes per sample.
    assert_eq!(bytes.len(), 640);
    assert_eq!(client.stats().sent_audio_chunks, 1);

    client.disconnect().await;
    Ok(())
}

#[tokio::test]
async fn completion_waits_for_scheduled_playback() -> Result<()> {
    let mut server = wire_server().await?;
    let sink = Box::new(ClockSink::new(AudioFormat::new(24000, 1)));
    let (client, mut events) = LiveClient::connect(test_config(server.addr), sink).await?;
    assert_eq!(next_event(&mut events).await, LiveEvent::Connected);
    assert_eq!(next_event(&mut events).await, LiveEvent::Ready);

    // 200ms of audio and the turn-complete marker in one frame.
    let pcm = vec![0u8; 4800 * 2];
    let frame = serde_json::json!({
        "serverContent": {
            "modelTurn": {
                "parts": [{
                    "inlineData": {
                        "mimeType": "audio/pcm;rate=24000",
                        "data": base64::engine::general_purpose::STANDARD.encode(&pcm),
                    }
                }]
            },
            "turnComplete": true
        }
    });
    server.to_client.send(frame.to_string()).await?;

    assert_eq!(next_event(&mut events).await, LiveEvent::ResponseStarted);
    let started = std::time::Instant::now();
    assert_eq!(next_event(&mut events).await, LiveEvent::ResponseCompleted);
    assert!(
        started.elapsed() >= Duration::from_millis(150),
        "completion must wait for the sink to drain"
    );
    assert_eq!(client.stats().received_audio_chunks, 1);

    client.disconnect().await;
    assert_eq!(
        next_event(&mut events).await,
        LiveEvent::Disconnected { reason: None }
    );
    Ok(())
}

#[tokio::test]
async fn silent_turn_completes_after_the_debounce_window() -> Result<()> {
    let mut server = wire_server().await?;
    let (client, mut events) = LiveClient::connect(test_config(server.addr), null_sink()).await?;
    assert_eq!(next_event(&mut events).await, LiveEvent::Connected);
    assert_eq!(next_event(&mut events).await, LiveEvent::Ready);

    let frame = serde_json::json!({
        "serverContent": {"modelTurn": {"parts": [{"text": "hello there"}]}}
    });
    server.to_client.send(frame.to_string()).await?;

    assert_eq!(next_event(&mut events).await, LiveEvent::ResponseStarted);
    assert_eq!(
        next_event(&mut events).await,
        LiveEvent::TextReceived("hello there".to_string())
    );

    // No turn-complete ever arrives; the quiet window closes the turn once.
    assert_eq!(next_event(&mut events).await, LiveEvent::ResponseCompleted);
    sleep(Duration::from_millis(400)).await;
    assert!(
        events.try_recv().is_err(),
        "the implicit completion must fire exactly once"
    );

    client.disconnect().await;
    Ok(())
}

#[tokio::test]
async fn disconnect_tears_down_without_reconnecting() -> Result<()> {
    let mut server = wire_server().await?;
    let (client, mut events) = LiveClient::connect(test_config(server.addr), null_sink()).await?;
    assert_eq!(next_event(&mut events).await, LiveEvent::Connected);
    assert!(client.is_connected());
    assert_eq!(server.accepts.load(Ordering::SeqCst), 1);

    client.disconnect().await;
    loop {
        if let LiveEvent::Disconnected { reason } = next_event(&mut events).await {
            assert_eq!(reason, None);
            break;
        }
    }
    assert!(!client.is_connected());
    assert!(!client.is_ready());

    // Nothing dials back in after the session ends.
    sleep(Duration::from_millis(300)).await;
    assert_eq!(server.accepts.load(Ordering::SeqCst), 1);
    assert!(events.recv().await.is_none());
    Ok(())
}

#[tokio::test]
async fn rotation_hands_back_the_recording_written_so_far() -> Result<()> {
    let server = wire_server().await?;
    let temp = TempDir::new()?;
    let mut config = test_config(server.addr);
    config.recording_dir = Some(temp.path().to_path_buf());

    let (client, mut events) = LiveClient::connect(config, null_sink()).await?;
    assert_eq!(next_event(&mut events).await, LiveEvent::Connected);

    for _ in 0..5 {
        client.send_audio(mic_block(20)).await;
    }

    // Commands are processed in order, so the rotation sees all five blocks.
    let recording = client
        .rotate_recording()
        .await
        .expect("a recording should exist after audio was sent");
    assert!(recording.path.exists());
    assert!(
        recording.duration_secs > 0.09,
        "five 20ms blocks should be on disk, got {}s",
        recording.duration_secs
    );

    // Nothing new since the rotation, so there is nothing to hand back.
    assert!(client.rotate_recording().await.is_none());

    client.disconnect().await;
    Ok(())
}
