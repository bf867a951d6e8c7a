use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::clip::Clip;

/// One queued playback item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerItem {
    pub clip: Clip,
    pub looping: bool,
}

impl PlayerItem {
    pub fn once(clip: Clip) -> Self {
        Self {
            clip,
            looping: false,
        }
    }

    pub fn looping(clip: Clip) -> Self {
        Self {
            clip,
            looping: true,
        }
    }
}

/// Outcome of waiting for the head item to buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerEvent {
    /// A non-looping item reached its end. `index` is the item's position in
    /// the loaded queue.
    ItemFinished { index: usize },
}

/// One playback slot
///
/// The real renderer plugs in behind this trait; the bundled [`ClockPlayer`]
/// advances the queue on item durations, which is enough to drive the
/// controller headless and in tests.
#[async_trait::async_trait]
pub trait SlotPlayer: Send + Sync {
    /// Replace the queue with `items`. Finish events for this load arrive on
    /// the returned receiver; a later load ends the previous receiver.
    fn load(&mut self, items: Vec<PlayerItem>) -> mpsc::Receiver<PlayerEvent>;

    /// Resolves once the head item can start rendering, or reports failure.
    async fn wait_ready(&mut self) -> Readiness;

    fn play(&mut self);

    fn pause(&mut self);

    fn clear(&mut self);

    fn is_playing(&self) -> bool;
}

/// Timer-driven slot player: each non-looping item finishes after its clip
/// duration; a looping item holds the slot until the next load or clear.
pub struct ClockPlayer {
    label: String,
    items: Vec<PlayerItem>,
    position: Arc<AtomicUsize>,
    playing: bool,
    events_tx: Option<mpsc::Sender<PlayerEvent>>,
    ticker: Option<JoinHandle<()>>,
    ready_delay: Duration,
}

impl ClockPlayer {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            items: Vec::new(),
            position: Arc::new(AtomicUsize::new(0)),
            playing: false,
            events_tx: None,
            ticker: None,
            ready_delay: Duration::ZERO,
        }
    }

    /// Simulated buffering delay before `wait_ready` resolves.
    pub fn with_ready_delay(mut self, delay: Duration) -> Self {
        self.ready_delay = delay;
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    fn stop_ticker(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }
}

#[async_trait::async_trait]
impl SlotPlayer for ClockPlayer {
    fn load(&mut self, items: Vec<PlayerItem>) -> mpsc::Receiver<PlayerEvent> {
        self.stop_ticker();
        self.items = items;
        self.position.store(0, Ordering::SeqCst);
        self.playing = false;
        let (tx, rx) = mpsc::channel(8);
        self.events_tx = Some(tx);
        rx
    }

    async fn wait_ready(&mut self) -> Readiness {
        if !self.ready_delay.is_zero() {
            tokio::time::sleep(self.ready_delay).await;
        }
        Readiness::Ready
    }

    fn play(&mut self) {
        if self.playing || self.items.is_empty() {
            return;
        }
        self.playing = true;

        let items = self.items.clone();
        let position = self.position.clone();
        let events_tx = self.events_tx.clone();

        self.ticker = Some(tokio::spawn(async move {
            let mut index = position.load(Ordering::SeqCst);
            while index < items.len() {
                let item = &items[index];
                if item.looping {
                    // A looping item holds the slot; nothing left to report.
                    break;
                }
                tokio::time::sleep(Duration::from_millis(item.clip.duration_ms.max(1))).await;
                index += 1;
                position.store(index, Ordering::SeqCst);
                if let Some(tx) = &events_tx {
                    if tx
                        .send(PlayerEvent::ItemFinished { index: index - 1 })
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
            }
        }));
    }

    fn pause(&mut self) {
        self.stop_ticker();
        self.playing = false;
    }

    fn clear(&mut self) {
        self.stop_ticker();
        self.items.clear();
        self.position.store(0, Ordering::SeqCst);
        self.events_tx = None;
        self.playing = false;
    }

    fn is_playing(&self) -> bool {
        self.playing
    }
}
