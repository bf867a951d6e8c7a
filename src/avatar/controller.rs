// Dual-buffer avatar playback.
//
// Two slots alternate ownership of the screen: a clip switch loads into the
// inactive slot, waits for readiness, flips opacities, and tears the old
// slot down only after the crossfade delay. The teardown is a scheduled task
// cancelled by whichever switch supersedes it, so content is cleared exactly
// once per switch, never under a visible slot.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::clip::Clip;
use super::player::{ClockPlayer, PlayerEvent, PlayerItem, Readiness, SlotPlayer};

pub type PlaybackCallback = Box<dyn FnOnce() + Send + 'static>;

pub const DEFAULT_CROSSFADE_MS: u64 = 160;

/// What a slot currently holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotContent {
    /// Single clip looping indefinitely
    Loop(String),
    /// One-shot chain of clips, in order
    Once(Vec<String>),
    /// One-shot clip followed by an indefinite loop
    OnceThenLoop { once: String, then: String },
}

struct Slot {
    player: Box<dyn SlotPlayer>,
    content: Option<SlotContent>,
    opacity: f32,
}

struct Inner {
    slots: [Slot; 2],
    active: Option<usize>,
    paused: bool,
    generation: u64,
    teardown: Option<JoinHandle<()>>,
}

#[derive(Debug, Clone)]
pub struct SlotSnapshot {
    pub content: Option<SlotContent>,
    pub opacity: f32,
    pub playing: bool,
}

#[derive(Debug, Clone)]
pub struct ControllerSnapshot {
    pub active: Option<usize>,
    pub paused: bool,
    pub slots: Vec<SlotSnapshot>,
}

/// Flicker-free avatar clip switching over two player slots.
pub struct AvatarController {
    inner: Arc<Mutex<Inner>>,
    crossfade: Duration,
}

impl AvatarController {
    pub fn new(
        player_a: Box<dyn SlotPlayer>,
        player_b: Box<dyn SlotPlayer>,
        crossfade: Duration,
    ) -> Self {
        let slot = |player| Slot {
            player,
            content: None,
            opacity: 0.0,
        };
        Self {
            inner: Arc::new(Mutex::new(Inner {
                slots: [slot(player_a), slot(player_b)],
                active: None,
                paused: false,
                generation: 0,
                teardown: None,
            })),
            crossfade,
        }
    }

    pub fn with_clock_players(crossfade: Duration) -> Self {
        Self::new(
            Box::new(ClockPlayer::new("slot-a")),
            Box::new(ClockPlayer::new("slot-b")),
            crossfade,
        )
    }

    /// Loop `clip` indefinitely. No-op when `clip` is already the active
    /// looping content and playback is not paused.
    pub async fn play_loop(&self, clip: Clip) {
        let mut inner = self.inner.lock().await;
        if !inner.paused {
            if let Some(active) = inner.active {
                if inner.slots[active].content == Some(SlotContent::Loop(clip.name.clone())) {
                    debug!("Loop '{}' already active, ignoring", clip.name);
                    return;
                }
            }
        }

        cancel_teardown(&mut inner);
        let target = target_slot(&inner);
        let _events = inner.slots[target].player.load(vec![PlayerItem::looping(clip.clone())]);
        inner.slots[target].content = Some(SlotContent::Loop(clip.name.clone()));
        self.wait_ready(&mut inner, target, &clip).await;
        self.activate(&mut inner, target);
    }

    /// Play `clip` once; `on_complete` fires exactly once at end-of-item. A
    /// switch that supersedes the item before it ends discards the callback.
    pub async fn play_once(&self, clip: Clip, on_complete: Option<PlaybackCallback>) {
        let mut inner = self.inner.lock().await;
        cancel_teardown(&mut inner);
        let target = target_slot(&inner);
        let mut events = inner.slots[target].player.load(vec![PlayerItem::once(clip.clone())]);
        inner.slots[target].content = Some(SlotContent::Once(vec![clip.name.clone()]));
        self.wait_ready(&mut inner, target, &clip).await;
        self.activate(&mut inner, target);
        drop(inner);

        if let Some(callback) = on_complete {
            tokio::spawn(async move {
                while let Some(event) = events.recv().await {
                    if event == (PlayerEvent::ItemFinished { index: 0 }) {
                        callback();
                        break;
                    }
                }
            });
        }
    }

    /// Play `once` then loop `then` in the same slot. `on_loop_start` fires
    /// exactly once when the loop takes over. Degrades to [`play_loop`] when
    /// both clips are the same asset.
    ///
    /// [`play_loop`]: AvatarController::play_loop
    pub async fn play_once_then_loop(
        &self,
        once: Clip,
        then: Clip,
        on_loop_start: Option<PlaybackCallback>,
    ) {
        if once == then {
            self.play_loop(then).await;
            if let Some(callback) = on_loop_start {
                callback();
            }
            return;
        }

        let mut inner = self.inner.lock().await;
        cancel_teardown(&mut inner);
        let target = target_slot(&inner);
        let mut events = inner.slots[target].player.load(vec![
            PlayerItem::once(once.clone()),
            PlayerItem::looping(then.clone()),
        ]);
        inner.slots[target].content = Some(SlotContent::OnceThenLoop {
            once: once.name.clone(),
            then: then.name.clone(),
        });
        self.wait_ready(&mut inner, target, &once).await;
        self.activate(&mut inner, target);
        drop(inner);

        if let Some(callback) = on_loop_start {
            tokio::spawn(async move {
                while let Some(event) = events.recv().await {
                    if event == (PlayerEvent::ItemFinished { index: 0 }) {
                        callback();
                        break;
                    }
                }
            });
        }
    }

    /// Play `clips` back-to-back; `on_complete` fires once after the last.
    pub async fn play_sequence(&self, clips: Vec<Clip>, on_complete: Option<PlaybackCallback>) {
        if clips.is_empty() {
            if let Some(callback) = on_complete {
                callback();
            }
            return;
        }

        let mut inner = self.inner.lock().await;
        cancel_teardown(&mut inner);
        let target = target_slot(&inner);
        let head = clips[0].clone();
        let last_index = clips.len() - 1;
        let names: Vec<String> = clips.iter().map(|c| c.name.clone()).collect();
        let items: Vec<PlayerItem> = clips.into_iter().map(PlayerItem::once).collect();
        let mut events = inner.slots[target].player.load(items);
        inner.slots[target].content = Some(SlotContent::Once(names));
        self.wait_ready(&mut inner, target, &head).await;
        self.activate(&mut inner, target);
        drop(inner);

        if let Some(callback) = on_complete {
            tokio::spawn(async move {
                while let Some(event) = events.recv().await {
                    if event == (PlayerEvent::ItemFinished { index: last_index }) {
                        callback();
                        break;
                    }
                }
            });
        }
    }

    /// Pause both slots. Content is kept; the next play call reloads.
    pub async fn stop(&self) {
        let mut inner = self.inner.lock().await;
        for slot in &mut inner.slots {
            slot.player.pause();
        }
        inner.paused = true;
    }

    pub async fn snapshot(&self) -> ControllerSnapshot {
        let inner = self.inner.lock().await;
        ControllerSnapshot {
            active: inner.active,
            paused: inner.paused,
            slots: inner
                .slots
                .iter()
                .map(|slot| SlotSnapshot {
                    content: slot.content.clone(),
                    opacity: slot.opacity,
                    playing: slot.player.is_playing(),
                })
                .collect(),
        }
    }

    async fn wait_ready(&self, inner: &mut Inner, target: usize, clip: &Clip) {
        if inner.slots[target].player.wait_ready().await == Readiness::Failed {
            // Fail open: a stalled activation is worse than a rough start.
            warn!("Clip '{}' never became ready, playing anyway", clip.name);
        }
    }

    /// Flip opacities to `target`, start it, and schedule teardown of the
    /// previously active slot after the crossfade delay.
    fn activate(&self, inner: &mut Inner, target: usize) {
        let previous = inner.active;
        inner.paused = false;
        for (index, slot) in inner.slots.iter_mut().enumerate() {
            slot.opacity = if index == target { 1.0 } else { 0.0 };
        }
        inner.slots[target].player.play();
        inner.active = Some(target);
        inner.generation += 1;
        let generation = inner.generation;

        if let Some(previous) = previous {
            if previous != target && inner.slots[previous].content.is_some() {
                let shared = self.inner.clone();
                let delay = self.crossfade;
                inner.teardown = Some(tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let mut inner = shared.lock().await;
                    if inner.generation != generation {
                        return;
                    }
                    debug!("Tearing down faded-out slot {}", previous);
                    inner.slots[previous].player.clear();
                    inner.slots[previous].content = None;
                    inner.teardown = None;
                }));
            }
        }
    }
}

fn cancel_teardown(inner: &mut Inner) {
    if let Some(teardown) = inner.teardown.take() {
        teardown.abort();
    }
}

/// The inactive slot when the active one holds content, else the active slot.
/// First playback lands in slot 0 with no fade.
fn target_slot(inner: &Inner) -> usize {
    match inner.active {
        Some(active) if inner.slots[active].content.is_some() => 1 - active,
        Some(active) => active,
        None => 0,
    }
}
