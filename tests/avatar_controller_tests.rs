// Controller behavior against an instrumented slot player: load and clear
// accounting that the in-module tests cannot see from the outside.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use nestling::avatar::{
    AvatarController, Clip, PlayerEvent, PlayerItem, Readiness, SlotPlayer,
};

#[derive(Clone, Default)]
struct Counters {
    loads: Arc<AtomicUsize>,
    clears: Arc<AtomicUsize>,
}

impl Counters {
    fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    fn clears(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }
}

/// Slot player that is always instantly ready and only counts calls.
struct CountingPlayer {
    counters: Counters,
    playing: bool,
    events_tx: Option<mpsc::Sender<PlayerEvent>>,
}

impl CountingPlayer {
    fn new() -> (Self, Counters) {
        let counters = Counters::default();
        (
            Self {
                counters: counters.clone(),
                playing: false,
                events_tx: None,
            },
            counters,
        )
    }
}

#[async_trait::async_trait]
impl SlotPlayer for CountingPlayer {
    fn load(&mut self, _items: Vec<PlayerItem>) -> mpsc::Receiver<PlayerEvent> {
        self.counters.loads.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(8);
        self.events_tx = Some(tx);
        rx
    }

    async fn wait_ready(&mut self) -> Readiness {
        Readiness::Ready
    }

    fn play(&mut self) {
        self.playing = true;
    }

    fn pause(&mut self) {
        self.playing = false;
    }

    fn clear(&mut self) {
        self.counters.clears.fetch_add(1, Ordering::SeqCst);
        self.playing = false;
        self.events_tx = None;
    }

    fn is_playing(&self) -> bool {
        self.playing
    }
}

fn clip(name: &str) -> Clip {
    Clip {
        name: name.to_string(),
        path: PathBuf::from(format!("/assets/{name}.mp4")),
        duration_ms: 400,
    }
}

fn counting_controller() -> (AvatarController, Counters, Counters) {
    let (player_a, counters_a) = CountingPlayer::new();
    let (player_b, counters_b) = CountingPlayer::new();
    let controller = AvatarController::new(
        Box::new(player_a),
        Box::new(player_b),
        Duration::from_millis(160),
    );
    (controller, counters_a, counters_b)
}

fn opaque_slots(snapshot: &nestling::avatar::ControllerSnapshot) -> usize {
    snapshot
        .slots
        .iter()
        .filter(|slot| slot.opacity == 1.0)
        .count()
}

#[tokio::test(start_paused = true)]
async fn degraded_once_then_loop_loads_exactly_once() {
    let (controller, counters_a, counters_b) = counting_controller();

    controller
        .play_once_then_loop(clip("idle_loop"), clip("idle_loop"), None)
        .await;

    assert_eq!(counters_a.loads() + counters_b.loads(), 1);
}

#[tokio::test(start_paused = true)]
async fn repeated_loop_does_not_reload() {
    let (controller, counters_a, counters_b) = counting_controller();

    controller.play_loop(clip("idle_loop")).await;
    controller.play_loop(clip("idle_loop")).await;
    controller.play_loop(clip("idle_loop")).await;

    assert_eq!(counters_a.loads(), 1);
    assert_eq!(counters_b.loads(), 0);
}

#[tokio::test(start_paused = true)]
async fn at_most_one_slot_opaque_through_switches() {
    let (controller, _a, _b) = counting_controller();

    controller.play_loop(clip("idle_loop")).await;
    assert_eq!(opaque_slots(&controller.snapshot().await), 1);

    controller.play_loop(clip("speaking_loop")).await;
    assert_eq!(opaque_slots(&controller.snapshot().await), 1);

    // Mid-crossfade, while the old slot still has content.
    tokio::time::advance(Duration::from_millis(80)).await;
    assert_eq!(opaque_slots(&controller.snapshot().await), 1);

    tokio::time::advance(Duration::from_millis(200)).await;
    assert_eq!(opaque_slots(&controller.snapshot().await), 1);

    controller.play_loop(clip("idle_loop")).await;
    assert_eq!(opaque_slots(&controller.snapshot().await), 1);
}

#[tokio::test(start_paused = true)]
async fn old_slot_cleared_once_after_crossfade() {
    let (controller, counters_a, counters_b) = counting_controller();

    controller.play_loop(clip("idle_loop")).await;
    controller.play_loop(clip("speaking_loop")).await;
    assert_eq!(counters_a.clears(), 0);

    tokio::time::advance(Duration::from_millis(200)).await;
    assert_eq!(counters_a.clears(), 1);
    assert_eq!(counters_b.clears(), 0);

    // Nothing else fires later.
    tokio::time::advance(Duration::from_secs(2)).await;
    assert_eq!(counters_a.clears(), 1);
}

#[tokio::test(start_paused = true)]
async fn superseding_switch_cancels_pending_teardown() {
    let (controller, counters_a, counters_b) = counting_controller();

    controller.play_loop(clip("idle_loop")).await; // slot 0
    controller.play_loop(clip("speaking_loop")).await; // slot 1, teardown armed for 0

    // Switch again before the crossfade elapses: slot 0 is reused as the
    // target, so the armed teardown must not fire on it.
    tokio::time::advance(Duration::from_millis(50)).await;
    controller.play_loop(clip("listening_loop")).await; // slot 0

    tokio::time::advance(Duration::from_millis(500)).await;
    let snapshot = controller.snapshot().await;

    // Only the superseded slot (1) was torn down, exactly once.
    assert_eq!(counters_a.clears(), 0);
    assert_eq!(counters_b.clears(), 1);
    assert_eq!(snapshot.active, Some(0));
    assert!(snapshot.slots[0].content.is_some());
    assert!(snapshot.slots[1].content.is_none());
}

#[tokio::test(start_paused = true)]
async fn sequence_callback_fires_after_last_item() {
    let controller = AvatarController::with_clock_players(Duration::from_millis(160));
    let fired = Arc::new(AtomicUsize::new(0));
    let fired_clone = fired.clone();

    controller
        .play_sequence(
            vec![clip("speaking_intro"), clip("speaking_outro")],
            Some(Box::new(move || {
                fired_clone.fetch_add(1, Ordering::SeqCst);
            })),
        )
        .await;

    // Two 400ms items: nothing after the first finishes.
    tokio::time::advance(Duration::from_millis(450)).await;
    tokio::task::yield_now().await;
    assert_eq!(fired.load(Ordering::SeqCst), 0);

    tokio::time::advance(Duration::from_millis(450)).await;
    tokio::task::yield_now().await;
    assert_eq!(fired.load(Ordering::SeqCst), 1);

    tokio::time::advance(Duration::from_secs(2)).await;
    tokio::task::yield_now().await;
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}
