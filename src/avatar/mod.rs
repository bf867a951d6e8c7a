pub mod clip;
pub mod controller;
pub mod player;

pub use clip::{clips, Clip, ClipLibrary};
pub use controller::{
    AvatarController, ControllerSnapshot, PlaybackCallback, SlotContent, SlotSnapshot,
    DEFAULT_CROSSFADE_MS,
};
pub use player::{ClockPlayer, PlayerEvent, PlayerItem, Readiness, SlotPlayer};
