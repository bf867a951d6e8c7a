use tokio::sync::watch;

use crate::conversation::EngineHandle;
use crate::coordinator::Banner;
use crate::handoff::SharedStore;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Command channel into the conversation engine
    pub engine: EngineHandle,
    /// Shared container, read for broadcast status
    pub store: SharedStore,
    /// Latest banner published by the coordinator
    pub banner: watch::Receiver<Option<Banner>>,
}

impl AppState {
    pub fn new(
        engine: EngineHandle,
        store: SharedStore,
        banner: watch::Receiver<Option<Banner>>,
    ) -> Self {
        Self {
            engine,
            store,
            banner,
        }
    }
}
