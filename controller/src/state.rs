use std::sync::atomic::{AtomicUsize, Ordering};

use nekoproxy_store::Store;

use crate::config::Config;

/// Shared state handed to every axum handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub config: std::sync::Arc<Config>,
    round_robin_cursor: std::sync::Arc<AtomicUsize>,
}

impl AppState {
    pub fn new(store: Store, config: Config) -> Self {
        Self {
            store,
            config: std::sync::Arc::new(config),
            round_robin_cursor: std::sync::Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Advances and returns the next round-robin cursor value, used by
    /// `agent_manager::get_next_agent`.
    pub fn next_round_robin_index(&self) -> usize {
        self.round_robin_cursor.fetch_add(1, Ordering::Relaxed)
    }

    /// Resets the cursor; the Agent Manager does this on every registration
    /// (spec §4.1: "the round-robin selector ... is invalidated on create").
    pub fn reset_round_robin(&self) {
        self.round_robin_cursor.store(0, Ordering::Relaxed);
    }
}
