use std::sync::Arc;

use vx_domain::config::Config;
use vx_store::calls::CallStore;
use vx_store::dispatches::DispatchStore;
use vx_store::events::EventStore;

/// Shared application state passed to all API handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub calls: CallStore,
    pub events: EventStore,
    pub dispatches: DispatchStore,
}

impl AppState {
    pub fn new(config: Arc<Config>, pool: sqlx::PgPool) -> Self {
        Self {
            config,
            calls: CallStore::new(pool.clone()),
            events: EventStore::new(pool.clone()),
            dispatches: DispatchStore::new(pool),
        }
    }
}
