use std::sync::Arc;

use vx_domain::config::Config;
use vx_store::calls::CallStore;
use vx_store::events::EventStore;
use vx_store::secrets::SecretBox;
use vx_store::tools::ToolStore;

use vx_domain::Result;

use crate::bridge::CarrierBridges;
use crate::llm::LlmClient;
use crate::session::turns::TurnQueues;
use crate::session::SessionManager;
use crate::tools::executor::ToolExecutor;

/// Shared application state passed to all API handlers.
///
/// The session map, turn queues and carrier bridges are confined to
/// this process — each call pins to one connector replica, so a call
/// handled elsewhere is legitimately invisible here.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub calls: CallStore,
    pub events: EventStore,
    pub tools: ToolStore,
    pub sessions: Arc<SessionManager>,
    pub turns: Arc<TurnQueues>,
    pub bridges: Arc<CarrierBridges>,
    pub llm: Arc<LlmClient>,
    pub executor: Arc<ToolExecutor>,
}

impl AppState {
    pub fn new(config: Arc<Config>, pool: sqlx::PgPool) -> Result<Self> {
        let calls = CallStore::new(pool.clone());
        let events = EventStore::new(pool.clone());
        let tools = ToolStore::new(pool);

        let secrets = if config.secrets.key_hex.is_empty() {
            None
        } else {
            Some(SecretBox::from_hex_key(&config.secrets.key_hex)?)
        };

        let executor = Arc::new(ToolExecutor::new(
            calls.clone(),
            tools.clone(),
            events.clone(),
            secrets,
            config.clone(),
        )?);

        Ok(Self {
            sessions: Arc::new(SessionManager::new(config.clone())),
            turns: Arc::new(TurnQueues::new()),
            bridges: Arc::new(CarrierBridges::new()),
            llm: Arc::new(LlmClient::new(config.llm.clone())?),
            executor,
            calls,
            events,
            tools,
            config,
        })
    }
}
