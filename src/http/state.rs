use crate::provider::ProviderConnector;
use crate::relay::{RelayShared, RelaySettings};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tokio::time::Instant;
use tracing::info;

/// Shared application state for HTTP and WebSocket handlers
#[derive(Clone)]
pub struct AppState {
    /// Live relays (connection_id → shared view). Observability only.
    pub relays: Arc<RwLock<HashMap<String, Arc<RelayShared>>>>,

    /// Opens provider connections for new sessions
    pub connector: Arc<dyn ProviderConnector>,

    pub settings: RelaySettings,

    pub started_at: Instant,

    shutdown: Arc<watch::Sender<bool>>,
}

impl AppState {
    pub fn new(connector: Arc<dyn ProviderConnector>, settings: RelaySettings) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            relays: Arc::new(RwLock::new(HashMap::new())),
            connector,
            settings,
            started_at: Instant::now(),
            shutdown: Arc::new(shutdown),
        }
    }

    /// Receiver that flips to `true` when the process is shutting down
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Ask every live relay to close its provider session and finish
    pub fn close_all(&self) {
        info!("Closing all live relays");
        self.shutdown.send_replace(true);
    }

    pub async fn register(&self, relay: Arc<RelayShared>) {
        let mut relays = self.relays.write().await;
        relays.insert(relay.connection_id.clone(), relay);
    }

    pub async fn unregister(&self, connection_id: &str) {
        let mut relays = self.relays.write().await;
        relays.remove(connection_id);
    }

    pub async fn active_relays(&self) -> usize {
        self.relays.read().await.len()
    }
}
