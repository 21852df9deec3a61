//! Composition root.
//!
//! One [`RealtimeCore`] owns explicit instances of the session, registry and
//! router with an init/teardown pair, instead of process-wide singletons.
//! The embedding shell constructs it once and passes handles down to
//! whatever needs them.

use crate::config::CoreConfig;
use crate::notify::handlers::{GeneralHandler, LocationShareHandler, PostEngagementHandler};
use crate::notify::NotificationRouter;
use crate::registry::SharedLocationRegistry;
use crate::session::transport::{Transport, WsTransport};
use crate::session::RealtimeEventSession;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

pub struct RealtimeCore {
    pub session: RealtimeEventSession,
    pub registry: SharedLocationRegistry,
    pub router: NotificationRouter,
    sweeper: JoinHandle<()>,
}

impl RealtimeCore {
    pub fn init(config: CoreConfig) -> Self {
        let transport = Arc::new(WsTransport::new(config.ws_endpoint.clone()));
        Self::init_with_transport(config, transport)
    }

    /// Wire the core around an explicit transport; tests inject doubles here.
    pub fn init_with_transport(config: CoreConfig, transport: Arc<dyn Transport>) -> Self {
        let registry = SharedLocationRegistry::from_config(&config);
        let sweeper = registry.spawn_sweeper(Duration::from_secs(config.sweep_interval_secs));

        let mut router = NotificationRouter::new();
        router.register(Arc::new(PostEngagementHandler));
        router.register(Arc::new(LocationShareHandler::new(registry.clone())));
        router.register(Arc::new(GeneralHandler));

        let session = RealtimeEventSession::spawn(config, transport);

        Self {
            session,
            registry,
            router,
            sweeper,
        }
    }

    /// Tear everything down: disconnect the session, stop the sweeper and
    /// cancel every pending registry timer.
    pub async fn shutdown(self) {
        let _ = self.session.disconnect();
        self.sweeper.abort();
        self.registry.clear().await;
    }
}
