//! Gateway session management module
//!
//! This module authenticates gateway sessions, keeps the registry of live
//! connections and exposes downlink scheduling across them.

mod auth;
mod connection;
mod frontend;
mod registry;

pub use self::auth::{Authenticator, StaticAuthenticator};
pub use self::connection::Connection;
pub use self::frontend::{Frontend, Session};
pub use self::registry::ConnectionRegistry;

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::core::{Config, Result};
use crate::protocol::{DownlinkMessage, DownlinkPath};
use crate::scheduling::{DownlinkScheduler, FrequencyPlanStore, ScheduleResult};

/// Gateway server that owns the live connection registry
pub struct GatewayServer {
    config: Config,
    authenticator: Arc<dyn Authenticator>,
    frequency_plans: Arc<dyn FrequencyPlanStore>,
    registry: Arc<ConnectionRegistry>,
    scheduler: DownlinkScheduler,
    /// Parent of every session's cancellation token
    cancel: CancellationToken,
    connections_tx: broadcast::Sender<Arc<Connection>>,
}

impl GatewayServer {
    /// Creates a new gateway server
    pub fn new(
        config: Config,
        authenticator: Arc<dyn Authenticator>,
        frequency_plans: Arc<dyn FrequencyPlanStore>,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let (connections_tx, _) = broadcast::channel(16);
        GatewayServer {
            config,
            authenticator,
            frequency_plans,
            scheduler: DownlinkScheduler::new(Arc::clone(&registry)),
            registry,
            cancel: CancellationToken::new(),
            connections_tx,
        }
    }

    /// Authenticates a gateway and establishes its session.
    ///
    /// A previous session of the same gateway is replaced and closed. Denied
    /// credentials leave no trace in the registry.
    pub async fn connect(&self, uid: &str, key: &str) -> Result<Arc<Connection>> {
        let ids = match self.authenticator.authenticate(uid, key).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(gateway_uid = uid, error = %e, "gateway authentication failed");
                return Err(e);
            }
        };

        let connection = Arc::new(Connection::new(
            ids,
            self.config.clone(),
            Arc::clone(&self.frequency_plans),
            self.cancel.child_token(),
        ));
        if let Some(previous) = self.registry.insert(Arc::clone(&connection)) {
            info!(gateway_uid = %previous.gateway(), "replacing existing gateway session");
            previous.close();
        }

        let registry = Arc::clone(&self.registry);
        let watched = Arc::clone(&connection);
        tokio::spawn(async move {
            watched.closed().await;
            if registry.remove(&watched) {
                info!(gateway_uid = %watched.gateway(), "gateway disconnected");
            }
        });

        info!(gateway_uid = %connection.gateway(), "gateway connected");
        // No subscribers is fine.
        let _ = self.connections_tx.send(Arc::clone(&connection));
        Ok(connection)
    }

    /// Retracts a session from the registry, then tears it down
    pub fn disconnect(&self, connection: &Arc<Connection>) {
        if self.registry.remove(connection) {
            info!(gateway_uid = %connection.gateway(), "gateway disconnected");
        }
        connection.close();
    }

    /// Subscribes to newly established connections
    pub fn connections(&self) -> broadcast::Receiver<Arc<Connection>> {
        self.connections_tx.subscribe()
    }

    /// Returns the live connection of a gateway
    pub fn get_connection(&self, uid: &str) -> Option<Arc<Connection>> {
        self.registry.get(uid)
    }

    pub fn scheduler(&self) -> &DownlinkScheduler {
        &self.scheduler
    }

    /// Schedules a downlink on the connection the path resolves to
    pub async fn schedule_down(&self, path: DownlinkPath, message: DownlinkMessage) -> Result<ScheduleResult> {
        self.scheduler.schedule_down(path, message).await
    }

    /// Tears down every session
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}
