use std::sync::Arc;

use shared::{
    domain::{UserId, UserSummary},
    protocol::ClientRequest,
};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::transport::{TransportConnector, TransportError, TransportEvent, TransportHandle};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityStatus {
    Pending,
    Confirmed(UserSummary),
    Failed,
}

struct ActiveConnection {
    id: u64,
    token: String,
    user_id: UserId,
    handle: TransportHandle,
}

/// Result of reconciling the desired connection state with the actual one.
pub enum ConnectionChange {
    Unchanged,
    Opened {
        connection_id: u64,
        user_id: UserId,
        inbound: mpsc::Receiver<TransportEvent>,
    },
    Closed,
    Failed(TransportError),
}

/// Keeps exactly one live connection while a token and a confirmed identity
/// are both present, and none otherwise.
pub struct ConnectionManager {
    connector: Arc<dyn TransportConnector>,
    token: Option<String>,
    identity: IdentityStatus,
    active: Option<ActiveConnection>,
    next_id: u64,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn TransportConnector>) -> Self {
        Self {
            connector,
            token: None,
            identity: IdentityStatus::Pending,
            active: None,
            next_id: 0,
        }
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn identity(&self) -> &IdentityStatus {
        &self.identity
    }

    pub fn is_connected(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| !active.handle.is_closed())
    }

    pub fn connection_id(&self) -> Option<u64> {
        self.active.as_ref().map(|active| active.id)
    }

    pub async fn set_token(&mut self, token: Option<String>) -> ConnectionChange {
        if self.token != token {
            // A new token invalidates whatever identity was confirmed for the old one.
            if self.token.is_some() && token.is_some() {
                self.identity = IdentityStatus::Pending;
            }
            self.token = token;
        }
        self.reconcile().await
    }

    pub async fn set_identity(&mut self, identity: IdentityStatus) -> ConnectionChange {
        self.identity = identity;
        self.reconcile().await
    }

    pub fn send(&self, request: ClientRequest) -> Result<(), TransportError> {
        let active = self.active.as_ref().ok_or(TransportError::Closed)?;
        active.handle.send(request)
    }

    /// Forgets a connection whose transport reported itself closed. Ignored
    /// when `connection_id` no longer names the active connection.
    pub fn mark_closed(&mut self, connection_id: u64) -> bool {
        if self.connection_id() != Some(connection_id) {
            return false;
        }
        self.active = None;
        true
    }

    pub async fn shutdown(&mut self) -> ConnectionChange {
        self.token = None;
        self.identity = IdentityStatus::Pending;
        self.reconcile().await
    }

    async fn reconcile(&mut self) -> ConnectionChange {
        let desired = match (&self.token, &self.identity) {
            (Some(token), IdentityStatus::Confirmed(user)) => Some((token.clone(), user.id)),
            _ => None,
        };

        match (desired, self.active.take()) {
            (None, None) => ConnectionChange::Unchanged,
            (None, Some(active)) => {
                info!(user_id = active.user_id.0, "connection: closing realtime channel");
                active.handle.close().await;
                ConnectionChange::Closed
            }
            (Some((token, user_id)), Some(active))
                if active.token == token && active.user_id == user_id =>
            {
                self.active = Some(active);
                ConnectionChange::Unchanged
            }
            (Some((token, user_id)), stale) => {
                if let Some(stale) = stale {
                    stale.handle.close().await;
                }
                self.open(token, user_id).await
            }
        }
    }

    async fn open(&mut self, token: String, user_id: UserId) -> ConnectionChange {
        match self.connector.connect(&token).await {
            Ok(session) => {
                self.next_id += 1;
                let connection_id = self.next_id;
                info!(user_id = user_id.0, connection_id, "connection: realtime channel open");
                self.active = Some(ActiveConnection {
                    id: connection_id,
                    token,
                    user_id,
                    handle: session.handle,
                });
                ConnectionChange::Opened {
                    connection_id,
                    user_id,
                    inbound: session.inbound,
                }
            }
            Err(err) => {
                warn!(user_id = user_id.0, %err, "connection: failed to open realtime channel");
                ConnectionChange::Failed(err)
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/connection_tests.rs"]
mod tests;
