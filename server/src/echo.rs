//! Echo service: sends every message back to the peer it came from

use crate::sessions::{SessionEvent, SessionRegistry};
use log::{info, warn};
use rudp::{EndpointHandle, RudpError};
use tokio::sync::mpsc;

/// Application loop consuming session events from one endpoint
pub struct EchoService {
    registry: SessionRegistry,
    endpoint: EndpointHandle,
}

impl EchoService {
    pub fn new(endpoint: EndpointHandle, max_sessions: usize) -> Self {
        Self {
            registry: SessionRegistry::new(max_sessions),
            endpoint,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Applies one event
    ///
    /// New peers beyond capacity are shut down right away. Closed
    /// connections are unregistered from the endpoint so the peer can
    /// connect again later.
    pub fn handle_event(&mut self, event: SessionEvent) -> Result<(), RudpError> {
        match event {
            SessionEvent::Connected { peer, relay } => {
                if self.registry.add_session(peer.clone(), relay).is_none() {
                    warn!("Server full, refusing {}", peer);
                    self.endpoint.shutdown_connection(peer)?;
                }
            }
            SessionEvent::Message { peer, payload } => {
                if self.registry.record_message(&peer, payload.len()) {
                    self.endpoint.send_message(peer, payload)?;
                }
            }
            SessionEvent::Closed { peer } => {
                self.registry.remove_by_peer(&peer);
                self.endpoint.unregister(peer)?;
            }
        }
        Ok(())
    }

    /// Runs until the event stream ends or the endpoint stops
    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<SessionEvent>) {
        while let Some(event) = events.recv().await {
            match self.handle_event(event) {
                Ok(()) => {}
                Err(RudpError::EndpointClosed) => break,
                Err(e) => warn!("Failed to handle session event: {}", e),
            }
        }
        info!("Echo service stopped with {} open sessions", self.registry.len());
    }
}
