//! Session bookkeeping for peers connected over RUDP
//!
//! This module bridges protocol callbacks into the application:
//! - [`SessionHandler`] forwards every connection event into a channel
//! - [`SessionHandlerFactory`] hands one such handler to each new connection
//! - [`SessionRegistry`] assigns session IDs and enforces the capacity limit
//!
//! Handlers run inside the endpoint's event loop and must never block, so
//! they only push events; the application consumes them on its own schedule.

use log::{debug, info};
use rudp::{Address, Handler, HandlerFactory};
use std::collections::HashMap;
use std::time::Instant;
use tokio::sync::mpsc;

/// Identifier assigned to each accepted session
pub type SessionId = u32;

/// Connection lifecycle events delivered to the application
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A connection to `peer` was created, reachable through `relay`
    Connected { peer: Address, relay: Address },
    /// A complete message arrived from `peer`
    Message { peer: Address, payload: Vec<u8> },
    /// The connection to `peer` shut down
    Closed { peer: Address },
}

/// Handler that forwards connection callbacks as [`SessionEvent`]s
pub struct SessionHandler {
    peer: Address,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionHandler {
    pub fn new(peer: Address, events: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self { peer, events }
    }

    fn emit(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            debug!("Session events for {} dropped: receiver gone", self.peer);
        }
    }
}

impl Handler for SessionHandler {
    fn receive_message(&mut self, message: Vec<u8>) {
        self.emit(SessionEvent::Message {
            peer: self.peer.clone(),
            payload: message,
        });
    }

    fn handle_shutdown(&mut self) {
        self.emit(SessionEvent::Closed {
            peer: self.peer.clone(),
        });
    }
}

/// Creates a [`SessionHandler`] per connection, all feeding one channel
#[derive(Clone)]
pub struct SessionHandlerFactory {
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionHandlerFactory {
    /// Creates the factory together with the receiving end of its events
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (Self { events }, rx)
    }
}

impl HandlerFactory for SessionHandlerFactory {
    fn make_new_handler(
        &mut self,
        _own_addr: &Address,
        source_addr: &Address,
        relay_addr: &Address,
    ) -> Box<dyn Handler> {
        let handler = SessionHandler::new(source_addr.clone(), self.events.clone());
        handler.emit(SessionEvent::Connected {
            peer: source_addr.clone(),
            relay: relay_addr.clone(),
        });
        Box::new(handler)
    }
}

/// State kept for one accepted peer
#[derive(Debug)]
pub struct Session {
    /// Unique session identifier assigned by the registry
    pub id: SessionId,
    /// Peer address as declared in its packets
    pub peer: Address,
    /// Address its datagrams physically arrive from
    pub relay: Address,
    /// When the session was accepted
    pub connected_at: Instant,
    /// Last time a message arrived
    pub last_seen: Instant,
    pub messages_received: u64,
    pub bytes_received: u64,
}

impl Session {
    pub fn new(id: SessionId, peer: Address, relay: Address) -> Self {
        let now = Instant::now();
        Self {
            id,
            peer,
            relay,
            connected_at: now,
            last_seen: now,
            messages_received: 0,
            bytes_received: 0,
        }
    }

    /// Counts a received message and refreshes the activity timestamp
    pub fn record_message(&mut self, len: usize) {
        self.last_seen = Instant::now();
        self.messages_received += 1;
        self.bytes_received += len as u64;
    }
}

/// Tracks accepted sessions and enforces the server's capacity
///
/// Sessions are keyed by ID; a secondary index maps the peer address back to
/// its session so protocol events can be attributed.
pub struct SessionRegistry {
    sessions: HashMap<SessionId, Session>,
    by_peer: HashMap<Address, SessionId>,
    next_session_id: SessionId,
    max_sessions: usize,
}

impl SessionRegistry {
    /// Creates an empty registry accepting at most `max_sessions` peers
    ///
    /// Session IDs start from 1 and increase for each accepted peer.
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: HashMap::new(),
            by_peer: HashMap::new(),
            next_session_id: 1,
            max_sessions,
        }
    }

    /// Accepts a new peer
    ///
    /// Returns the new session ID, the existing one if the peer is already
    /// registered, or None when the registry is full.
    pub fn add_session(&mut self, peer: Address, relay: Address) -> Option<SessionId> {
        if let Some(&id) = self.by_peer.get(&peer) {
            return Some(id);
        }
        if self.is_full() {
            return None;
        }

        let id = self.next_session_id;
        self.next_session_id += 1;

        info!("Session {} opened for {} (via {})", id, peer, relay);
        self.by_peer.insert(peer.clone(), id);
        self.sessions.insert(id, Session::new(id, peer, relay));
        Some(id)
    }

    /// Removes a session by ID, returning true if it existed
    pub fn remove_session(&mut self, id: SessionId) -> bool {
        match self.sessions.remove(&id) {
            Some(session) => {
                self.by_peer.remove(&session.peer);
                info!(
                    "Session {} closed ({} messages, {} bytes)",
                    id, session.messages_received, session.bytes_received
                );
                true
            }
            None => false,
        }
    }

    /// Removes the session of `peer`, returning its ID
    pub fn remove_by_peer(&mut self, peer: &Address) -> Option<SessionId> {
        let id = self.find_by_peer(peer)?;
        self.remove_session(id);
        Some(id)
    }

    pub fn find_by_peer(&self, peer: &Address) -> Option<SessionId> {
        self.by_peer.get(peer).copied()
    }

    pub fn get(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    /// Counts a message against the peer's session; false if unknown
    pub fn record_message(&mut self, peer: &Address, len: usize) -> bool {
        let Some(id) = self.find_by_peer(peer) else {
            return false;
        };
        match self.sessions.get_mut(&id) {
            Some(session) => {
                session.record_message(len);
                true
            }
            None => false,
        }
    }

    pub fn peers(&self) -> Vec<Address> {
        self.by_peer.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.sessions.len() >= self.max_sessions
    }
}
