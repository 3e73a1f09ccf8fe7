//! Recording fakes shared by the unit tests

use std::cell::RefCell;
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::rc::Rc;

use crate::address::Address;
use crate::handler::{Handler, HandlerFactory};
use crate::io::DatagramSocket;
use crate::packet::Packet;

pub fn own_addr() -> Address {
    Address::new("10.0.0.1", 9000)
}

pub fn peer_addr() -> Address {
    Address::new("10.0.0.2", 9001)
}

/// Decodes every recorded datagram, panicking on garbage
pub fn decode_all(datagrams: &[(Vec<u8>, SocketAddr)]) -> Vec<(Packet, SocketAddr)> {
    datagrams
        .iter()
        .map(|(bytes, addr)| (Packet::decode(bytes).unwrap(), *addr))
        .collect()
}

/// Socket that records instead of sending
#[derive(Debug)]
pub struct RecordingSocket {
    local_addr: SocketAddr,
    sent: Vec<(Vec<u8>, SocketAddr)>,
    closed: bool,
}

impl RecordingSocket {
    pub fn new() -> Self {
        Self::with_local_addr(own_addr().to_socket_addr().unwrap())
    }

    pub fn with_local_addr(local_addr: SocketAddr) -> Self {
        Self {
            local_addr,
            sent: Vec::new(),
            closed: false,
        }
    }

    pub fn sent(&self) -> &[(Vec<u8>, SocketAddr)] {
        &self.sent
    }

    pub fn take_sent(&mut self) -> Vec<(Vec<u8>, SocketAddr)> {
        std::mem::take(&mut self.sent)
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl DatagramSocket for RecordingSocket {
    fn send_to(&mut self, datagram: &[u8], addr: SocketAddr) -> io::Result<()> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "socket closed"));
        }
        self.sent.push((datagram.to_vec(), addr));
        Ok(())
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.local_addr)
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

#[derive(Debug, Default)]
pub struct HandlerLog {
    pub messages: Vec<Vec<u8>>,
    pub shutdowns: usize,
}

pub type SharedLog = Rc<RefCell<HandlerLog>>;

/// Handler that appends everything it sees to a shared log
pub struct RecordingHandler {
    log: SharedLog,
}

impl RecordingHandler {
    pub fn new() -> (Self, SharedLog) {
        let log = SharedLog::default();
        (Self { log: log.clone() }, log)
    }
}

impl Handler for RecordingHandler {
    fn receive_message(&mut self, message: Vec<u8>) {
        self.log.borrow_mut().messages.push(message);
    }

    fn handle_shutdown(&mut self) {
        self.log.borrow_mut().shutdowns += 1;
    }
}

/// Hands out recording handlers and remembers them per peer
#[derive(Clone, Default)]
pub struct RecordingHandlerFactory {
    created: Rc<RefCell<Vec<(Address, Address, Address)>>>,
    logs: Rc<RefCell<HashMap<Address, SharedLog>>>,
}

impl RecordingHandlerFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(own, source, relay)` for every handler made so far
    pub fn created(&self) -> Vec<(Address, Address, Address)> {
        self.created.borrow().clone()
    }

    /// Log of the most recent handler made for `peer`
    pub fn log(&self, peer: &Address) -> Option<SharedLog> {
        self.logs.borrow().get(peer).cloned()
    }

    pub fn messages(&self, peer: &Address) -> Vec<Vec<u8>> {
        self.log(peer)
            .map(|log| log.borrow().messages.clone())
            .unwrap_or_default()
    }

    pub fn shutdowns(&self, peer: &Address) -> usize {
        self.log(peer).map(|log| log.borrow().shutdowns).unwrap_or(0)
    }
}

impl HandlerFactory for RecordingHandlerFactory {
    fn make_new_handler(
        &mut self,
        own_addr: &Address,
        source_addr: &Address,
        relay_addr: &Address,
    ) -> Box<dyn Handler> {
        self.created
            .borrow_mut()
            .push((own_addr.clone(), source_addr.clone(), relay_addr.clone()));
        let (handler, log) = RecordingHandler::new();
        self.logs.borrow_mut().insert(source_addr.clone(), log);
        Box::new(handler)
    }
}
