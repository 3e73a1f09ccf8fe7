//! Outbound side of the protocol: the socket seam and the context handed to
//! connections while they run

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use log::warn;

use crate::address::Address;
use crate::scheduler::{Scheduler, Timer, TimerId};

/// Non-blocking datagram sink owned by the multiplexer
///
/// Implemented over a tokio `UdpSocket` by the endpoint and by recording
/// fakes in tests.
pub trait DatagramSocket {
    /// Writes one datagram
    ///
    /// Must not block.
    fn send_to(&mut self, datagram: &[u8], addr: SocketAddr) -> io::Result<()>;

    fn local_addr(&self) -> io::Result<SocketAddr>;

    /// Releases the socket
    ///
    /// Later sends fail.
    fn close(&mut self);
}

/// Everything a connection may touch outside itself: a way to emit datagrams
/// and a way to arm timers
pub struct Io<'a> {
    pub socket: &'a mut dyn DatagramSocket,
    pub scheduler: &'a mut dyn Scheduler,
}

impl<'a> Io<'a> {
    pub fn new(socket: &'a mut dyn DatagramSocket, scheduler: &'a mut dyn Scheduler) -> Self {
        Self { socket, scheduler }
    }

    /// Sends a datagram, best effort
    ///
    /// UDP is lossy anyway, so a failed write is logged and treated like a
    /// dropped packet.
    pub fn send_datagram(&mut self, datagram: &[u8], addr: &Address) {
        let Some(target) = addr.to_socket_addr() else {
            warn!("Cannot send to unparseable address {}", addr);
            return;
        };
        if let Err(e) = self.socket.send_to(datagram, target) {
            warn!("Failed to send {} bytes to {}: {}", datagram.len(), target, e);
        }
    }

    pub fn schedule(&mut self, delay: Duration, timer: Timer) -> TimerId {
        self.scheduler.schedule(delay, timer)
    }

    pub fn cancel(&mut self, id: TimerId) {
        self.scheduler.cancel(id);
    }
}
