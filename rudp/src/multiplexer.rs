//! Many virtual connections over one UDP socket
//!
//! The multiplexer is the only owner of the socket and of the connection
//! table. Every inbound datagram goes through [`ConnectionMultiplexer::on_datagram`],
//! which applies the ban list and the relay policy before routing the packet
//! to the connection of its declared source, creating that connection when
//! the packet is a SYN from an unknown peer.

use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use log::{debug, info};

use crate::address::Address;
use crate::connection::{Connection, ConnectionState};
use crate::error::{RudpError, ValidationError};
use crate::handler::ConnectionFactory;
use crate::io::{DatagramSocket, Io};
use crate::packet::Packet;
use crate::scheduler::{Scheduler, Timer, TimerQueue};

/// Peer address to connection map
#[derive(Debug, Default)]
pub struct ConnectionTable {
    connections: HashMap<Address, Connection>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection, shutting down whatever was registered before
    pub fn insert(&mut self, io: &mut Io<'_>, addr: Address, connection: Connection) {
        if let Some(mut previous) = self.connections.remove(&addr) {
            info!("Replacing connection to {}", addr);
            previous.shutdown(io);
        }
        self.connections.insert(addr, connection);
    }

    pub fn remove(&mut self, addr: &Address) -> Option<Connection> {
        self.connections.remove(addr)
    }

    pub fn get(&self, addr: &Address) -> Option<&Connection> {
        self.connections.get(addr)
    }

    pub fn get_mut(&mut self, addr: &Address) -> Option<&mut Connection> {
        self.connections.get_mut(addr)
    }

    pub fn contains(&self, addr: &Address) -> bool {
        self.connections.contains_key(addr)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn addresses(&self) -> impl Iterator<Item = &Address> {
        self.connections.keys()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&Address, &mut Connection)> {
        self.connections.iter_mut()
    }
}

/// Routes datagrams between one socket and many connections
pub struct ConnectionMultiplexer<S, T = TimerQueue> {
    socket: S,
    scheduler: T,
    factory: Box<dyn ConnectionFactory>,
    connections: ConnectionTable,
    banned: HashSet<IpAddr>,
    public_ip: IpAddr,
    port: u16,
    relaying: bool,
}

impl<S: DatagramSocket, T: Scheduler> ConnectionMultiplexer<S, T> {
    /// Creates a multiplexer over a bound socket
    ///
    /// `public_ip` is the address peers use to reach this node; packets
    /// declaring any other destination are relayed when `relaying` is set
    /// and dropped otherwise.
    pub fn new(
        socket: S,
        scheduler: T,
        factory: Box<dyn ConnectionFactory>,
        public_ip: IpAddr,
        relaying: bool,
    ) -> Result<Self, RudpError> {
        let port = socket.local_addr()?.port();
        Ok(Self {
            socket,
            scheduler,
            factory,
            connections: ConnectionTable::new(),
            banned: HashSet::new(),
            public_ip,
            port,
            relaying,
        })
    }

    pub fn public_ip(&self) -> IpAddr {
        self.public_ip
    }

    /// Listening port of the socket
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn relaying(&self) -> bool {
        self.relaying
    }

    /// The address this node puts in the source field of its packets
    pub fn own_addr(&self) -> Address {
        Address::from_ip(self.public_ip, self.port)
    }

    pub fn connections(&self) -> &ConnectionTable {
        &self.connections
    }

    pub fn connection(&self, peer: &Address) -> Option<&Connection> {
        self.connections.get(peer)
    }

    pub fn socket(&self) -> &S {
        &self.socket
    }

    pub fn socket_mut(&mut self) -> &mut S {
        &mut self.socket
    }

    pub fn scheduler(&self) -> &T {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut T {
        &mut self.scheduler
    }

    pub fn ban_ip(&mut self, ip: IpAddr) {
        info!("Banning {}", ip);
        self.banned.insert(ip);
    }

    pub fn remove_ip_ban(&mut self, ip: IpAddr) {
        self.banned.remove(&ip);
    }

    pub fn is_banned(&self, ip: &IpAddr) -> bool {
        self.banned.contains(ip)
    }

    /// Handles one datagram read from the socket
    pub fn on_datagram(&mut self, datagram: &[u8], sender: SocketAddr) {
        let packet = match Packet::decode(datagram) {
            Ok(packet) => packet,
            Err(e) => {
                info!("Dropping bad datagram from {}: {}", sender, e);
                return;
            }
        };

        let declared_source = packet.source_addr().ip_addr();
        if self.banned.contains(&sender.ip())
            || declared_source.is_some_and(|ip| self.banned.contains(&ip))
        {
            return;
        }

        if packet.dest_addr().ip_addr() != Some(self.public_ip) {
            self.relay(datagram, packet.dest_addr());
            return;
        }

        let source = packet.source_addr().clone();
        let physical = Address::from(sender);
        if !self.connections.contains(&source) && packet.syn() {
            self.make_new_connection(self.own_addr(), source.clone(), physical.clone());
        }

        let mut io = Io::new(&mut self.socket, &mut self.scheduler);
        if let Some(connection) = self.connections.get_mut(&source) {
            connection.receive_packet(&mut io, packet, physical);
        }
    }

    fn relay(&mut self, datagram: &[u8], dest: &Address) {
        if !self.relaying {
            debug!("Not relaying datagram for {}", dest);
            return;
        }
        debug!("Relaying {} bytes to {}", datagram.len(), dest);
        let mut io = Io::new(&mut self.socket, &mut self.scheduler);
        io.send_datagram(datagram, dest);
    }

    /// Creates, starts and registers a connection through the factory
    pub fn make_new_connection(
        &mut self,
        own_addr: Address,
        source_addr: Address,
        relay_addr: Address,
    ) {
        info!("New connection to {} via {}", source_addr, relay_addr);
        let mut io = Io::new(&mut self.socket, &mut self.scheduler);
        let connection =
            self.factory
                .make_new_connection(&mut io, own_addr, source_addr.clone(), relay_addr);
        self.connections.insert(&mut io, source_addr, connection);
    }

    /// Opens a connection to `dest`
    ///
    /// A live connection to it is kept as is.
    pub fn connect(&mut self, dest: Address) -> Result<(), RudpError> {
        if dest.ip_addr().is_none() {
            return Err(ValidationError::BadDestinationIp(dest.ip).into());
        }
        if dest.port == 0 {
            return Err(ValidationError::BadDestinationPort(0).into());
        }

        let live = self
            .connections
            .get(&dest)
            .is_some_and(|c| c.state() != ConnectionState::Shutdown);
        if !live {
            self.make_new_connection(self.own_addr(), dest.clone(), dest);
        }
        Ok(())
    }

    /// Queues a message on the connection to `peer`
    pub fn send_message(&mut self, peer: &Address, message: &[u8]) -> Result<(), RudpError> {
        let connection = self
            .connections
            .get_mut(peer)
            .ok_or_else(|| RudpError::UnknownPeer(peer.clone()))?;
        let mut io = Io::new(&mut self.socket, &mut self.scheduler);
        connection.send_message(&mut io, message);
        Ok(())
    }

    pub fn shutdown_connection(&mut self, peer: &Address) -> Result<(), RudpError> {
        let connection = self
            .connections
            .get_mut(peer)
            .ok_or_else(|| RudpError::UnknownPeer(peer.clone()))?;
        let mut io = Io::new(&mut self.socket, &mut self.scheduler);
        connection.shutdown(&mut io);
        Ok(())
    }

    /// Removes a connection from the table
    ///
    /// Only shut down connections can be removed, so a peer cannot get its
    /// connection recreated just by sending packets.
    pub fn unregister(&mut self, peer: &Address) -> Result<Connection, RudpError> {
        match self.connections.get(peer) {
            None => return Err(RudpError::UnknownPeer(peer.clone())),
            Some(c) if c.state() != ConnectionState::Shutdown => {
                return Err(RudpError::ConnectionActive(peer.clone()))
            }
            Some(_) => {}
        }
        info!("Unregistering connection to {}", peer);
        self.connections
            .remove(peer)
            .ok_or_else(|| RudpError::UnknownPeer(peer.clone()))
    }

    /// Delivers a fired timer to the connection it belongs to
    pub fn on_timer(&mut self, timer: Timer) {
        let mut io = Io::new(&mut self.socket, &mut self.scheduler);
        match self.connections.get_mut(&timer.peer) {
            Some(connection) => connection.on_timer(&mut io, timer.kind),
            None => debug!("Dropping timer {:?} for unknown peer {}", timer.kind, timer.peer),
        }
    }

    /// Writes a datagram to the socket on behalf of a connection
    pub fn send_datagram(&mut self, datagram: &[u8], addr: &Address) {
        let mut io = Io::new(&mut self.socket, &mut self.scheduler);
        io.send_datagram(datagram, addr);
    }

    /// Shuts down every connection, then closes the socket
    pub fn shutdown(&mut self) {
        let mut io = Io::new(&mut self.socket, &mut self.scheduler);
        for (_, connection) in self.connections.iter_mut() {
            connection.shutdown(&mut io);
        }
        self.socket.close();
    }
}

impl<S: DatagramSocket> ConnectionMultiplexer<S, TimerQueue> {
    pub fn next_deadline(&self) -> Option<Duration> {
        self.scheduler.next_deadline()
    }

    /// Moves the clock to `now` before handling a non-timer event
    pub fn advance_to(&mut self, now: Duration) {
        self.scheduler.advance_to(now);
    }

    /// Fires every timer due at or before `now`, returning how many fired
    pub fn fire_expired(&mut self, now: Duration) -> usize {
        let mut fired = 0;
        while let Some(timer) = self.scheduler.pop_expired(now) {
            self.on_timer(timer);
            fired += 1;
        }
        fired
    }
}
