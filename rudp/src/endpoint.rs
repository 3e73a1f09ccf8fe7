//! Tokio driver for a [`ConnectionMultiplexer`]
//!
//! An [`Endpoint`] owns the UDP socket and runs the single-threaded reactor:
//! one loop waiting on socket readiness, the command channel and the next
//! timer deadline. Applications talk to it through a cloneable
//! [`EndpointHandle`].

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use log::{debug, info, warn};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};

use crate::address::Address;
use crate::error::RudpError;
use crate::handler::ConnectionFactory;
use crate::io::DatagramSocket;
use crate::multiplexer::ConnectionMultiplexer;
use crate::scheduler::TimerQueue;

/// Receive buffer size; large enough for any UDP datagram
pub const RECV_BUFFER_SIZE: usize = 65535;

/// How the endpoint presents itself to peers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointConfig {
    /// Address peers use to reach this node
    pub public_ip: IpAddr,
    /// Forward packets addressed to other nodes
    pub relaying: bool,
}

impl EndpointConfig {
    pub fn new(public_ip: IpAddr) -> Self {
        Self {
            public_ip,
            relaying: false,
        }
    }

    pub fn with_relaying(mut self, relaying: bool) -> Self {
        self.relaying = relaying;
        self
    }
}

/// Requests sent from handles to the running endpoint
#[derive(Debug)]
enum Command {
    Connect(Address),
    Send { peer: Address, message: Vec<u8> },
    ShutdownConnection(Address),
    Unregister(Address),
    Ban(IpAddr),
    Unban(IpAddr),
    Stop,
}

/// Non-blocking sender over the shared tokio socket
struct UdpDatagramSocket {
    socket: Option<Arc<UdpSocket>>,
    local_addr: SocketAddr,
}

impl DatagramSocket for UdpDatagramSocket {
    fn send_to(&mut self, datagram: &[u8], addr: SocketAddr) -> io::Result<()> {
        match &self.socket {
            Some(socket) => socket.try_send_to(datagram, addr).map(|_| ()),
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "socket closed")),
        }
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.local_addr)
    }

    fn close(&mut self) {
        self.socket = None;
    }
}

/// The reactor
///
/// Not `Send`: run it on the task that created it.
pub struct Endpoint {
    socket: Arc<UdpSocket>,
    multiplexer: ConnectionMultiplexer<UdpDatagramSocket, TimerQueue>,
    commands: mpsc::UnboundedReceiver<Command>,
}

/// Cloneable remote control for a running [`Endpoint`]
#[derive(Debug, Clone)]
pub struct EndpointHandle {
    commands: mpsc::UnboundedSender<Command>,
    public_addr: Address,
    local_addr: SocketAddr,
}

impl Endpoint {
    /// Binds the socket and wires it to a fresh multiplexer
    pub async fn bind<F>(
        bind_addr: SocketAddr,
        config: EndpointConfig,
        factory: F,
    ) -> Result<(Endpoint, EndpointHandle), RudpError>
    where
        F: ConnectionFactory + 'static,
    {
        let socket = Arc::new(UdpSocket::bind(bind_addr).await?);
        let local_addr = socket.local_addr()?;
        info!("RUDP endpoint listening on {}", local_addr);

        let datagrams = UdpDatagramSocket {
            socket: Some(Arc::clone(&socket)),
            local_addr,
        };
        let multiplexer = ConnectionMultiplexer::new(
            datagrams,
            TimerQueue::new(),
            Box::new(factory),
            config.public_ip,
            config.relaying,
        )?;

        let (tx, rx) = mpsc::unbounded_channel();
        let handle = EndpointHandle {
            commands: tx,
            public_addr: multiplexer.own_addr(),
            local_addr,
        };
        let endpoint = Endpoint {
            socket,
            multiplexer,
            commands: rx,
        };
        Ok((endpoint, handle))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.multiplexer.socket().local_addr
    }

    pub fn multiplexer(&self) -> &ConnectionMultiplexer<impl DatagramSocket, TimerQueue> {
        &self.multiplexer
    }

    /// Runs until [`EndpointHandle::stop`] is called or every handle is dropped
    ///
    /// On exit every connection is shut down and the socket is closed.
    pub async fn run(mut self) -> Result<(), RudpError> {
        let epoch = Instant::now();
        let mut buffer = vec![0u8; RECV_BUFFER_SIZE];

        loop {
            let deadline = self
                .multiplexer
                .next_deadline()
                .and_then(|d| epoch.checked_add(d));

            tokio::select! {
                received = self.socket.recv_from(&mut buffer) => match received {
                    Ok((len, sender)) => {
                        self.multiplexer.advance_to(epoch.elapsed());
                        self.multiplexer.on_datagram(&buffer[..len], sender);
                    }
                    // ICMP errors from earlier sends surface here on some platforms
                    Err(e) => debug!("Error receiving datagram: {}", e),
                },
                command = self.commands.recv() => match command {
                    Some(Command::Stop) | None => {
                        info!("RUDP endpoint on {} stopping", self.local_addr());
                        self.multiplexer.shutdown();
                        return Ok(());
                    }
                    Some(command) => {
                        self.multiplexer.advance_to(epoch.elapsed());
                        execute(&mut self.multiplexer, command);
                    }
                },
                _ = sleep_until_deadline(deadline) => {}
            }

            self.multiplexer.fire_expired(epoch.elapsed());
        }
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn execute<S: DatagramSocket>(
    multiplexer: &mut ConnectionMultiplexer<S, TimerQueue>,
    command: Command,
) {
    let result = match command {
        Command::Connect(peer) => multiplexer.connect(peer),
        Command::Send { peer, message } => multiplexer.send_message(&peer, &message),
        Command::ShutdownConnection(peer) => multiplexer.shutdown_connection(&peer),
        Command::Unregister(peer) => multiplexer.unregister(&peer).map(|_| ()),
        Command::Ban(ip) => {
            multiplexer.ban_ip(ip);
            Ok(())
        }
        Command::Unban(ip) => {
            multiplexer.remove_ip_ban(ip);
            Ok(())
        }
        Command::Stop => Ok(()),
    };
    if let Err(e) = result {
        warn!("Endpoint command failed: {}", e);
    }
}

impl EndpointHandle {
    /// Address this endpoint puts in the source field of its packets
    pub fn public_addr(&self) -> &Address {
        &self.public_addr
    }

    /// Address the socket is actually bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn connect(&self, peer: Address) -> Result<(), RudpError> {
        self.send(Command::Connect(peer))
    }

    pub fn send_message(&self, peer: Address, message: Vec<u8>) -> Result<(), RudpError> {
        self.send(Command::Send { peer, message })
    }

    pub fn shutdown_connection(&self, peer: Address) -> Result<(), RudpError> {
        self.send(Command::ShutdownConnection(peer))
    }

    /// Forgets a connection that has already shut down
    pub fn unregister(&self, peer: Address) -> Result<(), RudpError> {
        self.send(Command::Unregister(peer))
    }

    pub fn ban_ip(&self, ip: IpAddr) -> Result<(), RudpError> {
        self.send(Command::Ban(ip))
    }

    pub fn remove_ip_ban(&self, ip: IpAddr) -> Result<(), RudpError> {
        self.send(Command::Unban(ip))
    }

    pub fn stop(&self) -> Result<(), RudpError> {
        self.send(Command::Stop)
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    fn send(&self, command: Command) -> Result<(), RudpError> {
        self.commands
            .send(command)
            .map_err(|_| RudpError::EndpointClosed)
    }
}
