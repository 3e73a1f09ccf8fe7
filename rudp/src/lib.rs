//! Reliable, ordered, segmented messaging over UDP
//!
//! This crate layers connections on top of plain datagrams:
//! - a handshake where any received SYN establishes the connection
//! - a fixed-size send window with fixed-timeout retransmission
//! - piggybacked and delayed ("bare") acknowledgements
//! - fragmentation of large messages and in-order reassembly
//! - one socket shared by every peer, with relaying and IP bans
//!
//! The protocol core ([`connection`], [`multiplexer`]) is free of I/O: it
//! writes through a [`io::DatagramSocket`] and arms timers through a
//! [`scheduler::Scheduler`]. [`endpoint::Endpoint`] drives it with tokio.

pub mod address;
pub mod config;
pub mod connection;
pub mod endpoint;
pub mod error;
pub mod handler;
pub mod heap;
pub mod io;
pub mod multiplexer;
pub mod packet;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod testing;

pub use address::Address;
pub use config::RudpConfig;
pub use connection::{Connection, ConnectionState};
pub use endpoint::{Endpoint, EndpointConfig, EndpointHandle};
pub use error::{DecodeError, RudpError, ValidationError};
pub use handler::{ConnectionFactory, Handler, HandlerFactory, RudpConnectionFactory};
pub use multiplexer::ConnectionMultiplexer;
pub use packet::Packet;
