//! Error types for the RUDP library

use thiserror::Error;

use crate::address::Address;

/// A well-formed packet carrying an address that fails validation
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("bad destination IP: {0}")]
    BadDestinationIp(String),

    #[error("bad destination port: {0}")]
    BadDestinationPort(u32),

    #[error("bad source IP: {0}")]
    BadSourceIp(String),

    #[error("bad source port: {0}")]
    BadSourcePort(u32),
}

/// Failure to turn a datagram into a [`crate::packet::Packet`]
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The bytes are not a packet at all
    #[error("malformed datagram: {0}")]
    Malformed(#[from] bincode::Error),

    /// The bytes decode, but the packet is semantically invalid
    #[error("invalid packet: {0}")]
    Invalid(#[from] ValidationError),
}

/// Errors surfaced by the multiplexer and the endpoint
#[derive(Debug, Error)]
pub enum RudpError {
    #[error("no connection to {0}")]
    UnknownPeer(Address),

    #[error("connection to {0} has not been shut down")]
    ConnectionActive(Address),

    #[error("invalid address: {0}")]
    InvalidAddress(#[from] ValidationError),

    #[error("endpoint is no longer running")]
    EndpointClosed,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
