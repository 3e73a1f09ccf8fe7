//! Wire representation of a single RUDP datagram
//!
//! A [`Packet`] is the unit exchanged between peers. Packets are totally
//! ordered by sequence number alone: two packets with the same sequence
//! number compare equal whatever their payloads, which is what lets the
//! reorder buffer treat retransmitted duplicates as the same packet.
//!
//! # Wire format
//!
//! Packets are serialised with bincode using fixed-width little-endian
//! integers, in this field order:
//!
//! ```text
//! syn: u8 | fin: u8 | sequence_number: u32 | more_fragments: u32 | ack: u32 |
//! source_ip: len(u64) + utf8 | source_port: u32 |
//! dest_ip: len(u64) + utf8   | dest_port: u32   |
//! payload: len(u64) + bytes
//! ```
//!
//! Ports travel as `u32` so that out-of-range values survive decoding and are
//! rejected by validation rather than silently truncated.

use std::cmp::Ordering;

use bincode::Options;
use serde::{Deserialize, Serialize};

use crate::address::{parse_host, Address};
use crate::error::{DecodeError, ValidationError};

/// Largest datagram accepted by [`Packet::decode`]
pub const MAX_DATAGRAM_SIZE: u64 = 65535;

#[derive(Debug, Serialize, Deserialize)]
struct WirePacket {
    syn: bool,
    fin: bool,
    sequence_number: u32,
    more_fragments: u32,
    ack: u32,
    source_ip: String,
    source_port: u32,
    dest_ip: String,
    dest_port: u32,
    payload: Vec<u8>,
}

fn encode_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
}

fn decode_options() -> impl Options {
    encode_options()
        .with_limit(MAX_DATAGRAM_SIZE)
        .reject_trailing_bytes()
}

/// One protocol datagram
#[derive(Debug, Clone)]
pub struct Packet {
    sequence_number: u32,
    ack: u32,
    syn: bool,
    fin: bool,
    more_fragments: u32,
    payload: Vec<u8>,
    source_addr: Address,
    dest_addr: Address,
}

impl Packet {
    /// Creates an empty packet; the remaining fields default to zero / unset
    ///
    /// The destination may be a relay's final target rather than the first
    /// hop the datagram is written to.
    pub fn new(sequence_number: u32, dest_addr: Address, source_addr: Address) -> Self {
        Self {
            sequence_number,
            ack: 0,
            syn: false,
            fin: false,
            more_fragments: 0,
            payload: Vec::new(),
            source_addr,
            dest_addr,
        }
    }

    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn with_more_fragments(mut self, more_fragments: u32) -> Self {
        self.more_fragments = more_fragments;
        self
    }

    pub fn with_ack(mut self, ack: u32) -> Self {
        self.ack = ack;
        self
    }

    pub fn with_syn(mut self, syn: bool) -> Self {
        self.syn = syn;
        self
    }

    pub fn with_fin(mut self, fin: bool) -> Self {
        self.fin = fin;
        self
    }

    pub fn sequence_number(&self) -> u32 {
        self.sequence_number
    }

    /// Next sequence number the sender expects; zero means no acknowledgement
    pub fn ack(&self) -> u32 {
        self.ack
    }

    pub fn syn(&self) -> bool {
        self.syn
    }

    pub fn fin(&self) -> bool {
        self.fin
    }

    /// Number of fragments following this one in the same message
    pub fn more_fragments(&self) -> u32 {
        self.more_fragments
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    pub fn source_addr(&self) -> &Address {
        &self.source_addr
    }

    pub fn dest_addr(&self) -> &Address {
        &self.dest_addr
    }

    pub fn set_sequence_number(&mut self, sequence_number: u32) {
        self.sequence_number = sequence_number;
    }

    pub fn set_ack(&mut self, ack: u32) {
        self.ack = ack;
    }

    pub fn set_syn(&mut self, syn: bool) {
        self.syn = syn;
    }

    pub fn set_fin(&mut self, fin: bool) {
        self.fin = fin;
    }

    pub fn set_more_fragments(&mut self, more_fragments: u32) {
        self.more_fragments = more_fragments;
    }

    pub fn set_payload(&mut self, payload: impl Into<Vec<u8>>) {
        self.payload = payload.into();
    }

    pub fn set_source_addr(&mut self, addr: Address) {
        self.source_addr = addr;
    }

    pub fn set_dest_addr(&mut self, addr: Address) {
        self.dest_addr = addr;
    }

    /// Serialises the packet into a datagram
    pub fn encode(&self) -> Vec<u8> {
        let wire = WirePacket {
            syn: self.syn,
            fin: self.fin,
            sequence_number: self.sequence_number,
            more_fragments: self.more_fragments,
            ack: self.ack,
            source_ip: self.source_addr.ip.clone(),
            source_port: u32::from(self.source_addr.port),
            dest_ip: self.dest_addr.ip.clone(),
            dest_port: u32::from(self.dest_addr.port),
            payload: self.payload.clone(),
        };

        // Writing plain fields into a Vec with no size limit cannot fail
        match encode_options().serialize(&wire) {
            Ok(bytes) => bytes,
            Err(e) => unreachable!("packet serialisation failed: {}", e),
        }
    }

    /// Parses and validates a datagram
    ///
    /// Nothing is constructed unless every field is well-formed and both
    /// addresses pass validation.
    pub fn decode(datagram: &[u8]) -> Result<Self, DecodeError> {
        let wire: WirePacket = decode_options().deserialize(datagram)?;

        validate_fields(&wire.dest_ip, wire.dest_port, &wire.source_ip, wire.source_port)?;

        // Ports were range-checked above
        let dest_port = wire.dest_port as u16;
        let source_port = wire.source_port as u16;

        Ok(Self {
            sequence_number: wire.sequence_number,
            ack: wire.ack,
            syn: wire.syn,
            fin: wire.fin,
            more_fragments: wire.more_fragments,
            payload: wire.payload,
            source_addr: Address::new(wire.source_ip, source_port),
            dest_addr: Address::new(wire.dest_ip, dest_port),
        })
    }

    /// Checks both addresses against the address grammar and port range
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_fields(
            &self.dest_addr.ip,
            u32::from(self.dest_addr.port),
            &self.source_addr.ip,
            u32::from(self.source_addr.port),
        )
    }
}

fn validate_fields(
    dest_ip: &str,
    dest_port: u32,
    source_ip: &str,
    source_port: u32,
) -> Result<(), ValidationError> {
    if parse_host(dest_ip).is_none() {
        return Err(ValidationError::BadDestinationIp(dest_ip.to_string()));
    }
    if !(1..=65535).contains(&dest_port) {
        return Err(ValidationError::BadDestinationPort(dest_port));
    }
    if parse_host(source_ip).is_none() {
        return Err(ValidationError::BadSourceIp(source_ip.to_string()));
    }
    if !(1..=65535).contains(&source_port) {
        return Err(ValidationError::BadSourcePort(source_port));
    }
    Ok(())
}

impl PartialEq for Packet {
    fn eq(&self, other: &Self) -> bool {
        self.sequence_number == other.sequence_number
    }
}

impl Eq for Packet {}

impl PartialOrd for Packet {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Packet {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sequence_number.cmp(&other.sequence_number)
    }
}
