//! Per-peer connection state machine
//!
//! A connection owns everything about one peer: the handshake, the send
//! window and its retransmission timers, the reorder buffer, and the
//! application [`Handler`]. It never touches the socket or the clock
//! directly; every side effect goes through the [`Io`] passed into each call,
//! so the same code runs under tokio and under a simulated clock.
//!
//! ```text
//!  CONNECTING ──(SYN received)──▶ CONNECTED
//!      │                              │
//!      └──(FIN / retries exhausted / shutdown)──▶ SHUTDOWN
//! ```

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use log::{debug, info, warn};

use crate::address::Address;
use crate::config::RudpConfig;
use crate::handler::Handler;
use crate::heap::ReorderBuffer;
use crate::io::Io;
use crate::packet::Packet;
use crate::scheduler::{Timer, TimerId, TimerKind};

/// Lifecycle of a connection
///
/// `Shutdown` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Shutdown,
}

/// An outbound packet waiting for its acknowledgement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledPacket {
    /// Encoded bytes, resent unchanged on every retry
    pub datagram: Vec<u8>,
    pub timeout: Duration,
    pub timer: Option<TimerId>,
    pub retries: u32,
}

impl ScheduledPacket {
    pub fn new(datagram: Vec<u8>, timeout: Duration, timer: Option<TimerId>) -> Self {
        Self {
            datagram,
            timeout,
            timer,
            retries: 0,
        }
    }
}

/// A reliable, ordered channel to one peer
pub struct Connection {
    own_addr: Address,
    dest_addr: Address,
    relay_addr: Address,
    state: ConnectionState,
    handler: Box<dyn Handler>,
    config: RudpConfig,

    syn_seqnum: u32,
    syn_timer: Option<TimerId>,
    next_sequence_number: u32,
    next_expected_seqnum: u32,
    next_delivered_seqnum: u32,

    /// Segments not yet given a sequence number, with their `more_fragments`
    segment_queue: VecDeque<(u32, Vec<u8>)>,
    sending_window: BTreeMap<u32, ScheduledPacket>,
    receive_buffer: ReorderBuffer,
    ack_timer: Option<TimerId>,
}

impl Connection {
    /// Creates a connection in `Connecting`
    ///
    /// `initial_seqnum` is reserved for the SYN. Nothing is sent until
    /// [`Connection::start`] is called.
    pub fn new(
        own_addr: Address,
        dest_addr: Address,
        relay_addr: Address,
        handler: Box<dyn Handler>,
        initial_seqnum: u32,
        config: RudpConfig,
    ) -> Self {
        Self {
            own_addr,
            dest_addr,
            relay_addr,
            state: ConnectionState::Connecting,
            handler,
            config,
            syn_seqnum: initial_seqnum,
            syn_timer: None,
            next_sequence_number: initial_seqnum.saturating_add(1),
            next_expected_seqnum: 0,
            next_delivered_seqnum: 0,
            segment_queue: VecDeque::new(),
            sending_window: BTreeMap::new(),
            receive_buffer: ReorderBuffer::new(),
            ack_timer: None,
        }
    }

    /// Schedules the SYN for the next turn of the event loop
    pub fn start(&mut self, io: &mut Io<'_>) {
        if self.state == ConnectionState::Shutdown || self.syn_timer.is_some() {
            return;
        }
        let timer = self.timer(TimerKind::SendSyn);
        self.syn_timer = Some(io.schedule(Duration::ZERO, timer));
    }

    pub fn own_addr(&self) -> &Address {
        &self.own_addr
    }

    pub fn dest_addr(&self) -> &Address {
        &self.dest_addr
    }

    /// Where datagrams for this peer are physically sent
    pub fn relay_addr(&self) -> &Address {
        &self.relay_addr
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn next_sequence_number(&self) -> u32 {
        self.next_sequence_number
    }

    pub fn next_expected_seqnum(&self) -> u32 {
        self.next_expected_seqnum
    }

    pub fn next_delivered_seqnum(&self) -> u32 {
        self.next_delivered_seqnum
    }

    /// Packets sent but not yet acknowledged
    pub fn in_flight(&self) -> usize {
        self.sending_window.len()
    }

    /// Segments waiting for room in the send window
    pub fn queued_segments(&self) -> usize {
        self.segment_queue.len()
    }

    pub fn set_relay_address(&mut self, relay_addr: Address) {
        self.relay_addr = relay_addr;
    }

    /// Queues a message for reliable, ordered delivery
    ///
    /// Messages longer than the segment size are split into fragments. They
    /// only start flowing once the connection is established. Does nothing
    /// after shutdown or for an empty message.
    pub fn send_message(&mut self, io: &mut Io<'_>, message: &[u8]) {
        if self.state == ConnectionState::Shutdown {
            return;
        }

        let segments: Vec<&[u8]> = message.chunks(self.config.segment_size.max(1)).collect();
        let count = segments.len();
        for (i, segment) in segments.into_iter().enumerate() {
            let more_fragments = u32::try_from(count - i - 1).unwrap_or(u32::MAX);
            self.segment_queue.push_back((more_fragments, segment.to_vec()));
        }

        self.pump_outbound(io);
    }

    /// Handles a packet addressed to this connection
    ///
    /// `sender` is the physical address the datagram came from, which differs
    /// from the packet's source when it was relayed.
    pub fn receive_packet(&mut self, io: &mut Io<'_>, packet: Packet, sender: Address) {
        if self.state == ConnectionState::Shutdown {
            return;
        }

        if &sender != packet.source_addr() && sender != self.relay_addr {
            debug!("Peer {} now reachable through {}", self.dest_addr, sender);
            self.set_relay_address(sender);
        }

        if packet.fin() {
            info!("Received FIN from {}", self.dest_addr);
            self.shutdown(io);
        } else if packet.syn() {
            self.receive_syn(io, packet);
        } else if self.state == ConnectionState::Connected {
            self.receive_casual(io, packet);
        } else if packet.ack() > 0 {
            // No payload is interpreted before the handshake completes
            self.process_ack(io, packet.ack());
        }
    }

    /// Reacts to one of this connection's timers firing
    pub fn on_timer(&mut self, io: &mut Io<'_>, kind: TimerKind) {
        if self.state == ConnectionState::Shutdown {
            return;
        }
        match kind {
            TimerKind::SendSyn => self.send_syn(io),
            TimerKind::Retransmit(seqnum) => self.retransmit(io, seqnum),
            TimerKind::BareAck => {
                self.ack_timer = None;
                self.send_bare_ack(io);
            }
        }
    }

    /// Tears the connection down
    ///
    /// Sends one best-effort FIN, cancels every timer, drops everything still
    /// queued or in flight, and notifies the handler. Calling it again does
    /// nothing.
    pub fn shutdown(&mut self, io: &mut Io<'_>) {
        if self.state == ConnectionState::Shutdown {
            return;
        }
        self.state = ConnectionState::Shutdown;
        info!("Connection to {} shut down", self.dest_addr);

        let fin = Packet::new(0, self.dest_addr.clone(), self.own_addr.clone())
            .with_ack(self.next_expected_seqnum)
            .with_fin(true);
        io.send_datagram(&fin.encode(), &self.relay_addr);

        if let Some(id) = self.ack_timer.take() {
            io.cancel(id);
        }
        if let Some(id) = self.syn_timer.take() {
            io.cancel(id);
        }

        self.segment_queue.clear();
        for scheduled in std::mem::take(&mut self.sending_window).into_values() {
            if let Some(id) = scheduled.timer {
                io.cancel(id);
            }
        }
        self.receive_buffer = ReorderBuffer::new();

        self.handler.handle_shutdown();
    }

    fn timer(&self, kind: TimerKind) -> Timer {
        Timer::new(self.dest_addr.clone(), kind)
    }

    /// Takes the next outbound sequence number
    ///
    /// `u32::MAX` is never handed out.
    fn take_sequence_number(&mut self) -> Option<u32> {
        let seqnum = self.next_sequence_number;
        self.next_sequence_number = seqnum.checked_add(1)?;
        Some(seqnum)
    }

    fn send_syn(&mut self, io: &mut Io<'_>) {
        self.syn_timer = None;

        // Carries the current ack so that a reply to the peer's SYN is a SYNACK
        let syn = Packet::new(self.syn_seqnum, self.dest_addr.clone(), self.own_addr.clone())
            .with_ack(self.next_expected_seqnum)
            .with_syn(true);
        self.schedule_send_in_order(io, syn);
    }

    /// Puts a sequenced packet in the send window; it goes out on the next turn
    fn schedule_send_in_order(&mut self, io: &mut Io<'_>, packet: Packet) {
        let seqnum = packet.sequence_number();
        let timer = io.schedule(Duration::ZERO, self.timer(TimerKind::Retransmit(seqnum)));
        let scheduled =
            ScheduledPacket::new(packet.encode(), self.config.packet_timeout, Some(timer));
        self.sending_window.insert(seqnum, scheduled);
    }

    fn retransmit(&mut self, io: &mut Io<'_>, seqnum: u32) {
        let Some(scheduled) = self.sending_window.get_mut(&seqnum) else {
            debug!("Stale retransmission timer for {} on {}", seqnum, self.dest_addr);
            return;
        };
        scheduled.timer = None;

        if scheduled.retries >= self.config.max_retransmissions {
            warn!(
                "Packet {} to {} unacknowledged after {} transmissions, giving up",
                seqnum, self.dest_addr, scheduled.retries
            );
            self.shutdown(io);
            return;
        }

        if scheduled.retries > 0 {
            debug!("Retransmitting {} to {} (retry {})", seqnum, self.dest_addr, scheduled.retries);
        }
        io.send_datagram(&scheduled.datagram, &self.relay_addr);

        let timer = Timer::new(self.dest_addr.clone(), TimerKind::Retransmit(seqnum));
        scheduled.timer = Some(io.schedule(scheduled.timeout, timer));
        scheduled.retries += 1;

        // The datagram just sent already told the peer what we expect
        if let Some(id) = self.ack_timer.take() {
            io.cancel(id);
        }
    }

    fn send_bare_ack(&mut self, io: &mut Io<'_>) {
        let ack = Packet::new(0, self.dest_addr.clone(), self.own_addr.clone())
            .with_ack(self.next_expected_seqnum);
        io.send_datagram(&ack.encode(), &self.relay_addr);
    }

    /// Restarts the bare-ACK countdown so a burst yields a single ACK
    fn reset_ack_timer(&mut self, io: &mut Io<'_>) {
        if let Some(id) = self.ack_timer.take() {
            io.cancel(id);
        }
        let timer = self.timer(TimerKind::BareAck);
        self.ack_timer = Some(io.schedule(self.config.bare_ack_timeout, timer));
    }

    /// Retires every in-flight packet below `min(ack, next_sequence_number)`
    fn process_ack(&mut self, io: &mut Io<'_>, ack: u32) {
        let bound = ack.min(self.next_sequence_number);
        while let Some(entry) = self.sending_window.first_entry() {
            if *entry.key() >= bound {
                break;
            }
            if let Some(id) = entry.remove().timer {
                io.cancel(id);
            }
        }
        self.pump_outbound(io);
    }

    fn receive_syn(&mut self, io: &mut Io<'_>, packet: Packet) {
        if packet.ack() > 0 {
            self.process_ack(io, packet.ack());
        }

        let after_syn = packet.sequence_number().saturating_add(1);
        self.next_expected_seqnum = self.next_expected_seqnum.max(after_syn);
        if after_syn > self.next_delivered_seqnum {
            self.next_delivered_seqnum = after_syn;
            // Packets numbered before the SYN can no longer be delivered
            let discarded = self.receive_buffer.discard_below(after_syn);
            if discarded > 0 {
                debug!("Discarded {} stale packets from {}", discarded, self.dest_addr);
            }
        }
        self.advance_expected();

        if self.state == ConnectionState::Connecting {
            info!("Connection to {} established", self.dest_addr);
            self.state = ConnectionState::Connected;
        }

        self.reset_ack_timer(io);
        self.pump_outbound(io);
        self.pump_inbound();
    }

    fn receive_casual(&mut self, io: &mut Io<'_>, packet: Packet) {
        if packet.ack() > 0 {
            self.process_ack(io, packet.ack());
        }
        if self.state != ConnectionState::Connected {
            return;
        }

        let seqnum = packet.sequence_number();
        if seqnum > 0 {
            self.reset_ack_timer(io);
        }

        if seqnum >= self.next_expected_seqnum {
            self.receive_buffer.push(packet);
            self.advance_expected();
            self.pump_inbound();
        }
    }

    /// Moves the expected sequence number past every contiguous buffered packet
    fn advance_expected(&mut self) {
        while self.receive_buffer.contains(self.next_expected_seqnum) {
            match self.next_expected_seqnum.checked_add(1) {
                Some(next) => self.next_expected_seqnum = next,
                None => break,
            }
        }
    }

    /// Delivers complete messages, in order, while the next one is available
    fn pump_inbound(&mut self) {
        while self.state == ConnectionState::Connected
            && self.receive_buffer.peek_min() == Some(self.next_delivered_seqnum)
        {
            let Some(fragments) = self.receive_buffer.pop_min_and_all_fragments() else {
                break;
            };
            let Some(last) = fragments.last().map(Packet::sequence_number) else {
                break;
            };

            let after_last = last.saturating_add(1);
            self.next_expected_seqnum = self.next_expected_seqnum.max(after_last);
            self.next_delivered_seqnum = after_last;

            let message: Vec<u8> = fragments.into_iter().flat_map(Packet::into_payload).collect();
            self.handler.receive_message(message);
        }
    }

    /// Moves queued segments into the send window while there is room
    fn pump_outbound(&mut self, io: &mut Io<'_>) {
        while self.state == ConnectionState::Connected
            && self.sending_window.len() < self.config.window_size
        {
            let Some((more_fragments, payload)) = self.segment_queue.pop_front() else {
                break;
            };
            let Some(seqnum) = self.take_sequence_number() else {
                warn!("Sequence numbers exhausted on connection to {}", self.dest_addr);
                self.shutdown(io);
                return;
            };

            let packet = Packet::new(seqnum, self.dest_addr.clone(), self.own_addr.clone())
                .with_payload(payload)
                .with_more_fragments(more_fragments)
                .with_ack(self.next_expected_seqnum);
            self.schedule_send_in_order(io, packet);
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("own_addr", &self.own_addr)
            .field("dest_addr", &self.dest_addr)
            .field("relay_addr", &self.relay_addr)
            .field("state", &self.state)
            .field("next_sequence_number", &self.next_sequence_number)
            .field("next_expected_seqnum", &self.next_expected_seqnum)
            .field("in_flight", &self.sending_window.len())
            .field("queued_segments", &self.segment_queue.len())
            .finish()
    }
}
