//! Protocol constants and the per-connection configuration built from them
//!
//! Every timing and sizing knob of the protocol lives here so that the
//! connection state machine never hard-codes a number. The defaults are
//! chosen so that two independently configured peers interoperate.

use std::time::Duration;

/// Largest payload carried by a single packet
///
/// Messages longer than this are split into fragments.
pub const UDP_SAFE_SEGMENT_SIZE: usize = 1000;

/// Total number of payload bytes allowed in flight per connection
pub const MAX_IN_FLIGHT_BYTES: usize = 65535;

/// Send window capacity, in packets
pub const WINDOW_SIZE: usize = MAX_IN_FLIGHT_BYTES / UDP_SAFE_SEGMENT_SIZE;

/// Time to wait for an acknowledgement before retransmitting
pub const PACKET_TIMEOUT: Duration = Duration::from_millis(600);

/// Delay before a standalone acknowledgement is sent
pub const BARE_ACK_TIMEOUT: Duration = Duration::from_millis(10);

/// Longest a packet may stay unacknowledged before the peer is considered gone
pub const MAX_PACKET_DELAY: Duration = Duration::from_secs(15);

/// Transmissions of a single packet before the connection is shut down
pub const MAX_RETRANSMISSIONS: u32 =
    (MAX_PACKET_DELAY.as_millis() / PACKET_TIMEOUT.as_millis()) as u32;

/// Upper bound (inclusive) of a randomly chosen initial sequence number
pub const INITIAL_SEQUENCE_NUMBER_MAX: u32 = (1 << 16) - 2;

/// Tunable protocol parameters shared by every connection of an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RudpConfig {
    /// Maximum payload bytes per packet
    pub segment_size: usize,
    /// Maximum number of unacknowledged packets
    pub window_size: usize,
    /// Retransmission timeout (fixed, no back-off)
    pub packet_timeout: Duration,
    /// Delay before a bare ACK goes out
    pub bare_ack_timeout: Duration,
    /// Transmissions per packet before giving up on the peer
    pub max_retransmissions: u32,
}

impl Default for RudpConfig {
    fn default() -> Self {
        Self {
            segment_size: UDP_SAFE_SEGMENT_SIZE,
            window_size: WINDOW_SIZE,
            packet_timeout: PACKET_TIMEOUT,
            bare_ack_timeout: BARE_ACK_TIMEOUT,
            max_retransmissions: MAX_RETRANSMISSIONS,
        }
    }
}

impl RudpConfig {
    /// Recomputes the window capacity from a total in-flight byte budget
    ///
    /// The window never drops below one packet, otherwise nothing could be sent.
    pub fn with_in_flight_budget(mut self, bytes: usize) -> Self {
        self.window_size = (bytes / self.segment_size.max(1)).max(1);
        self
    }

    /// Sets the retransmission timeout
    pub fn with_packet_timeout(mut self, timeout: Duration) -> Self {
        self.packet_timeout = timeout;
        self
    }

    /// Sets the bare-ACK delay
    pub fn with_bare_ack_timeout(mut self, timeout: Duration) -> Self {
        self.bare_ack_timeout = timeout;
        self
    }

    /// Sets the retransmission limit
    pub fn with_max_retransmissions(mut self, retries: u32) -> Self {
        self.max_retransmissions = retries;
        self
    }
}
