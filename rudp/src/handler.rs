//! Extension points implemented by the application
//!
//! The protocol knows nothing about what messages mean. For every new peer
//! the multiplexer asks a [`ConnectionFactory`] for a [`Connection`], which in
//! turn asks a [`HandlerFactory`] for the [`Handler`] that receives that
//! peer's messages.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::address::Address;
use crate::config::{RudpConfig, INITIAL_SEQUENCE_NUMBER_MAX};
use crate::connection::Connection;
use crate::io::Io;

/// Application callbacks for one connection
pub trait Handler {
    /// Called once per fully reassembled message, in order
    fn receive_message(&mut self, message: Vec<u8>);

    /// Called exactly once, when the connection shuts down
    fn handle_shutdown(&mut self);
}

/// Creates the handler for a newly created connection
pub trait HandlerFactory {
    fn make_new_handler(
        &mut self,
        own_addr: &Address,
        source_addr: &Address,
        relay_addr: &Address,
    ) -> Box<dyn Handler>;
}

/// Creates and starts connections on behalf of the multiplexer
pub trait ConnectionFactory {
    /// Builds a connection to `source_addr` and binds a handler to it
    ///
    /// The returned connection has already been started, i.e. its SYN is
    /// scheduled through `io`.
    fn make_new_connection(
        &mut self,
        io: &mut Io<'_>,
        own_addr: Address,
        source_addr: Address,
        relay_addr: Address,
    ) -> Connection;
}

/// The stock factory: random initial sequence numbers and a shared config
pub struct RudpConnectionFactory<H, R = StdRng> {
    handler_factory: H,
    config: RudpConfig,
    rng: R,
}

impl<H: HandlerFactory> RudpConnectionFactory<H> {
    pub fn new(handler_factory: H, config: RudpConfig) -> Self {
        Self::with_rng(handler_factory, config, StdRng::from_entropy())
    }
}

impl<H: HandlerFactory, R: Rng> RudpConnectionFactory<H, R> {
    /// Uses the given random source for initial sequence numbers
    pub fn with_rng(handler_factory: H, config: RudpConfig, rng: R) -> Self {
        Self {
            handler_factory,
            config,
            rng,
        }
    }

    pub fn config(&self) -> &RudpConfig {
        &self.config
    }

    pub fn handler_factory(&self) -> &H {
        &self.handler_factory
    }
}

impl<H: HandlerFactory, R: Rng> ConnectionFactory for RudpConnectionFactory<H, R> {
    fn make_new_connection(
        &mut self,
        io: &mut Io<'_>,
        own_addr: Address,
        source_addr: Address,
        relay_addr: Address,
    ) -> Connection {
        let handler = self
            .handler_factory
            .make_new_handler(&own_addr, &source_addr, &relay_addr);
        let initial_seqnum = self.rng.gen_range(0..=INITIAL_SEQUENCE_NUMBER_MAX);

        let mut connection = Connection::new(
            own_addr,
            source_addr,
            relay_addr,
            handler,
            initial_seqnum,
            self.config,
        );
        connection.start(io);
        connection
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionState;
    use crate::scheduler::{TimerKind, TimerQueue};
    use crate::testing::{own_addr, peer_addr, RecordingHandlerFactory, RecordingSocket};
    use std::time::Duration;

    #[test]
    fn test_factory_builds_started_connection() {
        let handler_factory = RecordingHandlerFactory::new();
        let mut factory = RudpConnectionFactory::with_rng(
            handler_factory.clone(),
            RudpConfig::default(),
            StdRng::seed_from_u64(7),
        );
        let mut socket = RecordingSocket::new();
        let mut timers = TimerQueue::new();

        let connection = {
            let mut io = Io::new(&mut socket, &mut timers);
            factory.make_new_connection(&mut io, own_addr(), peer_addr(), peer_addr())
        };

        assert_eq!(connection.state(), ConnectionState::Connecting);
        assert_eq!(connection.dest_addr(), &peer_addr());
        assert_eq!(connection.relay_addr(), &peer_addr());
        assert!(connection.next_sequence_number() <= INITIAL_SEQUENCE_NUMBER_MAX + 1);
        assert_eq!(handler_factory.created(), vec![(own_addr(), peer_addr(), peer_addr())]);

        // The SYN goes out on the next turn, not synchronously
        assert!(socket.sent().is_empty());
        let timer = timers.pop_expired(Duration::ZERO).unwrap();
        assert_eq!(timer.kind, TimerKind::SendSyn);
        assert_eq!(timer.peer, peer_addr());
    }

    #[test]
    fn test_seeded_factories_agree() {
        let mut seqnums = Vec::new();
        for _ in 0..2 {
            let mut factory = RudpConnectionFactory::with_rng(
                RecordingHandlerFactory::new(),
                RudpConfig::default(),
                StdRng::seed_from_u64(42),
            );
            let mut socket = RecordingSocket::new();
            let mut timers = TimerQueue::new();
            let mut io = Io::new(&mut socket, &mut timers);
            let connection =
                factory.make_new_connection(&mut io, own_addr(), peer_addr(), peer_addr());
            seqnums.push(connection.next_sequence_number());
        }
        assert_eq!(seqnums[0], seqnums[1]);
    }
}
