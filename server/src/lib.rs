//! # RUDP Echo Server Library
//!
//! Application layer running on top of the `rudp` transport. The transport
//! delivers complete, ordered messages per peer; this crate decides what to
//! do with them.
//!
//! ## Architecture Design
//!
//! ### Single-Threaded Event Loop
//! The RUDP endpoint runs every connection on one task. Protocol callbacks
//! are turned into [`sessions::SessionEvent`]s and pushed through a channel,
//! so application work never runs inside the protocol's event loop.
//!
//! ### Session Tracking
//! Each peer that completes a handshake gets a session ID. The registry
//! enforces a capacity limit and keeps per-session counters for monitoring.
//!
//! ## Module Organization
//!
//! ### Sessions Module (`sessions`)
//! - Handler and handler factory forwarding connection events
//! - Session registry with capacity limit and peer lookup
//!
//! ### Echo Module (`echo`)
//! - Consumes session events and echoes every message back
//! - Refuses peers beyond capacity and unregisters closed connections
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use rudp::{Endpoint, EndpointConfig, RudpConfig, RudpConnectionFactory};
//! use server::echo::EchoService;
//! use server::sessions::SessionHandlerFactory;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (handlers, events) = SessionHandlerFactory::new();
//!     let factory = RudpConnectionFactory::new(handlers, RudpConfig::default());
//!     let config = EndpointConfig::new("127.0.0.1".parse()?);
//!     let (endpoint, handle) = Endpoint::bind("127.0.0.1:8080".parse()?, config, factory).await?;
//!
//!     let service = EchoService::new(handle, 32);
//!     let (result, _) = tokio::join!(endpoint.run(), service.run(events));
//!     result?;
//!     Ok(())
//! }
//! ```

pub mod echo;
pub mod sessions;
