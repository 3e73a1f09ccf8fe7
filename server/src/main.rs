use clap::Parser;
use log::{error, info};
use rudp::{Endpoint, EndpointConfig, RudpConfig, RudpConnectionFactory};
use server::echo::EchoService;
use server::sessions::SessionHandlerFactory;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

/// Command line arguments for the RUDP echo server
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// IP address to bind to
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    host: IpAddr,

    /// Port to listen on
    #[clap(short, long, default_value = "8080")]
    port: u16,

    /// Address peers use to reach this server (defaults to the bind host,
    /// required when the host is a wildcard address)
    #[clap(long)]
    public_ip: Option<IpAddr>,

    /// Forward packets addressed to other nodes
    #[clap(long)]
    relay: bool,

    /// IP addresses to ban (repeatable)
    #[clap(long = "ban")]
    banned: Vec<IpAddr>,

    /// Maximum number of concurrent sessions
    #[clap(short, long, default_value = "32")]
    max_sessions: usize,

    /// Retransmission timeout in milliseconds
    #[clap(long, default_value = "600")]
    packet_timeout_ms: u64,

    /// Delay before a standalone ACK, in milliseconds
    #[clap(long, default_value = "10")]
    bare_ack_timeout_ms: u64,

    /// Transmissions per packet before a peer is considered gone
    #[clap(long, default_value = "25")]
    max_retransmissions: u32,
}

/// Picks the address advertised to peers
///
/// Peers put this address in the destination field of every packet, so a
/// wildcard address would make the server drop all of its traffic.
fn resolve_public_ip(host: IpAddr, public_ip: Option<IpAddr>) -> Result<IpAddr, String> {
    match public_ip {
        Some(ip) if ip.is_unspecified() => {
            Err(format!("--public-ip {} is not an address peers can reach", ip))
        }
        Some(ip) => Ok(ip),
        None if host.is_unspecified() => {
            Err(format!("--public-ip is required when binding to {}", host))
        }
        None => Ok(host),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();

    if std::env::var("RUST_LOG").is_err() {
        println!("Tip: Set RUST_LOG=info to see server logs");
    }

    let config = RudpConfig::default()
        .with_packet_timeout(Duration::from_millis(args.packet_timeout_ms))
        .with_bare_ack_timeout(Duration::from_millis(args.bare_ack_timeout_ms))
        .with_max_retransmissions(args.max_retransmissions);

    let (handlers, events) = SessionHandlerFactory::new();
    let factory = RudpConnectionFactory::new(handlers, config);
    let public_ip = resolve_public_ip(args.host, args.public_ip)?;
    let endpoint_config = EndpointConfig::new(public_ip).with_relaying(args.relay);

    let bind_addr = SocketAddr::new(args.host, args.port);
    let (endpoint, handle) = Endpoint::bind(bind_addr, endpoint_config, factory).await?;
    info!(
        "Echo server on {} (public address {}, relaying {})",
        bind_addr,
        handle.public_addr(),
        args.relay
    );

    for ip in args.banned {
        handle.ban_ip(ip)?;
    }

    // Stop the endpoint on Ctrl+C so connections get a FIN before exit
    let signal_handle = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down gracefully...");
            if let Err(e) = signal_handle.stop() {
                error!("Failed to stop endpoint: {}", e);
            }
        }
    });

    let service = EchoService::new(handle, args.max_sessions);
    let (result, _) = tokio::join!(endpoint.run(), service.run(events));
    result?;

    info!("Server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_public_ip_defaults_to_host() {
        assert_eq!(resolve_public_ip(ip("127.0.0.1"), None), Ok(ip("127.0.0.1")));
    }

    #[test]
    fn test_explicit_public_ip_wins() {
        assert_eq!(
            resolve_public_ip(ip("0.0.0.0"), Some(ip("203.0.113.7"))),
            Ok(ip("203.0.113.7"))
        );
        assert_eq!(
            resolve_public_ip(ip("10.0.0.1"), Some(ip("203.0.113.7"))),
            Ok(ip("203.0.113.7"))
        );
    }

    #[test]
    fn test_wildcard_host_requires_public_ip() {
        assert!(resolve_public_ip(ip("0.0.0.0"), None).is_err());
        assert!(resolve_public_ip(ip("::"), None).is_err());
    }

    #[test]
    fn test_wildcard_public_ip_rejected() {
        assert!(resolve_public_ip(ip("127.0.0.1"), Some(ip("0.0.0.0"))).is_err());
    }
}
