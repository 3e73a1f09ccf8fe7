use clap::Parser;
use log::{info, warn};
use rudp::{Address, Endpoint, EndpointConfig, RudpConfig, RudpConnectionFactory};
use server::sessions::{SessionEvent, SessionHandlerFactory};
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};
use tokio::time::timeout;

/// Sends messages to an echo server over RUDP and checks the replies
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Echo server address
    #[clap(short, long, default_value = "127.0.0.1:8080")]
    server: SocketAddr,

    /// Local IP to bind to (also used as the public address)
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    host: IpAddr,

    /// Number of messages to send
    #[clap(short, long, default_value = "10")]
    count: usize,

    /// Size of each message in bytes (larger than 1000 forces fragmentation)
    #[clap(long, default_value = "64")]
    size: usize,

    /// Seconds to wait for all echoes
    #[clap(short, long, default_value = "10")]
    timeout_secs: u64,
}

fn make_message(index: usize, size: usize) -> Vec<u8> {
    (0..size).map(|i| ((index + i) % 256) as u8).collect()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();
    if args.host.is_unspecified() {
        return Err(format!("--host {} cannot be used as a public address", args.host).into());
    }

    let (handlers, mut events) = SessionHandlerFactory::new();
    let factory = RudpConnectionFactory::new(handlers, RudpConfig::default());
    let (endpoint, handle) = Endpoint::bind(
        SocketAddr::new(args.host, 0),
        EndpointConfig::new(args.host),
        factory,
    )
    .await?;
    println!("Client bound to {}", handle.local_addr());

    let server = Address::from(args.server);
    handle.connect(server.clone())?;

    let expected: Vec<Vec<u8>> = (0..args.count).map(|i| make_message(i, args.size)).collect();
    for message in &expected {
        handle.send_message(server.clone(), message.clone())?;
    }
    println!("Sent {} messages of {} bytes to {}", args.count, args.size, server);

    let started = Instant::now();
    let exchange = async {
        let mut received = 0;
        let mut mismatched = 0;
        let wait = timeout(Duration::from_secs(args.timeout_secs), async {
            while received < expected.len() {
                match events.recv().await {
                    Some(SessionEvent::Message { payload, .. }) => {
                        if payload != expected[received] {
                            mismatched += 1;
                        }
                        received += 1;
                    }
                    Some(SessionEvent::Closed { peer }) => {
                        warn!("Connection to {} closed early", peer);
                        break;
                    }
                    Some(SessionEvent::Connected { peer, .. }) => info!("Connected to {}", peer),
                    None => break,
                }
            }
        })
        .await;

        if wait.is_err() {
            println!("Timed out waiting for echoes");
        }
        println!(
            "Received {}/{} echoes ({} mismatched) in {:?}",
            received,
            expected.len(),
            mismatched,
            started.elapsed()
        );

        if let Err(e) = handle.shutdown_connection(server.clone()) {
            warn!("Failed to close connection: {}", e);
        }
        if let Err(e) = handle.stop() {
            warn!("Failed to stop endpoint: {}", e);
        }
        received == expected.len() && mismatched == 0
    };

    let (result, success) = tokio::join!(endpoint.run(), exchange);
    result?;

    if success {
        println!("Test client finished");
        Ok(())
    } else {
        Err("echo test failed".into())
    }
}
