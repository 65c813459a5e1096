//! Loopback demo: one server, one stream, a couple of subscribers
//!
//! Run with: cargo run --example loopback [BIND_ADDR] [MESSAGES]
//!
//! Examples:
//!   cargo run --example loopback                      # binds to 127.0.0.1:0, 100 messages
//!   cargo run --example loopback 127.0.0.1:2000       # fixed port
//!   cargo run --example loopback 127.0.0.1:2000 1000  # fixed port, 1000 messages
//!
//! The server creates a stream and hands its token to two subscribers via
//! its binary form, the same bytes a real deployment would pass through a
//! control channel. The writer then pushes readings and both subscribers
//! count what arrives. The second one dials the bound address directly and
//! unsubscribes halfway.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use streamcast::{ClientConfig, ServerConfig, StreamClient, StreamServer, Token};

fn print_usage() {
    eprintln!("Usage: loopback [BIND_ADDR] [MESSAGES]");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  BIND_ADDR    Address to bind to (default: 127.0.0.1:0)");
    eprintln!("  MESSAGES     Number of messages to write (default: 100)");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }

    let bind_addr: SocketAddr = match args.get(1) {
        Some(addr) => addr.parse()?,
        None => SocketAddr::from(([127, 0, 0, 1], 0)),
    };
    let messages: u64 = match args.get(2) {
        Some(count) => count.parse()?,
        None => 100,
    };

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("streamcast=debug".parse()?)
                .add_directive("loopback=debug".parse()?),
        )
        .init();

    let server = StreamServer::bind(ServerConfig::with_addr(bind_addr)).await?;
    server.listen(|ctx| {
        tracing::info!(stream_id = ctx.stream_id(), "Subscriber accepted");
        true
    })?;

    let stream = server.make_stream();
    let wire = stream.token().to_bytes();
    println!("Serving stream {} on {}", stream.token(), server.local_addr());

    let token = Token::from_bytes(&wire)?;
    let client = StreamClient::new(ClientConfig::default())?;
    let late = StreamClient::new(ClientConfig::default())?;

    let first = Arc::new(AtomicU64::new(0));
    let second = Arc::new(AtomicU64::new(0));
    {
        let first = Arc::clone(&first);
        client.subscribe(token, move |_| {
            first.fetch_add(1, Ordering::Relaxed);
        })?;
    }
    {
        let second = Arc::clone(&second);
        late.subscribe_via(server.local_addr(), token, move |_| {
            second.fetch_add(1, Ordering::Relaxed);
        })?;
    }

    while stream.subscriber_count() < 2 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    for i in 0..messages {
        stream.write(format!("reading {}", i));

        if i == messages / 2 {
            late.unsubscribe(&token);
            println!("Unsubscribed after {} messages", i + 1);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    tokio::time::sleep(Duration::from_millis(200)).await;

    let stats = server.stats();
    println!(
        "Written: {}  received: {}  dropped: {}",
        stream.messages_written(),
        first.load(Ordering::Relaxed) + second.load(Ordering::Relaxed),
        stream.dropped_messages(),
    );
    println!(
        "Server: connections={} active={} streams={}",
        stats.total_connections, stats.active_sessions, stats.active_streams
    );

    server.shutdown();
    Ok(())
}
