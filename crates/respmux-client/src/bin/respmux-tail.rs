// Tail published messages from a RESP server.
use anyhow::{Context, Result, bail};
use clap::Parser;
use respmux_client::{MessageKind, MessageSink, PubSubConfig, PubSubConn};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "respmux-tail")]
#[command(about = "Subscribe to channels and patterns and print every message")]
struct Args {
    /// Server address (host:port)
    #[arg(long, default_value = "127.0.0.1:6379")]
    addr: String,

    /// Channel to subscribe to (repeatable)
    #[arg(long = "channel")]
    channels: Vec<String>,

    /// Pattern to subscribe to (repeatable)
    #[arg(long = "pattern")]
    patterns: Vec<String>,

    /// YAML config override file
    #[arg(long)]
    config: Option<String>,

    /// Sink buffer depth
    #[arg(long, default_value = "1024")]
    buffer: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    if args.channels.is_empty() && args.patterns.is_empty() {
        bail!("nothing to tail: pass --channel and/or --pattern");
    }
    let config = PubSubConfig::from_env_or_yaml(args.config.as_deref())?;
    let addr = tokio::net::lookup_host(&args.addr)
        .await
        .with_context(|| format!("resolve {}", args.addr))?
        .next()
        .with_context(|| format!("no address for {}", args.addr))?;

    let (pubsub, mut closed) = {
        let conn = respmux_transport::TcpConn::connect(addr, config.transport_config())
            .await
            .with_context(|| format!("connect to {addr}"))?;
        PubSubConn::with_close_observer(conn, &config)
    };
    info!(%addr, channels = ?args.channels, patterns = ?args.patterns, "connected");

    let (sink, mut messages) = MessageSink::channel(args.buffer.max(1));
    if !args.channels.is_empty() {
        pubsub
            .subscribe(&sink, args.channels.as_slice())
            .await
            .context("subscribe")?;
    }
    if !args.patterns.is_empty() {
        pubsub
            .psubscribe(&sink, args.patterns.as_slice())
            .await
            .context("psubscribe")?;
    }

    loop {
        tokio::select! {
            message = messages.recv() => {
                let Some(message) = message else { break };
                let payload = String::from_utf8_lossy(&message.payload);
                match (message.kind, message.pattern.as_deref()) {
                    (MessageKind::PMessage, Some(pattern)) => {
                        println!("[{pattern}] {}: {payload}", message.channel);
                    }
                    _ => println!("{}: {payload}", message.channel),
                }
            }
            cause = &mut closed => {
                match cause {
                    Ok(Some(cause)) => warn!(error = %cause, "connection lost"),
                    _ => info!("connection closed"),
                }
                return Ok(());
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
        }
    }
    pubsub.close().await.context("close")?;
    Ok(())
}
