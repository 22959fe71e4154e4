//! Tap: Fastcast push channel
//!
//! Discovers the websocket host, connects and:
//! - Prints every inbound frame with its op code
//! - Optionally subscribes to one game and counts patched snapshots
//! - Listens for `--seconds` (default 30), then prints an op code summary

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::Parser;
use manifootball::FASTCAST_HOST_URL;
use manifootball::fastcast::{FastcastConnection, Frame};

#[derive(Parser)]
#[command(name = "tap_fastcast", about = "Print raw Fastcast frames")]
struct Cli {
    /// How long to listen
    #[arg(long, default_value_t = 30)]
    seconds: u64,

    /// Event id to subscribe to
    #[arg(long)]
    game: Option<String>,

    #[arg(long, default_value = "football-college-football")]
    topic: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    println!("=== Tap: Fastcast ===");
    println!("Discovery: {FASTCAST_HOST_URL}");
    println!();

    let mut conn = FastcastConnection::new();
    let mut frames = conn.frames();

    println!("--- Connecting ---");
    conn.connect().await?;
    println!("Connected");
    println!();

    let mut subscription = match &cli.game {
        Some(game) => {
            println!("--- Subscribing to gp-{}-{game} ---", cli.topic);
            Some(conn.subscribe(game, &cli.topic)?)
        }
        None => None,
    };

    println!("--- Listening for {} seconds ---", cli.seconds);
    let start = Instant::now();
    let deadline = tokio::time::sleep(Duration::from_secs(cli.seconds));
    tokio::pin!(deadline);
    let mut op_counts: BTreeMap<&'static str, usize> = BTreeMap::new();
    let mut snapshot_count = 0usize;

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => break,
            frame = frames.recv() => {
                let Some(frame) = frame else {
                    println!("Frame stream ended");
                    break;
                };
                *op_counts.entry(frame.op()).or_default() += 1;
                println!("[{:.1}s] {}", start.elapsed().as_secs_f64(), describe(&frame));
            }
            snapshot = next_snapshot(&mut subscription) => match snapshot {
                Some(snapshot) => {
                    snapshot_count += 1;
                    println!(
                        "[{:.1}s] snapshot sid={} mid={}",
                        start.elapsed().as_secs_f64(),
                        snapshot.sid,
                        snapshot.mid
                    );
                }
                None => subscription = None,
            },
        }
    }

    conn.dispose().await?;

    println!();
    println!("--- Summary ---");
    println!("Duration: {:.1}s", start.elapsed().as_secs_f64());
    for (op, count) in &op_counts {
        println!("  {op}: {count}");
    }
    if cli.game.is_some() {
        println!("Snapshots: {snapshot_count}");
    }
    println!();
    println!("=== Tap Complete ===");
    Ok(())
}

async fn next_snapshot(
    subscription: &mut Option<manifootball::fastcast::Subscription>,
) -> Option<manifootball::fastcast::Snapshot> {
    match subscription {
        Some(sub) => sub.next().await,
        None => std::future::pending().await,
    }
}

fn describe(frame: &Frame) -> String {
    match frame {
        Frame::Connect(c) => format!("C sid={:?} rc={:?} hbi={:?}", c.sid, c.rc, c.hbi),
        Frame::Heartbeat(h) => format!("H mid={} tc={} pl={}", h.mid, h.tc, h.pl),
        Frame::Result(r) => format!("R mid={} tc={} ({} bytes)", r.mid, r.tc, r.pl.len()),
        Frame::Session(s) => format!("S sid={} tc={}", s.sid, s.tc),
        other => other.op().to_string(),
    }
}
