use anyhow::{Context, Result};
use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use lib_events::{Event, WsResponse};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, protocol::Message},
};

#[derive(Parser, Debug)]
#[clap(author, version, about = "Prints every snapshot an event stream delivers", long_about = None)]
struct Args {
    /// Stream URL, e.g. ws://127.0.0.1:9003/ws/v1/clusters/alpha/groups/web/events?namespace=prod
    #[clap(long)]
    url: String,

    /// Bearer token sent with the upgrade request
    #[clap(long, env = "EVENTS_TOKEN")]
    token: Option<String>,

    /// Summary interval in seconds
    #[clap(short, long, default_value_t = 60)]
    report_interval_seconds: u64,
}

#[derive(Default)]
struct Stats {
    snapshots: u64,
    errors: u64,
    last_size: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let stats = Arc::new(Mutex::new(Stats::default()));

    // Clone for the reporter task
    let stats_reporter = Arc::clone(&stats);
    let report_interval = Duration::from_secs(args.report_interval_seconds.max(1));
    tokio::spawn(async move {
        loop {
            sleep(report_interval).await;
            let data = match stats_reporter.lock() {
                Ok(data) => data,
                Err(poisoned) => poisoned.into_inner(),
            };
            println!("\n----- Summary -----");
            println!("Snapshots: {}, errors: {}", data.snapshots, data.errors);
            println!("Last snapshot size: {}", data.last_size);
            println!("-------------------\n");
        }
    });

    let mut request = args.url.as_str().into_client_request()?;
    if let Some(token) = &args.token {
        request
            .headers_mut()
            .insert("Authorization", format!("Bearer {}", token).parse()?);
    }

    println!("Connecting to {}...", args.url);
    let (ws_stream, _) = connect_async(request).await.context("Failed to connect")?;
    let (mut write, mut read) = ws_stream.split();
    println!("Connected. Press Ctrl+C to stop.");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                let _ = write.send(Message::Close(None)).await;
                break;
            }
            msg = read.next() => {
                let Some(msg) = msg else { break };
                match msg? {
                    Message::Text(text) => {
                        let response: WsResponse<Vec<Event>> = serde_json::from_str(&text)?;
                        let mut data = match stats.lock() {
                            Ok(data) => data,
                            Err(poisoned) => poisoned.into_inner(),
                        };
                        if response.is_error() {
                            data.errors += 1;
                            println!("error: {}", response.message);
                            continue;
                        }
                        let events = response.payload.unwrap_or_default();
                        data.snapshots += 1;
                        data.last_size = events.len();
                        match events.last() {
                            Some(newest) => println!(
                                "snapshot #{}: {} events, newest {} ({}: {})",
                                data.snapshots,
                                events.len(),
                                newest.metadata.name,
                                newest.reason,
                                newest.message
                            ),
                            None => println!("snapshot #{}: empty", data.snapshots),
                        }
                    }
                    Message::Close(frame) => {
                        println!("Server closed the stream: {:?}", frame);
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    Ok(())
}
