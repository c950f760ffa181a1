// src/main.rs
use anyhow::Result;
use clap::Parser;
use dotenvy::dotenv;
use log::info;

use event_live::config::Settings;
use event_live::connection::LiveClient;
use event_live::orchestrator::Orchestrator;
use event_live::protocol::EventId;

#[derive(Debug, Parser)]
#[command(name = "event-live", about = "Follow live event activity over the realtime channel")]
struct Args {
    /// Event to receive live participant counts for (repeatable)
    #[arg(short, long = "event", value_name = "ID")]
    events: Vec<i64>,

    /// Socket URL, overriding the one derived from the settings
    #[arg(long)]
    url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    env_logger::init();

    let args = Args::parse();
    let settings = Settings::new()?;

    let endpoint = match args.url {
        Some(url) => url,
        None => settings.endpoint_url()?.to_string(),
    };
    info!("Realtime endpoint: {endpoint}");

    let client = LiveClient::with_websocket(endpoint, settings.timings());
    let events = args.events.into_iter().map(EventId::from).collect();

    let mut orchestrator = Orchestrator::new(client, events);
    orchestrator.setup_monitors();

    orchestrator.run().await
}
