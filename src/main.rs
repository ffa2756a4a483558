// src/main.rs
use anyhow::Result;
use clap::Parser;
use dotenvy::dotenv;
use log::{error, info};

use djr_relay::{Orchestrator, RelayOptions, config::Settings};

/// Relay a server-sent event stream onto named notifications and print them.
#[derive(Debug, Parser)]
#[command(name = "djr-relay", version)]
struct Args {
    /// Server origin the endpoint is resolved against
    #[arg(long)]
    base_url: Option<String>,

    /// Stream endpoint, relative to the base url or absolute
    #[arg(long)]
    endpoint: Option<String>,

    /// Log every frame and dispatch
    #[arg(long)]
    debug: bool,

    /// Do not reconnect when the server closes the stream for good
    #[arg(long)]
    no_reconnect: bool,

    /// Event types to print; repeat for more. Without any, every payload is printed.
    #[arg(long = "subscribe", value_name = "TYPE")]
    subscriptions: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    env_logger::init();

    let args = Args::parse();

    let mut settings = Settings::new()?;
    if let Some(base_url) = args.base_url {
        settings.relay.base_url = base_url;
    }
    if let Some(endpoint) = args.endpoint {
        settings.relay.endpoint = endpoint;
    }
    settings.relay.debug |= args.debug;
    settings.relay.reconnect &= !args.no_reconnect;
    // The CLI exists to connect, the setting is for embedders
    settings.relay.auto_connect = true;

    let mut options = RelayOptions::new()
        .endpoint(settings.relay.endpoint.clone())
        .debug(settings.relay.debug)
        .on_connect(|| info!("Relay connected"))
        .on_error(|e| error!("Relay connection error: {}", e));
    if args.subscriptions.is_empty() {
        options = options.on_message(|payload| println!("{payload}"));
    }

    let mut orchestrator = Orchestrator::from_settings(&settings)?.with_options(options);

    for event_type in &args.subscriptions {
        let key = djr_relay::envelope::event_key(event_type);
        orchestrator.subscribe(event_type, move |detail| {
            println!("{key} {detail}");
            Ok(())
        });
    }

    orchestrator.on_ready()?;
    orchestrator.run().await
}
