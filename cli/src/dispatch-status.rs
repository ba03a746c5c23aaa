mod config;

use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use serde_json::json;

use lib_dispatch::DispatchContext;

use crate::config::{CommonArgs, parse_with_dotenv};

/// Reports the reachability of the processing service and, optionally, opens the duplex channel.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    #[command(flatten)]
    common: CommonArgs,

    /// Open the duplex channel and print every status transition.
    #[arg(long)]
    connect: bool,

    /// Keep the channel open for this many seconds before exiting.
    #[arg(long, default_value_t = 0)]
    watch_secs: u64,

    /// Fetch this content address through the asset cache and report its type and size.
    #[arg(long)]
    asset: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let (args, dotenv): (Args, _) = parse_with_dotenv(None, std::env::args_os()).unwrap_or_else(|e| e.exit());
    args.common.init_logging("dispatch-status")?;
    if let Some(path) = dotenv {
        log::debug!("Loaded environment from {}", path.display());
    }
    let config = args.common.resolve()?;

    let address = config.service_address.clone();
    let ctx = DispatchContext::with_http(config)?;

    let healthy = ctx.probe_health().await?;
    println!("{}", json!({ "address": address, "healthy": healthy }));

    if args.connect {
        let mut updates = ctx.subscribe_status();
        let printer = tokio::spawn(async move {
            while let Ok(update) = updates.recv().await {
                if let Ok(line) = serde_json::to_string(&update) {
                    println!("{}", line);
                }
            }
        });

        let connected = ctx.ensure_connected().await;
        log::info!("Channel open: {}", connected);
        if connected && args.watch_secs > 0 {
            tokio::time::sleep(Duration::from_secs(args.watch_secs)).await;
        }
        ctx.shutdown();
        printer.abort();
    }

    if let Some(url) = &args.asset {
        let asset = ctx.resolve_asset(url).await?;
        println!(
            "{}",
            json!({
                "asset": url,
                "mimeType": asset.mime_type,
                "base64Len": asset.data_base64.len(),
            })
        );
    }

    Ok(())
}
