//! # Live Dispatch Test
//!
//! Runs one job against a deployed processing service through the real HTTP
//! and WebSocket transports and prints what came back.

use clap::Parser;
use serde_json::json;

use lib_dispatch::{DispatchConfig, DispatchContext};

#[derive(Parser, Debug)]
#[command(about = "Sends one job to a live processing service")]
struct Args {
    /// Base address of the service.
    #[arg(long, env = "DISPATCH_SERVICE_ADDRESS", default_value = "http://localhost:8080")]
    address: String,

    /// Content address to process.
    #[arg(long)]
    src: String,

    /// Skip the REST cold-start path and go straight to the channel.
    #[arg(long)]
    channel_only: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    project_tests::init_test_logging();
    let args = Args::parse();

    let config = DispatchConfig {
        service_address: args.address.clone(),
        cold_start_rest: !args.channel_only,
        ..DispatchConfig::default()
    };
    let ctx = DispatchContext::with_http(config)?;

    println!("[*] Probing {} ...", args.address);
    if !ctx.probe_health().await? {
        eprintln!("\n[ERROR] Service did not answer the health probe.");
        std::process::exit(1);
    }

    println!("[*] Submitting {} ...", args.src);
    match ctx.run(json!({ "src": args.src })).await {
        Some(Ok(done)) => {
            println!("\n[SUCCESS] Job {} finished:", done.job_id);
            println!("-----------------------------------------------");
            println!("{}", serde_json::to_string_pretty(&done.result)?);
            println!("-----------------------------------------------");
            println!("[INFO] Final connection state: {:?}", ctx.connection_state());
        }
        Some(Err(e)) => {
            eprintln!("\n[ERROR] Job failed:");
            eprintln!(">>> {}", e);
            ctx.shutdown();
            std::process::exit(1);
        }
        None => eprintln!("\n[WARN] Job was cancelled."),
    }

    ctx.shutdown();
    Ok(())
}
