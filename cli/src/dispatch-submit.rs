mod config;

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;
use futures_util::future::join_all;
use serde_json::{Value, json};
use tokio::signal;

use lib_dispatch::{Completion, DispatchContext, JobOutcome, JobSpec};

use crate::config::{CommonArgs, parse_with_dotenv};

/// Submits one batch of jobs to the processing service and prints each outcome as a JSON line.
#[derive(Parser, Debug)]
#[command(
    version,
    about,
    long_about = "Submits one batch of image jobs. Jobs go through the REST fallback until the service has delivered its first result, then over the shared duplex channel. Each outcome is printed as one JSON line; the exit status is non-zero if any job failed."
)]
struct Args {
    #[command(flatten)]
    common: CommonArgs,

    /// Content address to process. May be repeated.
    #[arg(long = "src")]
    sources: Vec<String>,

    /// JSON5 file holding one payload object or an array of them.
    #[arg(short, long)]
    input: Option<PathBuf>,
}

fn read_payloads(args: &Args) -> Result<Vec<Value>> {
    let mut payloads: Vec<Value> = args.sources.iter().map(|src| json!({ "src": src })).collect();

    if let Some(path) = &args.input {
        let raw = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let value: Value = serde_json5::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
        match value {
            Value::Array(items) => payloads.extend(items),
            Value::Object(_) => payloads.push(value),
            other => bail!("{} must hold an object or an array, found {}", path.display(), other),
        }
    }
    Ok(payloads)
}

fn render(outcome: Option<JobOutcome>) -> (bool, Value) {
    match outcome {
        Some(Ok(done)) => (
            true,
            json!({
                "ok": true,
                "jobId": done.job_id,
                "contentId": done.content_id,
                "fromCache": done.from_cache,
                "result": done.result,
            }),
        ),
        Some(Err(e)) => (false, json!({ "ok": false, "error": e.to_string() })),
        None => (false, json!({ "ok": false, "error": "cancelled" })),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let (args, dotenv): (Args, _) = parse_with_dotenv(None, std::env::args_os()).unwrap_or_else(|e| e.exit());
    args.common.init_logging("dispatch-submit")?;
    if let Some(path) = dotenv {
        log::debug!("Loaded environment from {}", path.display());
    }
    let config = args.common.resolve()?;

    let payloads = read_payloads(&args)?;
    if payloads.is_empty() {
        bail!("nothing to submit: pass --src or --input");
    }

    let ctx = DispatchContext::with_http(config)?;
    let batch_id = ctx.begin_batch();
    log::info!("Submitting {} job(s) in batch {}", payloads.len(), batch_id);

    let handles: Vec<_> = payloads
        .into_iter()
        .map(|payload| {
            let (completion, handle) = Completion::channel();
            ctx.submit(JobSpec::new(payload, completion).with_batch_id(batch_id.clone()));
            handle
        })
        .collect();

    let outcomes = tokio::select! {
        outcomes = join_all(handles.into_iter().map(|h| h.outcome())) => outcomes,
        _ = signal::ctrl_c() => {
            let dropped = ctx.cancel_batch(&batch_id);
            log::warn!("Interrupted: batch {} cancelled ({} pending dropped)", batch_id, dropped);
            ctx.shutdown();
            std::process::exit(130);
        }
    };

    let mut failures = 0;
    for outcome in outcomes {
        let (ok, line) = render(outcome);
        if !ok {
            failures += 1;
        }
        println!("{}", line);
    }
    ctx.shutdown();

    if failures > 0 {
        bail!("{} job(s) failed", failures);
    }
    Ok(())
}
