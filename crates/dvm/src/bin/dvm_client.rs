//! Requester for the memory curator DVM.
//!
//!   dvm-client memory/2026-02-05.md --memory MEMORY.md --style detailed
//!   dvm-client --list-handlers <pubkey>

use anyhow::{Context, bail};
use clap::Parser;
use dvm::{ClientConfig, JobClient, JobOutcome, JobProgress, list_handlers, logging};
use nostr_client::RelayPool;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

#[derive(Parser, Debug)]
#[command(name = "dvm-client")]
#[command(about = "Submit a memory curation job and wait for the result")]
#[command(version)]
struct Args {
    /// Daily log file to curate
    daily_log: Option<PathBuf>,

    /// Long-term memory file to compare against
    #[arg(long)]
    memory: Option<PathBuf>,

    /// Result style: concise or detailed
    #[arg(long)]
    style: Option<String>,

    /// Seconds to wait for a result
    #[arg(long)]
    timeout: Option<u64>,

    /// Seconds between polls
    #[arg(long)]
    poll_interval: Option<u64>,

    /// Relay URL (repeat or comma-delimit to use multiple relays)
    #[arg(long = "relay", env = "DVM_RELAYS", value_delimiter = ',')]
    relays: Vec<String>,

    /// Hex secret key; an ephemeral key is generated when unset
    #[arg(long, env = "NOSTR_SECRET_KEY", hide_env_values = true)]
    secret_key: Option<String>,

    /// TOML config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// List the handler announcements published by this pubkey and exit
    #[arg(long, value_name = "PUBKEY")]
    list_handlers: Option<String>,

    /// Log as JSON lines
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logging::init_tracing(args.log_json);

    let mut config = ClientConfig::load(args.config.as_deref()).context("loading config")?;
    if !args.relays.is_empty() {
        config.relays = args.relays.clone();
    }
    if args.secret_key.is_some() {
        config.secret_key = args.secret_key.clone();
    }
    if let Some(style) = &args.style {
        config.style = style.clone();
    }
    if let Some(timeout) = args.timeout {
        config.timeout_secs = timeout;
    }
    if let Some(interval) = args.poll_interval {
        config.poll_interval_secs = interval;
    }

    let pool = Arc::new(RelayPool::new());
    let mut connected = 0;
    for (url, result) in pool.connect(&config.relays).await {
        match result {
            Ok(()) => connected += 1,
            Err(e) => warn!(relay = %url, error = %e, "relay unavailable"),
        }
    }
    if connected == 0 {
        bail!("could not connect to any of {} relays", config.relays.len());
    }

    let exit = if let Some(author) = &args.list_handlers {
        print_handlers(pool.as_ref(), author, &config).await
    } else {
        submit_job(&args, &config, pool.clone()).await
    };

    pool.disconnect_all().await;
    exit
}

async fn print_handlers(pool: &RelayPool, author: &str, config: &ClientConfig) -> anyhow::Result<()> {
    let handlers = list_handlers(pool, author, config.query_timeout()).await?;
    if handlers.is_empty() {
        println!("No handler announcements from {author}");
    }
    for (event, info) in handlers {
        println!("{} ({})", info.metadata.name, info.identifier);
        println!("  kinds: {:?}", info.kinds);
        if let Some(pricing) = &info.pricing {
            println!("  price: {} {}", pricing.amount, pricing.unit);
        }
        if !info.metadata.about.is_empty() {
            println!("  about: {}", info.metadata.about);
        }
        println!("  event: {} at {}", event.id, event.created_at);
    }
    Ok(())
}

async fn submit_job(args: &Args, config: &ClientConfig, pool: Arc<RelayPool>) -> anyhow::Result<()> {
    let Some(daily_path) = &args.daily_log else {
        bail!("a daily log file is required (or use --list-handlers)");
    };
    let daily = tokio::fs::read_to_string(daily_path)
        .await
        .with_context(|| format!("reading {}", daily_path.display()))?;
    let memory = match &args.memory {
        Some(path) => Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("reading {}", path.display()))?,
        ),
        None => None,
    };

    let client = JobClient::from_config(config, config.keys()?, pool).on_progress(Arc::new(
        |progress: &JobProgress| {
            eprintln!(
                "[{:>3}s] {} {}",
                progress.elapsed.as_secs(),
                progress.status,
                progress.extra.as_deref().unwrap_or("")
            );
        },
    ));

    let request = client.curation_request(&daily, memory.as_deref(), &config.style)?;
    let (event, outcome) = client.run(&request).await?;
    eprintln!("job {} submitted", event.id);

    match outcome {
        JobOutcome::Success(response) => {
            println!("{}", response.content);
            if let Some(amount) = response.amount {
                eprintln!("provider requested {amount} msats");
                if let Some(bolt11) = response.bolt11 {
                    eprintln!("invoice: {bolt11}");
                }
            }
            Ok(())
        }
        JobOutcome::Failed { message, event } => {
            bail!("job failed ({}): {message}", event.pubkey)
        }
        JobOutcome::Timeout {
            elapsed,
            last_status,
        } => match last_status {
            Some(status) => bail!("no result after {}s (last status: {status})", elapsed.as_secs()),
            None => bail!("no response after {}s", elapsed.as_secs()),
        },
    }
}
