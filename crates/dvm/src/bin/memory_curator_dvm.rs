//! Memory Curator DVM
//!
//! Serves kind 5700 memory curation jobs on the configured relays:
//!   memory-curator-dvm --relay wss://nos.lol --announce
//!
//! `--test` runs a sample job locally without touching any relay.

use anyhow::Context;
use clap::Parser;
use dvm::{DvmConfig, DvmService, JobInputs, JobProcessor, MemoryCurator, logging};
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "memory-curator-dvm")]
#[command(about = "NIP-90 memory curator: suggests long-term memory additions from daily logs")]
#[command(version)]
struct Args {
    /// TOML config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Relay URL (repeat or comma-delimit to use multiple relays)
    #[arg(long = "relay", env = "DVM_RELAYS", value_delimiter = ',')]
    relays: Vec<String>,

    /// Hex secret key; an ephemeral key is generated when unset
    #[arg(long, env = "NOSTR_SECRET_KEY", hide_env_values = true)]
    secret_key: Option<String>,

    /// Publish a NIP-89 handler announcement on start
    #[arg(long)]
    announce: bool,

    /// Log as JSON lines
    #[arg(long)]
    log_json: bool,

    /// Process a sample job locally and exit
    #[arg(long)]
    test: bool,
}

const SAMPLE_LOG: &str = "# 2026-02-05 Test Log

## Session 1 (10:00)
- [10:00] Built test-tool.mjs — a sample tool
- [10:05] Key insight: Testing is important
- [10:10] Realized that DVMs need good error handling

## Stats
- Nostr notes: 25
- Sats: 10000
";

const SAMPLE_MEMORY: &str = "# MEMORY.md

## What I Built
- other-tool.mjs — something else
";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logging::init_tracing(args.log_json);

    if args.test {
        return run_sample();
    }

    let mut config = DvmConfig::load(args.config.as_deref()).context("loading config")?;
    if !args.relays.is_empty() {
        config.relays = args.relays;
    }
    if args.secret_key.is_some() {
        config.secret_key = args.secret_key;
    }
    config.announce |= args.announce;

    let service = DvmService::new(config).context("starting service")?;
    info!(pubkey = %service.public_key(), "memory curator ready");

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "could not listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };
    service.run(shutdown).await.context("service loop")?;
    Ok(())
}

fn run_sample() -> anyhow::Result<()> {
    let curator = MemoryCurator::new()?;
    let inputs = JobInputs::default()
        .with_named("daily", SAMPLE_LOG)
        .with_named("memory", SAMPLE_MEMORY)
        .with_param("style", "detailed");

    curator.validate(&inputs)?;
    let output = curator.process(&inputs)?;

    println!(
        "{}",
        serde_json::to_string_pretty(&output.extraction["extracted"])?
    );
    println!();
    println!("{}", output.content);
    Ok(())
}
