// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! frameipc probe - Exercise the messaging layer without a real guest.
//!
//! Wires a host engine to in-memory guest endpoints and runs scripted
//! scenarios, printing every physical write the host made.
//!
//! # Usage
//!
//! ```bash
//! # Run every scenario
//! frameipc-probe
//!
//! # Only the retry scenario, with a short per-attempt timeout
//! frameipc-probe --scenario retry --timeout-ms 300 --retry 2
//!
//! # Frame tree with five nested frames, JSON output
//! frameipc-probe --scenario frames --frames 5 --json
//!
//! # Using configuration file
//! frameipc-probe --config ipc.toml
//! ```

mod report;
mod scenario;

use clap::Parser;
use frameipc::IpcConfig;
use scenario::Scenario;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// frameipc probe
#[derive(Parser, Debug, Clone)]
#[command(name = "frameipc-probe")]
#[command(about = "frameipc probe - Run scripted host/guest messaging scenarios")]
#[command(version)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Scenario to run
    #[arg(short, long, value_enum, default_value = "all")]
    scenario: Scenario,

    /// Nested frames to create (broadcast and frames scenarios)
    #[arg(short, long, default_value = "3")]
    frames: usize,

    /// Per-attempt call timeout in milliseconds (overrides config)
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Retry budget (overrides config)
    #[arg(long)]
    retry: Option<u32>,

    /// Print one JSON report per scenario
    #[arg(long)]
    json: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn load_config(args: &Args) -> Result<IpcConfig, frameipc::ConfigError> {
    let mut config = match &args.config {
        Some(path) => IpcConfig::from_file(path)?,
        // Keep the retry scenario short unless asked otherwise.
        None => IpcConfig::default().timeout(Duration::from_millis(500)),
    };
    if let Some(ms) = args.timeout_ms {
        config = config.timeout(Duration::from_millis(ms));
    }
    if let Some(retry) = args.retry {
        config = config.retry(retry);
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Setup logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("frameipc={0},frameipc_probe={0}", args.log_level)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!("frameipc probe v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args)?;
    info!(
        "timeout {:?}, retry {}, fail fast {}",
        config.default_timeout(),
        config.default_retry,
        config.fail_fast_unroutable
    );

    let mut failed = 0;
    for scenario in args.scenario.expand() {
        let report = scenario::run(scenario, &config, args.frames).await;
        if args.json {
            report.print_json()?;
        } else {
            report.print_text();
        }
        if !report.ok {
            error!("scenario {} failed", report.scenario);
            failed += 1;
        }
    }

    if failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}
