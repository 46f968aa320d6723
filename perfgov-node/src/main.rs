//! perfgov - command-line host for the performance governor

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use perfgov_core::admission::Admission;
use perfgov_core::cache::{request_cache_key, DataKind};
use perfgov_core::{ConfigLoader, GovernorConfig, PerformanceGovernor};
use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "perfgov")]
#[command(about = "perfgov - in-process performance governance")]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to PERFGOV_CONFIG or ./perfgov.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Only log warnings and errors
    #[arg(long, short, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the governor and drive a synthetic workload
    Run {
        /// How long to run before printing the metrics export
        #[arg(long, default_value_t = 10)]
        duration_secs: u64,
    },

    /// Load, validate and print the effective configuration
    Config {
        /// Read this file instead of the global --config
        #[arg(long)]
        path: Option<PathBuf>,
    },

    /// Run a short warm-up and print the metrics export
    Export {
        /// JSON instead of the line-oriented text format
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = if cli.quiet { "warn" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    if let Err(e) = run_command(cli).await {
        error!("Command failed: {:#}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run_command(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run { duration_secs } => {
            let config = load_config(cli.config)?;
            run(config, Duration::from_secs(duration_secs)).await
        }
        Commands::Config { path } => {
            let config = load_config(path.or(cli.config))?;
            print!("{}", config.to_toml()?);
            Ok(())
        }
        Commands::Export { json } => {
            let config = load_config(cli.config)?;
            export(config, json).await
        }
    }
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<GovernorConfig> {
    let loader = match path {
        Some(path) => ConfigLoader::with_path(path),
        None => ConfigLoader::new(),
    };
    loader
        .load()
        .with_context(|| format!("loading {}", loader.config_path().display()))
}

async fn run(config: GovernorConfig, duration: Duration) -> anyhow::Result<()> {
    let governor = PerformanceGovernor::new(config)?;
    governor.start();
    info!("Governor started, running workload for {:?}", duration);

    let deadline = Instant::now() + duration;
    let mut round = 0u64;
    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => break,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
            _ = tokio::time::sleep(Duration::from_millis(50)) => {
                workload_round(&governor, round).await;
                round += 1;
            }
        }
    }

    let report = governor.performance_report();
    info!(
        "{} requests, {:.1}% errors, {:.1}% cache hits",
        report.api.total_requests, report.api.error_rate, report.cache.hit_rate
    );
    println!("{}", governor.metrics().export_text());

    governor.shutdown().await;
    Ok(())
}

async fn export(config: GovernorConfig, json_output: bool) -> anyhow::Result<()> {
    let governor = PerformanceGovernor::new(config)?;
    for round in 0..20 {
        workload_round(&governor, round).await;
    }

    if json_output {
        println!("{}", governor.metrics().export_json());
    } else {
        println!("{}", governor.metrics().export_text());
    }
    governor.shutdown().await;
    Ok(())
}

/// One synthetic request per route through admission, cache and dispatcher
async fn workload_round(governor: &PerformanceGovernor, round: u64) {
    const ROUTES: [&str; 3] = [
        "/api/analytics/overview",
        "/api/grades/summary",
        "/api/students",
    ];

    for route in ROUTES {
        let started = Instant::now();
        let client = format!("client-{}", round % 4);

        let status = match governor.admission().admit(&client, route) {
            Err(e) => {
                warn!("Rejected {} for {}: {}", route, client, e);
                e.http_status()
            }
            Ok(admission) => {
                if let Admission::Throttled(path) = &admission {
                    let summary = governor
                        .admission()
                        .throttle(path, || json!({"throttled": true}));
                    summary.call();
                }
                let size = 50 + (round % 10) as usize * 150;
                let params = json!({ "size": size });
                let key = request_cache_key("GET", route, Some("teacher"), Some(&client), &params);
                let compute = || async {
                    let queried = Instant::now();
                    let rows = synthetic_rows(size);
                    governor
                        .metrics()
                        .track_db_query("SELECT * FROM grades", queried.elapsed());
                    governor.optimized_compute_stats(rows).await
                };
                let result = governor
                    .cache()
                    .get_cached_or_compute(&key, compute, None)
                    .await;
                match result {
                    Ok(_) => 200,
                    Err(e) => {
                        warn!("Request {} failed: {}", route, e);
                        e.http_status()
                    }
                }
            }
        };

        governor.record_request("GET", route, status, started.elapsed());
    }

    if round % 25 == 24 {
        let removed = governor.cache().invalidate_data(DataKind::Grades);
        info!("Invalidated {} grade entries", removed);
    }
}

fn synthetic_rows(size: usize) -> Vec<Value> {
    (0..size)
        .map(|i| json!({ "studentId": i, "score": (i * 37) % 100 }))
        .collect()
}
