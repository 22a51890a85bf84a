//! polycohort: collect Polymarket splits/redemptions and report monthly
//! wallet engagement.
//!
//! Usage:
//!   polycohort fetch-splits         # collect splits for the configured range
//!   polycohort fetch-redemptions    # collect redemptions
//!   polycohort analyze              # fold stored months into metrics.json
//!   polycohort all                  # everything above, in order
//!   polycohort                      # interactive menu

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

use polycohort::collector::{Collector, CollectorOptions};
use polycohort::config::Config;
use polycohort::event::EventKind;
use polycohort::metrics::{MetricsSummary, MonthlyMetrics};
use polycohort::period::{plan, Period};
use polycohort::report::ReportLoader;
use polycohort::store::DataStore;
use polycohort::subgraph::SubgraphClient;

#[derive(Parser)]
#[command(name = "polycohort")]
#[command(version, about = "Monthly wallet engagement from the Polymarket activity subgraph")]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, default_value = "polycohort.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Clone, Copy)]
enum Command {
    /// Collect split events for every window.
    FetchSplits,
    /// Collect redemption events for every window.
    FetchRedemptions,
    /// Compute monthly metrics from stored windows.
    Analyze,
    /// Fetch splits, fetch redemptions, then analyze.
    All,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let config = if cli.config.exists() {
        Config::load(&cli.config)
            .with_context(|| format!("failed to load {}", cli.config.display()))?
    } else {
        Config::from_env()
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));
    if config.logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .init();
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        data_dir = %config.storage.data_dir.display(),
        range = format!("{} → {}", config.collect.start, config.collect.end),
        window = %config.collect.window,
        "polycohort starting"
    );

    let command = match cli.command {
        Some(c) => c,
        None => match prompt_menu()? {
            Some(c) => c,
            None => return Ok(()),
        },
    };

    let periods = planned_periods(&config)?;
    match command {
        Command::FetchSplits => fetch(&config, &periods, EventKind::Split).await?,
        Command::FetchRedemptions => fetch(&config, &periods, EventKind::Redemption).await?,
        Command::Analyze => analyze(&config, &periods)?,
        Command::All => {
            for kind in EventKind::ALL {
                fetch(&config, &periods, kind).await?;
            }
            analyze(&config, &periods)?;
        }
    }

    Ok(())
}

fn planned_periods(config: &Config) -> Result<Vec<Period>> {
    let (start, end) = config.collect.range()?;
    let periods = plan(start, end, config.collect.window)?;
    info!(windows = periods.len(), "planned collection windows");
    Ok(periods)
}

// ─── Fetch ──────────────────────────────────────────────────────────────────

async fn fetch(config: &Config, periods: &[Period], kind: EventKind) -> Result<()> {
    println!();
    println!("=== Fetching {} ({} windows) ===", kind, periods.len());

    let client = SubgraphClient::connect(
        &config.subgraph.url,
        config.subgraph.max_attempts,
        Duration::from_secs(config.subgraph.request_timeout_secs),
    )?;
    let collector = Collector::new(
        client,
        DataStore::new(&config.storage.data_dir),
        CollectorOptions::from(&config.collect),
    );

    let summary = collector
        .collect_all(periods, kind)
        .await
        .with_context(|| format!("collecting {kind}"))?;

    for w in &summary.windows {
        println!("  {:<24} {:>10}", w.label, w.records);
    }
    println!("  {:<24} {:>10}", "total", summary.total_records);
    println!(
        "Saved to {}",
        collector.store().cumulative_path(kind).display()
    );
    Ok(())
}

// ─── Analyze ────────────────────────────────────────────────────────────────

fn analyze(config: &Config, periods: &[Period]) -> Result<()> {
    println!();
    println!("=== Analyzing {} windows ===", periods.len());

    let store = DataStore::new(&config.storage.data_dir);
    let loader = ReportLoader::new(store.clone());
    let analysis = loader
        .analyze(periods.iter().map(|p| p.label.as_str()))
        .context("analysis failed")?;

    if !analysis.gaps.is_empty() {
        println!("Missing data for: {}", analysis.gaps.join(", "));
    }
    if analysis.records.is_empty() {
        println!("No months with data. Run a fetch first.");
        return Ok(());
    }

    let path = store.write_metrics(&analysis.records)?;
    display_metrics(&analysis.records);
    display_summary(&MetricsSummary::from_records(&analysis.records));
    println!();
    println!("Metrics saved to {}", path.display());
    Ok(())
}

fn display_metrics(records: &[MonthlyMetrics]) {
    println!();
    println!(
        " {:<12} | {:>9} | {:>9} | {:>9} | {:>9} | {:>9} | {:>9} | {:>10} | {:>9} | {:>11}",
        "Month", "Active", "New", "Return", "Retain%", "Redeemers", "Splitters", "Cumulative", "Splits", "Redemptions"
    );
    println!("{}", "-".repeat(126));
    for r in records {
        println!(
            " {:<12} | {:>9} | {:>9} | {:>9} | {:>8.1}% | {:>9} | {:>9} | {:>10} | {:>9} | {:>11}",
            r.month_name,
            r.monthly_active_users,
            r.new_users,
            r.returning_users,
            r.retention_rate,
            r.unique_redeemers,
            r.unique_splitters,
            r.cumulative_users,
            r.total_splits,
            r.total_redemptions,
        );
    }
}

fn display_summary(s: &MetricsSummary) {
    println!();
    println!("=== Summary ({} months) ===", s.months);
    println!("  Total active wallets:      {}", s.total_active);
    println!("  Total new wallets:         {}", s.total_new_users);
    println!("  Cumulative unique wallets: {}", s.cumulative_users);
    println!("  Avg retention rate:        {:.1}%", s.avg_retention_rate);
    println!("  Avg redeemer/splitter:     {:.2}x", s.avg_redeemer_splitter_ratio);
    if let Some((month, n)) = &s.best_acquisition {
        println!("  Best acquisition month:    {} ({} new wallets)", month, n);
    }
    if let Some((month, rate)) = &s.best_retention {
        println!("  Best retention month:      {} ({:.1}% returning)", month, rate);
    }
    if let Some((month, n)) = &s.peak_redemptions {
        println!("  Peak redemption month:     {} ({} redeemers)", month, n);
    }
}

// ─── Prompt ─────────────────────────────────────────────────────────────────

fn prompt_menu() -> Result<Option<Command>> {
    println!("=== polycohort ===");
    println!("  [1] Fetch splits");
    println!("  [2] Fetch redemptions");
    println!("  [3] Analyze stored data");
    println!("  [4] Run all steps");
    loop {
        print!("Select an option (1-4) or 'q' to quit: ");
        io::stdout().flush()?;
        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            return Ok(None);
        }
        match input.trim() {
            "1" => return Ok(Some(Command::FetchSplits)),
            "2" => return Ok(Some(Command::FetchRedemptions)),
            "3" => return Ok(Some(Command::Analyze)),
            "4" => return Ok(Some(Command::All)),
            s if s.eq_ignore_ascii_case("q") => return Ok(None),
            _ => println!("Invalid selection. Try again."),
        }
    }
}
