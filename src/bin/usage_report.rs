//! Print a usage report for the local Claude Code logs
//!
//! Run with: cargo run --bin usage_report -- --help

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Local, Utc};
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use claude_usage_engine::usage::{
    EngineConfig, SessionProvider, TodayUsage, UsageProvider, UsageService, UsageStats,
};

#[derive(Debug, Parser)]
#[command(name = "usage_report", about = "Summarize Claude Code token usage and cost")]
struct Args {
    /// Claude data directory (defaults to $CLAUDE_CONFIG_DIR, then ~/.claude)
    #[arg(long)]
    data_path: Option<String>,

    /// Session window length in hours
    #[arg(long, default_value_t = 5.0)]
    session_hours: f64,

    /// Emit the report as JSON
    #[arg(long)]
    json: bool,

    /// Also list per-day totals
    #[arg(long)]
    daily: bool,
}

fn setup_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = fmt().with_env_filter(filter).with_writer(std::io::stderr).try_init();
}

fn format_tokens(tokens: u64) -> String {
    if tokens >= 1_000_000 {
        format!("{:.1}M", tokens as f64 / 1_000_000.0)
    } else if tokens >= 1_000 {
        format!("{:.1}K", tokens as f64 / 1_000.0)
    } else {
        tokens.to_string()
    }
}

fn print_today(today: &TodayUsage, limit: u64) {
    println!("=== Today ({}) ===", today.summary.date);
    println!("Cost:   ${:.4}", today.summary.cost_usd);
    println!("Tokens: {}", format_tokens(today.summary.tokens.total()));
    println!("Events: {}", today.summary.event_count);
    println!();

    println!("=== Active Session ===");
    match &today.active_session {
        Some(session) => {
            let remaining = session.time_remaining(Utc::now());
            println!(
                "Window: {} -> {}",
                session.start_time.with_timezone(&Local).format("%H:%M"),
                session.end_time.with_timezone(&Local).format("%H:%M")
            );
            println!(
                "Remaining: {}h {:02}m",
                remaining.num_hours(),
                remaining.num_minutes() % 60
            );
            println!("Tokens: {}", format_tokens(session.total_tokens()));
            println!("Cost:   ${:.4}", session.cost_usd);
            if session.burn_rate.is_zero() {
                println!("Burn rate: not enough data");
            } else {
                println!(
                    "Burn rate: {:.0} tokens/min, ${:.2}/h",
                    session.burn_rate.tokens_per_minute, session.burn_rate.cost_per_hour
                );
            }
            match session.limit_usage() {
                Some(ratio) => println!(
                    "Limit: {} ({:.1}% used)",
                    format_tokens(limit),
                    ratio * 100.0
                ),
                None => println!("Limit: unknown"),
            }
        }
        None => println!("No active session"),
    }
    println!();
}

fn print_history(stats: &UsageStats, daily: bool) {
    println!("=== All Time ===");
    println!("Cost:     ${:.4}", stats.total_cost_usd);
    println!("Tokens:   {}", format_tokens(stats.total_tokens()));
    println!("Sessions: {}", stats.session_count);
    println!();

    println!("{:<32} {:>10} {:>12} {:>7}", "Model", "Tokens", "Cost", "Share");
    for model in &stats.by_model {
        println!(
            "{:<32} {:>10} {:>12} {:>6.1}%",
            model.model,
            format_tokens(model.tokens.total()),
            format!("${:.4}", model.cost_usd),
            model.percentage
        );
    }

    if daily {
        println!();
        println!("{:<12} {:>10} {:>12} {:>7}", "Date", "Tokens", "Cost", "Events");
        for day in &stats.by_date {
            println!(
                "{:<12} {:>10} {:>12} {:>7}",
                day.date.to_string(),
                format_tokens(day.tokens.total()),
                format!("${:.4}", day.cost_usd),
                day.event_count
            );
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_tracing();
    let args = Args::parse();

    let mut config = EngineConfig {
        session_duration_hours: args.session_hours,
        ..EngineConfig::default()
    };
    if let Some(path) = args.data_path {
        config = config.with_data_path(path);
    }

    let service = Arc::new(UsageService::new(config));
    let projects_dir = service.projects_dir();
    if !projects_dir.is_dir() {
        log::warn!("No projects directory at {:?}", projects_dir);
    }

    let today = Arc::clone(&service)
        .load_today()
        .await
        .context("failed to load today's usage")?;
    let limit = service.token_limit().context("failed to infer token limit")?;
    let stats = service.usage_stats().context("failed to aggregate usage")?;

    if args.json {
        let report = serde_json::json!({
            "today": today,
            "tokenLimit": limit,
            "stats": &*stats,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    print_today(&today, limit);
    print_history(&stats, args.daily);
    Ok(())
}
