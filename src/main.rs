//! Yield Rebalancer - Main Entry Point
//!
//! Paper-runs the scheduler against a simulated venue network.

use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;
use yield_rebalancer::automation::{
    Collaborators, TaskDefinition, TaskKind, TaskScheduler, TriggerKind,
};
use yield_rebalancer::config::Config;
use yield_rebalancer::operator::{Caller, OperatorApi, Role, RoleAuthorizer};
use yield_rebalancer::persistence::PersistenceManager;
use yield_rebalancer::strategy::{AllocationAlgorithm, StrategyDefinition};
use yield_rebalancer::venue::{MockVenueNetwork, VenueClass, VenueMetrics};

/// Yield Rebalancer CLI
#[derive(Parser)]
#[command(name = "yield-rebalancer")]
#[command(version, about = "Yield venue rebalancing and task automation")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler against the simulated venue network
    Run {
        /// Stop after this many ticks (runs until Ctrl-C when omitted)
        #[arg(short, long)]
        ticks: Option<u64>,

        /// Path to SQLite database
        #[arg(short, long, default_value = "data/rebalancer.db")]
        db: String,

        /// Ignore persisted state and start from the demo setup
        #[arg(long)]
        fresh: bool,
    },

    /// Show persisted scheduler status
    Status {
        /// Path to SQLite database
        #[arg(short, long, default_value = "data/rebalancer.db")]
        db: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging()?;

    match cli.command {
        Some(Commands::Status { db }) => show_status(&db),
        Some(Commands::Run { ticks, db, fresh }) => run(ticks, &db, fresh).await,
        None => run(None, "data/rebalancer.db", false).await,
    }
}

async fn run(max_ticks: Option<u64>, db_path: &str, fresh: bool) -> Result<()> {
    info!(
        "Yield Rebalancer v{} - simulated venue network",
        env!("CARGO_PKG_VERSION")
    );

    let config = Config::load()?;
    config.validate()?;
    log_config(&config);

    let network = MockVenueNetwork::new();
    seed_network(&network).await;

    if let Some(parent) = Path::new(db_path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    let persistence = PersistenceManager::new(db_path)?;
    if fresh {
        persistence.clear_all()?;
    }

    let scheduler = Arc::new(TaskScheduler::new(
        &config,
        Collaborators::simulated(&network),
    ));
    let api = OperatorApi::new(scheduler.clone(), Arc::new(RoleAuthorizer));

    let restored = {
        let mut ctx = scheduler.context().await;
        persistence.restore_context(&mut ctx)?
    };
    if restored {
        info!("[PERSISTENCE] Restored strategies and tasks from {}", db_path);
    } else {
        info!("[PERSISTENCE] No previous state, seeding demo strategies and tasks");
        seed_operator_state(&api).await?;
    }

    let mut interval = tokio::time::interval(Duration::from_secs(scheduler.tick_interval_secs()));
    let mut tick_count: u64 = 0;

    info!("Starting scheduler loop");
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }

        drift_market(&network, tick_count).await;

        match scheduler.run_tick(Utc::now()).await {
            Ok(report) => {
                let failed = report.executed.iter().filter(|e| !e.success).count();
                info!(
                    tick = tick_count,
                    executed = report.executed.len(),
                    failed,
                    still_due = report.still_due.len(),
                    emergency = report.emergency,
                    max_deviation = %report.signals.max_deviation,
                    max_risk = %report.signals.max_risk,
                    "Tick complete"
                );
            }
            Err(e) => warn!(tick = tick_count, "Tick rejected: {}", e),
        }

        {
            let ctx = scheduler.context().await;
            if let Err(e) = persistence.save_context(&ctx) {
                error!("[PERSISTENCE] Failed to save state: {:#}", e);
            }
        }

        tick_count += 1;
        if max_ticks.is_some_and(|max| tick_count >= max) {
            break;
        }
    }

    let metrics = api.performance_metrics().await;
    info!(
        executions = metrics.total_executions,
        success_rate = %metrics.success_rate(),
        uptime = %metrics.uptime_ratio(),
        collaborator_calls = network.request_count(),
        "Yield Rebalancer shutdown complete"
    );
    Ok(())
}

/// Initialize logging to stdout and an hourly rolling file.
fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::hourly("logs", "yield-rebalancer.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // Keep the writer alive for the whole process
    Box::leak(Box::new(guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("yield_rebalancer=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .init();

    Ok(())
}

fn log_config(config: &Config) {
    info!("Configuration:");
    info!("   Max venues per strategy: {}", config.strategy.max_venues);
    info!(
        "   Emergency risk score: {}",
        config.monitor.emergency_risk_score
    );
    info!(
        "   Emergency threshold: {}",
        config.gate.emergency_threshold
    );
    info!(
        "   Min transfer size: {}",
        config.executor.min_transfer_size
    );
    info!("   Transfer cost: {}", config.executor.transfer_cost);
    info!(
        "   Tick: {}s, max {} tasks",
        config.scheduler.tick_interval_secs, config.scheduler.max_tasks_per_tick
    );
}

async fn seed_network(network: &MockVenueNetwork) {
    network
        .set_market("USDC", dec!(1), dec!(50_000_000), dec!(20_000_000))
        .await;
    network.set_risk_score("USDC", dec!(15)).await;

    network
        .add_venue(
            "USDC",
            VenueMetrics::new("aave-v3", VenueClass::Stable)
                .with_yield(dec!(0.041), dec!(0.043), dec!(0.004))
                .with_risk(dec!(12))
                .with_liquidity(dec!(8_000_000), dec!(0.72)),
            dec!(60_000),
        )
        .await;
    network
        .add_venue(
            "USDC",
            VenueMetrics::new("compound-v3", VenueClass::Stable)
                .with_yield(dec!(0.038), dec!(0.039), dec!(0.003))
                .with_risk(dec!(14))
                .with_liquidity(dec!(5_000_000), dec!(0.65)),
            dec!(25_000),
        )
        .await;
    network
        .add_venue(
            "USDC",
            VenueMetrics::new("curve-3pool", VenueClass::Growth)
                .with_yield(dec!(0.067), dec!(0.071), dec!(0.021))
                .with_risk(dec!(31))
                .with_liquidity(dec!(3_000_000), dec!(0.58)),
            dec!(15_000),
        )
        .await;
}

async fn seed_operator_state(api: &OperatorApi) -> Result<()> {
    let admin = Caller::new("bootstrap", Role::Admin);

    api.create_strategy(
        &admin,
        StrategyDefinition {
            asset: "USDC".to_string(),
            algorithm: AllocationAlgorithm::YieldOptimization,
            venues: vec![
                "aave-v3".to_string(),
                "compound-v3".to_string(),
                "curve-3pool".to_string(),
            ],
            target_allocation: vec![dec!(0.5), dec!(0.3), dec!(0.2)],
            min_allocation: vec![dec!(0.2), dec!(0.1), dec!(0)],
            max_allocation: vec![dec!(0.7), dec!(0.5), dec!(0.4)],
            deviation_threshold: dec!(0.05),
            max_slippage: dec!(0.01),
            cooldown_secs: 60,
        },
    )
    .await?;

    let tasks = [
        (TaskKind::Rebalance, TriggerKind::ThresholdBased, 0, dec!(0.05), 5),
        (TaskKind::Compound, TriggerKind::TimeBased, 300, Decimal::ZERO, 3),
        (TaskKind::RevenueDistribution, TriggerKind::TimeBased, 3600, Decimal::ZERO, 2),
        (TaskKind::RiskAssessment, TriggerKind::TimeBased, 60, Decimal::ZERO, 4),
        (TaskKind::EmergencyResponse, TriggerKind::EmergencyBased, 0, Decimal::ZERO, 10),
    ];
    for (kind, trigger, interval_secs, threshold, priority) in tasks {
        api.create_task(
            &admin,
            TaskDefinition {
                kind,
                trigger,
                interval_secs,
                threshold,
                priority,
                resource_budget: Decimal::ZERO,
                payload: serde_json::Value::Null,
            },
        )
        .await?;
    }
    Ok(())
}

/// Nudge the simulated growth venue so rebalances have something to do.
async fn drift_market(network: &MockVenueNetwork, tick: u64) {
    let step = Decimal::from(tick % 10);
    let yield_now = dec!(0.055) + step * dec!(0.003);
    network
        .update_metrics(
            "USDC",
            VenueMetrics::new("curve-3pool", VenueClass::Growth)
                .with_yield(yield_now, yield_now + dec!(0.004), dec!(0.021))
                .with_risk(dec!(31))
                .with_liquidity(dec!(3_000_000), dec!(0.58)),
        )
        .await;
    network
        .set_price("USDC", dec!(1) + (step - dec!(5)) * dec!(0.0002))
        .await;
}

/// Display persisted scheduler status.
fn show_status(db_path: &str) -> Result<()> {
    println!("Yield Rebalancer status");
    println!("=======================");

    if !Path::new(db_path).exists() {
        println!("\nDatabase not found: {}", db_path);
        println!("   The scheduler has not been started yet, or the path is incorrect.");
        return Ok(());
    }

    let persistence = PersistenceManager::new(db_path)?;

    let Some(status) = persistence.load_status()? else {
        println!("\nNo saved state found in database.");
        return Ok(());
    };

    let metrics = &status.metrics;
    println!("\nScheduler");
    println!("   ├─ Automation:       {}", if status.automation_enabled { "enabled" } else { "disabled" });
    println!("   ├─ Emergency:        {}", status.emergency.as_deref().unwrap_or("none"));
    println!("   ├─ Executions:       {} ({} failed)", metrics.total_executions, metrics.failed_executions);
    println!("   ├─ Success rate:     {:.2}%", metrics.success_rate() * dec!(100));
    println!("   ├─ Uptime:           {:.2}%", metrics.uptime_ratio() * dec!(100));
    println!("   ├─ Average cost:     {:.4}", metrics.average_cost);
    println!("   └─ Last saved:       {}", status.last_saved.format("%Y-%m-%d %H:%M:%S UTC"));

    let strategies = persistence.load_strategies()?;
    if !strategies.is_empty() {
        println!("\nStrategies");
        for strategy in &strategies {
            println!(
                "   ├─ #{} {} {:?} active={} emergency={}",
                strategy.id, strategy.asset, strategy.algorithm, strategy.active, strategy.emergency
            );
            for (venue, weight) in strategy.venues.iter().zip(&strategy.target_allocation) {
                println!("   │    {:<14} {:.4}", venue, weight);
            }
        }
    }

    let tasks = persistence.load_tasks()?;
    if !tasks.is_empty() {
        println!("\nTasks");
        for task in &tasks {
            println!(
                "   ├─ #{} {} {:?} runs={} active={}",
                task.id, task.kind, task.trigger, task.execution_count, task.active
            );
        }
    }

    let executions = persistence.recent_executions(5)?;
    if !executions.is_empty() {
        println!("\nRecent executions");
        for record in &executions {
            println!(
                "   ├─ #{} strategy {} {} transfers net {:.4} {}",
                record.id,
                record.strategy_id,
                record.transfers.len(),
                record.net_benefit,
                if record.success { "ok" } else { "failed" }
            );
        }
    }

    println!();
    Ok(())
}
