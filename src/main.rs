// src/main.rs - farm-host: runs the scheduler and monitor loops for a printer fleet
use clap::Parser;
use std::path::Path;

use krusty_farm::config::{self, FarmConfig};
use krusty_farm::events::CallbackError;
use krusty_farm::maintenance::{FailureKind, MaintenancePredictor, MaintenanceRecord};
use krusty_farm::monitor::FarmMonitor;
use krusty_farm::optimizer::FarmOptimizer;
use krusty_farm::print_job::ScheduledJob;
use krusty_farm::scheduler::FarmScheduler;

#[derive(Parser, Debug)]
#[command(name = "farm-host", about = "Print farm scheduler and fleet monitor.")]
struct Cli {
    /// Path to the farm TOML config
    #[arg(short, long, default_value = "farm.toml")]
    config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: tracing::Level,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .init();

    tracing::info!("Starting farm host");

    let config = if Path::new(&cli.config).exists() {
        tracing::info!("Loading configuration from: {}", cli.config);
        config::load_config(&cli.config)?
    } else {
        tracing::warn!("Config file '{}' not found, using defaults", cli.config);
        FarmConfig::default()
    };

    let optimizer = FarmOptimizer::new();
    let scheduler = FarmScheduler::new(optimizer.clone(), config.scheduler.clone());
    let monitor = FarmMonitor::with_clock(config.monitor.clone(), optimizer.clock());
    let maintenance = MaintenancePredictor::with_clock(optimizer.clock());

    for profile in &config.printers {
        monitor.register_printer(&profile.printer_id).await;
        maintenance.register_printer(&profile.printer_id).await;
        optimizer.register_printer(profile.clone()).await;
    }
    tracing::info!(printers = config.printers.len(), "Fleet registered");

    {
        let monitor = monitor.clone();
        let maintenance = maintenance.clone();
        let optimizer = optimizer.clone();
        let block_on_required = config.maintenance.block_on_required;
        scheduler
            .on_job_complete(move |job: ScheduledJob| {
                let monitor = monitor.clone();
                let maintenance = maintenance.clone();
                let optimizer = optimizer.clone();
                async move {
                    monitor.record_job_outcome(true).await;
                    let Some(printer_id) = job.assigned_printer.as_deref() else {
                        return Ok::<(), CallbackError>(());
                    };
                    maintenance
                        .add_print_time(printer_id, job.print_hours().unwrap_or(0.0))
                        .await;
                    if block_on_required {
                        maintenance.sync_schedulable(&optimizer, printer_id).await;
                    }
                    Ok(())
                }
            })
            .await;
    }
    {
        let monitor = monitor.clone();
        let maintenance = maintenance.clone();
        scheduler
            .on_job_fail(move |job: ScheduledJob| {
                let monitor = monitor.clone();
                let maintenance = maintenance.clone();
                async move {
                    monitor.record_job_outcome(false).await;
                    if let Some(printer_id) = job.assigned_printer.as_deref() {
                        maintenance.record_failure(printer_id, FailureKind::Other).await;
                    }
                    Ok::<(), CallbackError>(())
                }
            })
            .await;
    }

    if config.maintenance.block_on_required {
        let handle = maintenance.clone();
        let optimizer = optimizer.clone();
        maintenance
            .on_maintenance(move |record: MaintenanceRecord| {
                let maintenance = handle.clone();
                let optimizer = optimizer.clone();
                async move {
                    maintenance.sync_schedulable(&optimizer, &record.printer_id).await;
                    Ok::<(), CallbackError>(())
                }
            })
            .await;
    }

    // Monitor status is not pushed into the optimizer registry. Device
    // integrations call `set_availability` when a printer drops out.
    scheduler.start().await;
    monitor.start().await;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");

    scheduler.stop().await;
    monitor.stop().await;

    let summary = scheduler.get_schedule_summary().await;
    match serde_json::to_string(&summary) {
        Ok(json) => tracing::info!("Final schedule summary: {}", json),
        Err(e) => tracing::warn!("Could not serialize schedule summary: {}", e),
    }
    Ok(())
}
