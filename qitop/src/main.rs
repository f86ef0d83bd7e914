//! # qitop - Main Entry Point
//!
//! Headless monitor: prints the method ranking every poll cycle and, when
//! a method is selected with `--service/--method`, each correlated call.
//! `--export` writes the final ranking and the traced calls as JSON.

// Elapsed time is printed as f64 seconds
#![allow(clippy::cast_precision_loss)]

use std::fs::File;
use std::io::BufWriter;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use log::warn;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use qitop::bus::MemoryBus;
use qitop::cli::Args;
use qitop::demo::SimulatedTraffic;
use qitop::domain::MonitorError;
use qitop::export::RecordExporter;
use qitop::monitor::Monitor;
use qitop::report::{display_call_record, display_ranking, display_selection, display_summary};

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_USAGE: i32 = 2;

/// Simulated calls generated per demo tick.
const DEMO_CALLS_PER_TICK: usize = 4;
const DEMO_TICK: Duration = Duration::from_millis(20);

#[derive(Error, Debug)]
#[error("{0}")]
struct UsageError(&'static str);

fn main() {
    env_logger::init();
    std::process::exit(match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            let code = exit_code_for(&e);
            eprintln!("error: {e:#}");
            code
        }
    });
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    let user_input = err.chain().any(|cause| {
        cause.is::<UsageError>()
            || cause.downcast_ref::<MonitorError>().is_some_and(MonitorError::is_user_input)
    });
    if user_input {
        EXIT_USAGE
    } else {
        EXIT_ERROR
    }
}

#[tokio::main]
async fn run() -> Result<()> {
    let args = Args::parse();
    let quiet = args.quiet;

    if !args.demo {
        return Err(UsageError(
            "no bus transport is built into this binary; \
             run with --demo to monitor simulated services",
        )
        .into());
    }

    if !quiet {
        println!("qitop v{}", env!("CARGO_PKG_VERSION"));
        println!("bus: simulated (demo)");
    }

    // ── Bus and simulated traffic ───────────────────────────────────────
    let bus = MemoryBus::new();
    SimulatedTraffic::install(&bus);
    let traffic_token = CancellationToken::new();
    let traffic = tokio::spawn(SimulatedTraffic::new(bus.clone(), None).run(
        DEMO_TICK,
        DEMO_CALLS_PER_TICK,
        traffic_token.clone(),
    ));

    // ── Monitoring session ──────────────────────────────────────────────
    let config = args.monitor_config();
    let monitor = Monitor::start(Arc::new(bus), config.clone())
        .await
        .context("Failed to start monitoring")?;

    if let Some((service, method)) = args.initial_selection() {
        match monitor.select_method(service, method).await {
            Ok(selection) => {
                if !quiet {
                    display_selection(&selection);
                }
            }
            Err(err) => {
                traffic_token.cancel();
                if let Err(shutdown_err) = monitor.shutdown().await {
                    warn!("shutdown after failed selection: {shutdown_err}");
                }
                return Err(anyhow::Error::new(err)
                    .context(format!("Failed to select {service}.{method}")));
            }
        }
    }

    let records = monitor.records();
    let mut exporter = args.export.as_ref().map(|_| RecordExporter::new());

    // Setup Ctrl+C handler
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let monitoring_start = Instant::now();
    let duration_limit = args.duration_limit();
    let mut ticker = tokio::time::interval(config.poll_interval);
    let mut exit_reason = "interrupted";

    loop {
        if let Some(limit) = duration_limit {
            if monitoring_start.elapsed() >= limit {
                exit_reason = "duration limit reached";
                break;
            }
        }

        tokio::select! {
            _ = ticker.tick() => {}
            _ = &mut ctrl_c => break,
            () = monitor.session().cancelled() => {
                exit_reason = "session ended";
                break;
            }
        }

        let selection = monitor.selection();
        for record in records.try_iter() {
            if let (false, Some(selection)) = (quiet, selection.as_ref()) {
                display_call_record(selection, &record);
            }
            if let Some(ref mut exporter) = exporter {
                exporter.add_record(record);
            }
        }

        if !quiet {
            display_ranking(&monitor.ranking_snapshot(), args.top);
        }
    }

    // ── Shutdown ────────────────────────────────────────────────────────
    traffic_token.cancel();
    let ranking = monitor.ranking_snapshot();
    let services = monitor.registry().len();
    let correlator = monitor.correlator_stats();
    let session_result = monitor.shutdown().await;

    if let Some(ref mut exporter) = exporter {
        for record in records.try_iter() {
            exporter.add_record(record);
        }
    }
    if let Err(err) = traffic.await {
        warn!("demo traffic task failed: {err}");
    }

    if !quiet {
        display_summary(
            exit_reason,
            monitoring_start.elapsed().as_secs_f64(),
            services,
            ranking.len(),
            correlator,
        );
    }

    if let (Some(mut exporter), Some(export_path)) = (exporter, args.export.as_ref()) {
        exporter.set_ranking(ranking);

        let file = File::create(export_path).context("Failed to create export file")?;
        let writer = BufWriter::new(file);
        exporter.export(writer).context("Failed to export calls")?;

        if !quiet {
            println!(
                "saved: {} ({} calls, {} older calls dropped)",
                export_path.display(),
                exporter.record_count(),
                exporter.dropped_count()
            );
        }
    }

    session_result.context("Monitoring session failed")?;
    Ok(())
}
