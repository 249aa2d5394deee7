#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Command-line adapter that replays a cable grid scenario.
//!
//! The scenario layout is placed once, then every tick runs the configured
//! generators followed by the configured distributions. Persisted energy
//! records are printed as JSON when the run completes.

mod scenario;

use std::path::PathBuf;

use anyhow::{Context, Result};
use cable_grid_core::{Event, Position};
use cable_grid_world::{self as world, query, World};
use clap::Parser;
use serde::Serialize;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use crate::scenario::Scenario;

/// Replays a cable grid scenario and prints the persisted energy records.
#[derive(Debug, Parser)]
#[command(name = "cable-grid", version)]
struct Args {
    /// Scenario TOML describing cables, machines and per-tick work.
    #[arg(long)]
    scenario: PathBuf,
    /// Number of ticks to run after placing the layout.
    #[arg(long, default_value_t = 1)]
    ticks: u32,
    /// Simulate distributions instead of committing them.
    #[arg(long)]
    simulate: bool,
    /// Log at debug level unless `RUST_LOG` says otherwise.
    #[arg(long, short)]
    verbose: bool,
}

/// Summary printed once the run completes.
#[derive(Debug, Default, PartialEq, Serialize)]
struct Report {
    ticks: u32,
    generated: u64,
    extracted: u64,
    rejected_placements: usize,
    machines: Vec<MachineReport>,
}

#[derive(Debug, PartialEq, Serialize)]
struct MachineReport {
    position: Position,
    persisted: Option<i64>,
}

/// Entry point for the cable grid command-line interface.
fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let scenario = Scenario::load(&args.scenario)?;
    let report = run(&scenario, args.ticks, args.simulate);
    let json = serde_json::to_string_pretty(&report).context("failed to encode report")?;
    println!("{json}");
    Ok(())
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn run(scenario: &Scenario, ticks: u32, simulate: bool) -> Report {
    let mut world = World::new();
    let mut events = Vec::new();
    let mut report = Report {
        ticks,
        ..Report::default()
    };

    for command in scenario.setup_commands() {
        world::apply(&mut world, command, &mut events);
    }
    record_events(&mut report, &mut events);
    info!(blocks = query::grid(&world).len(), "layout placed");

    let schedule = scenario.tick_commands(simulate);
    for tick in 0..ticks {
        for command in &schedule {
            world::apply(&mut world, command.clone(), &mut events);
        }
        debug!(tick, events = events.len(), "tick finished");
        record_events(&mut report, &mut events);
    }

    report.machines = query::records(&world)
        .into_iter()
        .map(|(position, record)| MachineReport {
            position,
            persisted: record.get(cable_grid_core::DEFAULT_RECORD_KEY),
        })
        .collect();
    info!(
        generated = report.generated,
        extracted = report.extracted,
        simulate,
        "run complete"
    );
    report
}

fn record_events(report: &mut Report, events: &mut Vec<Event>) {
    for event in events.drain(..) {
        match event {
            Event::PlacementRejected { position, reason } => {
                warn!(?position, ?reason, "placement rejected");
                report.rejected_placements += 1;
            }
            Event::EnergyGenerated { amount, .. } => {
                report.generated = report.generated.saturating_add(amount);
            }
            Event::EnergyDistributed {
                source,
                extracted,
                simulated,
                ..
            } => {
                debug!(?source, extracted, simulated, "distribution");
                report.extracted = report.extracted.saturating_add(extracted);
            }
            other => debug!(event = ?other, "event"),
        }
    }
}
