//! Wugsim CLI - runs a word usage graph annotation simulation
//!
//! Usage:
//!   wugsim <config.json>                  # Run and print a summary
//!   wugsim <config.json> --seed 7         # Override the configured seed
//!   wugsim <config.json> -o json          # Output the report as JSON
//!   wugsim <config.json> -vv              # Trace-level engine logging

use clap::Parser;
use serde_json::json;
use std::process;
use tracing_subscriber::EnvFilter;
use wugsim_core::config::RunConfig;
use wugsim_core::engine::listener::{CheckpointListener, MetricRow};
use wugsim_core::metrics::{AdjustedRandIndex, MetricFn};
use wugsim_core::{SimulationReport, UsageGraph};

#[derive(Parser)]
#[command(name = "wugsim")]
#[command(version)]
#[command(about = "Wugsim - word usage graph annotation simulator")]
#[command(
    long_about = "Simulate noisy annotation of a word usage graph, clustering the observed graph \
                  and stopping on statistical criteria"
)]
struct Cli {
    /// JSON run configuration
    #[arg(value_name = "CONFIG")]
    config: String,

    /// RNG seed (overrides the configuration)
    #[arg(short, long, value_name = "N")]
    seed: Option<u64>,

    /// Output format: summary, json, or debug
    #[arg(short, long, default_value = "summary", value_name = "FORMAT")]
    output: String,

    /// Increase log verbosity (-v debug, -vv trace); RUST_LOG takes precedence
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let source = match std::fs::read_to_string(&cli.config) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error reading file '{}': {}", cli.config, e);
            process::exit(1);
        }
    };

    let mut config: RunConfig = match serde_json::from_str(&source) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error parsing configuration: {}", e);
            process::exit(1);
        }
    };
    if cli.seed.is_some() {
        config.seed = cli.seed;
    }

    let mut built = match config.build() {
        Ok(b) => b,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            process::exit(1);
        }
    };

    tracing::info!(
        config = %cli.config,
        seed = ?config.seed,
        simulation = ?built.simulation,
        "starting simulation"
    );
    let mut listener = built.listener.take();
    let result = match listener.as_mut() {
        Some(l) => {
            let l: &mut dyn CheckpointListener = l;
            built.simulation.run(built.rng, &mut [l])
        }
        None => built.simulation.run(built.rng, &mut []),
    };
    let report = match result {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Simulation failed: {}", e);
            process::exit(1);
        }
    };
    let rows = listener.map(|l| l.padded_rows()).unwrap_or_default();

    match cli.output.as_str() {
        "json" => {
            let output = format_report(&built.reference, &report, &rows);
            match serde_json::to_string_pretty(&output) {
                Ok(json) => println!("{}", json),
                Err(e) => {
                    eprintln!("Error serializing to JSON: {}", e);
                    process::exit(1);
                }
            }
        }
        "debug" => {
            println!("{:#?}", report);
        }
        _ => print_summary(&built.reference, &report, &rows),
    }
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn final_ari(reference: &UsageGraph, graph: &UsageGraph) -> Option<f64> {
    AdjustedRandIndex.compare(reference, graph).ok()
}

fn print_summary(reference: &UsageGraph, report: &SimulationReport, rows: &[MetricRow]) {
    println!(
        "✓ Simulation finished ({:?}) after {} rounds, {} edges added\n",
        report.state, report.rounds, report.edges_added
    );
    println!("Reference: {}", reference);
    println!("Annotated: {}", report.graph);
    if let Some(ari) = final_ari(reference, &report.graph) {
        println!("  ARI vs reference = {:.6}", ari);
    }

    if !report.criteria.is_empty() {
        println!("\nStopping criteria ({}):", report.criteria.len());
        for outcome in &report.criteria {
            match &outcome.snapshot {
                Some(s) => println!(
                    "  {}: hit in round {} at {} edges added ({} clusters)",
                    outcome.name,
                    s.round,
                    s.edges_added,
                    s.graph.partition().len()
                ),
                None => println!("  {}: not satisfied", outcome.name),
            }
        }
    }

    if !rows.is_empty() {
        println!("\nCheckpoints ({}):", rows.len());
        for row in rows {
            let values: Vec<String> = row
                .values
                .iter()
                .map(|(name, value)| format!("{} = {:.6}", name, value))
                .collect();
            println!(
                "  {:>8}: round {}, {} nodes, {} edges, {} clusters  {}",
                row.threshold,
                row.round,
                row.nodes,
                row.edges,
                row.clusters,
                values.join(", ")
            );
        }
    }
}

/// Format a report for JSON serialization
fn format_report(
    reference: &UsageGraph,
    report: &SimulationReport,
    rows: &[MetricRow],
) -> serde_json::Value {
    let criteria: Vec<serde_json::Value> = report
        .criteria
        .iter()
        .map(|outcome| match &outcome.snapshot {
            Some(s) => json!({
                "name": outcome.name,
                "hit": true,
                "round": s.round,
                "edges_added": s.edges_added,
                "clusters": s.graph.partition(),
            }),
            None => json!({ "name": outcome.name, "hit": false }),
        })
        .collect();

    json!({
        "state": report.state,
        "rounds": report.rounds,
        "edges_added": report.edges_added,
        "nodes": report.graph.node_count(),
        "edges": report.graph.edge_count(),
        "clusters": report.graph.partition(),
        "ari": final_ari(reference, &report.graph),
        "criteria": criteria,
        "checkpoints": rows,
    })
}
