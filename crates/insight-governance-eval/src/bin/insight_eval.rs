// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Insight guardrail evaluation CLI.
//!
//! Replays fixture scenarios offline and exits non-zero unless every release
//! gate passes.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin insight-eval -- crates/insight-governance-eval/fixtures/scenarios.json
//! cargo run --bin insight-eval -- fixtures/*.json --json --log debug
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use insight_governance_core::clock::{Clock, SystemClock};
use insight_governance_eval::{load_scenarios, run_file, EvalError, EvalGates, EvalReport, ScenarioResult};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "insight-eval")]
#[command(version, about = "Score insight guardrails against fixture scenarios", long_about = None)]
struct Cli {
    /// Fixture files of shape `{ "scenarios": [...] }`
    #[arg(required = true)]
    fixtures: Vec<PathBuf>,

    /// Print the report as JSON instead of text
    #[arg(long)]
    json: bool,

    /// Log filter: trace, debug, info, warn, error, or a full directive
    #[arg(long, default_value = "info")]
    log: String,
}

fn run(cli: &Cli) -> Result<Vec<ScenarioResult>, EvalError> {
    let now_ms = SystemClock.now_ms();
    let mut results = Vec::new();
    for path in &cli.fixtures {
        let file = load_scenarios(path)?;
        info!(path = %path.display(), scenarios = file.scenarios.len(), "replaying fixtures");
        results.extend(run_file(&file, now_ms)?);
    }
    Ok(results)
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let results = match run(&cli) {
        Ok(results) => results,
        Err(err) => {
            error!(%err, "evaluation aborted");
            return ExitCode::from(2);
        }
    };

    let report = EvalReport::from_results(&results);
    if cli.json {
        match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{json}"),
            Err(err) => {
                error!(%err, "failed to serialise report");
                return ExitCode::from(2);
            }
        }
    } else {
        print!("{report}");
    }

    let failures = report.gate_failures(&EvalGates::default());
    if failures.is_empty() {
        info!("all gates passed");
        ExitCode::SUCCESS
    } else {
        for failure in &failures {
            warn!(gate = %failure, "gate failed");
        }
        ExitCode::FAILURE
    }
}
