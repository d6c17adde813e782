//! Retry-until-verified work-item runner.
//!
//! Drives an external agentic coding CLI against a bead (intent + verifier
//! Definition of Done) until the verifiers pass or the iteration budget runs
//! out. See `ralph run --help`.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use ralph::core::types::SuiteResult;
use ralph::exit_codes;
use ralph::io::agent::CliAgentInvoker;
use ralph::io::config::load_config;
use ralph::io::init::{InitOptions, RalphPaths, init_workspace};
use ralph::io::store::BeadStore;
use ralph::io::verifier::ShellVerifierRunner;
use ralph::looping::{IterationReport, LoopConfig, LoopStop, run_loop};
use ralph::{logging, suite};

#[derive(Parser)]
#[command(
    name = "ralph",
    version,
    about = "Retry-until-verified work item runner"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.ralph/` scaffolding (config, bead directory, sample bead).
    Init {
        /// Overwrite existing ralph-owned files.
        #[arg(short, long)]
        force: bool,
    },
    /// Drive the agent loop for one bead until its verifiers pass.
    Run {
        /// Bead id (loaded from `.ralph/beads/<id>.json`).
        #[arg(long)]
        id: String,
        /// Override the iteration budget used when the bead omits one.
        #[arg(long)]
        max_iterations: Option<u32>,
        /// Write the evidence record here instead of `.ralph/evidence/<id>.json`.
        #[arg(long)]
        evidence: Option<PathBuf>,
    },
    /// Evaluate a bead's verifier suite once, without invoking the agent.
    Verify {
        /// Bead id (loaded from `.ralph/beads/<id>.json`).
        #[arg(long)]
        id: String,
    },
}

fn main() {
    logging::init();
    let cli = Cli::parse();
    let code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::FAILED
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Init { force } => cmd_init(force),
        Command::Run {
            id,
            max_iterations,
            evidence,
        } => cmd_run(&id, max_iterations, evidence),
        Command::Verify { id } => cmd_verify(&id),
    }
}

fn cmd_init(force: bool) -> Result<i32> {
    let root = std::env::current_dir()?;
    init_workspace(&root, &InitOptions { force })?;
    println!("initialized .ralph/ (edit .ralph/beads/bd-001.json to get started)");
    Ok(exit_codes::OK)
}

fn cmd_run(id: &str, max_iterations: Option<u32>, evidence: Option<PathBuf>) -> Result<i32> {
    let root = std::env::current_dir()?;
    let paths = RalphPaths::new(&root);
    let mut cfg = load_config(&paths.config_path)?;
    if let Some(n) = max_iterations {
        cfg.max_iterations_default = n;
    }
    cfg.validate()?;

    let store = BeadStore::new(&paths.beads_dir);
    let invoker = CliAgentInvoker::new(cfg.agent.command.clone())?;
    let runner = ShellVerifierRunner::new(&root, cfg.verifier_output_limit_bytes);
    let evidence_path = evidence.unwrap_or_else(|| paths.evidence_path(id));
    let loop_config =
        LoopConfig::from_config(&cfg, &root, evidence_path, Some(paths.logs_dir.clone()));

    let outcome = run_loop(&store, id, &invoker, &runner, &loop_config, print_iteration)?;

    match outcome.stop {
        LoopStop::Completed => {
            println!(
                "bead {} completed after {} iteration(s)",
                outcome.bead_id, outcome.iterations
            );
            Ok(exit_codes::OK)
        }
        LoopStop::Exhausted => {
            println!(
                "bead {} failed: iteration budget exhausted after {} iteration(s)",
                outcome.bead_id, outcome.iterations
            );
            if let Some(suite) = &outcome.last_suite {
                print_failures(suite);
            }
            Ok(exit_codes::FAILED)
        }
    }
}

fn cmd_verify(id: &str) -> Result<i32> {
    let root = std::env::current_dir()?;
    let paths = RalphPaths::new(&root);
    let cfg = load_config(&paths.config_path)?;

    let store = BeadStore::new(&paths.beads_dir);
    let bead = store.load(id)?;
    let runner = ShellVerifierRunner::new(&root, cfg.verifier_output_limit_bytes);

    let suite = suite::evaluate(&runner, &bead.dod.verifiers);
    print_suite(&suite);
    let skipped = bead.dod.verifiers.len() - suite.results.len();
    if skipped > 0 {
        println!("  ({skipped} verifier(s) not run after early stop)");
    }

    if suite.all_passed {
        Ok(exit_codes::OK)
    } else {
        Ok(exit_codes::FAILED)
    }
}

fn print_iteration(report: &IterationReport) {
    println!(
        "iteration {}/{}",
        report.iteration, report.max_iterations
    );
    match (&report.suite, &report.agent.reason) {
        (Some(suite), _) => print_suite(suite),
        (None, Some(reason)) => println!("  agent: {reason}"),
        (None, None) => {}
    }
}

fn print_suite(suite: &SuiteResult) {
    for result in &suite.results {
        if result.passed {
            println!("  pass  {}", result.name);
        } else {
            println!("  FAIL  {} ({})", result.name, result.reason);
        }
    }
}

fn print_failures(suite: &SuiteResult) {
    for result in &suite.results {
        if !result.passed {
            println!("  FAIL  {} ({})", result.name, result.reason);
        }
    }
}
