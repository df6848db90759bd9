//! Autonomous agent loop with working and persistent memory.
//!
//! State lives in `.memloop/` under the project root: `config.toml`, the two
//! documents and loop bookkeeping in `state/`, and per-iteration artifacts in
//! `iterations/`.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;

use memloop::core::codec::encode_document;
use memloop::core::path::Tier;
use memloop::exit_codes;
use memloop::io::init::{InitOptions, MemloopPaths, init_memloop};
use memloop::io::llm::client_from_config;
use memloop::io::persistence::Persistence;
use memloop::logging;
use memloop::looping::{LoopStop, run_loop};
use memloop::step::{Orchestrator, StepConfig};

#[derive(Parser)]
#[command(
    name = "memloop",
    version,
    about = "Autonomous agent loop with working and persistent memory"
)]
struct Cli {
    /// Project root containing `.memloop/`.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.memloop/` with default config and empty documents.
    Init {
        /// Overwrite existing config and documents.
        #[arg(short, long)]
        force: bool,
    },
    /// Run exactly one iteration.
    Step,
    /// Run iterations until interrupted.
    Run {
        /// Stop after this many iterations.
        #[arg(long)]
        max_iterations: Option<u64>,
    },
    /// Print a document in the action protocol encoding.
    Show {
        #[arg(value_enum)]
        tier: ShowTier,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ShowTier {
    Working,
    Persistent,
}

impl From<ShowTier> for Tier {
    fn from(tier: ShowTier) -> Self {
        match tier {
            ShowTier::Working => Tier::Working,
            ShowTier::Persistent => Tier::Persistent,
        }
    }
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let paths = MemloopPaths::new(&cli.root);
    match cli.command {
        Command::Init { force } => cmd_init(&paths, force),
        Command::Step => cmd_step(&paths),
        Command::Run { max_iterations } => cmd_run(&paths, max_iterations),
        Command::Show { tier } => cmd_show(&paths, tier.into()),
    }
}

fn cmd_init(paths: &MemloopPaths, force: bool) -> Result<i32> {
    init_memloop(&paths.root, &InitOptions { force })?;
    println!("initialized {}", paths.memloop_dir.display());
    Ok(exit_codes::OK)
}

fn cmd_step(paths: &MemloopPaths) -> Result<i32> {
    let (cfg, step_config) = StepConfig::load(paths)?;
    let mut orchestrator = Orchestrator::load(
        client_from_config(&cfg.llm),
        paths.persistence(),
        step_config,
    )?;
    let outcome = orchestrator.step();
    println!("{}", outcome.summary());
    Ok(exit_codes::OK)
}

fn cmd_run(paths: &MemloopPaths, max_iterations: Option<u64>) -> Result<i32> {
    let (cfg, step_config) = StepConfig::load(paths)?;
    let stop = Arc::new(AtomicBool::new(false));
    for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        signal_hook::flag::register(signal, Arc::clone(&stop))
            .with_context(|| format!("register handler for signal {signal}"))?;
    }

    let mut orchestrator = Orchestrator::load(
        client_from_config(&cfg.llm),
        paths.persistence(),
        step_config,
    )?;
    let outcome = run_loop(&mut orchestrator, &stop, max_iterations, |step| {
        println!("{}", step.summary());
    });
    info!(
        started_at = outcome.started_at_iteration,
        steps = outcome.steps_executed,
        stop = ?outcome.stop,
        "loop finished"
    );

    match outcome.stop {
        LoopStop::Interrupted => {
            eprintln!(
                "interrupted after {} iteration(s)",
                outcome.steps_executed
            );
            Ok(exit_codes::INTERRUPTED)
        }
        LoopStop::MaxIterations { limit } => {
            println!("stopped after {limit} iteration(s)");
            Ok(exit_codes::OK)
        }
    }
}

fn cmd_show(paths: &MemloopPaths, tier: Tier) -> Result<i32> {
    let persistence = paths.persistence();
    let doc = match tier {
        Tier::Working => persistence.load_working()?,
        Tier::Persistent => persistence.load_persistent()?,
    };
    println!("{}", encode_document(tier.marker(), &doc));
    Ok(exit_codes::OK)
}
