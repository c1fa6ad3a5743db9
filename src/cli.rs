//! CLI definitions and entry points for `gate-check` and `pipeline-state`.
//!
//! `gate-check` speaks in exit codes: 0 for PASS or usage, 2 for FAIL, 1 for
//! an internal fault. With `--json` stdout carries exactly one line.

use crate::core::config::GateCheckConfig;
use crate::core::logging;
use crate::core::store::{
    CounterKind, GateRecordStatus, Phase, StateLoad, StateStore, WorkStatus,
};
use crate::gates::definition;
use crate::gates::orchestrator::Orchestrator;
use crate::gates::process::SystemRunner;
use crate::gates::report::{self, EXIT_FAULT, EXIT_PASS, GateStatus, OutputFormat};

use anyhow::{Context, bail};
use clap::{Parser, Subcommand, ValueEnum, error::ErrorKind};
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Parser, Debug)]
#[clap(
    name = "gate-check",
    version = env!("CARGO_PKG_VERSION"),
    about = "Check whether the artifacts required to leave a workflow phase are in place."
)]
pub(crate) struct GateCheckCli {
    /// Gate number (0-5). Omit to list the gates.
    pub gate: Option<String>,
    /// Print one JSON decision record on stdout; diagnostics go to stderr.
    #[clap(long)]
    pub json: bool,
    /// Project root (defaults to the current directory).
    #[clap(long, value_name = "DIR")]
    pub dir: Option<PathBuf>,
}

#[derive(Parser, Debug)]
#[clap(
    name = "pipeline-state",
    version = env!("CARGO_PKG_VERSION"),
    about = "Read and update the persisted pipeline state (phases, gates, tasks, counters)."
)]
pub(crate) struct PipelineStateCli {
    /// Project root (defaults to the current directory).
    #[clap(long, value_name = "DIR", global = true)]
    pub dir: Option<PathBuf>,
    #[clap(subcommand)]
    pub command: StateCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum StateCommand {
    /// Print the state, or one value by dotted key (e.g. `gates.2.status`)
    Get { key: Option<String> },
    /// Write a fresh state with the pipeline start stamped
    Init,
    /// Replace the state with defaults
    Reset,
    /// Set a phase status: pending|running|completed|failed|skipped
    Phase { name: String, status: String },
    /// Set a task status, tracking it on first sight
    Task { id: String, status: String },
    /// Record a gate outcome: pending|PASS|FAIL|skipped [errors...]
    Gate {
        gate: u8,
        status: String,
        errors: Vec<String>,
    },
    /// Read or advance an identifier counter
    Counter {
        /// epic|us|task|adr
        kind: String,
        #[clap(value_enum, default_value = "get")]
        action: CounterAction,
    },
    /// Print the planning directories of the current iteration
    Paths,
    /// Start a new iteration of the workflow
    Evolve,
    /// List task files of the current iteration merged with tracked tasks
    Tasks,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum CounterAction {
    Get,
    Next,
}

fn catalog_text() -> String {
    let mut out = String::from("Usage: gate-check <gate> [--json]\n\nGates:\n");
    for (gate, name) in definition::catalog() {
        out.push_str(&format!("  {}  {}\n", gate, name));
    }
    out
}

fn resolve_root(dir: Option<PathBuf>) -> std::io::Result<PathBuf> {
    match dir {
        Some(dir) => Ok(dir),
        None => std::env::current_dir(),
    }
}

/// Entry point for `gate-check`; returns the process exit code.
pub fn run_gate_check() -> i32 {
    let cli = match GateCheckCli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            if !matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) {
                eprint!("{}", catalog_text());
            }
            return EXIT_PASS;
        }
    };

    let gate = cli
        .gate
        .as_deref()
        .and_then(|g| g.trim().parse::<u8>().ok())
        .filter(|g| definition::gate_name(*g).is_some());
    let Some(gate) = gate else {
        if cli.json {
            eprint!("{}", catalog_text());
        } else {
            print!("{}", catalog_text());
        }
        return EXIT_PASS;
    };

    logging::init(cli.json);
    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    let root = match resolve_root(cli.dir) {
        Ok(root) => root,
        Err(e) => {
            eprintln!("gate-check: cannot determine project root: {}", e);
            return EXIT_FAULT;
        }
    };

    let loaded = GateCheckConfig::load(&root);
    for problem in &loaded.problems {
        tracing::warn!("{}", problem);
    }
    let store = StateStore::new(&root, &loaded.config.state_file);
    let state = match store.inspect() {
        StateLoad::Corrupt(reason) => {
            tracing::warn!(
                "state file {} is unreadable ({}); resetting to defaults",
                store.path.display(),
                reason
            );
            match store.reset() {
                Ok(state) => state,
                Err(e) => {
                    eprintln!(
                        "gate-check: state file {} is unreadable and could not be reset: {}",
                        store.path.display(),
                        e
                    );
                    return EXIT_FAULT;
                }
            }
        }
        other => other.into_state(),
    };

    let mut orchestrator = Orchestrator::new(&root, loaded, SystemRunner);
    let result = match orchestrator.run_gate(gate, &state) {
        Ok(result) => result,
        Err(e) => {
            eprintln!("gate-check: {}", e);
            return EXIT_FAULT;
        }
    };

    let (status, messages) = match result.status {
        GateStatus::Pass => (GateRecordStatus::Pass, Vec::new()),
        GateStatus::Fail => (
            GateRecordStatus::Fail,
            result.errors.iter().map(|e| e.message.clone()).collect(),
        ),
    };
    if let Err(e) = store.record_gate(gate, status, messages) {
        tracing::warn!("could not record gate {} in {}: {}", gate, store.path.display(), e);
    }

    match format {
        OutputFormat::Json => println!("{}", report::render(&result, format)),
        OutputFormat::Text => print!("{}", report::render(&result, format)),
    }
    result.exit_code()
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Entry point for `pipeline-state`.
pub fn run_pipeline_state() -> anyhow::Result<()> {
    let cli = PipelineStateCli::parse();
    logging::init(true);

    let root = resolve_root(cli.dir).context("cannot determine project root")?;
    let loaded = GateCheckConfig::load(&root);
    for problem in &loaded.problems {
        tracing::warn!("{}", problem);
    }
    let store = StateStore::new(&root, &loaded.config.state_file);
    let write_ctx = || format!("failed to write {}", store.path.display());

    match cli.command {
        StateCommand::Get { key: None } => print_json(&store.load())?,
        StateCommand::Get { key: Some(key) } => match store.load().lookup(&key) {
            Some(serde_json::Value::String(s)) => println!("{}", s),
            Some(value) => print_json(&value)?,
            None => bail!("no value at '{}'", key),
        },
        StateCommand::Init => {
            store.init().with_context(write_ctx)?;
            println!("initialized {}", store.path.display());
        }
        StateCommand::Reset => {
            store.reset().with_context(write_ctx)?;
            println!("reset {}", store.path.display());
        }
        StateCommand::Phase { name, status } => {
            let phase = Phase::from_str(&name)?;
            let status = WorkStatus::from_str(&status)?;
            let state = store.set_phase(phase, status)?;
            print_json(&state.phases.get(phase.as_str()))?;
        }
        StateCommand::Task { id, status } => {
            let status = WorkStatus::from_str(&status)?;
            let state = store.set_task(&id, status).with_context(write_ctx)?;
            print_json(&state.tasks.items.get(&id))?;
        }
        StateCommand::Gate {
            gate,
            status,
            errors,
        } => {
            let status = GateRecordStatus::from_str(&status)?;
            let state = store.record_gate(gate, status, errors)?;
            print_json(&state.gates.get(&gate))?;
        }
        StateCommand::Counter { kind, action } => {
            let kind = CounterKind::from_str(&kind)?;
            let value = match action {
                CounterAction::Get => kind.format(store.load().counter(kind)),
                CounterAction::Next => store.increment_counter(kind).with_context(write_ctx)?,
            };
            println!("{}", value);
        }
        StateCommand::Paths => print_json(&store.planning_paths())?,
        StateCommand::Evolve => {
            let state = store.begin_iteration().with_context(write_ctx)?;
            println!(
                "evolution v{} started ({})",
                state.evolution_version,
                state.planning_paths().dir
            );
        }
        StateCommand::Tasks => print_json(&store.task_listing()?)?,
    }
    Ok(())
}
