//! Conductor CLI.
//!
//! Validates spec directories, drives plan builds through an external agent
//! command, and inspects the resulting work branches.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::warn;

use conductor::branches::{
    cleanup_work_branches, commit_build, list_work_branches, prepare_work_branch,
};
use conductor::coordinator::{
    BuildSettings, BuildStop, Coordinator, IterationReport, run_blocking,
};
use conductor::core::progress::BuildProgress;
use conductor::core::scheduler::MAX_PARALLEL_LIMIT;
use conductor::core::types::Checkpoint;
use conductor::exit_codes;
use conductor::io::agent::CommandAgent;
use conductor::io::config::{ConductorConfig, load_config};
use conductor::io::git::Git;
use conductor::io::paths::{CONFIG_FILE, SpecPaths, config_path};
use conductor::io::plan_store::load_plan;
use conductor::logging;
use conductor::preview::{MergePreview, NoSemanticMerge, preview};
use conductor::validate::{SpecValidator, ValidationReport};

#[derive(Parser)]
#[command(
    name = "conductor",
    version,
    about = "Dependency-aware parallel build orchestration for implementation plans"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check a spec directory at one or all checkpoints.
    Validate {
        #[arg(long)]
        spec_dir: PathBuf,
        #[arg(long, value_enum, default_value_t = CheckpointArg::All)]
        checkpoint: CheckpointArg,
        /// Repair common plan omissions before validating.
        #[arg(long)]
        auto_fix: bool,
        #[arg(long)]
        json: bool,
    },
    /// Summarize subtask statuses and phase completion.
    Status {
        #[arg(long)]
        spec_dir: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Run agent sessions until the plan completes, stalls, or runs out of iterations.
    Run {
        #[arg(long)]
        spec_dir: PathBuf,
        #[arg(long, default_value = ".")]
        project_dir: PathBuf,
        #[arg(long)]
        max_parallel: Option<usize>,
        #[arg(long)]
        max_iterations: Option<u32>,
    },
    /// List work branches with commit and file-change counts.
    Branches {
        #[arg(long, default_value = ".")]
        project_dir: PathBuf,
        #[arg(long)]
        base: Option<String>,
        #[arg(long)]
        branch_prefix: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Delete every work branch except the checked-out one.
    Cleanup {
        #[arg(long, default_value = ".")]
        project_dir: PathBuf,
        #[arg(long)]
        branch_prefix: Option<String>,
    },
    /// Print a JSON merge preview for a spec's work branch.
    Preview {
        #[arg(long)]
        spec: String,
        #[arg(long, default_value = ".")]
        project_dir: PathBuf,
        #[arg(long)]
        base: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum CheckpointArg {
    Prereqs,
    Context,
    Spec,
    Plan,
    All,
}

impl CheckpointArg {
    fn checkpoint(self) -> Option<Checkpoint> {
        match self {
            CheckpointArg::Prereqs => Some(Checkpoint::Prereqs),
            CheckpointArg::Context => Some(Checkpoint::Context),
            CheckpointArg::Spec => Some(Checkpoint::Spec),
            CheckpointArg::Plan => Some(Checkpoint::Plan),
            CheckpointArg::All => None,
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
    match cli.command {
        Command::Validate {
            spec_dir,
            checkpoint,
            auto_fix,
            json,
        } => cmd_validate(&spec_dir, checkpoint, auto_fix, json),
        Command::Status { spec_dir, json } => cmd_status(&spec_dir, json),
        Command::Run {
            spec_dir,
            project_dir,
            max_parallel,
            max_iterations,
        } => cmd_run(&spec_dir, &project_dir, max_parallel, max_iterations),
        Command::Branches {
            project_dir,
            base,
            branch_prefix,
            json,
        } => cmd_branches(&project_dir, base.as_deref(), branch_prefix, json),
        Command::Cleanup {
            project_dir,
            branch_prefix,
        } => cmd_cleanup(&project_dir, branch_prefix),
        Command::Preview {
            spec,
            project_dir,
            base,
        } => cmd_preview(&project_dir, &spec, base.as_deref()),
    }
}

fn cmd_validate(
    spec_dir: &Path,
    checkpoint: CheckpointArg,
    auto_fix: bool,
    json: bool,
) -> Result<i32> {
    let validator = SpecValidator::new(spec_dir);
    if auto_fix && validator.auto_fix_plan()? && !json {
        println!("Auto-fixed implementation_plan.json");
    }

    let report = match checkpoint.checkpoint() {
        Some(checkpoint) => ValidationReport::new(vec![validator.validate(checkpoint)?]),
        None => validator.validate_all()?,
    };

    if json {
        print_json(&report)?;
    } else {
        let rendered: Vec<String> = report.results.iter().map(ToString::to_string).collect();
        println!("{}", rendered.join("\n\n"));
    }
    Ok(if report.valid {
        exit_codes::OK
    } else {
        exit_codes::INVALID
    })
}

fn cmd_status(spec_dir: &Path, json: bool) -> Result<i32> {
    let plan = load_plan(&SpecPaths::new(spec_dir).plan())?;
    let progress = BuildProgress::from_plan(&plan);
    if json {
        print_json(&progress)?;
        return Ok(exit_codes::OK);
    }

    println!(
        "{}: {}/{} subtasks completed",
        plan.feature,
        progress.completed.len(),
        progress.total()
    );
    for phase in &progress.phases {
        println!("  phase {} ({}): {}/{}", phase.key, phase.name, phase.completed, phase.total);
    }
    for (label, ids) in [
        ("in progress", &progress.in_progress),
        ("failed", &progress.failed),
        ("blocked", &progress.blocked),
        ("eligible", &progress.eligible),
    ] {
        if !ids.is_empty() {
            println!("{label}: {}", ids.join(", "));
        }
    }
    Ok(exit_codes::OK)
}

fn cmd_run(
    spec_dir: &Path,
    project_dir: &Path,
    max_parallel: Option<usize>,
    max_iterations: Option<u32>,
) -> Result<i32> {
    let mut cfg = load_config(&config_path(project_dir))?;
    if let Some(max_parallel) = max_parallel {
        cfg.max_parallel = max_parallel;
    }
    if let Some(max_iterations) = max_iterations {
        cfg.max_iterations = max_iterations;
    }
    cfg.validate().with_context(|| format!("invalid {CONFIG_FILE}"))?;
    if cfg.max_parallel > MAX_PARALLEL_LIMIT {
        warn!(requested = cfg.max_parallel, limit = MAX_PARALLEL_LIMIT, "max_parallel clamped");
    }

    let check = SpecValidator::new(spec_dir).validate_plan()?;
    if !check.valid {
        println!("{check}");
        return Ok(exit_codes::INVALID);
    }

    let paths = SpecPaths::new(spec_dir);
    let spec_name = paths
        .name()
        .ok_or_else(|| anyhow!("spec directory has no name: {}", spec_dir.display()))?
        .to_string();

    let git = Git::with_program(project_dir, &cfg.git_program);
    if !git.is_repo() {
        return Err(anyhow!("not a git repository: {}", project_dir.display()));
    }
    let branch = prepare_work_branch(&git, &cfg, &spec_name)?;
    println!("building on {branch}");

    let settings = BuildSettings::from_config(&cfg, project_dir, &spec_name);
    let agent = Arc::new(CommandAgent::new(cfg.agent.clone()));
    let coordinator = Coordinator::new(paths, project_dir, agent, settings);

    let outcome = run_blocking(&coordinator, print_iteration)?;
    if commit_build(&git, &spec_name)? {
        println!("committed build changes to {branch}");
    }
    println!(
        "{} iteration(s), {} session(s) launched",
        outcome.iterations, outcome.sessions_launched
    );
    Ok(match &outcome.stop {
        BuildStop::Complete => {
            println!("build complete");
            exit_codes::OK
        }
        BuildStop::Stalled { pending, incomplete } => {
            println!("build stalled: nothing eligible");
            println!("  incomplete: {}", incomplete.join(", "));
            if !pending.is_empty() {
                println!("  waiting on dependencies: {}", pending.join(", "));
            }
            exit_codes::STALLED
        }
        BuildStop::IterationsExhausted {
            max_iterations,
            incomplete,
        } => {
            println!("stopped after {max_iterations} iteration(s)");
            println!("  incomplete: {}", incomplete.join(", "));
            exit_codes::EXHAUSTED
        }
    })
}

fn print_iteration(report: &IterationReport) {
    println!(
        "iteration {}: {} launched, {} completed, {} failed",
        report.iteration,
        report.launched(),
        report.completed(),
        report.failed()
    );
    for outcome in report.outcomes.iter().filter(|o| !o.success) {
        println!(
            "  {}: {}",
            outcome.subtask_id,
            outcome.error.as_deref().unwrap_or("failed")
        );
    }
}

/// Project config with an optional branch prefix override.
fn branch_config(project_dir: &Path, branch_prefix: Option<String>) -> Result<ConductorConfig> {
    let mut cfg = load_config(&config_path(project_dir))?;
    if let Some(prefix) = branch_prefix {
        cfg.branch_prefix = prefix;
    }
    cfg.validate().with_context(|| format!("invalid {CONFIG_FILE}"))?;
    Ok(cfg)
}

fn cmd_branches(
    project_dir: &Path,
    base: Option<&str>,
    branch_prefix: Option<String>,
    json: bool,
) -> Result<i32> {
    let cfg = branch_config(project_dir, branch_prefix)?;
    let git = Git::with_program(project_dir, &cfg.git_program);
    let branches = list_work_branches(&git, &cfg, base)?;
    if json {
        print_json(&branches)?;
    } else if branches.is_empty() {
        println!("no work branches under '{}'", cfg.branch_prefix);
    } else {
        for branch in &branches {
            println!(
                "{}  {} commit(s), {} file(s) changed",
                branch.name, branch.commit_count, branch.files_changed
            );
        }
    }
    Ok(exit_codes::OK)
}

fn cmd_cleanup(project_dir: &Path, branch_prefix: Option<String>) -> Result<i32> {
    let cfg = branch_config(project_dir, branch_prefix)?;
    let git = Git::with_program(project_dir, &cfg.git_program);
    let report = cleanup_work_branches(&git, &cfg)?;
    for branch in &report.deleted {
        println!("deleted {branch}");
    }
    for branch in &report.skipped {
        println!("skipped {branch} (checked out)");
    }
    Ok(exit_codes::OK)
}

fn cmd_preview(project_dir: &Path, spec_name: &str, base: Option<&str>) -> Result<i32> {
    let response = match load_config(&config_path(project_dir)) {
        Ok(cfg) => preview(project_dir, spec_name, &cfg, base, &NoSemanticMerge),
        Err(err) => MergePreview::failure(format!("{err:#}")),
    };
    print_json(&response)?;
    Ok(if response.success {
        exit_codes::OK
    } else {
        exit_codes::INVALID
    })
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
