//! Conductor configuration stored as `.conductor/conductor.toml` in the project directory.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::io::paths::DEFAULT_BOOKKEEPING_DIR;

/// Conductor configuration (TOML).
///
/// Edited by humans; missing fields fall back to defaults, and a missing file
/// means all defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ConductorConfig {
    /// Subtasks launched per iteration. Clamped to `1..=10` at use.
    pub max_parallel: usize,

    /// Scheduling rounds before the build gives up.
    pub max_iterations: u32,

    /// Pause between batches within an iteration.
    pub batch_delay_ms: u64,

    /// Pause between iterations.
    pub iteration_delay_ms: u64,

    /// Baseline branch for conflict checks; defaults to the checked-out branch.
    pub base_branch: Option<String>,

    /// Prefix of work branches (`<prefix><spec-name>`).
    pub branch_prefix: String,

    /// Internal bookkeeping directory, excluded from conflict reports.
    pub bookkeeping_dir: String,

    /// Git executable used for branch and conflict inspection.
    pub git_program: String,

    /// Byte budget for the whole subtask prompt; optional sections are dropped to fit.
    pub prompt_budget_bytes: usize,

    pub agent: AgentConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Agent argv; the prompt is written to its stdin.
    pub command: Vec<String>,

    /// Per-session wall-clock bound in seconds.
    pub timeout_secs: u64,

    /// Truncate captured agent stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: ["codex", "exec", "--skip-git-repo-check", "-"]
                .map(String::from)
                .to_vec(),
            timeout_secs: 30 * 60,
            output_limit_bytes: 100_000,
        }
    }
}

impl AgentConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ConductorConfig {
    fn default() -> Self {
        Self {
            max_parallel: 3,
            max_iterations: 100,
            batch_delay_ms: 1_000,
            iteration_delay_ms: 2_000,
            base_branch: None,
            branch_prefix: "conductor/".to_string(),
            bookkeeping_dir: DEFAULT_BOOKKEEPING_DIR.to_string(),
            git_program: "git".to_string(),
            prompt_budget_bytes: 40_000,
            agent: AgentConfig::default(),
        }
    }
}

impl ConductorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_parallel == 0 {
            return Err(anyhow!("max_parallel must be > 0"));
        }
        if self.max_iterations == 0 {
            return Err(anyhow!("max_iterations must be > 0"));
        }
        if self.branch_prefix.trim().is_empty() {
            return Err(anyhow!("branch_prefix must be non-empty"));
        }
        if self.bookkeeping_dir.trim().is_empty() {
            return Err(anyhow!("bookkeeping_dir must be non-empty"));
        }
        if self.git_program.trim().is_empty() {
            return Err(anyhow!("git_program must be non-empty"));
        }
        if self.prompt_budget_bytes == 0 {
            return Err(anyhow!("prompt_budget_bytes must be > 0"));
        }
        if self.agent.timeout_secs == 0 {
            return Err(anyhow!("agent.timeout_secs must be > 0"));
        }
        if self.agent.output_limit_bytes == 0 {
            return Err(anyhow!("agent.output_limit_bytes must be > 0"));
        }
        if self.agent.command.is_empty() || self.agent.command[0].trim().is_empty() {
            return Err(anyhow!("agent.command must be a non-empty array"));
        }
        Ok(())
    }

    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    pub fn iteration_delay(&self) -> Duration {
        Duration::from_millis(self.iteration_delay_ms)
    }

    /// Work branch for a spec.
    pub fn work_branch(&self, spec_name: &str) -> String {
        format!("{}{spec_name}", self.branch_prefix)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `ConductorConfig::default()`.
pub fn load_config(path: &Path) -> Result<ConductorConfig> {
    if !path.exists() {
        let cfg = ConductorConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: ConductorConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}
