//! Work-branch setup, listing and cleanup.

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::io::config::ConductorConfig;
use crate::io::git::Git;

/// One branch under the configured work-branch prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkBranch {
    pub name: String,
    /// Branch name with the prefix stripped.
    pub spec_name: String,
    /// Commits on the branch that the baseline does not have.
    pub commit_count: usize,
    /// Files changed since the branch point.
    pub files_changed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub deleted: Vec<String>,
    /// Branches left alone because they are checked out.
    pub skipped: Vec<String>,
}

/// Baseline for branch comparisons: explicit, then configured, then HEAD's branch.
pub fn resolve_base(git: &Git, cfg: &ConductorConfig, base: Option<&str>) -> Result<String> {
    match base.or(cfg.base_branch.as_deref()) {
        Some(base) => Ok(base.to_string()),
        None => git.current_branch().context("resolve baseline branch"),
    }
}

/// Check out `<branch_prefix><spec_name>`, creating it at HEAD on first use.
#[instrument(skip_all, fields(spec = spec_name))]
pub fn prepare_work_branch(git: &Git, cfg: &ConductorConfig, spec_name: &str) -> Result<String> {
    let branch = cfg.work_branch(spec_name);
    if git.current_branch().ok().as_deref() == Some(branch.as_str()) {
        debug!(%branch, "already on work branch");
        return Ok(branch);
    }
    if git.branch_exists(&branch)? {
        debug!(%branch, "checking out existing work branch");
        git.checkout_branch(&branch)
            .with_context(|| format!("checkout existing branch {branch}"))?;
    } else {
        info!(%branch, "creating work branch");
        git.checkout_new_branch(&branch)
            .with_context(|| format!("create branch {branch}"))?;
    }
    Ok(branch)
}

/// Commit everything the build left in the working tree. False when nothing changed.
#[instrument(skip_all, fields(spec = spec_name))]
pub fn commit_build(git: &Git, spec_name: &str) -> Result<bool> {
    git.add_all()?;
    let committed = git.commit_staged(&format!("conductor: build {spec_name}"))?;
    debug!(committed, "build commit");
    Ok(committed)
}

/// List work branches with their divergence from `base`.
#[instrument(skip_all)]
pub fn list_work_branches(
    git: &Git,
    cfg: &ConductorConfig,
    base: Option<&str>,
) -> Result<Vec<WorkBranch>> {
    let branches = git.list_branches(&cfg.branch_prefix)?;
    if branches.is_empty() {
        debug!(prefix = %cfg.branch_prefix, "no work branches");
        return Ok(Vec::new());
    }
    let base = resolve_base(git, cfg, base)?;

    branches
        .into_iter()
        .map(|name| {
            let merge_base = git
                .merge_base(&base, &name)
                .with_context(|| format!("merge-base of {base} and {name}"))?;
            let commit_count = git.commits_between(&base, &name)?;
            let files_changed = git.changed_files(&merge_base, &name)?.len();
            Ok(WorkBranch {
                spec_name: name
                    .strip_prefix(&cfg.branch_prefix)
                    .unwrap_or(&name)
                    .to_string(),
                name,
                commit_count,
                files_changed,
            })
        })
        .collect()
}

/// Delete every work branch except the one checked out.
#[instrument(skip_all)]
pub fn cleanup_work_branches(git: &Git, cfg: &ConductorConfig) -> Result<CleanupReport> {
    let current = git.current_branch().ok();
    let mut report = CleanupReport::default();
    for branch in git.list_branches(&cfg.branch_prefix)? {
        if current.as_deref() == Some(branch.as_str()) {
            warn!(%branch, "not deleting the checked-out work branch");
            report.skipped.push(branch);
            continue;
        }
        git.delete_branch(&branch)?;
        report.deleted.push(branch);
    }
    info!(
        deleted = report.deleted.len(),
        skipped = report.skipped.len(),
        "work branch cleanup"
    );
    Ok(report)
}
