//! Branch divergence and file-level conflict detection.
//!
//! Compares a work branch against a baseline without touching the working tree:
//! merge-base, commits the baseline gained since, then an in-memory three-way merge.
//! Bookkeeping files are never reported. Lock files are split into a side list.
//! Git failures degrade to a report without conflicting files.

use std::path::Path;
use std::sync::LazyLock;

use anyhow::Result;
use regex::Regex;
use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::io::git::Git;

/// Mechanically regenerated dependency lock files.
pub const LOCK_FILES: [&str; 11] = [
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    "bun.lockb",
    "Cargo.lock",
    "poetry.lock",
    "Pipfile.lock",
    "uv.lock",
    "Gemfile.lock",
    "composer.lock",
    "go.sum",
];

/// Baseline used when no base is given and the current branch cannot be read.
pub const FALLBACK_BASE_BRANCH: &str = "main";

/// `<mode> <object> <stage>\t<path>` lines from `merge-tree --write-tree`.
static CONFLICT_INFO_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\d{6} [0-9a-f]{40,64} [123]\t(.+?)\r?$")
        .expect("conflict info regex is valid")
});

static CONFLICT_MESSAGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^CONFLICT \([^)]*\): (?:Merge conflict in (.+?)|(\S+) deleted in .*?)\r?$")
        .expect("conflict message regex is valid")
});

/// Divergence between a work branch and its baseline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GitConflictReport {
    /// The merge would fail on at least one non-lock file.
    pub has_conflicts: bool,
    /// Conflicting files, excluding lock and bookkeeping files.
    pub conflicting_files: Vec<String>,
    pub needs_rebase: bool,
    /// Commits the baseline gained since the merge-base.
    pub commits_behind: usize,
    pub base_branch: String,
    pub spec_branch: String,
    /// Lock files that conflict; safe to resolve by taking one side.
    #[serde(skip)]
    pub lock_files_excluded: Vec<String>,
}

impl GitConflictReport {
    pub fn clean(base_branch: &str, spec_branch: &str) -> Self {
        Self {
            has_conflicts: false,
            conflicting_files: Vec::new(),
            needs_rebase: false,
            commits_behind: 0,
            base_branch: base_branch.to_string(),
            spec_branch: spec_branch.to_string(),
            lock_files_excluded: Vec::new(),
        }
    }
}

pub fn is_lock_file(path: &str) -> bool {
    Path::new(path)
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| LOCK_FILES.contains(&name))
}

/// True for paths inside the bookkeeping directory (e.g. `.conductor/`).
pub fn is_bookkeeping_file(path: &str, bookkeeping_dir: &str) -> bool {
    let dir = bookkeeping_dir.trim_end_matches('/');
    path == dir
        || path
            .strip_prefix(dir)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Compare `spec_branch` against `base` (default: the checked-out branch).
///
/// Never fails. Without a merge-base the report is clean; a git error after that
/// keeps the divergence counts gathered so far and reports no conflicting files.
#[instrument(skip_all, fields(spec_branch, base))]
pub fn detect(
    git: &Git,
    spec_branch: &str,
    base: Option<&str>,
    bookkeeping_dir: &str,
) -> GitConflictReport {
    let base_branch = match base {
        Some(base) => base.to_string(),
        None => git.current_branch().unwrap_or_else(|err| {
            warn!(
                error = %format!("{err:#}"),
                "cannot read current branch, assuming {FALLBACK_BASE_BRANCH}"
            );
            FALLBACK_BASE_BRANCH.to_string()
        }),
    };

    let mut report = GitConflictReport::clean(&base_branch, spec_branch);
    if let Err(err) = inspect(git, &mut report, bookkeeping_dir) {
        warn!(error = %format!("{err:#}"), "conflict detection failed, reporting no conflicts");
        report.has_conflicts = false;
        report.conflicting_files.clear();
        report.lock_files_excluded.clear();
    }
    report
}

fn inspect(git: &Git, report: &mut GitConflictReport, bookkeeping_dir: &str) -> Result<()> {
    let base = report.base_branch.clone();
    let branch = report.spec_branch.clone();

    let merge_base = git.merge_base(&base, &branch)?;
    report.commits_behind = git.commits_between(&merge_base, &base)?;
    report.needs_rebase = report.commits_behind > 0;
    debug!(%merge_base, commits_behind = report.commits_behind, "baseline divergence");

    let merge = git.merge_tree(&base, &branch)?;
    if merge.clean {
        debug!("merge-tree clean");
        return Ok(());
    }

    let mut files = parse_conflict_files(&merge.output);
    if files.is_empty() {
        debug!("no conflict paths in merge-tree output, falling back to changed-file intersection");
        let ours = git.changed_files(&merge_base, &base)?;
        let theirs = git.changed_files(&merge_base, &branch)?;
        files = ours.intersection(&theirs).cloned().collect();
    }

    for file in files {
        if is_bookkeeping_file(&file, bookkeeping_dir) {
            continue;
        }
        if is_lock_file(&file) {
            report.lock_files_excluded.push(file);
        } else {
            report.conflicting_files.push(file);
        }
    }
    report.has_conflicts = !report.conflicting_files.is_empty();
    debug!(
        conflicting = report.conflicting_files.len(),
        lock_files = report.lock_files_excluded.len(),
        "merge-tree conflicts"
    );
    Ok(())
}

/// Conflicting paths named in `merge-tree` output, deduplicated in first-seen order.
///
/// Conflicted-file info lines are authoritative; `CONFLICT` messages are only
/// consulted when there are none.
pub fn parse_conflict_files(output: &str) -> Vec<String> {
    let mut files: Vec<String> = Vec::new();
    for caps in CONFLICT_INFO_RE.captures_iter(output) {
        if let Some(path) = caps.get(1) {
            push_unique(&mut files, path.as_str());
        }
    }
    if !files.is_empty() {
        return files;
    }
    for caps in CONFLICT_MESSAGE_RE.captures_iter(output) {
        if let Some(path) = caps.get(1).or_else(|| caps.get(2)) {
            push_unique(&mut files, path.as_str());
        }
    }
    files
}

fn push_unique(files: &mut Vec<String>, path: &str) {
    let path = path.trim();
    if !path.is_empty() && !files.iter().any(|f| f == path) {
        files.push(path.to_string());
    }
}
