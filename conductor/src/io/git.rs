//! Git adapter for branch inspection and conflict checks.
//!
//! Every call is a blocking `git` subprocess in the project directory. Nothing here
//! touches the working tree except branch checkout and the build commit helpers.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};

/// Result of an in-memory three-way merge (`git merge-tree --write-tree`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeTree {
    /// True when the merge would apply without conflicts.
    pub clean: bool,
    /// Combined stdout and stderr.
    pub output: String,
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
    program: String,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self::with_program(workdir, "git")
    }

    /// Use `program` instead of the `git` found on `PATH`.
    pub fn with_program(workdir: impl Into<PathBuf>, program: impl Into<String>) -> Self {
        Self {
            workdir: workdir.into(),
            program: program.into(),
        }
    }

    /// True if the working directory is inside a git work tree.
    pub fn is_repo(&self) -> bool {
        self.run(&["rev-parse", "--is-inside-work-tree"])
            .map(|out| out.status.success())
            .unwrap_or(false)
    }

    /// Return the current branch name (errors on detached HEAD).
    #[instrument(skip_all)]
    pub fn current_branch(&self) -> Result<String> {
        let out = self.run_capture(&["rev-parse", "--abbrev-ref", "HEAD"])?;
        let name = out.trim().to_string();
        if name == "HEAD" {
            warn!("detached HEAD detected");
            return Err(anyhow!("detached HEAD (no current branch)"));
        }
        debug!(branch = %name, "current branch");
        Ok(name)
    }

    /// Check whether a local branch exists.
    pub fn branch_exists(&self, branch: &str) -> Result<bool> {
        let status = self
            .run(&[
                "show-ref",
                "--verify",
                "--quiet",
                &format!("refs/heads/{branch}"),
            ])?
            .status;
        Ok(status.success())
    }

    /// Local branches whose name starts with `prefix`, sorted.
    pub fn list_branches(&self, prefix: &str) -> Result<Vec<String>> {
        let out = self.run_capture(&["for-each-ref", "--format=%(refname:short)", "refs/heads"])?;
        let mut branches: Vec<String> = out
            .lines()
            .map(str::trim)
            .filter(|name| name.starts_with(prefix))
            .map(str::to_string)
            .collect();
        branches.sort();
        Ok(branches)
    }

    /// Create and checkout a new branch at current HEAD.
    #[instrument(skip_all, fields(branch))]
    pub fn checkout_new_branch(&self, branch: &str) -> Result<()> {
        debug!(branch, "creating and checking out new branch");
        self.run_checked(&["checkout", "-b", branch])?;
        Ok(())
    }

    /// Checkout an existing branch.
    #[instrument(skip_all, fields(branch))]
    pub fn checkout_branch(&self, branch: &str) -> Result<()> {
        debug!(branch, "checking out branch");
        self.run_checked(&["checkout", branch])?;
        Ok(())
    }

    /// Force-delete a local branch.
    #[instrument(skip_all, fields(branch))]
    pub fn delete_branch(&self, branch: &str) -> Result<()> {
        debug!(branch, "deleting branch");
        self.run_checked(&["branch", "-D", branch])?;
        Ok(())
    }

    /// Most recent common ancestor of `a` and `b`.
    pub fn merge_base(&self, a: &str, b: &str) -> Result<String> {
        let out = self.run_capture(&["merge-base", a, b])?;
        Ok(out.trim().to_string())
    }

    /// Number of commits reachable from `to` but not from `from`.
    pub fn commits_between(&self, from: &str, to: &str) -> Result<usize> {
        let range = format!("{from}..{to}");
        let out = self.run_capture(&["rev-list", "--count", &range])?;
        out.trim()
            .parse()
            .with_context(|| format!("parse rev-list count '{}'", out.trim()))
    }

    /// Non-destructive three-way merge of `branch` into `base`.
    ///
    /// Any non-zero exit counts as a failed merge; callers recover the conflicting
    /// files from the output or from the changed-file sets.
    #[instrument(skip_all, fields(base, branch))]
    pub fn merge_tree(&self, base: &str, branch: &str) -> Result<MergeTree> {
        let out = self.run(&["merge-tree", "--write-tree", base, branch])?;
        let mut output = String::from_utf8_lossy(&out.stdout).into_owned();
        output.push_str(&String::from_utf8_lossy(&out.stderr));
        let clean = out.status.success();
        if !clean {
            debug!(exit_code = ?out.status.code(), "merge-tree reported a failed merge");
        }
        Ok(MergeTree { clean, output })
    }

    /// Files that differ between `from` and `to`.
    pub fn changed_files(&self, from: &str, to: &str) -> Result<BTreeSet<String>> {
        let out = self.run_capture(&["diff", "--name-only", from, to])?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Stage all changes (respects .gitignore).
    pub fn add_all(&self) -> Result<()> {
        self.run_checked(&["add", "-A"])?;
        Ok(())
    }

    /// Commit staged changes with a message.
    ///
    /// If there are no staged changes, this returns Ok(false) and does nothing.
    #[instrument(skip_all)]
    pub fn commit_staged(&self, message: &str) -> Result<bool> {
        let staged = self.run_capture(&["diff", "--cached", "--name-only"])?;
        if staged.trim().is_empty() {
            debug!("no staged changes, skipping commit");
            return Ok(false);
        }
        self.run_checked(&["commit", "-m", message])?;
        Ok(true)
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new(&self.program)
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}
