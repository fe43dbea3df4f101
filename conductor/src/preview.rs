//! Machine-readable merge preview for a spec's work branch.
//!
//! Combines branch-level conflicts from [`crate::conflicts::detect`] with whatever a
//! [`SemanticMerge`] collaborator reports. The two sources are concatenated, never
//! deduplicated against each other.

use std::path::Path;

use anyhow::{Result, anyhow};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::conflicts::{self, GitConflictReport};
use crate::io::config::ConductorConfig;
use crate::io::git::Git;

/// Conflict reported by a semantic-merge backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SemanticConflict {
    pub file: String,
    pub location: String,
    pub tasks: Vec<String>,
    pub severity: String,
    pub can_auto_merge: bool,
    pub strategy: Option<String>,
    pub reason: String,
}

/// Everything a semantic-merge backend contributes to a preview.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SemanticPreview {
    pub files_to_merge: Vec<String>,
    pub conflicts: Vec<SemanticConflict>,
    pub total_files: usize,
    pub conflict_files: usize,
    pub total_conflicts: usize,
    pub auto_mergeable: usize,
}

/// Analyzes code-level overlap between a work branch and its baseline.
pub trait SemanticMerge {
    fn preview(
        &self,
        project_dir: &Path,
        spec_name: &str,
        work_branch: &str,
    ) -> Result<SemanticPreview>;
}

/// Backend that never reports semantic conflicts.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSemanticMerge;

impl SemanticMerge for NoSemanticMerge {
    fn preview(
        &self,
        _project_dir: &Path,
        _spec_name: &str,
        _work_branch: &str,
    ) -> Result<SemanticPreview> {
        Ok(SemanticPreview::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictKind {
    Semantic,
    Git,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictRecord {
    pub file: String,
    pub location: String,
    pub tasks: Vec<String>,
    pub severity: String,
    pub can_auto_merge: bool,
    pub strategy: Option<String>,
    pub reason: String,
    #[serde(rename = "type")]
    pub kind: ConflictKind,
}

impl From<SemanticConflict> for ConflictRecord {
    fn from(c: SemanticConflict) -> Self {
        Self {
            file: c.file,
            location: c.location,
            tasks: c.tasks,
            severity: c.severity,
            can_auto_merge: c.can_auto_merge,
            strategy: c.strategy,
            reason: c.reason,
            kind: ConflictKind::Semantic,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewSummary {
    pub total_files: usize,
    pub conflict_files: usize,
    pub total_conflicts: usize,
    pub auto_mergeable: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_git_conflicts: Option<bool>,
}

/// Merge preview response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergePreview {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub files: Vec<String>,
    pub conflicts: Vec<ConflictRecord>,
    pub git_conflicts: Option<GitConflictReport>,
    pub summary: PreviewSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock_files_excluded: Option<Vec<String>>,
}

impl MergePreview {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            files: Vec::new(),
            conflicts: Vec::new(),
            git_conflicts: None,
            summary: PreviewSummary::default(),
            lock_files_excluded: None,
        }
    }
}

/// Build the preview for `spec_name`. Failures are folded into the response.
///
/// `base` overrides `cfg.base_branch`; with neither, the checked-out branch is the baseline.
#[instrument(skip_all, fields(spec = spec_name))]
pub fn preview<S: SemanticMerge + ?Sized>(
    project_dir: &Path,
    spec_name: &str,
    cfg: &ConductorConfig,
    base: Option<&str>,
    semantic: &S,
) -> MergePreview {
    match build_preview(project_dir, spec_name, cfg, base, semantic) {
        Ok(preview) => preview,
        Err(err) => {
            let message = format!("{err:#}");
            warn!(error = %message, "merge preview failed");
            MergePreview::failure(message)
        }
    }
}

fn build_preview<S: SemanticMerge + ?Sized>(
    project_dir: &Path,
    spec_name: &str,
    cfg: &ConductorConfig,
    base: Option<&str>,
    semantic: &S,
) -> Result<MergePreview> {
    let git = Git::with_program(project_dir, &cfg.git_program);
    let work_branch = cfg.work_branch(spec_name);
    if !git.branch_exists(&work_branch)? {
        return Err(anyhow!("No existing build found for '{spec_name}'"));
    }

    let base = base.or(cfg.base_branch.as_deref());
    let mut report = conflicts::detect(&git, &work_branch, base, &cfg.bookkeeping_dir);
    let semantic = semantic.preview(project_dir, spec_name, &work_branch)?;

    let mut records: Vec<ConflictRecord> = semantic.conflicts.into_iter().map(Into::into).collect();
    for file in &report.conflicting_files {
        records.push(ConflictRecord {
            file: file.clone(),
            location: "file-level".to_string(),
            tasks: vec![spec_name.to_string(), report.base_branch.clone()],
            severity: "high".to_string(),
            can_auto_merge: false,
            strategy: None,
            reason: format!(
                "File modified in both {} and worktree since branch point",
                report.base_branch
            ),
            kind: ConflictKind::Git,
        });
    }

    let git_count = report.conflicting_files.len();
    let summary = PreviewSummary {
        total_files: semantic.total_files,
        conflict_files: semantic.conflict_files + git_count,
        total_conflicts: semantic.total_conflicts + git_count,
        auto_mergeable: semantic.auto_mergeable,
        has_git_conflicts: Some(report.has_conflicts),
    };
    debug!(?summary, "preview summary");
    info!(
        conflicts = records.len(),
        has_git_conflicts = report.has_conflicts,
        "merge preview complete"
    );

    let lock_files = std::mem::take(&mut report.lock_files_excluded);
    Ok(MergePreview {
        success: true,
        error: None,
        files: semantic.files_to_merge,
        conflicts: records,
        git_conflicts: Some(report),
        summary,
        lock_files_excluded: Some(lock_files),
    })
}
