//! Canonical file locations inside a spec directory.

use std::path::{Path, PathBuf};

pub const PLAN_FILE: &str = "implementation_plan.json";
pub const CONTEXT_FILE: &str = "context.json";
pub const SPEC_FILE: &str = "spec.md";
pub const PROJECT_INDEX_FILE: &str = "project_index.json";
pub const CONFIG_FILE: &str = "conductor.toml";
pub const DEFAULT_BOOKKEEPING_DIR: &str = ".conductor";

/// Project-wide config: `<project>/.conductor/conductor.toml`.
pub fn config_path(project_dir: &Path) -> PathBuf {
    project_dir.join(DEFAULT_BOOKKEEPING_DIR).join(CONFIG_FILE)
}

/// Paths for one spec directory (`<project>/<bookkeeping>/specs/<name>` by convention).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecPaths {
    dir: PathBuf,
}

impl SpecPaths {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Directory name, used as the spec identifier in branch names.
    pub fn name(&self) -> Option<&str> {
        self.dir.file_name().and_then(|name| name.to_str())
    }

    pub fn plan(&self) -> PathBuf {
        self.dir.join(PLAN_FILE)
    }

    pub fn context(&self) -> PathBuf {
        self.dir.join(CONTEXT_FILE)
    }

    pub fn spec(&self) -> PathBuf {
        self.dir.join(SPEC_FILE)
    }

    pub fn project_index(&self) -> PathBuf {
        self.dir.join(PROJECT_INDEX_FILE)
    }

    /// Auto-build location of the project index, two levels above the spec directory.
    pub fn shared_project_index(&self) -> PathBuf {
        self.dir.join("..").join("..").join(PROJECT_INDEX_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_file_locations() {
        let paths = SpecPaths::new("/work/.conductor/specs/001-search");
        assert_eq!(paths.name(), Some("001-search"));
        assert_eq!(
            paths.plan(),
            PathBuf::from("/work/.conductor/specs/001-search/implementation_plan.json")
        );
        assert!(paths.shared_project_index().ends_with("../../project_index.json"));
        assert_eq!(
            config_path(Path::new("/work")),
            PathBuf::from("/work/.conductor/conductor.toml")
        );
    }
}
