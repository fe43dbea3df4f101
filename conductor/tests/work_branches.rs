//! Work-branch setup, listing and cleanup against throwaway git repositories.

use conductor::branches::{
    cleanup_work_branches, commit_build, list_work_branches, prepare_work_branch,
};
use conductor::io::config::ConductorConfig;
use conductor::test_support::TestRepo;

fn repo_with_work_branches() -> TestRepo {
    let repo = TestRepo::new().expect("repo");

    repo.git_cmd(&["checkout", "-q", "-b", "conductor/001-a"]).expect("branch a");
    repo.write_file("a.txt", "a\n").expect("write");
    repo.commit_all("a1").expect("commit");
    repo.write_file("src/a.rs", "fn a() {}\n").expect("write");
    repo.commit_all("a2").expect("commit");

    repo.git_cmd(&["checkout", "-q", "main"]).expect("main");
    repo.git_cmd(&["checkout", "-q", "-b", "conductor/002-b"]).expect("branch b");
    repo.write_file("b.txt", "b\n").expect("write");
    repo.commit_all("b1").expect("commit");

    repo.git_cmd(&["checkout", "-q", "main"]).expect("main");
    repo.git_cmd(&["branch", "feature/unrelated"]).expect("other branch");
    repo
}

#[test]
fn lists_work_branches_with_counts() {
    let repo = repo_with_work_branches();
    let cfg = ConductorConfig::default();

    let branches = list_work_branches(&repo.git(), &cfg, None).expect("list");

    let summary: Vec<_> = branches
        .iter()
        .map(|b| (b.name.as_str(), b.spec_name.as_str(), b.commit_count, b.files_changed))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("conductor/001-a", "001-a", 2, 2),
            ("conductor/002-b", "002-b", 1, 1),
        ]
    );
}

#[test]
fn cleanup_deletes_work_branches_only() {
    let repo = repo_with_work_branches();
    let cfg = ConductorConfig::default();

    let report = cleanup_work_branches(&repo.git(), &cfg).expect("cleanup");

    assert_eq!(report.deleted, vec!["conductor/001-a", "conductor/002-b"]);
    assert!(report.skipped.is_empty());
    assert!(list_work_branches(&repo.git(), &cfg, None).expect("list").is_empty());
    assert!(repo.git().branch_exists("feature/unrelated").expect("exists"));
}

#[test]
fn cleanup_keeps_checked_out_work_branch() {
    let repo = repo_with_work_branches();
    repo.git_cmd(&["checkout", "-q", "conductor/002-b"]).expect("checkout");

    let report = cleanup_work_branches(&repo.git(), &ConductorConfig::default()).expect("cleanup");

    assert_eq!(report.deleted, vec!["conductor/001-a"]);
    assert_eq!(report.skipped, vec!["conductor/002-b"]);
    assert!(repo.git().branch_exists("conductor/002-b").expect("exists"));
}

#[test]
fn prepare_creates_then_reuses_work_branch() {
    let repo = TestRepo::new().expect("repo");
    repo.write_file("README.md", "hello\n").expect("write");
    repo.commit_all("init").expect("commit");
    let cfg = ConductorConfig::default();
    let git = repo.git();

    let branch = prepare_work_branch(&git, &cfg, "003-c").expect("create");
    assert_eq!(branch, "conductor/003-c");
    assert_eq!(git.current_branch().expect("current"), "conductor/003-c");

    repo.write_file("src/c.rs", "fn c() {}\n").expect("write");
    assert!(commit_build(&git, "003-c").expect("commit"));
    assert!(!commit_build(&git, "003-c").expect("nothing to commit"));

    repo.git_cmd(&["checkout", "-q", "main"]).expect("main");
    prepare_work_branch(&git, &cfg, "003-c").expect("reuse");
    assert_eq!(git.current_branch().expect("current"), "conductor/003-c");
    prepare_work_branch(&git, &cfg, "003-c").expect("already there");

    let branches = list_work_branches(&git, &cfg, Some("main")).expect("list");
    assert_eq!(branches.len(), 1);
    assert_eq!(branches[0].commit_count, 1);
    assert_eq!(branches[0].files_changed, 1);
}
