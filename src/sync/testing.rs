//! Local git fixtures for tests. Nothing here touches the network.

use std::path::{Path, PathBuf};
use std::process::Command;

use super::git::GitCli;

pub(crate) fn git_available() -> bool {
    if GitCli::new().is_available() {
        true
    } else {
        eprintln!("skipping git test (git not found on PATH)");
        false
    }
}

fn git(dir: &Path, args: &[&str]) {
    let output = Command::new("git")
        .arg("-C")
        .arg(dir)
        .args([
            "-c",
            "user.name=konn-test",
            "-c",
            "user.email=konn-test@example.com",
            "-c",
            "commit.gpgsign=false",
        ])
        .args(args)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
}

/// Create a (non-bare) origin repository `<parent>/<name>` with one commit
/// containing `main.libsonnet`.
pub(crate) fn init_origin(parent: &Path, name: &str) -> PathBuf {
    let origin = parent.join(name);
    std::fs::create_dir_all(&origin).unwrap();
    git(&origin, &["init", "-q"]);
    commit_file(&origin, "main.libsonnet", "{ name: 'main' }");
    origin
}

/// Write `file` in `origin` and commit it.
pub(crate) fn commit_file(origin: &Path, file: &str, contents: &str) {
    std::fs::write(origin.join(file), contents).unwrap();
    git(origin, &["add", "--all"]);
    git(origin, &["commit", "-q", "-m", file]);
}
