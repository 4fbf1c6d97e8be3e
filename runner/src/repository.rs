use crate::{
    config::ProjectConfig,
    project::{run_checked, ProjectError},
};
use std::{path::Path, process::Command};
use tempfile::TempDir;
use tracing::info;

/// A git repository cloned into a temporary directory, removed on drop
#[derive(Debug)]
pub struct Repository {
    directory: TempDir,
    pub url: String,
    pub commit: String,
    pub sha: String,
}

impl Repository {
    pub fn checkout(config: &ProjectConfig) -> Result<Self, ProjectError> {
        let directory = tempfile::Builder::new()
            .prefix("kvbench-")
            .tempdir()
            .map_err(ProjectError::TempDir)?;

        info!(url = %config.repo_url, path = ?directory.path(), "Cloning repository");
        run_checked(
            Command::new("git")
                .arg("clone")
                .arg(&config.repo_url)
                .arg(directory.path()),
        )?;

        info!(commit = %config.commit, "Checking out commit");
        run_checked(
            Command::new("git")
                .arg("checkout")
                .arg(&config.commit)
                .current_dir(directory.path()),
        )?;

        let output = run_checked(
            Command::new("git")
                .args(["rev-parse", "HEAD"])
                .current_dir(directory.path()),
        )?;
        let sha = String::from_utf8_lossy(&output.stdout).trim().to_owned();

        info!(url = %config.repo_url, sha = %sha, "Repository ready");

        Ok(Self {
            directory,
            url: config.repo_url.clone(),
            commit: config.commit.clone(),
            sha,
        })
    }

    pub fn path(&self) -> &Path {
        self.directory.path()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{collections::BTreeMap, fs};

    fn git_available() -> bool {
        Command::new("git")
            .arg("--version")
            .output()
            .map(|output| output.status.success())
            .unwrap_or(false)
    }

    fn git(dir: &Path, args: &[&str]) {
        let status = Command::new("git")
            .args(args)
            .current_dir(dir)
            .env("GIT_AUTHOR_NAME", "kvbench")
            .env("GIT_AUTHOR_EMAIL", "kvbench@localhost")
            .env("GIT_COMMITTER_NAME", "kvbench")
            .env("GIT_COMMITTER_EMAIL", "kvbench@localhost")
            .status()
            .unwrap();
        assert!(status.success(), "git {args:?} failed");
    }

    fn config(url: &Path, commit: &str) -> ProjectConfig {
        ProjectConfig {
            repo_url: url.to_string_lossy().into_owned(),
            commit: commit.to_owned(),
            env: BTreeMap::new(),
            cmake_params: Vec::new(),
        }
    }

    #[test]
    fn clones_and_resolves_commit() {
        if !git_available() {
            return;
        }

        let origin = tempfile::tempdir().unwrap();
        git(origin.path(), &["init", "-q"]);
        fs::write(origin.path().join("README"), "first").unwrap();
        git(origin.path(), &["add", "README"]);
        git(origin.path(), &["commit", "-q", "-m", "first"]);
        fs::write(origin.path().join("README"), "second").unwrap();
        git(origin.path(), &["commit", "-q", "-a", "-m", "second"]);

        let repository = Repository::checkout(&config(origin.path(), "HEAD~1")).unwrap();

        assert_eq!(repository.sha.len(), 40);
        assert_eq!(
            fs::read_to_string(repository.path().join("README")).unwrap(),
            "first"
        );

        let path = repository.path().to_path_buf();
        drop(repository);
        assert!(!path.exists());
    }

    #[test]
    fn unknown_commit_fails() {
        if !git_available() {
            return;
        }

        let origin = tempfile::tempdir().unwrap();
        git(origin.path(), &["init", "-q"]);
        fs::write(origin.path().join("README"), "first").unwrap();
        git(origin.path(), &["add", "README"]);
        git(origin.path(), &["commit", "-q", "-m", "first"]);

        assert!(matches!(
            Repository::checkout(&config(origin.path(), "does-not-exist")),
            Err(ProjectError::Failed { .. })
        ));
    }
}
