use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow};
use git2::{Repository, RepositoryState, Signature, StatusOptions};
use serde::{Deserialize, Serialize};

/// Outcome of a pre-commit workspace check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceReport {
    pub passed: bool,
    pub violations: Vec<String>,
}

impl WorkspaceReport {
    pub fn clean() -> Self {
        Self {
            passed: true,
            violations: Vec::new(),
        }
    }

    pub fn from_violations(violations: Vec<String>) -> Self {
        Self {
            passed: violations.is_empty(),
            violations,
        }
    }
}

/// Workspace integrity and snapshot operations invoked at task completion.
///
/// Implementations own their own timeout and retry policy.
pub trait WorkspaceGuard: Send + Sync {
    fn verify_workspace(&self) -> Result<WorkspaceReport>;

    /// Commit the current workspace and return the commit hash.
    fn commit(&self, message: &str) -> Result<String>;
}

/// File names that must never be committed by an automated task.
const SECRET_FILE_NAMES: &[&str] = &[".env", "id_rsa", "id_ed25519", "credentials.json"];
const SECRET_FILE_SUFFIXES: &[&str] = &[".pem", ".key", ".p12"];

/// [`WorkspaceGuard`] over a local git repository.
pub struct GitWorkspace {
    repo: Mutex<Repository>,
}

impl GitWorkspace {
    pub fn new(project_dir: &Path) -> Result<Self> {
        let repo = Repository::open(project_dir).context("Failed to open git repository")?;
        Ok(Self {
            repo: Mutex::new(repo),
        })
    }

    fn repo(&self) -> Result<std::sync::MutexGuard<'_, Repository>> {
        self.repo
            .lock()
            .map_err(|e| anyhow!("Git repository lock poisoned: {}", e))
    }

    /// Get current HEAD SHA (returns None for unborn branches)
    pub fn head_sha(&self) -> Result<Option<String>> {
        let repo = self.repo()?;
        Ok(head_commit(&repo).map(|c| c.id().to_string()))
    }
}

/// Get the HEAD commit if it exists (returns None for unborn branches)
fn head_commit(repo: &Repository) -> Option<git2::Commit<'_>> {
    repo.head().ok().and_then(|head| head.peel_to_commit().ok())
}

fn is_secret_path(path: &str) -> bool {
    let name = path.rsplit('/').next().unwrap_or(path);
    SECRET_FILE_NAMES.contains(&name) || SECRET_FILE_SUFFIXES.iter().any(|s| name.ends_with(s))
}

impl WorkspaceGuard for GitWorkspace {
    fn verify_workspace(&self) -> Result<WorkspaceReport> {
        let repo = self.repo()?;
        let mut violations = Vec::new();

        let state = repo.state();
        if state != RepositoryState::Clean {
            violations.push(format!("repository has an operation in progress: {:?}", state));
        }

        if repo.index()?.has_conflicts() {
            violations.push("index has unresolved conflicts".to_string());
        }

        let mut opts = StatusOptions::new();
        opts.include_untracked(true).recurse_untracked_dirs(true);
        let statuses = repo
            .statuses(Some(&mut opts))
            .context("Failed to read workspace status")?;
        for entry in statuses.iter() {
            if let Some(path) = entry.path()
                && is_secret_path(path)
            {
                violations.push(format!("secret-bearing file would be committed: {}", path));
            }
        }

        Ok(WorkspaceReport::from_violations(violations))
    }

    fn commit(&self, message: &str) -> Result<String> {
        let repo = self.repo()?;
        let mut index = repo.index()?;

        index.add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)?;
        index.write()?;

        let tree_id = index.write_tree()?;
        let tree = repo.find_tree(tree_id)?;
        let sig = Signature::now("pipewright", "pipewright@localhost")?;

        // Unborn branch: first commit has no parent
        let commit_id = match head_commit(&repo) {
            Some(parent) => repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &[&parent])?,
            None => repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &[])?,
        };

        Ok(commit_id.to_string())
    }
}
