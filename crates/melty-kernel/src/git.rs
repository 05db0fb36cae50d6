//! Version control via libgit2.
//!
//! One repository handle, opened at startup, serves every operation; nothing
//! in here re-discovers a repository per call. [`GitRepo`] is the synchronous
//! core behind a mutex; [`Git`] is the async facade that runs each operation
//! on the blocking pool, since libgit2 does real disk work.
//!
//! The surface is deliberately defensive. Operations that callers treat as
//! advisory (`udiff_from_commit`, `latest_commit`, `config_errors`) map the
//! awkward repository states to sentinels (empty string, `None`, message
//! list) instead of failing; mutations return typed errors.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use git2::{
    BranchType, Commit, IndexAddOption, Oid, Repository, StatusOptions, StatusShow,
};

use melty_types::changeset::Changeset;

/// Errors from git operations.
#[derive(Debug, thiserror::Error)]
pub enum GitError {
    #[error("git2: {0}")]
    Git2(#[from] git2::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("stale undo: {requested} is not the current head {head}")]
    StaleUndo { requested: String, head: String },
    #[error("refusing to undo the root commit")]
    UndoRoot,
    #[error("repository has no commits")]
    NoCommits,
    #[error("{0}")]
    Other(String),
}

/// Thin wrapper around a git2 `Repository`.
pub struct GitRepo {
    repo: Mutex<Repository>,
    root: PathBuf,
    remote: String,
}

impl GitRepo {
    /// Open an existing git repository at `path`.
    pub fn open(path: impl Into<PathBuf>, remote: impl Into<String>) -> Result<Self, GitError> {
        let root: PathBuf = path.into();
        let repo = Repository::open(&root)?;
        Ok(Self {
            repo: Mutex::new(repo),
            root,
            remote: remote.into(),
        })
    }

    /// Repository root path.
    pub fn root(&self) -> &Path {
        &self.root
    }

    // ========================================================================
    // Status
    // ========================================================================

    /// Advisory: does index + worktree match HEAD with nothing untracked?
    pub fn repo_is_clean(&self) -> Result<bool, GitError> {
        let repo = self.lock()?;
        Ok(count_changed(&repo)? == 0)
    }

    // ========================================================================
    // Commits
    // ========================================================================

    /// Stage everything (untracked included) and commit.
    ///
    /// Returns the number of files committed. A clean tree returns 0 and
    /// creates no commit.
    pub fn commit_local_changes(&self, message: &str) -> Result<usize, GitError> {
        let repo = self.lock()?;
        let changed = count_changed(&repo)?;
        if changed == 0 {
            return Ok(0);
        }

        let mut index = repo.index()?;
        index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None)?;
        index.update_all(["*"].iter(), None)?;
        index.write()?;

        let tree = repo.find_tree(index.write_tree()?)?;
        let sig = repo.signature()?;
        let parent = match repo.head() {
            Ok(head) => Some(head.peel_to_commit()?),
            Err(_) => None,
        };
        let parents: Vec<&Commit> = parent.iter().collect();
        repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)?;

        tracing::debug!(files = changed, "committed local changes");
        Ok(changed)
    }

    /// Write a changeset to the worktree, stage exactly its paths, commit.
    ///
    /// Returns `(None, changeset)` without touching the repository when the
    /// changeset is empty. Unrelated dirty files are allowed and left
    /// uncommitted, with a warning. Each edit's `original` field is filled
    /// from the pre-write contents, so the returned changeset records what
    /// the commit replaced.
    pub fn commit_changeset(
        &self,
        mut changeset: Changeset,
        message: &str,
    ) -> Result<(Option<String>, Changeset), GitError> {
        if changeset.is_empty() {
            return Ok((None, changeset));
        }
        for path in changeset.paths() {
            if Path::new(path).is_absolute() || path.split('/').any(|part| part == "..") {
                return Err(GitError::Other(format!(
                    "changeset path escapes the repository: {path}"
                )));
            }
        }

        let repo = self.lock()?;

        let dirty = count_changed(&repo)?;
        if dirty > 0 {
            tracing::warn!(dirty, "committing changeset on a dirty tree");
        }

        for (path, edit) in changeset.files.iter_mut() {
            let abs = self.root.join(path);
            edit.original = match std::fs::read_to_string(&abs) {
                Ok(contents) => contents,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => String::new(),
                Err(err) => return Err(err.into()),
            };
            if edit.is_deletion() {
                if abs.exists() {
                    std::fs::remove_file(&abs)?;
                }
            } else {
                if let Some(parent) = abs.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&abs, &edit.updated)?;
            }
        }

        let mut index = repo.index()?;
        for (path, edit) in &changeset.files {
            let rel = Path::new(path);
            if edit.is_deletion() {
                if index.get_path(rel, 0).is_some() {
                    index.remove_path(rel)?;
                }
            } else {
                index.add_path(rel)?;
            }
        }
        index.write()?;

        let tree = repo.find_tree(index.write_tree()?)?;
        let sig = repo.signature()?;
        let parent = match repo.head() {
            Ok(head) => Some(head.peel_to_commit()?),
            Err(_) => None,
        };
        let parents: Vec<&Commit> = parent.iter().collect();
        let oid = repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)?;

        Ok((Some(oid.to_string()), changeset))
    }

    /// Current HEAD commit hash, or `None` on an unborn branch.
    pub fn latest_commit(&self) -> Result<Option<String>, GitError> {
        let repo = self.lock()?;
        match repo.head() {
            Ok(head) => Ok(Some(head.peel_to_commit()?.id().to_string())),
            Err(_) => Ok(None),
        }
    }

    /// Drop the given commit, but only while it is still HEAD.
    ///
    /// A stale id is refused and the repository is left untouched. The reset
    /// is hard: the commit's changes leave the worktree too.
    pub fn undo_last_commit(&self, commit_id: &str) -> Result<(), GitError> {
        let repo = self.lock()?;
        let head = match repo.head() {
            Ok(head) => head.peel_to_commit()?,
            Err(_) => return Err(GitError::NoCommits),
        };
        let head_id = head.id().to_string();
        if head_id != commit_id {
            return Err(GitError::StaleUndo {
                requested: commit_id.to_string(),
                head: head_id,
            });
        }
        let parent = match head.parent(0) {
            Ok(parent) => parent,
            Err(_) => return Err(GitError::UndoRoot),
        };
        repo.reset(parent.as_object(), git2::ResetType::Hard, None)?;
        Ok(())
    }

    // ========================================================================
    // Diff
    // ========================================================================

    /// Unified diff of a commit against its sole parent.
    ///
    /// Returns the empty string, not an error, when the repository has no
    /// commits, the id does not resolve, or the commit has zero parents
    /// (root) or more than one (merge). `None` means HEAD.
    pub fn udiff_from_commit(&self, commit_id: Option<&str>) -> Result<String, GitError> {
        let repo = self.lock()?;

        let oid = match commit_id {
            Some(id) => match Oid::from_str(id) {
                Ok(oid) => oid,
                Err(_) => return Ok(String::new()),
            },
            None => match repo.head().ok().and_then(|h| h.peel_to_commit().ok()) {
                Some(commit) => commit.id(),
                None => return Ok(String::new()),
            },
        };
        let commit = match repo.find_commit(oid) {
            Ok(commit) => commit,
            Err(_) => return Ok(String::new()),
        };
        if commit.parent_count() != 1 {
            return Ok(String::new());
        }

        let parent_tree = commit.parent(0)?.tree()?;
        let commit_tree = commit.tree()?;
        let diff = repo.diff_tree_to_tree(Some(&parent_tree), Some(&commit_tree), None)?;
        diff_to_string(&diff)
    }

    // ========================================================================
    // Branches
    // ========================================================================

    /// Current branch name (`None` if detached or unborn).
    pub fn current_branch(&self) -> Result<Option<String>, GitError> {
        let repo = self.lock()?;
        match repo.head() {
            Ok(head) => {
                if head.is_branch() {
                    Ok(head.shorthand().map(|s| s.to_string()))
                } else {
                    Ok(None)
                }
            }
            Err(_) => Ok(None),
        }
    }

    /// Create the branch at HEAD if missing, then check it out.
    pub fn ensure_branch(&self, name: &str) -> Result<(), GitError> {
        let repo = self.lock()?;
        let target = match repo.head() {
            Ok(head) => head.peel_to_commit()?,
            Err(_) => return Err(GitError::NoCommits),
        };
        if repo.find_branch(name, BranchType::Local).is_err() {
            repo.branch(name, &target, false)?;
        }
        repo.set_head(&format!("refs/heads/{name}"))?;
        let mut checkout = git2::build::CheckoutBuilder::new();
        checkout.safe();
        repo.checkout_head(Some(&mut checkout))?;
        Ok(())
    }

    // ========================================================================
    // Remote
    // ========================================================================

    /// Push the current branch to the configured remote and return a compare
    /// URL for opening a pull request.
    pub fn create_pull_request(&self) -> Result<String, GitError> {
        let repo = self.lock()?;
        let head = repo.head()?;
        if !head.is_branch() {
            return Err(GitError::Other("not on a branch".to_string()));
        }
        let branch = head
            .shorthand()
            .ok_or_else(|| GitError::Other("branch name is not valid utf-8".to_string()))?
            .to_string();

        let mut remote = repo.find_remote(&self.remote)?;
        let refspec = format!("refs/heads/{branch}:refs/heads/{branch}");
        remote.push(&[refspec.as_str()], None)?;
        let url = remote
            .url()
            .ok_or_else(|| GitError::Other("remote url is not valid utf-8".to_string()))?;
        tracing::info!(branch = %branch, remote = %self.remote, "pushed branch");
        Ok(compare_url(url, &branch))
    }

    // ========================================================================
    // Config
    // ========================================================================

    /// Human-readable problems with the repository's git config. Empty when
    /// healthy. Never fails; failures become messages.
    pub fn config_errors(&self) -> Vec<String> {
        let repo = match self.lock() {
            Ok(repo) => repo,
            Err(err) => return vec![err.to_string()],
        };
        let snapshot = match repo.config().and_then(|mut c| c.snapshot()) {
            Ok(snapshot) => snapshot,
            Err(err) => return vec![format!("cannot read git config: {err}")],
        };
        let mut problems = Vec::new();
        for key in ["user.name", "user.email"] {
            if snapshot.get_string(key).is_err() {
                problems.push(format!("{key} is not set in git config"));
            }
        }
        problems
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Repository>, GitError> {
        self.repo
            .lock()
            .map_err(|_| GitError::Other("failed to acquire repository lock".to_string()))
    }
}

/// Entries differing from HEAD, untracked included, ignored files excluded.
fn count_changed(repo: &Repository) -> Result<usize, GitError> {
    let mut opts = StatusOptions::new();
    opts.include_untracked(true)
        .recurse_untracked_dirs(true)
        .show(StatusShow::IndexAndWorkdir);
    Ok(repo.statuses(Some(&mut opts))?.len())
}

/// Format a git2 Diff as a patch string.
fn diff_to_string(diff: &git2::Diff<'_>) -> Result<String, GitError> {
    let mut output = String::new();
    diff.print(git2::DiffFormat::Patch, |_delta, _hunk, line| {
        let origin = match line.origin() {
            '+' => "+",
            '-' => "-",
            ' ' => " ",
            _ => "",
        };
        output.push_str(origin);
        if let Ok(content) = std::str::from_utf8(line.content()) {
            output.push_str(content);
        }
        true
    })?;
    Ok(output)
}

/// Turn a remote URL into a branch compare URL.
fn compare_url(remote_url: &str, branch: &str) -> String {
    let base = remote_url.trim_end_matches(".git");
    let base = match base.strip_prefix("git@") {
        Some(rest) => match rest.split_once(':') {
            Some((host, path)) => format!("https://{host}/{path}"),
            None => base.to_string(),
        },
        None => base.to_string(),
    };
    format!("{base}/compare/{branch}?expand=1")
}

// =============================================================================
// Async facade
// =============================================================================

/// Clone-cheap handle that runs [`GitRepo`] operations on the blocking pool.
#[derive(Clone)]
pub struct Git {
    repo: Arc<GitRepo>,
}

impl Git {
    /// Open the repository at `root`, pushing to `remote`.
    pub fn open(root: impl Into<PathBuf>, remote: impl Into<String>) -> Result<Self, GitError> {
        Ok(Self {
            repo: Arc::new(GitRepo::open(root, remote)?),
        })
    }

    pub fn root(&self) -> PathBuf {
        self.repo.root().to_path_buf()
    }

    async fn run<T, F>(&self, op: F) -> Result<T, GitError>
    where
        T: Send + 'static,
        F: FnOnce(&GitRepo) -> Result<T, GitError> + Send + 'static,
    {
        let repo = Arc::clone(&self.repo);
        tokio::task::spawn_blocking(move || op(&repo))
            .await
            .map_err(|err| GitError::Other(format!("git task failed: {err}")))?
    }

    pub async fn repo_is_clean(&self) -> Result<bool, GitError> {
        self.run(|r| r.repo_is_clean()).await
    }

    pub async fn commit_local_changes(&self, message: String) -> Result<usize, GitError> {
        self.run(move |r| r.commit_local_changes(&message)).await
    }

    pub async fn commit_changeset(
        &self,
        changeset: Changeset,
        message: String,
    ) -> Result<(Option<String>, Changeset), GitError> {
        self.run(move |r| r.commit_changeset(changeset, &message))
            .await
    }

    pub async fn latest_commit(&self) -> Result<Option<String>, GitError> {
        self.run(|r| r.latest_commit()).await
    }

    pub async fn undo_last_commit(&self, commit_id: String) -> Result<(), GitError> {
        self.run(move |r| r.undo_last_commit(&commit_id)).await
    }

    pub async fn udiff_from_commit(&self, commit_id: Option<String>) -> Result<String, GitError> {
        self.run(move |r| r.udiff_from_commit(commit_id.as_deref()))
            .await
    }

    pub async fn current_branch(&self) -> Result<Option<String>, GitError> {
        self.run(|r| r.current_branch()).await
    }

    pub async fn ensure_branch(&self, name: String) -> Result<(), GitError> {
        self.run(move |r| r.ensure_branch(&name)).await
    }

    pub async fn create_pull_request(&self) -> Result<String, GitError> {
        self.run(|r| r.create_pull_request()).await
    }

    pub async fn config_errors(&self) -> Vec<String> {
        self.run(|r| Ok(r.config_errors()))
            .await
            .unwrap_or_else(|err| vec![err.to_string()])
    }
}

// ============================================================================
// Tests
// ============================================================================
