//! Workspace file listing.
//!
//! Walks the workspace honoring gitignore rules, skipping `.git` itself but
//! keeping other dotfiles. Paths are returned workspace-relative and sorted,
//! so listings are stable across calls.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ignore::WalkBuilder;

#[derive(Clone)]
pub struct Workspace {
    root: Arc<PathBuf>,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Arc::new(root.into()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Is `rel` a path this workspace will accept for focus lists? Requires
    /// a non-empty relative path with no parent-directory hops.
    pub fn accepts(&self, rel: &str) -> bool {
        !rel.is_empty()
            && !Path::new(rel).is_absolute()
            && !rel.split('/').any(|part| part == "..")
    }

    /// All files under the root, gitignore applied, `.git` skipped.
    pub async fn list_files(&self) -> Result<Vec<String>, std::io::Error> {
        let root = Arc::clone(&self.root);
        tokio::task::spawn_blocking(move || {
            let walker = WalkBuilder::new(root.as_path())
                .hidden(false)
                .require_git(false)
                .filter_entry(|entry| entry.file_name() != ".git")
                .build();

            let mut files = Vec::new();
            for entry in walker {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(err) => {
                        tracing::debug!(error = %err, "skipping unreadable entry");
                        continue;
                    }
                };
                if !entry.file_type().is_some_and(|t| t.is_file()) {
                    continue;
                }
                if let Ok(rel) = entry.path().strip_prefix(root.as_path()) {
                    files.push(rel.to_string_lossy().into_owned());
                }
            }
            files.sort();
            files
        })
        .await
        .map_err(std::io::Error::other)
    }
}
