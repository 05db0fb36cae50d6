//! File modifications produced by one bot turn.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Before/after contents for a single file.
///
/// `original` is empty for a file the turn creates; `updated` is empty for a
/// file the turn deletes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEdit {
    /// Contents before the turn.
    pub original: String,
    /// Contents after the turn. Empty means the file is removed.
    pub updated: String,
}

impl FileEdit {
    /// Create an edit from before/after contents.
    pub fn new(original: impl Into<String>, updated: impl Into<String>) -> Self {
        Self {
            original: original.into(),
            updated: updated.into(),
        }
    }

    /// An edit that creates a file.
    pub fn create(updated: impl Into<String>) -> Self {
        Self::new("", updated)
    }

    /// Does this edit remove the file?
    pub fn is_deletion(&self) -> bool {
        self.updated.is_empty()
    }
}

/// The set of file edits one bot turn proposes, keyed by repo-relative path.
///
/// A `BTreeMap` keeps path order stable so commits and diffs are
/// deterministic.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Changeset {
    /// Edits keyed by repo-relative path.
    pub files: BTreeMap<String, FileEdit>,
}

impl Changeset {
    /// Create an empty changeset.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the edit for a path.
    pub fn insert(&mut self, path: impl Into<String>, edit: FileEdit) {
        self.files.insert(path.into(), edit);
    }

    /// Number of files touched.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// True when no files are touched.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// The touched paths, in stable order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }
}
