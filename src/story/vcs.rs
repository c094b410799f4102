//! Last-commit lookup for story directories.
//!
//! Uses libgit2 to read the HEAD reflog without shelling out to git.

use git2::{ErrorCode, Repository};
use std::path::Path;

pub const NOT_A_REPOSITORY: &str = "not a repository";

/// Source of the "last commit" column.
pub trait LastCommitReader: Send + Sync {
    /// `None` means `dir` is not the root of a working copy.
    fn last_commit_message(&self, dir: &Path) -> Option<String>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GitReflogReader;

impl LastCommitReader for GitReflogReader {
    fn last_commit_message(&self, dir: &Path) -> Option<String> {
        // open() rather than discover(): a story nested inside the project's
        // own repository must not report the project's history.
        let repo = Repository::open(dir).ok()?;
        match repo.reflog("HEAD") {
            // libgit2 keeps the most recently appended entry at index 0.
            Ok(reflog) => Some(
                reflog
                    .get(0)
                    .and_then(|entry| entry.message().map(|m| m.trim_end().to_string()))
                    .unwrap_or_default(),
            ),
            Err(err) if err.code() == ErrorCode::NotFound => Some(String::new()),
            Err(err) => {
                tracing::warn!(dir = %dir.display(), error = %err, "failed to read HEAD reflog");
                Some(String::new())
            }
        }
    }
}
