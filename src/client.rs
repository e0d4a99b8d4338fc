use thiserror::Error;

use crate::model::{BranchInfo, ChangedFile, LoadedDiff};
use crate::scope::ScopeKey;

/// Backend error substrings that mean "this session/worktree no longer
/// exists" rather than a transient failure.
const MISSING_MARKERS: &[&str] = &[
    "not found",
    "no such file or directory",
    "is not a working tree",
    "does not exist",
];

/// Classified failure from a backend query. The missing/transient split is
/// load-bearing: the loader retries transient failures on the next switch
/// but marks missing scopes as permanently gone.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("session or worktree no longer exists: {0}")]
    MissingSession(String),
    #[error("backend query failed: {0}")]
    Transient(String),
}

impl QueryError {
    /// Classify raw backend error text by known substrings.
    pub fn classify(raw: impl Into<String>) -> QueryError {
        let raw = raw.into();
        let lowered = raw.to_lowercase();
        if MISSING_MARKERS.iter().any(|m| lowered.contains(m)) {
            QueryError::MissingSession(raw)
        } else {
            QueryError::Transient(raw)
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, QueryError::MissingSession(_))
    }
}

/// Thin request/response wrapper over the native backend. No caching, no
/// retries; every call fails with a classified `QueryError`.
pub trait QueryClient {
    fn changed_files(&self, scope: &ScopeKey) -> Result<Vec<ChangedFile>, QueryError>;
    fn current_branch(&self, scope: &ScopeKey) -> Result<String, QueryError>;
    fn base_branch(&self, scope: &ScopeKey) -> Result<String, QueryError>;
    /// `(base_commit, head_commit)` pair for the comparison.
    fn commit_comparison(&self, scope: &ScopeKey) -> Result<(String, String), QueryError>;

    /// Idempotent: starting an already-watched scope restarts it.
    fn start_file_watcher(&self, scope: &ScopeKey) -> Result<(), QueryError>;
    /// Idempotent: stopping a non-started watcher is a no-op, not an error.
    fn stop_file_watcher(&self, scope: &ScopeKey) -> Result<(), QueryError>;

    /// Mutates backend state; the caller must reload the scope afterwards.
    fn reset_session_worktree(&self, scope: &ScopeKey) -> Result<(), QueryError>;
    /// Mutates backend state; the caller must reload the scope afterwards.
    fn discard_file(&self, scope: &ScopeKey, path: &str) -> Result<(), QueryError>;
}

/// Compose the individual queries into one `LoadedDiff` for a scope.
///
/// The file list is authoritative. Branch lookups are best-effort: a
/// transient branch failure logs and yields `branch_info: None`, but a
/// missing-session classification anywhere fails the whole load.
pub fn fetch_scope<C: QueryClient + ?Sized>(
    client: &C,
    scope: &ScopeKey,
) -> Result<LoadedDiff, QueryError> {
    let files = client.changed_files(scope)?;
    let branch_info = match fetch_branch_info(client, scope) {
        Ok(info) => Some(info),
        Err(err) if err.is_missing() => return Err(err),
        Err(err) => {
            log::warn!("branch info unavailable for {}: {}", scope, err);
            None
        }
    };
    Ok(LoadedDiff { files, branch_info })
}

fn fetch_branch_info<C: QueryClient + ?Sized>(
    client: &C,
    scope: &ScopeKey,
) -> Result<BranchInfo, QueryError> {
    let current_branch = client.current_branch(scope)?;
    let base_branch = client.base_branch(scope)?;
    let (base_commit, head_commit) = client.commit_comparison(scope)?;
    Ok(BranchInfo {
        current_branch,
        base_branch,
        base_commit,
        head_commit,
        original_base_branch: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_markers_classify_as_missing() {
        assert!(QueryError::classify("fatal: worktree not found").is_missing());
        assert!(QueryError::classify("No such file or directory (os error 2)").is_missing());
        assert!(QueryError::classify("'/tmp/w' is not a working tree").is_missing());
    }

    #[test]
    fn other_errors_classify_as_transient() {
        let err = QueryError::classify("index.lock held by another process");
        assert!(!err.is_missing());
        assert!(matches!(err, QueryError::Transient(_)));
    }
}
