use serde::{Deserialize, Serialize};

use crate::model::{BranchInfo, ChangedFile};
use crate::scope::ScopeKey;

/// Push notification carrying a fresh file list for some scope.
///
/// Delivered asynchronously and unordered relative to request/response
/// calls; the loader converges via signature comparison either way.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileChangesEvent {
    /// String scope identity (`session:<name>` / `orchestrator`).
    pub scope: String,
    pub changed_files: Vec<ChangedFile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_info: Option<BranchInfo>,
}

impl FileChangesEvent {
    pub fn scope_key(&self) -> ScopeKey {
        ScopeKey::parse(&self.scope)
    }
}
