use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// How a file changed relative to the comparison base.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "from")]
pub enum ChangeType {
    Added,
    Modified,
    Deleted,
    /// Carries the old path.
    Renamed(String),
}

impl ChangeType {
    pub fn symbol(&self) -> &'static str {
        match self {
            ChangeType::Added => "+",
            ChangeType::Modified => "~",
            ChangeType::Deleted => "-",
            ChangeType::Renamed(_) => "R",
        }
    }

    /// Single-letter form folded into the result signature.
    fn signature_tag(&self) -> &'static str {
        match self {
            ChangeType::Added => "A",
            ChangeType::Modified => "M",
            ChangeType::Deleted => "D",
            ChangeType::Renamed(_) => "R",
        }
    }
}

/// Extensions treated as binary when the backend didn't say either way.
const BINARY_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "webp", "ico", "bmp", "pdf", "zip", "gz", "tar", "bz2", "xz",
    "7z", "jar", "class", "o", "a", "so", "dylib", "dll", "exe", "bin", "wasm", "woff", "woff2",
    "ttf", "otf", "eot", "mp3", "mp4", "mov", "avi", "sqlite", "db",
];

/// One changed path relative to the comparison base.
///
/// Immutable once received: updates replace the whole list for a scope,
/// never patch individual entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangedFile {
    /// Forward-slash separated, relative, unique within a result set.
    pub path: String,
    pub change_type: ChangeType,
    pub additions: u64,
    pub deletions: u64,
    /// Defaults to additions + deletions when the backend omits it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changes: Option<u64>,
    /// None means "infer from extension".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_binary: Option<bool>,
}

impl ChangedFile {
    pub fn changes(&self) -> u64 {
        self.changes.unwrap_or(self.additions + self.deletions)
    }

    pub fn is_binary(&self) -> bool {
        match self.is_binary {
            Some(flag) => flag,
            None => self
                .path
                .rsplit('.')
                .next()
                .map(|ext| BINARY_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                .unwrap_or(false),
        }
    }

    /// Leaf name (the part after the last `/`).
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

/// Branch context produced alongside a changed-file list. Displayed, never
/// used to key the cache.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BranchInfo {
    pub current_branch: String,
    pub base_branch: String,
    pub base_commit: String,
    pub head_commit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_base_branch: Option<String>,
}

/// A complete load result for one scope.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedDiff {
    pub files: Vec<ChangedFile>,
    pub branch_info: Option<BranchInfo>,
}

impl LoadedDiff {
    pub fn signature(&self) -> String {
        compute_signature(&self.files, self.branch_info.as_ref())
    }
}

/// Content hash of a result set, used to detect no-op reloads.
///
/// Folds in everything that changes what the UI would show: per-file
/// path/type/counts/binary flag plus the branch names.
pub fn compute_signature(files: &[ChangedFile], branch_info: Option<&BranchInfo>) -> String {
    let mut hasher = Sha256::new();
    for file in files {
        hasher.update(file.path.as_bytes());
        hasher.update([0]);
        hasher.update(file.change_type.signature_tag().as_bytes());
        if let ChangeType::Renamed(old) = &file.change_type {
            hasher.update(old.as_bytes());
        }
        hasher.update([0]);
        hasher.update(file.additions.to_le_bytes());
        hasher.update(file.deletions.to_le_bytes());
        hasher.update(file.changes().to_le_bytes());
        hasher.update([file.is_binary() as u8]);
    }
    if let Some(info) = branch_info {
        hasher.update(info.current_branch.as_bytes());
        hasher.update([0]);
        hasher.update(info.base_branch.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_file(path: &str, additions: u64, deletions: u64) -> ChangedFile {
        ChangedFile {
            path: path.to_string(),
            change_type: ChangeType::Modified,
            additions,
            deletions,
            changes: None,
            is_binary: None,
        }
    }

    #[test]
    fn changes_defaults_to_sum() {
        let file = make_file("src/main.rs", 3, 2);
        assert_eq!(file.changes(), 5);

        let mut explicit = make_file("src/main.rs", 3, 2);
        explicit.changes = Some(9);
        assert_eq!(explicit.changes(), 9);
    }

    #[test]
    fn binary_inferred_from_extension() {
        assert!(make_file("assets/logo.PNG", 0, 0).is_binary());
        assert!(!make_file("src/main.rs", 1, 0).is_binary());
        assert!(!make_file("Makefile", 1, 0).is_binary());

        // Explicit flag wins over the extension table
        let mut flagged = make_file("notes.txt", 0, 0);
        flagged.is_binary = Some(true);
        assert!(flagged.is_binary());
    }

    #[test]
    fn signature_stable_for_same_input() {
        let files = vec![make_file("a.rs", 1, 2), make_file("b/c.rs", 3, 0)];
        let info = BranchInfo {
            current_branch: "feature".into(),
            base_branch: "main".into(),
            base_commit: "abc".into(),
            head_commit: "def".into(),
            original_base_branch: None,
        };
        let one = compute_signature(&files, Some(&info));
        let two = compute_signature(&files, Some(&info));
        assert_eq!(one, two);
    }

    #[test]
    fn signature_changes_with_content() {
        let base = vec![make_file("a.rs", 1, 2)];
        let sig = compute_signature(&base, None);

        let more = vec![make_file("a.rs", 2, 2)];
        assert_ne!(compute_signature(&more, None), sig);

        let renamed = vec![ChangedFile {
            change_type: ChangeType::Renamed("old.rs".into()),
            ..base[0].clone()
        }];
        assert_ne!(compute_signature(&renamed, None), sig);
    }

    #[test]
    fn signature_includes_branch_names() {
        let files = vec![make_file("a.rs", 1, 0)];
        let main = BranchInfo {
            current_branch: "feature".into(),
            base_branch: "main".into(),
            ..BranchInfo::default()
        };
        let develop = BranchInfo {
            base_branch: "develop".into(),
            ..main.clone()
        };
        assert_ne!(
            compute_signature(&files, Some(&main)),
            compute_signature(&files, Some(&develop))
        );
    }
}
