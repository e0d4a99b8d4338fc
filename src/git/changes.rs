use std::collections::HashMap;

use crate::model::{ChangeType, ChangedFile};

/// One `git diff --numstat` record.
#[derive(Debug, Clone, PartialEq)]
pub struct NumstatEntry {
    pub path: String,
    /// None for binary files (numstat prints `-`).
    pub additions: Option<u64>,
    pub deletions: Option<u64>,
}

/// Parse `git diff --numstat` output.
///
/// Rename records carry the path as either `old => new` or the brace form
/// `src/{old => new}/file.rs`; both resolve to the new path here.
pub fn parse_numstat(raw: &str) -> Vec<NumstatEntry> {
    raw.lines()
        .filter_map(|line| {
            let mut parts = line.splitn(3, '\t');
            let additions = parse_count(parts.next()?);
            let deletions = parse_count(parts.next()?);
            let path = resolve_rename_path(parts.next()?.trim());
            if path.is_empty() {
                return None;
            }
            Some(NumstatEntry {
                path,
                additions,
                deletions,
            })
        })
        .collect()
}

fn parse_count(field: &str) -> Option<u64> {
    if field == "-" {
        None
    } else {
        field.trim().parse().ok()
    }
}

/// Resolve `old => new` rename notation to the new path.
fn resolve_rename_path(field: &str) -> String {
    if let (Some(open), Some(close)) = (field.find('{'), field.rfind('}')) {
        if let Some(arrow) = field[open..close].find(" => ") {
            let prefix = &field[..open];
            let new_part = &field[open + arrow + 4..close];
            let suffix = &field[close + 1..];
            // `src/{lib => core}/x.rs` with an empty side leaves a double
            // slash behind, e.g. `src/{ => core}/x.rs`
            return format!("{}{}{}", prefix, new_part, suffix).replace("//", "/");
        }
    }
    if let Some((_, new_path)) = field.split_once(" => ") {
        return new_path.to_string();
    }
    field.to_string()
}

/// Parse `git diff --name-status` output into per-path change types.
/// Copies are reported as additions of the new path.
pub fn parse_name_status(raw: &str) -> Vec<(String, ChangeType)> {
    raw.lines()
        .filter_map(|line| {
            let mut parts = line.split('\t');
            let status = parts.next()?.trim();
            let first = parts.next()?.trim();
            match status.chars().next()? {
                'A' => Some((first.to_string(), ChangeType::Added)),
                'D' => Some((first.to_string(), ChangeType::Deleted)),
                'M' | 'T' => Some((first.to_string(), ChangeType::Modified)),
                'R' => {
                    let new_path = parts.next()?.trim();
                    Some((
                        new_path.to_string(),
                        ChangeType::Renamed(first.to_string()),
                    ))
                }
                'C' => {
                    let new_path = parts.next()?.trim();
                    Some((new_path.to_string(), ChangeType::Added))
                }
                _ => None,
            }
        })
        .collect()
}

/// Join numstat counts with name-status types into the changed-file list.
/// Numstat order wins; paths missing a status record default to Modified.
pub fn merge_changed_files(
    numstat: Vec<NumstatEntry>,
    statuses: Vec<(String, ChangeType)>,
) -> Vec<ChangedFile> {
    let mut by_path: HashMap<String, ChangeType> = statuses.into_iter().collect();
    numstat
        .into_iter()
        .map(|entry| {
            let change_type = by_path
                .remove(&entry.path)
                .unwrap_or(ChangeType::Modified);
            let is_binary = entry.additions.is_none() || entry.deletions.is_none();
            ChangedFile {
                path: entry.path,
                change_type,
                additions: entry.additions.unwrap_or(0),
                deletions: entry.deletions.unwrap_or(0),
                changes: None,
                is_binary: if is_binary { Some(true) } else { None },
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_numstat() {
        let raw = "3\t1\tsrc/main.rs\n0\t5\tREADME.md\n";
        let entries = parse_numstat(raw);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].path, "src/main.rs");
        assert_eq!(entries[0].additions, Some(3));
        assert_eq!(entries[0].deletions, Some(1));
        assert_eq!(entries[1].deletions, Some(5));
    }

    #[test]
    fn binary_numstat_counts_are_none() {
        let entries = parse_numstat("-\t-\tassets/logo.png\n");
        assert_eq!(entries[0].additions, None);
        assert_eq!(entries[0].deletions, None);
    }

    #[test]
    fn rename_paths_resolve_to_new_path() {
        let entries = parse_numstat("1\t1\told.rs => new.rs\n2\t0\tsrc/{lib => core}/x.rs\n");
        assert_eq!(entries[0].path, "new.rs");
        assert_eq!(entries[1].path, "src/core/x.rs");
    }

    #[test]
    fn rename_with_empty_brace_side() {
        let entries = parse_numstat("1\t0\tsrc/{ => nested}/x.rs\n");
        assert_eq!(entries[0].path, "src/nested/x.rs");
    }

    #[test]
    fn parses_name_status() {
        let raw = "M\tsrc/main.rs\nA\tnew.rs\nD\tgone.rs\nR100\told.rs\trenamed.rs\nC75\tbase.rs\tcopy.rs\n";
        let statuses = parse_name_status(raw);
        assert_eq!(statuses[0], ("src/main.rs".to_string(), ChangeType::Modified));
        assert_eq!(statuses[1], ("new.rs".to_string(), ChangeType::Added));
        assert_eq!(statuses[2], ("gone.rs".to_string(), ChangeType::Deleted));
        assert_eq!(
            statuses[3],
            (
                "renamed.rs".to_string(),
                ChangeType::Renamed("old.rs".to_string())
            )
        );
        assert_eq!(statuses[4], ("copy.rs".to_string(), ChangeType::Added));
    }

    #[test]
    fn merge_joins_counts_with_types() {
        let numstat = parse_numstat("2\t1\ta.rs\n-\t-\tlogo.png\n4\t0\trenamed.rs\n");
        let statuses =
            parse_name_status("M\ta.rs\nA\tlogo.png\nR90\told.rs\trenamed.rs\n");
        let files = merge_changed_files(numstat, statuses);

        assert_eq!(files.len(), 3);
        assert_eq!(files[0].change_type, ChangeType::Modified);
        assert_eq!(files[0].additions, 2);

        assert_eq!(files[1].change_type, ChangeType::Added);
        assert_eq!(files[1].is_binary, Some(true));
        assert_eq!(files[1].additions, 0);

        assert_eq!(
            files[2].change_type,
            ChangeType::Renamed("old.rs".to_string())
        );
        assert_eq!(files[2].additions, 4);
    }

    #[test]
    fn missing_status_defaults_to_modified() {
        let files = merge_changed_files(parse_numstat("1\t1\tx.rs\n"), Vec::new());
        assert_eq!(files[0].change_type, ChangeType::Modified);
    }
}
