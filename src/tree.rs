use std::collections::BTreeMap;

use crate::model::ChangedFile;

/// A node in the derived folder tree: either a folder or a single changed file.
#[derive(Debug, Clone, PartialEq)]
pub enum TreeNode {
    Folder(FolderNode),
    File(FileNode),
}

impl TreeNode {
    pub fn name(&self) -> &str {
        match self {
            TreeNode::Folder(folder) => &folder.name,
            TreeNode::File(file) => file.file.name(),
        }
    }

    fn is_folder(&self) -> bool {
        matches!(self, TreeNode::Folder(_))
    }
}

/// A folder with its (sorted) children and rolled-up statistics.
///
/// Rebuilt from scratch on every change to the active file list; never
/// mutated in place.
#[derive(Debug, Clone, PartialEq)]
pub struct FolderNode {
    /// Display name. For a compressed chain this is the joined path
    /// segment, e.g. `src/main/java/com/example`.
    pub name: String,
    /// Full path from the root, `""` for the root itself.
    pub path: String,
    pub children: Vec<TreeNode>,
    pub file_count: usize,
    pub additions: u64,
    pub deletions: u64,
    /// True when this node is a collapsed chain of single-child folders.
    pub is_compressed: bool,
}

/// A leaf wrapping one changed file.
#[derive(Debug, Clone, PartialEq)]
pub struct FileNode {
    pub file: ChangedFile,
}

/// Intermediate adjacency while grouping paths by directory.
#[derive(Default)]
struct DirAccum {
    files: Vec<ChangedFile>,
    subdirs: BTreeMap<String, DirAccum>,
}

/// Build the folder/file tree for a flat changed-file list.
///
/// Pure and deterministic: the same input always produces a structurally
/// identical tree. Chains of single-child folders with no direct files are
/// collapsed into one compressed node; the root is never collapsed. Children
/// are ordered folders-first, each group alphabetical by name.
pub fn build_folder_tree(files: &[ChangedFile]) -> FolderNode {
    let mut root = DirAccum::default();
    for file in files {
        let mut dir = &mut root;
        let mut segments: Vec<&str> = file.path.split('/').collect();
        let _leaf = segments.pop();
        for segment in segments {
            dir = dir.subdirs.entry(segment.to_string()).or_default();
        }
        dir.files.push(file.clone());
    }
    materialize(root, String::new(), String::new(), true)
}

fn materialize(accum: DirAccum, name: String, path: String, is_root: bool) -> FolderNode {
    let mut children: Vec<TreeNode> = Vec::new();

    for (sub_name, sub_accum) in accum.subdirs {
        let sub_path = if path.is_empty() {
            sub_name.clone()
        } else {
            format!("{}/{}", path, sub_name)
        };
        children.push(TreeNode::Folder(materialize(
            sub_accum, sub_name, sub_path, false,
        )));
    }

    let mut files = accum.files;
    files.sort_by(|a, b| a.name().cmp(b.name()));
    children.extend(files.into_iter().map(|file| TreeNode::File(FileNode { file })));

    let mut folder = FolderNode {
        name,
        path,
        children,
        file_count: 0,
        additions: 0,
        deletions: 0,
        is_compressed: false,
    };

    // Collapse a chain of single-folder-child, no-direct-file folders into
    // one node. Materialization is depth-first, so the only child is already
    // fully collapsed; one merge step absorbs the whole chain.
    if !is_root {
        while folder.children.len() == 1 && folder.children[0].is_folder() {
            let TreeNode::Folder(child) = folder.children.remove(0) else {
                unreachable!()
            };
            folder.name = format!("{}/{}", folder.name, child.name);
            folder.path = child.path;
            folder.children = child.children;
            folder.is_compressed = true;
        }
    }

    sort_children(&mut folder.children);

    for child in &folder.children {
        match child {
            TreeNode::Folder(sub) => {
                folder.file_count += sub.file_count;
                folder.additions += sub.additions;
                folder.deletions += sub.deletions;
            }
            TreeNode::File(leaf) => {
                folder.file_count += 1;
                folder.additions += leaf.file.additions;
                folder.deletions += leaf.file.deletions;
            }
        }
    }

    folder
}

/// Folders before files, each group alphabetical by display name.
/// The sort is stable, so equal names keep their input order.
fn sort_children(children: &mut [TreeNode]) {
    children.sort_by(|a, b| {
        b.is_folder()
            .cmp(&a.is_folder())
            .then_with(|| a.name().cmp(b.name()))
    });
}

/// Flattened file paths in rendered order: depth-first pre-order over the
/// sorted tree. Must match the visual order exactly or arrow-key traversal
/// in the diff viewer skips files.
pub fn visual_file_order(root: &FolderNode) -> Vec<String> {
    let mut order = Vec::with_capacity(root.file_count);
    collect_paths(root, &mut order);
    order
}

fn collect_paths(folder: &FolderNode, out: &mut Vec<String>) {
    for child in &folder.children {
        match child {
            TreeNode::Folder(sub) => collect_paths(sub, out),
            TreeNode::File(leaf) => out.push(leaf.file.path.clone()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavDirection {
    Up,
    Down,
}

/// Arrow-key target within a visual order: step from `current`, clamped at
/// both ends (no wraparound). With no file open, lands on the first file.
pub fn step_selection(order: &[String], current: Option<&str>, dir: NavDirection) -> Option<String> {
    if order.is_empty() {
        return None;
    }
    let index = match current.and_then(|path| order.iter().position(|p| p == path)) {
        None => 0,
        Some(i) => match dir {
            NavDirection::Up => i.saturating_sub(1),
            NavDirection::Down => (i + 1).min(order.len() - 1),
        },
    };
    Some(order[index].clone())
}
