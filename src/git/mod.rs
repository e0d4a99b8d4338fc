pub mod changes;

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::mpsc;

use glob::Pattern;

use crate::client::{QueryClient, QueryError};
use crate::config::DsConfig;
use crate::model::{ChangeType, ChangedFile};
use crate::scope::ScopeKey;
use crate::watch::{FileWatcher, WatchEvent};

use changes::{merge_changed_files, parse_name_status, parse_numstat};

/// A git worktree entry
#[derive(Debug, Clone, PartialEq)]
pub struct Worktree {
    pub path: String,
    pub branch: String,
}

/// Run a git command in `root` and return trimmed stdout, with failures
/// classified into missing-vs-transient.
fn run_git(root: &Path, args: &[&str]) -> Result<String, QueryError> {
    let output = Command::new("git")
        .args(args)
        .current_dir(root)
        .output()
        .map_err(|e| QueryError::classify(format!("failed to run git: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(QueryError::classify(format!(
            "git {} failed: {}",
            args.first().copied().unwrap_or(""),
            stderr.trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Parse `git worktree list --porcelain` output.
fn parse_worktrees(raw: &str) -> Vec<Worktree> {
    let mut worktrees = Vec::new();
    let mut current_path = String::new();
    let mut current_branch = String::new();

    let mut flush = |path: &mut String, branch: &mut String, out: &mut Vec<Worktree>| {
        if !path.is_empty() {
            out.push(Worktree {
                path: std::mem::take(path),
                branch: if branch.is_empty() {
                    "(detached)".to_string()
                } else {
                    std::mem::take(branch)
                },
            });
        }
        branch.clear();
    };

    for line in raw.lines() {
        if let Some(path) = line.strip_prefix("worktree ") {
            flush(&mut current_path, &mut current_branch, &mut worktrees);
            current_path = path.to_string();
        } else if let Some(branch) = line.strip_prefix("branch refs/heads/") {
            current_branch = branch.to_string();
        } else if line == "detached" {
            current_branch = "(detached)".to_string();
        }
    }
    flush(&mut current_path, &mut current_branch, &mut worktrees);
    worktrees
}

/// Git-CLI realization of the backend the loader talks to.
///
/// Sessions are git worktrees of the project repository, matched by branch
/// name or directory name; the orchestrator scope is the project root's own
/// working directory. Watchers are registered per scope key and torn down
/// on stop (idempotently).
pub struct GitBackend {
    project_root: PathBuf,
    base_override: Option<String>,
    debounce_ms: u64,
    ignore: Vec<Pattern>,
    watch_tx: mpsc::Sender<WatchEvent>,
    watchers: RefCell<HashMap<String, FileWatcher>>,
}

impl GitBackend {
    pub fn new(
        project_root: PathBuf,
        config: &DsConfig,
        watch_tx: mpsc::Sender<WatchEvent>,
    ) -> GitBackend {
        GitBackend {
            project_root,
            base_override: config.base_branch.clone(),
            debounce_ms: config.watch.debounce_ms,
            ignore: config.ignore_patterns(),
            watch_tx,
            watchers: RefCell::new(HashMap::new()),
        }
    }

    /// Resolve a scope to the directory its diff is computed in.
    fn worktree_root(&self, scope: &ScopeKey) -> Result<PathBuf, QueryError> {
        let root = match scope {
            ScopeKey::Orchestrator => self.project_root.clone(),
            ScopeKey::Session(name) => {
                let raw = run_git(&self.project_root, &["worktree", "list", "--porcelain"])?;
                let worktrees = parse_worktrees(&raw);
                let found = worktrees.into_iter().find(|w| {
                    w.branch == *name
                        || Path::new(&w.path)
                            .file_name()
                            .is_some_and(|n| n.to_string_lossy() == *name)
                });
                match found {
                    Some(w) => PathBuf::from(w.path),
                    None => {
                        return Err(QueryError::MissingSession(format!(
                            "no worktree for session '{}'",
                            name
                        )))
                    }
                }
            }
            ScopeKey::NoSession => {
                return Err(QueryError::Transient("no scope selected".to_string()))
            }
        };
        if !root.is_dir() {
            return Err(QueryError::MissingSession(format!(
                "worktree directory does not exist: {}",
                root.display()
            )));
        }
        Ok(root)
    }

    /// The commit the diff is taken against: merge base with the base branch
    /// for sessions, HEAD for the orchestrator's working changes.
    fn comparison_base(&self, scope: &ScopeKey, root: &Path) -> Result<String, QueryError> {
        match scope {
            ScopeKey::Session(_) => {
                let base = self.base_branch_in(root)?;
                run_git(root, &["merge-base", &base, "HEAD"])
            }
            _ => Ok("HEAD".to_string()),
        }
    }

    fn base_branch_in(&self, root: &Path) -> Result<String, QueryError> {
        if let Some(base) = &self.base_override {
            return Ok(base.clone());
        }
        Ok(detect_base_branch(root))
    }

    /// Untracked files reported as additions, with line counts read from
    /// the working tree.
    fn untracked_files(&self, root: &Path) -> Result<Vec<ChangedFile>, QueryError> {
        let raw = run_git(root, &["ls-files", "--others", "--exclude-standard"])?;
        Ok(raw
            .lines()
            .filter(|l| !l.is_empty())
            .map(|path| {
                let (additions, is_binary) = match std::fs::read(root.join(path)) {
                    Ok(bytes) => match String::from_utf8(bytes) {
                        Ok(text) => (text.lines().count() as u64, None),
                        Err(_) => (0, Some(true)),
                    },
                    Err(_) => (0, None),
                };
                ChangedFile {
                    path: path.to_string(),
                    change_type: ChangeType::Added,
                    additions,
                    deletions: 0,
                    changes: None,
                    is_binary,
                }
            })
            .collect())
    }
}

/// Auto-detect the base branch: upstream tracking first, then common local
/// names, then remote-tracking branches, defaulting to main.
fn detect_base_branch(root: &Path) -> String {
    let run = |args: &[&str]| run_git(root, args).ok();

    let current = run(&["rev-parse", "--abbrev-ref", "HEAD"]).unwrap_or_default();

    if let Some(upstream) = run(&["rev-parse", "--abbrev-ref", "@{upstream}"]) {
        if let Some(branch) = upstream.split('/').next_back() {
            if branch != current && !branch.is_empty() {
                if run(&["rev-parse", "--verify", branch]).is_some() {
                    return branch.to_string();
                }
                if run(&["rev-parse", "--verify", &upstream]).is_some() {
                    return upstream;
                }
            }
        }
    }

    for candidate in &["main", "master", "develop", "dev"] {
        if *candidate != current && run(&["rev-parse", "--verify", candidate]).is_some() {
            return candidate.to_string();
        }
    }

    for candidate in &["origin/main", "origin/master", "origin/develop"] {
        if run(&["rev-parse", "--verify", candidate]).is_some() {
            return candidate.to_string();
        }
    }

    "main".to_string()
}

impl QueryClient for GitBackend {
    fn changed_files(&self, scope: &ScopeKey) -> Result<Vec<ChangedFile>, QueryError> {
        let root = self.worktree_root(scope)?;
        let base = self.comparison_base(scope, &root)?;

        let numstat = run_git(&root, &["diff", "--numstat", "--find-renames", &base])?;
        let name_status = run_git(&root, &["diff", "--name-status", "--find-renames", &base])?;
        let mut files =
            merge_changed_files(parse_numstat(&numstat), parse_name_status(&name_status));
        files.extend(self.untracked_files(&root)?);
        Ok(files)
    }

    fn current_branch(&self, scope: &ScopeKey) -> Result<String, QueryError> {
        let root = self.worktree_root(scope)?;
        run_git(&root, &["rev-parse", "--abbrev-ref", "HEAD"])
    }

    fn base_branch(&self, scope: &ScopeKey) -> Result<String, QueryError> {
        let root = self.worktree_root(scope)?;
        self.base_branch_in(&root)
    }

    fn commit_comparison(&self, scope: &ScopeKey) -> Result<(String, String), QueryError> {
        let root = self.worktree_root(scope)?;
        let base_ref = self.comparison_base(scope, &root)?;
        let base = run_git(&root, &["rev-parse", &base_ref])?;
        let head = run_git(&root, &["rev-parse", "HEAD"])?;
        Ok((base, head))
    }

    fn start_file_watcher(&self, scope: &ScopeKey) -> Result<(), QueryError> {
        let root = self.worktree_root(scope)?;
        let watcher = FileWatcher::new(
            &root,
            scope.clone(),
            self.debounce_ms,
            self.ignore.clone(),
            self.watch_tx.clone(),
        )
        .map_err(|e| QueryError::classify(format!("watcher start failed: {}", e)))?;
        // Replacing an existing watcher drops (and stops) the old one
        self.watchers.borrow_mut().insert(scope.as_key(), watcher);
        Ok(())
    }

    fn stop_file_watcher(&self, scope: &ScopeKey) -> Result<(), QueryError> {
        self.watchers.borrow_mut().remove(&scope.as_key());
        Ok(())
    }

    fn reset_session_worktree(&self, scope: &ScopeKey) -> Result<(), QueryError> {
        let root = self.worktree_root(scope)?;
        run_git(&root, &["reset", "--hard"])?;
        run_git(&root, &["clean", "-fd"])?;
        Ok(())
    }

    fn discard_file(&self, scope: &ScopeKey, path: &str) -> Result<(), QueryError> {
        let root = self.worktree_root(scope)?;
        match run_git(&root, &["checkout", "--", path]) {
            Ok(_) => Ok(()),
            // Untracked files have nothing to check out; remove them instead
            Err(QueryError::Transient(msg)) if msg.contains("did not match any file") => {
                std::fs::remove_file(root.join(path))
                    .map_err(|e| QueryError::classify(format!("discard failed: {}", e)))?;
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}
