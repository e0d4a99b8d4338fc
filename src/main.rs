use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::Command;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use diffscope::client::{fetch_scope, QueryClient, QueryError};
use diffscope::config::{load_config, DsConfig};
use diffscope::events::FileChangesEvent;
use diffscope::git::GitBackend;
use diffscope::loader::{DiffLoader, DiffView, LoadTicket, ScopeStatus};
use diffscope::model::LoadedDiff;
use diffscope::scope::ScopeKey;
use diffscope::tree::{build_folder_tree, FolderNode, TreeNode};
use diffscope::watch::WatchEvent;

/// Track changed files for a session worktree or the project working directory
#[derive(Parser)]
#[command(name = "dfs", version, about)]
struct Cli {
    /// Project path (defaults to current directory)
    path: Option<String>,

    /// Track a named session worktree instead of the working directory
    #[arg(long)]
    session: Option<String>,

    /// Override base-branch auto-detection
    #[arg(long)]
    base: Option<String>,

    /// Keep running and reprint on live changes
    #[arg(long)]
    watch: bool,

    /// Print the file list as JSON instead of a tree
    #[arg(long)]
    json: bool,

    /// Discard changes to one file before loading
    #[arg(long)]
    discard: Option<String>,

    /// Reset the session worktree before loading
    #[arg(long)]
    reset: bool,
}

/// Work handed to the fetch thread.
enum FetchRequest {
    /// A loader-issued ticket; completes via `complete_load`.
    Load(LoadTicket),
    /// A watcher fired: compute a fresh list and deliver it as a push event.
    Live(ScopeKey),
}

enum FetchReply {
    Loaded(LoadTicket, Result<LoadedDiff, QueryError>),
    Live(FileChangesEvent),
    LiveFailed(ScopeKey, QueryError),
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let start_dir = cli.path.clone().unwrap_or_else(|| ".".to_string());
    let project_root = repo_root(&start_dir)?;

    let mut config = load_config(&project_root.to_string_lossy());
    if cli.base.is_some() {
        config.base_branch = cli.base.clone();
    }

    let scope = match &cli.session {
        Some(name) => ScopeKey::Session(name.clone()),
        None => ScopeKey::Orchestrator,
    };

    // Watch events from the backend's per-scope watchers
    let (watch_tx, watch_rx) = mpsc::channel::<WatchEvent>();

    // Fetch thread: performs the actual backend round trips so the driver
    // loop never blocks on git
    let (req_tx, req_rx) = mpsc::channel::<FetchRequest>();
    let (reply_tx, reply_rx) = mpsc::channel::<FetchReply>();
    spawn_fetch_thread(
        project_root.clone(),
        &config,
        watch_tx.clone(),
        req_rx,
        reply_tx,
    );

    let backend = GitBackend::new(project_root, &config, watch_tx);
    apply_intents(&cli, &backend, &scope)?;

    let mut loader = DiffLoader::new(backend);
    loader.set_poll_intervals(
        Duration::from_secs(config.poll.session_secs),
        Duration::from_secs(config.poll.orchestrator_secs),
    );

    let dispatch = |ticket: Option<LoadTicket>| {
        if let Some(ticket) = ticket {
            let _ = req_tx.send(FetchRequest::Load(ticket));
        }
    };

    dispatch(loader.switch_scope(scope, Instant::now()));

    loop {
        let mut dirty = false;

        match reply_rx.recv_timeout(Duration::from_millis(100)) {
            Ok(FetchReply::Loaded(ticket, result)) => {
                dispatch(loader.complete_load(&ticket, result));
                dirty = true;
            }
            Ok(FetchReply::Live(event)) => {
                loader.apply_live_update(&event);
                dirty = true;
            }
            Ok(FetchReply::LiveFailed(scope, err)) if err.is_missing() => {
                loader.teardown_scope(&scope);
                dirty = true;
            }
            Ok(FetchReply::LiveFailed(scope, err)) => {
                log::warn!("live refresh failed for {}: {}", scope, err);
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }

        // Watcher fired: request a push-style refresh for that scope
        while let Ok(WatchEvent::FilesChanged { scope, .. }) = watch_rx.try_recv() {
            let _ = req_tx.send(FetchRequest::Live(scope));
        }

        dispatch(loader.poll_due(Instant::now()));

        let view = loader.view();
        if cli.watch {
            if dirty {
                render(&view, cli.json)?;
            }
        } else if !view.is_loading && view.status != ScopeStatus::Waiting {
            render(&view, cli.json)?;
            break;
        }
    }

    Ok(())
}

/// Resolve the repository root the way git sees it.
fn repo_root(dir: &str) -> Result<PathBuf> {
    let output = Command::new("git")
        .args(["rev-parse", "--show-toplevel"])
        .current_dir(dir)
        .output()
        .context(format!("Failed to run git in '{}'", dir))?;
    if !output.status.success() {
        anyhow::bail!("Not a git repository: {}", dir);
    }
    Ok(PathBuf::from(
        String::from_utf8_lossy(&output.stdout).trim(),
    ))
}

fn spawn_fetch_thread(
    project_root: PathBuf,
    config: &DsConfig,
    watch_tx: mpsc::Sender<WatchEvent>,
    req_rx: mpsc::Receiver<FetchRequest>,
    reply_tx: mpsc::Sender<FetchReply>,
) {
    let config = config.clone();
    thread::spawn(move || {
        // This backend instance only answers queries; its watcher registry
        // stays empty (watchers live on the loader's backend)
        let backend = GitBackend::new(project_root, &config, watch_tx);
        for request in req_rx {
            let reply = match request {
                FetchRequest::Load(ticket) => {
                    let result = fetch_scope(&backend, &ticket.scope);
                    FetchReply::Loaded(ticket, result)
                }
                FetchRequest::Live(scope) => match fetch_scope(&backend, &scope) {
                    Ok(diff) => FetchReply::Live(FileChangesEvent {
                        scope: scope.as_key(),
                        changed_files: diff.files,
                        branch_info: diff.branch_info,
                    }),
                    Err(err) => FetchReply::LiveFailed(scope, err),
                },
            };
            if reply_tx.send(reply).is_err() {
                return;
            }
        }
    });
}

/// One-off mutating intents; the normal load afterwards reflects the result.
fn apply_intents(cli: &Cli, backend: &GitBackend, scope: &ScopeKey) -> Result<()> {
    if cli.reset {
        backend
            .reset_session_worktree(scope)
            .context("reset failed")?;
    }
    if let Some(path) = &cli.discard {
        backend
            .discard_file(scope, path)
            .context(format!("discard failed for '{}'", path))?;
    }
    Ok(())
}

fn render(view: &DiffView<'_>, json: bool) -> Result<()> {
    match view.status {
        ScopeStatus::Missing => {
            println!("session not available");
            return Ok(());
        }
        ScopeStatus::Waiting => {
            println!("loading…");
            return Ok(());
        }
        ScopeStatus::Ready => {}
    }

    if json {
        println!("{}", serde_json::to_string_pretty(view.files)?);
        return Ok(());
    }

    if let Some(info) = view.branch_info {
        println!(
            "{} ← {} ({}..{})",
            info.current_branch,
            info.base_branch,
            short(&info.base_commit),
            short(&info.head_commit)
        );
    }

    let root = build_folder_tree(view.files);
    if root.file_count == 0 {
        println!("no changes");
        return Ok(());
    }
    print_folder(&root, 0);
    println!(
        "{} files, +{} -{}",
        root.file_count, root.additions, root.deletions
    );
    Ok(())
}

fn print_folder(folder: &FolderNode, depth: usize) {
    for child in &folder.children {
        let indent = "  ".repeat(depth);
        match child {
            TreeNode::Folder(sub) => {
                println!(
                    "{}{}/ (+{} -{})",
                    indent, sub.name, sub.additions, sub.deletions
                );
                print_folder(sub, depth + 1);
            }
            TreeNode::File(leaf) => {
                let binary = if leaf.file.is_binary() { " [bin]" } else { "" };
                println!(
                    "{}{} {} (+{} -{}){}",
                    indent,
                    leaf.file.change_type.symbol(),
                    leaf.file.name(),
                    leaf.file.additions,
                    leaf.file.deletions,
                    binary
                );
            }
        }
    }
}

fn short(commit: &str) -> &str {
    &commit[..commit.len().min(7)]
}
