//! Session-scoped changed-file tracking for multi-agent development tools.
//!
//! The core is [`loader::DiffLoader`]: a per-scope cache of changed-file
//! lists with deduplicated asynchronous loads, token-gated result
//! application, push-event reconciliation, and a polling fallback when the
//! file watcher cannot start. [`tree::build_folder_tree`] derives the
//! folder/file tree a viewer renders, and [`tree::visual_file_order`] the
//! flattened order its keyboard navigation walks.

pub mod client;
pub mod config;
pub mod events;
pub mod git;
pub mod loader;
pub mod model;
pub mod scope;
pub mod tree;
pub mod watch;
