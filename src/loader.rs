use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use crate::client::{QueryClient, QueryError};
use crate::events::FileChangesEvent;
use crate::model::{BranchInfo, ChangedFile, LoadedDiff};
use crate::scope::ScopeKey;

/// A dispatched load: the driver performs the actual backend fetch and hands
/// the result back via [`DiffLoader::complete_load`]. The token is the
/// cooperative-cancellation guard — a superseded ticket's result is dropped
/// at apply time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadTicket {
    pub scope: ScopeKey,
    pub token: u64,
}

/// What the rendering layer should show for the active scope.
///
/// `Ready` with zero files means "no changes"; `Missing` means the backing
/// session no longer exists. These are semantically different states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeStatus {
    Ready,
    Waiting,
    Missing,
}

/// Read-only snapshot handed to the rendering layer.
#[derive(Debug)]
pub struct DiffView<'a> {
    pub files: &'a [ChangedFile],
    pub branch_info: Option<&'a BranchInfo>,
    pub is_loading: bool,
    pub status: ScopeStatus,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    files: Vec<ChangedFile>,
    branch_info: Option<BranchInfo>,
    signature: String,
}

impl CacheEntry {
    fn from_diff(diff: LoadedDiff) -> CacheEntry {
        let signature = diff.signature();
        CacheEntry {
            files: diff.files,
            branch_info: diff.branch_info,
            signature,
        }
    }
}

/// Live-update delivery state for the active scope. Watcher start is
/// attempted on entering the scope; a non-missing failure degrades to
/// polling, and a push event while polling proves the channel works.
#[derive(Debug, Clone, PartialEq, Eq)]
enum WatchState {
    Unwatched,
    WatcherActive,
    Polling { next_due: Instant, every: Duration },
}

/// UI-visible state for the active scope. Only ever written through the
/// apply-if-still-active gate.
#[derive(Debug, Default)]
struct Visible {
    files: Vec<ChangedFile>,
    branch_info: Option<BranchInfo>,
    signature: Option<String>,
}

/// Session-scoped diff cache and loader.
///
/// Owns the per-scope cache map and is its only writer. Loads are
/// deduplicated per scope with trailing-edge coalescing, results are gated
/// by a monotonic token per scope, and the visible state is only written
/// when the result's scope is still the active one — so rapid scope
/// switching never flashes another scope's stale data.
pub struct DiffLoader<C: QueryClient> {
    client: C,
    active: ScopeKey,
    /// Keyed by `ScopeKey::as_key`.
    cache: HashMap<String, CacheEntry>,
    /// Latest issued token per scope; a completion with any other token is
    /// a no-op.
    inflight: HashMap<String, u64>,
    /// Scopes that asked for a reload while one was already in flight.
    reload_requested: HashSet<String>,
    /// Scopes whose backing session/worktree is permanently gone.
    missing: HashSet<String>,
    next_token: u64,
    watch: WatchState,
    visible: Visible,
    status: ScopeStatus,
    session_poll: Duration,
    orchestrator_poll: Duration,
}

impl<C: QueryClient> DiffLoader<C> {
    pub fn new(client: C) -> DiffLoader<C> {
        DiffLoader {
            client,
            active: ScopeKey::NoSession,
            cache: HashMap::new(),
            inflight: HashMap::new(),
            reload_requested: HashSet::new(),
            missing: HashSet::new(),
            next_token: 0,
            watch: WatchState::Unwatched,
            visible: Visible::default(),
            status: ScopeStatus::Ready,
            session_poll: Duration::from_secs(3),
            orchestrator_poll: Duration::from_secs(5),
        }
    }

    /// Override the default 3s/5s polling-fallback intervals.
    pub fn set_poll_intervals(&mut self, session: Duration, orchestrator: Duration) {
        self.session_poll = session;
        self.orchestrator_poll = orchestrator;
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn active_scope(&self) -> &ScopeKey {
        &self.active
    }

    pub fn view(&self) -> DiffView<'_> {
        DiffView {
            files: &self.visible.files,
            branch_info: self.visible.branch_info.as_ref(),
            is_loading: self.inflight.contains_key(&self.active.as_key()),
            status: self.status,
        }
    }

    /// Change the active scope. Cached data for the new scope is applied to
    /// the visible state synchronously, before any backend round trip; a
    /// load is enqueued only on a cache miss. Any load still in flight for
    /// the old scope is left to finish — its result will land in the cache
    /// but not in the visible state.
    pub fn switch_scope(&mut self, scope: ScopeKey, now: Instant) -> Option<LoadTicket> {
        if scope == self.active {
            return None;
        }
        self.stop_watch();
        self.active = scope;

        if !self.active.is_loadable() {
            self.clear_visible(ScopeStatus::Ready);
            return None;
        }

        let key = self.active.as_key();
        if self.missing.contains(&key) {
            self.clear_visible(ScopeStatus::Missing);
            return None;
        }

        let cached = self.cache.get(&key).cloned();
        let cache_hit = match cached {
            Some(entry) => {
                self.apply_entry(entry);
                true
            }
            None => {
                self.clear_visible(ScopeStatus::Waiting);
                false
            }
        };

        if !self.begin_watch(now) {
            // Watcher start classified the scope as missing
            return None;
        }
        if cache_hit {
            None
        } else {
            self.begin_load(self.active.clone(), false)
        }
    }

    /// Reload the active scope, deduplicated against any in-flight load.
    pub fn reload(&mut self) -> Option<LoadTicket> {
        self.begin_load(self.active.clone(), false)
    }

    /// Issue a load ticket for a scope, or coalesce onto an in-flight one.
    ///
    /// With `force` false, a second call while a load is in flight marks a
    /// pending reload and returns None: exactly one backend round trip runs
    /// at a time per scope, plus at most one trailing follow-up.
    pub fn begin_load(&mut self, scope: ScopeKey, force: bool) -> Option<LoadTicket> {
        if !scope.is_loadable() {
            return None;
        }
        let key = scope.as_key();
        if self.missing.contains(&key) {
            return None;
        }
        if self.inflight.contains_key(&key) && !force {
            self.reload_requested.insert(key);
            return None;
        }
        let token = self.next_token;
        self.next_token += 1;
        self.inflight.insert(key, token);
        Some(LoadTicket { scope, token })
    }

    /// Apply a finished load. Returns the trailing reload ticket when one
    /// was requested mid-flight.
    ///
    /// The token check happens here, at apply time: a result for anything
    /// but the latest token issued for its scope is discarded entirely, and
    /// "is this scope still active" is re-read now rather than captured at
    /// dispatch time.
    pub fn complete_load(
        &mut self,
        ticket: &LoadTicket,
        result: Result<LoadedDiff, QueryError>,
    ) -> Option<LoadTicket> {
        let key = ticket.scope.as_key();
        if self.inflight.get(&key) != Some(&ticket.token) {
            // Superseded by a newer load for the same scope
            return None;
        }
        self.inflight.remove(&key);

        match result {
            Ok(diff) => {
                let entry = CacheEntry::from_diff(diff);
                let unchanged = self
                    .cache
                    .get(&key)
                    .is_some_and(|cached| cached.signature == entry.signature);
                if !unchanged {
                    self.cache.insert(key.clone(), entry.clone());
                }
                if self.active.as_key() == key {
                    self.apply_entry(entry);
                }
                if self.reload_requested.remove(&key) {
                    return self.begin_load(ticket.scope.clone(), false);
                }
                None
            }
            Err(err) if err.is_missing() => {
                log::warn!("scope {} is gone: {}", ticket.scope, err);
                self.mark_missing(&ticket.scope);
                None
            }
            Err(err) => {
                log::warn!("load failed for {}: {}", ticket.scope, err);
                // Clear the cache so the next switch retries; other scopes
                // are untouched.
                self.cache.remove(&key);
                self.reload_requested.remove(&key);
                if self.active.as_key() == key {
                    self.clear_visible(ScopeStatus::Ready);
                }
                None
            }
        }
    }

    /// Reconcile a push notification. The cache is always warmed; the
    /// visible state is updated only when the event's scope is the active
    /// one and the content signature actually changed.
    pub fn apply_live_update(&mut self, event: &FileChangesEvent) {
        let scope = event.scope_key();
        if !scope.is_loadable() {
            return;
        }
        let key = scope.as_key();
        if self.missing.contains(&key) {
            // Missing is terminal; a stray event for a torn-down session
            // does not resurrect it.
            log::debug!("ignoring live update for missing scope {}", scope);
            return;
        }

        let entry = CacheEntry::from_diff(LoadedDiff {
            files: event.changed_files.clone(),
            branch_info: event.branch_info.clone(),
        });
        let signature = entry.signature.clone();
        self.cache.insert(key.clone(), entry.clone());

        if self.active.as_key() != key {
            return;
        }
        // A delivered push event proves the channel works; stop polling.
        if matches!(self.watch, WatchState::Polling { .. }) {
            self.watch = WatchState::WatcherActive;
        }
        if self.visible.signature.as_deref() != Some(signature.as_str()) {
            self.apply_entry(entry);
        } else {
            self.status = ScopeStatus::Ready;
        }
    }

    /// A session was cancelled/removed server-side: stop watching it, drop
    /// its cache entry, and keep it marked missing so nothing retries.
    pub fn teardown_scope(&mut self, scope: &ScopeKey) {
        self.mark_missing(scope);
    }

    /// Project switch completed: scope keys are not unique across projects,
    /// so every cache entry, missing mark, and in-flight token is invalid.
    /// Reloads the active scope from scratch.
    pub fn project_switched(&mut self, now: Instant) -> Option<LoadTicket> {
        self.cache.clear();
        self.missing.clear();
        self.inflight.clear();
        self.reload_requested.clear();
        self.stop_watch();

        if !self.active.is_loadable() {
            self.clear_visible(ScopeStatus::Ready);
            return None;
        }
        self.clear_visible(ScopeStatus::Waiting);
        if !self.begin_watch(now) {
            return None;
        }
        self.begin_load(self.active.clone(), false)
    }

    /// Poll tick for the active scope. Returns a load ticket when the scope
    /// is in polling fallback and its interval has elapsed.
    pub fn poll_due(&mut self, now: Instant) -> Option<LoadTicket> {
        let WatchState::Polling { next_due, every } = self.watch else {
            return None;
        };
        if now < next_due {
            return None;
        }
        self.watch = WatchState::Polling {
            next_due: now + every,
            every,
        };
        self.begin_load(self.active.clone(), false)
    }

    /// Next instant at which `poll_due` could fire, for event-loop timeouts.
    pub fn next_poll_at(&self) -> Option<Instant> {
        match self.watch {
            WatchState::Polling { next_due, .. } => Some(next_due),
            _ => None,
        }
    }

    // ── internals ──

    /// Try to start the backend watcher for the active scope. Non-missing
    /// failure degrades to polling. Returns false when the attempt
    /// classified the scope as missing.
    fn begin_watch(&mut self, now: Instant) -> bool {
        match self.client.start_file_watcher(&self.active) {
            Ok(()) => {
                self.watch = WatchState::WatcherActive;
                true
            }
            Err(err) if err.is_missing() => {
                log::warn!("watcher start: scope {} is gone: {}", self.active, err);
                let scope = self.active.clone();
                self.mark_missing(&scope);
                false
            }
            Err(err) => {
                let every = match &self.active {
                    ScopeKey::Session(_) => self.session_poll,
                    _ => self.orchestrator_poll,
                };
                log::warn!(
                    "watcher unavailable for {} ({}), polling every {:?}",
                    self.active,
                    err,
                    every
                );
                self.watch = WatchState::Polling {
                    next_due: now + every,
                    every,
                };
                true
            }
        }
    }

    /// Stop the watcher/poll timer for the active scope. Mandatory on every
    /// switch away; errors are logged, never thrown.
    fn stop_watch(&mut self) {
        if self.watch != WatchState::Unwatched {
            if let Err(err) = self.client.stop_file_watcher(&self.active) {
                log::warn!("failed to stop watcher for {}: {}", self.active, err);
            }
        }
        self.watch = WatchState::Unwatched;
    }

    fn mark_missing(&mut self, scope: &ScopeKey) {
        let key = scope.as_key();
        self.cache.remove(&key);
        self.inflight.remove(&key);
        self.reload_requested.remove(&key);
        self.missing.insert(key.clone());
        if self.active.as_key() == key {
            self.stop_watch();
            self.clear_visible(ScopeStatus::Missing);
        }
    }

    fn apply_entry(&mut self, entry: CacheEntry) {
        self.visible = Visible {
            files: entry.files,
            branch_info: entry.branch_info,
            signature: Some(entry.signature),
        };
        self.status = ScopeStatus::Ready;
    }

    fn clear_visible(&mut self, status: ScopeStatus) {
        self.visible = Visible::default();
        self.status = status;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ChangeType;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Recording mock backend. Watcher starts can be forced to fail, and
    /// individual queries can be primed with errors.
    #[derive(Default)]
    struct MockState {
        fetch_calls: Vec<String>,
        watch_starts: Vec<String>,
        watch_stops: Vec<String>,
        watcher_error: Option<QueryError>,
    }

    #[derive(Clone, Default)]
    struct MockClient {
        state: Rc<RefCell<MockState>>,
    }

    impl MockClient {
        fn fetch_count(&self, scope: &ScopeKey) -> usize {
            let key = scope.as_key();
            self.state
                .borrow()
                .fetch_calls
                .iter()
                .filter(|k| **k == key)
                .count()
        }
    }

    impl QueryClient for MockClient {
        fn changed_files(&self, scope: &ScopeKey) -> Result<Vec<ChangedFile>, QueryError> {
            self.state.borrow_mut().fetch_calls.push(scope.as_key());
            Ok(Vec::new())
        }
        fn current_branch(&self, _scope: &ScopeKey) -> Result<String, QueryError> {
            Ok("feature".to_string())
        }
        fn base_branch(&self, _scope: &ScopeKey) -> Result<String, QueryError> {
            Ok("main".to_string())
        }
        fn commit_comparison(&self, _scope: &ScopeKey) -> Result<(String, String), QueryError> {
            Ok(("base".to_string(), "head".to_string()))
        }
        fn start_file_watcher(&self, scope: &ScopeKey) -> Result<(), QueryError> {
            let mut state = self.state.borrow_mut();
            state.watch_starts.push(scope.as_key());
            match &state.watcher_error {
                Some(err) => Err(err.clone()),
                None => Ok(()),
            }
        }
        fn stop_file_watcher(&self, scope: &ScopeKey) -> Result<(), QueryError> {
            self.state.borrow_mut().watch_stops.push(scope.as_key());
            Ok(())
        }
        fn reset_session_worktree(&self, _scope: &ScopeKey) -> Result<(), QueryError> {
            Ok(())
        }
        fn discard_file(&self, _scope: &ScopeKey, _path: &str) -> Result<(), QueryError> {
            Ok(())
        }
    }

    fn session(name: &str) -> ScopeKey {
        ScopeKey::Session(name.to_string())
    }

    fn make_file(path: &str, additions: u64) -> ChangedFile {
        ChangedFile {
            path: path.to_string(),
            change_type: ChangeType::Modified,
            additions,
            deletions: 0,
            changes: None,
            is_binary: None,
        }
    }

    fn diff_of(paths: &[&str]) -> LoadedDiff {
        LoadedDiff {
            files: paths.iter().map(|p| make_file(p, 1)).collect(),
            branch_info: None,
        }
    }

    fn loader() -> (DiffLoader<MockClient>, MockClient) {
        let client = MockClient::default();
        (DiffLoader::new(client.clone()), client)
    }

    #[test]
    fn switch_to_uncached_scope_issues_one_load() {
        let (mut loader, _client) = loader();
        let ticket = loader.switch_scope(session("a"), Instant::now());
        let ticket = ticket.expect("cache miss should enqueue a load");
        assert_eq!(ticket.scope, session("a"));
        assert!(loader.view().is_loading);
        assert_eq!(loader.view().status, ScopeStatus::Waiting);

        loader.complete_load(&ticket, Ok(diff_of(&["x.rs"])));
        let view = loader.view();
        assert!(!view.is_loading);
        assert_eq!(view.status, ScopeStatus::Ready);
        assert_eq!(view.files.len(), 1);
    }

    #[test]
    fn cached_scope_applies_synchronously_without_load() {
        let (mut loader, _client) = loader();
        let now = Instant::now();
        let ticket = loader.switch_scope(session("a"), now).unwrap();
        loader.complete_load(&ticket, Ok(diff_of(&["x.rs"])));

        loader.switch_scope(ScopeKey::Orchestrator, now);
        assert!(loader.view().files.is_empty());

        // Back to the cached scope: data is visible immediately, no ticket
        let ticket = loader.switch_scope(session("a"), now);
        assert!(ticket.is_none());
        assert_eq!(loader.view().status, ScopeStatus::Ready);
        assert_eq!(loader.view().files[0].path, "x.rs");
    }

    #[test]
    fn duplicate_load_coalesces_to_single_round_trip() {
        let (mut loader, _client) = loader();
        let first = loader.begin_load(session("a"), false).unwrap();
        assert!(loader.begin_load(session("a"), false).is_none());
        assert!(loader.begin_load(session("a"), false).is_none());

        // Completion triggers exactly one trailing follow-up
        let trailing = loader.complete_load(&first, Ok(diff_of(&[])));
        let trailing = trailing.expect("pending reload should follow");
        assert_eq!(trailing.scope, session("a"));
        assert!(trailing.token > first.token);
        assert!(loader.complete_load(&trailing, Ok(diff_of(&[]))).is_none());
    }

    #[test]
    fn stale_token_result_is_discarded() {
        let (mut loader, _client) = loader();
        let old = loader.begin_load(session("a"), false).unwrap();
        let new = loader.begin_load(session("a"), true).unwrap();
        loader.switch_scope(session("a"), Instant::now());

        // The superseded result must not land anywhere
        assert!(loader
            .complete_load(&old, Ok(diff_of(&["stale.rs"])))
            .is_none());
        assert!(loader.view().files.is_empty());

        loader.complete_load(&new, Ok(diff_of(&["fresh.rs"])));
        assert_eq!(loader.view().files[0].path, "fresh.rs");
    }

    #[test]
    fn switch_away_and_back_still_applies_resolving_load() {
        let (mut loader, _client) = loader();
        let now = Instant::now();
        let ticket_a = loader.switch_scope(session("a"), now).unwrap();
        let ticket_b = loader.switch_scope(session("b"), now).unwrap();
        // Back to A before its load resolves
        assert!(loader.switch_scope(session("a"), now).is_none());

        loader.complete_load(&ticket_a, Ok(diff_of(&["a.rs"])));
        let view = loader.view();
        assert_eq!(view.status, ScopeStatus::Ready);
        assert_eq!(view.files[0].path, "a.rs");

        // B's late resolution warms B's cache but never touches A's view
        loader.complete_load(&ticket_b, Ok(diff_of(&["b.rs"])));
        assert_eq!(loader.view().files[0].path, "a.rs");
        let ticket = loader.switch_scope(session("b"), now);
        assert!(ticket.is_none(), "B should now be served from cache");
        assert_eq!(loader.view().files[0].path, "b.rs");
    }

    #[test]
    fn late_result_for_left_scope_updates_cache_only() {
        let (mut loader, _client) = loader();
        let now = Instant::now();
        let ticket_a = loader.switch_scope(session("a"), now).unwrap();
        let _ticket_b = loader.switch_scope(session("b"), now).unwrap();

        loader.complete_load(&ticket_a, Ok(diff_of(&["a.rs"])));
        // Still looking at B: A's data must not be visible
        assert!(loader.view().files.is_empty());
        assert_eq!(loader.view().status, ScopeStatus::Waiting);
    }

    #[test]
    fn missing_session_is_terminal() {
        let (mut loader, client) = loader();
        let now = Instant::now();
        let ticket = loader.switch_scope(session("gone"), now).unwrap();
        loader.complete_load(
            &ticket,
            Err(QueryError::MissingSession("worktree not found".into())),
        );
        assert_eq!(loader.view().status, ScopeStatus::Missing);

        let starts_before = client.state.borrow().watch_starts.len();
        loader.switch_scope(ScopeKey::Orchestrator, now);
        // Switching back must not re-query or restart a watcher
        assert!(loader.switch_scope(session("gone"), now).is_none());
        assert!(loader.reload().is_none());
        assert_eq!(loader.view().status, ScopeStatus::Missing);
        let starts: Vec<String> = client.state.borrow().watch_starts[starts_before..].to_vec();
        assert!(!starts.contains(&"session:gone".to_string()));
    }

    #[test]
    fn transient_error_clears_cache_and_falls_back_to_empty() {
        let (mut loader, _client) = loader();
        let now = Instant::now();
        let ticket = loader.switch_scope(session("a"), now).unwrap();
        loader.complete_load(&ticket, Ok(diff_of(&["x.rs"])));

        let retry = loader.reload().unwrap();
        loader.complete_load(&retry, Err(QueryError::Transient("git busy".into())));
        let view = loader.view();
        assert_eq!(view.status, ScopeStatus::Ready);
        assert!(view.files.is_empty());

        // Next switch retries from scratch
        loader.switch_scope(ScopeKey::Orchestrator, now);
        assert!(loader.switch_scope(session("a"), now).is_some());
    }

    #[test]
    fn transient_error_leaves_other_scopes_untouched() {
        let (mut loader, _client) = loader();
        let now = Instant::now();
        let ticket_a = loader.switch_scope(session("a"), now).unwrap();
        loader.complete_load(&ticket_a, Ok(diff_of(&["a.rs"])));

        let ticket_b = loader.switch_scope(session("b"), now).unwrap();
        loader.complete_load(&ticket_b, Err(QueryError::Transient("boom".into())));

        assert!(loader.switch_scope(session("a"), now).is_none());
        assert_eq!(loader.view().files[0].path, "a.rs");
    }

    #[test]
    fn live_update_for_active_scope_applies_and_warms_cache() {
        let (mut loader, _client) = loader();
        let now = Instant::now();
        let ticket = loader.switch_scope(session("a"), now).unwrap();
        loader.complete_load(&ticket, Ok(diff_of(&[])));

        loader.apply_live_update(&FileChangesEvent {
            scope: "session:a".to_string(),
            changed_files: vec![make_file("pushed.rs", 2)],
            branch_info: None,
        });
        assert_eq!(loader.view().files[0].path, "pushed.rs");
    }

    #[test]
    fn live_update_for_inactive_scope_warms_cache_only() {
        let (mut loader, _client) = loader();
        let now = Instant::now();
        let ticket = loader.switch_scope(session("a"), now).unwrap();
        loader.complete_load(&ticket, Ok(diff_of(&["a.rs"])));

        loader.apply_live_update(&FileChangesEvent {
            scope: "session:b".to_string(),
            changed_files: vec![make_file("b.rs", 1)],
            branch_info: None,
        });
        assert_eq!(loader.view().files[0].path, "a.rs");

        // The warmed cache serves B without a load
        assert!(loader.switch_scope(session("b"), now).is_none());
        assert_eq!(loader.view().files[0].path, "b.rs");
    }

    #[test]
    fn unchanged_signature_skips_visible_update() {
        let (mut loader, _client) = loader();
        let now = Instant::now();
        let ticket = loader.switch_scope(session("a"), now).unwrap();
        loader.complete_load(&ticket, Ok(diff_of(&["same.rs"])));
        let before = loader.view().files.as_ptr();

        loader.apply_live_update(&FileChangesEvent {
            scope: "session:a".to_string(),
            changed_files: vec![make_file("same.rs", 1)],
            branch_info: None,
        });
        // Same signature: the visible Vec was not replaced
        assert_eq!(loader.view().files.as_ptr(), before);
    }

    #[test]
    fn watcher_failure_degrades_to_polling() {
        let (mut loader, client) = loader();
        client.state.borrow_mut().watcher_error =
            Some(QueryError::Transient("inotify limit".into()));
        let now = Instant::now();
        let first = loader.switch_scope(session("a"), now).unwrap();
        loader.complete_load(&first, Ok(diff_of(&[])));

        // Not due yet
        assert!(loader.poll_due(now).is_none());
        let due = loader.next_poll_at().expect("polling should be scheduled");
        assert_eq!(due, now + Duration::from_secs(3));

        let tick = loader.poll_due(due).expect("interval elapsed");
        assert_eq!(tick.scope, session("a"));
        // And the timer re-arms
        assert_eq!(loader.next_poll_at(), Some(due + Duration::from_secs(3)));
    }

    #[test]
    fn live_update_cancels_polling() {
        let (mut loader, client) = loader();
        client.state.borrow_mut().watcher_error = Some(QueryError::Transient("no inotify".into()));
        let now = Instant::now();
        let ticket = loader.switch_scope(session("a"), now).unwrap();
        loader.complete_load(&ticket, Ok(diff_of(&[])));
        assert!(loader.next_poll_at().is_some());

        loader.apply_live_update(&FileChangesEvent {
            scope: "session:a".to_string(),
            changed_files: vec![make_file("x.rs", 1)],
            branch_info: None,
        });
        assert!(loader.next_poll_at().is_none());
    }

    #[test]
    fn watcher_missing_error_marks_scope_missing() {
        let (mut loader, client) = loader();
        client.state.borrow_mut().watcher_error =
            Some(QueryError::MissingSession("worktree not found".into()));
        let ticket = loader.switch_scope(session("gone"), Instant::now());
        assert!(ticket.is_none());
        assert_eq!(loader.view().status, ScopeStatus::Missing);
        assert!(loader.next_poll_at().is_none());
    }

    #[test]
    fn switch_away_stops_watcher() {
        let (mut loader, client) = loader();
        let now = Instant::now();
        let _ = loader.switch_scope(session("a"), now);
        let _ = loader.switch_scope(ScopeKey::Orchestrator, now);
        assert!(client
            .state
            .borrow()
            .watch_stops
            .contains(&"session:a".to_string()));
    }

    #[test]
    fn teardown_clears_cache_and_stays_missing() {
        let (mut loader, client) = loader();
        let now = Instant::now();
        let ticket = loader.switch_scope(session("a"), now).unwrap();
        loader.complete_load(&ticket, Ok(diff_of(&["x.rs"])));

        loader.teardown_scope(&session("a"));
        assert_eq!(loader.view().status, ScopeStatus::Missing);
        assert!(client
            .state
            .borrow()
            .watch_stops
            .contains(&"session:a".to_string()));

        // Still missing after looking elsewhere and back
        loader.switch_scope(ScopeKey::Orchestrator, now);
        assert!(loader.switch_scope(session("a"), now).is_none());
        assert_eq!(loader.view().status, ScopeStatus::Missing);
    }

    #[test]
    fn project_switch_invalidates_everything() {
        let (mut loader, client) = loader();
        let now = Instant::now();
        let ticket = loader.switch_scope(session("feature"), now).unwrap();
        loader.complete_load(&ticket, Ok(diff_of(&["old-project.rs"])));
        loader.teardown_scope(&session("dead"));

        let reload = loader.project_switched(now).expect("active scope reloads");
        assert_eq!(reload.scope, session("feature"));
        assert_eq!(loader.view().status, ScopeStatus::Waiting);
        assert!(loader.view().files.is_empty());

        // The previously-missing name is loadable again in the new project
        loader.complete_load(&reload, Ok(diff_of(&["new-project.rs"])));
        assert!(loader.switch_scope(session("dead"), now).is_some());
        assert_eq!(client.fetch_count(&session("dead")), 0);
    }

    #[test]
    fn no_session_scope_loads_nothing() {
        let (mut loader, client) = loader();
        let now = Instant::now();
        let _ = loader.switch_scope(ScopeKey::Orchestrator, now);
        assert!(loader.switch_scope(ScopeKey::NoSession, now).is_none());
        let view = loader.view();
        assert_eq!(view.status, ScopeStatus::Ready);
        assert!(view.files.is_empty());
        assert!(!view.is_loading);
        // No watcher was started for no-session
        assert!(!client
            .state
            .borrow()
            .watch_starts
            .contains(&"no-session".to_string()));
    }
}
