use std::fmt;

/// What a diff is computed against: a named session worktree, the
/// orchestrator's own working directory, or nothing selected.
///
/// Exactly one scope is active at a time. The string form is the cache key —
/// two scopes with the same key are the same scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ScopeKey {
    Session(String),
    Orchestrator,
    NoSession,
}

impl ScopeKey {
    /// Stable string identity used as the cache key and in push events.
    pub fn as_key(&self) -> String {
        match self {
            ScopeKey::Session(name) => format!("session:{}", name),
            ScopeKey::Orchestrator => "orchestrator".to_string(),
            ScopeKey::NoSession => "no-session".to_string(),
        }
    }

    /// Parse the string form back into a scope. Unknown strings are treated
    /// as session names only when prefixed; anything else is NoSession.
    pub fn parse(key: &str) -> ScopeKey {
        match key {
            "orchestrator" => ScopeKey::Orchestrator,
            "no-session" => ScopeKey::NoSession,
            other => match other.strip_prefix("session:") {
                Some(name) if !name.is_empty() => ScopeKey::Session(name.to_string()),
                _ => ScopeKey::NoSession,
            },
        }
    }

    /// Whether this scope has anything to load at all.
    pub fn is_loadable(&self) -> bool {
        !matches!(self, ScopeKey::NoSession)
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_key())
    }
}
