use glob::Pattern;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DsConfig {
    #[serde(default)]
    pub watch: WatchConfig,
    #[serde(default)]
    pub poll: PollConfig,
    /// Override for base-branch auto-detection
    #[serde(default)]
    pub base_branch: Option<String>,
}

/// [watch] section configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Debounce window for filesystem events, in milliseconds
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Glob patterns for paths that never trigger a refresh
    #[serde(default = "default_ignore")]
    pub ignore: Vec<String>,
}

/// [poll] section configuration (watcher-unavailable fallback)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    #[serde(default = "default_session_poll_secs")]
    pub session_secs: u64,
    #[serde(default = "default_orchestrator_poll_secs")]
    pub orchestrator_secs: u64,
}

fn default_debounce_ms() -> u64 {
    500
}

fn default_ignore() -> Vec<String> {
    vec![
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
        "*.swp".to_string(),
        "*~".to_string(),
    ]
}

fn default_session_poll_secs() -> u64 {
    3
}

fn default_orchestrator_poll_secs() -> u64 {
    5
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            ignore: default_ignore(),
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            session_secs: default_session_poll_secs(),
            orchestrator_secs: default_orchestrator_poll_secs(),
        }
    }
}

impl DsConfig {
    /// Compiled watch-ignore globs; unparseable patterns are logged and
    /// skipped rather than failing startup.
    pub fn ignore_patterns(&self) -> Vec<Pattern> {
        self.watch
            .ignore
            .iter()
            .filter_map(|raw| match Pattern::new(raw) {
                Ok(pattern) => Some(pattern),
                Err(err) => {
                    log::warn!("ignoring bad watch ignore pattern '{}': {}", raw, err);
                    None
                }
            })
            .collect()
    }
}

/// Load config with per-repo overrides winning over the global file.
/// Priority: `<repo>/.diffscope.toml` > `~/.config/diffscope/config.toml` >
/// built-in defaults.
pub fn load_config(repo_root: &str) -> DsConfig {
    let local_path = format!("{repo_root}/.diffscope.toml");
    let global_path = dirs::config_dir()
        .map(|d| d.join("diffscope/config.toml").to_string_lossy().to_string());

    let parse = |content: String| -> Option<DsConfig> {
        match toml::from_str(&content) {
            Ok(config) => Some(config),
            Err(err) => {
                log::warn!("failed to parse config: {}", err);
                None
            }
        }
    };

    if let Some(config) = std::fs::read_to_string(&local_path).ok().and_then(parse) {
        return config;
    }
    if let Some(config) = global_path
        .and_then(|p| std::fs::read_to_string(p).ok())
        .and_then(parse)
    {
        return config;
    }
    DsConfig::default()
}
