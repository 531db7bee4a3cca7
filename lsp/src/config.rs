//! Server configuration, loaded from TOML.
//!
//! Every field has a default so an empty or missing file is a valid config.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

const CONFIG_ENV_VAR: &str = "DIAGPULL_CONFIG";

// Default value functions for serde (bool::default() is false, so only true needs a fn)
const fn default_true() -> bool {
    true
}

const fn default_refresh_debounce_ms() -> u64 {
    500
}

fn default_todo_markers() -> Vec<String> {
    vec!["TODO".to_string(), "FIXME".to_string()]
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Quiet period before a burst of changes becomes one refresh notification.
    #[serde(default = "default_refresh_debounce_ms")]
    pub refresh_debounce_ms: u64,
    /// Park workspace requests that found nothing new until the next change.
    #[serde(default = "default_true")]
    pub workspace_long_poll: bool,
    /// Emit `unchanged` reports from workspace requests. Off by default to
    /// keep long workspace responses small.
    #[serde(default)]
    pub report_unchanged_in_workspace: bool,
    #[serde(default)]
    pub lint: LintConfig,
    /// Write logs here instead of stderr.
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            refresh_debounce_ms: default_refresh_debounce_ms(),
            workspace_long_poll: true,
            report_unchanged_in_workspace: false,
            lint: LintConfig::default(),
            log_file: None,
        }
    }
}

impl ServerConfig {
    #[must_use]
    pub fn refresh_debounce(&self) -> Duration {
        Duration::from_millis(self.refresh_debounce_ms)
    }

    /// Load the config file. A missing file yields `Ok(None)`.
    pub fn load(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }

        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to read config at {:?}: {}", path, err);
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
        };

        match toml::from_str(&content) {
            Ok(config) => Ok(Some(config)),
            Err(err) => {
                tracing::warn!("Failed to parse config at {:?}: {}", path, err);
                Err(ConfigError::Parse {
                    path: path.to_path_buf(),
                    source: err,
                })
            }
        }
    }
}

/// Which documents workspace pulls cover.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisScope {
    /// Open documents only. Closed documents and project-level results drop
    /// out of workspace pulls.
    #[serde(alias = "openDocuments")]
    OpenDocuments,
    /// Every document in the workspace, open or closed.
    #[default]
    #[serde(alias = "fullSolution")]
    FullSolution,
}

/// Options for the built-in line rules.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LintConfig {
    #[serde(default, alias = "analysisScope")]
    pub analysis_scope: AnalysisScope,
    /// Flag lines longer than this many characters. Unset disables the rule.
    #[serde(default, alias = "maxLineLength")]
    pub max_line_length: Option<u32>,
    #[serde(default = "default_true", alias = "trailingWhitespace")]
    pub trailing_whitespace: bool,
    #[serde(default = "default_todo_markers", alias = "todoMarkers")]
    pub todo_markers: Vec<String>,
}

impl Default for LintConfig {
    fn default() -> Self {
        Self {
            analysis_scope: AnalysisScope::FullSolution,
            max_line_length: None,
            trailing_whitespace: true,
            todo_markers: default_todo_markers(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl ConfigError {
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => path,
        }
    }
}

/// Resolve the config path: explicit path, then `$DIAGPULL_CONFIG`, then
/// `~/.config/diagpull/config.toml`.
#[must_use]
pub fn config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    if let Some(path) = std::env::var_os(CONFIG_ENV_VAR).filter(|v| !v.is_empty()) {
        return Some(PathBuf::from(path));
    }
    dirs::config_dir().map(|dir| dir.join("diagpull").join("config.toml"))
}
