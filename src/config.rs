//! Configuration file support for patchdesk
//!
//! Reads from .patchdesk/config.toml, then applies environment overrides.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration structure
#[derive(Debug, Deserialize, Serialize, Default, Clone)]
pub struct Config {
    /// The project whose files are analyzed and patched
    #[serde(default)]
    pub target: TargetConfig,

    /// Completion provider settings
    #[serde(default)]
    pub model: ModelConfig,

    /// Prompt budget for the analysis step
    #[serde(default)]
    pub context: ContextConfig,

    #[serde(default)]
    pub conversation: ConversationConfig,

    #[serde(default)]
    pub server: ServerConfig,
}

/// Target project settings
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TargetConfig {
    /// Root directory; every read and write must resolve inside it
    #[serde(default = "default_target_root")]
    pub root: PathBuf,

    /// Base URL of the running target, used for blueprint introspection
    /// Example: "http://localhost:5001"
    #[serde(default)]
    pub base_url: Option<String>,

    /// Introspection paths tried in order, first success wins
    #[serde(default = "default_blueprint_paths")]
    pub blueprint_paths: Vec<String>,

    /// Extensions the assistant may read or write (with or without the dot)
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,

    /// Files larger than this are neither listed nor read
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// Directory names never descended into
    #[serde(default = "default_excluded_dirs")]
    pub excluded_dirs: Vec<String>,

    /// Timeout for blueprint requests
    #[serde(default = "default_target_timeout")]
    pub timeout_secs: u64,
}

/// Completion provider settings
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ModelConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_model")]
    pub model: String,

    /// Name of the environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_model_timeout")]
    pub timeout_secs: u64,

    /// Ceiling for the file-selection call (short JSON list)
    #[serde(default = "default_selection_tokens")]
    pub selection_max_tokens: u32,

    /// Ceiling for the ticket analysis call
    #[serde(default = "default_large_tokens")]
    pub analysis_max_tokens: u32,

    /// Ceiling for each per-file proposal call
    #[serde(default = "default_large_tokens")]
    pub proposal_max_tokens: u32,

    /// Ceiling for probe and chat replies
    #[serde(default = "default_chat_tokens")]
    pub chat_max_tokens: u32,
}

/// Analysis prompt budget
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ContextConfig {
    /// Maximum size of the assembled analysis prompt, in characters
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,

    /// Upper bound on files kept from the selection step
    #[serde(default = "default_max_selected")]
    pub max_selected_files: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ConversationConfig {
    /// Turns kept per scope; older turns are dropped
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    /// Worker threads answering requests
    #[serde(default = "default_workers")]
    pub workers: usize,
}

fn default_target_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_blueprint_paths() -> Vec<String> {
    vec!["/api/blueprint_json".to_string(), "/api/blueprint".to_string()]
}

fn default_allowed_extensions() -> Vec<String> {
    [
        "md", "txt", "json", "yaml", "yml", "py", "config", "html", "css", "js", "jsx", "ts",
        "tsx",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_max_file_size() -> u64 {
    100 * 1024
}

fn default_excluded_dirs() -> Vec<String> {
    ["node_modules", "__pycache__", "venv", ".venv", ".git", ".hg", ".svn"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_target_timeout() -> u64 {
    5
}

fn default_endpoint() -> String {
    "https://api.anthropic.com/v1/messages".to_string()
}

fn default_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

fn default_api_key_env() -> String {
    "ANTHROPIC_API_KEY".to_string()
}

fn default_model_timeout() -> u64 {
    45
}

fn default_selection_tokens() -> u32 {
    1024
}

fn default_large_tokens() -> u32 {
    4096
}

fn default_chat_tokens() -> u32 {
    2048
}

fn default_max_chars() -> usize {
    120_000
}

fn default_max_selected() -> usize {
    8
}

fn default_max_turns() -> usize {
    20
}

fn default_port() -> u16 {
    8080
}

fn default_workers() -> usize {
    4
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            root: default_target_root(),
            base_url: None,
            blueprint_paths: default_blueprint_paths(),
            allowed_extensions: default_allowed_extensions(),
            max_file_size: default_max_file_size(),
            excluded_dirs: default_excluded_dirs(),
            timeout_secs: default_target_timeout(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_model_timeout(),
            selection_max_tokens: default_selection_tokens(),
            analysis_max_tokens: default_large_tokens(),
            proposal_max_tokens: default_large_tokens(),
            chat_max_tokens: default_chat_tokens(),
        }
    }
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            max_selected_files: default_max_selected(),
        }
    }
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            workers: default_workers(),
        }
    }
}

/// Error type for explicit config loading
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl Config {
    /// Load config from .patchdesk/config.toml and apply env overrides.
    /// Falls back to defaults when the file is missing or unreadable.
    pub fn load() -> Self {
        let mut config = match Self::find_config_path() {
            Some(path) => match Self::load_from(&path) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!("{}; using defaults", e);
                    Self::default()
                }
            },
            None => Self::default(),
        };
        config.apply_env();
        config
    }

    /// Load config from an explicit path, without env overrides
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Environment variables win over the file
    pub fn apply_env(&mut self) {
        if let Ok(dir) = std::env::var("PATCHDESK_TARGET_DIR") {
            self.target.root = PathBuf::from(dir);
        }
        if let Ok(url) = std::env::var("PATCHDESK_TARGET_URL") {
            self.target.base_url = Some(url).filter(|u| !u.trim().is_empty());
        }
        if let Ok(model) = std::env::var("PATCHDESK_MODEL") {
            self.model.model = model;
        }
    }

    /// Find config.toml by walking up directory tree
    fn find_config_path() -> Option<PathBuf> {
        let current_dir = std::env::current_dir().ok()?;
        let mut dir = current_dir.as_path();

        loop {
            let config_path = dir.join(".patchdesk").join("config.toml");
            if config_path.exists() {
                return Some(config_path);
            }

            match dir.parent() {
                Some(parent) => dir = parent,
                None => break,
            }
        }
        None
    }

    /// API key from the configured environment variable, if set and non-empty
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.model.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
    }
}

impl TargetConfig {
    /// Check an extension (without dot) against the allow-list, case-insensitively
    pub fn allows_extension(&self, ext: &str) -> bool {
        self.allowed_extensions
            .iter()
            .any(|allowed| allowed.trim_start_matches('.').eq_ignore_ascii_case(ext))
    }

    pub fn is_excluded_dir(&self, name: &str) -> bool {
        self.excluded_dirs.iter().any(|d| d == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.target.max_file_size, 100 * 1024);
        assert_eq!(config.target.blueprint_paths[0], "/api/blueprint_json");
        assert!(config.target.allows_extension("py"));
        assert!(config.target.allows_extension("TSX"));
        assert!(!config.target.allows_extension("exe"));
        assert!(config.target.is_excluded_dir("node_modules"));
        assert!(config.model.selection_max_tokens < config.model.analysis_max_tokens);
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[target]
root = "/srv/shop"
base_url = "http://localhost:5001"
allowed_extensions = [".rs", "toml"]
max_file_size = 2048

[context]
max_chars = 5000
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.target.root, PathBuf::from("/srv/shop"));
        assert!(config.target.allows_extension("rs"));
        assert!(config.target.allows_extension("toml"));
        assert!(!config.target.allows_extension("py"));
        assert_eq!(config.target.max_file_size, 2048);
        assert_eq!(config.context.max_chars, 5000);
        // Untouched sections keep defaults
        assert_eq!(config.context.max_selected_files, 8);
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn test_load_from_reports_parse_errors() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[target\nroot = ").unwrap();
        let err = Config::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
