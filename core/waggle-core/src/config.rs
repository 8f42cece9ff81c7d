//! Configuration loading.
//!
//! Reads `~/.waggle/config.json`. Every key is optional, and a missing,
//! unreadable or malformed file yields the defaults. Paths accept `~` and
//! relative forms and are made absolute without resolving symlinks.

use fs_err as fs;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, WaggleError};
use crate::namespace::normalize_with;
use crate::registry::{
    TmuxCommand, TmuxRegistry, DEFAULT_ENRICH_TIMEOUT, DEFAULT_RECONCILE_TIMEOUT,
};

pub const WAGGLE_DIR_NAME: &str = ".waggle";
pub const CONFIG_FILE_NAME: &str = "config.json";
pub const DEFAULT_DB_FILE_NAME: &str = "agent_state.db";
pub const DEFAULT_SOCKET_FILE_NAME: &str = "daemon.sock";

/// Raw file contents. Field names are the on-disk keys.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    database_path: Option<String>,
    socket_path: Option<String>,
    reconcile_timeout_ms: Option<u64>,
    enrich_timeout_ms: Option<u64>,
    tmux_binary: Option<String>,
    tmux_socket_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaggleConfig {
    pub database_path: PathBuf,
    pub socket_path: PathBuf,
    pub reconcile_timeout: Duration,
    pub enrich_timeout: Duration,
    pub tmux_binary: String,
    /// tmux `-L` socket name; `None` targets the default server.
    pub tmux_socket_name: Option<String>,
}

impl WaggleConfig {
    /// Defaults rooted at `waggle_dir` (normally `~/.waggle`).
    pub fn defaults_in(waggle_dir: &Path) -> Self {
        Self {
            database_path: waggle_dir.join(DEFAULT_DB_FILE_NAME),
            socket_path: waggle_dir.join(DEFAULT_SOCKET_FILE_NAME),
            reconcile_timeout: DEFAULT_RECONCILE_TIMEOUT,
            enrich_timeout: DEFAULT_ENRICH_TIMEOUT,
            tmux_binary: "tmux".to_string(),
            tmux_socket_name: None,
        }
    }

    pub fn tmux_command(&self) -> TmuxCommand {
        let command = TmuxCommand::new(&self.tmux_binary);
        match &self.tmux_socket_name {
            Some(name) => command.with_socket_name(name),
            None => command,
        }
    }

    /// Registry with the reconcile deadline for key listings and the
    /// enrichment deadline for directory listings.
    pub fn registry(&self) -> TmuxRegistry {
        TmuxRegistry::new(self.tmux_command(), self.reconcile_timeout)
            .with_directory_timeout(self.enrich_timeout)
    }
}

/// Returns `~/.waggle`.
pub fn waggle_dir() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(WAGGLE_DIR_NAME))
        .ok_or(WaggleError::HomeDirNotFound)
}

/// Loads `~/.waggle/config.json`, creating `~/.waggle` if needed.
pub fn load_config() -> Result<WaggleConfig> {
    let home = dirs::home_dir().ok_or(WaggleError::HomeDirNotFound)?;
    let dir = home.join(WAGGLE_DIR_NAME);
    if let Err(err) = fs::create_dir_all(&dir) {
        tracing::warn!(error = %err, "Failed to create waggle directory");
    }
    let cwd = std::env::current_dir()
        .map_err(|err| WaggleError::io("Failed to read current directory", err))?;
    Ok(load_config_from(&dir.join(CONFIG_FILE_NAME), &home, &cwd))
}

/// Loads a config file with explicit home and working directories.
/// Never fails; problems are logged and the defaults used instead.
pub fn load_config_from(path: &Path, home: &Path, cwd: &Path) -> WaggleConfig {
    let mut config = WaggleConfig::defaults_in(&home.join(WAGGLE_DIR_NAME));
    let file = read_config_file(path);

    let expand = |raw: &str| PathBuf::from(normalize_with(raw, Some(home), cwd));
    if let Some(raw) = file.database_path.as_deref() {
        config.database_path = expand(raw);
    }
    if let Some(raw) = file.socket_path.as_deref() {
        config.socket_path = expand(raw);
    }
    if let Some(ms) = file.reconcile_timeout_ms {
        config.reconcile_timeout = Duration::from_millis(ms);
    }
    if let Some(ms) = file.enrich_timeout_ms {
        config.enrich_timeout = Duration::from_millis(ms);
    }
    if let Some(binary) = file.tmux_binary.filter(|value| !value.is_empty()) {
        config.tmux_binary = binary;
    }
    config.tmux_socket_name = file.tmux_socket_name.filter(|value| !value.is_empty());

    config
}

fn read_config_file(path: &Path) -> ConfigFile {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return ConfigFile::default(),
        Err(err) => {
            tracing::warn!(error = %err, "Failed to read config; using defaults");
            return ConfigFile::default();
        }
    };

    let value: serde_json::Value = match serde_json::from_str(&content) {
        Ok(value) => value,
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "Malformed config; using defaults");
            return ConfigFile::default();
        }
    };

    if !value.is_object() {
        tracing::warn!(path = %path.display(), "Config is not a JSON object; using defaults");
        return ConfigFile::default();
    }

    serde_json::from_value(value).unwrap_or_else(|err| {
        tracing::warn!(path = %path.display(), error = %err, "Invalid config values; using defaults");
        ConfigFile::default()
    })
}
