//! Load config from file and environment.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use peerchat_core::UserIdentity;

/// Node configuration. File: ~/.config/peerchat/config.toml or /etc/peerchat/config.toml.
/// Env overrides: PEERCHAT_LISTEN_PORT, PEERCHAT_ADVERTISE_HOST, PEERCHAT_BIND_HOST,
/// PEERCHAT_DISPLAY_NAME, PEERCHAT_CONNECT_TIMEOUT_SECS, PEERCHAT_DOWNLOADS_DIR.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Name shown to peers (default: $USER, else "anonymous").
    #[serde(default = "default_display_name")]
    pub display_name: String,
    /// Host announced in USER_INFO; together with `listen_port` it forms the contact id.
    #[serde(default = "default_advertise_host")]
    pub advertise_host: String,
    /// Interface the listener binds to (default 0.0.0.0).
    #[serde(default = "default_bind_host")]
    pub bind_host: String,
    /// Listen port (default 5000). Must lie in 1024..=65535.
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    /// Outbound dial timeout in seconds (default 10).
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Where received files are written (default ./downloads).
    #[serde(default = "default_downloads_dir")]
    pub downloads_dir: PathBuf,
    /// Write received files to `downloads_dir` (default true).
    #[serde(default = "default_save_files")]
    pub save_files: bool,
}

fn default_display_name() -> String {
    std::env::var("USER")
        .ok()
        .filter(|u| !u.trim().is_empty())
        .unwrap_or_else(|| "anonymous".to_string())
}
fn default_advertise_host() -> String {
    "127.0.0.1".to_string()
}
fn default_bind_host() -> String {
    "0.0.0.0".to_string()
}
fn default_listen_port() -> u16 {
    5000
}
fn default_connect_timeout_secs() -> u64 {
    10
}
fn default_downloads_dir() -> PathBuf {
    PathBuf::from("downloads")
}
fn default_save_files() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            display_name: default_display_name(),
            advertise_host: default_advertise_host(),
            bind_host: default_bind_host(),
            listen_port: default_listen_port(),
            connect_timeout_secs: default_connect_timeout_secs(),
            downloads_dir: default_downloads_dir(),
            save_files: default_save_files(),
        }
    }
}

impl Config {
    /// Identity announced to peers.
    pub fn local_identity(&self) -> UserIdentity {
        UserIdentity::new(
            self.display_name.clone(),
            self.advertise_host.clone(),
            self.listen_port,
        )
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
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

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> Config {
    let mut c = load_file().unwrap_or_default();
    apply_overrides(&mut c, |key| std::env::var(key).ok());
    c
}

/// Load an explicit config file, then apply env vars. Unlike `load`, a bad file is an error.
pub fn load_from(path: &Path) -> Result<Config, ConfigError> {
    let s = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut c = toml::from_str::<Config>(&s).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    apply_overrides(&mut c, |key| std::env::var(key).ok());
    Ok(c)
}

/// Apply PEERCHAT_* overrides; values that do not parse are ignored.
pub fn apply_overrides(c: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(p) = var("PEERCHAT_LISTEN_PORT").and_then(|s| s.parse::<u16>().ok()) {
        c.listen_port = p;
    }
    if let Some(h) = var("PEERCHAT_ADVERTISE_HOST").filter(|s| !s.is_empty()) {
        c.advertise_host = h;
    }
    if let Some(h) = var("PEERCHAT_BIND_HOST").filter(|s| !s.is_empty()) {
        c.bind_host = h;
    }
    if let Some(n) = var("PEERCHAT_DISPLAY_NAME").filter(|s| !s.is_empty()) {
        c.display_name = n;
    }
    if let Some(t) = var("PEERCHAT_CONNECT_TIMEOUT_SECS").and_then(|s| s.parse::<u64>().ok()) {
        c.connect_timeout_secs = t;
    }
    if let Some(d) = var("PEERCHAT_DOWNLOADS_DIR").filter(|s| !s.is_empty()) {
        c.downloads_dir = PathBuf::from(d);
    }
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/peerchat/config.toml"));
    }
    out.push(PathBuf::from("/etc/peerchat/config.toml"));
    out
}

fn load_file() -> Option<Config> {
    for p in config_paths() {
        if p.exists() {
            match std::fs::read_to_string(&p) {
                Ok(s) => match toml::from_str::<Config>(&s) {
                    Ok(c) => return Some(c),
                    Err(e) => tracing::warn!(path = %p.display(), error = %e, "ignoring config file"),
                },
                Err(e) => tracing::warn!(path = %p.display(), error = %e, "cannot read config file"),
            }
            break;
        }
    }
    None
}
