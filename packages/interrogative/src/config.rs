use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

// =============================================================================
// File config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
//   config.toml:     [files]
//                    save_debounce_ms = 250
//
//   env var:         INTERROGATIVE_FILES__SAVE_DEBOUNCE_MS=250
//
// Double underscore nests into a section; single underscores stay in field names.

pub const ENV_PREFIX: &str = "INTERROGATIVE_";

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub files: FilesFileConfig,
    #[serde(default)]
    pub git: GitFileConfig,
    #[serde(default)]
    pub terminal: TerminalFileConfig,
    #[serde(default)]
    pub auth: AuthFileConfig,
}

/// `[server]`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// `[files]`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FilesFileConfig {
    /// Workspace root. Defaults to the working directory.
    #[serde(default)]
    pub home: Option<PathBuf>,
    /// Files opened at startup and after a bulk clear
    #[serde(default)]
    pub open: Vec<String>,
    #[serde(default = "default_exclusions")]
    pub exclusions: Vec<String>,
    #[serde(default = "default_depth")]
    pub depth: usize,
    #[serde(default = "default_open_max_size")]
    pub open_max_size: u64,
    #[serde(default = "default_save_debounce_ms")]
    pub save_debounce_ms: u64,
    #[serde(default = "default_watch_debounce_ms")]
    pub watch_debounce_ms: u64,
}

impl Default for FilesFileConfig {
    fn default() -> Self {
        Self {
            home: None,
            open: Vec::new(),
            exclusions: default_exclusions(),
            depth: default_depth(),
            open_max_size: default_open_max_size(),
            save_debounce_ms: default_save_debounce_ms(),
            watch_debounce_ms: default_watch_debounce_ms(),
        }
    }
}

/// `[git]`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GitFileConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Repository root. Defaults to the workspace home.
    #[serde(default)]
    pub repository: Option<PathBuf>,
    #[serde(default = "default_git_limit")]
    pub limit: usize,
    #[serde(default = "default_git_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for GitFileConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            repository: None,
            limit: default_git_limit(),
            debounce_ms: default_git_debounce_ms(),
        }
    }
}

/// `[terminal]`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TerminalFileConfig {
    #[serde(default = "default_shell")]
    pub shell: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_cols")]
    pub default_cols: u16,
    #[serde(default = "default_rows")]
    pub default_rows: u16,
}

impl Default for TerminalFileConfig {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            args: Vec::new(),
            default_cols: default_cols(),
            default_rows: default_rows(),
        }
    }
}

/// `[auth]`
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AuthFileConfig {
    /// Token required by bulk-reset commands. Unset means they are always refused.
    #[serde(default)]
    pub admin_token: Option<String>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    7001
}
fn default_exclusions() -> Vec<String> {
    vec![".git".to_string(), "node_modules".to_string()]
}
fn default_depth() -> usize {
    10
}
fn default_open_max_size() -> u64 {
    1024 * 1024
}
fn default_save_debounce_ms() -> u64 {
    500
}
fn default_watch_debounce_ms() -> u64 {
    100
}
fn default_true() -> bool {
    true
}
fn default_git_limit() -> usize {
    100
}
fn default_git_debounce_ms() -> u64 {
    500
}
fn default_shell() -> String {
    std::env::var("SHELL")
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "/bin/bash".to_string())
}
fn default_cols() -> u16 {
    100
}
fn default_rows() -> u16 {
    24
}

/// Layer struct defaults → `<config_dir>/config.toml` → `INTERROGATIVE_*` env vars.
pub fn load_config(config_dir: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(config_dir.join("config.toml")))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
}

/// `$XDG_CONFIG_HOME/interrogative`, falling back to `./.interrogative`.
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("interrogative"))
        .unwrap_or_else(|| PathBuf::from(".interrogative"))
}

// =============================================================================
// Runtime config (derived from FileConfig, paths resolved, durations typed)
// =============================================================================

#[derive(Clone, Debug)]
pub struct FilesConfig {
    pub home: PathBuf,
    pub open: Vec<PathBuf>,
    pub exclusions: Vec<String>,
    pub depth: usize,
    pub open_max_size: u64,
    pub save_debounce: Duration,
    pub watch_debounce: Duration,
}

impl FilesConfig {
    pub fn from_file(fc: &FilesFileConfig, home: &Path) -> Self {
        Self {
            home: home.to_path_buf(),
            open: fc.open.iter().map(|p| resolve_open_path(home, p)).collect(),
            exclusions: fc.exclusions.clone(),
            depth: fc.depth,
            open_max_size: fc.open_max_size,
            save_debounce: Duration::from_millis(fc.save_debounce_ms),
            watch_debounce: Duration::from_millis(fc.watch_debounce_ms),
        }
    }
}

/// Bare names resolve against the workspace home; anything with a `/` is kept.
fn resolve_open_path(home: &Path, entry: &str) -> PathBuf {
    if entry.contains('/') {
        PathBuf::from(entry)
    } else {
        home.join(entry)
    }
}

#[derive(Clone, Debug)]
pub struct GitConfig {
    pub enabled: bool,
    pub repository: PathBuf,
    pub limit: usize,
    pub debounce: Duration,
}

impl GitConfig {
    pub fn from_file(fc: &GitFileConfig, home: &Path) -> Self {
        Self {
            enabled: fc.enabled,
            repository: fc.repository.clone().unwrap_or_else(|| home.to_path_buf()),
            limit: fc.limit,
            debounce: Duration::from_millis(fc.debounce_ms),
        }
    }

    pub fn refs_dir(&self) -> PathBuf {
        self.repository.join(".git").join("refs").join("heads")
    }
}

#[derive(Clone, Debug)]
pub struct TerminalConfig {
    pub shell: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub default_cols: u16,
    pub default_rows: u16,
}

impl TerminalConfig {
    pub fn from_file(fc: &TerminalFileConfig, home: &Path) -> Self {
        Self {
            shell: fc.shell.clone(),
            args: fc.args.clone(),
            working_dir: home.to_path_buf(),
            default_cols: fc.default_cols,
            default_rows: fc.default_rows,
        }
    }
}

/// Everything a session needs, resolved.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub listen: SocketAddr,
    pub files: FilesConfig,
    pub git: GitConfig,
    pub terminal: TerminalConfig,
    pub admin_token: Option<String>,
}

impl SessionConfig {
    pub fn from_file(fc: &FileConfig) -> Result<Self> {
        let home = match &fc.files.home {
            Some(home) => home.clone(),
            None => std::env::current_dir().context("Failed to read working directory")?,
        };
        let home = home
            .canonicalize()
            .with_context(|| format!("Workspace home does not exist: {}", home.display()))?;

        let listen: SocketAddr = format!("{}:{}", fc.server.host, fc.server.port)
            .parse()
            .with_context(|| format!("Invalid listen address {}:{}", fc.server.host, fc.server.port))?;

        info!("Workspace home: {}", home.display());

        Ok(Self {
            listen,
            files: FilesConfig::from_file(&fc.files, &home),
            git: GitConfig::from_file(&fc.git, &home),
            terminal: TerminalConfig::from_file(&fc.terminal, &home),
            admin_token: fc.auth.admin_token.clone(),
        })
    }
}
