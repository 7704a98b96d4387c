//! Startup configuration.
//!
//! One [`Config`] value is built at startup (TOML file, then environment
//! overrides) and passed by reference to the gateway and the session store.
//! Nothing in the crate reads configuration from globals.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Hard cap on one request, in bytes.
pub const DEFAULT_MAX_REQUEST_BYTES: usize = 10_000_000;

/// Historical install-wide seed for the table file key. Stores written by
/// older deployments are only readable with this seed.
pub const DEFAULT_KEY_SEED: &str = concat!(
    "nkXliX8lg2kTuQSS/OoLXCk8eS4Fwmc+N7l6TTNgzM1vdKewO0cjok51vcdl",
    "OKVXyPu83xYhX6mDeDyzapxL3dIZuzwyemVw+uCNCZ01WDw82oninzp88Hef",
    "bn3pPnSMqEaP2bOdX+8yEe6sGkc3IO3e38+CqSOyDBxHCqfrZT2Sqn6SHWhR",
    "KqpJp4K96QqtVjmXwhVcST9l+u1XUPL6K9HQfEEGMGcToMGUrzNQxCzlg2g+",
    "Hg55i7iiKbA0ogENhEIFjMG+wmFDNzgjvDnNYOaPTQ7l4C8aaPsEfl3sugiw",
);

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub log: LogConfig,
}

/// Protocol front settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    /// Per-operation I/O deadline in milliseconds; `<= 0` is unlimited.
    pub timeout_ms: i64,
    /// Installation root. Web pages live in `root/www`, CGI binaries in `root/bin`.
    pub root: PathBuf,
    /// Request body that stops the server.
    pub stop_code: String,
    pub max_request_bytes: usize,
    /// Seed of the key the built-in session handler expects on
    /// authentication and connect requests.
    pub app_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            timeout_ms: 30_000,
            root: PathBuf::from("."),
            stop_code: String::new(),
            max_request_bytes: DEFAULT_MAX_REQUEST_BYTES,
            app_name: "ktserve".into(),
        }
    }
}

impl ServerConfig {
    pub fn web_root(&self) -> PathBuf {
        self.root.join("www")
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.root.join("bin")
    }

    /// The stop code, or an error when none is configured.
    pub fn require_stop_code(&self) -> Result<&str> {
        if self.stop_code.is_empty() {
            bail!("server.stop_code cannot be empty");
        }
        Ok(&self.stop_code)
    }
}

/// Session/identity store settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding `users.db` and `sessions.db`.
    pub home: PathBuf,
    /// Sliding expiration window for sessions that asked for one.
    pub expiration_secs: i64,
    pub key_seed: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            home: default_data_dir(),
            expiration_secs: 900,
            key_seed: DEFAULT_KEY_SEED.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LogConfig {
    /// `tracing` filter directive; `RUST_LOG` takes precedence.
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("", "", "ktserve")
}

/// `<config dir>/ktserve/config.toml`, or `./config.toml` when no home
/// directory is known.
pub fn default_config_path() -> PathBuf {
    project_dirs().map_or_else(
        || PathBuf::from("config.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn default_data_dir() -> PathBuf {
    project_dirs().map_or_else(|| PathBuf::from(".ktserve"), |dirs| dirs.data_dir().to_path_buf())
}

fn expand(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    PathBuf::from(shellexpand::tilde(&raw).into_owned())
}

impl Config {
    /// Parses TOML text. Missing keys take their defaults.
    pub fn from_toml(text: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(text).context("Invalid configuration TOML")?;
        config.expand_paths();
        Ok(config)
    }

    /// Loads `path`, or the default location when `path` is `None`. A missing
    /// default file yields the defaults; a missing explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(p) => (expand(p), true),
            None => (default_config_path(), false),
        };

        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            Self::from_toml(&text).with_context(|| format!("In {}", path.display()))?
        } else if explicit {
            bail!("Configuration file {} does not exist", path.display());
        } else {
            tracing::debug!(path = %path.display(), "No configuration file, using defaults");
            Config::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    fn expand_paths(&mut self) {
        self.server.root = expand(&self.server.root);
        self.store.home = expand(&self.store.home);
    }

    /// Applies `KTSERVE_PORT`, `KTSERVE_ROOT`, `KTSERVE_HOME` and
    /// `KTSERVE_STOP_CODE`.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, get: impl Fn(&str) -> Option<String>) {
        if let Some(port) = get("KTSERVE_PORT") {
            match port.trim().parse() {
                Ok(p) => self.server.port = p,
                Err(_) => tracing::warn!("Ignoring invalid KTSERVE_PORT '{port}'"),
            }
        }
        if let Some(root) = get("KTSERVE_ROOT").filter(|v| !v.is_empty()) {
            self.server.root = expand(Path::new(&root));
        }
        if let Some(home) = get("KTSERVE_HOME").filter(|v| !v.is_empty()) {
            self.store.home = expand(Path::new(&home));
        }
        if let Some(code) = get("KTSERVE_STOP_CODE").filter(|v| !v.is_empty()) {
            self.server.stop_code = code;
        }
    }

    /// Rejects settings the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.server.require_stop_code()?;
        if self.server.max_request_bytes == 0 {
            bail!("server.max_request_bytes must be greater than 0");
        }
        if self.store.expiration_secs <= 0 {
            bail!("store.expiration_secs must be greater than 0");
        }
        if self.store.key_seed.is_empty() {
            bail!("store.key_seed cannot be empty");
        }
        Ok(())
    }
}
