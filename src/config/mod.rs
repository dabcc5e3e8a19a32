//! Configuration loading for vendorstore.

use std::path::PathBuf;

use anyhow::Context;
use directories::{BaseDirs, ProjectDirs};
use serde::Deserialize;

use crate::storage::local::WriteMode;
use crate::storage::{Module, ModuleBuilder, Protocol};

/// Environment variable pointing at an explicit config file.
pub const CONFIG_ENV: &str = "VENDORSTORE_CONFIG";

/// Top-level configuration loaded from config.toml.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Which module to open and how.
#[derive(Debug, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_root")]
    pub root: String,
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default)]
    pub write_mode: WriteMode,
}

#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// `tracing` filter directive, e.g. "warn" or "vendorstore=debug".
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_backend() -> String {
    "local".to_string()
}

fn default_root() -> String {
    "~/vendorstore".to_string()
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            root: default_root(),
            protocol: Protocol::default(),
            write_mode: WriteMode::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load config from `$VENDORSTORE_CONFIG`, then
    /// ~/.config/vendorstore/config.toml, or return defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be read or parsed,
    /// or if `$VENDORSTORE_CONFIG` names a missing file.
    pub fn load() -> anyhow::Result<Self> {
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            return Self::from_file(&PathBuf::from(path));
        }

        if let Some(path) = Self::config_path()
            && path.exists()
        {
            return Self::from_file(&path);
        }

        Ok(Config::default())
    }

    /// Parse a config file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid TOML.
    pub fn from_file(path: &std::path::Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&contents).with_context(|| format!("parsing config {}", path.display()))
    }

    #[must_use]
    pub fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "vendorstore").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Root directory with `~` expanded.
    #[must_use]
    pub fn root(&self) -> PathBuf {
        expand_tilde(&self.storage.root)
    }
}

impl StorageConfig {
    /// Build the configured module.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown backend.
    pub fn open(&self) -> anyhow::Result<Module> {
        ModuleBuilder::new(&self.backend)
            .with_root(expand_tilde(&self.root))
            .with_protocol(self.protocol)
            .with_write_mode(self.write_mode)
            .build()
            .context("opening storage module")
    }
}

/// Expand ~ to the user's home directory.
#[must_use]
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(base_dirs) = BaseDirs::new()
    {
        return base_dirs.home_dir().join(rest);
    }
    PathBuf::from(path)
}
