//! Host configuration, persisted as TOML in `$XDG_CONFIG_HOME/epistery/config.toml`.
//!
//! Precedence, lowest to highest: serde defaults, the TOML file,
//! `EPISTERY_*` environment variables, command-line flags.

use std::path::{Path, PathBuf};
use std::time::Duration;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::paths::HostPaths;

/// Errors from loading or saving host configuration.
#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read host config: {path}")]
    #[diagnostic(
        code(epistery::config::read),
        help("Ensure the config file exists and is readable, or run `epistery-host init`.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse host config {path}: {message}")]
    #[diagnostic(
        code(epistery::config::parse),
        help("Check the TOML syntax in the host config file.")
    )]
    Parse { path: String, message: String },

    #[error("failed to write host config: {path}")]
    #[diagnostic(
        code(epistery::config::write),
        help("Ensure you have write permissions to the config directory.")
    )]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid value for {key}: \"{value}\"")]
    #[diagnostic(code(epistery::config::invalid_value), help("{hint}"))]
    InvalidValue {
        key: String,
        value: String,
        hint: String,
    },
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Process-wide host configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    /// Address to bind the HTTP listener to.
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Port to bind the HTTP listener to.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Directory containing one subdirectory per agent package.
    #[serde(default)]
    pub agents_dir: Option<PathBuf>,
    /// Directory holding per-domain agent state.
    #[serde(default)]
    pub domains_dir: Option<PathBuf>,
    /// Upper bound on graceful shutdown, in seconds.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
    /// Bearer token required by the admin endpoints. Admin is disabled when unset.
    #[serde(default)]
    pub admin_token: Option<String>,
    /// Domain used when a request carries no usable `Host` header.
    #[serde(default = "default_domain")]
    pub default_domain: String,
}

fn default_bind() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    4080
}
fn default_shutdown_timeout_secs() -> u64 {
    10
}
fn default_domain() -> String {
    "localhost".into()
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            agents_dir: None,
            domains_dir: None,
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            admin_token: None,
            default_domain: default_domain(),
        }
    }
}

impl HostConfig {
    /// Load from a TOML file.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Load from a TOML file, falling back to defaults when it does not exist.
    pub fn load_or_default(path: &Path) -> ConfigResult<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!(path = %path.display(), "no host config file, using defaults");
            Ok(Self::default())
        }
    }

    /// Save to a TOML file.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
        std::fs::write(path, content).map_err(|e| ConfigError::Write {
            path: path.display().to_string(),
            source: e,
        })
    }

    /// Apply `EPISTERY_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> ConfigResult<()> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// Apply `EPISTERY_*` overrides from an explicit lookup.
    pub fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) -> ConfigResult<()> {
        if let Some(bind) = lookup("EPISTERY_BIND") {
            self.bind = bind;
        }
        if let Some(port) = lookup("EPISTERY_PORT") {
            self.port = port.parse().map_err(|_| ConfigError::InvalidValue {
                key: "EPISTERY_PORT".into(),
                value: port.clone(),
                hint: "Use a port number between 0 and 65535.".into(),
            })?;
        }
        if let Some(dir) = lookup("EPISTERY_AGENTS_DIR") {
            self.agents_dir = Some(PathBuf::from(dir));
        }
        if let Some(token) = lookup("EPISTERY_ADMIN_TOKEN") {
            self.admin_token = Some(token).filter(|t| !t.is_empty());
        }
        Ok(())
    }

    /// `bind:port` listener address.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    /// Agents directory, falling back to the XDG data location.
    pub fn agents_dir(&self, paths: &HostPaths) -> PathBuf {
        self.agents_dir
            .clone()
            .unwrap_or_else(|| paths.default_agents_dir())
    }

    /// Per-domain state directory, falling back to the XDG config location.
    pub fn domains_dir(&self, paths: &HostPaths) -> PathBuf {
        self.domains_dir
            .clone()
            .unwrap_or_else(|| paths.default_domains_dir())
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}
