//! XDG-compliant path resolution for the host.
//!
//! Provides `HostPaths`: the config, data and state directories the host
//! falls back to when `config.toml` does not name explicit locations.

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

/// Errors from path resolution.
#[derive(Debug, Error, Diagnostic)]
pub enum PathError {
    #[error("cannot determine home directory")]
    #[diagnostic(
        code(epistery::paths::no_home),
        help("Set the HOME environment variable or ensure a valid user profile exists.")
    )]
    NoHome,

    #[error("failed to create directory: {path}")]
    #[diagnostic(
        code(epistery::paths::create_dir),
        help("Check that the parent directory exists and you have write permissions.")
    )]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub type PathResult<T> = std::result::Result<T, PathError>;

/// Global XDG-compliant directories for the host.
#[derive(Debug, Clone)]
pub struct HostPaths {
    /// `$XDG_CONFIG_HOME/epistery/`
    pub config_dir: PathBuf,
    /// `$XDG_DATA_HOME/epistery/`
    pub data_dir: PathBuf,
    /// `$XDG_STATE_HOME/epistery/`
    pub state_dir: PathBuf,
}

impl HostPaths {
    /// Resolve XDG directories from environment variables with standard fallbacks.
    pub fn resolve() -> PathResult<Self> {
        Self::resolve_with(|key| std::env::var(key).ok())
    }

    /// Resolve using an explicit variable lookup. Lets tests avoid mutating
    /// the process environment.
    pub fn resolve_with(lookup: impl Fn(&str) -> Option<String>) -> PathResult<Self> {
        let home = lookup("HOME").map(PathBuf::from).ok_or(PathError::NoHome)?;

        let xdg = |key: &str, fallback: &str| {
            lookup(key)
                .map(PathBuf::from)
                .unwrap_or_else(|| home.join(fallback))
                .join("epistery")
        };

        Ok(Self {
            config_dir: xdg("XDG_CONFIG_HOME", ".config"),
            data_dir: xdg("XDG_DATA_HOME", ".local/share"),
            state_dir: xdg("XDG_STATE_HOME", ".local/state"),
        })
    }

    /// Create all base directories. Idempotent.
    pub fn ensure_dirs(&self) -> PathResult<()> {
        for dir in [
            &self.config_dir,
            &self.data_dir,
            &self.state_dir,
            &self.default_agents_dir(),
            &self.default_domains_dir(),
        ] {
            std::fs::create_dir_all(dir).map_err(|e| PathError::CreateDir {
                path: dir.display().to_string(),
                source: e,
            })?;
        }
        Ok(())
    }

    /// Path to the host config file.
    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }

    /// Where agent packages live unless configured otherwise.
    pub fn default_agents_dir(&self) -> PathBuf {
        self.data_dir.join("agents")
    }

    /// Where per-domain agent state lives unless configured otherwise.
    pub fn default_domains_dir(&self) -> PathBuf {
        self.config_dir.join("domains")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_fall_back_to_home() {
        let paths = HostPaths::resolve_with(|key| match key {
            "HOME" => Some("/home/alice".into()),
            _ => None,
        })
        .unwrap();

        assert_eq!(paths.config_dir, PathBuf::from("/home/alice/.config/epistery"));
        assert_eq!(
            paths.data_dir,
            PathBuf::from("/home/alice/.local/share/epistery")
        );
        assert_eq!(
            paths.default_agents_dir(),
            PathBuf::from("/home/alice/.local/share/epistery/agents")
        );
        assert_eq!(
            paths.config_file(),
            PathBuf::from("/home/alice/.config/epistery/config.toml")
        );
    }

    #[test]
    fn xdg_overrides_win() {
        let paths = HostPaths::resolve_with(|key| match key {
            "HOME" => Some("/home/alice".into()),
            "XDG_CONFIG_HOME" => Some("/cfg".into()),
            "XDG_DATA_HOME" => Some("/data".into()),
            _ => None,
        })
        .unwrap();

        assert_eq!(paths.config_dir, PathBuf::from("/cfg/epistery"));
        assert_eq!(paths.default_domains_dir(), PathBuf::from("/cfg/epistery/domains"));
        assert_eq!(paths.data_dir, PathBuf::from("/data/epistery"));
    }

    #[test]
    fn missing_home_is_an_error() {
        let result = HostPaths::resolve_with(|_| None);
        assert!(matches!(result, Err(PathError::NoHome)));
    }

    #[test]
    fn ensure_dirs_creates_layout() {
        let dir = tempfile::TempDir::new().unwrap();
        let root = dir.path().to_string_lossy().to_string();
        let paths = HostPaths::resolve_with(|key| match key {
            "HOME" => Some(root.clone()),
            _ => None,
        })
        .unwrap();

        paths.ensure_dirs().unwrap();
        assert!(paths.default_agents_dir().is_dir());
        assert!(paths.default_domains_dir().is_dir());
        // Idempotent.
        paths.ensure_dirs().unwrap();
    }
}
