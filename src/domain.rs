//! Per-domain agent state: which agents are enabled and which is the default.
//!
//! The registry is process-global; enablement is resolved per request from a
//! [`DomainStore`] and matched against the registry by manifest name.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// File name of the per-domain state inside `<domains_dir>/<domain>/`.
pub const DOMAIN_STATE_FILE: &str = "agents.toml";

#[derive(Debug, Error, Diagnostic)]
pub enum DomainError {
    #[error("invalid domain name: \"{domain}\"")]
    #[diagnostic(
        code(epistery::domain::invalid),
        help("Domain names may contain ASCII letters, digits, `-`, `.` and `:`, and no `..`.")
    )]
    InvalidDomain { domain: String },

    #[error("failed to read domain state: {path}")]
    #[diagnostic(code(epistery::domain::read))]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse domain state {path}: {message}")]
    #[diagnostic(
        code(epistery::domain::parse),
        help("Fix or delete the file; a missing file means every agent is enabled.")
    )]
    Parse { path: String, message: String },

    #[error("failed to write domain state: {path}")]
    #[diagnostic(code(epistery::domain::write))]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Agent enablement for one domain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainAgentState {
    /// Manifest name of the default agent, empty for none.
    #[serde(default)]
    pub default_agent: String,
    /// Manifest name → enabled. Absent names are enabled.
    #[serde(default)]
    pub enabled_agents: BTreeMap<String, bool>,
}

impl DomainAgentState {
    pub fn is_enabled(&self, name: &str) -> bool {
        self.enabled_agents.get(name).copied().unwrap_or(true)
    }

    pub fn set_enabled(&mut self, name: &str, enabled: bool) {
        self.enabled_agents.insert(name.to_string(), enabled);
    }

    pub fn default_agent(&self) -> Option<&str> {
        Some(self.default_agent.as_str()).filter(|s| !s.is_empty())
    }

    pub fn is_default(&self, name: &str) -> bool {
        self.default_agent() == Some(name)
    }

    /// Set or clear the default agent.
    pub fn set_default(&mut self, name: Option<&str>) {
        self.default_agent = name.unwrap_or_default().to_string();
    }
}

/// Storage for per-domain agent state.
pub trait DomainStore: Send + Sync {
    /// State for `domain`; default state when nothing was stored.
    fn load(&self, domain: &str) -> Result<DomainAgentState, DomainError>;

    fn save(&self, domain: &str, state: &DomainAgentState) -> Result<(), DomainError>;

    /// Read-modify-write. Returns the saved state.
    fn update(
        &self,
        domain: &str,
        f: &mut dyn FnMut(&mut DomainAgentState),
    ) -> Result<DomainAgentState, DomainError>;
}

/// Normalize a `Host` header value into a domain name.
///
/// Strips the port, lowercases and removes a trailing dot. IPv6 literals
/// lose their brackets (`[::1]:8080` becomes `::1`).
pub fn normalize_host(host: &str) -> Option<String> {
    let host = host.trim();
    let name = if let Some(rest) = host.strip_prefix('[') {
        rest.split(']').next().unwrap_or_default()
    } else {
        match host.rsplit_once(':') {
            Some((name, port)) if !name.contains(':') && port.bytes().all(|b| b.is_ascii_digit()) => {
                name
            }
            _ => host,
        }
    };
    let name = name.trim_end_matches('.').to_ascii_lowercase();
    (!name.is_empty()).then_some(name)
}

/// Reject names that are unsafe as a directory name.
pub fn validate_domain(domain: &str) -> Result<(), DomainError> {
    let valid = !domain.is_empty()
        && domain.len() <= 253
        && !domain.starts_with('.')
        && !domain.contains("..")
        && domain
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | ':'));
    if valid {
        Ok(())
    } else {
        Err(DomainError::InvalidDomain {
            domain: domain.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// TOML store
// ---------------------------------------------------------------------------

/// Stores each domain's state in `<root>/<domain>/agents.toml`.
#[derive(Debug)]
pub struct TomlDomainStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl TomlDomainStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn state_path(&self, domain: &str) -> Result<PathBuf, DomainError> {
        validate_domain(domain)?;
        Ok(self.root.join(domain).join(DOMAIN_STATE_FILE))
    }

    fn read(path: &Path) -> Result<DomainAgentState, DomainError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(DomainAgentState::default());
            }
            Err(e) => {
                return Err(DomainError::Read {
                    path: path.display().to_string(),
                    source: e,
                });
            }
        };
        toml::from_str(&content).map_err(|e| DomainError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    fn write(path: &Path, state: &DomainAgentState) -> Result<(), DomainError> {
        let content = toml::to_string_pretty(state).map_err(|e| DomainError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DomainError::Write {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
        std::fs::write(path, content).map_err(|e| DomainError::Write {
            path: path.display().to_string(),
            source: e,
        })
    }
}

impl DomainStore for TomlDomainStore {
    fn load(&self, domain: &str) -> Result<DomainAgentState, DomainError> {
        Self::read(&self.state_path(domain)?)
    }

    fn save(&self, domain: &str, state: &DomainAgentState) -> Result<(), DomainError> {
        let path = self.state_path(domain)?;
        let _guard = self.write_lock.lock().expect("domain store lock poisoned");
        Self::write(&path, state)
    }

    fn update(
        &self,
        domain: &str,
        f: &mut dyn FnMut(&mut DomainAgentState),
    ) -> Result<DomainAgentState, DomainError> {
        let path = self.state_path(domain)?;
        let _guard = self.write_lock.lock().expect("domain store lock poisoned");
        let mut state = Self::read(&path)?;
        f(&mut state);
        Self::write(&path, &state)?;
        tracing::debug!(domain, path = %path.display(), "domain agent state updated");
        Ok(state)
    }
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// Volatile store, for tests and single-run hosts.
#[derive(Debug, Default)]
pub struct MemoryDomainStore {
    states: RwLock<HashMap<String, DomainAgentState>>,
}

impl MemoryDomainStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DomainStore for MemoryDomainStore {
    fn load(&self, domain: &str) -> Result<DomainAgentState, DomainError> {
        validate_domain(domain)?;
        let states = self.states.read().expect("domain store lock poisoned");
        Ok(states.get(domain).cloned().unwrap_or_default())
    }

    fn save(&self, domain: &str, state: &DomainAgentState) -> Result<(), DomainError> {
        validate_domain(domain)?;
        let mut states = self.states.write().expect("domain store lock poisoned");
        states.insert(domain.to_string(), state.clone());
        Ok(())
    }

    fn update(
        &self,
        domain: &str,
        f: &mut dyn FnMut(&mut DomainAgentState),
    ) -> Result<DomainAgentState, DomainError> {
        validate_domain(domain)?;
        let mut states = self.states.write().expect("domain store lock poisoned");
        let state = states.entry(domain.to_string()).or_default();
        f(state);
        Ok(state.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_agents_are_enabled() {
        let mut state = DomainAgentState::default();
        assert!(state.is_enabled("anything"));
        assert_eq!(state.default_agent(), None);

        state.set_enabled("@epistery/wiki", false);
        state.set_default(Some("chat"));
        assert!(!state.is_enabled("@epistery/wiki"));
        assert!(state.is_default("chat"));

        state.set_default(None);
        assert_eq!(state.default_agent(), None);
    }

    #[test]
    fn host_normalization() {
        assert_eq!(normalize_host("Example.COM:8080").as_deref(), Some("example.com"));
        assert_eq!(normalize_host("example.com.").as_deref(), Some("example.com"));
        assert_eq!(normalize_host("[::1]:4080").as_deref(), Some("::1"));
        assert_eq!(normalize_host("localhost").as_deref(), Some("localhost"));
        assert_eq!(normalize_host("  "), None);
        assert_eq!(normalize_host(":80"), None);
    }

    #[test]
    fn unsafe_domains_are_rejected() {
        for domain in ["", "../etc", "a/b", ".hidden", "a..b", "white space"] {
            assert!(validate_domain(domain).is_err(), "{domain:?} should be invalid");
        }
        assert!(validate_domain("rootz.global").is_ok());
        assert!(validate_domain("::1").is_ok());
    }

    #[test]
    fn toml_store_roundtrip() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = TomlDomainStore::new(tmp.path());

        assert_eq!(store.load("example.com").unwrap(), DomainAgentState::default());

        let updated = store
            .update("example.com", &mut |s: &mut DomainAgentState| {
                s.set_enabled("@epistery/wiki", false);
                s.set_default(Some("chat"));
            })
            .unwrap();
        assert!(!updated.is_enabled("@epistery/wiki"));

        let path = tmp.path().join("example.com").join(DOMAIN_STATE_FILE);
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("defaultAgent"));

        let reloaded = store.load("example.com").unwrap();
        assert_eq!(reloaded, updated);
        assert_eq!(store.load("other.org").unwrap(), DomainAgentState::default());
    }

    #[test]
    fn toml_store_rejects_traversal() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = TomlDomainStore::new(tmp.path());
        assert!(matches!(
            store.save("../escape", &DomainAgentState::default()),
            Err(DomainError::InvalidDomain { .. })
        ));
    }

    #[test]
    fn corrupt_state_is_parse_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let dir = tmp.path().join("example.com");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(DOMAIN_STATE_FILE), "defaultAgent = [").unwrap();

        let store = TomlDomainStore::new(tmp.path());
        assert!(matches!(
            store.load("example.com"),
            Err(DomainError::Parse { .. })
        ));
    }

    #[test]
    fn memory_store_is_per_domain() {
        let store = MemoryDomainStore::new();
        store
            .update("a.test", &mut |s: &mut DomainAgentState| s.set_enabled("x", false))
            .unwrap();
        assert!(!store.load("a.test").unwrap().is_enabled("x"));
        assert!(store.load("b.test").unwrap().is_enabled("x"));
    }
}
