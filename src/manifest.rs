//! Agent manifest (`epistery.json`) parsing and validation.

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ManifestError;

/// File name of the manifest inside every agent directory.
pub const MANIFEST_FILE: &str = "epistery.json";

/// Entry file used when the manifest does not name one.
pub const DEFAULT_ENTRY_POINT: &str = "entry.toml";

/// Declarative descriptor of an agent package.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentManifest {
    /// Globally unique identifier, optionally scoped (`@org/agent`).
    /// Empty when absent; the loader rejects such agents.
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    /// Entry file relative to the agent directory.
    #[serde(default = "default_entry_point")]
    pub entry_point: String,
    /// Carried for tooling; the host never runs it.
    #[serde(default)]
    pub start_command: Option<String>,
    /// Passed verbatim to the agent constructor.
    #[serde(default)]
    pub config: Option<serde_json::Map<String, serde_json::Value>>,
    /// Declared capabilities. Informational only.
    #[serde(default)]
    pub permissions: BTreeSet<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub widget: Option<serde_json::Value>,
    #[serde(default)]
    pub no_user_interface: bool,
}

fn default_entry_point() -> String {
    DEFAULT_ENTRY_POINT.into()
}

impl AgentManifest {
    /// Minimal manifest with the given name and defaults elsewhere.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: String::new(),
            entry_point: default_entry_point(),
            start_command: None,
            config: None,
            permissions: BTreeSet::new(),
            title: None,
            description: None,
            icon: None,
            widget: None,
            no_user_interface: false,
        }
    }

    /// Whether the manifest carries a usable `name`.
    pub fn has_name(&self) -> bool {
        !self.name.trim().is_empty()
    }

    /// Title for menus, falling back to the manifest name.
    pub fn display_title(&self) -> &str {
        self.title
            .as_deref()
            .filter(|t| !t.is_empty())
            .unwrap_or(&self.name)
    }

    /// The constructor configuration as a JSON object (empty when absent).
    pub fn config_value(&self) -> serde_json::Value {
        serde_json::Value::Object(self.config.clone().unwrap_or_default())
    }
}

/// Read and validate a manifest file.
///
/// Missing `name` is not checked here: it is a per-agent load failure.
pub fn read_manifest(path: &Path) -> Result<AgentManifest, ManifestError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ManifestError::NotFound {
                path: path.display().to_string(),
            }
        } else {
            ManifestError::Io {
                path: path.display().to_string(),
                source: e,
            }
        }
    })?;
    parse_manifest(&content, path)
}

/// Parse manifest contents. `path` is used for diagnostics only.
pub fn parse_manifest(content: &str, path: &Path) -> Result<AgentManifest, ManifestError> {
    let invalid = |message: String| ManifestError::InvalidJson {
        path: path.display().to_string(),
        message,
    };

    let value: serde_json::Value =
        serde_json::from_str(content).map_err(|e| invalid(e.to_string()))?;
    if !value.is_object() {
        return Err(invalid("expected a JSON object".into()));
    }

    let manifest: AgentManifest =
        serde_json::from_value(value).map_err(|e| invalid(e.to_string()))?;

    if manifest.entry_point.trim().is_empty() {
        return Err(ManifestError::MissingRequiredField {
            path: path.display().to_string(),
            field: "entryPoint".into(),
        });
    }

    Ok(manifest)
}
