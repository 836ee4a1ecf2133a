//! Entry files: the on-disk pointer from an agent package to a registered factory.
//!
//! ```toml
//! factory = "echo"
//!
//! [config]
//! greeting = "hello"
//! ```
//!
//! The `[config]` table provides defaults; keys in the manifest's `config`
//! object take precedence.

use std::path::Path;

use miette::Diagnostic;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum EntryError {
    #[error("failed to read entry file {path}")]
    #[diagnostic(code(epistery::entry::read))]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse entry file {path}: {message}")]
    #[diagnostic(
        code(epistery::entry::parse),
        help("The entry file must be TOML with a string `factory` key.")
    )]
    Parse { path: String, message: String },

    #[error("entry file {path} names no factory")]
    #[diagnostic(code(epistery::entry::missing_factory))]
    MissingFactory { path: String },
}

/// Parsed entry file.
#[derive(Debug, Clone, Deserialize)]
pub struct EntryFile {
    #[serde(default)]
    pub factory: String,
    #[serde(default)]
    pub config: toml::Table,
}

impl EntryFile {
    pub fn read(path: &Path) -> Result<Self, EntryError> {
        let content = std::fs::read_to_string(path).map_err(|e| EntryError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::parse(&content, path)
    }

    pub fn parse(content: &str, path: &Path) -> Result<Self, EntryError> {
        let entry: Self = toml::from_str(content).map_err(|e| EntryError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        if entry.factory.trim().is_empty() {
            return Err(EntryError::MissingFactory {
                path: path.display().to_string(),
            });
        }
        Ok(entry)
    }

    /// Merge the entry defaults under the manifest configuration.
    pub fn merged_config(
        &self,
        manifest_config: Option<&serde_json::Map<String, serde_json::Value>>,
    ) -> serde_json::Value {
        let mut merged = match serde_json::to_value(&self.config) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        };
        if let Some(overrides) = manifest_config {
            for (key, value) in overrides {
                merged.insert(key.clone(), value.clone());
            }
        }
        serde_json::Value::Object(merged)
    }
}
