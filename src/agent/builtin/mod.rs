//! Agents shipped with the host and registered in [`AgentCatalog::builtin`].
//!
//! [`AgentCatalog::builtin`]: super::AgentCatalog::builtin

pub mod echo;
pub mod heartbeat;

use serde::de::DeserializeOwned;

use crate::error::AgentError;

/// Deserialize an agent's merged configuration object.
pub(crate) fn parse_config<T: DeserializeOwned>(config: &serde_json::Value) -> Result<T, AgentError> {
    serde_json::from_value(config.clone()).map_err(|e| AgentError::InvalidConfig {
        message: e.to_string(),
    })
}
