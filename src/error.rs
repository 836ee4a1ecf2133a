//! Rich diagnostic error types for the epistery host.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes and help text. Per-agent errors ([`LoadError`],
//! [`AgentError`]) are contained by the lifecycle controller; only
//! [`HostError`] reaches the binary.

use miette::Diagnostic;
use thiserror::Error;

use crate::config::ConfigError;
use crate::domain::DomainError;
use crate::paths::PathError;

/// Top-level error type for the host.
///
/// Each variant wraps a subsystem-specific error, preserving the full diagnostic
/// chain (error codes, help text) through to the user.
#[derive(Debug, Error, Diagnostic)]
pub enum HostError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Namespace(#[from] NamespaceError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Path(#[from] PathError),

    #[error("failed to bind listener on {addr}")]
    #[diagnostic(
        code(epistery::server::bind),
        help(
            "Another process may already be listening on this address. \
             Choose a different port with `--port` or `EPISTERY_PORT`."
        )
    )]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {source}")]
    #[diagnostic(code(epistery::server::io))]
    Serve {
        #[source]
        source: std::io::Error,
    },
}

// ---------------------------------------------------------------------------
// Manifest errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ManifestError {
    #[error("manifest not found: {path}")]
    #[diagnostic(
        code(epistery::manifest::not_found),
        help("Every agent directory must contain an `epistery.json` manifest.")
    )]
    NotFound { path: String },

    #[error("failed to read manifest {path}")]
    #[diagnostic(
        code(epistery::manifest::io),
        help("Check that the manifest file is readable by the host process.")
    )]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid manifest JSON at {path}: {message}")]
    #[diagnostic(
        code(epistery::manifest::invalid_json),
        help(
            "The manifest must be a JSON object. `config` must be an object and \
             `permissions` an array of strings when present."
        )
    )]
    InvalidJson { path: String, message: String },

    #[error("manifest {path} is missing required field `{field}`")]
    #[diagnostic(
        code(epistery::manifest::missing_field),
        help("Add a non-empty `{field}` to the manifest.")
    )]
    MissingRequiredField { path: String, field: String },
}

// ---------------------------------------------------------------------------
// Discovery errors
// ---------------------------------------------------------------------------

/// Fatal discovery failures. A missing agents root is not an error.
#[derive(Debug, Error, Diagnostic)]
pub enum DiscoveryError {
    #[error("cannot read agents directory {path}")]
    #[diagnostic(
        code(epistery::discovery::unreadable),
        help("The agents directory exists but could not be listed. Check its permissions.")
    )]
    RootUnreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("agents root {path} is not a directory")]
    #[diagnostic(
        code(epistery::discovery::not_a_directory),
        help("Point `agents_dir` at a directory containing one subdirectory per agent.")
    )]
    RootNotDirectory { path: String },
}

// ---------------------------------------------------------------------------
// Namespace errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum NamespaceError {
    #[error("invalid route name \"{route_name}\" derived from \"{name}\": {reason}")]
    #[diagnostic(
        code(epistery::namespace::invalid_route),
        help(
            "Route names may contain ASCII letters, digits, `-`, `_`, `.`, `~`, `@` \
             and `/` separators between non-empty segments."
        )
    )]
    InvalidRouteName {
        name: String,
        route_name: String,
        reason: String,
    },

    #[error("route \"{route_name}\" of agent \"{local_name}\" is already served by \"{existing}\"")]
    #[diagnostic(
        code(epistery::namespace::collision),
        help(
            "Two agents resolve to the same mount path. Rename one of them in its \
             `epistery.json`; the agent loaded first keeps the route."
        )
    )]
    RouteCollision {
        route_name: String,
        local_name: String,
        existing: String,
    },

    #[error("route \"{route_name}\" of agent \"{local_name}\" nests with \"{other}\" served by \"{existing}\"")]
    #[diagnostic(
        code(epistery::namespace::overlap),
        help("One route name is a path prefix of the other. Choose non-nested agent names.")
    )]
    RouteOverlap {
        route_name: String,
        local_name: String,
        other: String,
        existing: String,
    },

    #[error("agent name \"{name}\" of \"{local_name}\" is already registered by \"{existing}\"")]
    #[diagnostic(
        code(epistery::namespace::duplicate_name),
        help("Manifest names must be unique across the agents directory.")
    )]
    DuplicateName {
        name: String,
        local_name: String,
        existing: String,
    },

    #[error("agent directory \"{local_name}\" is already registered")]
    #[diagnostic(code(epistery::namespace::duplicate_local_name))]
    DuplicateLocalName { local_name: String },
}

// ---------------------------------------------------------------------------
// Agent errors
// ---------------------------------------------------------------------------

/// Errors raised by agent implementations themselves.
#[derive(Debug, Error, Diagnostic)]
pub enum AgentError {
    #[error("invalid agent configuration: {message}")]
    #[diagnostic(
        code(epistery::agent::invalid_config),
        help("Check the `config` object in the agent's manifest and entry file.")
    )]
    InvalidConfig { message: String },

    #[error("agent runtime error: {message}")]
    #[diagnostic(code(epistery::agent::runtime))]
    Runtime { message: String },

    #[error("agent panicked: {message}")]
    #[diagnostic(
        code(epistery::agent::panicked),
        help("The agent implementation panicked. This is a bug in the agent.")
    )]
    Panicked { message: String },
}

impl AgentError {
    /// Build an [`AgentError::Panicked`] from a caught panic payload.
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        Self::Panicked { message }
    }
}

// ---------------------------------------------------------------------------
// Load errors
// ---------------------------------------------------------------------------

/// Per-agent load failure. Never fatal to the host.
#[derive(Debug, Error, Diagnostic)]
pub enum LoadError {
    #[error("agent \"{local_name}\" has no `name` in its manifest")]
    #[diagnostic(
        code(epistery::load::missing_name),
        help("Add a non-empty `name` to the agent's `epistery.json`.")
    )]
    MissingName { local_name: String },

    #[error("failed to import agent \"{local_name}\": {message}")]
    #[diagnostic(
        code(epistery::load::import),
        help(
            "The entry file must be TOML with a `factory` key naming an agent \
             factory registered in the host's catalog."
        )
    )]
    ImportFailure { local_name: String, message: String },

    #[error("constructor of agent \"{local_name}\" failed")]
    #[diagnostic(code(epistery::load::constructor))]
    ConstructorFailed {
        local_name: String,
        #[source]
        source: AgentError,
    },

    #[error("agent \"{local_name}\" failed to attach its routes")]
    #[diagnostic(code(epistery::load::attach))]
    AttachFailed {
        local_name: String,
        #[source]
        source: AgentError,
    },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Namespace(#[from] NamespaceError),
}

impl LoadError {
    /// Local directory name of the agent that failed, if known.
    pub fn local_name(&self) -> Option<&str> {
        match self {
            Self::MissingName { local_name }
            | Self::ImportFailure { local_name, .. }
            | Self::ConstructorFailed { local_name, .. }
            | Self::AttachFailed { local_name, .. } => Some(local_name),
            Self::Namespace(
                NamespaceError::RouteCollision { local_name, .. }
                | NamespaceError::RouteOverlap { local_name, .. }
                | NamespaceError::DuplicateName { local_name, .. }
                | NamespaceError::DuplicateLocalName { local_name },
            ) => Some(local_name),
            Self::Namespace(NamespaceError::InvalidRouteName { .. }) => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Lifecycle errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum LifecycleError {
    #[error("invalid lifecycle transition: {from} -> {to}")]
    #[diagnostic(
        code(epistery::lifecycle::transition),
        help("The host moves Idle → Discovering → Loading → Active → ShuttingDown → Stopped.")
    )]
    InvalidTransition { from: String, to: String },
}

/// Convenience alias for functions returning host results.
pub type HostResult<T> = std::result::Result<T, HostError>;
