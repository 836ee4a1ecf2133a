//! Namespace derivation: manifest name → route name → mount paths.
//!
//! Every agent is served under two prefixes that alias the same sub-router:
//!
//! - canonical: `/.well-known/epistery/agent/<routeName>`
//! - short: `/agent/<routeName>`
//!
//! `routeName` is the manifest name with one leading `@` scope marker removed.

use serde::Serialize;

use crate::error::NamespaceError;

/// Base of the canonical mount path.
pub const WELL_KNOWN_BASE: &str = "/.well-known/epistery/agent";

/// Base of the short mount path.
pub const SHORT_BASE: &str = "/agent";

/// Scope marker stripped from the front of manifest names.
pub const SCOPE_MARKER: char = '@';

/// Strip exactly one leading scope marker.
pub fn route_name(name: &str) -> &str {
    name.strip_prefix(SCOPE_MARKER).unwrap_or(name)
}

/// The two mount points of one agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MountPaths {
    pub route_name: String,
    pub canonical: String,
    pub short: String,
}

impl MountPaths {
    /// Derive both mount paths from a manifest name.
    pub fn for_manifest_name(name: &str) -> Result<Self, NamespaceError> {
        let route = route_name(name);
        validate_route_name(route).map_err(|reason| NamespaceError::InvalidRouteName {
            name: name.to_string(),
            route_name: route.to_string(),
            reason: reason.to_string(),
        })?;

        Ok(Self {
            route_name: route.to_string(),
            canonical: format!("{WELL_KNOWN_BASE}/{route}"),
            short: format!("{SHORT_BASE}/{route}"),
        })
    }

    /// Both paths, canonical first.
    pub fn all(&self) -> [&str; 2] {
        [&self.canonical, &self.short]
    }
}

fn validate_route_name(route: &str) -> Result<(), &'static str> {
    if route.is_empty() {
        return Err("empty after removing the scope marker");
    }
    for segment in route.split('/') {
        match segment {
            "" => return Err("contains an empty path segment"),
            "." | ".." => return Err("contains a relative path segment"),
            _ => {}
        }
    }
    if !route
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '~' | '@' | '/'))
    {
        return Err("contains characters that are not allowed in a path");
    }
    Ok(())
}

/// Whether one route name is a segment-wise prefix of the other.
///
/// Nested namespaces would let one agent shadow the routes of another.
pub fn routes_nest(a: &str, b: &str) -> bool {
    let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    long.strip_prefix(short)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scoped_name_strips_one_marker() {
        assert_eq!(route_name("@scope/name"), "scope/name");
        assert_eq!(route_name("@@double"), "@double");

        let paths = MountPaths::for_manifest_name("@scope/name").unwrap();
        assert_eq!(paths.route_name, "scope/name");
        assert_eq!(paths.canonical, "/.well-known/epistery/agent/scope/name");
        assert_eq!(paths.short, "/agent/scope/name");
    }

    #[test]
    fn plain_name_is_unchanged() {
        assert_eq!(route_name("simple-agent"), "simple-agent");

        let paths = MountPaths::for_manifest_name("simple-agent").unwrap();
        assert_eq!(paths.all(), [
            "/.well-known/epistery/agent/simple-agent",
            "/agent/simple-agent"
        ]);
    }

    #[test]
    fn marker_only_in_front_is_stripped() {
        assert_eq!(route_name("name@v2"), "name@v2");
    }

    #[test]
    fn derivation_is_deterministic() {
        let a = MountPaths::for_manifest_name("@org/tool").unwrap();
        let b = MountPaths::for_manifest_name("@org/tool").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn invalid_route_names_are_rejected() {
        for name in ["@", "", "a//b", "a/../b", "trailing/", "with space", "{param}", "*"] {
            assert!(
                matches!(
                    MountPaths::for_manifest_name(name),
                    Err(NamespaceError::InvalidRouteName { .. })
                ),
                "expected {name:?} to be rejected"
            );
        }
    }

    #[test]
    fn nesting_is_segment_wise() {
        assert!(routes_nest("org", "org/tool"));
        assert!(routes_nest("org/tool", "org"));
        assert!(routes_nest("same", "same"));
        assert!(!routes_nest("org", "organ"));
        assert!(!routes_nest("a/b", "a/c"));
    }
}
