//! Presentation views over the registry for one domain.
//!
//! These only read stored metadata; they never call into agent instances.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::domain::DomainAgentState;
use crate::registry::{AgentRegistry, AgentSummary, RegistryEntry};

/// One agent as seen by a domain.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentListing {
    #[serde(flatten)]
    pub summary: AgentSummary,
    pub title: String,
    pub description: Option<String>,
    pub icon: Option<String>,
    pub widget: Option<serde_json::Value>,
    pub no_user_interface: bool,
    pub permissions: BTreeSet<String>,
    pub enabled: bool,
    pub is_default: bool,
}

/// A navigation menu item.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MenuEntry {
    pub name: String,
    pub title: String,
    pub icon: Option<String>,
    /// Short mount path of the agent.
    pub path: String,
    pub widget: Option<serde_json::Value>,
    pub is_default: bool,
}

/// Every registered agent, in load order, with this domain's flags.
pub fn list_agents(registry: &AgentRegistry, state: &DomainAgentState) -> Vec<AgentListing> {
    registry
        .iter()
        .zip(registry.summaries())
        .map(|(entry, summary)| {
            let manifest = &entry.manifest;
            AgentListing {
                summary,
                title: manifest.display_title().to_string(),
                description: manifest.description.clone(),
                icon: manifest.icon.clone(),
                widget: manifest.widget.clone(),
                no_user_interface: manifest.no_user_interface,
                permissions: manifest.permissions.clone(),
                enabled: state.is_enabled(&manifest.name),
                is_default: state.is_default(&manifest.name),
            }
        })
        .collect()
}

/// Enabled agents with a user interface. The default agent comes first,
/// the rest keep load order.
pub fn navigation_menu(registry: &AgentRegistry, state: &DomainAgentState) -> Vec<MenuEntry> {
    let mut menu: Vec<MenuEntry> = registry
        .iter()
        .filter(|e| !e.manifest.no_user_interface && state.is_enabled(&e.manifest.name))
        .map(|e| menu_entry(e, state))
        .collect();
    // Stable sort keeps registry order among the rest.
    menu.sort_by_key(|m| !m.is_default);
    menu
}

fn menu_entry(entry: &RegistryEntry, state: &DomainAgentState) -> MenuEntry {
    let manifest = &entry.manifest;
    MenuEntry {
        name: manifest.name.clone(),
        title: manifest.display_title().to_string(),
        icon: manifest.icon.clone(),
        path: entry.mount_paths.short.clone(),
        widget: manifest.widget.clone(),
        is_default: state.is_default(&manifest.name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::agent::{Agent, Capabilities};
    use crate::manifest::AgentManifest;
    use crate::namespace::MountPaths;

    struct Plain;
    impl Agent for Plain {}

    fn registry(manifests: Vec<AgentManifest>) -> AgentRegistry {
        let mut registry = AgentRegistry::new();
        for manifest in manifests {
            registry
                .insert(RegistryEntry {
                    local_name: manifest.name.trim_start_matches('@').replace('/', "-"),
                    mount_paths: MountPaths::for_manifest_name(&manifest.name).unwrap(),
                    manifest,
                    instance: Arc::new(Plain),
                    capabilities: Capabilities::default(),
                })
                .unwrap();
        }
        registry
    }

    fn manifests() -> Vec<AgentManifest> {
        let mut wiki = AgentManifest::named("@epistery/wiki");
        wiki.title = Some("Wiki".into());
        let chat = AgentManifest::named("chat");
        let mut worker = AgentManifest::named("worker");
        worker.no_user_interface = true;
        let notes = AgentManifest::named("notes");
        vec![wiki, chat, worker, notes]
    }

    #[test]
    fn listing_carries_domain_flags() {
        let registry = registry(manifests());
        let mut state = DomainAgentState::default();
        state.set_enabled("chat", false);
        state.set_default(Some("notes"));

        let listing = list_agents(&registry, &state);
        assert_eq!(listing.len(), 4);
        assert_eq!(listing[0].title, "Wiki");
        assert_eq!(listing[0].summary.mount_paths.route_name, "epistery/wiki");
        assert!(!listing[1].enabled);
        assert!(listing[3].is_default);

        let json = serde_json::to_value(&listing[0]).unwrap();
        assert_eq!(json["name"], "@epistery/wiki");
        assert_eq!(json["mountPaths"]["short"], "/agent/epistery/wiki");
        assert_eq!(json["isDefault"], false);
    }

    #[test]
    fn menu_excludes_disabled_and_headless_agents() {
        let registry = registry(manifests());
        let mut state = DomainAgentState::default();
        state.set_enabled("chat", false);

        let names: Vec<_> = navigation_menu(&registry, &state)
            .into_iter()
            .map(|m| m.name)
            .collect();
        assert_eq!(names, vec!["@epistery/wiki", "notes"]);
    }

    #[test]
    fn default_agent_leads_the_menu() {
        let registry = registry(manifests());
        let mut state = DomainAgentState::default();
        state.set_default(Some("notes"));

        let menu = navigation_menu(&registry, &state);
        let names: Vec<_> = menu.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["notes", "@epistery/wiki", "chat"]);
        assert!(menu[0].is_default);
        assert_eq!(menu[0].path, "/agent/notes");
    }
}
