//! Agent discovery: scan the agents directory for loadable packages.
//!
//! Every direct child directory (or symlink to one) holding an
//! `epistery.json` manifest and the entry file it names becomes a
//! [`DiscoveryRecord`]. Anything else is a [`DiscoveryAnomaly`]: logged and
//! skipped, never fatal. Records are sorted by local directory name so the
//! result does not depend on the platform's listing order.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use crate::error::DiscoveryError;
use crate::manifest::{self, AgentManifest, MANIFEST_FILE};

/// A loadable agent package found on disk.
#[derive(Debug, Clone)]
pub struct DiscoveryRecord {
    /// Directory name under the agents root.
    pub local_name: String,
    /// Absolute path of the agent directory.
    pub dir: PathBuf,
    pub manifest: AgentManifest,
    /// Absolute path of the entry file.
    pub entry_path: PathBuf,
}

/// Why a candidate was skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnomalyKind {
    /// Plain file, socket, broken symlink or symlink to a non-directory.
    NotADirectory,
    /// Directory name is not valid UTF-8.
    NonUtf8Name,
    MissingManifest,
    InvalidManifest { message: String },
    /// Entry point is absolute or escapes the agent directory.
    UnsafeEntryPoint { entry_point: String },
    MissingEntryPoint { entry_point: String },
}

impl fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotADirectory => write!(f, "not a directory"),
            Self::NonUtf8Name => write!(f, "directory name is not valid UTF-8"),
            Self::MissingManifest => write!(f, "missing {MANIFEST_FILE}"),
            Self::InvalidManifest { message } => write!(f, "invalid manifest: {message}"),
            Self::UnsafeEntryPoint { entry_point } => {
                write!(f, "entry point \"{entry_point}\" leaves the agent directory")
            }
            Self::MissingEntryPoint { entry_point } => {
                write!(f, "missing entry file \"{entry_point}\"")
            }
        }
    }
}

/// A skipped candidate.
#[derive(Debug, Clone)]
pub struct DiscoveryAnomaly {
    pub local_name: String,
    pub path: PathBuf,
    pub kind: AnomalyKind,
}

/// Full scan result.
#[derive(Debug, Clone, Default)]
pub struct Discovery {
    pub records: Vec<DiscoveryRecord>,
    pub anomalies: Vec<DiscoveryAnomaly>,
}

/// Discover loadable agents under `root`.
///
/// A missing root yields an empty list. Only a root that exists but cannot be
/// listed is an error.
pub fn discover(root: &Path) -> Result<Vec<DiscoveryRecord>, DiscoveryError> {
    scan(root).map(|d| d.records)
}

/// Like [`discover`], but also reports every skipped candidate.
pub fn scan(root: &Path) -> Result<Discovery, DiscoveryError> {
    let root = std::path::absolute(root).unwrap_or_else(|_| root.to_path_buf());

    match std::fs::metadata(&root) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!(root = %root.display(), "agents directory does not exist, no agents to load");
            return Ok(Discovery::default());
        }
        Err(e) => {
            return Err(DiscoveryError::RootUnreadable {
                path: root.display().to_string(),
                source: e,
            });
        }
        Ok(meta) if !meta.is_dir() => {
            return Err(DiscoveryError::RootNotDirectory {
                path: root.display().to_string(),
            });
        }
        Ok(_) => {}
    }

    let entries = std::fs::read_dir(&root).map_err(|e| DiscoveryError::RootUnreadable {
        path: root.display().to_string(),
        source: e,
    })?;

    let mut discovery = Discovery::default();

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(root = %root.display(), error = %e, "failed to read agents directory entry, skipping");
                continue;
            }
        };
        match inspect(&entry) {
            Ok(record) => discovery.records.push(record),
            Err(anomaly) => {
                match anomaly.kind {
                    AnomalyKind::NotADirectory => tracing::debug!(
                        agent = %anomaly.local_name,
                        "skipping non-directory entry in agents directory"
                    ),
                    _ => tracing::warn!(
                        agent = %anomaly.local_name,
                        reason = %anomaly.kind,
                        "skipping agent candidate"
                    ),
                }
                discovery.anomalies.push(anomaly);
            }
        }
    }

    discovery
        .records
        .sort_by(|a, b| a.local_name.cmp(&b.local_name));
    discovery
        .anomalies
        .sort_by(|a, b| a.local_name.cmp(&b.local_name));

    tracing::debug!(
        root = %root.display(),
        records = discovery.records.len(),
        anomalies = discovery.anomalies.len(),
        "agent discovery finished"
    );

    Ok(discovery)
}

fn inspect(entry: &std::fs::DirEntry) -> Result<DiscoveryRecord, DiscoveryAnomaly> {
    let dir = entry.path();
    let raw_name = entry.file_name();
    let anomaly = |local_name: String, kind| DiscoveryAnomaly {
        local_name,
        path: dir.clone(),
        kind,
    };

    let Some(local_name) = raw_name.to_str().map(str::to_string) else {
        return Err(anomaly(
            raw_name.to_string_lossy().into_owned(),
            AnomalyKind::NonUtf8Name,
        ));
    };

    let is_dir = match entry.file_type() {
        Ok(ft) if ft.is_dir() => true,
        // Follow symlinks; broken links and links to files are skipped.
        Ok(ft) if ft.is_symlink() => std::fs::metadata(&dir).map(|m| m.is_dir()).unwrap_or(false),
        _ => false,
    };
    if !is_dir {
        return Err(anomaly(local_name, AnomalyKind::NotADirectory));
    }

    let manifest_path = dir.join(MANIFEST_FILE);
    if !manifest_path.is_file() {
        return Err(anomaly(local_name, AnomalyKind::MissingManifest));
    }

    let manifest = manifest::read_manifest(&manifest_path).map_err(|e| {
        anomaly(
            local_name.clone(),
            AnomalyKind::InvalidManifest {
                message: e.to_string(),
            },
        )
    })?;

    let entry_point = manifest.entry_point.clone();
    if !is_contained(Path::new(&entry_point)) {
        return Err(anomaly(local_name, AnomalyKind::UnsafeEntryPoint { entry_point }));
    }

    let entry_path = dir.join(&entry_point);
    if !entry_path.is_file() {
        return Err(anomaly(local_name, AnomalyKind::MissingEntryPoint { entry_point }));
    }
    if !resolves_inside(&dir, &entry_path) {
        return Err(anomaly(local_name, AnomalyKind::UnsafeEntryPoint { entry_point }));
    }

    Ok(DiscoveryRecord {
        local_name,
        dir,
        manifest,
        entry_path,
    })
}

/// Relative path made only of normal components.
fn is_contained(path: &Path) -> bool {
    path.components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
        && path.components().any(|c| matches!(c, Component::Normal(_)))
}

/// `path` still lies under `dir` once symlinks are resolved.
fn resolves_inside(dir: &Path, path: &Path) -> bool {
    match (dir.canonicalize(), path.canonicalize()) {
        (Ok(dir), Ok(path)) => path.starts_with(dir),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_agent(root: &Path, dir: &str, manifest: &str, entry: Option<&str>) {
        let agent_dir = root.join(dir);
        std::fs::create_dir_all(&agent_dir).unwrap();
        std::fs::write(agent_dir.join(MANIFEST_FILE), manifest).unwrap();
        if let Some(entry) = entry {
            std::fs::write(agent_dir.join("entry.toml"), entry).unwrap();
        }
    }

    #[test]
    fn missing_root_is_empty() {
        let dir = TempDir::new().unwrap();
        let records = discover(&dir.path().join("does-not-exist")).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn root_that_is_a_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("agents");
        std::fs::write(&file, "").unwrap();
        assert!(matches!(
            discover(&file),
            Err(DiscoveryError::RootNotDirectory { .. })
        ));
    }

    #[test]
    fn finds_valid_agents_in_name_order() {
        let dir = TempDir::new().unwrap();
        write_agent(dir.path(), "zeta", r#"{"name": "zeta"}"#, Some("factory = \"echo\""));
        write_agent(dir.path(), "alpha", r#"{"name": "alpha"}"#, Some("factory = \"echo\""));
        write_agent(dir.path(), "mid", r#"{"name": "@org/mid"}"#, Some("factory = \"echo\""));

        let records = discover(dir.path()).unwrap();
        let names: Vec<_> = records.iter().map(|r| r.local_name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);

        let mid = &records[1];
        assert_eq!(mid.manifest.name, "@org/mid");
        assert!(mid.dir.is_absolute());
        assert_eq!(mid.entry_path, mid.dir.join("entry.toml"));

        // Same listing, same order.
        let again: Vec<_> = discover(dir.path())
            .unwrap()
            .into_iter()
            .map(|r| r.local_name)
            .collect();
        assert_eq!(again, names);
    }

    #[test]
    fn incomplete_candidates_are_skipped() {
        let dir = TempDir::new().unwrap();
        write_agent(dir.path(), "good", r#"{"name": "good"}"#, Some("factory = \"echo\""));
        write_agent(dir.path(), "no-entry", r#"{"name": "no-entry"}"#, None);
        std::fs::create_dir(dir.path().join("no-manifest")).unwrap();
        std::fs::write(dir.path().join("no-manifest").join("entry.toml"), "").unwrap();
        std::fs::write(dir.path().join("README.md"), "not an agent").unwrap();

        let discovery = scan(dir.path()).unwrap();
        assert_eq!(discovery.records.len(), 1);
        assert_eq!(discovery.records[0].local_name, "good");

        let kinds: Vec<_> = discovery
            .anomalies
            .iter()
            .map(|a| (a.local_name.as_str(), a.kind.clone()))
            .collect();
        assert!(kinds.contains(&("README.md", AnomalyKind::NotADirectory)));
        assert!(kinds.contains(&("no-manifest", AnomalyKind::MissingManifest)));
        assert!(kinds.contains(&(
            "no-entry",
            AnomalyKind::MissingEntryPoint {
                entry_point: "entry.toml".into()
            }
        )));
    }

    #[test]
    fn corrupt_manifest_does_not_affect_siblings() {
        let dir = TempDir::new().unwrap();
        write_agent(dir.path(), "a", r#"{"name": "a"}"#, Some(""));
        write_agent(dir.path(), "broken", "{ this is not json", Some(""));
        write_agent(dir.path(), "c", r#"{"name": "c"}"#, Some(""));

        let discovery = scan(dir.path()).unwrap();
        let names: Vec<_> = discovery.records.iter().map(|r| r.local_name.as_str()).collect();
        assert_eq!(names, vec!["a", "c"]);
        assert!(matches!(
            discovery.anomalies[0].kind,
            AnomalyKind::InvalidManifest { .. }
        ));
    }

    #[test]
    fn entry_point_cannot_escape_agent_dir() {
        let dir = TempDir::new().unwrap();
        write_agent(
            dir.path(),
            "sneaky",
            r#"{"name": "sneaky", "entryPoint": "../other/entry.toml"}"#,
            Some(""),
        );

        let discovery = scan(dir.path()).unwrap();
        assert!(discovery.records.is_empty());
        assert!(matches!(
            discovery.anomalies[0].kind,
            AnomalyKind::UnsafeEntryPoint { .. }
        ));
    }

    #[test]
    fn custom_entry_point_is_resolved() {
        let dir = TempDir::new().unwrap();
        write_agent(
            dir.path(),
            "custom",
            r#"{"name": "custom", "entryPoint": "conf/agent.toml"}"#,
            None,
        );
        let conf = dir.path().join("custom").join("conf");
        std::fs::create_dir(&conf).unwrap();
        std::fs::write(conf.join("agent.toml"), "factory = \"echo\"").unwrap();

        let records = discover(dir.path()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].entry_path, conf.join("agent.toml"));
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_agent_directories_are_followed() {
        let store = TempDir::new().unwrap();
        write_agent(store.path(), "real", r#"{"name": "linked"}"#, Some(""));
        std::fs::write(store.path().join("plain.txt"), "").unwrap();

        let root = TempDir::new().unwrap();
        std::os::unix::fs::symlink(store.path().join("real"), root.path().join("linked")).unwrap();
        std::os::unix::fs::symlink(store.path().join("plain.txt"), root.path().join("file-link"))
            .unwrap();
        std::os::unix::fs::symlink(store.path().join("gone"), root.path().join("dangling"))
            .unwrap();

        let discovery = scan(root.path()).unwrap();
        assert_eq!(discovery.records.len(), 1);
        assert_eq!(discovery.records[0].local_name, "linked");
        assert_eq!(discovery.records[0].manifest.name, "linked");
        assert_eq!(discovery.anomalies.len(), 2);
        assert!(discovery
            .anomalies
            .iter()
            .all(|a| a.kind == AnomalyKind::NotADirectory));
    }

    #[cfg(unix)]
    #[test]
    fn entry_file_symlinked_outside_the_agent_is_refused() {
        let outside = TempDir::new().unwrap();
        std::fs::write(outside.path().join("secret.toml"), "factory = \"echo\"").unwrap();

        let root = TempDir::new().unwrap();
        write_agent(root.path(), "sneaky", r#"{"name": "sneaky"}"#, None);
        std::os::unix::fs::symlink(
            outside.path().join("secret.toml"),
            root.path().join("sneaky").join("entry.toml"),
        )
        .unwrap();
        write_agent(root.path(), "inner", r#"{"name": "inner"}"#, None);
        std::fs::write(root.path().join("inner").join("real.toml"), "factory = \"echo\"").unwrap();
        std::os::unix::fs::symlink(
            root.path().join("inner").join("real.toml"),
            root.path().join("inner").join("entry.toml"),
        )
        .unwrap();

        let discovery = scan(root.path()).unwrap();
        assert_eq!(discovery.records.len(), 1);
        assert_eq!(discovery.records[0].local_name, "inner");
        assert_eq!(discovery.anomalies.len(), 1);
        assert_eq!(discovery.anomalies[0].local_name, "sneaky");
        assert!(matches!(
            discovery.anomalies[0].kind,
            AnomalyKind::UnsafeEntryPoint { .. }
        ));
    }
}
