//! Typed views of site, playbook and task documents.
//!
//! These are read-only snapshots deserialized from YAML each time a query
//! needs them. Nothing here is cached or written back.
//!
//! # Document shapes
//!
//! ```yaml
//! # site.yml
//! - include: webservers.yml
//! - import_playbook: dbservers.yml
//!
//! # webservers.yml
//! - name: webservers
//!   hosts: webservers
//!   roles:
//!     - common
//!     - { role: nginx, port: 8080 }
//!   tasks:
//!     - name: motd
//!       template: src=motd.j2 dest=/etc/motd
//! ```

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

use crate::fs::Filesystem;
use crate::inventory::HostRecord;

/// Result type for document loading.
pub type DocumentResult<T> = Result<T, DocumentError>;

/// Errors raised while reading a YAML document.
#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    /// The document could not be read.
    #[error("Failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The document is not valid YAML or has an unexpected shape.
    #[error("Failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

impl DocumentError {
    /// Returns `true` if the document does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            DocumentError::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound
        )
    }
}

/// Reads a YAML document. An empty document deserializes as `T::default()`.
pub fn load_document<T>(fs: &dyn Filesystem, path: &Path) -> DocumentResult<T>
where
    T: DeserializeOwned + Default,
{
    let text = fs.read_to_string(path).map_err(|source| DocumentError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let parsed: Option<T> = serde_yaml::from_str(&text).map_err(|source| DocumentError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    Ok(parsed.unwrap_or_default())
}

/// One entry of the top-level site document.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum SiteEntry {
    /// `- include: playbook.yml` (or `import_playbook:`).
    Include {
        #[serde(alias = "import_playbook")]
        include: String,
    },

    /// A play written inline in the site document.
    Play(PlaybookEntry),
}

/// The `hosts` field of a play.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum HostsPattern {
    /// `"all"` or a single group name.
    Single(String),
    /// A list of group names.
    Groups(Vec<String>),
}

impl Default for HostsPattern {
    fn default() -> Self {
        HostsPattern::Groups(Vec::new())
    }
}

impl HostsPattern {
    pub fn is_all(&self) -> bool {
        matches!(self, HostsPattern::Single(s) if s == "all")
    }
}

/// One element of a play's `roles` list.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum RoleRef {
    /// `- nginx`
    Name(String),
    /// `- { role: nginx, port: 8080 }`
    Mapping(Mapping),
}

impl RoleRef {
    /// The role this entry refers to.
    ///
    /// Mapping entries use their `role` key, falling back to `name`.
    pub fn role_name(&self) -> Option<&str> {
        match self {
            RoleRef::Name(name) => Some(name),
            RoleRef::Mapping(map) => ["role", "name"]
                .iter()
                .find_map(|key| map.get(*key).and_then(Value::as_str)),
        }
    }

    /// Returns `true` if this entry refers to `role`.
    ///
    /// Bare names must match exactly. Mapping entries match when their
    /// `role` value contains `role` as a substring, so `nginx` also matches
    /// `{ role: nginx-proxy }`.
    pub fn matches(&self, role: &str) -> bool {
        match self {
            RoleRef::Name(name) => name == role,
            RoleRef::Mapping(map) => map
                .get("role")
                .and_then(Value::as_str)
                .is_some_and(|value| value.contains(role)),
        }
    }
}

/// A single play: one host (by name) and the roles and tasks applied to it.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct PlaybookEntry {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub hosts: HostsPattern,

    #[serde(default)]
    pub roles: Vec<RoleRef>,

    #[serde(default)]
    pub tasks: Vec<Task>,
}

impl PlaybookEntry {
    /// Role names in list order, skipping entries without one.
    pub fn role_names(&self) -> impl Iterator<Item = &str> {
        self.roles.iter().filter_map(RoleRef::role_name)
    }
}

/// A playbook document and the name it is known by.
///
/// Included playbooks are named by their file stem (`web.yml` → `web`);
/// plays written inline in the site document are named after the site.
#[derive(Debug, Clone, PartialEq)]
pub struct Playbook {
    pub name: String,
    pub path: PathBuf,
    pub entries: Vec<PlaybookEntry>,
}

/// One declarative configuration step.
///
/// A task is a mapping whose keys keep their declaration order, e.g.
/// `{ name: "create dir", file: "path=/srv state=directory" }`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct Task(pub Mapping);

impl Task {
    /// The task's `name`, if it has one.
    pub fn name(&self) -> Option<&str> {
        self.0.get("name").and_then(Value::as_str)
    }

    /// Keys in declaration order. Non-string keys are skipped.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().filter_map(Value::as_str)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }
}

impl From<Mapping> for Task {
    fn from(map: Mapping) -> Self {
        Task(map)
    }
}

/// Where a play's hosts stand: still a pattern, or expanded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum HostTargets {
    Pattern(HostsPattern),
    Resolved(Vec<HostRecord>),
}

/// Flattened per-play host properties.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HostProperty {
    /// The play's `name`.
    pub name: String,

    /// The `hosts` pattern as written in the playbook.
    pub group: HostsPattern,

    /// The play's hosts, expanded against the inventory once resolved.
    pub hosts: HostTargets,

    /// Role names in list order.
    pub roles: Vec<String>,

    /// `[group:children]` relation from the inventory, filled on resolve.
    pub hosts_childrens: Vec<(String, Vec<String>)>,
}

impl HostProperty {
    pub fn from_entry(entry: &PlaybookEntry) -> Self {
        Self {
            name: entry.name.clone(),
            group: entry.hosts.clone(),
            hosts: HostTargets::Pattern(entry.hosts.clone()),
            roles: entry.role_names().map(String::from).collect(),
            hosts_childrens: Vec::new(),
        }
    }

    /// Expanded hosts, or an empty slice if not resolved yet.
    pub fn resolved_hosts(&self) -> &[HostRecord] {
        match &self.hosts {
            HostTargets::Resolved(hosts) => hosts,
            HostTargets::Pattern(_) => &[],
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self.hosts, HostTargets::Resolved(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MemoryFilesystem;

    #[test]
    fn test_site_entries() {
        let site: Vec<SiteEntry> = serde_yaml::from_str(
            "- include: foo.yml\n- import_playbook: boo.yml\n- name: inline\n  hosts: all\n  roles: [common]\n",
        )
        .unwrap();

        assert_eq!(
            site[0],
            SiteEntry::Include {
                include: "foo.yml".to_string()
            }
        );
        assert_eq!(
            site[1],
            SiteEntry::Include {
                include: "boo.yml".to_string()
            }
        );
        match &site[2] {
            SiteEntry::Play(play) => {
                assert_eq!(play.name, "inline");
                assert!(play.hosts.is_all());
            }
            other => panic!("expected inline play, got {other:?}"),
        }
    }

    #[test]
    fn test_role_ref_matching() {
        let entry: PlaybookEntry = serde_yaml::from_str(
            "name: foo\nhosts: foo-hosts\nroles:\n  - role1\n  - { role: role4, port: 80 }\n",
        )
        .unwrap();

        assert!(entry.roles[0].matches("role1"));
        assert!(!entry.roles[0].matches("role"));
        assert!(entry.roles[1].matches("role4"));
        // Mapping entries match by substring.
        assert!(entry.roles[1].matches("role"));
        assert_eq!(entry.role_names().collect::<Vec<_>>(), vec!["role1", "role4"]);
    }

    #[test]
    fn test_hosts_pattern_shapes() {
        let single: PlaybookEntry = serde_yaml::from_str("name: a\nhosts: web\n").unwrap();
        assert_eq!(single.hosts, HostsPattern::Single("web".to_string()));

        let list: PlaybookEntry = serde_yaml::from_str("name: a\nhosts: [web, db]\n").unwrap();
        assert_eq!(
            list.hosts,
            HostsPattern::Groups(vec!["web".to_string(), "db".to_string()])
        );
    }

    #[test]
    fn test_task_keys_keep_order() {
        let task: Task =
            serde_yaml::from_str("name: t\nfile: path=/x state=directory\nbecome: true\n").unwrap();
        assert_eq!(task.keys().collect::<Vec<_>>(), vec!["name", "file", "become"]);
        assert_eq!(task.name(), Some("t"));
    }

    #[test]
    fn test_load_document_empty_is_default() {
        let fs = MemoryFilesystem::new().with_file("/p/tasks/main.yml", "---\n");
        let tasks: Vec<Task> = load_document(&fs, Path::new("/p/tasks/main.yml")).unwrap();
        assert!(tasks.is_empty());
    }

    #[test]
    fn test_load_document_errors() {
        let fs = MemoryFilesystem::new().with_file("/p/bad.yml", "- name: [unclosed\n");

        let missing = load_document::<Vec<Task>>(&fs, Path::new("/p/none.yml")).unwrap_err();
        assert!(missing.is_not_found());

        let bad = load_document::<Vec<Task>>(&fs, Path::new("/p/bad.yml")).unwrap_err();
        assert!(matches!(bad, DocumentError::Parse { .. }));
        assert!(bad.to_string().contains("/p/bad.yml"));
    }
}
