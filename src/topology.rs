//! Site → playbook → {hosts, roles} resolution.
//!
//! [`TopologyIndex`] answers the structural questions about a project:
//! which playbooks (hosts) use a role, which roles a host uses, which
//! roles carry specs, which tasks a role or host applies, and how to
//! reach a host. It keeps no state between calls; every query reads the
//! documents it needs through the [`Filesystem`] under an explicit base
//! directory.
//!
//! ```text
//! site.yml ──include──► web.yml ──► [ { name: web, hosts: webservers,
//!                                        roles: [common, nginx] } ]
//!                                                │
//!                    roles/<role>/tasks/*.yml ◄──┘
//!                    roles/<role>/spec/*_spec.rb
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use crate::config::{ProjectConfig, RunnerConfig};
use crate::diagnostics::{DiagnosticKind, DiagnosticSink};
use crate::fs::Filesystem;
use crate::inventory::{HostRecord, Inventory};
use crate::playbook::{
    DocumentError, HostProperty, HostTargets, HostsPattern, Playbook, PlaybookEntry, SiteEntry,
    Task, load_document,
};

/// Result type for topology queries.
pub type TopologyResult<T> = Result<T, TopologyError>;

/// Errors from topology queries.
///
/// Unknown role or host names are not errors for listing queries; they
/// produce empty results. These variants cover broken documents and the
/// hard preconditions of run and coverage commands.
#[derive(Debug, thiserror::Error)]
pub enum TopologyError {
    /// The site or a playbook document could not be read or parsed.
    #[error(transparent)]
    Document(#[from] DocumentError),

    /// No playbook entry or inventory host carries this name.
    #[error("Host '{0}' is not declared in any playbook or in the inventory")]
    UnknownHost(String),

    /// No playbook with this name is reachable from the site.
    #[error("Playbook '{0}' is not included from the site")]
    UnknownPlaybook(String),

    /// `roles/<role>` does not exist.
    #[error("Directory '{}' does not exist", .0.display())]
    MissingRoleDirectory(PathBuf),

    /// The role has no non-empty spec file.
    #[error("Role '{0}' has no specs")]
    NoSpecsForRole(String),
}

/// How to reach a host. Passed explicitly to the spec runner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub private_key_path: PathBuf,
    pub user: String,
}

const HOST_KEYS: &[&str] = &["ansible_ssh_host", "ansible_host"];
const PORT_KEYS: &[&str] = &["ansible_ssh_port", "ansible_port"];
const USER_KEYS: &[&str] = &["ansible_ssh_user", "ansible_user"];
const KEY_FILE_KEYS: &[&str] = &["ansible_ssh_private_key_file", "ansible_private_key_file"];

impl ConnectionConfig {
    /// Builds a connection from inventory variables, falling back to the
    /// runner defaults for anything the inventory leaves out.
    pub fn from_host(record: &HostRecord, defaults: &RunnerConfig) -> Self {
        let port = record
            .get_any(PORT_KEYS)
            .and_then(|p| p.parse().ok())
            .unwrap_or(defaults.port);

        Self {
            host: record.get_any(HOST_KEYS).unwrap_or(record.name()).to_string(),
            port,
            private_key_path: record
                .get_any(KEY_FILE_KEYS)
                .map(PathBuf::from)
                .unwrap_or_else(|| defaults.private_key_path.clone()),
            user: record
                .get_any(USER_KEYS)
                .unwrap_or(&defaults.user)
                .to_string(),
        }
    }
}

/// Structural index over one Ansible project.
#[derive(Clone)]
pub struct TopologyIndex {
    fs: Arc<dyn Filesystem>,
    project: ProjectConfig,
}

impl std::fmt::Debug for TopologyIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopologyIndex")
            .field("project", &self.project)
            .finish_non_exhaustive()
    }
}

impl TopologyIndex {
    pub fn new(fs: Arc<dyn Filesystem>, project: ProjectConfig) -> Self {
        Self { fs, project }
    }

    pub fn filesystem(&self) -> &dyn Filesystem {
        self.fs.as_ref()
    }

    pub fn base_dir(&self) -> &Path {
        &self.project.base_dir
    }

    /// Joins a project-relative path onto the base directory.
    pub fn path(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.project.base_dir.join(relative)
    }

    pub fn role_dir(&self, role: &str) -> PathBuf {
        self.path(&self.project.roles_dir).join(role)
    }

    /// Project-relative form of `roles/<role>`, used in messages.
    fn role_display(&self, role: &str) -> PathBuf {
        self.project.roles_dir.join(role)
    }

    // ----------------------------------------------------------------------
    // Sites and playbooks
    // ----------------------------------------------------------------------

    /// Every playbook reachable from the site, in site order.
    pub fn playbooks(&self) -> TopologyResult<Vec<Playbook>> {
        let site_path = self.path(&self.project.site_file);
        let site: Vec<SiteEntry> = load_document(self.filesystem(), &site_path)?;
        let site_name = file_stem(&self.project.site_file);

        let mut playbooks: Vec<Playbook> = Vec::new();
        for entry in site {
            match entry {
                SiteEntry::Include { include } => {
                    let path = self.path(&include);
                    let entries: Vec<PlaybookEntry> = load_document(self.filesystem(), &path)?;
                    tracing::debug!("Loaded playbook {} ({} plays)", path.display(), entries.len());
                    playbooks.push(Playbook {
                        name: file_stem(Path::new(&include)),
                        path,
                        entries,
                    });
                }
                SiteEntry::Play(play) => match playbooks.last_mut() {
                    Some(last) if last.path == site_path => last.entries.push(play),
                    _ => playbooks.push(Playbook {
                        name: site_name.clone(),
                        path: site_path.clone(),
                        entries: vec![play],
                    }),
                },
            }
        }

        Ok(playbooks)
    }

    /// Every play entry, flattened across playbooks.
    pub fn entries(&self) -> TopologyResult<Vec<PlaybookEntry>> {
        Ok(self
            .playbooks()?
            .into_iter()
            .flat_map(|p| p.entries)
            .collect())
    }

    /// Host names (play names) in site order.
    pub fn hosts(&self) -> TopologyResult<Vec<String>> {
        Ok(self
            .entries()?
            .into_iter()
            .map(|e| e.name)
            .filter(|n| !n.is_empty())
            .collect())
    }

    /// The first play declared for `host`.
    pub fn entry_for_host(&self, host: &str) -> TopologyResult<Option<PlaybookEntry>> {
        Ok(self.entries()?.into_iter().find(|e| e.name == host))
    }

    /// Names of the plays that list `role`, in site order.
    ///
    /// Duplicates are kept. A role nobody uses yields an empty list.
    pub fn roles_used_by(&self, role: &str) -> TopologyResult<Vec<String>> {
        Ok(self
            .entries()?
            .into_iter()
            .filter(|entry| entry.roles.iter().any(|r| r.matches(role)))
            .map(|entry| entry.name)
            .collect())
    }

    /// Spec-bearing roles of `host`, deduplicated, in role-list order.
    pub fn roles_of_host(&self, host: &str) -> TopologyResult<Vec<String>> {
        let Some(entry) = self.entry_for_host(host)? else {
            return Ok(Vec::new());
        };

        let mut seen = HashSet::new();
        Ok(entry
            .role_names()
            .filter(|role| seen.insert(role.to_string()))
            .filter(|role| self.has_specs(role))
            .map(String::from)
            .collect())
    }

    // ----------------------------------------------------------------------
    // Roles and specs
    // ----------------------------------------------------------------------

    /// Names of all role directories, sorted.
    pub fn all_roles(&self) -> Vec<String> {
        let roles_dir = self.path(&self.project.roles_dir);
        match self.fs.list_dir(&roles_dir) {
            Ok(children) => children
                .into_iter()
                .filter(|p| self.fs.is_dir(p))
                .map(|p| file_name(&p))
                .collect(),
            Err(e) => {
                tracing::debug!("No roles directory at {}: {}", roles_dir.display(), e);
                Vec::new()
            }
        }
    }

    /// Spec files of a role, sorted.
    pub fn spec_files(&self, role: &str) -> Vec<PathBuf> {
        let spec_dir = self.role_dir(role).join("spec");
        self.fs
            .list_dir(&spec_dir)
            .unwrap_or_default()
            .into_iter()
            .filter(|p| file_name(p).ends_with(&self.project.spec_suffix))
            .collect()
    }

    /// Returns `true` if any spec file of `role` has real content.
    ///
    /// A file holding a single newline does not count.
    pub fn has_specs(&self, role: &str) -> bool {
        self.spec_files(role)
            .iter()
            .any(|p| self.fs.file_size(p).is_ok_and(|size| size > 1))
    }

    /// Roles with specs, in [`all_roles`](Self::all_roles) order.
    pub fn roles_with_specs(&self) -> Vec<String> {
        self.all_roles()
            .into_iter()
            .filter(|r| self.has_specs(r))
            .collect()
    }

    /// Roles without specs, in [`all_roles`](Self::all_roles) order.
    pub fn roles_without_specs(&self) -> Vec<String> {
        let with_specs = self.roles_with_specs();
        self.all_roles()
            .into_iter()
            .filter(|r| !with_specs.contains(r))
            .collect()
    }

    /// Checks that `roles/<role>` exists, recording an error if not.
    pub fn check_role_directory_available(
        &self,
        role: &str,
        sink: &mut dyn DiagnosticSink,
    ) -> bool {
        if self.fs.is_dir(&self.role_dir(role)) {
            return true;
        }
        sink.error(
            DiagnosticKind::MissingRoleDirectory,
            format!(
                "Directory '{}' does not exist.",
                self.role_display(role).display()
            ),
        );
        false
    }

    /// Checks that `role` has specs, recording an error if not.
    pub fn check_role_specs_available(&self, role: &str, sink: &mut dyn DiagnosticSink) -> bool {
        if self.has_specs(role) {
            return true;
        }
        sink.error(
            DiagnosticKind::NoSpecsForRole,
            format!("'{}' does not have specs but specs were requested.", role),
        );
        false
    }

    /// Fails unless the role directory exists.
    pub fn require_role_directory(
        &self,
        role: &str,
        sink: &mut dyn DiagnosticSink,
    ) -> TopologyResult<()> {
        if self.check_role_directory_available(role, sink) {
            Ok(())
        } else {
            Err(TopologyError::MissingRoleDirectory(self.role_display(role)))
        }
    }

    /// Fails unless the role directory exists and holds specs.
    pub fn require_role_specs(
        &self,
        role: &str,
        sink: &mut dyn DiagnosticSink,
    ) -> TopologyResult<()> {
        self.require_role_directory(role, sink)?;
        if !self.check_role_specs_available(role, sink) {
            return Err(TopologyError::NoSpecsForRole(role.to_string()));
        }
        Ok(())
    }

    // ----------------------------------------------------------------------
    // Tasks
    // ----------------------------------------------------------------------

    /// All tasks of a role: every `*.yml`/`*.yaml` under `tasks/`,
    /// `main.yml` first, the rest by file name.
    ///
    /// Unreadable task files are reported and skipped.
    pub fn tasks_for_role(&self, role: &str, sink: &mut dyn DiagnosticSink) -> Vec<Task> {
        let tasks_dir = self.role_dir(role).join("tasks");
        let mut files: Vec<PathBuf> = self
            .fs
            .list_dir(&tasks_dir)
            .unwrap_or_default()
            .into_iter()
            .filter(|p| {
                matches!(
                    p.extension().and_then(|e| e.to_str()),
                    Some("yml") | Some("yaml")
                )
            })
            .collect();
        files.sort_by_key(|p| (file_stem(p) != "main", p.clone()));

        let mut tasks = Vec::new();
        for file in files {
            match load_document::<Vec<Task>>(self.filesystem(), &file) {
                Ok(loaded) => tasks.extend(loaded),
                Err(e) => sink.warn(DiagnosticKind::UnreadableDocument, e.to_string()),
            }
        }
        tasks
    }

    /// Tasks applied by a play: its roles' tasks in list order, then its
    /// own `tasks`.
    pub fn tasks_for_entry(
        &self,
        entry: &PlaybookEntry,
        sink: &mut dyn DiagnosticSink,
    ) -> Vec<Task> {
        let mut tasks = Vec::new();
        for role in entry.role_names() {
            tasks.extend(self.tasks_for_role(role, sink));
        }
        tasks.extend(entry.tasks.iter().cloned());
        tasks
    }

    /// Tasks applied to `host`. Unknown hosts yield no tasks.
    pub fn tasks_for_host(
        &self,
        host: &str,
        sink: &mut dyn DiagnosticSink,
    ) -> TopologyResult<Vec<Task>> {
        Ok(self
            .entry_for_host(host)?
            .map(|entry| self.tasks_for_entry(&entry, sink))
            .unwrap_or_default())
    }

    /// Tasks of every play in the named playbook.
    pub fn tasks_for_playbook(
        &self,
        name: &str,
        sink: &mut dyn DiagnosticSink,
    ) -> TopologyResult<Vec<Task>> {
        let playbook = self
            .playbooks()?
            .into_iter()
            .find(|p| p.name == name)
            .ok_or_else(|| TopologyError::UnknownPlaybook(name.to_string()))?;

        Ok(playbook
            .entries
            .iter()
            .flat_map(|entry| self.tasks_for_entry(entry, sink))
            .collect())
    }

    // ----------------------------------------------------------------------
    // Inventory and host properties
    // ----------------------------------------------------------------------

    /// Loads the inventory; an unreadable file yields an empty inventory.
    pub fn load_inventory(&self, sink: &mut dyn DiagnosticSink) -> Inventory {
        Inventory::load(self.filesystem(), &self.path(&self.project.inventory_file), sink)
    }

    /// Unresolved host properties, one per play, in site order.
    pub fn host_properties(&self) -> TopologyResult<Vec<HostProperty>> {
        Ok(self.entries()?.iter().map(HostProperty::from_entry).collect())
    }

    /// Host properties with `hosts` expanded against the inventory.
    pub fn resolved_host_properties(
        &self,
        sink: &mut dyn DiagnosticSink,
    ) -> TopologyResult<Vec<HostProperty>> {
        let inventory = self.load_inventory(sink);
        Ok(resolve_host_properties(self.host_properties()?, &inventory))
    }

    /// How to reach `host`.
    ///
    /// Uses the first inventory host the play resolves to, or an
    /// inventory host carrying the same name.
    pub fn connection_for_host(
        &self,
        host: &str,
        defaults: &RunnerConfig,
        sink: &mut dyn DiagnosticSink,
    ) -> TopologyResult<ConnectionConfig> {
        let inventory = self.load_inventory(sink);
        let properties = resolve_host_properties(self.host_properties()?, &inventory);

        let record = properties
            .iter()
            .find(|p| p.name == host)
            .and_then(|p| p.resolved_hosts().first())
            .or_else(|| inventory.host(host))
            .ok_or_else(|| TopologyError::UnknownHost(host.to_string()))?;

        Ok(ConnectionConfig::from_host(record, defaults))
    }
}

/// Expands each property's `hosts` pattern against the inventory.
///
/// - `all` expands to every inventory host.
/// - A known group expands to that group's hosts.
/// - A list of groups expands to the concatenation of the known ones,
///   each host tagged with the group it came from; properties whose list
///   expands to nothing are dropped.
/// - Anything else resolves to no hosts.
///
/// Properties that are already resolved pass through unchanged, so the
/// expansion can be applied any number of times.
pub fn resolve_host_properties(
    properties: Vec<HostProperty>,
    inventory: &Inventory,
) -> Vec<HostProperty> {
    properties
        .into_iter()
        .filter_map(|mut property| {
            let pattern = match &property.hosts {
                HostTargets::Resolved(_) => return Some(property),
                HostTargets::Pattern(pattern) => pattern.clone(),
            };

            property.hosts_childrens = inventory.children().to_vec();

            let hosts = match &pattern {
                HostsPattern::Single(_) if pattern.is_all() => inventory.hosts().to_vec(),
                HostsPattern::Single(group) => inventory.group_hosts(group).unwrap_or_default(),
                HostsPattern::Groups(groups) => {
                    let hosts: Vec<HostRecord> = groups
                        .iter()
                        .filter_map(|group| {
                            inventory.group_hosts(group).map(|members| {
                                members.into_iter().map(move |mut host| {
                                    host.group = Some(group.clone());
                                    host
                                })
                            })
                        })
                        .flatten()
                        .collect();
                    if hosts.is_empty() {
                        tracing::debug!("Dropping '{}': no inventory hosts", property.name);
                        return None;
                    }
                    hosts
                }
            };

            property.hosts = HostTargets::Resolved(hosts);
            Some(property)
        })
        .collect()
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}
