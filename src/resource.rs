//! Resource extraction from task lists.
//!
//! Each task names one Ansible module. For the modules listed in
//! [`KNOWN_RESOURCE_TYPES`] the task manages an identifiable resource
//! (a file, a service, a package, a container) that a spec can describe.
//! [`extract`] turns a task list into those [`ResourceDescriptor`]s, in
//! task order, and reports every task it could not use to a
//! [`DiagnosticSink`].
//!
//! | Module | Kind | Name taken from |
//! |--------|------|-----------------|
//! | `file`, `template` | `File` | `path`, else `dest` |
//! | `docker_container` | `Docker container` | `name` |
//! | `docker_image` | `Docker image` | `name` |
//! | `service` | `Service` | `name` (mapping) or first token (inline) |
//! | `apt`, `pip`, `gem` | `Package` | `name` |
//!
//! Tasks whose arguments still contain a `{{` template marker are skipped:
//! their resource cannot be known without running Ansible.

use std::fmt;

use serde::{Serialize, Serializer};
use serde_yaml::Value;

use crate::diagnostics::{DiagnosticKind, DiagnosticSink};
use crate::playbook::Task;

/// Modules whose tasks manage an identifiable resource.
pub const KNOWN_RESOURCE_TYPES: &[&str] = &[
    "file",
    "template",
    "docker_container",
    "docker_image",
    "service",
    "apt",
    "pip",
    "gem",
];

const TEMPLATE_MARKER: &str = "{{";

/// Kind of a managed resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    File,
    DockerContainer,
    DockerImage,
    Service,
    Package,
}

impl ResourceKind {
    /// Maps a module name to the resource kind it manages.
    pub fn from_module(module: &str) -> Option<Self> {
        match module {
            "file" | "template" => Some(ResourceKind::File),
            "docker_container" => Some(ResourceKind::DockerContainer),
            "docker_image" => Some(ResourceKind::DockerImage),
            "service" => Some(ResourceKind::Service),
            "apt" | "pip" | "gem" => Some(ResourceKind::Package),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::File => "File",
            ResourceKind::DockerContainer => "Docker container",
            ResourceKind::DockerImage => "Docker image",
            ResourceKind::Service => "Service",
            ResourceKind::Package => "Package",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical identity of a resource, rendered as `Kind "name"`.
///
/// # Example
///
/// ```
/// use specplus::resource::{ResourceDescriptor, ResourceKind};
///
/// let descriptor = ResourceDescriptor::new(ResourceKind::DockerImage, "redis:7");
/// assert_eq!(descriptor.to_string(), "Docker image \"redis:7\"");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceDescriptor {
    pub kind: ResourceKind,
    pub name: String,
}

impl ResourceDescriptor {
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} \"{}\"", self.kind, self.name)
    }
}

impl Serialize for ResourceDescriptor {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A single attribute value of a mapping-shaped task argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrValue {
    Str(String),
    Bool(bool),
}

impl AttrValue {
    fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Str(s) => Some(s),
            AttrValue::Bool(_) => None,
        }
    }

    fn is_templated(&self) -> bool {
        self.as_str().is_some_and(|s| s.contains(TEMPLATE_MARKER))
    }
}

/// The arguments a task passes to its module.
///
/// ```yaml
/// file: path=/srv state=directory      # Scalar
/// file: { path: /srv, state: directory } # Mapping
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentifyingValue {
    /// Inline `key=value` tokens.
    Scalar(String),
    /// Attributes in declaration order.
    Mapping(Vec<(String, AttrValue)>),
}

impl IdentifyingValue {
    /// Converts a YAML module argument.
    ///
    /// Numbers become strings, `null` becomes an empty mapping, and nested
    /// collections are flattened to their YAML text so template markers
    /// inside them are still visible.
    pub fn from_yaml(value: &Value) -> Self {
        match value {
            Value::Mapping(map) => IdentifyingValue::Mapping(
                map.iter()
                    .filter_map(|(k, v)| Some((scalar_text(k)?, attr_value(v))))
                    .collect(),
            ),
            Value::Null => IdentifyingValue::Mapping(Vec::new()),
            other => {
                IdentifyingValue::Scalar(scalar_text(other).unwrap_or_else(|| yaml_text(other)))
            }
        }
    }

    /// Returns `true` if any value still contains a `{{` marker.
    pub fn is_templated(&self) -> bool {
        match self {
            IdentifyingValue::Scalar(s) => s.contains(TEMPLATE_MARKER),
            IdentifyingValue::Mapping(attrs) => attrs.iter().any(|(_, v)| v.is_templated()),
        }
    }

    /// Value of the first attribute named in `keys`, by declaration order.
    ///
    /// For the scalar form this scans the `key=value` tokens and strips the
    /// `key=` prefix from the first match.
    pub fn lookup(&self, keys: &[&str]) -> Option<&str> {
        match self {
            IdentifyingValue::Mapping(attrs) => attrs
                .iter()
                .find(|(k, _)| keys.contains(&k.as_str()))
                .and_then(|(_, v)| v.as_str()),
            IdentifyingValue::Scalar(s) => s.split_whitespace().find_map(|token| {
                let (key, value) = token.split_once('=')?;
                keys.contains(&key).then_some(value)
            }),
        }
    }

    /// First whitespace token of a scalar, with any `key=` prefix removed.
    fn first_token(&self) -> Option<&str> {
        match self {
            IdentifyingValue::Scalar(s) => s
                .split_whitespace()
                .next()
                .map(|token| token.split_once('=').map_or(token, |(_, v)| v)),
            IdentifyingValue::Mapping(_) => None,
        }
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn yaml_text(value: &Value) -> String {
    serde_yaml::to_string(value)
        .map(|s| s.trim_end().to_string())
        .unwrap_or_default()
}

fn attr_value(value: &Value) -> AttrValue {
    match value {
        Value::Bool(b) => AttrValue::Bool(*b),
        Value::Null => AttrValue::Str(String::new()),
        other => AttrValue::Str(scalar_text(other).unwrap_or_else(|| yaml_text(other))),
    }
}

/// Extracts resource descriptors from tasks, in task order.
///
/// Duplicates are kept; callers deduplicate if they need a set. Tasks that
/// cannot yield a descriptor are reported to `sink` and skipped; they never
/// stop extraction of the remaining tasks.
///
/// # Example
///
/// ```
/// use specplus::diagnostics::Diagnostics;
/// use specplus::playbook::Task;
/// use specplus::resource::extract;
///
/// let tasks: Vec<Task> = serde_yaml::from_str(r#"
/// - name: ssh dir
///   file: path=/git/.ssh state=directory owner=git group=git mode=0755
/// - name: templated
///   file: { path: "{{ home }}/.ssh" }
/// "#).unwrap();
///
/// let mut diagnostics = Diagnostics::new();
/// let resources = extract(&tasks, &mut diagnostics);
///
/// assert_eq!(resources.len(), 1);
/// assert_eq!(resources[0].to_string(), "File \"/git/.ssh\"");
/// assert_eq!(diagnostics.len(), 1);
/// ```
pub fn extract(tasks: &[Task], sink: &mut dyn DiagnosticSink) -> Vec<ResourceDescriptor> {
    tasks
        .iter()
        .filter_map(|task| extract_task(task, sink))
        .collect()
}

/// Extracts the descriptor of a single task, if it has one.
pub fn extract_task(task: &Task, sink: &mut dyn DiagnosticSink) -> Option<ResourceDescriptor> {
    let label = task.name().unwrap_or("<unnamed>");

    let Some(module) = task.keys().find(|k| KNOWN_RESOURCE_TYPES.contains(k)) else {
        sink.warn(
            DiagnosticKind::UnknownResourceType,
            format!(
                "Unknown resource in task '{}' (keys: {})",
                label,
                task.keys().collect::<Vec<_>>().join(", ")
            ),
        );
        return None;
    };

    let value = IdentifyingValue::from_yaml(task.get(module)?);
    if value.is_templated() {
        sink.warn(
            DiagnosticKind::TemplatedValueSkipped,
            format!(
                "Skipping {} task '{}': arguments contain an unresolved template",
                module, label
            ),
        );
        return None;
    }

    let kind = ResourceKind::from_module(module)?;
    let name = match kind {
        ResourceKind::File => value.lookup(&["path", "dest"]),
        ResourceKind::DockerContainer | ResourceKind::DockerImage => value.lookup(&["name"]),
        ResourceKind::Service => match &value {
            IdentifyingValue::Mapping(_) => value.lookup(&["name"]),
            IdentifyingValue::Scalar(_) => value.first_token(),
        },
        ResourceKind::Package => value.lookup(&["name"]),
    };

    match name {
        Some(name) if !name.is_empty() => Some(ResourceDescriptor::new(kind, name)),
        _ => {
            let missing = if kind == ResourceKind::Package {
                DiagnosticKind::MissingPackageName
            } else {
                DiagnosticKind::MissingResourceName
            };
            sink.warn(
                missing,
                format!("Skipping {} task '{}': no resource name found", module, label),
            );
            None
        }
    }
}
