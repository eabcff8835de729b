//! Inventory file parsing.
//!
//! An inventory is a line-oriented file with one host per line:
//!
//! ```text
//! # comment
//! [webservers]
//! web1 ansible_ssh_host=10.0.0.1 ansible_ssh_port=22
//! web2 ansible_ssh_host="10.0.0.2"
//!
//! [dbservers]
//! db1
//!
//! [production:children]
//! webservers
//! dbservers
//! ```
//!
//! Every host line becomes a [`HostRecord`] whose variables are the
//! `key=value` tokens that follow the hostname, plus an implicit `name`
//! variable. Section headers do not produce hosts; they open the group
//! that subsequent host lines join. `[group:children]` sections list
//! child groups and `[group:vars]` sections are skipped.

use std::collections::HashSet;
use std::path::Path;

use serde::Serialize;

use crate::diagnostics::{DiagnosticKind, DiagnosticSink};
use crate::fs::Filesystem;

/// Group that hosts listed before any section header belong to.
pub const UNGROUPED: &str = "ungrouped";

/// A single host and its variables.
///
/// Variables keep the order they were declared in. `name` is always
/// present and always first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostRecord {
    vars: Vec<(String, String)>,

    /// Group this record was expanded from, when it came out of a
    /// playbook `hosts` list naming several groups.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

impl HostRecord {
    /// Creates a record with only the implicit `name` variable.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            vars: vec![("name".to_string(), name.into())],
            group: None,
        }
    }

    /// Adds a variable, builder style.
    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn name(&self) -> &str {
        self.get("name").unwrap_or_default()
    }

    /// Looks up a variable by name.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Returns the first variable present among `keys`.
    pub fn get_any(&self, keys: &[&str]) -> Option<&str> {
        keys.iter().find_map(|key| self.get(key))
    }

    /// Sets a variable, replacing an earlier value in place.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.vars.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.vars.push((key, value)),
        }
    }

    pub fn vars(&self) -> &[(String, String)] {
        &self.vars
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Hosts,
    Children,
    Vars,
}

/// Parsed inventory: hosts in declaration order plus group membership.
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    hosts: Vec<HostRecord>,
    groups: Vec<(String, Vec<String>)>,
    children: Vec<(String, Vec<String>)>,
}

impl Inventory {
    /// Parses inventory text.
    ///
    /// Lines starting with `#` or `[`, blank lines and bare carriage
    /// returns never produce hosts.
    ///
    /// # Example
    ///
    /// ```
    /// use specplus::inventory::Inventory;
    ///
    /// let inventory = Inventory::parse("host1 ansible_ssh_host=10.0.0.1 ansible_ssh_port=22\n");
    /// let host = inventory.host("host1").unwrap();
    /// assert_eq!(host.get("ansible_ssh_port"), Some("22"));
    /// ```
    pub fn parse(text: &str) -> Self {
        let mut inventory = Inventory::default();
        let mut group = UNGROUPED.to_string();
        let mut section = Section::Hosts;

        for raw in text.lines() {
            let line = raw.trim_end_matches('\r');
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }

            if line.starts_with('[') {
                let header = line.trim_start_matches('[');
                let header = header.split(']').next().unwrap_or_default().trim();
                (group, section) = match header.split_once(':') {
                    Some((name, "children")) => (name.to_string(), Section::Children),
                    Some((name, "vars")) => (name.to_string(), Section::Vars),
                    _ => (header.to_string(), Section::Hosts),
                };
                inventory.group_entry(&group);
                continue;
            }

            match section {
                Section::Vars => {}
                Section::Children => {
                    if let Some(child) = line.split_whitespace().next() {
                        inventory.children_entry(&group).push(child.to_string());
                    }
                }
                Section::Hosts => {
                    if let Some(record) = parse_host_line(line) {
                        inventory.add_host(&group, record);
                    }
                }
            }
        }

        inventory
    }

    /// Reads and parses the inventory at `path`.
    ///
    /// An unreadable file is not fatal: a `MissingInventory` diagnostic is
    /// recorded and an empty inventory is returned.
    pub fn load(fs: &dyn Filesystem, path: &Path, sink: &mut dyn DiagnosticSink) -> Self {
        match fs.read_to_string(path) {
            Ok(text) => Self::parse(&text),
            Err(e) => {
                sink.warn(
                    DiagnosticKind::MissingInventory,
                    format!("Inventory '{}' is not readable: {}", path.display(), e),
                );
                Self::default()
            }
        }
    }

    /// All hosts in declaration order.
    pub fn hosts(&self) -> &[HostRecord] {
        &self.hosts
    }

    pub fn host(&self, name: &str) -> Option<&HostRecord> {
        self.hosts.iter().find(|h| h.name() == name)
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    /// Returns `true` if `name` was declared as a section header.
    pub fn has_group(&self, name: &str) -> bool {
        self.groups.iter().any(|(g, _)| g == name)
    }

    /// Group names in declaration order.
    pub fn group_names(&self) -> impl Iterator<Item = &str> {
        self.groups.iter().map(|(g, _)| g.as_str())
    }

    /// Every `[group:children]` relation in declaration order.
    pub fn children(&self) -> &[(String, Vec<String>)] {
        &self.children
    }

    /// Child groups declared for `group` via `[group:children]`.
    pub fn children_of(&self, group: &str) -> &[String] {
        self.children
            .iter()
            .find(|(g, _)| g == group)
            .map(|(_, c)| c.as_slice())
            .unwrap_or_default()
    }

    /// Hosts of a group, including those of its child groups.
    ///
    /// Returns `None` if the group is unknown.
    pub fn group_hosts(&self, group: &str) -> Option<Vec<HostRecord>> {
        if !self.has_group(group) {
            return None;
        }

        let mut seen_groups = HashSet::new();
        let mut names = Vec::new();
        self.collect_group(group, &mut seen_groups, &mut names);

        let mut seen_hosts = HashSet::new();
        Some(
            names
                .into_iter()
                .filter(|name| seen_hosts.insert(name.clone()))
                .filter_map(|name| self.host(&name).cloned())
                .collect(),
        )
    }

    fn collect_group<'a>(
        &'a self,
        group: &'a str,
        seen: &mut HashSet<&'a str>,
        names: &mut Vec<String>,
    ) {
        if !seen.insert(group) {
            return;
        }
        if let Some((_, members)) = self.groups.iter().find(|(g, _)| g == group) {
            names.extend(members.iter().cloned());
        }
        for child in self.children_of(group) {
            self.collect_group(child, seen, names);
        }
    }

    fn group_entry(&mut self, group: &str) -> &mut Vec<String> {
        let idx = match self.groups.iter().position(|(g, _)| g == group) {
            Some(idx) => idx,
            None => {
                self.groups.push((group.to_string(), Vec::new()));
                self.groups.len() - 1
            }
        };
        &mut self.groups[idx].1
    }

    fn children_entry(&mut self, group: &str) -> &mut Vec<String> {
        let idx = match self.children.iter().position(|(g, _)| g == group) {
            Some(idx) => idx,
            None => {
                self.children.push((group.to_string(), Vec::new()));
                self.children.len() - 1
            }
        };
        &mut self.children[idx].1
    }

    fn add_host(&mut self, group: &str, record: HostRecord) {
        let name = record.name().to_string();
        let members = self.group_entry(group);
        if !members.contains(&name) {
            members.push(name.clone());
        }

        // A host listed in several groups keeps one record; later
        // declarations override earlier variables.
        match self.hosts.iter_mut().find(|h| h.name() == name) {
            Some(existing) => {
                for (key, value) in record.vars {
                    existing.set(key, value);
                }
            }
            None => self.hosts.push(record),
        }
    }
}

/// Parses one host line into a record.
fn parse_host_line(line: &str) -> Option<HostRecord> {
    let mut parts = line.split_whitespace();
    let hostname = parts.next()?;
    let rest: Vec<&str> = parts.collect();
    let rest = rest.join(" ");

    let mut record = HostRecord::new(hostname);
    for token in split_tokens(&rest) {
        match token.split_once('=') {
            Some((key, value)) => record.set(key, strip_quotes(value)),
            None => tracing::debug!("Ignoring inventory token without '=': {}", token),
        }
    }
    Some(record)
}

/// Splits on whitespace, keeping quoted runs together.
///
/// Backslashes are literal. An unterminated quote falls back to a plain
/// whitespace split.
fn split_tokens(text: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut start = None;
    let mut quote = None;

    for (i, c) in text.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c.is_whitespace() => {
                if let Some(s) = start.take() {
                    tokens.push(&text[s..i]);
                }
            }
            None => {
                start.get_or_insert(i);
                if c == '"' || c == '\'' {
                    quote = Some(c);
                }
            }
        }
    }

    if quote.is_some() {
        return text.split_whitespace().collect();
    }
    if let Some(s) = start {
        tokens.push(&text[s..]);
    }
    tokens
}

fn strip_quotes(value: &str) -> &str {
    value.trim_matches(|c| c == '"' || c == '\'')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::Diagnostics;
    use crate::fs::MemoryFilesystem;

    const INVENTORY: &str = "\
# production hosts
[webservers]
web1 ansible_ssh_host=10.0.0.1 ansible_ssh_port=22
web2 ansible_ssh_host='10.0.0.2' ansible_ssh_user=\"deploy\"
\r
[dbservers]
db1 ansible_ssh_host=10.0.1.1

[dbservers:vars]
ntp_server=ntp.example.com

[production:children]
webservers
dbservers
";

    #[test]
    fn test_parse_host_line_vars() {
        let inventory = Inventory::parse("host1 ansible_ssh_host=10.0.0.1 ansible_ssh_port=22");
        let host = inventory.host("host1").unwrap();

        assert_eq!(
            host.vars(),
            &[
                ("name".to_string(), "host1".to_string()),
                ("ansible_ssh_host".to_string(), "10.0.0.1".to_string()),
                ("ansible_ssh_port".to_string(), "22".to_string()),
            ]
        );
    }

    #[test]
    fn test_ignores_comments_headers_blank_and_cr() {
        let inventory = Inventory::parse(INVENTORY);
        let names: Vec<_> = inventory.hosts().iter().map(|h| h.name()).collect();
        assert_eq!(names, vec!["web1", "web2", "db1"]);
    }

    #[test]
    fn test_strips_quotes() {
        let inventory = Inventory::parse(INVENTORY);
        let web2 = inventory.host("web2").unwrap();
        assert_eq!(web2.get("ansible_ssh_host"), Some("10.0.0.2"));
        assert_eq!(web2.get("ansible_ssh_user"), Some("deploy"));
    }

    #[test]
    fn test_backslashes_are_literal() {
        let inventory = Inventory::parse("h1 ansible_become_pass=a\\b path='C:\\tmp x'");
        let host = inventory.host("h1").unwrap();
        assert_eq!(host.get("ansible_become_pass"), Some("a\\b"));
        assert_eq!(host.get("path"), Some("C:\\tmp x"));
    }

    #[test]
    fn test_unterminated_quote_splits_on_whitespace() {
        let inventory = Inventory::parse("h1 motd=\"hello world port=22");
        let host = inventory.host("h1").unwrap();
        assert_eq!(host.get("motd"), Some("hello"));
        assert_eq!(host.get("port"), Some("22"));
    }

    #[test]
    fn test_header_with_trailing_comment() {
        let inventory = Inventory::parse("[web] # prod\nweb1\n[db:children] ; note\nweb\n");
        assert!(inventory.has_group("web"));
        assert_eq!(inventory.children_of("db"), &["web"]);
        assert_eq!(inventory.group_hosts("db").unwrap()[0].name(), "web1");
    }

    #[test]
    fn test_quoted_value_with_spaces() {
        let inventory = Inventory::parse("h1 motd=\"hello world\" port=22");
        let host = inventory.host("h1").unwrap();
        assert_eq!(host.get("motd"), Some("hello world"));
        assert_eq!(host.get("port"), Some("22"));
    }

    #[test]
    fn test_groups_and_children() {
        let inventory = Inventory::parse(INVENTORY);

        assert!(inventory.has_group("webservers"));
        assert!(inventory.has_group("production"));
        assert!(!inventory.has_group("staging"));

        let web: Vec<_> = inventory
            .group_hosts("webservers")
            .unwrap()
            .into_iter()
            .map(|h| h.name().to_string())
            .collect();
        assert_eq!(web, vec!["web1", "web2"]);

        let production = inventory.group_hosts("production").unwrap();
        assert_eq!(production.len(), 3);
        assert_eq!(inventory.children_of("production"), &["webservers", "dbservers"]);
        assert!(inventory.group_hosts("staging").is_none());
    }

    #[test]
    fn test_ungrouped_hosts() {
        let inventory = Inventory::parse("lonely\n[web]\nweb1\n");
        let ungrouped = inventory.group_hosts(UNGROUPED).unwrap();
        assert_eq!(ungrouped.len(), 1);
        assert_eq!(ungrouped[0].name(), "lonely");
    }

    #[test]
    fn test_children_cycle_terminates() {
        let inventory = Inventory::parse("[a]\nh1\n[b]\nh2\n[a:children]\nb\n[b:children]\na\n");
        assert_eq!(inventory.group_hosts("a").unwrap().len(), 2);
    }

    #[test]
    fn test_host_in_two_groups_merges() {
        let inventory = Inventory::parse("[a]\nh1 x=1\n[b]\nh1 x=2 y=3\n");
        assert_eq!(inventory.hosts().len(), 1);
        let host = inventory.host("h1").unwrap();
        assert_eq!(host.get("x"), Some("2"));
        assert_eq!(host.get("y"), Some("3"));
        assert_eq!(inventory.group_hosts("b").unwrap().len(), 1);
    }

    #[test]
    fn test_load_missing_inventory_is_empty() {
        let fs = MemoryFilesystem::new();
        let mut diagnostics = Diagnostics::new();

        let inventory = Inventory::load(&fs, Path::new("/p/hosts"), &mut diagnostics);

        assert!(inventory.is_empty());
        assert_eq!(diagnostics.count(DiagnosticKind::MissingInventory), 1);
    }

    #[test]
    fn test_load_reads_through_filesystem() {
        let fs = MemoryFilesystem::new().with_file("/p/hosts", INVENTORY);
        let mut diagnostics = Diagnostics::new();

        let inventory = Inventory::load(&fs, Path::new("/p/hosts"), &mut diagnostics);

        assert_eq!(inventory.hosts().len(), 3);
        assert!(diagnostics.is_empty());
    }
}
