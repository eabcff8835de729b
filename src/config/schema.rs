//! Configuration schema definitions for specplus.
//!
//! Every section and field is optional; a missing file or an empty one
//! yields [`Config::default`].
//!
//! # Schema Overview
//!
//! ```text
//! Config (root)
//! ├── ProjectConfig    - Where the site, inventory, roles and specs live
//! └── RunnerConfig     - How specs are run and how hosts are reached
//! ```

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration structure for specplus.
///
/// # TOML Structure
///
/// ```toml
/// [project]
/// base_dir = "~/infra/ansible"
/// site_file = "site.yml"
/// inventory_file = "hosts"
///
/// [runner]
/// command = "bundle exec rspec"
/// user = "deploy"
/// ```
///
/// # Example
///
/// ```
/// use specplus::config::Config;
///
/// let config: Config = toml::from_str(r#"
///     [project]
///     roles_dir = "ansible/roles"
/// "#).unwrap();
///
/// assert_eq!(config.project.roles_dir.to_str(), Some("ansible/roles"));
/// assert_eq!(config.runner.port, 22);
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Project layout.
    #[serde(default)]
    pub project: ProjectConfig,

    /// Spec runner settings.
    #[serde(default)]
    pub runner: RunnerConfig,
}

/// Where the infrastructure documents live.
///
/// All relative paths are resolved against `base_dir`, never against the
/// process working directory.
///
/// # Defaults
///
/// | Field | Default |
/// |-------|---------|
/// | `base_dir` | `.` |
/// | `site_file` | `site.yml` |
/// | `inventory_file` | `hosts` |
/// | `roles_dir` | `roles` |
/// | `spec_suffix` | `_spec.rb` |
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProjectConfig {
    /// Root of the Ansible project. `~` and `$VARS` are expanded.
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,

    /// Top-level site document listing the playbooks.
    #[serde(default = "default_site_file")]
    pub site_file: PathBuf,

    /// Inventory file.
    #[serde(default = "default_inventory_file")]
    pub inventory_file: PathBuf,

    /// Directory holding one sub-directory per role.
    #[serde(default = "default_roles_dir")]
    pub roles_dir: PathBuf,

    /// File name suffix that marks a spec file under `roles/<role>/spec`.
    #[serde(default = "default_spec_suffix")]
    pub spec_suffix: String,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            site_file: default_site_file(),
            inventory_file: default_inventory_file(),
            roles_dir: default_roles_dir(),
            spec_suffix: default_spec_suffix(),
        }
    }
}

fn default_base_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_site_file() -> PathBuf {
    PathBuf::from("site.yml")
}

fn default_inventory_file() -> PathBuf {
    PathBuf::from("hosts")
}

fn default_roles_dir() -> PathBuf {
    PathBuf::from("roles")
}

fn default_spec_suffix() -> String {
    "_spec.rb".to_string()
}

/// How specs are executed against a host.
///
/// The connection fields are fallbacks used when the inventory does not
/// say how to reach a host.
///
/// # Example
///
/// ```toml
/// [runner]
/// command = "bundle exec rspec"
/// report_dir = "tmp/specplus"
/// user = "deploy"
/// port = 2222
/// private_key_path = "~/.ssh/deploy"
///
/// [runner.env]
/// SSH_AUTH_SOCK = "/tmp/agent.sock"
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RunnerConfig {
    /// Command line used to run spec files. Split with shell quoting rules.
    ///
    /// Default: `rspec`
    #[serde(default = "default_command")]
    pub command: String,

    /// Directory (relative to `base_dir`) that receives JSON reports.
    ///
    /// Default: `.specplus`
    #[serde(default = "default_report_dir")]
    pub report_dir: PathBuf,

    /// Default SSH user.
    #[serde(default = "default_user")]
    pub user: String,

    /// Default SSH port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Default private key. `~` is expanded.
    #[serde(default = "default_private_key_path")]
    pub private_key_path: PathBuf,

    /// Extra environment variables for the spec process.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            command: default_command(),
            report_dir: default_report_dir(),
            user: default_user(),
            port: default_port(),
            private_key_path: default_private_key_path(),
            env: HashMap::new(),
        }
    }
}

fn default_command() -> String {
    "rspec".to_string()
}

fn default_report_dir() -> PathBuf {
    PathBuf::from(".specplus")
}

fn default_user() -> String {
    "root".to_string()
}

fn default_port() -> u16 {
    22
}

fn default_private_key_path() -> PathBuf {
    PathBuf::from("~/.ssh/id_rsa")
}
