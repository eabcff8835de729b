//! Spec execution.
//!
//! A [`SpecRunner`] turns a role or host into one [`RunPlan`] per target
//! host: the spec command, the spec files to pass it, where the JSON
//! report goes, and the connection environment the specs read. Plans
//! are executed through a [`SpecExecutor`]; [`ProcessExecutor`] spawns
//! them as local child processes.
//!
//! Connection details reach the child only through its environment:
//!
//! | Variable | Source |
//! |----------|--------|
//! | `TARGET_HOST` | `ansible_ssh_host` / `ansible_host`, else the host name |
//! | `TARGET_PORT` | `ansible_ssh_port` / `ansible_port`, else `runner.port` |
//! | `TARGET_PRIVATE_KEY` | `ansible_ssh_private_key_file`, else `runner.private_key_path` |
//! | `TARGET_USER` | `ansible_ssh_user` / `ansible_user`, else `runner.user` |

use std::collections::HashSet;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::config::RunnerConfig;
use crate::coverage::CoverageSubject;
use crate::diagnostics::DiagnosticSink;
use crate::topology::{ConnectionConfig, TopologyError, TopologyIndex};

/// Result type for runner operations.
pub type RunnerResult<T> = Result<T, RunnerError>;

/// Errors that can occur while planning or executing spec runs.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("Invalid runner command '{command}': {message}")]
    InvalidCommand { command: String, message: String },

    #[error("Specs can only be run for a role or a host, not a {0}")]
    UnsupportedSubject(CoverageSubject),

    #[error("No host uses role '{0}'")]
    NoHostsForRole(String),

    #[error("Host '{0}' has no roles with specs")]
    NoSpecsForHost(String),

    #[error("Failed to spawn '{program}': {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Topology(#[from] TopologyError),
}

/// Everything needed to run specs against one host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPlan {
    /// Play (host) name the specs target.
    pub host: String,
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub working_dir: PathBuf,
    /// Where the spec command writes its JSON report.
    pub report_path: PathBuf,
}

impl RunPlan {
    /// Human-readable command line, for logs.
    pub fn command_line(&self) -> String {
        let mut words = vec![self.program.clone()];
        words.extend(self.args.iter().cloned());
        shell_words::join(words)
    }
}

/// Outcome of executing one plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub host: String,
    pub exit_code: i32,
    pub report_path: PathBuf,
}

impl RunOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Executes run plans.
#[async_trait]
pub trait SpecExecutor: Send + Sync {
    /// Runs the plan to completion and returns its exit code.
    async fn execute(&self, plan: &RunPlan) -> RunnerResult<i32>;
}

/// Runs plans as local child processes, output inherited.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessExecutor;

#[async_trait]
impl SpecExecutor for ProcessExecutor {
    async fn execute(&self, plan: &RunPlan) -> RunnerResult<i32> {
        if let Some(parent) = plan.report_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut process = tokio::process::Command::new(&plan.program);
        process.args(&plan.args);
        process.current_dir(&plan.working_dir);
        for (key, value) in &plan.env {
            process.env(key, value);
        }
        process.stdin(Stdio::null());
        process.stdout(Stdio::inherit());
        process.stderr(Stdio::inherit());

        let status = process
            .status()
            .await
            .map_err(|source| RunnerError::SpawnFailed {
                program: plan.program.clone(),
                source,
            })?;

        Ok(status.code().unwrap_or(-1))
    }
}

/// Plans and runs specs for roles and hosts.
pub struct SpecRunner<'a> {
    topology: &'a TopologyIndex,
    config: RunnerConfig,
}

impl<'a> SpecRunner<'a> {
    pub fn new(topology: &'a TopologyIndex, config: RunnerConfig) -> Self {
        Self { topology, config }
    }

    /// Builds one plan per target host.
    ///
    /// For a role: the role's spec files, against every play that lists
    /// the role. For a host: the spec files of all its spec-bearing roles,
    /// against that host.
    pub fn plans(
        &self,
        subject: CoverageSubject,
        name: &str,
        sink: &mut dyn DiagnosticSink,
    ) -> RunnerResult<Vec<RunPlan>> {
        match subject {
            CoverageSubject::Role => {
                self.topology.require_role_specs(name, sink)?;
                let spec_files = self.topology.spec_files(name);

                let mut seen = HashSet::new();
                let hosts: Vec<String> = self
                    .topology
                    .roles_used_by(name)?
                    .into_iter()
                    .filter(|h| seen.insert(h.clone()))
                    .collect();
                if hosts.is_empty() {
                    return Err(RunnerError::NoHostsForRole(name.to_string()));
                }

                let mut plans = Vec::with_capacity(hosts.len());
                for host in &hosts {
                    let report = self
                        .reports_dir(subject, name)
                        .join(format!("{}.json", host));
                    plans.push(self.plan(host, &spec_files, report, sink)?);
                }
                Ok(plans)
            }
            CoverageSubject::Host => {
                let spec_files: Vec<PathBuf> = self
                    .topology
                    .roles_of_host(name)?
                    .iter()
                    .flat_map(|role| self.topology.spec_files(role))
                    .collect();
                if spec_files.is_empty() {
                    return Err(RunnerError::NoSpecsForHost(name.to_string()));
                }

                let report = self.reports_dir(subject, name).join(format!("{}.json", name));
                Ok(vec![self.plan(name, &spec_files, report, sink)?])
            }
            CoverageSubject::Playbook => Err(RunnerError::UnsupportedSubject(subject)),
        }
    }

    /// Directory holding one subject's reports, one `<host>.json` each.
    ///
    /// Each subject gets its own directory, so a role named `web` never
    /// picks up the reports of `web-proxy`.
    pub fn reports_dir(&self, subject: CoverageSubject, name: &str) -> PathBuf {
        self.topology
            .path(&self.config.report_dir)
            .join(subject.as_str())
            .join(name)
    }

    /// JSON reports previously written for a subject, sorted.
    pub fn written_reports(&self, subject: CoverageSubject, name: &str) -> Vec<PathBuf> {
        self.topology
            .filesystem()
            .list_dir(&self.reports_dir(subject, name))
            .unwrap_or_default()
            .into_iter()
            .filter(|p| p.extension().is_some_and(|e| e == "json"))
            .collect()
    }

    fn plan(
        &self,
        host: &str,
        spec_files: &[PathBuf],
        report_path: PathBuf,
        sink: &mut dyn DiagnosticSink,
    ) -> RunnerResult<RunPlan> {
        let connection = self.topology.connection_for_host(host, &self.config, sink)?;

        let mut words =
            shell_words::split(&self.config.command).map_err(|e| RunnerError::InvalidCommand {
                command: self.config.command.clone(),
                message: e.to_string(),
            })?;
        if words.is_empty() {
            return Err(RunnerError::InvalidCommand {
                command: self.config.command.clone(),
                message: "command is empty".to_string(),
            });
        }
        let program = words.remove(0);

        let mut args = words;
        args.extend(spec_files.iter().map(|p| p.display().to_string()));
        args.extend([
            "--format".to_string(),
            "progress".to_string(),
            "--format".to_string(),
            "json".to_string(),
            "--out".to_string(),
            report_path.display().to_string(),
        ]);

        let mut env = connection_env(&connection);
        let mut extra: Vec<_> = self.config.env.iter().collect();
        extra.sort();
        env.extend(extra.into_iter().map(|(k, v)| (k.clone(), v.clone())));

        Ok(RunPlan {
            host: host.to_string(),
            program,
            args,
            env,
            working_dir: self.topology.base_dir().to_path_buf(),
            report_path,
        })
    }

    /// Executes plans one after another.
    ///
    /// A failing spec run is not an error; only failing to execute one is.
    pub async fn run(
        &self,
        executor: &dyn SpecExecutor,
        plans: &[RunPlan],
    ) -> RunnerResult<Vec<RunOutcome>> {
        let mut outcomes = Vec::with_capacity(plans.len());
        for plan in plans {
            info!("Running specs against {}", plan.host);
            debug!("{}", plan.command_line());

            let exit_code = executor.execute(plan).await?;
            if exit_code != 0 {
                info!("Specs against {} exited with {}", plan.host, exit_code);
            }

            outcomes.push(RunOutcome {
                host: plan.host.clone(),
                exit_code,
                report_path: plan.report_path.clone(),
            });
        }
        Ok(outcomes)
    }
}

/// The `TARGET_*` variables for a connection.
pub fn connection_env(connection: &ConnectionConfig) -> Vec<(String, String)> {
    vec![
        ("TARGET_HOST".to_string(), connection.host.clone()),
        ("TARGET_PORT".to_string(), connection.port.to_string()),
        (
            "TARGET_PRIVATE_KEY".to_string(),
            connection.private_key_path.display().to_string(),
        ),
        ("TARGET_USER".to_string(), connection.user.clone()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProjectConfig;
    use crate::diagnostics::Diagnostics;
    use crate::fs::MemoryFilesystem;
    use std::sync::{Arc, Mutex};

    fn index() -> TopologyIndex {
        let fs = MemoryFilesystem::new()
            .with_file("/p/site.yml", "- include: web.yml\n- include: db.yml\n")
            .with_file(
                "/p/web.yml",
                "- name: web\n  hosts: webservers\n  roles:\n    - common\n    - nginx\n",
            )
            .with_file(
                "/p/db.yml",
                "- name: db\n  hosts: dbservers\n  roles:\n    - common\n    - bare\n",
            )
            .with_file(
                "/p/hosts",
                "[webservers]\nweb1 ansible_ssh_host=10.0.0.5 ansible_ssh_port=2200\n\n[dbservers]\ndb1 ansible_ssh_user=admin\n",
            )
            .with_file("/p/roles/common/spec/common_spec.rb", "describe file('/etc') do\nend\n")
            .with_file("/p/roles/nginx/spec/nginx_spec.rb", "describe service('nginx') do\nend\n")
            .with_dir("/p/roles/bare")
            .with_dir("/p/roles/unused/spec")
            .with_file("/p/roles/unused/spec/unused_spec.rb", "describe file('/x') do\nend\n");

        TopologyIndex::new(
            Arc::new(fs),
            ProjectConfig {
                base_dir: PathBuf::from("/p"),
                ..Default::default()
            },
        )
    }

    fn config() -> RunnerConfig {
        RunnerConfig {
            command: "bundle exec rspec".to_string(),
            private_key_path: PathBuf::from("/keys/id"),
            ..Default::default()
        }
    }

    fn env_value<'a>(plan: &'a RunPlan, key: &str) -> Option<&'a str> {
        plan.env
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    #[derive(Default)]
    struct RecordingExecutor {
        executed: Mutex<Vec<String>>,
        exit_code: i32,
    }

    #[async_trait]
    impl SpecExecutor for RecordingExecutor {
        async fn execute(&self, plan: &RunPlan) -> RunnerResult<i32> {
            self.executed.lock().unwrap().push(plan.host.clone());
            Ok(self.exit_code)
        }
    }

    #[test]
    fn test_role_plans_one_per_host() {
        let index = index();
        let runner = SpecRunner::new(&index, config());
        let mut diagnostics = Diagnostics::new();

        let plans = runner
            .plans(CoverageSubject::Role, "common", &mut diagnostics)
            .unwrap();

        let hosts: Vec<&str> = plans.iter().map(|p| p.host.as_str()).collect();
        assert_eq!(hosts, vec!["web", "db"]);
        assert_eq!(
            plans[0].report_path,
            PathBuf::from("/p/.specplus/role/common/web.json")
        );
        assert_eq!(plans[0].working_dir, PathBuf::from("/p"));
    }

    #[test]
    fn test_plan_command_and_args() {
        let index = index();
        let runner = SpecRunner::new(&index, config());
        let mut diagnostics = Diagnostics::new();

        let plans = runner
            .plans(CoverageSubject::Host, "web", &mut diagnostics)
            .unwrap();
        assert_eq!(plans.len(), 1);

        let plan = &plans[0];
        assert_eq!(plan.program, "bundle");
        assert_eq!(
            plan.args,
            vec![
                "exec",
                "rspec",
                "/p/roles/common/spec/common_spec.rb",
                "/p/roles/nginx/spec/nginx_spec.rb",
                "--format",
                "progress",
                "--format",
                "json",
                "--out",
                "/p/.specplus/host/web/web.json",
            ]
        );
    }

    #[test]
    fn test_plan_connection_env() {
        let index = index();
        let mut config = config();
        config.env.insert("EXTRA".to_string(), "1".to_string());
        let runner = SpecRunner::new(&index, config);
        let mut diagnostics = Diagnostics::new();

        let plans = runner
            .plans(CoverageSubject::Role, "common", &mut diagnostics)
            .unwrap();

        let web = &plans[0];
        assert_eq!(env_value(web, "TARGET_HOST"), Some("10.0.0.5"));
        assert_eq!(env_value(web, "TARGET_PORT"), Some("2200"));
        assert_eq!(env_value(web, "TARGET_PRIVATE_KEY"), Some("/keys/id"));
        assert_eq!(env_value(web, "TARGET_USER"), Some("root"));
        assert_eq!(env_value(web, "EXTRA"), Some("1"));

        let db = &plans[1];
        assert_eq!(env_value(db, "TARGET_HOST"), Some("db1"));
        assert_eq!(env_value(db, "TARGET_PORT"), Some("22"));
        assert_eq!(env_value(db, "TARGET_USER"), Some("admin"));
    }

    #[test]
    fn test_role_without_specs_is_rejected() {
        let index = index();
        let runner = SpecRunner::new(&index, config());
        let mut diagnostics = Diagnostics::new();

        let err = runner
            .plans(CoverageSubject::Role, "bare", &mut diagnostics)
            .unwrap_err();
        assert!(matches!(
            err,
            RunnerError::Topology(TopologyError::NoSpecsForRole(_))
        ));

        let err = runner
            .plans(CoverageSubject::Role, "missing", &mut diagnostics)
            .unwrap_err();
        assert!(matches!(
            err,
            RunnerError::Topology(TopologyError::MissingRoleDirectory(_))
        ));
    }

    #[test]
    fn test_role_nobody_uses() {
        let index = index();
        let runner = SpecRunner::new(&index, config());
        let mut diagnostics = Diagnostics::new();

        let err = runner
            .plans(CoverageSubject::Role, "unused", &mut diagnostics)
            .unwrap_err();
        assert!(matches!(err, RunnerError::NoHostsForRole(role) if role == "unused"));
    }

    #[test]
    fn test_host_without_specs_and_playbook_subject() {
        let index = index();
        let runner = SpecRunner::new(&index, config());
        let mut diagnostics = Diagnostics::new();

        let err = runner
            .plans(CoverageSubject::Host, "nowhere", &mut diagnostics)
            .unwrap_err();
        assert!(matches!(err, RunnerError::NoSpecsForHost(_)));

        let err = runner
            .plans(CoverageSubject::Playbook, "web", &mut diagnostics)
            .unwrap_err();
        assert!(matches!(err, RunnerError::UnsupportedSubject(_)));
    }

    #[test]
    fn test_empty_command_is_invalid() {
        let index = index();
        let runner = SpecRunner::new(
            &index,
            RunnerConfig {
                command: "  ".to_string(),
                ..Default::default()
            },
        );
        let mut diagnostics = Diagnostics::new();

        let err = runner
            .plans(CoverageSubject::Host, "web", &mut diagnostics)
            .unwrap_err();
        assert!(matches!(err, RunnerError::InvalidCommand { .. }));
    }

    #[tokio::test]
    async fn test_run_executes_every_plan() {
        let index = index();
        let runner = SpecRunner::new(&index, config());
        let mut diagnostics = Diagnostics::new();
        let plans = runner
            .plans(CoverageSubject::Role, "common", &mut diagnostics)
            .unwrap();

        let executor = RecordingExecutor {
            exit_code: 1,
            ..Default::default()
        };
        let outcomes = runner.run(&executor, &plans).await.unwrap();

        assert_eq!(*executor.executed.lock().unwrap(), vec!["web", "db"]);
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| !o.success()));
        assert_eq!(outcomes[1].report_path, plans[1].report_path);
    }

    #[test]
    fn test_written_reports_stay_within_subject() {
        let fs = MemoryFilesystem::new()
            .with_file("/p/.specplus/role/web/db.json", "{}")
            .with_file("/p/.specplus/role/web/notes.txt", "")
            .with_file("/p/.specplus/role/web-proxy/db.json", "{}")
            .with_file("/p/.specplus/host/web/web.json", "{}");
        let index = TopologyIndex::new(
            Arc::new(fs),
            ProjectConfig {
                base_dir: PathBuf::from("/p"),
                ..Default::default()
            },
        );
        let runner = SpecRunner::new(&index, config());

        assert_eq!(
            runner.written_reports(CoverageSubject::Role, "web"),
            vec![PathBuf::from("/p/.specplus/role/web/db.json")]
        );
        assert_eq!(
            runner.written_reports(CoverageSubject::Host, "web"),
            vec![PathBuf::from("/p/.specplus/host/web/web.json")]
        );
        assert!(runner.written_reports(CoverageSubject::Role, "web-").is_empty());
    }

    #[test]
    fn test_command_line_quotes_arguments() {
        let plan = RunPlan {
            host: "h".to_string(),
            program: "rspec".to_string(),
            args: vec!["a b".to_string()],
            env: Vec::new(),
            working_dir: PathBuf::from("."),
            report_path: PathBuf::from("r.json"),
        };
        assert_eq!(plan.command_line(), "rspec 'a b'");
    }

    #[tokio::test]
    async fn test_process_executor_reports_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let plan = RunPlan {
            host: "local".to_string(),
            program: "sh".to_string(),
            args: vec!["-c".to_string(), "test \"$TARGET_USER\" = deploy".to_string()],
            env: vec![("TARGET_USER".to_string(), "deploy".to_string())],
            working_dir: dir.path().to_path_buf(),
            report_path: dir.path().join("out/report.json"),
        };

        assert_eq!(ProcessExecutor.execute(&plan).await.unwrap(), 0);
        assert!(dir.path().join("out").is_dir());

        let failing = RunPlan {
            env: vec![("TARGET_USER".to_string(), "root".to_string())],
            ..plan
        };
        assert_eq!(ProcessExecutor.execute(&failing).await.unwrap(), 1);
    }
}
