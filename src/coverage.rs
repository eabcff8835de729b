//! Resource coverage of a spec run.
//!
//! Coverage compares the resources a role, host or playbook manages with
//! the examples an rspec run actually executed. An example counts for a
//! resource when its description starts with the resource's descriptor:
//!
//! ```text
//! known:     File "/etc/motd", Service "ntp"
//! executed:  File "/etc/motd" should be file
//!            File "/etc/motd" should be mode 644
//! ─────────────────────────────────────────────
//! touched:   File "/etc/motd"
//! uncovered: Service "ntp"             → 50%
//! ```

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::diagnostics::DiagnosticSink;
use crate::fs::Filesystem;
use crate::resource::extract;
use crate::topology::{TopologyError, TopologyIndex};

/// Result type for coverage operations.
pub type CoverageResult<T> = Result<T, CoverageError>;

/// Errors that abort a coverage computation.
#[derive(Debug, thiserror::Error)]
pub enum CoverageError {
    /// The subject type is not one of `role`, `host` or `playbook`.
    #[error("Unknown coverage subject '{0}' (expected role, host or playbook)")]
    UnknownCoverageSubject(String),

    /// The execution report does not exist.
    #[error("Test report '{}' not found", .0.display())]
    MissingReport(PathBuf),

    /// The execution report exists but could not be read or parsed.
    #[error("Invalid test report '{}': {message}", .path.display())]
    InvalidReport { path: PathBuf, message: String },

    /// The subject could not be resolved.
    #[error(transparent)]
    Topology(#[from] TopologyError),
}

/// What a coverage figure is computed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoverageSubject {
    Role,
    Host,
    Playbook,
}

impl CoverageSubject {
    pub fn as_str(&self) -> &'static str {
        match self {
            CoverageSubject::Role => "role",
            CoverageSubject::Host => "host",
            CoverageSubject::Playbook => "playbook",
        }
    }
}

impl fmt::Display for CoverageSubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CoverageSubject {
    type Err = CoverageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "role" => Ok(CoverageSubject::Role),
            "host" => Ok(CoverageSubject::Host),
            "playbook" => Ok(CoverageSubject::Playbook),
            other => Err(CoverageError::UnknownCoverageSubject(other.to_string())),
        }
    }
}

/// An rspec JSON report (`rspec --format json`).
///
/// Only the example descriptions matter here; everything else in the
/// report is ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestReport {
    #[serde(default)]
    pub examples: Vec<ReportExample>,
}

/// One executed example.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportExample {
    pub full_description: String,
}

impl TestReport {
    /// Reads a report through the filesystem.
    pub fn load(fs: &dyn Filesystem, path: &Path) -> CoverageResult<Self> {
        let text = fs.read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CoverageError::MissingReport(path.to_path_buf())
            } else {
                CoverageError::InvalidReport {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                }
            }
        })?;

        Self::parse(&text).map_err(|e| CoverageError::InvalidReport {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    pub fn parse(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Appends the examples of another report.
    pub fn merge(&mut self, other: TestReport) {
        self.examples.extend(other.examples);
    }

    pub fn descriptions(&self) -> Vec<String> {
        self.examples
            .iter()
            .map(|e| e.full_description.clone())
            .collect()
    }
}

static LEADING_QUOTED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^[^"]*"[^"]*""#).expect("valid regex"));

/// Cuts an example description down to its leading quoted segment.
///
/// `File "/a" should be directory` becomes `File "/a"`. Descriptions
/// without a quoted segment are only trimmed.
pub fn normalize_description(description: &str) -> String {
    match LEADING_QUOTED.find(description) {
        Some(m) => m.as_str().trim_start().to_string(),
        None => description.trim().to_string(),
    }
}

/// Coverage of a set of known resources by executed examples.
///
/// All lists keep first-seen order and hold no duplicates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoverageReport {
    pub total: Vec<String>,
    pub touched: Vec<String>,
    pub uncovered: Vec<String>,
    /// `round(touched / total * 100)`, `0` when `total` is empty.
    pub percentage: u8,
}

/// Serializable summary handed to the command line layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoverageSummary {
    pub total: usize,
    pub touched: usize,
    pub percentage: String,
    pub uncovered: Vec<String>,
}

impl CoverageReport {
    pub fn summary(&self) -> CoverageSummary {
        CoverageSummary {
            total: self.total.len(),
            touched: self.touched.len(),
            percentage: format!("{}%", self.percentage),
            uncovered: self.uncovered.clone(),
        }
    }

    /// Renders the human-readable summary.
    pub fn render(&self) -> String {
        let mut out = format!(
            "Total resources:   {}\nTouched resources: {}\nResource coverage: {}%\n",
            self.total.len(),
            self.touched.len(),
            self.percentage
        );
        if !self.uncovered.is_empty() {
            out.push_str("\nUncovered resources:\n");
            for resource in &self.uncovered {
                out.push_str(&format!("  - {}\n", resource));
            }
        }
        out
    }
}

/// Diffs known resource descriptors against executed descriptions.
///
/// # Example
///
/// ```
/// use specplus::coverage::coverage;
///
/// let known = ["File \"/a\"", "Service \"b\""].map(String::from);
/// let executed = ["File \"/a\" should be file".to_string()];
///
/// let report = coverage(&known, &executed);
/// assert_eq!(report.percentage, 50);
/// assert_eq!(report.uncovered, vec!["Service \"b\""]);
/// ```
pub fn coverage(known: &[String], executed_descriptions: &[String]) -> CoverageReport {
    let mut seen = HashSet::new();
    let total: Vec<String> = known
        .iter()
        .filter(|k| seen.insert(k.as_str()))
        .cloned()
        .collect();

    let executed: HashSet<String> = executed_descriptions
        .iter()
        .map(|d| normalize_description(d))
        .collect();

    let (touched, uncovered): (Vec<String>, Vec<String>) =
        total.iter().cloned().partition(|k| executed.contains(k));

    let percentage = if total.is_empty() {
        0
    } else {
        (touched.len() as f64 / total.len() as f64 * 100.0).round() as u8
    };

    CoverageReport {
        total,
        touched,
        uncovered,
        percentage,
    }
}

/// Computes coverage for a role, host or playbook.
pub struct CoverageCalculator<'a> {
    topology: &'a TopologyIndex,
}

impl<'a> CoverageCalculator<'a> {
    pub fn new(topology: &'a TopologyIndex) -> Self {
        Self { topology }
    }

    /// Distinct resource descriptors managed by the subject, first-seen order.
    ///
    /// # Errors
    ///
    /// A role without a directory, an unknown host or an unknown playbook
    /// is an error here: coverage of something that does not exist is a
    /// usage mistake, not an empty result.
    pub fn known_resources(
        &self,
        subject: CoverageSubject,
        name: &str,
        sink: &mut dyn DiagnosticSink,
    ) -> CoverageResult<Vec<String>> {
        let tasks = match subject {
            CoverageSubject::Role => {
                self.topology.require_role_directory(name, sink)?;
                self.topology.tasks_for_role(name, sink)
            }
            CoverageSubject::Host => {
                if self.topology.entry_for_host(name)?.is_none() {
                    return Err(TopologyError::UnknownHost(name.to_string()).into());
                }
                self.topology.tasks_for_host(name, sink)?
            }
            CoverageSubject::Playbook => self.topology.tasks_for_playbook(name, sink)?,
        };

        let mut seen = HashSet::new();
        Ok(extract(&tasks, sink)
            .into_iter()
            .map(|r| r.to_string())
            .filter(|r| seen.insert(r.clone()))
            .collect())
    }

    /// Coverage of the subject by the examples in `report`.
    pub fn for_subject(
        &self,
        subject: CoverageSubject,
        name: &str,
        report: &TestReport,
        sink: &mut dyn DiagnosticSink,
    ) -> CoverageResult<CoverageReport> {
        let known = self.known_resources(subject, name, sink)?;
        let result = coverage(&known, &report.descriptions());
        tracing::info!(
            "Coverage of {} '{}': {}/{} resources ({}%)",
            subject,
            name,
            result.touched.len(),
            result.total.len(),
            result.percentage
        );
        Ok(result)
    }
}
