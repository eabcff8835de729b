//! Diagnostics collected while resolving and extracting.
//!
//! Soft failures (an unknown task module, a templated path, a missing
//! inventory) never abort an operation. They are handed to a
//! [`DiagnosticSink`] that the caller passes in, and the caller decides
//! what to do with them afterwards.

use std::fmt;

use serde::Serialize;

/// Severity of a diagnostic entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
        };
        f.write_str(label)
    }
}

/// What kind of soft failure a diagnostic describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// The inventory file could not be read; an empty inventory was used.
    MissingInventory,
    /// A task has no key from the known resource modules.
    UnknownResourceType,
    /// A task's identifying value still contains `{{`.
    TemplatedValueSkipped,
    /// A package task has no `name` attribute.
    MissingPackageName,
    /// A file task has neither `path` nor `dest`.
    MissingResourceName,
    /// `roles/<role>` does not exist.
    MissingRoleDirectory,
    /// `roles/<role>/spec` holds no non-empty spec file.
    NoSpecsForRole,
    /// A document could not be read or parsed and was treated as empty.
    UnreadableDocument,
}

/// A single `(severity, message)` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub kind: DiagnosticKind,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.severity, self.message)
    }
}

/// Receiver for diagnostics.
pub trait DiagnosticSink {
    fn record(&mut self, diagnostic: Diagnostic);

    fn warn(&mut self, kind: DiagnosticKind, message: String) {
        self.record(Diagnostic {
            severity: Severity::Warn,
            kind,
            message,
        });
    }

    fn error(&mut self, kind: DiagnosticKind, message: String) {
        self.record(Diagnostic {
            severity: Severity::Error,
            kind,
            message,
        });
    }
}

/// A [`DiagnosticSink`] that keeps every entry and mirrors it to `tracing`.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries of the given kind.
    pub fn count(&self, kind: DiagnosticKind) -> usize {
        self.entries.iter().filter(|d| d.kind == kind).count()
    }

    /// Drains all collected entries.
    pub fn take(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.entries)
    }
}

impl DiagnosticSink for Diagnostics {
    fn record(&mut self, diagnostic: Diagnostic) {
        match diagnostic.severity {
            Severity::Debug => tracing::debug!("{}", diagnostic.message),
            Severity::Info => tracing::info!("{}", diagnostic.message),
            Severity::Warn => tracing::warn!("{}", diagnostic.message),
            Severity::Error => tracing::error!("{}", diagnostic.message),
        }
        self.entries.push(diagnostic);
    }
}
