//! specplus: spec discovery and resource coverage for Ansible projects.
//!
//! This crate reads an Ansible project (site, playbooks, inventory and
//! roles), works out which roles run on which hosts, extracts the
//! resources each role manages, and compares them with the examples of a
//! serverspec-style JSON report to compute resource coverage.
//!
//! # Architecture
//!
//! The main components are:
//!
//! - **Topology**: Site → playbook → {hosts, roles} resolution
//! - **Inventory**: INI inventory parsing and group expansion
//! - **Resource**: Task → resource descriptor extraction
//! - **Coverage**: Known vs. tested resources
//! - **Runner**: Spec execution against each target host
//!
//! All of them read through a [`fs::Filesystem`] rooted at an explicit
//! base directory and report soft failures to a
//! [`diagnostics::DiagnosticSink`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use specplus::config::load_config;
//! use specplus::coverage::{CoverageCalculator, CoverageSubject, TestReport};
//! use specplus::diagnostics::Diagnostics;
//! use specplus::fs::OsFilesystem;
//! use specplus::topology::TopologyIndex;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = load_config(std::path::Path::new("specplus.toml"))?;
//!     let index = TopologyIndex::new(Arc::new(OsFilesystem), config.project);
//!     let report = TestReport::load(index.filesystem(), std::path::Path::new("report.json"))?;
//!
//!     let mut diagnostics = Diagnostics::new();
//!     let result = CoverageCalculator::new(&index)
//!         .for_subject(CoverageSubject::Role, "nginx", &report, &mut diagnostics)?;
//!     println!("{}", result.render());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod coverage;
pub mod diagnostics;
pub mod fs;
pub mod inventory;
pub mod playbook;
pub mod report;
pub mod resource;
pub mod runner;
pub mod topology;

// Re-export commonly used types
pub use config::{Config, load_config};
pub use coverage::{CoverageCalculator, CoverageReport, CoverageSubject, TestReport};
pub use diagnostics::{Diagnostic, DiagnosticSink, Diagnostics};
pub use resource::{ResourceDescriptor, ResourceKind};
pub use runner::{ProcessExecutor, RunPlan, SpecExecutor, SpecRunner};
pub use topology::{ConnectionConfig, TopologyIndex};
