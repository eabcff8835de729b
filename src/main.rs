//! specplus CLI - Spec discovery and resource coverage for Ansible projects.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

use specplus::config::{self, Config};
use specplus::coverage::{CoverageCalculator, CoverageError, CoverageSubject, TestReport};
use specplus::diagnostics::Diagnostics;
use specplus::fs::OsFilesystem;
use specplus::report::{print_list, print_summary};
use specplus::runner::{ProcessExecutor, SpecRunner};
use specplus::topology::TopologyIndex;

#[derive(Parser)]
#[command(name = "specplus")]
#[command(about = "Spec discovery and resource coverage for Ansible projects", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "specplus.toml")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List roles with and without specs, and the hosts of the site
    List,

    /// Show the resources a role, host or playbook manages
    Resources {
        /// What to inspect (role, host, playbook)
        subject: CoverageSubject,

        /// Role, host or playbook name
        name: String,
    },

    /// Compute resource coverage from a JSON spec report
    Coverage {
        /// What to measure (role, host, playbook)
        subject: CoverageSubject,

        /// Role, host or playbook name
        name: String,

        /// JSON report path (defaults to the reports written by `run`)
        #[arg(short, long)]
        report: Option<PathBuf>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Run specs against each target host, then report coverage
    Run {
        /// What to run (role, host)
        subject: CoverageSubject,

        /// Role or host name
        name: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = config::load_config_or_default(&cli.config)
        .with_context(|| format!("Failed to load config from {}", cli.config.display()))?;
    let index = TopologyIndex::new(Arc::new(OsFilesystem), config.project.clone());

    match cli.command {
        Commands::List => list(&index),
        Commands::Resources { subject, name } => resources(&index, subject, &name),
        Commands::Coverage {
            subject,
            name,
            report,
            format,
        } => coverage(&index, &config, subject, &name, report, &format),
        Commands::Run { subject, name } => run_specs(&index, &config, subject, &name).await,
    }
}

fn list(index: &TopologyIndex) -> Result<()> {
    let hosts = index.hosts().context("Failed to read the site")?;

    print_list("Roles with specs:", &index.roles_with_specs());
    print_list("Roles without specs:", &index.roles_without_specs());
    print_list("Hosts:", &hosts);

    Ok(())
}

fn resources(index: &TopologyIndex, subject: CoverageSubject, name: &str) -> Result<()> {
    let mut diagnostics = Diagnostics::new();
    let resources = CoverageCalculator::new(index)
        .known_resources(subject, name, &mut diagnostics)
        .with_context(|| format!("Failed to collect resources of {} '{}'", subject, name))?;

    print_list(&format!("Resources of {} '{}':", subject, name), &resources);
    if !diagnostics.is_empty() {
        let messages: Vec<String> = diagnostics.entries().iter().map(|d| d.to_string()).collect();
        println!();
        print_list("Diagnostics:", &messages);
    }

    Ok(())
}

fn coverage(
    index: &TopologyIndex,
    config: &Config,
    subject: CoverageSubject,
    name: &str,
    report_path: Option<PathBuf>,
    format: &str,
) -> Result<()> {
    let report_paths = match report_path {
        Some(path) => vec![path],
        None => SpecRunner::new(index, config.runner.clone()).written_reports(subject, name),
    };
    if report_paths.is_empty() {
        bail!(
            "No report found for {} '{}'; pass --report or run the specs first",
            subject,
            name
        );
    }

    let mut report = TestReport::default();
    for path in &report_paths {
        report.merge(TestReport::load(index.filesystem(), path)?);
    }

    let mut diagnostics = Diagnostics::new();
    let result =
        CoverageCalculator::new(index).for_subject(subject, name, &report, &mut diagnostics)?;

    match format {
        "json" => {
            let json = serde_json::to_string_pretty(&result.summary())?;
            println!("{}", json);
        }
        _ => print_summary(&format!("Coverage of {} '{}'", subject, name), &result),
    }

    Ok(())
}

async fn run_specs(
    index: &TopologyIndex,
    config: &Config,
    subject: CoverageSubject,
    name: &str,
) -> Result<()> {
    let mut diagnostics = Diagnostics::new();
    let runner = SpecRunner::new(index, config.runner.clone());

    let plans = runner.plans(subject, name, &mut diagnostics)?;
    info!("Running specs for {} '{}' against {} host(s)", subject, name, plans.len());

    let outcomes = runner.run(&ProcessExecutor, &plans).await?;

    let mut report = TestReport::default();
    for outcome in &outcomes {
        match TestReport::load(index.filesystem(), &outcome.report_path) {
            Ok(loaded) => report.merge(loaded),
            Err(CoverageError::MissingReport(path)) => {
                info!("Specs against {} wrote no report at {}", outcome.host, path.display());
            }
            Err(e) => return Err(e.into()),
        }
    }

    let result =
        CoverageCalculator::new(index).for_subject(subject, name, &report, &mut diagnostics)?;
    print_summary(&format!("Coverage of {} '{}'", subject, name), &result);

    let failed = outcomes.iter().filter(|o| !o.success()).count();
    if failed > 0 {
        eprintln!("Specs failed on {} of {} host(s)", failed, outcomes.len());
        std::process::exit(1);
    }

    Ok(())
}
