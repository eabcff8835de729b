//! Console output for coverage and listing commands.
//!
//! Rendering of the summary text itself lives on
//! [`CoverageReport::render`](crate::coverage::CoverageReport::render);
//! this module only adds colour.

use crate::coverage::CoverageReport;

/// Prints a coverage summary with colored output.
pub fn print_summary(title: &str, report: &CoverageReport) {
    println!();
    println!("{}", console::style(title).bold());
    println!("  Total resources:   {}", report.total.len());
    println!(
        "  Touched resources: {}",
        console::style(report.touched.len()).green()
    );

    let percentage = format!("{}%", report.percentage);
    let percentage = match report.percentage {
        100 => console::style(percentage).green().bold(),
        50..=99 => console::style(percentage).yellow(),
        _ => console::style(percentage).red().bold(),
    };
    println!("  Resource coverage: {}", percentage);

    if !report.uncovered.is_empty() {
        println!();
        println!("{}", console::style("Uncovered resources:").red());
        for resource in &report.uncovered {
            println!("  - {}", resource);
        }
    }
}

/// Prints a titled list, or a dimmed placeholder when it is empty.
pub fn print_list(title: &str, items: &[String]) {
    println!("{}", console::style(title).bold());
    if items.is_empty() {
        println!("  {}", console::style("(none)").dim());
    }
    for item in items {
        println!("  {}", item);
    }
}
