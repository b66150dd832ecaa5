pub mod types;

pub use types::{ActionRecord, ActionStatus, ExecutionReport};

use std::path::Path;

use colored::Colorize;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::dispatch::Plan;
use crate::worker::JobOutcome;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Failed to write report file: {0}")]
    FileWrite(#[from] std::io::Error),
}

/// Print a plan without executing it (`--dry-run`).
pub fn print_plan(plan: &Plan) {
    println!();
    println!("{} on {} #{}", plan.event.bold(), plan.repository, plan.number);
    println!();
    println!("═══ Planned Actions ═══");
    if plan.is_empty() {
        println!("  Nothing to do.");
    }
    for action in &plan.actions {
        println!("  • {action}");
    }
    println!();
}

/// Output the report to terminal (default) or to a markdown file.
#[instrument(skip(report), fields(repository = %report.repository, number = report.number, event = %report.event))]
pub fn output(report: &ExecutionReport, output_path: Option<&Path>) -> Result<(), ReportError> {
    match output_path {
        None => {
            debug!("writing report to terminal");
            print_terminal_report(report);
            Ok(())
        }
        Some(path) => {
            debug!(path = %path.display(), "writing report to file");
            write_markdown_report(report, path)
        }
    }
}

fn print_terminal_report(report: &ExecutionReport) {
    println!();
    println!("{} on {} #{}", report.event.bold(), report.repository, report.number);
    if let Some(delivery) = &report.delivery {
        println!("Delivery: {delivery}");
    }
    println!();

    println!("═══ Actions ═══");
    if report.actions.is_empty() {
        println!("  Nothing to do.");
    }
    for record in &report.actions {
        match &record.status {
            ActionStatus::Failed(error) => {
                println!("  {} {}: {}", colorize_status(&record.status), record.action, error.red())
            }
            ActionStatus::Skipped(reason) => {
                println!("  {} {}: {}", colorize_status(&record.status), record.action, reason.yellow())
            }
            status => println!("  {} {}", colorize_status(status), record.action),
        }
    }
    println!();

    if !report.jobs.is_empty() {
        println!("═══ Jobs ═══");
        for job in &report.jobs {
            let (mark, detail) = match &job.outcome {
                JobOutcome::Succeeded(detail) => ("✓".green().bold(), detail),
                JobOutcome::Failed(detail) => ("✗".red().bold(), detail),
            };
            println!("  {mark} {}: {detail}", job.description);
        }
        println!();
    }

    let summary = summary(report);
    if report.has_failures() {
        println!("═══ {} ═══", summary.red().bold());
    } else {
        println!("═══ {} ═══", summary.green().bold());
    }
    println!();
}

fn write_markdown_report(report: &ExecutionReport, path: &Path) -> Result<(), ReportError> {
    let mut md = String::new();
    md.push_str(&format!(
        "# {} on {} #{}\n\n",
        report.event, report.repository, report.number
    ));
    if let Some(delivery) = &report.delivery {
        md.push_str(&format!("**Delivery:** `{delivery}`\n\n"));
    }

    md.push_str("## Actions\n\n");
    if report.actions.is_empty() {
        md.push_str("Nothing to do.\n\n");
    } else {
        for record in &report.actions {
            match &record.status {
                ActionStatus::Applied => md.push_str(&format!("- **[applied]** {}\n", record.action)),
                ActionStatus::Unchanged => md.push_str(&format!("- **[unchanged]** {}\n", record.action)),
                ActionStatus::Skipped(reason) => {
                    md.push_str(&format!("- **[skipped]** {} ({reason})\n", record.action))
                }
                ActionStatus::Failed(error) => {
                    md.push_str(&format!("- **[failed]** {} (`{error}`)\n", record.action))
                }
            }
        }
        md.push('\n');
    }

    if !report.jobs.is_empty() {
        md.push_str("## Jobs\n\n");
        for job in &report.jobs {
            match &job.outcome {
                JobOutcome::Succeeded(detail) => {
                    md.push_str(&format!("- **[succeeded]** {}: {detail}\n", job.description))
                }
                JobOutcome::Failed(detail) => md.push_str(&format!("- **[failed]** {}: {detail}\n", job.description)),
            }
        }
        md.push('\n');
    }

    md.push_str(&format!("## {}\n", summary(report)));

    std::fs::write(path, md)?;
    Ok(())
}

fn summary(report: &ExecutionReport) -> String {
    format!(
        "{} applied, {} unchanged, {} skipped, {} failed",
        report.applied(),
        report.unchanged(),
        report.skipped(),
        report.failed()
    )
}

fn colorize_status(status: &ActionStatus) -> colored::ColoredString {
    match status {
        ActionStatus::Applied => "✓".green().bold(),
        ActionStatus::Unchanged => "=".dimmed(),
        ActionStatus::Skipped(_) => "-".yellow(),
        ActionStatus::Failed(_) => "✗".red().bold(),
    }
}
