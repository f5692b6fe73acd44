//! Outcome table and run summary - hosttune-specific UI

use colored::Colorize;
use reconcile::{ChangeRecord, Outcome, RunReport, RunSummary, Value};
use serde::Serialize;

use crate::progress::symbol;
use crate::ui;

const ID_WIDTH: usize = 34;
const OUTCOME_WIDTH: usize = 15;

/// Outcomes that get their own call-out after the table, in display order
const CALLOUTS: [(Outcome, &str); 4] = [
    (Outcome::Denied, "Denied by the OS, driver or firmware"),
    (
        Outcome::Unverified,
        "Written but not confirmed by re-read",
    ),
    (Outcome::Unreadable, "Could not be read"),
    (Outcome::Unsupported, "Not present on this host"),
];

/// JSON shape of a run: the report plus its counts
#[derive(Serialize)]
pub struct JsonReport<'a> {
    #[serde(flatten)]
    pub report: &'a RunReport,
    pub summary: RunSummary,
}

impl<'a> JsonReport<'a> {
    pub fn new(report: &'a RunReport) -> Self {
        Self {
            report,
            summary: report.summary(),
        }
    }
}

/// Print the per-parameter table, the call-outs and the summary line
pub fn display(report: &RunReport, title: &str) {
    ui::header(&format!("{title} ({} parameters)", report.records.len()));

    if report.records.is_empty() {
        ui::dim("No parameters selected");
        return;
    }

    for record in &report.records {
        println!(
            "  {} {} {} {}",
            symbol(record.outcome()),
            ui::fit(record.parameter_id(), ID_WIDTH),
            outcome_label(record.outcome()),
            transition(record).dimmed()
        );
    }

    for (outcome, heading) in CALLOUTS {
        let matching: Vec<&ChangeRecord> = report.with_outcome(outcome).collect();
        if matching.is_empty() {
            continue;
        }
        ui::section(&format!("{heading} ({})", matching.len()));
        for record in matching {
            println!(
                "  {} {}: {}",
                symbol(outcome),
                record.parameter_id(),
                record.detail().unwrap_or("no detail recorded")
            );
        }
    }

    if !report.journal_errors.is_empty() {
        ui::section("Not recorded in the transaction log");
        for error in &report.journal_errors {
            ui::warn(error);
        }
    }

    println!();
    let summary = report.summary();
    let line = summary_line(&summary, report.mode.dry_run);
    if summary.is_clean() {
        ui::success(&line);
    } else {
        ui::warn(&line);
    }
    if report.mode.dry_run {
        ui::info("Dry run - no changes made");
    }
}

fn outcome_label(outcome: Outcome) -> colored::ColoredString {
    let label = ui::fit(outcome.as_str(), OUTCOME_WIDTH);
    match outcome {
        Outcome::Applied => label.green(),
        Outcome::WouldChange => label.cyan(),
        Outcome::Denied | Outcome::Unreadable => label.red(),
        Outcome::Unverified => label.yellow(),
        Outcome::AlreadyMatched | Outcome::Unsupported => label.dimmed(),
    }
}

fn show(value: Option<&Value>) -> String {
    value.map_or_else(|| "-".to_string(), ToString::to_string)
}

/// `before → after` for the columns that make sense for this outcome
fn transition(record: &ChangeRecord) -> String {
    let before = show(record.observed_before());
    match record.outcome() {
        Outcome::Applied | Outcome::Unverified => format!(
            "{before} → {} (requested {})",
            show(record.observed_after()),
            show(record.requested_value())
        ),
        Outcome::WouldChange => format!("{before} → {}", show(record.requested_value())),
        Outcome::AlreadyMatched => before,
        Outcome::Denied | Outcome::Unreadable | Outcome::Unsupported => {
            match record.requested_value() {
                Some(requested) => format!("{before} (wanted {requested})"),
                None => String::new(),
            }
        }
    }
}

/// One line telling "nothing needed doing" apart from "something failed"
pub fn summary_line(summary: &RunSummary, dry_run: bool) -> String {
    let total = summary.total();
    let mut parts = Vec::new();
    if summary.applied > 0 {
        parts.push(format!("{} applied", summary.applied));
    }
    if summary.would_change > 0 {
        parts.push(format!("{} would change", summary.would_change));
    }
    if summary.already_matched > 0 {
        parts.push(format!("{} already matched", summary.already_matched));
    }
    if summary.unsupported > 0 {
        parts.push(format!("{} unsupported", summary.unsupported));
    }
    let counts = parts.join(", ");

    if !summary.is_clean() {
        let mut failed = Vec::new();
        if summary.denied > 0 {
            failed.push(format!("{} denied", summary.denied));
        }
        if summary.unverified > 0 {
            failed.push(format!("{} unverified", summary.unverified));
        }
        if summary.unreadable > 0 {
            failed.push(format!("{} unreadable", summary.unreadable));
        }
        let failed = failed.join(", ");
        return if counts.is_empty() {
            format!("{} of {total} parameters need attention: {failed}", summary.failures())
        } else {
            format!(
                "{} of {total} parameters need attention: {failed} ({counts})",
                summary.failures()
            )
        };
    }

    if summary.applied == 0 && summary.would_change == 0 {
        return if counts.is_empty() {
            "Nothing needed doing".to_string()
        } else {
            format!("Nothing needed doing ({counts})")
        };
    }

    if dry_run {
        format!("Drift found: {counts}")
    } else {
        format!("All {total} parameters reconciled: {counts}")
    }
}
