//! Transaction log viewer

use anyhow::{Context as AnyhowContext, Result};
use chrono::Local;
use colored::Colorize;
use reconcile::{ChangeRecord, Journal, Value};

use crate::Context;
use crate::cli::HistoryArgs;
use crate::paths;
use crate::progress::symbol;
use crate::state::JsonlJournal;
use crate::ui;

pub fn run(_ctx: &Context, args: HistoryArgs) -> Result<()> {
    let journal = JsonlJournal::open(paths::journal_file());
    let records = journal
        .history(args.param.as_deref())
        .with_context(|| format!("Could not read {}", journal.path().display()))?;
    let records = tail(records, args.limit);

    if args.json {
        return ui::json(&records);
    }

    if records.is_empty() {
        ui::info("No changes recorded");
        ui::dim(&journal.path().display().to_string());
        return Ok(());
    }

    ui::header(&format!("History ({} records)", records.len()));
    let mut last_run = "";
    for record in &records {
        if record.run_id() != last_run {
            last_run = record.run_id();
            ui::section(&format!(
                "{} {}",
                record
                    .started_at()
                    .with_timezone(&Local)
                    .format("%Y-%m-%d %H:%M:%S"),
                record.goal()
            ));
        }
        print_record(record);
    }

    Ok(())
}

/// Keep the last `limit` records
fn tail(mut records: Vec<ChangeRecord>, limit: Option<usize>) -> Vec<ChangeRecord> {
    if let Some(limit) = limit
        && records.len() > limit
    {
        records.drain(..records.len() - limit);
    }
    records
}

fn print_record(record: &ChangeRecord) {
    let show = |v: Option<&Value>| v.map_or_else(|| "-".to_string(), ToString::to_string);
    println!(
        "  {} {} {} {}",
        symbol(record.outcome()),
        ui::fit(record.parameter_id(), 34),
        ui::fit(record.outcome().as_str(), 15),
        format!(
            "{} → {}",
            show(record.observed_before()),
            show(record.observed_after())
        )
        .dimmed()
    );
    if let Some(detail) = record.detail() {
        ui::dim(detail);
    }
}
