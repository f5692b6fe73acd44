//! Boot-time persistence commands: plan, install, uninstall

use anyhow::{Context as AnyhowContext, Result};
use colored::Colorize;
use reconcile::Parameter;
use serde::Serialize;
use std::path::Path;

use crate::Context;
use crate::cli::{RunArgs, ViewArgs};
use crate::engine::executor::confirm_proceed;
use crate::engine::{self, Session};
use crate::persist::{
    self, ArtifactAction, ArtifactResult, ArtifactStatus, PersistenceArtifact, PersistencePlan,
    Removal,
};
use crate::privilege;
use crate::ui;

// ============================================================================
// Plan
// ============================================================================

#[derive(Serialize)]
struct PlannedArtifact<'a> {
    #[serde(flatten)]
    artifact: &'a PersistenceArtifact,
    status: ArtifactStatus,
}

#[derive(Serialize)]
struct JsonPlan<'a> {
    artifacts: Vec<PlannedArtifact<'a>>,
    entries: &'a [(String, persist::PlanEntry)],
}

pub fn plan(ctx: &Context, args: ViewArgs) -> Result<()> {
    let session = Session::load(ctx)?;
    let selected = engine::select(&session.registry, &args.select)?;
    let root = session.config.persistence.root();
    let plan = install_plan(&session, &selected, &root);
    let statuses = statuses(&plan.artifacts)?;

    if args.json {
        let artifacts = plan
            .artifacts
            .iter()
            .zip(&statuses)
            .map(|(artifact, status)| PlannedArtifact {
                artifact,
                status: *status,
            })
            .collect();
        return ui::json(&JsonPlan {
            artifacts,
            entries: &plan.entries,
        });
    }

    ui::header(&format!(
        "Persistence plan ({} artifacts for {} parameters)",
        plan.artifacts.len(),
        selected.len()
    ));

    for (artifact, status) in plan.artifacts.iter().zip(&statuses) {
        let (symbol, label) = match status {
            ArtifactStatus::Installed => ("✓".green(), "installed".green()),
            ArtifactStatus::Stale => ("~".yellow(), "stale".yellow()),
            ArtifactStatus::Missing => ("+".cyan(), "missing".cyan()),
        };
        println!();
        println!(
            "  {} {} ({})",
            symbol,
            artifact.path.display().to_string().bold(),
            label
        );
        ui::kv("kind", &artifact.kind.to_string());
        ui::kv("parameters", &artifact.parameter_ids.join(", "));
        if *status != ArtifactStatus::Installed {
            persist::show_diff(artifact);
        }
    }

    print_unmanaged(&plan);
    Ok(())
}

/// Plan for `selected`, merged with what the shared files already carry
fn install_plan(session: &Session, selected: &[&Parameter], root: &Path) -> PersistencePlan {
    let all = session.registry.list_parameters(&[]);
    let installed = persist::installed_parameters(root);
    persist::plan_install(&all, selected, &installed, root)
}

fn statuses(artifacts: &[PersistenceArtifact]) -> Result<Vec<ArtifactStatus>> {
    artifacts
        .iter()
        .map(|a| persist::status(a).with_context(|| format!("Could not read {}", a.path.display())))
        .collect()
}

/// Native and non-durable parameters; never silently skipped
fn print_unmanaged(plan: &PersistencePlan) {
    let native: Vec<&str> = plan.native().collect();
    if !native.is_empty() {
        ui::section("Kept by the target itself");
        for id in native {
            println!("  {} {}", "○".dimmed(), id);
        }
    }

    let not_durable: Vec<(&str, &str)> = plan.not_durable().collect();
    if !not_durable.is_empty() {
        ui::section("Will not survive reboot");
        for (id, reason) in not_durable {
            println!("  {} {}: {}", "⚠".yellow(), id, reason.dimmed());
        }
    }
}

// ============================================================================
// Install / Uninstall
// ============================================================================

pub fn install(ctx: &Context, args: RunArgs) -> Result<()> {
    privilege::require_root("install-persistence", args.dry_run)?;
    let session = Session::load(ctx)?;
    let selected = engine::select(&session.registry, &args.select)?;
    let root = session.config.persistence.root();
    let plan = install_plan(&session, &selected, &root);

    let pending = statuses(&plan.artifacts)?
        .iter()
        .filter(|s| **s != ArtifactStatus::Installed)
        .count();

    if pending > 0 && !args.dry_run {
        if !args.json {
            println!();
            println!(
                "  {} {} of {} artifacts will be written under {}",
                "→".cyan(),
                pending,
                plan.artifacts.len(),
                root.display()
            );
        }
        if !confirm_proceed(args.yes)? {
            eprintln!("  {} Aborted", "✗".red());
            return Ok(());
        }
    }

    let results = persist::install(&plan.artifacts, session.runner.as_ref(), args.dry_run);
    if args.json {
        return ui::json(&results);
    }
    display_results("Install persistence", &results, args.dry_run);
    print_unmanaged(&plan);
    Ok(())
}

/// Remove artifacts for the selection, or every managed file when nothing is selected
pub fn uninstall(ctx: &Context, args: RunArgs) -> Result<()> {
    privilege::require_root("uninstall-persistence", args.dry_run)?;
    let session = Session::load(ctx)?;
    let root = session.config.persistence.root();

    let everything = args.select.categories.is_empty() && args.select.params.is_empty();
    let (removals, rewrites) = if everything {
        let all = session.registry.list_parameters(&[]);
        (all_removals(&all, &root), Vec::new())
    } else {
        let selected = engine::select(&session.registry, &args.select)?;
        let all = session.registry.list_parameters(&[]);
        let installed = persist::installed_parameters(&root);
        persist::plan_uninstall(&all, &selected, &installed, &root)
    };

    if removals.is_empty() && rewrites.is_empty() {
        ui::info("No persistence artifacts to remove");
        return Ok(());
    }

    if !args.dry_run {
        if !args.json {
            println!();
            println!(
                "  {} {} artifacts will be removed and {} rewritten under {}",
                "→".cyan(),
                removals.len(),
                rewrites.len(),
                root.display()
            );
        }
        if !confirm_proceed(args.yes)? {
            eprintln!("  {} Aborted", "✗".red());
            return Ok(());
        }
    }

    let runner = session.runner.as_ref();
    let mut results = persist::uninstall(&removals, runner, args.dry_run);
    results.extend(persist::install(&rewrites, runner, args.dry_run));

    if args.json {
        return ui::json(&results);
    }
    display_results("Uninstall persistence", &results, args.dry_run);
    Ok(())
}

/// Every managed file on disk, plus planned files so missing ones report as already absent
fn all_removals(all: &[&Parameter], root: &Path) -> Vec<Removal> {
    let mut removals = persist::discover(root);
    for artifact in persist::plan(all, root).artifacts {
        if !removals.iter().any(|r| r.path == artifact.path) {
            removals.push(Removal::from(&artifact));
        }
    }
    removals
}

fn display_results(title: &str, results: &[ArtifactResult], dry_run: bool) {
    ui::header(&format!("{title} ({} artifacts)", results.len()));

    let mut failed = 0;
    let mut changed = 0;
    for result in results {
        let (symbol, label) = match &result.action {
            ArtifactAction::Unchanged => ("○".dimmed(), "unchanged".to_string()),
            ArtifactAction::AlreadyAbsent => ("○".dimmed(), "already absent".to_string()),
            ArtifactAction::Written => ("✓".green(), "written".to_string()),
            ArtifactAction::Removed => ("✓".green(), "removed".to_string()),
            ArtifactAction::WouldWrite => ("→".cyan(), "would write".to_string()),
            ArtifactAction::WouldRemove => ("→".cyan(), "would remove".to_string()),
            ArtifactAction::Failed(reason) => ("✗".red(), reason.clone()),
        };
        if result.action.is_failure() {
            failed += 1;
        } else if !matches!(
            result.action,
            ArtifactAction::Unchanged | ArtifactAction::AlreadyAbsent
        ) {
            changed += 1;
        }
        println!(
            "  {} {} {}",
            symbol,
            ui::fit(&result.id, 30),
            format!("{} ({})", label, result.path.display()).dimmed()
        );
        for warning in &result.warnings {
            println!("    {} {}", "⚠".yellow(), warning);
        }
    }

    println!();
    if failed > 0 {
        ui::warn(&format!("{failed} of {} artifacts failed", results.len()));
    } else if changed == 0 {
        ui::success("Nothing needed doing");
    } else {
        ui::success(&format!("{changed} of {} artifacts updated", results.len()));
    }
    if dry_run {
        ui::info("Dry run - no changes made");
    }
}
