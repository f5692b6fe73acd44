//! Reconciliation commands: apply, revert, rollback, status

use anyhow::Result;
use reconcile::Goal;

use crate::Context;
use crate::cli::{RunArgs, ViewArgs};
use crate::engine::{self, RunOptions, Session};

pub fn apply(ctx: &Context, args: RunArgs) -> Result<()> {
    run(ctx, args, Goal::Desired, "Apply tuned values")
}

pub fn revert(ctx: &Context, args: RunArgs) -> Result<()> {
    run(ctx, args, Goal::Default, "Revert to OS defaults")
}

pub fn rollback(ctx: &Context, args: RunArgs) -> Result<()> {
    run(ctx, args, Goal::LastKnownGood, "Roll back to last known good")
}

/// Drift report: a preview of `apply`
pub fn status(ctx: &Context, args: ViewArgs) -> Result<()> {
    let session = Session::load(ctx)?;
    let selected = engine::select(&session.registry, &args.select)?;
    let opts = RunOptions {
        dry_run: true,
        yes: true,
        json: args.json,
        quiet: ctx.quiet,
    };
    engine::execute(&selected, Goal::Desired, "Drift from tuned values", &opts)?;
    Ok(())
}

fn run(ctx: &Context, args: RunArgs, goal: Goal, title: &str) -> Result<()> {
    let session = Session::load(ctx)?;
    let selected = engine::select(&session.registry, &args.select)?;
    let opts = RunOptions {
        dry_run: args.dry_run,
        yes: args.yes,
        json: args.json,
        quiet: ctx.quiet,
    };
    engine::execute(&selected, goal, title, &opts)?;
    Ok(())
}
