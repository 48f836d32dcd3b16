//! `diff` and `apply`: compare the catalog with the broker and converge it.

use anyhow::{Context as AnyhowContext, Result, bail};
use colored::Colorize;

use crate::Context;
use crate::cli::{ApplyArgs, DiffArgs};
use crate::commands::{self, wait};
use crate::engine::{self, ExecuteOptions, differ};
use crate::ui;

pub fn diff(ctx: &Context, args: &DiffArgs) -> Result<()> {
    let file = commands::load_catalog(args.file.as_deref(), true)?;
    let reconciler = commands::reconciler(ctx, &file.settings)?;

    let mut catalog = file.catalog();
    let bound = reconciler
        .prefetch(&mut catalog)
        .context("Failed to list users")?;
    if !ctx.quiet {
        ui::info(&format!(
            "{} catalog users, {} already on the broker",
            catalog.len(),
            bound
        ));
    }
    if ctx.verbose > 0 {
        for (name, entry) in &catalog {
            let state = if entry.is_bound() { "on broker" } else { "not on broker" };
            ui::dim(&format!("{name}: {state}"));
        }
    }

    let diffs = differ::compute_diffs(&reconciler, &catalog)?;
    differ::display_diff(&diffs);
    Ok(())
}

pub fn apply(ctx: &Context, args: &ApplyArgs) -> Result<()> {
    let file = commands::load_catalog(args.file.as_deref(), true)?;
    let reconciler = commands::reconciler(ctx, &file.settings)?;

    if args.wait {
        wait::wait_with_spinner(ctx, &reconciler, &file.settings.wait_policy())?;
    }

    let mut catalog = file.catalog();
    reconciler
        .prefetch(&mut catalog)
        .context("Failed to list users")?;

    let opts = ExecuteOptions {
        dry_run: args.dry_run,
        yes: args.yes,
    };
    let summary = engine::execute(&reconciler, &catalog, &opts)?;

    if !summary.is_success() {
        bail!("{} users failed to converge", summary.failed);
    }
    if summary.total_changes() == 0 && !args.dry_run && !ctx.quiet {
        println!("  {}", "Nothing to do".dimmed());
    }
    Ok(())
}
