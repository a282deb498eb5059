//! `warren apply`: make the broker match the desired-state file.

use anyhow::Result;
use brokeradmin::AdminApi;
use declarative::{ApplyReport, AutoConfirm, ExecuteOptions};
use std::path::Path;
use std::sync::Arc;

use crate::Context;
use crate::cli::ApplyArgs;
use crate::progress::{PromptConfirm, StepProgress};
use crate::state;
use crate::ui;

pub fn run(ctx: &Context, args: &ApplyArgs) -> Result<()> {
    let api = super::connect(ctx)?;
    let state_path = super::state_path(ctx)?;
    apply(ctx, api, args, &state_path)
}

/// Plan, confirm and execute.
///
/// State is written after execution whether or not a step failed, so the
/// objects created before the failure stay tracked.
pub(crate) fn apply(
    ctx: &Context,
    api: Arc<dyn AdminApi>,
    args: &ApplyArgs,
    state_path: &Path,
) -> Result<()> {
    if !ctx.quiet {
        ui::header(&format!("Applying {}", args.file.display()));
    }
    if args.dry_run && !ctx.quiet {
        ui::warn("Dry run - no changes will be made");
        println!();
    }

    let declarations = super::read_declarations(&args.file)?;
    let engine = super::engine(api);
    let mut state = state::load(state_path)?;

    let plan = engine.plan(&declarations, &mut state)?;
    super::print_plan(ctx, &plan);
    if args.dry_run {
        return Ok(());
    }

    let opts = ExecuteOptions::default();
    let mut progress = StepProgress::new(ctx.quiet);
    let report = if args.yes {
        engine.execute(&plan, &mut state, &opts, &mut progress, &mut AutoConfirm)?
    } else {
        engine.execute(&plan, &mut state, &opts, &mut progress, &mut PromptConfirm)?
    };

    state::save(state_path, &mut state)?;
    finish(ctx, &report);
    report.into_result()?;
    Ok(())
}

fn finish(ctx: &Context, report: &ApplyReport) {
    let summary = &report.summary;
    if summary.skipped > 0 {
        ui::warn("Apply cancelled");
        return;
    }
    if summary.total() == 0 {
        return;
    }

    super::print_report(ctx, report);
    if report.is_success() && !ctx.quiet {
        println!();
        ui::success("Apply complete!");
    }
}
