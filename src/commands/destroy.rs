//! `warren destroy`: delete everything in the tracked state.

use anyhow::Result;
use brokeradmin::AdminApi;
use declarative::{AutoConfirm, ExecuteOptions};
use std::path::Path;
use std::sync::Arc;

use crate::Context;
use crate::cli::DestroyArgs;
use crate::progress::{PromptConfirm, StepProgress};
use crate::state;
use crate::ui;

pub fn run(ctx: &Context, args: &DestroyArgs) -> Result<()> {
    let api = super::connect(ctx)?;
    let state_path = super::state_path(ctx)?;
    destroy(ctx, api, args, &state_path)
}

/// Destroy in reverse dependency order. Objects already gone count as done.
pub(crate) fn destroy(
    ctx: &Context,
    api: Arc<dyn AdminApi>,
    args: &DestroyArgs,
    state_path: &Path,
) -> Result<()> {
    let mut state = state::load(state_path)?;
    if state.is_empty() {
        if !ctx.quiet {
            ui::info("Nothing tracked, nothing to destroy");
        }
        return Ok(());
    }

    if !ctx.quiet {
        ui::header(&format!("Destroying {} tracked instance(s)", state.len()));
    }

    let engine = super::engine(api);
    let plan = engine.plan_destroy(&state)?;
    super::print_plan(ctx, &plan);

    let opts = ExecuteOptions::default();
    let mut progress = StepProgress::new(ctx.quiet);
    let report = if args.yes {
        engine.execute(&plan, &mut state, &opts, &mut progress, &mut AutoConfirm)?
    } else {
        engine.execute(&plan, &mut state, &opts, &mut progress, &mut PromptConfirm)?
    };

    state::save(state_path, &mut state)?;
    if report.summary.skipped > 0 {
        ui::warn("Destroy cancelled");
        return Ok(());
    }

    super::print_report(ctx, &report);
    report.into_result()?;
    if !ctx.quiet {
        println!();
        ui::success("Destroy complete!");
    }
    Ok(())
}
