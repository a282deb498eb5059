//! `warren plan`: show what apply would change.
//!
//! Planning refreshes tracked instances against the broker but never writes
//! the state file.

use anyhow::{Context as AnyhowContext, Result};
use brokeradmin::AdminApi;
use declarative::ApplyPlan;
use std::path::Path;
use std::sync::Arc;

use crate::Context;
use crate::cli::PlanArgs;
use crate::state;
use crate::ui;

pub fn run(ctx: &Context, args: &PlanArgs) -> Result<()> {
    let api = super::connect(ctx)?;
    let state_path = super::state_path(ctx)?;
    let plan = plan(api, &args.file, &state_path)?;

    if args.json {
        let json = serde_json::to_string_pretty(&plan).context("Failed to serialize plan")?;
        println!("{json}");
        return Ok(());
    }

    if !ctx.quiet {
        ui::header(&format!("Plan for {}", args.file.display()));
    }
    super::print_plan(ctx, &plan);
    Ok(())
}

/// Build the apply plan for a desired-state file.
pub(crate) fn plan(api: Arc<dyn AdminApi>, file: &Path, state_path: &Path) -> Result<ApplyPlan> {
    let declarations = super::read_declarations(file)?;
    let mut state = state::load(state_path)?;
    let plan = super::engine(api).plan(&declarations, &mut state)?;
    Ok(plan)
}
