//! `warren verify`: check that every tracked object exists on the broker.

use anyhow::{Result, bail};
use brokeradmin::AdminApi;
use colored::Colorize;
use std::path::Path;
use std::sync::Arc;

use crate::Context;
use crate::cli::VerifyArgs;
use crate::reader::BrokerReader;
use crate::state;
use crate::ui;
use crate::verify::{self, Outcome};

pub fn run(ctx: &Context, args: &VerifyArgs) -> Result<()> {
    let api = super::connect(ctx)?;
    let state_path = super::state_path(ctx)?;
    let outcomes = check(api, args.jobs, &state_path)?;

    if !ctx.quiet {
        ui::header("Verify");
    }
    report(ctx, &outcomes)
}

pub(crate) fn check(
    api: Arc<dyn AdminApi>,
    jobs: usize,
    state_path: &Path,
) -> Result<Vec<Outcome>> {
    let state = state::load(state_path)?;
    let reader = BrokerReader::new(api);
    verify::verify_all(&reader, &state, jobs)
}

fn report(ctx: &Context, outcomes: &[Outcome]) -> Result<()> {
    let mut failed = 0;
    for outcome in outcomes {
        match &outcome.result {
            Ok(_) => {
                if !ctx.quiet {
                    println!("  {} {}", "✓".green(), outcome.address);
                }
            }
            Err(e) => {
                failed += 1;
                println!("  {} {}: {e}", "✗".red(), outcome.address);
            }
        }
    }

    if failed > 0 {
        bail!("{failed} of {} tracked instance(s) failed verification", outcomes.len());
    }
    if !ctx.quiet {
        println!();
        ui::success(&format!("All {} tracked instance(s) found", outcomes.len()));
    }
    Ok(())
}
