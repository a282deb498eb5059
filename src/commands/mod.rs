// Plan and converge
pub mod apply;
pub mod destroy;
pub mod plan;

// Inspection
pub mod state;
pub mod verify;

use anyhow::{Context as AnyhowContext, Result};
use brokeradmin::{AdminApi, HttpAdmin};
use colored::Colorize;
use declarative::{ApplyPlan, ApplyReport, Attributes, Declaration, Engine, InstanceStatus};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::Context;
use crate::config::{self, Overrides};
use crate::resource;
use crate::ui;

/// Build a management API client from config file, flags and environment.
pub(crate) fn connect(ctx: &Context) -> Result<Arc<dyn AdminApi>> {
    let overrides = Overrides {
        config: ctx.connection.config.clone(),
        endpoint: ctx.connection.endpoint.clone(),
        username: ctx.connection.username.clone(),
        password: ctx.connection.password.clone(),
    };
    let connection = config::connection(&overrides)?;
    log::info!("Using {} as {}", connection.endpoint, connection.username);
    Ok(Arc::new(HttpAdmin::new(&connection)))
}

/// Path of the tracked state file for this invocation.
pub(crate) fn state_path(ctx: &Context) -> Result<PathBuf> {
    crate::state::resolve(ctx.state.as_deref())
}

pub(crate) fn engine(api: Arc<dyn AdminApi>) -> Engine {
    Engine::new(resource::registry(api))
}

/// Read a desired-state file of `[kind.name]` tables.
pub(crate) fn read_declarations(path: &Path) -> Result<Vec<Declaration>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Could not read {}", path.display()))?;
    let document: BTreeMap<String, BTreeMap<String, Attributes>> = toml::from_str(&content)
        .with_context(|| format!("Invalid desired-state file: {}", path.display()))?;

    let declarations = declarative::from_document(document)
        .with_context(|| format!("Invalid declaration in {}", path.display()))?;
    log::debug!(
        "Read {} declaration(s) from {}",
        declarations.len(),
        path.display()
    );
    Ok(declarations)
}

/// Print the steps of a plan and a one-line tally.
///
/// No-op steps are shown only with `-v`.
pub(crate) fn print_plan(ctx: &Context, plan: &ApplyPlan) {
    if ctx.quiet {
        return;
    }

    for (address, ids) in &plan.leftovers {
        for id in ids {
            ui::leftover(address, id);
        }
    }
    for step in &plan.steps {
        if step.action.is_change() || ctx.verbose > 0 {
            ui::step(step);
        }
    }

    let summary = plan.summary();
    println!();
    if summary.has_changes() {
        println!(
            "Plan: {} to add, {} to change, {} to replace, {} to destroy ({} unchanged)",
            summary.additions.to_string().green(),
            summary.updates.to_string().yellow(),
            summary.replacements.to_string().yellow(),
            summary.removals.to_string().red(),
            summary.unchanged
        );
    } else {
        ui::success("No changes - the broker matches the desired state");
    }
}

/// Print the result of an execution, including what never ran after a failure.
pub(crate) fn print_report(ctx: &Context, report: &ApplyReport) {
    if ctx.quiet {
        return;
    }

    let summary = &report.summary;
    println!();
    ui::kv("Created", &summary.created.to_string());
    ui::kv("Updated", &summary.updated.to_string());
    ui::kv("Replaced", &summary.replaced.to_string());
    ui::kv("Destroyed", &summary.destroyed.to_string());
    ui::kv("Unchanged", &summary.unchanged.to_string());
    if summary.skipped > 0 {
        ui::kv("Skipped", &summary.skipped.to_string());
    }

    if report.is_success() {
        return;
    }

    let failed = report
        .statuses
        .iter()
        .filter(|(_, status)| **status == InstanceStatus::Failed);
    for (address, _) in failed {
        println!("  {} {address}", "✗".red());
    }

    let pending: Vec<String> = report
        .statuses
        .iter()
        .filter(|(_, status)| **status == InstanceStatus::Planned)
        .map(|(address, _)| address.to_string())
        .collect();
    if !pending.is_empty() {
        ui::dim(&format!("Not attempted: {}", pending.join(", ")));
    }
}

/// Print advice for management API failures anywhere in an error chain.
pub fn hint(err: &anyhow::Error) {
    let Some(api_error) = err
        .chain()
        .find_map(|cause| cause.downcast_ref::<brokeradmin::Error>())
    else {
        return;
    };

    let category = api_error.category();
    ui::dim(&format!("{}: {}", category.description(), category.advice()));
}

#[cfg(test)]
mod scenarios;

#[cfg(test)]
pub(crate) mod testing {
    use crate::Context;
    use crate::cli::ConnectionArgs;
    use std::fs;
    use std::path::{Path, PathBuf};

    pub fn quiet() -> Context {
        Context {
            verbose: 0,
            quiet: true,
            connection: ConnectionArgs::default(),
            state: None,
        }
    }

    pub fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }
}
