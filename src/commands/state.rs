//! `warren state`: inspect tracked state without contacting the broker.

use anyhow::{Result, anyhow};
use colored::Colorize;
use declarative::{Address, TrackedInstance, TrackedState};
use std::collections::BTreeSet;

use crate::Context;
use crate::cli::StateCommand;
use crate::state;
use crate::ui;

pub fn run(ctx: &Context, cmd: &StateCommand) -> Result<()> {
    let path = super::state_path(ctx)?;
    let tracked = state::load(&path)?;
    match cmd {
        StateCommand::List => {
            ui::header(&format!("Tracked state ({})", path.display()));
            list(&tracked);
            Ok(())
        }
        StateCommand::Show { address } => show(&tracked, address),
    }
}

fn list(tracked: &TrackedState) {
    if tracked.is_empty() {
        ui::info("Nothing tracked");
        return;
    }

    let kinds: BTreeSet<&str> = tracked.instances.values().map(|i| i.kind.as_str()).collect();

    for kind in kinds {
        ui::section(kind);
        for (address, instance) in tracked.of_kind(kind) {
            println!(
                "  {} {} {}",
                address.name.bold(),
                instance.id.dimmed(),
                format!("({})", instance.status).dimmed()
            );
        }
    }
}

fn show(tracked: &TrackedState, address: &str) -> Result<()> {
    let address: Address = address.parse().map_err(|e: String| anyhow!(e))?;
    let instance = find(tracked, &address)?;

    ui::header(&address.to_string());
    ui::kv("Kind", &instance.kind);
    ui::kv("ID", &instance.id);
    ui::kv("Status", instance.status.as_str());
    if !instance.replaced_ids.is_empty() {
        ui::kv("Pending removal", &instance.replaced_ids.join(", "));
    }
    if let Some(updated_at) = instance.updated_at {
        ui::kv("Updated", &updated_at.to_rfc3339());
    }
    if !instance.depends_on.is_empty() {
        let deps: Vec<String> = instance.depends_on.iter().map(ToString::to_string).collect();
        ui::kv("Depends on", &deps.join(", "));
    }

    ui::section("Attributes");
    for (key, value) in &instance.attributes {
        println!("  {}", key.bold());
        for line in ui::render_value(key, value).lines() {
            ui::dim(&format!("  {line}"));
        }
    }
    Ok(())
}

fn find<'a>(tracked: &'a TrackedState, address: &Address) -> Result<&'a TrackedInstance> {
    tracked.get(address).ok_or_else(|| {
        let known = tracked_names(tracked, &address.kind);
        if known.is_empty() {
            anyhow!("{address} is not tracked")
        } else {
            anyhow!("{address} is not tracked (tracked {}: {})", address.kind, known.join(", "))
        }
    })
}

fn tracked_names(tracked: &TrackedState, kind: &str) -> Vec<String> {
    tracked
        .of_kind(kind)
        .map(|(address, _)| address.name.clone())
        .collect()
}
