use colored::Colorize;
use declarative::{Action, Address, AttributeChange, Step, Value};

/// Attributes whose values are never printed.
const SENSITIVE: &[&str] = &["password"];

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print a section header
pub fn section(title: &str) {
    println!();
    println!("{}", title.cyan().bold());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

// ============================================================================
// Plan Rendering
// ============================================================================

/// Colored action marker for a plan line.
fn action_marker(action: &Action) -> String {
    let symbol = format!("{:>3}", action.symbol());
    match action {
        Action::Create => symbol.green().to_string(),
        Action::Update | Action::Replace { .. } => symbol.yellow().to_string(),
        Action::Destroy => symbol.red().to_string(),
        Action::NoOp => symbol.dimmed().to_string(),
    }
}

/// Print one plan step and its attribute changes.
pub fn step(step: &Step) {
    println!(
        "{} {} {}",
        action_marker(&step.action),
        step.address,
        format!("({})", step.action).dimmed()
    );
    for change in &step.changes {
        attribute_change(change);
    }
}

/// A replaced object still waiting to be deleted.
pub fn leftover(address: &Address, id: &str) {
    println!(
        "{} {address} {}",
        action_marker(&Action::Destroy),
        format!("(remove replaced object {id})").dimmed()
    );
}

fn attribute_change(change: &AttributeChange) {
    let marker = if change.forces_replace {
        " (forces replacement)".red().to_string()
    } else {
        String::new()
    };
    println!("      {}{marker}", change.key.bold());

    let old = change
        .old
        .as_ref()
        .map(|value| render_value(&change.key, value))
        .unwrap_or_default();
    let new = render_value(&change.key, &change.new);
    for line in diff_lines(&old, &new) {
        println!("        {line}");
    }
}

/// Render a value for display, hiding secrets and spreading maps over lines.
pub fn render_value(key: &str, value: &Value) -> String {
    match value {
        Value::Map(map) if !map.is_empty() && !SENSITIVE.contains(&key) => map
            .iter()
            .map(|(k, v)| format!("{k} = {}\n", inline(k, v)))
            .collect(),
        other => format!("{}\n", inline(key, other)),
    }
}

fn inline(key: &str, value: &Value) -> String {
    if SENSITIVE.contains(&key) {
        return "(sensitive)".to_string();
    }
    match value {
        Value::String(s) => format!("{s:?}"),
        other => other.to_string(),
    }
}

/// Line diff of two renderings, colored.
fn diff_lines(old: &str, new: &str) -> Vec<String> {
    let diff = similar::TextDiff::from_lines(old, new);
    diff.iter_all_changes()
        .filter_map(|change| {
            let text = change.value().trim_end_matches('\n');
            match change.tag() {
                similar::ChangeTag::Delete => Some(format!("- {text}").red().to_string()),
                similar::ChangeTag::Insert => Some(format!("+ {text}").green().to_string()),
                similar::ChangeTag::Equal => None,
            }
        })
        .collect()
}
