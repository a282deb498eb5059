//! Attribute-level diffs between tracked and desired state

use crate::planner::{Action, Step};
use crate::types::{Attributes, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One attribute whose tracked and desired values differ.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeChange {
    pub key: String,
    /// Tracked value, `None` if the attribute was never recorded.
    pub old: Option<Value>,
    pub new: Value,
    /// Whether the change can only be applied by replacing the instance.
    pub forces_replace: bool,
}

/// Compare tracked attributes against desired ones.
///
/// Only keys present in `desired` are compared: handlers fill every default
/// during normalization, so a desired map is complete, while a tracked map
/// may carry extra keys a refresh read back.
pub fn compute_changes(
    tracked: &Attributes,
    desired: &Attributes,
    mutable: &[&str],
) -> Vec<AttributeChange> {
    desired
        .iter()
        .filter(|(key, value)| tracked.get(*key) != Some(*value))
        .map(|(key, value)| AttributeChange {
            key: key.clone(),
            old: tracked.get(key).cloned(),
            new: value.clone(),
            forces_replace: !mutable.contains(&key.as_str()),
        })
        .collect()
}

/// Diff summary statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiffSummary {
    /// Number of instances to create
    pub additions: usize,
    /// Number of instances to update in place
    pub updates: usize,
    /// Number of instances to replace
    pub replacements: usize,
    /// Number of instances to destroy
    pub removals: usize,
    /// Number of instances already up to date
    pub unchanged: usize,
}

impl DiffSummary {
    /// Create a summary from plan steps
    pub fn from_steps(steps: &[Step]) -> Self {
        let mut summary = Self::default();
        for step in steps {
            match step.action {
                Action::Create => summary.additions += 1,
                Action::Update => summary.updates += 1,
                Action::Replace { .. } => summary.replacements += 1,
                Action::Destroy => summary.removals += 1,
                Action::NoOp => summary.unchanged += 1,
            }
        }
        summary
    }

    /// Total number of changes
    pub fn total(&self) -> usize {
        self.additions + self.updates + self.replacements + self.removals
    }

    /// Check if there are any changes
    pub fn has_changes(&self) -> bool {
        self.total() > 0
    }
}

/// Group steps by resource kind
pub fn group_by_kind(steps: &[Step]) -> BTreeMap<&str, Vec<&Step>> {
    let mut groups: BTreeMap<&str, Vec<&Step>> = BTreeMap::new();
    for step in steps {
        groups.entry(step.address.kind.as_str()).or_default().push(step);
    }
    groups
}
