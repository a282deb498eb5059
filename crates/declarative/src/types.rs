//! Core types for declarative resource management

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Attributes of a declaration or instance, keyed by attribute name.
pub type Attributes = BTreeMap<String, Value>;

/// Unique key of a declaration: `kind.name`.
///
/// Ordering is by kind, then name. The planner uses it to break ties, so
/// plans are reproducible for the same input.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address {
    pub kind: String,
    pub name: String,
}

impl Address {
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.kind, self.name)
    }
}

impl FromStr for Address {
    type Err = String;

    /// Parse `kind.name`. The kind never contains a dot; the name may.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('.') {
            Some((kind, name)) if !kind.is_empty() && !name.is_empty() => {
                Ok(Self::new(kind, name))
            }
            _ => Err(format!("invalid address '{s}': expected kind.name")),
        }
    }
}

impl TryFrom<String> for Address {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.to_string()
    }
}

/// A declared attribute value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Integer(i64),
    String(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Self::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Follow a path of map keys into nested values.
    pub fn lookup(&self, path: &[String]) -> Option<&Value> {
        path.iter()
            .try_fold(self, |value, key| value.as_map()?.get(key))
    }

    /// Short name of the variant, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Integer(_) => "integer",
            Self::String(_) => "string",
            Self::List(_) => "list",
            Self::Map(_) => "map",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::String(s) => f.write_str(s),
            Self::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Self::Map(map) => {
                f.write_str("{")?;
                for (i, (key, value)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key} = {value}")?;
                }
                f.write_str("}")
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Self::Map(map)
    }
}

/// Lifecycle status of one instance within a pass.
///
/// ```text
/// Planned -> Creating -> Created
/// Created -> Updating -> Created
/// Created -> Destroying -> Destroyed
/// Creating | Updating | Destroying -> Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Planned,
    Creating,
    Created,
    Updating,
    Destroying,
    Destroyed,
    Failed,
}

impl InstanceStatus {
    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: Self) -> bool {
        use InstanceStatus::{Created, Creating, Destroyed, Destroying, Failed, Planned, Updating};
        matches!(
            (self, next),
            (Planned, Creating)
                | (Creating, Created)
                | (Created, Updating)
                | (Updating, Created)
                | (Created, Destroying)
                | (Destroying, Destroyed)
                | (Creating | Updating | Destroying, Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Planned => "planned",
            Self::Creating => "creating",
            Self::Created => "created",
            Self::Updating => "updating",
            Self::Destroying => "destroying",
            Self::Destroyed => "destroyed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of executing one plan step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApplyResult {
    /// No changes needed
    NoChange,
    /// Instance was created (or re-created after it disappeared)
    Created,
    /// Instance was updated in place
    Updated,
    /// Instance was destroyed and created again
    Replaced,
    /// Instance was destroyed
    Destroyed,
    /// Instance was already gone
    AlreadyAbsent,
    /// Instance was dropped from state; another instance still holds its object
    Released,
    /// Step failed
    Failed { error: String },
}

impl ApplyResult {
    /// Check if the result represents success (no failure)
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }

    /// Check if the result represents a change
    pub fn is_change(&self) -> bool {
        matches!(
            self,
            Self::Created | Self::Updated | Self::Replaced | Self::Destroyed
        )
    }
}

/// Summary of execution results
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteSummary {
    pub created: usize,
    pub updated: usize,
    pub replaced: usize,
    pub destroyed: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl ExecuteSummary {
    /// Total number of actual changes made
    pub fn total_changes(&self) -> usize {
        self.created + self.updated + self.replaced + self.destroyed
    }

    /// Check if execution was fully successful (no failures)
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    /// Total number of steps processed
    pub fn total(&self) -> usize {
        self.total_changes() + self.unchanged + self.skipped + self.failed
    }

    /// Add a result to the summary
    pub fn add_result(&mut self, result: &ApplyResult) {
        match result {
            ApplyResult::NoChange | ApplyResult::AlreadyAbsent | ApplyResult::Released => {
                self.unchanged += 1;
            }
            ApplyResult::Created => self.created += 1,
            ApplyResult::Updated => self.updated += 1,
            ApplyResult::Replaced => self.replaced += 1,
            ApplyResult::Destroyed => self.destroyed += 1,
            ApplyResult::Failed { .. } => self.failed += 1,
        }
    }
}

/// Options for execution
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Don't make changes, just report what would happen
    pub dry_run: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_parse_and_display() {
        let address: Address = "binding.test".parse().unwrap();
        assert_eq!(address, Address::new("binding", "test"));
        assert_eq!(address.to_string(), "binding.test");

        let dotted: Address = "queue.a.b".parse().unwrap();
        assert_eq!(dotted.name, "a.b");

        assert!("queue".parse::<Address>().is_err());
        assert!(".x".parse::<Address>().is_err());
    }

    #[test]
    fn test_address_ordering_is_kind_then_name() {
        let mut addresses = vec![
            Address::new("queue", "a"),
            Address::new("exchange", "z"),
            Address::new("exchange", "b"),
        ];
        addresses.sort();
        assert_eq!(
            addresses,
            vec![
                Address::new("exchange", "b"),
                Address::new("exchange", "z"),
                Address::new("queue", "a"),
            ]
        );
    }

    #[test]
    fn test_value_lookup_nested() {
        let mut settings = BTreeMap::new();
        settings.insert("durable".to_string(), Value::Bool(true));
        let value = Value::Map(BTreeMap::from([("settings".to_string(), Value::Map(settings))]));

        let path = vec!["settings".to_string(), "durable".to_string()];
        assert_eq!(value.lookup(&path), Some(&Value::Bool(true)));
        assert_eq!(value.lookup(&["missing".to_string()]), None);
        assert_eq!(value.lookup(&[]), Some(&value));
    }

    #[test]
    fn test_value_display() {
        assert_eq!(Value::from("x").to_string(), "x");
        assert_eq!(Value::from(42).to_string(), "42");
        assert_eq!(
            Value::List(vec![Value::from(1), Value::from("a")]).to_string(),
            "[1, a]"
        );
    }

    #[test]
    fn test_status_transitions() {
        use InstanceStatus::*;
        assert!(Planned.can_transition_to(Creating));
        assert!(Creating.can_transition_to(Created));
        assert!(Created.can_transition_to(Updating));
        assert!(Updating.can_transition_to(Created));
        assert!(Created.can_transition_to(Destroying));
        assert!(Destroying.can_transition_to(Destroyed));
        assert!(Creating.can_transition_to(Failed));
        assert!(Updating.can_transition_to(Failed));
        assert!(Destroying.can_transition_to(Failed));

        assert!(!Planned.can_transition_to(Created));
        assert!(!Created.can_transition_to(Failed));
        assert!(!Destroyed.can_transition_to(Creating));
        assert!(!Failed.can_transition_to(Created));
    }

    #[test]
    fn test_summary_counts() {
        let mut summary = ExecuteSummary::default();
        summary.add_result(&ApplyResult::Created);
        summary.add_result(&ApplyResult::Replaced);
        summary.add_result(&ApplyResult::AlreadyAbsent);
        summary.add_result(&ApplyResult::Failed {
            error: "boom".into(),
        });

        assert_eq!(summary.total_changes(), 2);
        assert_eq!(summary.total(), 4);
        assert!(!summary.is_success());
    }
}
