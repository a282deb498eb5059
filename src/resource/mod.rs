//! Lifecycle handlers for RabbitMQ objects.
//!
//! Each handler owns one kind and talks to the broker only through the
//! shared [`AdminApi`] handle and a [`BrokerReader`]. Handlers validate and
//! fill in defaults in `normalize`, so broker calls only ever see complete
//! attribute sets.

use anyhow::{Context, Result, bail};
use brokeradmin::{AdminApi, Arguments};
use declarative::{Attributes, Deletion, Registry, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

pub mod binding;
pub mod exchange;
pub mod permissions;
pub mod queue;
pub mod user;
pub mod vhost;

pub use binding::BindingHandler;
pub use exchange::ExchangeHandler;
pub use permissions::PermissionsHandler;
pub use queue::QueueHandler;
pub use user::UserHandler;
pub use vhost::VhostHandler;

/// A registry with a handler for every kind, all sharing one API handle.
pub fn registry(api: Arc<dyn AdminApi>) -> Registry {
    Registry::new()
        .with(Box::new(VhostHandler::new(Arc::clone(&api))))
        .with(Box::new(UserHandler::new(Arc::clone(&api))))
        .with(Box::new(PermissionsHandler::new(Arc::clone(&api))))
        .with(Box::new(ExchangeHandler::new(Arc::clone(&api))))
        .with(Box::new(QueueHandler::new(Arc::clone(&api))))
        .with(Box::new(BindingHandler::new(api)))
}

// ============================================================================
// Attribute helpers
// ============================================================================

/// Fail on attributes the kind does not know about.
pub(crate) fn reject_unknown(attributes: &Attributes, known: &[&str]) -> Result<()> {
    if let Some(key) = attributes.keys().find(|key| !known.contains(&key.as_str())) {
        bail!(
            "unknown attribute '{key}' (expected one of: {})",
            known.join(", ")
        );
    }
    Ok(())
}

/// A required, non-empty string attribute.
pub(crate) fn require_name<'a>(attributes: &'a Attributes, key: &str) -> Result<&'a str> {
    let value = declarative::require_str(attributes, key)?;
    if value.is_empty() {
        bail!("attribute '{key}' must not be empty");
    }
    Ok(value)
}

/// A nested settings block; absent means empty.
pub(crate) fn block<'a>(
    attributes: &'a Attributes,
    key: &str,
) -> Result<&'a BTreeMap<String, Value>> {
    static EMPTY: BTreeMap<String, Value> = BTreeMap::new();
    match attributes.get(key) {
        None => Ok(&EMPTY),
        Some(Value::Map(map)) => Ok(map),
        Some(other) => bail!("'{key}' must be a table, found {}", other.type_name()),
    }
}

pub(crate) fn bool_or(map: &BTreeMap<String, Value>, key: &str, default: bool) -> Result<bool> {
    match map.get(key) {
        None => Ok(default),
        Some(Value::Bool(b)) => Ok(*b),
        Some(other) => bail!("'{key}' must be a bool, found {}", other.type_name()),
    }
}

pub(crate) fn map_or_empty(map: &BTreeMap<String, Value>, key: &str) -> Result<Value> {
    match map.get(key) {
        None => Ok(Value::Map(BTreeMap::new())),
        Some(value @ Value::Map(_)) => Ok(value.clone()),
        Some(other) => bail!("'{key}' must be a table, found {}", other.type_name()),
    }
}

pub(crate) fn str_in<'a>(map: &'a BTreeMap<String, Value>, key: &str) -> Result<&'a str> {
    map.get(key)
        .with_context(|| format!("missing required setting '{key}'"))?
        .as_str()
        .with_context(|| format!("setting '{key}' must be a string"))
}

pub(crate) fn bool_in(map: &BTreeMap<String, Value>, key: &str) -> Result<bool> {
    map.get(key)
        .with_context(|| format!("missing required setting '{key}'"))?
        .as_bool()
        .with_context(|| format!("setting '{key}' must be a bool"))
}

// ============================================================================
// JSON conversion
// ============================================================================

/// Convert a declared value to the JSON the API expects.
pub(crate) fn to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Integer(i) => serde_json::Value::from(*i),
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::List(items) => serde_json::Value::Array(items.iter().map(to_json).collect()),
        Value::Map(map) => serde_json::Value::Object(
            map.iter()
                .map(|(key, value)| (key.clone(), to_json(value)))
                .collect(),
        ),
    }
}

/// Convert API JSON back to a value. `null` has no counterpart and is
/// dropped; floats and out-of-range integers become strings.
pub(crate) fn from_json(json: &serde_json::Value) -> Option<Value> {
    Some(match json {
        serde_json::Value::Null => return None,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Integer(i),
            None => Value::String(n.to_string()),
        },
        serde_json::Value::String(s) => Value::String(s.clone()),
        serde_json::Value::Array(items) => Value::List(items.iter().filter_map(from_json).collect()),
        serde_json::Value::Object(map) => Value::Map(
            map.iter()
                .filter_map(|(key, value)| Some((key.clone(), from_json(value)?)))
                .collect(),
        ),
    })
}

/// Arguments block of a normalized instance, as API arguments.
pub(crate) fn arguments(value: Option<&Value>) -> Arguments {
    value
        .and_then(Value::as_map)
        .map(|map| {
            map.iter()
                .map(|(key, value)| (key.clone(), to_json(value)))
                .collect()
        })
        .unwrap_or_default()
}

pub(crate) fn arguments_value(arguments: &Arguments) -> Value {
    Value::Map(
        arguments
            .iter()
            .filter_map(|(key, value)| Some((key.clone(), from_json(value)?)))
            .collect(),
    )
}

// ============================================================================
// Broker result helpers
// ============================================================================

/// Map a delete call's result: an absent object counts as deleted.
pub(crate) fn deletion(result: brokeradmin::Result<()>) -> Result<Deletion> {
    match result {
        Ok(()) => Ok(Deletion::Deleted),
        Err(err) if err.is_not_found() => Ok(Deletion::AlreadyAbsent),
        Err(err) => Err(err.into()),
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use testing::{attrs, map};

    #[test]
    fn test_json_conversion_keeps_types() {
        let value = map(&[
            ("x-message-ttl", Value::Integer(60_000)),
            ("x-queue-type", Value::from("quorum")),
            ("flag", Value::Bool(true)),
            ("list", Value::List(vec![Value::from("a")])),
        ]);
        assert_eq!(from_json(&to_json(&value)), Some(value));
    }

    #[test]
    fn test_from_json_drops_null_and_stringifies_floats() {
        let json = serde_json::json!({"a": null, "b": 1.5, "c": [null, 2]});
        assert_eq!(
            from_json(&json),
            Some(map(&[
                ("b", Value::from("1.5")),
                ("c", Value::List(vec![Value::Integer(2)])),
            ]))
        );
    }

    #[test]
    fn test_arguments_round_trip() {
        let declared = map(&[("key1", Value::from("value1"))]);
        let args = arguments(Some(&declared));
        assert_eq!(args["key1"], serde_json::json!("value1"));
        assert_eq!(arguments_value(&args), declared);
        assert!(arguments(None).is_empty());
    }

    #[test]
    fn test_reject_unknown() {
        let attributes = attrs(&[("name", Value::from("x")), ("nmae", Value::from("y"))]);
        let err = reject_unknown(&attributes, &["name"]).unwrap_err();
        assert!(err.to_string().contains("nmae"));
        assert!(reject_unknown(&attrs(&[("name", Value::from("x"))]), &["name"]).is_ok());
    }

    #[test]
    fn test_block_helpers() {
        let attributes = attrs(&[
            ("settings", map(&[("durable", Value::Bool(true))])),
            ("name", Value::from("")),
        ]);
        let settings = block(&attributes, "settings").unwrap();
        assert!(bool_or(settings, "durable", false).unwrap());
        assert!(!bool_or(settings, "auto_delete", false).unwrap());
        assert!(block(&attributes, "missing").unwrap().is_empty());
        assert!(block(&attributes, "name").is_err());
        assert!(require_name(&attributes, "name").is_err());
    }

    #[test]
    fn test_deletion_maps_not_found() {
        assert_eq!(deletion(Ok(())).unwrap(), Deletion::Deleted);
        let gone = brokeradmin::Error::NotFound {
            path: "queues/v/q".to_string(),
        };
        assert_eq!(deletion(Err(gone)).unwrap(), Deletion::AlreadyAbsent);
        assert!(deletion(Err(brokeradmin::Error::unavailable("down", None))).is_err());
    }

    #[test]
    fn test_registry_has_every_kind() {
        let (_broker, api) = testing::broker();
        let registry = registry(api);
        let kinds: Vec<_> = registry.kinds().collect();
        assert_eq!(
            kinds,
            vec!["binding", "exchange", "permissions", "queue", "user", "vhost"]
        );
    }
}
