//! Lifecycle trait for externally managed resources
//!
//! A [`Lifecycle`] handler knows how to create, read, update and delete one
//! kind of resource in an external system. The engine never talks to the
//! external system directly; it only calls handlers, in dependency order.

use crate::error::{Error, Result as EngineResult};
use crate::types::{Address, Attributes, Value};
use anyhow::Result;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// A declaration with every reference substituted and defaults filled in.
///
/// Immutable for the duration of one pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedInstance {
    pub address: Address,
    pub attributes: Attributes,
    pub depends_on: BTreeSet<Address>,
}

impl ResolvedInstance {
    /// Get a required string attribute.
    pub fn str_attr(&self, key: &str) -> Result<&str> {
        require_str(&self.attributes, key)
    }

    /// Get an optional attribute.
    pub fn attr(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }
}

/// Get a required string attribute from a map of attributes.
pub fn require_str<'a>(attributes: &'a Attributes, key: &str) -> Result<&'a str> {
    match attributes.get(key) {
        Some(Value::String(s)) => Ok(s),
        Some(other) => anyhow::bail!(
            "attribute '{key}' must be a string, found {}",
            other.type_name()
        ),
        None => anyhow::bail!("missing required attribute '{key}'"),
    }
}

/// Outcome of a delete call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deletion {
    Deleted,
    /// The object was already gone. Not an error.
    AlreadyAbsent,
}

/// Handler for one resource kind.
///
/// Handlers return `anyhow` errors; the engine attaches the instance address
/// and the phase that failed.
///
/// # Example
///
/// ```ignore
/// use declarative::{Attributes, Deletion, Lifecycle, ResolvedInstance};
///
/// struct VhostHandler { api: Arc<dyn AdminApi> }
///
/// impl Lifecycle for VhostHandler {
///     fn kind(&self) -> &'static str { "vhost" }
///
///     fn normalize(&self, attributes: Attributes) -> anyhow::Result<Attributes> {
///         declarative::require_str(&attributes, "name")?;
///         Ok(attributes)
///     }
///
///     fn create(&self, instance: &ResolvedInstance) -> anyhow::Result<String> {
///         let name = instance.str_attr("name")?;
///         self.api.put_vhost(name)?;
///         Ok(name.to_string())
///     }
///
///     // read, delete ...
/// }
/// ```
pub trait Lifecycle: Send + Sync {
    /// Resource kind this handler manages, e.g. "queue".
    fn kind(&self) -> &'static str;

    /// Validate attributes and fill in defaults. Runs before any I/O.
    fn normalize(&self, attributes: Attributes) -> Result<Attributes>;

    /// Attributes that [`update`](Self::update) can change in place.
    ///
    /// A change to any other attribute replaces the instance.
    fn mutable_attributes(&self) -> &'static [&'static str] {
        &[]
    }

    /// The ID a create would produce, if it can be known without the server.
    ///
    /// Decides the replace order: the same ID means the old object has to go
    /// first; a different ID lets the new one be created first.
    fn planned_id(&self, _attributes: &Attributes) -> Option<String> {
        None
    }

    /// Create the object and return its external ID.
    fn create(&self, instance: &ResolvedInstance) -> Result<String>;

    /// Read the live attributes, or `None` if the object is gone.
    fn read(&self, id: &str) -> Result<Option<Attributes>>;

    /// Change mutable attributes in place.
    fn update(&self, id: &str, instance: &ResolvedInstance) -> Result<()> {
        let _ = (id, instance);
        anyhow::bail!("{} does not support in-place updates", self.kind())
    }

    /// Delete the object. Deleting an absent object succeeds.
    fn delete(&self, id: &str) -> Result<Deletion>;

    /// Whether the object still exists.
    fn exists(&self, id: &str) -> Result<bool> {
        Ok(self.read(id)?.is_some())
    }
}

/// Handlers by kind.
#[derive(Default)]
pub struct Registry {
    handlers: BTreeMap<&'static str, Box<dyn Lifecycle>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous one for the same kind.
    pub fn register(&mut self, handler: Box<dyn Lifecycle>) {
        self.handlers.insert(handler.kind(), handler);
    }

    pub fn with(mut self, handler: Box<dyn Lifecycle>) -> Self {
        self.register(handler);
        self
    }

    /// Get the handler for a kind.
    pub fn get(&self, kind: &str) -> EngineResult<&dyn Lifecycle> {
        self.handlers
            .get(kind)
            .map(|handler| &**handler)
            .ok_or_else(|| Error::NoHandler {
                kind: kind.to_string(),
            })
    }

    pub fn kinds(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.handlers.keys().copied()
    }
}
