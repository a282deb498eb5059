//! Tracked state: what the engine has created and how to find it again.
//!
//! Persistence (file format and location) belongs to the caller; this type
//! only needs to round-trip through serde.

use crate::types::{Address, Attributes, InstanceStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// One instance the engine manages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedInstance {
    pub kind: String,
    /// External ID returned by the handler's create. Empty when a create
    /// failed before the object existed.
    #[serde(default)]
    pub id: String,
    /// Attributes as last applied, overlaid with what the last refresh read.
    #[serde(default)]
    pub attributes: Attributes,
    /// Dependencies at the time of the last apply; used to order destroys
    /// after the declaration is gone.
    #[serde(default)]
    pub depends_on: BTreeSet<Address>,
    pub status: InstanceStatus,
    /// IDs of objects this instance replaced whose delete has not succeeded
    /// yet. Retried before the next pass changes anything else.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub replaced_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl TrackedInstance {
    /// Whether the instance has an external object behind it.
    pub fn has_id(&self) -> bool {
        !self.id.is_empty()
    }

    /// Whether `id` names this instance's object or one it still has to remove.
    pub fn holds(&self, id: &str) -> bool {
        self.id == id || self.replaced_ids.iter().any(|r| r == id)
    }
}

/// Every tracked instance, keyed by address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedState {
    #[serde(default)]
    pub instances: BTreeMap<Address, TrackedInstance>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

impl TrackedState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, address: &Address) -> Option<&TrackedInstance> {
        self.instances.get(address)
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// Record an instance, stamping it with the current time.
    pub fn record(&mut self, address: Address, mut instance: TrackedInstance) {
        instance.updated_at = Some(Utc::now());
        self.instances.insert(address, instance);
    }

    pub fn remove(&mut self, address: &Address) -> Option<TrackedInstance> {
        self.instances.remove(address)
    }

    /// Set the status of a tracked instance, if present.
    pub(crate) fn set_status(&mut self, address: &Address, status: InstanceStatus) {
        if let Some(instance) = self.instances.get_mut(address) {
            instance.status = status;
            instance.updated_at = Some(Utc::now());
        }
    }

    /// Addresses other than `address` whose instance of `kind` holds `id`.
    pub fn holders<'a>(
        &'a self,
        address: &'a Address,
        kind: &'a str,
        id: &'a str,
    ) -> impl Iterator<Item = &'a Address> {
        self.of_kind(kind)
            .filter(move |(other, instance)| *other != address && instance.holds(id))
            .map(|(other, _)| other)
    }

    /// Pending deletes left behind by interrupted replacements.
    pub fn leftovers(&self) -> BTreeMap<Address, Vec<String>> {
        self.instances
            .iter()
            .filter(|(_, instance)| !instance.replaced_ids.is_empty())
            .map(|(address, instance)| (address.clone(), instance.replaced_ids.clone()))
            .collect()
    }

    /// Tracked instances of one kind.
    pub fn of_kind<'a>(
        &'a self,
        kind: &'a str,
    ) -> impl Iterator<Item = (&'a Address, &'a TrackedInstance)> {
        self.instances.iter().filter(move |(_, i)| i.kind == kind)
    }

    /// Mark the state as saved now.
    pub fn touch(&mut self) {
        self.last_updated = Some(Utc::now());
    }
}
