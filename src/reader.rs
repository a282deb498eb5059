//! Live broker state, fetched fresh on every call.
//!
//! The management API cannot look up most objects by their composite key,
//! so lookups list the whole collection for a vhost and filter it here.
//! A vhost that no longer exists lists as empty.

use crate::identity::{BindingKey, IdentityError, ScopedName};
use brokeradmin::{
    AdminApi, BindingInfo, ExchangeInfo, PermissionInfo, QueueInfo, UserInfo, VhostInfo,
};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Kinds of broker objects warren manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceKind {
    Vhost,
    User,
    Permissions,
    Exchange,
    Queue,
    Binding,
}

impl ResourceKind {
    pub const ALL: [Self; 6] = [
        Self::Vhost,
        Self::User,
        Self::Permissions,
        Self::Exchange,
        Self::Queue,
        Self::Binding,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Vhost => "vhost",
            Self::User => "user",
            Self::Permissions => "permissions",
            Self::Exchange => "exchange",
            Self::Queue => "queue",
            Self::Binding => "binding",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown resource kind '{s}'"))
    }
}

/// The decoded external ID of a broker object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectKey {
    Vhost(String),
    User(String),
    Permissions(ScopedName),
    Exchange(ScopedName),
    Queue(ScopedName),
    Binding(BindingKey),
}

impl ObjectKey {
    /// Decode an external ID of the given kind.
    pub fn parse(kind: ResourceKind, id: &str) -> Result<Self, IdentityError> {
        Ok(match kind {
            ResourceKind::Vhost => Self::Vhost(id.to_string()),
            ResourceKind::User => Self::User(id.to_string()),
            ResourceKind::Permissions => Self::Permissions(id.parse()?),
            ResourceKind::Exchange => Self::Exchange(id.parse()?),
            ResourceKind::Queue => Self::Queue(id.parse()?),
            ResourceKind::Binding => Self::Binding(id.parse()?),
        })
    }

    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Vhost(_) => ResourceKind::Vhost,
            Self::User(_) => ResourceKind::User,
            Self::Permissions(_) => ResourceKind::Permissions,
            Self::Exchange(_) => ResourceKind::Exchange,
            Self::Queue(_) => ResourceKind::Queue,
            Self::Binding(_) => ResourceKind::Binding,
        }
    }

    /// The vhost the object lives in, for vhost-scoped kinds.
    pub fn vhost(&self) -> Option<&str> {
        match self {
            Self::Vhost(_) | Self::User(_) => None,
            Self::Permissions(scoped) | Self::Exchange(scoped) | Self::Queue(scoped) => {
                Some(&scoped.vhost)
            }
            Self::Binding(key) => Some(&key.vhost),
        }
    }

    /// Whether a listed object is the one this key names.
    pub fn matches(&self, object: &BrokerObject) -> bool {
        match (self, object) {
            (Self::Vhost(name), BrokerObject::Vhost(v)) => v.name == *name,
            (Self::User(name), BrokerObject::User(u)) => u.name == *name,
            (Self::Permissions(key), BrokerObject::Permissions(p)) => {
                p.user == key.name && p.vhost == key.vhost
            }
            (Self::Exchange(key), BrokerObject::Exchange(e)) => {
                e.name == key.name && e.vhost == key.vhost
            }
            (Self::Queue(key), BrokerObject::Queue(q)) => q.name == key.name && q.vhost == key.vhost,
            (Self::Binding(key), BrokerObject::Binding(b)) => {
                b.vhost == key.vhost
                    && b.matches_key(
                        &key.source,
                        &key.destination,
                        key.destination_type,
                        &key.properties_key,
                    )
            }
            _ => false,
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Vhost(name) | Self::User(name) => f.write_str(name),
            Self::Permissions(scoped) | Self::Exchange(scoped) | Self::Queue(scoped) => {
                write!(f, "{scoped}")
            }
            Self::Binding(key) => write!(f, "{key}"),
        }
    }
}

/// One entry of a broker listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BrokerObject {
    Vhost(VhostInfo),
    User(UserInfo),
    Permissions(PermissionInfo),
    Exchange(ExchangeInfo),
    Queue(QueueInfo),
    Binding(BindingInfo),
}

/// Reads broker collections through the admin API.
#[derive(Clone)]
pub struct BrokerReader {
    api: Arc<dyn AdminApi>,
}

impl BrokerReader {
    pub fn new(api: Arc<dyn AdminApi>) -> Self {
        Self { api }
    }

    /// Every object of `kind` in `vhost`. Vhosts and users are not scoped,
    /// so `vhost` is ignored for them.
    pub fn list(&self, kind: ResourceKind, vhost: &str) -> brokeradmin::Result<Vec<BrokerObject>> {
        let listed = match kind {
            ResourceKind::Vhost => wrap(self.api.list_vhosts(), BrokerObject::Vhost),
            ResourceKind::User => wrap(self.api.list_users(), BrokerObject::User),
            ResourceKind::Permissions => wrap(
                self.api.list_permissions_in(vhost),
                BrokerObject::Permissions,
            ),
            ResourceKind::Exchange => {
                wrap(self.api.list_exchanges_in(vhost), BrokerObject::Exchange)
            }
            ResourceKind::Queue => wrap(self.api.list_queues_in(vhost), BrokerObject::Queue),
            ResourceKind::Binding => wrap(self.api.list_bindings_in(vhost), BrokerObject::Binding),
        };

        let objects = match listed {
            Err(err) if err.is_not_found() => {
                log::debug!("vhost '{vhost}' is gone; no {kind} objects in it");
                Vec::new()
            }
            other => other?,
        };
        log::debug!("listed {} {kind} object(s) in '{vhost}'", objects.len());
        Ok(objects)
    }

    /// The object a key names, if it exists.
    pub fn find(&self, key: &ObjectKey) -> brokeradmin::Result<Option<BrokerObject>> {
        if let ObjectKey::User(name) = key {
            return match self.api.get_user(name) {
                Ok(user) => Ok(Some(BrokerObject::User(user))),
                Err(err) if err.is_not_found() => Ok(None),
                Err(err) => Err(err),
            };
        }

        let vhost = key.vhost().unwrap_or("");
        Ok(self
            .list(key.kind(), vhost)?
            .into_iter()
            .find(|object| key.matches(object)))
    }
}

fn wrap<T>(
    listed: brokeradmin::Result<Vec<T>>,
    into: fn(T) -> BrokerObject,
) -> brokeradmin::Result<Vec<BrokerObject>> {
    listed.map(|items| items.into_iter().map(into).collect())
}
