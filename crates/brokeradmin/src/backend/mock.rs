//! In-memory broker for tests.
//!
//! [`MockBroker`] reproduces the parts of broker behavior that the
//! reconciliation logic depends on: cascading deletes, the implicit
//! default-exchange binding of every queue, properties-key derivation for
//! bindings, and rejection of inequivalent re-declarations. It also records
//! every call and can be told to fail specific ones.

use super::AdminApi;
use crate::error::{Error, Result};
use crate::path::encode_segment;
use crate::types::{
    Arguments, BindingInfo, BindingRequest, DestinationType, ExchangeInfo, ExchangeSettings,
    PermissionInfo, Permissions, QueueInfo, QueueSettings, UserInfo, UserSettings, VhostInfo,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Exchanges every new vhost starts with.
const DEFAULT_EXCHANGES: &[(&str, &str)] = &[
    ("", "direct"),
    ("amq.direct", "direct"),
    ("amq.fanout", "fanout"),
    ("amq.headers", "headers"),
    ("amq.match", "headers"),
    ("amq.topic", "topic"),
];

const BUILTIN_EXCHANGE_TYPES: &[&str] = &["direct", "fanout", "topic", "headers"];

/// Failure to inject into matching calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockFailure {
    /// Fail as if the broker were unreachable.
    Unavailable,
    /// Fail as if the broker rejected the request with this reason.
    Rejected(String),
}

#[derive(Debug, Default)]
struct BrokerState {
    vhosts: BTreeSet<String>,
    users: BTreeMap<String, UserSettings>,
    exchanges: BTreeMap<(String, String), ExchangeSettings>,
    queues: BTreeMap<(String, String), QueueSettings>,
    bindings: Vec<BindingInfo>,
    permissions: BTreeMap<(String, String), Permissions>,
    calls: Vec<String>,
    failures: Vec<(String, MockFailure)>,
}

impl BrokerState {
    fn add_vhost(&mut self, name: &str) {
        if self.vhosts.insert(name.to_string()) {
            for (exchange, kind) in DEFAULT_EXCHANGES {
                self.exchanges.insert(
                    (name.to_string(), (*exchange).to_string()),
                    ExchangeSettings {
                        kind: (*kind).to_string(),
                        durable: true,
                        auto_delete: false,
                        arguments: Arguments::new(),
                    },
                );
            }
        }
    }

    fn require_vhost(&self, method: &str, path: &str, vhost: &str) -> Result<()> {
        if self.vhosts.contains(vhost) {
            Ok(())
        } else {
            Err(Error::rejected(method, path, 400, format!("vhost_not_found: {vhost}")))
        }
    }

    fn list_guard(&self, path: &str, vhost: &str) -> Result<()> {
        if self.vhosts.contains(vhost) {
            Ok(())
        } else {
            Err(Error::NotFound {
                path: path.to_string(),
            })
        }
    }

    fn has_destination(&self, vhost: &str, name: &str, kind: DestinationType) -> bool {
        let key = (vhost.to_string(), name.to_string());
        match kind {
            DestinationType::Queue => self.queues.contains_key(&key),
            DestinationType::Exchange => self.exchanges.contains_key(&key),
        }
    }
}

/// Derive a binding's properties key the way the broker does.
///
/// No arguments: the escaped routing key, or `~` when the key is empty.
/// With arguments: `escaped-key~hash(arguments)`.
#[must_use]
pub fn properties_key(routing_key: &str, arguments: &Arguments) -> String {
    let key = encode_segment(routing_key).replace('~', "%7E");
    if arguments.is_empty() {
        if key.is_empty() { "~".to_string() } else { key }
    } else {
        // BTreeMap keeps the serialization order stable.
        let canonical = serde_json::to_string(arguments).unwrap_or_default();
        let hash = blake3::hash(canonical.as_bytes()).to_hex();
        format!("{key}~{}", &hash.as_str()[..16])
    }
}

/// In-memory broker implementing [`AdminApi`].
///
/// Cloning shares the underlying state, so a test can keep a handle while
/// handing another to the code under test.
#[derive(Debug, Clone, Default)]
pub struct MockBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MockBroker {
    /// A fresh broker: vhost "/" and user "guest" with full permissions on it.
    #[must_use]
    pub fn new() -> Self {
        let broker = Self::default();
        {
            let mut state = broker.state();
            state.add_vhost("/");
            state.users.insert(
                "guest".to_string(),
                UserSettings {
                    password: "guest".to_string(),
                    tags: "administrator".to_string(),
                },
            );
            state.permissions.insert(
                ("/".to_string(), "guest".to_string()),
                Permissions {
                    configure: ".*".to_string(),
                    write: ".*".to_string(),
                    read: ".*".to_string(),
                },
            );
        }
        broker
    }

    fn state(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every call whose log entry starts with `prefix` fail.
    ///
    /// Log entries look like `declare_binding test/e/x/q/y`.
    pub fn fail_on(&self, prefix: impl Into<String>, failure: MockFailure) {
        self.state().failures.push((prefix.into(), failure));
    }

    /// Remove all injected failures.
    pub fn clear_failures(&self) {
        self.state().failures.clear();
    }

    /// Every call made so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    /// Calls made so far that mutate broker state.
    #[must_use]
    pub fn mutating_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| !c.starts_with("list_") && !c.starts_with("get_"))
            .collect()
    }

    /// Forget the call log.
    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    /// Record a call and apply any injected failure.
    fn record(&self, state: &mut BrokerState, entry: String) -> Result<()> {
        let failure = state
            .failures
            .iter()
            .find(|(prefix, _)| entry.starts_with(prefix.as_str()))
            .map(|(_, f)| f.clone());
        state.calls.push(entry.clone());
        match failure {
            None => Ok(()),
            Some(MockFailure::Unavailable) => {
                Err(Error::unavailable(format!("{entry}: connection refused"), None))
            }
            Some(MockFailure::Rejected(reason)) => Err(Error::rejected("MOCK", entry, 400, reason)),
        }
    }
}

fn binding_path(
    vhost: &str,
    source: &str,
    destination: &str,
    destination_type: DestinationType,
) -> String {
    format!(
        "{vhost}/e/{source}/{}/{destination}",
        destination_type.path_segment()
    )
}

fn user_info(name: &str, settings: &UserSettings) -> UserInfo {
    UserInfo {
        name: name.to_string(),
        tags: settings
            .tags
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect(),
    }
}

impl AdminApi for MockBroker {
    fn list_vhosts(&self) -> Result<Vec<VhostInfo>> {
        let mut state = self.state();
        self.record(&mut state, "list_vhosts".to_string())?;
        Ok(state
            .vhosts
            .iter()
            .map(|name| VhostInfo { name: name.clone() })
            .collect())
    }

    fn put_vhost(&self, name: &str) -> Result<()> {
        let mut state = self.state();
        self.record(&mut state, format!("put_vhost {name}"))?;
        state.add_vhost(name);
        Ok(())
    }

    fn delete_vhost(&self, name: &str) -> Result<()> {
        let mut state = self.state();
        self.record(&mut state, format!("delete_vhost {name}"))?;
        if !state.vhosts.remove(name) {
            return Err(Error::NotFound {
                path: format!("vhosts/{name}"),
            });
        }
        state.exchanges.retain(|(vhost, _), _| vhost != name);
        state.queues.retain(|(vhost, _), _| vhost != name);
        state.bindings.retain(|b| b.vhost != name);
        state.permissions.retain(|(vhost, _), _| vhost != name);
        Ok(())
    }

    fn list_users(&self) -> Result<Vec<UserInfo>> {
        let mut state = self.state();
        self.record(&mut state, "list_users".to_string())?;
        Ok(state
            .users
            .iter()
            .map(|(name, settings)| user_info(name, settings))
            .collect())
    }

    fn get_user(&self, name: &str) -> Result<UserInfo> {
        let mut state = self.state();
        self.record(&mut state, format!("get_user {name}"))?;
        state
            .users
            .get(name)
            .map(|settings| user_info(name, settings))
            .ok_or_else(|| Error::NotFound {
                path: format!("users/{name}"),
            })
    }

    fn put_user(&self, name: &str, settings: &UserSettings) -> Result<()> {
        let mut state = self.state();
        self.record(&mut state, format!("put_user {name}"))?;
        state.users.insert(name.to_string(), settings.clone());
        Ok(())
    }

    fn delete_user(&self, name: &str) -> Result<()> {
        let mut state = self.state();
        self.record(&mut state, format!("delete_user {name}"))?;
        if state.users.remove(name).is_none() {
            return Err(Error::NotFound {
                path: format!("users/{name}"),
            });
        }
        state.permissions.retain(|(_, user), _| user != name);
        Ok(())
    }

    fn list_exchanges_in(&self, vhost: &str) -> Result<Vec<ExchangeInfo>> {
        let mut state = self.state();
        self.record(&mut state, format!("list_exchanges {vhost}"))?;
        state.list_guard(&format!("exchanges/{vhost}"), vhost)?;
        Ok(state
            .exchanges
            .iter()
            .filter(|((v, _), _)| v == vhost)
            .map(|((v, name), s)| ExchangeInfo {
                name: name.clone(),
                vhost: v.clone(),
                kind: s.kind.clone(),
                durable: s.durable,
                auto_delete: s.auto_delete,
                arguments: s.arguments.clone(),
            })
            .collect())
    }

    fn declare_exchange(
        &self,
        vhost: &str,
        name: &str,
        settings: &ExchangeSettings,
    ) -> Result<()> {
        let mut state = self.state();
        let path = format!("{vhost}/{name}");
        self.record(&mut state, format!("declare_exchange {path}"))?;
        state.require_vhost("PUT", &path, vhost)?;

        let kind = settings.kind.as_str();
        if !BUILTIN_EXCHANGE_TYPES.contains(&kind) && !kind.starts_with("x-") {
            return Err(Error::rejected(
                "PUT",
                path,
                400,
                format!("invalid exchange type '{kind}'"),
            ));
        }

        let key = (vhost.to_string(), name.to_string());
        if let Some(existing) = state.exchanges.get(&key) {
            if existing.kind != settings.kind {
                return Err(Error::rejected(
                    "PUT",
                    path,
                    400,
                    format!(
                        "inequivalent arg 'type' for exchange '{name}': received '{}' but current is '{}'",
                        settings.kind, existing.kind
                    ),
                ));
            }
            if existing.durable != settings.durable {
                return Err(Error::rejected(
                    "PUT",
                    path,
                    400,
                    format!("inequivalent arg 'durable' for exchange '{name}'"),
                ));
            }
            return Ok(());
        }
        state.exchanges.insert(key, settings.clone());
        Ok(())
    }

    fn delete_exchange(&self, vhost: &str, name: &str) -> Result<()> {
        let mut state = self.state();
        self.record(&mut state, format!("delete_exchange {vhost}/{name}"))?;
        if state
            .exchanges
            .remove(&(vhost.to_string(), name.to_string()))
            .is_none()
        {
            return Err(Error::NotFound {
                path: format!("exchanges/{vhost}/{name}"),
            });
        }
        state.bindings.retain(|b| {
            !(b.vhost == vhost
                && (b.source == name
                    || (b.destination == name
                        && b.destination_type == DestinationType::Exchange)))
        });
        Ok(())
    }

    fn list_queues_in(&self, vhost: &str) -> Result<Vec<QueueInfo>> {
        let mut state = self.state();
        self.record(&mut state, format!("list_queues {vhost}"))?;
        state.list_guard(&format!("queues/{vhost}"), vhost)?;
        Ok(state
            .queues
            .iter()
            .filter(|((v, _), _)| v == vhost)
            .map(|((v, name), s)| QueueInfo {
                name: name.clone(),
                vhost: v.clone(),
                durable: s.durable,
                auto_delete: s.auto_delete,
                arguments: s.arguments.clone(),
            })
            .collect())
    }

    fn declare_queue(&self, vhost: &str, name: &str, settings: &QueueSettings) -> Result<()> {
        let mut state = self.state();
        let path = format!("{vhost}/{name}");
        self.record(&mut state, format!("declare_queue {path}"))?;
        state.require_vhost("PUT", &path, vhost)?;

        let key = (vhost.to_string(), name.to_string());
        if let Some(existing) = state.queues.get(&key) {
            if existing.durable != settings.durable {
                return Err(Error::rejected(
                    "PUT",
                    path,
                    400,
                    format!("inequivalent arg 'durable' for queue '{name}'"),
                ));
            }
            return Ok(());
        }
        state.queues.insert(key, settings.clone());
        state.bindings.push(BindingInfo {
            source: String::new(),
            vhost: vhost.to_string(),
            destination: name.to_string(),
            destination_type: DestinationType::Queue,
            routing_key: name.to_string(),
            arguments: Arguments::new(),
            properties_key: properties_key(name, &Arguments::new()),
        });
        Ok(())
    }

    fn delete_queue(&self, vhost: &str, name: &str) -> Result<()> {
        let mut state = self.state();
        self.record(&mut state, format!("delete_queue {vhost}/{name}"))?;
        if state
            .queues
            .remove(&(vhost.to_string(), name.to_string()))
            .is_none()
        {
            return Err(Error::NotFound {
                path: format!("queues/{vhost}/{name}"),
            });
        }
        state.bindings.retain(|b| {
            !(b.vhost == vhost
                && b.destination == name
                && b.destination_type == DestinationType::Queue)
        });
        Ok(())
    }

    fn list_bindings_in(&self, vhost: &str) -> Result<Vec<BindingInfo>> {
        let mut state = self.state();
        self.record(&mut state, format!("list_bindings {vhost}"))?;
        state.list_guard(&format!("bindings/{vhost}"), vhost)?;
        Ok(state
            .bindings
            .iter()
            .filter(|b| b.vhost == vhost)
            .cloned()
            .collect())
    }

    fn declare_binding(
        &self,
        vhost: &str,
        source: &str,
        destination: &str,
        destination_type: DestinationType,
        request: &BindingRequest,
    ) -> Result<Option<String>> {
        let mut state = self.state();
        let path = binding_path(vhost, source, destination, destination_type);
        self.record(&mut state, format!("declare_binding {path}"))?;
        state.require_vhost("POST", &path, vhost)?;

        if source.is_empty() {
            return Err(Error::rejected(
                "POST",
                path,
                400,
                "operation not permitted on the default exchange",
            ));
        }
        if !state
            .exchanges
            .contains_key(&(vhost.to_string(), source.to_string()))
        {
            return Err(Error::NotFound {
                path: format!("exchanges/{vhost}/{source}"),
            });
        }
        if !state.has_destination(vhost, destination, destination_type) {
            return Err(Error::NotFound {
                path: format!("{}s/{vhost}/{destination}", destination_type.as_str()),
            });
        }

        let props = properties_key(&request.routing_key, &request.arguments);
        let exists = state
            .bindings
            .iter()
            .any(|b| b.vhost == vhost && b.matches_key(source, destination, destination_type, &props));
        if !exists {
            state.bindings.push(BindingInfo {
                source: source.to_string(),
                vhost: vhost.to_string(),
                destination: destination.to_string(),
                destination_type,
                routing_key: request.routing_key.clone(),
                arguments: request.arguments.clone(),
                properties_key: props.clone(),
            });
        }
        Ok(Some(props))
    }

    fn delete_binding(
        &self,
        vhost: &str,
        source: &str,
        destination: &str,
        destination_type: DestinationType,
        properties_key: &str,
    ) -> Result<()> {
        let mut state = self.state();
        let path = binding_path(vhost, source, destination, destination_type);
        self.record(&mut state, format!("delete_binding {path}/{properties_key}"))?;
        let before = state.bindings.len();
        state.bindings.retain(|b| {
            !(b.vhost == vhost
                && b.matches_key(source, destination, destination_type, properties_key))
        });
        if state.bindings.len() == before {
            return Err(Error::NotFound {
                path: format!("bindings/{path}/{properties_key}"),
            });
        }
        Ok(())
    }

    fn list_permissions_in(&self, vhost: &str) -> Result<Vec<PermissionInfo>> {
        let mut state = self.state();
        self.record(&mut state, format!("list_permissions {vhost}"))?;
        state.list_guard(&format!("vhosts/{vhost}/permissions"), vhost)?;
        Ok(state
            .permissions
            .iter()
            .filter(|((v, _), _)| v == vhost)
            .map(|((v, user), p)| PermissionInfo {
                user: user.clone(),
                vhost: v.clone(),
                configure: p.configure.clone(),
                write: p.write.clone(),
                read: p.read.clone(),
            })
            .collect())
    }

    fn update_permissions_in(
        &self,
        vhost: &str,
        user: &str,
        permissions: &Permissions,
    ) -> Result<()> {
        let mut state = self.state();
        let path = format!("{vhost}/{user}");
        self.record(&mut state, format!("update_permissions {path}"))?;
        state.require_vhost("PUT", &path, vhost)?;
        if !state.users.contains_key(user) {
            return Err(Error::rejected(
                "PUT",
                path,
                400,
                format!("user_not_found: {user}"),
            ));
        }
        state
            .permissions
            .insert((vhost.to_string(), user.to_string()), permissions.clone());
        Ok(())
    }

    fn clear_permissions_in(&self, vhost: &str, user: &str) -> Result<()> {
        let mut state = self.state();
        self.record(&mut state, format!("clear_permissions {vhost}/{user}"))?;
        if state
            .permissions
            .remove(&(vhost.to_string(), user.to_string()))
            .is_none()
        {
            return Err(Error::NotFound {
                path: format!("permissions/{vhost}/{user}"),
            });
        }
        Ok(())
    }
}
