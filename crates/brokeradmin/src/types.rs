//! Wire types for the RabbitMQ management API.
//!
//! Request bodies (`*Settings`, [`BindingRequest`], [`Permissions`]) and
//! listing entries (`*Info`) as the management plugin serializes them.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Optional `x-*` arguments attached to exchanges, queues and bindings.
pub type Arguments = BTreeMap<String, serde_json::Value>;

/// A virtual host as returned by `GET /api/vhosts`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VhostInfo {
    /// Vhost name ("/" is the default vhost).
    pub name: String,
}

/// Body of `PUT /api/users/{name}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSettings {
    /// Plain-text password; the broker stores only its hash.
    pub password: String,
    /// Comma-separated tags (e.g. "administrator,monitoring").
    pub tags: String,
}

/// A user as returned by `GET /api/users/{name}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    /// User name.
    pub name: String,
    /// Tags, normalized to a list (the broker sends a string or an array
    /// depending on its version).
    #[serde(default, deserialize_with = "tags_from_either")]
    pub tags: Vec<String>,
}

fn tags_from_either<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Tags {
        Joined(String),
        List(Vec<String>),
    }

    Ok(match Tags::deserialize(deserializer)? {
        Tags::Joined(s) => s
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect(),
        Tags::List(list) => list,
    })
}

/// Body of `PUT /api/exchanges/{vhost}/{name}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeSettings {
    /// Exchange type: "direct", "fanout", "topic", "headers", or a plugin type.
    #[serde(rename = "type")]
    pub kind: String,
    /// Whether the exchange survives a broker restart.
    pub durable: bool,
    /// Whether the exchange is deleted when its last binding goes away.
    pub auto_delete: bool,
    /// Optional arguments.
    #[serde(default)]
    pub arguments: Arguments,
}

/// An exchange as returned by `GET /api/exchanges/{vhost}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeInfo {
    /// Exchange name ("" is the default exchange).
    pub name: String,
    /// Owning vhost.
    pub vhost: String,
    /// Exchange type.
    #[serde(rename = "type")]
    pub kind: String,
    /// Durability flag.
    pub durable: bool,
    /// Auto-delete flag.
    pub auto_delete: bool,
    /// Arguments.
    #[serde(default)]
    pub arguments: Arguments,
}

/// Body of `PUT /api/queues/{vhost}/{name}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueSettings {
    /// Whether the queue survives a broker restart.
    pub durable: bool,
    /// Whether the queue is deleted when its last consumer goes away.
    pub auto_delete: bool,
    /// Optional arguments (e.g. `x-queue-type`).
    #[serde(default)]
    pub arguments: Arguments,
}

/// A queue as returned by `GET /api/queues/{vhost}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueInfo {
    /// Queue name.
    pub name: String,
    /// Owning vhost.
    pub vhost: String,
    /// Durability flag.
    pub durable: bool,
    /// Auto-delete flag.
    pub auto_delete: bool,
    /// Arguments.
    #[serde(default)]
    pub arguments: Arguments,
}

/// Kind of object a binding routes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DestinationType {
    /// Route to a queue.
    Queue,
    /// Route to another exchange (exchange-to-exchange binding).
    Exchange,
}

impl DestinationType {
    /// Name used in listings and declared configuration.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queue => "queue",
            Self::Exchange => "exchange",
        }
    }

    /// Single-letter segment used in binding URLs.
    #[must_use]
    pub fn path_segment(&self) -> &'static str {
        match self {
            Self::Queue => "q",
            Self::Exchange => "e",
        }
    }
}

impl fmt::Display for DestinationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DestinationType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "queue" => Ok(Self::Queue),
            "exchange" => Ok(Self::Exchange),
            other => Err(format!(
                "invalid destination type '{other}' (expected 'queue' or 'exchange')"
            )),
        }
    }
}

/// Body of `POST /api/bindings/{vhost}/e/{source}/{q|e}/{destination}`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BindingRequest {
    /// Routing key ("" allowed).
    pub routing_key: String,
    /// Optional arguments (matched by headers exchanges).
    #[serde(default)]
    pub arguments: Arguments,
}

/// A binding as returned by `GET /api/bindings/{vhost}`.
///
/// Bindings have no server-issued ID; `properties_key` is derived by the
/// broker from the routing key and arguments and is what distinguishes two
/// bindings between the same source and destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindingInfo {
    /// Source exchange.
    pub source: String,
    /// Owning vhost.
    pub vhost: String,
    /// Destination queue or exchange.
    pub destination: String,
    /// Destination kind.
    pub destination_type: DestinationType,
    /// Routing key.
    #[serde(default)]
    pub routing_key: String,
    /// Arguments.
    #[serde(default)]
    pub arguments: Arguments,
    /// Broker-derived disambiguation key.
    #[serde(default)]
    pub properties_key: String,
}

impl BindingInfo {
    /// Whether this binding matches a composite key field-by-field.
    #[must_use]
    pub fn matches_key(
        &self,
        source: &str,
        destination: &str,
        destination_type: DestinationType,
        properties_key: &str,
    ) -> bool {
        self.source == source
            && self.destination == destination
            && self.destination_type == destination_type
            && self.properties_key == properties_key
    }
}

/// Body of `PUT /api/permissions/{vhost}/{user}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions {
    /// Regex of resource names the user may configure.
    pub configure: String,
    /// Regex of resource names the user may write to.
    pub write: String,
    /// Regex of resource names the user may read from.
    pub read: String,
}

/// A permission entry as returned by `GET /api/vhosts/{vhost}/permissions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionInfo {
    /// User the permissions apply to.
    pub user: String,
    /// Vhost the permissions are scoped to.
    pub vhost: String,
    /// Configure pattern.
    pub configure: String,
    /// Write pattern.
    pub write: String,
    /// Read pattern.
    pub read: String,
}

impl PermissionInfo {
    /// The three patterns without the scoping fields.
    #[must_use]
    pub fn permissions(&self) -> Permissions {
        Permissions {
            configure: self.configure.clone(),
            write: self.write.clone(),
            read: self.read.clone(),
        }
    }
}

/// Configuration for retry behavior of the HTTP transport.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (1 = no retry).
    pub max_attempts: u32,
    /// Base delay between retries.
    pub base_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_factor: f64,
    /// Maximum delay between retries.
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryConfig {
    /// Create a new retry config with custom settings.
    #[must_use]
    pub fn new(max_attempts: u32, base_delay: Duration, backoff_factor: f64) -> Self {
        Self {
            max_attempts,
            base_delay,
            backoff_factor,
            ..Default::default()
        }
    }

    /// Calculate the delay for a given attempt number (0-indexed).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.base_delay.as_secs_f64() * self.backoff_factor.powi(attempt as i32);
        let capped = delay.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    /// Create a config that never retries.
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }
}

/// Connection settings for [`crate::HttpAdmin`].
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Management endpoint, e.g. `http://localhost:15672`.
    pub endpoint: String,
    /// User name for basic auth.
    pub username: String,
    /// Password for basic auth.
    pub password: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Retry policy for transient failures.
    pub retry: RetryConfig,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:15672".to_string(),
            username: "guest".to_string(),
            password: "guest".to_string(),
            timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
        }
    }
}
