//! # brokeradmin
//!
//! Blocking client for the RabbitMQ management HTTP API.
//!
//! This crate provides:
//! - Typed request and response shapes for vhosts, users, permissions,
//!   exchanges, queues and bindings
//! - An [`AdminApi`] trait with an HTTP implementation ([`HttpAdmin`]) and an
//!   in-memory one for tests ([`MockBroker`])
//! - Error categorization that separates an unreachable broker from a
//!   rejected request and from a missing object
//! - Retry with exponential backoff for transient failures
//!
//! ## Example
//!
//! ```no_run
//! use brokeradmin::{AdminApi, ConnectionConfig, ExchangeSettings, HttpAdmin};
//!
//! let admin = HttpAdmin::new(&ConnectionConfig {
//!     endpoint: "http://localhost:15672".to_string(),
//!     ..ConnectionConfig::default()
//! });
//!
//! admin.put_vhost("test").expect("vhost");
//! admin
//!     .declare_exchange("test", "events", &ExchangeSettings {
//!         kind: "topic".to_string(),
//!         durable: true,
//!         auto_delete: false,
//!         arguments: Default::default(),
//!     })
//!     .expect("exchange");
//! ```
//!
//! ## Errors
//!
//! | Condition                         | Category      |
//! |-----------------------------------|---------------|
//! | transport failure, 401, 403, 5xx  | `Unavailable` |
//! | 404                               | `NotFound`    |
//! | any other 4xx                     | `Rejected`    |

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod error;
pub mod path;
pub mod retry;
pub mod types;

pub use backend::AdminApi;
pub use backend::http::HttpAdmin;
pub use backend::mock::{MockBroker, MockFailure, properties_key};
pub use error::{Error, ErrorCategory, Result};
pub use path::{decode_segment, encode_segment};
pub use retry::{LogCallback, NoCallback, RetryCallback, with_retry};
pub use types::{
    Arguments, BindingInfo, BindingRequest, ConnectionConfig, DestinationType, ExchangeInfo,
    ExchangeSettings, PermissionInfo, Permissions, QueueInfo, QueueSettings, RetryConfig,
    UserInfo, UserSettings, VhostInfo,
};
