//! Backend trait and implementations for the management API.
//!
//! The [`AdminApi`] trait is the only surface the rest of the workspace uses
//! to talk to a broker. [`http::HttpAdmin`] speaks to a real broker over
//! HTTP; [`mock::MockBroker`] keeps broker state in memory for tests.
//!
//! # Testing
//!
//! ```
//! use brokeradmin::{AdminApi, MockBroker, QueueSettings};
//!
//! let broker = MockBroker::new();
//! broker.put_vhost("test").unwrap();
//! broker
//!     .declare_queue("test", "jobs", &QueueSettings {
//!         durable: true,
//!         auto_delete: false,
//!         arguments: Default::default(),
//!     })
//!     .unwrap();
//!
//! let queues = broker.list_queues_in("test").unwrap();
//! assert_eq!(queues.len(), 1);
//! ```

pub mod http;
pub mod mock;

use crate::error::Result;
use crate::types::{
    BindingInfo, BindingRequest, DestinationType, ExchangeInfo, ExchangeSettings, PermissionInfo,
    Permissions, QueueInfo, QueueSettings, UserInfo, UserSettings, VhostInfo,
};
use std::sync::Arc;

/// Operations against the RabbitMQ management API.
///
/// Every method is a single blocking request. Listing methods return the
/// whole collection for a vhost; the API has no server-side filter for
/// composite keys, so callers filter client-side.
///
/// Deletes of absent objects fail with [`Error::NotFound`](crate::Error::NotFound);
/// callers decide whether that matters.
pub trait AdminApi: Send + Sync {
    /// List all vhosts.
    fn list_vhosts(&self) -> Result<Vec<VhostInfo>>;

    /// Create a vhost (idempotent).
    fn put_vhost(&self, name: &str) -> Result<()>;

    /// Delete a vhost and everything in it.
    fn delete_vhost(&self, name: &str) -> Result<()>;

    /// List all users.
    fn list_users(&self) -> Result<Vec<UserInfo>>;

    /// Fetch a user.
    fn get_user(&self, name: &str) -> Result<UserInfo>;

    /// Create or update a user.
    fn put_user(&self, name: &str, settings: &UserSettings) -> Result<()>;

    /// Delete a user.
    fn delete_user(&self, name: &str) -> Result<()>;

    /// List exchanges in a vhost.
    fn list_exchanges_in(&self, vhost: &str) -> Result<Vec<ExchangeInfo>>;

    /// Declare an exchange (idempotent for equivalent settings).
    fn declare_exchange(&self, vhost: &str, name: &str, settings: &ExchangeSettings)
    -> Result<()>;

    /// Delete an exchange; bindings from and to it go with it.
    fn delete_exchange(&self, vhost: &str, name: &str) -> Result<()>;

    /// List queues in a vhost.
    fn list_queues_in(&self, vhost: &str) -> Result<Vec<QueueInfo>>;

    /// Declare a queue (idempotent for equivalent settings).
    fn declare_queue(&self, vhost: &str, name: &str, settings: &QueueSettings) -> Result<()>;

    /// Delete a queue; bindings to it go with it.
    fn delete_queue(&self, vhost: &str, name: &str) -> Result<()>;

    /// List bindings in a vhost.
    fn list_bindings_in(&self, vhost: &str) -> Result<Vec<BindingInfo>>;

    /// Declare a binding.
    ///
    /// Returns the properties key when the broker reports it (the last
    /// segment of the `Location` header), `None` otherwise.
    fn declare_binding(
        &self,
        vhost: &str,
        source: &str,
        destination: &str,
        destination_type: DestinationType,
        request: &BindingRequest,
    ) -> Result<Option<String>>;

    /// Delete a binding by its composite key.
    fn delete_binding(
        &self,
        vhost: &str,
        source: &str,
        destination: &str,
        destination_type: DestinationType,
        properties_key: &str,
    ) -> Result<()>;

    /// List permissions granted in a vhost.
    fn list_permissions_in(&self, vhost: &str) -> Result<Vec<PermissionInfo>>;

    /// Set a user's permissions in a vhost.
    fn update_permissions_in(&self, vhost: &str, user: &str, permissions: &Permissions)
    -> Result<()>;

    /// Revoke a user's permissions in a vhost.
    fn clear_permissions_in(&self, vhost: &str, user: &str) -> Result<()>;
}

impl<T: AdminApi + ?Sized> AdminApi for Arc<T> {
    fn list_vhosts(&self) -> Result<Vec<VhostInfo>> {
        (**self).list_vhosts()
    }

    fn put_vhost(&self, name: &str) -> Result<()> {
        (**self).put_vhost(name)
    }

    fn delete_vhost(&self, name: &str) -> Result<()> {
        (**self).delete_vhost(name)
    }

    fn list_users(&self) -> Result<Vec<UserInfo>> {
        (**self).list_users()
    }

    fn get_user(&self, name: &str) -> Result<UserInfo> {
        (**self).get_user(name)
    }

    fn put_user(&self, name: &str, settings: &UserSettings) -> Result<()> {
        (**self).put_user(name, settings)
    }

    fn delete_user(&self, name: &str) -> Result<()> {
        (**self).delete_user(name)
    }

    fn list_exchanges_in(&self, vhost: &str) -> Result<Vec<ExchangeInfo>> {
        (**self).list_exchanges_in(vhost)
    }

    fn declare_exchange(
        &self,
        vhost: &str,
        name: &str,
        settings: &ExchangeSettings,
    ) -> Result<()> {
        (**self).declare_exchange(vhost, name, settings)
    }

    fn delete_exchange(&self, vhost: &str, name: &str) -> Result<()> {
        (**self).delete_exchange(vhost, name)
    }

    fn list_queues_in(&self, vhost: &str) -> Result<Vec<QueueInfo>> {
        (**self).list_queues_in(vhost)
    }

    fn declare_queue(&self, vhost: &str, name: &str, settings: &QueueSettings) -> Result<()> {
        (**self).declare_queue(vhost, name, settings)
    }

    fn delete_queue(&self, vhost: &str, name: &str) -> Result<()> {
        (**self).delete_queue(vhost, name)
    }

    fn list_bindings_in(&self, vhost: &str) -> Result<Vec<BindingInfo>> {
        (**self).list_bindings_in(vhost)
    }

    fn declare_binding(
        &self,
        vhost: &str,
        source: &str,
        destination: &str,
        destination_type: DestinationType,
        request: &BindingRequest,
    ) -> Result<Option<String>> {
        (**self).declare_binding(vhost, source, destination, destination_type, request)
    }

    fn delete_binding(
        &self,
        vhost: &str,
        source: &str,
        destination: &str,
        destination_type: DestinationType,
        properties_key: &str,
    ) -> Result<()> {
        (**self).delete_binding(vhost, source, destination, destination_type, properties_key)
    }

    fn list_permissions_in(&self, vhost: &str) -> Result<Vec<PermissionInfo>> {
        (**self).list_permissions_in(vhost)
    }

    fn update_permissions_in(
        &self,
        vhost: &str,
        user: &str,
        permissions: &Permissions,
    ) -> Result<()> {
        (**self).update_permissions_in(vhost, user, permissions)
    }

    fn clear_permissions_in(&self, vhost: &str, user: &str) -> Result<()> {
        (**self).clear_permissions_in(vhost, user)
    }
}
