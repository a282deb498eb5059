//! HTTP backend for the RabbitMQ management plugin.
//!
//! Requests are blocking and authenticated with HTTP basic auth. Transient
//! failures (connection errors, 401/403, 5xx) are retried according to the
//! connection's [`RetryConfig`]; anything the broker rejects is returned as-is.

use crate::backend::AdminApi;
use crate::error::{Error, Result};
use crate::path::{decode_segment, encode_segment};
use crate::retry::{LogCallback, with_retry};
use crate::types::{
    BindingInfo, BindingRequest, ConnectionConfig, DestinationType, ExchangeInfo,
    ExchangeSettings, PermissionInfo, Permissions, QueueInfo, QueueSettings, RetryConfig,
    UserInfo, UserSettings, VhostInfo,
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;
use serde::de::DeserializeOwned;
use ureq::Body;
use ureq::http::Response;

/// Management API client over HTTP.
///
/// # Example
///
/// ```no_run
/// use brokeradmin::{AdminApi, ConnectionConfig, HttpAdmin};
///
/// let admin = HttpAdmin::new(&ConnectionConfig::default());
/// for vhost in admin.list_vhosts().unwrap() {
///     println!("{}", vhost.name);
/// }
/// ```
pub struct HttpAdmin {
    /// HTTP agent for requests.
    agent: ureq::Agent,
    /// Endpoint without trailing slash, e.g. `http://localhost:15672`.
    endpoint: String,
    /// Precomputed `Authorization` header value.
    authorization: String,
    retry: RetryConfig,
}

impl HttpAdmin {
    /// Create a client for the given connection settings.
    #[must_use]
    pub fn new(config: &ConnectionConfig) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(config.timeout))
            .http_status_as_error(false)
            .build()
            .into();

        Self {
            agent,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            authorization: basic_auth(&config.username, &config.password),
            retry: config.retry.clone(),
        }
    }

    /// The endpoint this client talks to.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/{path}", self.endpoint)
    }

    fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        with_retry(&self.retry, Some(&LogCallback), || {
            log::debug!("GET /api/{path}");
            let response = self
                .agent
                .get(&self.url(path))
                .header("Authorization", self.authorization.as_str())
                .header("Accept", "application/json")
                .call()?;
            let mut response = check_status("GET", path, response)?;
            response
                .body_mut()
                .read_json::<T>()
                .map_err(|e| Error::InvalidResponse(format!("GET {path}: {e}")))
        })
    }

    fn put_json<B: Serialize>(&self, path: &str, body: &B) -> Result<()> {
        with_retry(&self.retry, Some(&LogCallback), || {
            log::debug!("PUT /api/{path}");
            let response = self
                .agent
                .put(&self.url(path))
                .header("Authorization", self.authorization.as_str())
                .send_json(body)?;
            check_status("PUT", path, response).map(|_| ())
        })
    }

    /// POST and return the `Location` header, if any.
    fn post_json<B: Serialize>(&self, path: &str, body: &B) -> Result<Option<String>> {
        with_retry(&self.retry, Some(&LogCallback), || {
            log::debug!("POST /api/{path}");
            let response = self
                .agent
                .post(&self.url(path))
                .header("Authorization", self.authorization.as_str())
                .send_json(body)?;
            let response = check_status("POST", path, response)?;
            Ok(response
                .headers()
                .get("location")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string))
        })
    }

    fn delete(&self, path: &str) -> Result<()> {
        with_retry(&self.retry, Some(&LogCallback), || {
            log::debug!("DELETE /api/{path}");
            let response = self
                .agent
                .delete(&self.url(path))
                .header("Authorization", self.authorization.as_str())
                .call()?;
            check_status("DELETE", path, response).map(|_| ())
        })
    }
}

/// `Authorization` header value for basic auth.
fn basic_auth(username: &str, password: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{username}:{password}")))
}

/// Turn a non-2xx response into an error, keeping the body's reason.
fn check_status(method: &str, path: &str, mut response: Response<Body>) -> Result<Response<Body>> {
    let status = response.status().as_u16();
    if (200..300).contains(&status) {
        return Ok(response);
    }
    let body = response.body_mut().read_to_string().unwrap_or_default();
    Err(Error::from_status(method, &format!("/api/{path}"), status, &body))
}

/// The properties key is the last segment of a binding's `Location`.
fn properties_key_from_location(location: &str) -> Option<String> {
    location
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty())
        .map(decode_segment)
}

fn binding_path(
    vhost: &str,
    source: &str,
    destination: &str,
    destination_type: DestinationType,
) -> String {
    format!(
        "bindings/{}/e/{}/{}/{}",
        encode_segment(vhost),
        encode_segment(source),
        destination_type.path_segment(),
        encode_segment(destination)
    )
}

#[derive(Serialize)]
struct Empty {}

impl AdminApi for HttpAdmin {
    fn list_vhosts(&self) -> Result<Vec<VhostInfo>> {
        self.get_json("vhosts")
    }

    fn put_vhost(&self, name: &str) -> Result<()> {
        self.put_json(&format!("vhosts/{}", encode_segment(name)), &Empty {})
    }

    fn delete_vhost(&self, name: &str) -> Result<()> {
        self.delete(&format!("vhosts/{}", encode_segment(name)))
    }

    fn list_users(&self) -> Result<Vec<UserInfo>> {
        self.get_json("users")
    }

    fn get_user(&self, name: &str) -> Result<UserInfo> {
        self.get_json(&format!("users/{}", encode_segment(name)))
    }

    fn put_user(&self, name: &str, settings: &UserSettings) -> Result<()> {
        self.put_json(&format!("users/{}", encode_segment(name)), settings)
    }

    fn delete_user(&self, name: &str) -> Result<()> {
        self.delete(&format!("users/{}", encode_segment(name)))
    }

    fn list_exchanges_in(&self, vhost: &str) -> Result<Vec<ExchangeInfo>> {
        self.get_json(&format!("exchanges/{}", encode_segment(vhost)))
    }

    fn declare_exchange(
        &self,
        vhost: &str,
        name: &str,
        settings: &ExchangeSettings,
    ) -> Result<()> {
        self.put_json(
            &format!("exchanges/{}/{}", encode_segment(vhost), encode_segment(name)),
            settings,
        )
    }

    fn delete_exchange(&self, vhost: &str, name: &str) -> Result<()> {
        self.delete(&format!(
            "exchanges/{}/{}",
            encode_segment(vhost),
            encode_segment(name)
        ))
    }

    fn list_queues_in(&self, vhost: &str) -> Result<Vec<QueueInfo>> {
        self.get_json(&format!("queues/{}", encode_segment(vhost)))
    }

    fn declare_queue(&self, vhost: &str, name: &str, settings: &QueueSettings) -> Result<()> {
        self.put_json(
            &format!("queues/{}/{}", encode_segment(vhost), encode_segment(name)),
            settings,
        )
    }

    fn delete_queue(&self, vhost: &str, name: &str) -> Result<()> {
        self.delete(&format!(
            "queues/{}/{}",
            encode_segment(vhost),
            encode_segment(name)
        ))
    }

    fn list_bindings_in(&self, vhost: &str) -> Result<Vec<BindingInfo>> {
        self.get_json(&format!("bindings/{}", encode_segment(vhost)))
    }

    fn declare_binding(
        &self,
        vhost: &str,
        source: &str,
        destination: &str,
        destination_type: DestinationType,
        request: &BindingRequest,
    ) -> Result<Option<String>> {
        let path = binding_path(vhost, source, destination, destination_type);
        let location = self.post_json(&path, request)?;
        Ok(location.as_deref().and_then(properties_key_from_location))
    }

    fn delete_binding(
        &self,
        vhost: &str,
        source: &str,
        destination: &str,
        destination_type: DestinationType,
        properties_key: &str,
    ) -> Result<()> {
        self.delete(&format!(
            "{}/{}",
            binding_path(vhost, source, destination, destination_type),
            encode_segment(properties_key)
        ))
    }

    fn list_permissions_in(&self, vhost: &str) -> Result<Vec<PermissionInfo>> {
        self.get_json(&format!("vhosts/{}/permissions", encode_segment(vhost)))
    }

    fn update_permissions_in(
        &self,
        vhost: &str,
        user: &str,
        permissions: &Permissions,
    ) -> Result<()> {
        self.put_json(
            &format!("permissions/{}/{}", encode_segment(vhost), encode_segment(user)),
            permissions,
        )
    }

    fn clear_permissions_in(&self, vhost: &str, user: &str) -> Result<()> {
        self.delete(&format!(
            "permissions/{}/{}",
            encode_segment(vhost),
            encode_segment(user)
        ))
    }
}
