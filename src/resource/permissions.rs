//! A user's permissions in one vhost. The ID is `user@vhost`.
//!
//! The three patterns are the only mutable attributes: changing them updates
//! in place, changing the user or vhost replaces the grant.

use super::{block, deletion, reject_unknown, require_name, str_in};
use crate::identity::ScopedName;
use crate::reader::{BrokerObject, BrokerReader, ObjectKey};
use anyhow::{Context, Result};
use brokeradmin::{AdminApi, Permissions};
use declarative::{Attributes, Deletion, Lifecycle, ResolvedInstance, Value};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::Arc;

const PATTERNS: [&str; 3] = ["configure", "write", "read"];

pub struct PermissionsHandler {
    api: Arc<dyn AdminApi>,
    reader: BrokerReader,
}

impl PermissionsHandler {
    pub fn new(api: Arc<dyn AdminApi>) -> Self {
        Self {
            reader: BrokerReader::new(Arc::clone(&api)),
            api,
        }
    }

    fn grant(instance: &ResolvedInstance) -> Result<(ScopedName, Permissions)> {
        let scope = ScopedName::new(instance.str_attr("user")?, instance.str_attr("vhost")?);
        let patterns = block(&instance.attributes, "permissions")?;
        let permissions = Permissions {
            configure: str_in(patterns, "configure")?.to_string(),
            write: str_in(patterns, "write")?.to_string(),
            read: str_in(patterns, "read")?.to_string(),
        };
        Ok((scope, permissions))
    }

    fn put(&self, scope: &ScopedName, permissions: &Permissions) -> Result<()> {
        self.api
            .update_permissions_in(&scope.vhost, &scope.name, permissions)
            .with_context(|| {
                format!(
                    "setting permissions for '{}' in vhost '{}'",
                    scope.name, scope.vhost
                )
            })?;
        Ok(())
    }
}

fn patterns_value(permissions: &Permissions) -> Value {
    Value::Map(BTreeMap::from([
        ("configure".to_string(), Value::from(permissions.configure.as_str())),
        ("write".to_string(), Value::from(permissions.write.as_str())),
        ("read".to_string(), Value::from(permissions.read.as_str())),
    ]))
}

impl Lifecycle for PermissionsHandler {
    fn kind(&self) -> &'static str {
        "permissions"
    }

    fn normalize(&self, attributes: Attributes) -> Result<Attributes> {
        reject_unknown(&attributes, &["user", "vhost", "permissions"])?;
        require_name(&attributes, "user")?;
        require_name(&attributes, "vhost")?;

        let patterns = block(&attributes, "permissions")?;
        if let Some(key) = patterns.keys().find(|key| !PATTERNS.contains(&key.as_str())) {
            anyhow::bail!("unknown permission '{key}' (expected configure, write, read)");
        }
        for key in PATTERNS {
            let pattern =
                str_in(patterns, key).context("permissions need configure, write and read")?;
            Regex::new(pattern)
                .with_context(|| format!("'{key}' is not a valid regular expression"))?;
        }
        Ok(attributes)
    }

    fn mutable_attributes(&self) -> &'static [&'static str] {
        &["permissions"]
    }

    fn planned_id(&self, attributes: &Attributes) -> Option<String> {
        let user = attributes.get("user")?.as_str()?;
        let vhost = attributes.get("vhost")?.as_str()?;
        Some(ScopedName::new(user, vhost).to_string())
    }

    fn create(&self, instance: &ResolvedInstance) -> Result<String> {
        let (scope, permissions) = Self::grant(instance)?;
        self.put(&scope, &permissions)?;
        Ok(scope.to_string())
    }

    fn read(&self, id: &str) -> Result<Option<Attributes>> {
        let scope: ScopedName = id.parse()?;
        let found = self.reader.find(&ObjectKey::Permissions(scope))?;
        Ok(found.and_then(|object| match object {
            BrokerObject::Permissions(info) => Some(Attributes::from([
                ("permissions".to_string(), patterns_value(&info.permissions())),
                ("user".to_string(), Value::from(info.user)),
                ("vhost".to_string(), Value::from(info.vhost)),
            ])),
            _ => None,
        }))
    }

    fn update(&self, id: &str, instance: &ResolvedInstance) -> Result<()> {
        let scope: ScopedName = id.parse()?;
        let (_, permissions) = Self::grant(instance)?;
        self.put(&scope, &permissions)
    }

    fn delete(&self, id: &str) -> Result<Deletion> {
        let scope: ScopedName = id.parse()?;
        deletion(self.api.clear_permissions_in(&scope.vhost, &scope.name))
            .with_context(|| format!("clearing permissions {id}"))
    }
}
