//! Users. The ID is the user name.
//!
//! The broker only stores a password hash, so `read` reports tags and the
//! tracked password stands in for the live one.

use super::{deletion, reject_unknown, require_name};
use crate::reader::{BrokerObject, BrokerReader, ObjectKey};
use anyhow::{Context, Result, bail};
use brokeradmin::{AdminApi, UserSettings};
use declarative::{Attributes, Deletion, Lifecycle, ResolvedInstance, Value};
use std::sync::Arc;

const KNOWN: &[&str] = &["name", "password", "tags"];

pub struct UserHandler {
    api: Arc<dyn AdminApi>,
    reader: BrokerReader,
}

impl UserHandler {
    pub fn new(api: Arc<dyn AdminApi>) -> Self {
        Self {
            reader: BrokerReader::new(Arc::clone(&api)),
            api,
        }
    }

    fn settings(instance: &ResolvedInstance) -> Result<UserSettings> {
        Ok(UserSettings {
            password: instance.str_attr("password")?.to_string(),
            tags: tags(instance.attr("tags"))?.join(","),
        })
    }
}

fn tags(value: Option<&Value>) -> Result<Vec<String>> {
    let Some(value) = value else {
        return Ok(Vec::new());
    };
    let Some(items) = value.as_list() else {
        bail!("'tags' must be a list, found {}", value.type_name());
    };
    items
        .iter()
        .map(|item| match item.as_str() {
            Some(tag) if !tag.is_empty() && !tag.contains(',') => Ok(tag.to_string()),
            Some(tag) => bail!("invalid tag '{tag}'"),
            None => bail!("tags must be strings, found {}", item.type_name()),
        })
        .collect()
}

impl Lifecycle for UserHandler {
    fn kind(&self) -> &'static str {
        "user"
    }

    fn normalize(&self, mut attributes: Attributes) -> Result<Attributes> {
        reject_unknown(&attributes, KNOWN)?;
        require_name(&attributes, "name")?;
        declarative::require_str(&attributes, "password")?;
        let tags = tags(attributes.get("tags"))?;
        attributes.insert(
            "tags".to_string(),
            Value::List(tags.into_iter().map(Value::from).collect()),
        );
        Ok(attributes)
    }

    fn mutable_attributes(&self) -> &'static [&'static str] {
        &["password", "tags"]
    }

    fn planned_id(&self, attributes: &Attributes) -> Option<String> {
        attributes.get("name")?.as_str().map(str::to_string)
    }

    fn create(&self, instance: &ResolvedInstance) -> Result<String> {
        let name = instance.str_attr("name")?;
        self.api
            .put_user(name, &Self::settings(instance)?)
            .with_context(|| format!("creating user '{name}'"))?;
        Ok(name.to_string())
    }

    fn read(&self, id: &str) -> Result<Option<Attributes>> {
        let found = self.reader.find(&ObjectKey::User(id.to_string()))?;
        Ok(found.and_then(|object| match object {
            BrokerObject::User(user) => Some(Attributes::from([
                ("name".to_string(), Value::from(user.name)),
                (
                    "tags".to_string(),
                    Value::List(user.tags.into_iter().map(Value::from).collect()),
                ),
            ])),
            _ => None,
        }))
    }

    fn update(&self, id: &str, instance: &ResolvedInstance) -> Result<()> {
        self.api
            .put_user(id, &Self::settings(instance)?)
            .with_context(|| format!("updating user '{id}'"))?;
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<Deletion> {
        deletion(self.api.delete_user(id)).with_context(|| format!("deleting user '{id}'"))
    }
}
