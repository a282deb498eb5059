//! Virtual hosts. The ID is the vhost name.

use super::{deletion, reject_unknown, require_name};
use crate::reader::{BrokerObject, BrokerReader, ObjectKey};
use anyhow::{Context, Result};
use brokeradmin::AdminApi;
use declarative::{Attributes, Deletion, Lifecycle, ResolvedInstance, Value};
use std::sync::Arc;

pub struct VhostHandler {
    api: Arc<dyn AdminApi>,
    reader: BrokerReader,
}

impl VhostHandler {
    pub fn new(api: Arc<dyn AdminApi>) -> Self {
        Self {
            reader: BrokerReader::new(Arc::clone(&api)),
            api,
        }
    }
}

impl Lifecycle for VhostHandler {
    fn kind(&self) -> &'static str {
        "vhost"
    }

    fn normalize(&self, attributes: Attributes) -> Result<Attributes> {
        reject_unknown(&attributes, &["name"])?;
        require_name(&attributes, "name")?;
        Ok(attributes)
    }

    fn planned_id(&self, attributes: &Attributes) -> Option<String> {
        attributes.get("name")?.as_str().map(str::to_string)
    }

    fn create(&self, instance: &ResolvedInstance) -> Result<String> {
        let name = instance.str_attr("name")?;
        self.api
            .put_vhost(name)
            .with_context(|| format!("creating vhost '{name}'"))?;
        Ok(name.to_string())
    }

    fn read(&self, id: &str) -> Result<Option<Attributes>> {
        let found = self.reader.find(&ObjectKey::Vhost(id.to_string()))?;
        Ok(found.and_then(|object| match object {
            BrokerObject::Vhost(vhost) => {
                Some(Attributes::from([("name".to_string(), Value::from(vhost.name))]))
            }
            _ => None,
        }))
    }

    fn delete(&self, id: &str) -> Result<Deletion> {
        deletion(self.api.delete_vhost(id)).with_context(|| format!("deleting vhost '{id}'"))
    }
}
