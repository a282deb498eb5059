//! Queues. The ID is `name@vhost`.

use super::{arguments, arguments_value, block, bool_in, bool_or, deletion, map_or_empty};
use super::{reject_unknown, require_name};
use crate::identity::ScopedName;
use crate::reader::{BrokerObject, BrokerReader, ObjectKey};
use anyhow::{Context, Result, bail};
use brokeradmin::{AdminApi, QueueSettings};
use declarative::{Attributes, Deletion, Lifecycle, ResolvedInstance, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

const SETTINGS: &[&str] = &["durable", "auto_delete", "arguments"];

pub struct QueueHandler {
    api: Arc<dyn AdminApi>,
    reader: BrokerReader,
}

impl QueueHandler {
    pub fn new(api: Arc<dyn AdminApi>) -> Self {
        Self {
            reader: BrokerReader::new(Arc::clone(&api)),
            api,
        }
    }
}

impl Lifecycle for QueueHandler {
    fn kind(&self) -> &'static str {
        "queue"
    }

    fn normalize(&self, mut attributes: Attributes) -> Result<Attributes> {
        reject_unknown(&attributes, &["name", "vhost", "settings"])?;
        require_name(&attributes, "name")?;
        require_name(&attributes, "vhost")?;

        let settings = block(&attributes, "settings")?;
        if let Some(key) = settings.keys().find(|key| !SETTINGS.contains(&key.as_str())) {
            bail!("unknown queue setting '{key}'");
        }
        let normalized = BTreeMap::from([
            ("durable".to_string(), Value::Bool(bool_or(settings, "durable", false)?)),
            (
                "auto_delete".to_string(),
                Value::Bool(bool_or(settings, "auto_delete", false)?),
            ),
            ("arguments".to_string(), map_or_empty(settings, "arguments")?),
        ]);
        attributes.insert("settings".to_string(), Value::Map(normalized));
        Ok(attributes)
    }

    fn planned_id(&self, attributes: &Attributes) -> Option<String> {
        let name = attributes.get("name")?.as_str()?;
        let vhost = attributes.get("vhost")?.as_str()?;
        Some(ScopedName::new(name, vhost).to_string())
    }

    fn create(&self, instance: &ResolvedInstance) -> Result<String> {
        let scope = ScopedName::new(instance.str_attr("name")?, instance.str_attr("vhost")?);
        let settings = block(&instance.attributes, "settings")?;
        let request = QueueSettings {
            durable: bool_in(settings, "durable")?,
            auto_delete: bool_in(settings, "auto_delete")?,
            arguments: arguments(settings.get("arguments")),
        };

        log::debug!("declaring queue {scope}: {request:?}");
        self.api
            .declare_queue(&scope.vhost, &scope.name, &request)
            .with_context(|| format!("declaring queue '{}' in vhost '{}'", scope.name, scope.vhost))?;
        Ok(scope.to_string())
    }

    fn read(&self, id: &str) -> Result<Option<Attributes>> {
        let scope: ScopedName = id.parse()?;
        let found = self.reader.find(&ObjectKey::Queue(scope))?;
        Ok(found.and_then(|object| match object {
            BrokerObject::Queue(queue) => {
                let settings = BTreeMap::from([
                    ("durable".to_string(), Value::Bool(queue.durable)),
                    ("auto_delete".to_string(), Value::Bool(queue.auto_delete)),
                    ("arguments".to_string(), arguments_value(&queue.arguments)),
                ]);
                Some(Attributes::from([
                    ("name".to_string(), Value::from(queue.name)),
                    ("vhost".to_string(), Value::from(queue.vhost)),
                    ("settings".to_string(), Value::Map(settings)),
                ]))
            }
            _ => None,
        }))
    }

    fn delete(&self, id: &str) -> Result<Deletion> {
        let scope: ScopedName = id.parse()?;
        deletion(self.api.delete_queue(&scope.vhost, &scope.name))
            .with_context(|| format!("deleting queue {id}"))
    }
}
