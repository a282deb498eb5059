//! Exchanges. The ID is `name@vhost`.
//!
//! The broker cannot change an exchange's settings, so every change other
//! than a rename replaces it (and drops its bindings with it).

use super::{arguments, arguments_value, block, bool_or, deletion, map_or_empty};
use super::{bool_in, reject_unknown, require_name, str_in};
use crate::identity::ScopedName;
use crate::reader::{BrokerObject, BrokerReader, ObjectKey};
use anyhow::{Context, Result, bail};
use brokeradmin::{AdminApi, ExchangeSettings};
use declarative::{Attributes, Deletion, Lifecycle, ResolvedInstance, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

const SETTINGS: &[&str] = &["type", "durable", "auto_delete", "arguments"];

pub struct ExchangeHandler {
    api: Arc<dyn AdminApi>,
    reader: BrokerReader,
}

impl ExchangeHandler {
    pub fn new(api: Arc<dyn AdminApi>) -> Self {
        Self {
            reader: BrokerReader::new(Arc::clone(&api)),
            api,
        }
    }
}

impl Lifecycle for ExchangeHandler {
    fn kind(&self) -> &'static str {
        "exchange"
    }

    fn normalize(&self, mut attributes: Attributes) -> Result<Attributes> {
        reject_unknown(&attributes, &["name", "vhost", "settings"])?;
        require_name(&attributes, "name")?;
        require_name(&attributes, "vhost")?;

        let settings = block(&attributes, "settings")?;
        if let Some(key) = settings.keys().find(|key| !SETTINGS.contains(&key.as_str())) {
            bail!("unknown exchange setting '{key}'");
        }
        let kind = str_in(settings, "type").context("exchanges need a settings.type")?;
        if kind.is_empty() {
            bail!("settings.type must not be empty");
        }

        let normalized = BTreeMap::from([
            ("type".to_string(), Value::from(kind)),
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
        let request = ExchangeSettings {
            kind: str_in(settings, "type")?.to_string(),
            durable: bool_in(settings, "durable")?,
            auto_delete: bool_in(settings, "auto_delete")?,
            arguments: arguments(settings.get("arguments")),
        };

        log::debug!("declaring exchange {scope}: {request:?}");
        self.api
            .declare_exchange(&scope.vhost, &scope.name, &request)
            .with_context(|| {
                format!("declaring exchange '{}' in vhost '{}'", scope.name, scope.vhost)
            })?;
        Ok(scope.to_string())
    }

    fn read(&self, id: &str) -> Result<Option<Attributes>> {
        let scope: ScopedName = id.parse()?;
        let found = self.reader.find(&ObjectKey::Exchange(scope))?;
        Ok(found.and_then(|object| match object {
            BrokerObject::Exchange(exchange) => {
                let settings = BTreeMap::from([
                    ("type".to_string(), Value::from(exchange.kind)),
                    ("durable".to_string(), Value::Bool(exchange.durable)),
                    ("auto_delete".to_string(), Value::Bool(exchange.auto_delete)),
                    ("arguments".to_string(), arguments_value(&exchange.arguments)),
                ]);
                Some(Attributes::from([
                    ("name".to_string(), Value::from(exchange.name)),
                    ("vhost".to_string(), Value::from(exchange.vhost)),
                    ("settings".to_string(), Value::Map(settings)),
                ]))
            }
            _ => None,
        }))
    }

    fn delete(&self, id: &str) -> Result<Deletion> {
        let scope: ScopedName = id.parse()?;
        deletion(self.api.delete_exchange(&scope.vhost, &scope.name))
            .with_context(|| format!("deleting exchange {id}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::testing::{attrs, broker, instance, map};

    fn declared(settings: Value) -> Attributes {
        attrs(&[
            ("name", Value::from("test")),
            ("vhost", Value::from("test")),
            ("settings", settings),
        ])
    }

    #[test]
    fn test_normalize_fills_defaults() {
        let (_broker, api) = broker();
        let handler = ExchangeHandler::new(api);
        let attributes = handler
            .normalize(declared(map(&[("type", Value::from("fanout"))])))
            .unwrap();

        assert_eq!(
            attributes["settings"],
            map(&[
                ("type", Value::from("fanout")),
                ("durable", Value::Bool(false)),
                ("auto_delete", Value::Bool(false)),
                ("arguments", map(&[])),
            ])
        );
    }

    #[test]
    fn test_normalize_rejects_bad_settings() {
        let (_broker, api) = broker();
        let handler = ExchangeHandler::new(api);
        assert!(handler.normalize(declared(map(&[]))).is_err());
        assert!(
            handler
                .normalize(declared(map(&[
                    ("type", Value::from("topic")),
                    ("durable", Value::from("yes")),
                ])))
                .is_err()
        );
        assert!(
            handler
                .normalize(declared(map(&[
                    ("type", Value::from("topic")),
                    ("internal", Value::Bool(true)),
                ])))
                .is_err()
        );
    }

    #[test]
    fn test_create_read_round_trip() {
        let (broker, api) = broker();
        broker.put_vhost("test").unwrap();
        let handler = ExchangeHandler::new(api);
        let attributes = handler
            .normalize(declared(map(&[
                ("type", Value::from("topic")),
                ("durable", Value::Bool(true)),
                ("arguments", map(&[("alternate-exchange", Value::from("ae"))])),
            ])))
            .unwrap();

        let id = handler.create(&instance("exchange", attributes.clone())).unwrap();
        assert_eq!(id, "test@test");
        assert_eq!(handler.read(&id).unwrap(), Some(attributes));
    }

    #[test]
    fn test_create_in_missing_vhost_is_rejected() {
        let (_broker, api) = broker();
        let handler = ExchangeHandler::new(api);
        let attributes = handler
            .normalize(declared(map(&[("type", Value::from("fanout"))])))
            .unwrap();

        let err = handler.create(&instance("exchange", attributes)).unwrap_err();
        let cause = err.downcast_ref::<brokeradmin::Error>().unwrap();
        assert_eq!(cause.category(), brokeradmin::ErrorCategory::Rejected);
    }

    #[test]
    fn test_delete_twice() {
        let (broker, api) = broker();
        broker.put_vhost("test").unwrap();
        let handler = ExchangeHandler::new(api);
        let attributes = handler
            .normalize(declared(map(&[("type", Value::from("fanout"))])))
            .unwrap();
        let id = handler.create(&instance("exchange", attributes)).unwrap();

        assert_eq!(handler.delete(&id).unwrap(), Deletion::Deleted);
        assert_eq!(handler.delete(&id).unwrap(), Deletion::AlreadyAbsent);
        assert_eq!(handler.read(&id).unwrap(), None);
    }
}
