//! Bindings. The ID is `vhost/source/destination/destination_type/props`.
//!
//! A binding has no server-issued ID. The broker derives a properties key
//! from the routing key and arguments, and that key is what tells apart two
//! bindings between the same source and destination. It is known only after
//! the create, so the replace order for bindings is always destroy-first.

use super::{arguments, arguments_value, deletion, reject_unknown, require_name};
use crate::identity::BindingKey;
use crate::reader::{BrokerObject, BrokerReader, ObjectKey, ResourceKind};
use anyhow::{Context, Result, anyhow, bail};
use brokeradmin::{AdminApi, BindingInfo, BindingRequest, DestinationType};
use declarative::{Attributes, Deletion, Lifecycle, ResolvedInstance, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

const KNOWN: &[&str] = &[
    "vhost",
    "source",
    "destination",
    "destination_type",
    "routing_key",
    "arguments",
];

pub struct BindingHandler {
    api: Arc<dyn AdminApi>,
    reader: BrokerReader,
}

impl BindingHandler {
    pub fn new(api: Arc<dyn AdminApi>) -> Self {
        Self {
            reader: BrokerReader::new(Arc::clone(&api)),
            api,
        }
    }

    fn listed(&self, vhost: &str) -> Result<Vec<BindingInfo>> {
        Ok(self
            .reader
            .list(ResourceKind::Binding, vhost)?
            .into_iter()
            .filter_map(|object| match object {
                BrokerObject::Binding(binding) => Some(binding),
                _ => None,
            })
            .collect())
    }
}

fn destination_type(attributes: &Attributes) -> Result<DestinationType> {
    declarative::require_str(attributes, "destination_type")?
        .parse()
        .map_err(|reason: String| anyhow!(reason))
}

impl Lifecycle for BindingHandler {
    fn kind(&self) -> &'static str {
        "binding"
    }

    fn normalize(&self, mut attributes: Attributes) -> Result<Attributes> {
        reject_unknown(&attributes, KNOWN)?;
        require_name(&attributes, "vhost")?;
        if declarative::require_str(&attributes, "source")?.is_empty() {
            bail!("the default exchange cannot be a binding source");
        }
        require_name(&attributes, "destination")?;
        destination_type(&attributes)?;

        match attributes.get("routing_key") {
            None => {
                attributes.insert("routing_key".to_string(), Value::from(""));
            }
            Some(Value::String(_)) => {}
            Some(other) => bail!("routing_key must be a string, found {}", other.type_name()),
        }
        match attributes.get("arguments") {
            None => {
                attributes.insert("arguments".to_string(), Value::Map(BTreeMap::new()));
            }
            Some(Value::Map(_)) => {}
            Some(other) => bail!("arguments must be a table, found {}", other.type_name()),
        }
        Ok(attributes)
    }

    fn create(&self, instance: &ResolvedInstance) -> Result<String> {
        let vhost = instance.str_attr("vhost")?;
        let source = instance.str_attr("source")?;
        let destination = instance.str_attr("destination")?;
        let destination_type = destination_type(&instance.attributes)?;
        let request = BindingRequest {
            routing_key: instance.str_attr("routing_key")?.to_string(),
            arguments: arguments(instance.attr("arguments")),
        };

        let reported = self
            .api
            .declare_binding(vhost, source, destination, destination_type, &request)
            .with_context(|| {
                format!("binding '{source}' to {destination_type} '{destination}' in vhost '{vhost}'")
            })?;

        // Confirm against the listing; fall back to matching the request.
        let listed = self.listed(vhost)?;
        let confirmed = reported.filter(|key| {
            listed
                .iter()
                .any(|b| b.matches_key(source, destination, destination_type, key))
        });
        let properties_key = match confirmed {
            Some(key) => key,
            None => {
                log::debug!("binding {source} -> {destination}: matching listing by fields");
                listed
                    .iter()
                    .find(|b| {
                        b.source == source
                            && b.destination == destination
                            && b.destination_type == destination_type
                            && b.routing_key == request.routing_key
                            && b.arguments == request.arguments
                    })
                    .map(|b| b.properties_key.clone())
                    .with_context(|| {
                        format!("binding '{source}' -> '{destination}' missing after declare")
                    })?
            }
        };

        Ok(BindingKey {
            vhost: vhost.to_string(),
            source: source.to_string(),
            destination: destination.to_string(),
            destination_type,
            properties_key,
        }
        .to_string())
    }

    fn read(&self, id: &str) -> Result<Option<Attributes>> {
        let key: BindingKey = id.parse()?;
        let found = self.reader.find(&ObjectKey::Binding(key))?;
        Ok(found.and_then(|object| match object {
            BrokerObject::Binding(binding) => Some(Attributes::from([
                ("vhost".to_string(), Value::from(binding.vhost)),
                ("source".to_string(), Value::from(binding.source)),
                ("destination".to_string(), Value::from(binding.destination)),
                (
                    "destination_type".to_string(),
                    Value::from(binding.destination_type.as_str()),
                ),
                ("routing_key".to_string(), Value::from(binding.routing_key)),
                ("arguments".to_string(), arguments_value(&binding.arguments)),
                ("properties_key".to_string(), Value::from(binding.properties_key)),
            ])),
            _ => None,
        }))
    }

    fn delete(&self, id: &str) -> Result<Deletion> {
        let key: BindingKey = id.parse()?;
        deletion(self.api.delete_binding(
            &key.vhost,
            &key.source,
            &key.destination,
            key.destination_type,
            &key.properties_key,
        ))
        .with_context(|| format!("deleting binding {id}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::testing::{attrs, broker, instance, map};
    use brokeradmin::{ExchangeSettings, MockBroker, QueueSettings};

    fn topology(broker: &MockBroker, vhost: &str, exchange: &str, queue: &str) {
        if vhost != "/" {
            broker.put_vhost(vhost).unwrap();
        }
        broker
            .declare_exchange(
                vhost,
                exchange,
                &ExchangeSettings {
                    kind: "topic".to_string(),
                    durable: true,
                    auto_delete: false,
                    arguments: Default::default(),
                },
            )
            .unwrap();
        broker
            .declare_queue(
                vhost,
                queue,
                &QueueSettings {
                    durable: true,
                    auto_delete: false,
                    arguments: Default::default(),
                },
            )
            .unwrap();
    }

    fn declared(vhost: &str, routing_key: &str, arguments: Value) -> Attributes {
        attrs(&[
            ("vhost", Value::from(vhost)),
            ("source", Value::from("Test")),
            ("destination", Value::from("Test.Queue")),
            ("destination_type", Value::from("queue")),
            ("routing_key", Value::from(routing_key)),
            ("arguments", arguments),
        ])
    }

    #[test]
    fn test_create_on_slash_vhost() {
        let (broker, api) = broker();
        topology(&broker, "/", "Test", "Test.Queue");
        let handler = BindingHandler::new(api);
        let attributes = handler.normalize(declared("/", "#", map(&[]))).unwrap();

        let id = handler.create(&instance("binding", attributes)).unwrap();
        assert!(id.starts_with("//Test/Test.Queue/queue/"), "{id}");

        let key: BindingKey = id.parse().unwrap();
        assert_eq!(key.vhost, "/");
        let live = handler.read(&id).unwrap().unwrap();
        assert_eq!(live["routing_key"], Value::from("#"));
    }

    #[test]
    fn test_arguments_disambiguate_bindings() {
        let (broker, api) = broker();
        topology(&broker, "test", "Test", "Test.Queue");
        let handler = BindingHandler::new(api);

        let args = map(&[
            ("key1", Value::from("value1")),
            ("key2", Value::from("value2")),
            ("key3", Value::from("value3")),
        ]);
        let first = handler
            .create(&instance(
                "binding",
                handler.normalize(declared("test", "ANYTHING.#", args.clone())).unwrap(),
            ))
            .unwrap();
        let second = handler
            .create(&instance(
                "binding",
                handler
                    .normalize(declared("test", "ANYTHING.#", map(&[("key1", Value::from("x"))])))
                    .unwrap(),
            ))
            .unwrap();
        let again = handler
            .create(&instance(
                "binding",
                handler.normalize(declared("test", "ANYTHING.#", args)).unwrap(),
            ))
            .unwrap();

        assert_ne!(first, second);
        assert_eq!(first, again);
        let key: BindingKey = first.parse().unwrap();
        assert!(!key.properties_key.is_empty());

        // default-exchange binding plus the two declared ones
        assert_eq!(broker.list_bindings_in("test").unwrap().len(), 3);
    }

    #[test]
    fn test_normalize_defaults() {
        let (_broker, api) = broker();
        let handler = BindingHandler::new(api);
        let attributes = handler
            .normalize(attrs(&[
                ("vhost", Value::from("test")),
                ("source", Value::from("events")),
                ("destination", Value::from("jobs")),
                ("destination_type", Value::from("exchange")),
            ]))
            .unwrap();
        assert_eq!(attributes["routing_key"], Value::from(""));
        assert_eq!(attributes["arguments"], map(&[]));

        let mut bad = attributes.clone();
        bad.insert("destination_type".to_string(), Value::from("topic"));
        assert!(handler.normalize(bad).is_err());

        let mut default_exchange = attributes;
        default_exchange.insert("source".to_string(), Value::from(""));
        assert!(handler.normalize(default_exchange).is_err());
    }

    #[test]
    fn test_delete_is_idempotent_and_exact() {
        let (broker, api) = broker();
        topology(&broker, "test", "Test", "Test.Queue");
        let handler = BindingHandler::new(api);
        let id = handler
            .create(&instance(
                "binding",
                handler.normalize(declared("test", "a", map(&[]))).unwrap(),
            ))
            .unwrap();
        let other = handler
            .create(&instance(
                "binding",
                handler.normalize(declared("test", "b", map(&[]))).unwrap(),
            ))
            .unwrap();

        assert_eq!(handler.delete(&id).unwrap(), Deletion::Deleted);
        assert_eq!(handler.delete(&id).unwrap(), Deletion::AlreadyAbsent);
        assert!(!handler.exists(&id).unwrap());
        assert!(handler.exists(&other).unwrap());
    }

    #[test]
    fn test_exchange_delete_cascades_to_binding() {
        let (broker, api) = broker();
        topology(&broker, "test", "Test", "Test.Queue");
        let handler = BindingHandler::new(api);
        let id = handler
            .create(&instance(
                "binding",
                handler.normalize(declared("test", "#", map(&[]))).unwrap(),
            ))
            .unwrap();

        broker.delete_exchange("test", "Test").unwrap();
        assert!(handler.read(&id).unwrap().is_none());
    }
}
