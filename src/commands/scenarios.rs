//! Full apply, verify and destroy passes against the in-memory broker.

use crate::cli::{ApplyArgs, DestroyArgs};
use crate::commands::{apply, destroy, testing};
use crate::identity::BindingKey;
use crate::reader::{BrokerObject, BrokerReader, ObjectKey, ResourceKind};
use crate::state;
use crate::verify;
use brokeradmin::{AdminApi, BindingInfo, DestinationType, MockBroker};
use declarative::{Address, TrackedState};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

struct Harness {
    _dir: TempDir,
    file: PathBuf,
    state_path: PathBuf,
    broker: MockBroker,
}

impl Harness {
    fn new(document: &str) -> Self {
        let dir = TempDir::new().unwrap();
        let file = testing::write(dir.path(), "rabbit.toml", document);
        let state_path = dir.path().join("state.toml");
        Self {
            _dir: dir,
            file,
            state_path,
            broker: MockBroker::new(),
        }
    }

    fn api(&self) -> Arc<dyn AdminApi> {
        Arc::new(self.broker.clone())
    }

    fn apply(&self) {
        let args = ApplyArgs {
            file: self.file.clone(),
            yes: true,
            dry_run: false,
        };
        apply::apply(&testing::quiet(), self.api(), &args, &self.state_path).unwrap();
    }

    fn destroy(&self) {
        destroy::destroy(
            &testing::quiet(),
            self.api(),
            &DestroyArgs { yes: true },
            &self.state_path,
        )
        .unwrap();
    }

    fn rewrite(&self, document: &str) {
        std::fs::write(&self.file, document).unwrap();
    }

    fn state(&self) -> TrackedState {
        state::load(&self.state_path).unwrap()
    }

    fn id(&self, kind: &str, name: &str) -> String {
        self.state().get(&Address::new(kind, name)).unwrap().id.clone()
    }

    fn bindings(&self, vhost: &str, source: &str, destination: &str) -> Vec<BindingInfo> {
        self.broker
            .list_bindings_in(vhost)
            .unwrap_or_default()
            .into_iter()
            .filter(|b| {
                b.source == source
                    && b.destination == destination
                    && b.destination_type == DestinationType::Queue
            })
            .collect()
    }
}

fn basic(vhost: &str) -> String {
    format!(
        r##"
        [vhost.test]
        name = "{vhost}"

        [permissions.guest]
        user = "guest"
        vhost = "${{vhost.test.name}}"
        permissions = {{ configure = ".*", write = ".*", read = ".*" }}

        [exchange.test]
        name = "test"
        vhost = "${{permissions.guest.vhost}}"
        settings = {{ type = "fanout", durable = false, auto_delete = true }}

        [queue.test]
        name = "test"
        vhost = "${{permissions.guest.vhost}}"
        settings = {{ durable = false, auto_delete = true }}

        [binding.test]
        vhost = "${{vhost.test.name}}"
        source = "${{exchange.test.name}}"
        destination = "${{queue.test.name}}"
        destination_type = "queue"
        routing_key = "#"
        "##
    )
}

fn assert_round_trip(harness: &Harness, vhost: &str) {
    harness.apply();
    assert_eq!(harness.bindings(vhost, "test", "test").len(), 1);

    let id = harness.id("binding", "test");
    let key: BindingKey = id.parse().unwrap();
    assert_eq!(key.vhost, vhost);
    assert_eq!(key.source, "test");
    assert_eq!(key.destination, "test");

    let reader = BrokerReader::new(harness.api());
    verify::check_applied(&reader, &harness.state(), &Address::new("binding", "test")).unwrap();

    harness.destroy();
    assert!(harness.bindings(vhost, "test", "test").is_empty());
    verify::check_destroyed(&reader, ResourceKind::Binding, &id).unwrap();
}

#[test]
fn test_basic_topology() {
    let harness = Harness::new(&basic("test"));
    assert_round_trip(&harness, "test");
}

#[test]
fn test_topology_on_slash_vhost() {
    let harness = Harness::new(&basic("/"));
    harness.apply();
    assert!(harness.id("binding", "test").starts_with("//test/test/queue/"));
    assert_eq!(harness.id("queue", "test"), "test@/");
    assert_eq!(harness.id("permissions", "guest"), "guest@/");
    assert_round_trip(&harness, "/");
}

#[test]
fn test_bindings_told_apart_by_properties_key() {
    let harness = Harness::new(
        r#"
        [vhost.test]
        name = "test"

        [exchange.test]
        name = "Test"
        vhost = "${vhost.test.name}"
        settings = { type = "topic" }

        [queue.test]
        name = "Test.Queue"
        vhost = "${vhost.test.name}"

        [binding.with_arguments]
        vhost = "${vhost.test.name}"
        source = "${exchange.test.name}"
        destination = "${queue.test.name}"
        destination_type = "queue"
        routing_key = "ANYTHING.#"
        arguments = { key1 = "value1", key2 = "value2", key3 = "value3" }

        [binding.same_again]
        vhost = "${vhost.test.name}"
        source = "${exchange.test.name}"
        destination = "${queue.test.name}"
        destination_type = "queue"
        routing_key = "ANYTHING.#"
        arguments = { key1 = "value1", key2 = "value2", key3 = "value3" }

        [binding.plain]
        vhost = "${vhost.test.name}"
        source = "${exchange.test.name}"
        destination = "${queue.test.name}"
        destination_type = "queue"
        routing_key = "ANYTHING.#"
        "#,
    );
    harness.apply();

    let listed = harness.bindings("test", "Test", "Test.Queue");
    assert_eq!(listed.len(), 2);
    assert!(listed.iter().all(|b| !b.properties_key.is_empty()));

    let with_arguments = harness.id("binding", "with_arguments");
    let plain = harness.id("binding", "plain");
    assert_ne!(with_arguments, plain);
    assert_eq!(with_arguments, harness.id("binding", "same_again"));

    let reader = BrokerReader::new(harness.api());
    let key = ObjectKey::parse(ResourceKind::Binding, &with_arguments).unwrap();
    match reader.find(&key).unwrap() {
        Some(BrokerObject::Binding(binding)) => assert_eq!(binding.arguments.len(), 3),
        other => panic!("expected a binding, got {other:?}"),
    }

    harness.destroy();
    assert!(harness.bindings("test", "Test", "Test.Queue").is_empty());
    assert!(harness.state().is_empty());
}

fn identical_bindings(with_copy: bool) -> String {
    let binding = |name: &str| {
        format!(
            r##"
        [binding.{name}]
        vhost = "${{vhost.test.name}}"
        source = "${{exchange.test.name}}"
        destination = "${{queue.test.name}}"
        destination_type = "queue"
        routing_key = "ANYTHING.#"
        arguments = {{ key1 = "value1" }}
        "##
        )
    };
    let mut document = String::from(
        r#"
        [vhost.test]
        name = "test"

        [exchange.test]
        name = "Test"
        vhost = "${vhost.test.name}"
        settings = { type = "topic" }

        [queue.test]
        name = "Test.Queue"
        vhost = "${vhost.test.name}"
        "#,
    );
    document.push_str(&binding("kept"));
    if with_copy {
        document.push_str(&binding("copy"));
    }
    document
}

#[test]
fn test_dropping_a_duplicate_binding_keeps_the_shared_one() {
    let harness = Harness::new(&identical_bindings(true));
    harness.apply();
    assert_eq!(harness.id("binding", "kept"), harness.id("binding", "copy"));
    assert_eq!(harness.bindings("test", "Test", "Test.Queue").len(), 1);

    harness.rewrite(&identical_bindings(false));
    harness.broker.clear_calls();
    harness.apply();

    assert!(
        harness
            .broker
            .mutating_calls()
            .iter()
            .all(|call| !call.starts_with("delete_binding"))
    );
    assert_eq!(harness.bindings("test", "Test", "Test.Queue").len(), 1);
    assert!(harness.state().get(&Address::new("binding", "copy")).is_none());

    let reader = BrokerReader::new(harness.api());
    verify::check_applied(&reader, &harness.state(), &Address::new("binding", "kept")).unwrap();

    harness.destroy();
    assert!(harness.bindings("test", "Test", "Test.Queue").is_empty());
}

#[test]
fn test_state_survives_between_runs() {
    let harness = Harness::new(&basic("test"));
    harness.apply();
    let before = harness.state();

    harness.broker.clear_calls();
    harness.apply();

    assert!(harness.broker.mutating_calls().is_empty());
    let after = harness.state();
    assert_eq!(
        before.instances.keys().collect::<Vec<_>>(),
        after.instances.keys().collect::<Vec<_>>()
    );
    assert!(harness.state_path.exists());
}
