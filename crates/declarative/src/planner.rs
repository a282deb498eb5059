//! Execution planner - turns declarations and tracked state into ordered steps

use crate::declaration::Declaration;
use crate::diff::{AttributeChange, DiffSummary, compute_changes};
use crate::error::{Error, Phase, Result};
use crate::graph::{self, Dependencies};
use crate::resource::{Registry, ResolvedInstance};
use crate::state::TrackedState;
use crate::types::{Address, InstanceStatus};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Which half of a replacement runs first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplaceOrder {
    /// The new object would collide with the old one.
    DestroyFirst,
    /// The new object has a different identity and can coexist briefly.
    CreateFirst,
}

/// What a step does to one instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Create,
    Update,
    Replace { order: ReplaceOrder },
    NoOp,
    Destroy,
}

impl Action {
    pub fn is_change(&self) -> bool {
        !matches!(self, Self::NoOp)
    }

    /// Diff-style marker for display.
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Create => "+",
            Self::Update => "~",
            Self::Replace { .. } => "-/+",
            Self::NoOp => " ",
            Self::Destroy => "-",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => f.write_str("create"),
            Self::Update => f.write_str("update"),
            Self::Replace {
                order: ReplaceOrder::DestroyFirst,
            } => f.write_str("replace (destroy first)"),
            Self::Replace {
                order: ReplaceOrder::CreateFirst,
            } => f.write_str("replace (create first)"),
            Self::NoOp => f.write_str("no-op"),
            Self::Destroy => f.write_str("destroy"),
        }
    }
}

/// One action on one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Step {
    pub address: Address,
    pub action: Action,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub changes: Vec<AttributeChange>,
}

impl Step {
    pub fn new(address: Address, action: Action) -> Self {
        Self {
            address,
            action,
            changes: Vec::new(),
        }
    }
}

/// Ordered steps for one pass, plus the resolved instances they act on.
///
/// Objects left behind by an interrupted replacement are deleted first.
/// Destroys of undeclared instances come next (dependents before their
/// dependencies), then every declared instance in dependency order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ApplyPlan {
    /// Replaced object IDs still live on the server, by the instance that
    /// replaced them.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub leftovers: BTreeMap<Address, Vec<String>>,
    pub steps: Vec<Step>,
    #[serde(skip)]
    pub instances: BTreeMap<Address, ResolvedInstance>,
}

impl ApplyPlan {
    pub fn summary(&self) -> DiffSummary {
        let mut summary = DiffSummary::from_steps(&self.steps);
        summary.removals += self.leftover_count();
        summary
    }

    pub fn has_changes(&self) -> bool {
        self.leftover_count() > 0 || self.steps.iter().any(|s| s.action.is_change())
    }

    pub fn leftover_count(&self) -> usize {
        self.leftovers.values().map(Vec::len).sum()
    }

    /// Steps that change something.
    pub fn changes(&self) -> impl Iterator<Item = &Step> {
        self.steps.iter().filter(|s| s.action.is_change())
    }

    pub fn step(&self, address: &Address) -> Option<&Step> {
        self.steps.iter().find(|s| &s.address == address)
    }
}

/// Build an apply plan.
///
/// Everything that can fail without I/O (references, cycles, missing
/// handlers, attribute validation) fails here before any handler is
/// called. Tracked instances are then refreshed: one whose object has
/// disappeared is dropped from `state` so it plans as a create.
pub fn plan(
    registry: &Registry,
    declarations: &[Declaration],
    state: &mut TrackedState,
) -> Result<ApplyPlan> {
    let deps = graph::dependencies(declarations)?;
    let order = graph::topological_order(&deps)?;
    let instances = resolve(registry, declarations, &deps, &order)?;

    for tracked in state.instances.values() {
        registry.get(&tracked.kind)?;
    }
    let leftovers = refresh(registry, state)?;

    let mut steps = destroy_steps(state, |address| !instances.contains_key(address))?;

    for address in &order {
        let instance = &instances[address];
        let step = match state.get(address) {
            None => Step::new(address.clone(), Action::Create),
            Some(tracked) => {
                let handler = registry.get(&address.kind)?;
                let changes = compute_changes(
                    &tracked.attributes,
                    &instance.attributes,
                    handler.mutable_attributes(),
                );
                let action = if changes.is_empty() {
                    Action::NoOp
                } else if changes.iter().all(|c| !c.forces_replace) {
                    Action::Update
                } else {
                    let order = match handler.planned_id(&instance.attributes) {
                        Some(id) if id != tracked.id => ReplaceOrder::CreateFirst,
                        _ => ReplaceOrder::DestroyFirst,
                    };
                    Action::Replace { order }
                };
                Step {
                    address: address.clone(),
                    action,
                    changes,
                }
            }
        };
        steps.push(step);
    }

    Ok(ApplyPlan {
        leftovers,
        steps,
        instances,
    })
}

/// Build a plan that destroys every tracked instance.
pub fn plan_destroy(registry: &Registry, state: &TrackedState) -> Result<ApplyPlan> {
    for tracked in state.instances.values() {
        registry.get(&tracked.kind)?;
    }
    Ok(ApplyPlan {
        leftovers: state.leftovers(),
        steps: destroy_steps(state, |_| true)?,
        instances: BTreeMap::new(),
    })
}

/// Resolve references and normalize, in dependency order.
///
/// Each instance is normalized before its dependents resolve, so references
/// can point at defaults a handler fills in.
fn resolve(
    registry: &Registry,
    declarations: &[Declaration],
    deps: &Dependencies,
    order: &[Address],
) -> Result<BTreeMap<Address, ResolvedInstance>> {
    let by_address: BTreeMap<&Address, &Declaration> =
        declarations.iter().map(|d| (&d.address, d)).collect();
    let mut resolved: BTreeMap<Address, ResolvedInstance> = BTreeMap::new();

    for address in order {
        let handler = registry.get(&address.kind)?;
        let Some(decl) = by_address.get(address) else {
            continue;
        };

        let attributes = graph::resolve_attributes(address, &decl.attributes, &|target| {
            resolved.get(target).map(|instance| &instance.attributes)
        })?;
        let attributes = handler
            .normalize(attributes)
            .map_err(|e| Error::instance(address, Phase::Normalize, e))?;

        resolved.insert(
            address.clone(),
            ResolvedInstance {
                address: address.clone(),
                attributes,
                depends_on: deps.get(address).cloned().unwrap_or_default(),
            },
        );
    }

    Ok(resolved)
}

/// Read every tracked instance back and drop the ones that are gone.
///
/// Returns the replaced objects that still exist. Their IDs stay in state
/// until a delete succeeds.
fn refresh(
    registry: &Registry,
    state: &mut TrackedState,
) -> Result<BTreeMap<Address, Vec<String>>> {
    let mut leftovers = BTreeMap::new();
    for (address, replaced) in state.leftovers() {
        let handler = registry.get(&address.kind)?;
        let mut live = Vec::new();
        for id in replaced {
            if handler
                .exists(&id)
                .map_err(|e| Error::instance(&address, Phase::Refresh, e))?
            {
                live.push(id);
            }
        }
        if let Some(instance) = state.instances.get_mut(&address) {
            instance.replaced_ids.clone_from(&live);
        }
        if !live.is_empty() {
            leftovers.insert(address, live);
        }
    }

    let tracked: Vec<(Address, String, String)> = state
        .instances
        .iter()
        .map(|(address, t)| (address.clone(), t.kind.clone(), t.id.clone()))
        .collect();

    for (address, kind, id) in tracked {
        if id.is_empty() {
            log::debug!("{address} was never created; dropping from state");
            state.remove(&address);
            continue;
        }

        let handler = registry.get(&kind)?;
        let live = handler
            .read(&id)
            .map_err(|e| Error::instance(&address, Phase::Refresh, e))?;

        match live {
            None => {
                log::warn!("{address} ({id}) no longer exists; dropping it from state");
                state.remove(&address);
            }
            Some(live) => {
                if let Some(instance) = state.instances.get_mut(&address) {
                    instance.attributes.extend(live);
                    instance.status = InstanceStatus::Created;
                }
            }
        }
    }

    Ok(leftovers)
}

/// Destroy steps for the tracked instances selected by `include`, dependents
/// first.
fn destroy_steps<F>(state: &TrackedState, include: F) -> Result<Vec<Step>>
where
    F: Fn(&Address) -> bool,
{
    let deps: Dependencies = state
        .instances
        .iter()
        .filter(|(address, _)| include(address))
        .map(|(address, t)| (address.clone(), t.depends_on.clone()))
        .collect();

    let mut order = graph::topological_order(&deps)?;
    order.reverse();

    Ok(order
        .into_iter()
        .map(|address| Step::new(address, Action::Destroy))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{Deletion, Lifecycle};
    use crate::state::TrackedInstance;
    use crate::types::{Attributes, Value};
    use anyhow::Result as AnyResult;
    use std::collections::BTreeSet;
    use std::sync::{Arc, Mutex};

    /// Handler over a shared map of id -> attributes.
    struct MapHandler {
        kind: &'static str,
        objects: Arc<Mutex<BTreeMap<String, Attributes>>>,
        mutable: &'static [&'static str],
    }

    impl Lifecycle for MapHandler {
        fn kind(&self) -> &'static str {
            self.kind
        }

        fn normalize(&self, mut attributes: Attributes) -> AnyResult<Attributes> {
            attributes
                .entry("durable".to_string())
                .or_insert(Value::Bool(false));
            Ok(attributes)
        }

        fn mutable_attributes(&self) -> &'static [&'static str] {
            self.mutable
        }

        fn planned_id(&self, attributes: &Attributes) -> Option<String> {
            attributes.get("name").map(ToString::to_string)
        }

        fn create(&self, instance: &ResolvedInstance) -> AnyResult<String> {
            let id = instance.str_attr("name")?.to_string();
            self.objects
                .lock()
                .unwrap()
                .insert(id.clone(), instance.attributes.clone());
            Ok(id)
        }

        fn read(&self, id: &str) -> AnyResult<Option<Attributes>> {
            Ok(self.objects.lock().unwrap().get(id).cloned())
        }

        fn delete(&self, id: &str) -> AnyResult<Deletion> {
            Ok(match self.objects.lock().unwrap().remove(id) {
                Some(_) => Deletion::Deleted,
                None => Deletion::AlreadyAbsent,
            })
        }
    }

    fn registry(objects: &Arc<Mutex<BTreeMap<String, Attributes>>>) -> Registry {
        Registry::new().with(Box::new(MapHandler {
            kind: "thing",
            objects: Arc::clone(objects),
            mutable: &["label"],
        }))
    }

    fn decl(name: &str, attrs: &[(&str, Value)]) -> Declaration {
        Declaration::new(
            Address::new("thing", name),
            attrs
                .iter()
                .map(|(k, v)| ((*k).to_string(), v.clone()))
                .collect(),
        )
    }

    fn tracked(id: &str, attrs: &[(&str, Value)]) -> TrackedInstance {
        TrackedInstance {
            kind: "thing".to_string(),
            id: id.to_string(),
            attributes: attrs
                .iter()
                .map(|(k, v)| ((*k).to_string(), v.clone()))
                .collect(),
            depends_on: BTreeSet::new(),
            status: InstanceStatus::Created,
            replaced_ids: Vec::new(),
            updated_at: None,
        }
    }

    #[test]
    fn test_plan_creates_in_dependency_order() {
        let objects = Arc::default();
        let decls = vec![
            decl("b", &[("name", Value::from("${thing.a.name}-child"))]),
            decl("a", &[("name", Value::from("parent"))]),
        ];

        let plan = plan(&registry(&objects), &decls, &mut TrackedState::new()).unwrap();

        let steps: Vec<(String, Action)> = plan
            .steps
            .iter()
            .map(|s| (s.address.to_string(), s.action))
            .collect();
        assert_eq!(
            steps,
            vec![
                ("thing.a".to_string(), Action::Create),
                ("thing.b".to_string(), Action::Create)
            ]
        );
        assert_eq!(
            plan.instances[&Address::new("thing", "b")].attributes["name"],
            Value::from("parent-child")
        );
        assert!(plan.instances[&Address::new("thing", "b")]
            .depends_on
            .contains(&Address::new("thing", "a")));
    }

    #[test]
    fn test_references_see_normalized_defaults() {
        let objects = Arc::default();
        let decls = vec![
            decl("a", &[("name", Value::from("a"))]),
            decl(
                "b",
                &[
                    ("name", Value::from("b")),
                    ("copy", Value::from("${thing.a.durable}")),
                ],
            ),
        ];

        let plan = plan(&registry(&objects), &decls, &mut TrackedState::new()).unwrap();
        assert_eq!(
            plan.instances[&Address::new("thing", "b")].attributes["copy"],
            Value::Bool(false)
        );
    }

    #[test]
    fn test_plan_fails_before_io_on_missing_handler() {
        let objects = Arc::default();
        let decls = vec![Declaration::new(Address::new("queue", "q"), Attributes::new())];
        let err = plan(&registry(&objects), &decls, &mut TrackedState::new()).unwrap_err();
        assert!(matches!(err, Error::NoHandler { .. }));
    }

    #[test]
    fn test_unchanged_update_and_replace() {
        let objects: Arc<Mutex<BTreeMap<String, Attributes>>> = Arc::default();
        let base = [("name", Value::from("a")), ("durable", Value::Bool(false))];
        objects.lock().unwrap().insert(
            "a".to_string(),
            base.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect(),
        );

        let mut state = TrackedState::new();
        state.record(Address::new("thing", "a"), tracked("a", &base));

        // unchanged
        let decls = vec![decl("a", &[("name", Value::from("a"))])];
        let p = plan(&registry(&objects), &decls, &mut state).unwrap();
        assert_eq!(p.steps[0].action, Action::NoOp);
        assert!(!p.has_changes());

        // mutable attribute only
        let decls = vec![decl("a", &[("name", Value::from("a")), ("label", Value::from("x"))])];
        let p = plan(&registry(&objects), &decls, &mut state).unwrap();
        assert_eq!(p.steps[0].action, Action::Update);

        // same identity, immutable change
        let decls = vec![decl("a", &[("name", Value::from("a")), ("durable", Value::Bool(true))])];
        let p = plan(&registry(&objects), &decls, &mut state).unwrap();
        assert_eq!(
            p.steps[0].action,
            Action::Replace {
                order: ReplaceOrder::DestroyFirst
            }
        );

        // new identity
        let decls = vec![decl("a", &[("name", Value::from("renamed"))])];
        let p = plan(&registry(&objects), &decls, &mut state).unwrap();
        assert_eq!(
            p.steps[0].action,
            Action::Replace {
                order: ReplaceOrder::CreateFirst
            }
        );
    }

    #[test]
    fn test_refresh_drops_drifted_instances() {
        let objects = Arc::default();
        let mut state = TrackedState::new();
        state.record(
            Address::new("thing", "a"),
            tracked("a", &[("name", Value::from("a"))]),
        );

        let decls = vec![decl("a", &[("name", Value::from("a"))])];
        let p = plan(&registry(&objects), &decls, &mut state).unwrap();

        assert!(state.is_empty());
        assert_eq!(p.steps[0].action, Action::Create);
    }

    #[test]
    fn test_orphans_destroyed_dependents_first() {
        let objects: Arc<Mutex<BTreeMap<String, Attributes>>> = Arc::default();
        for id in ["parent", "child"] {
            objects.lock().unwrap().insert(id.to_string(), Attributes::new());
        }

        let mut state = TrackedState::new();
        state.record(Address::new("thing", "parent"), tracked("parent", &[]));
        let mut child = tracked("child", &[]);
        child.depends_on.insert(Address::new("thing", "parent"));
        state.record(Address::new("thing", "child"), child);

        let p = plan(&registry(&objects), &[], &mut state).unwrap();
        let order: Vec<String> = p.steps.iter().map(|s| s.address.to_string()).collect();
        assert_eq!(order, vec!["thing.child", "thing.parent"]);
        assert!(p.steps.iter().all(|s| s.action == Action::Destroy));
    }
}
