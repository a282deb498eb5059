//! Execution engine - applies a plan one step at a time, in order

use crate::context::{ConfirmCallback, ProgressCallback};
use crate::declaration::Declaration;
use crate::error::{Error, Phase, Result};
use crate::planner::{self, Action, ApplyPlan, ReplaceOrder, Step};
use crate::resource::{Deletion, Lifecycle, Registry, ResolvedInstance};
use crate::state::{TrackedInstance, TrackedState};
use crate::types::{Address, ApplyResult, ExecuteOptions, ExecuteSummary, InstanceStatus};
use std::collections::{BTreeMap, BTreeSet};

/// Outcome of executing a plan.
///
/// A failed step does not discard the report: the statuses show which
/// instances completed, which failed and which were never reached.
#[derive(Debug)]
pub struct ApplyReport {
    pub summary: ExecuteSummary,
    pub statuses: BTreeMap<Address, InstanceStatus>,
    /// The error that stopped execution, if any.
    pub failure: Option<Error>,
}

impl ApplyReport {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    pub fn status(&self, address: &Address) -> Option<InstanceStatus> {
        self.statuses.get(address).copied()
    }

    /// Turn the report into a `Result`, keeping the summary on success.
    pub fn into_result(self) -> Result<ExecuteSummary> {
        match self.failure {
            Some(error) => Err(error),
            None => Ok(self.summary),
        }
    }
}

/// Reconciliation engine over a set of lifecycle handlers.
pub struct Engine {
    registry: Registry,
}

impl Engine {
    pub fn new(registry: Registry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Plan an apply. Refreshes `state` (drifted instances are dropped).
    pub fn plan(&self, declarations: &[Declaration], state: &mut TrackedState) -> Result<ApplyPlan> {
        planner::plan(&self.registry, declarations, state)
    }

    /// Plan the destruction of everything in `state`.
    pub fn plan_destroy(&self, state: &TrackedState) -> Result<ApplyPlan> {
        planner::plan_destroy(&self.registry, state)
    }

    /// Plan and execute an apply.
    ///
    /// Planning errors are returned before any mutation. Execution errors are
    /// carried in the report so the caller can persist `state` first.
    pub fn apply<P, C>(
        &self,
        declarations: &[Declaration],
        state: &mut TrackedState,
        opts: &ExecuteOptions,
        progress: &mut P,
        confirm: &mut C,
    ) -> Result<ApplyReport>
    where
        P: ProgressCallback,
        C: ConfirmCallback,
    {
        let plan = self.plan(declarations, state)?;
        self.execute(&plan, state, opts, progress, confirm)
    }

    /// Plan and execute the destruction of everything in `state`.
    pub fn destroy<P, C>(
        &self,
        state: &mut TrackedState,
        opts: &ExecuteOptions,
        progress: &mut P,
        confirm: &mut C,
    ) -> Result<ApplyReport>
    where
        P: ProgressCallback,
        C: ConfirmCallback,
    {
        let plan = self.plan_destroy(state)?;
        self.execute(&plan, state, opts, progress, confirm)
    }

    /// Execute a plan against `state`.
    ///
    /// Steps run strictly in order, one at a time. The first failure stops
    /// execution: the failing instance is marked failed, later instances
    /// stay planned, and nothing already done is rolled back.
    pub fn execute<P, C>(
        &self,
        plan: &ApplyPlan,
        state: &mut TrackedState,
        opts: &ExecuteOptions,
        progress: &mut P,
        confirm: &mut C,
    ) -> Result<ApplyReport>
    where
        P: ProgressCallback,
        C: ConfirmCallback,
    {
        let mut pass = Pass::new(&self.registry, plan, state);
        let changes = plan.summary().total();

        if changes == 0 || opts.dry_run {
            return Ok(pass.finish(ExecuteSummary::default(), None));
        }

        let prompt = format!("Apply {changes} change(s)?");
        if !confirm
            .confirm(&prompt)
            .map_err(|e| Error::Callback(format!("{e:#}")))?
        {
            let summary = ExecuteSummary {
                skipped: changes,
                ..Default::default()
            };
            return Ok(pass.finish(summary, None));
        }

        let mut summary = ExecuteSummary::default();
        let mut failure = None;

        progress.on_start(plan.steps.len());
        if let Err(error) = pass.remove_leftovers(&mut summary) {
            progress.on_complete();
            return Ok(pass.finish(summary, Some(error)));
        }
        for step in &plan.steps {
            progress.on_step_start(&step.address, &step.action);
            match pass.run(step) {
                Ok(result) => {
                    progress.on_step_complete(&step.address, &result);
                    summary.add_result(&result);
                }
                Err(error) => {
                    let result = ApplyResult::Failed {
                        error: error_chain(&error),
                    };
                    progress.on_step_complete(&step.address, &result);
                    summary.add_result(&result);
                    failure = Some(error);
                    break;
                }
            }
        }
        progress.on_complete();

        Ok(pass.finish(summary, failure))
    }
}

/// Render an error and its sources as one line.
pub fn error_chain(error: &dyn std::error::Error) -> String {
    let mut out = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        out.push_str(": ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}

/// Mutable bookkeeping for one execution.
struct Pass<'e, 's> {
    registry: &'e Registry,
    plan: &'e ApplyPlan,
    state: &'s mut TrackedState,
    statuses: BTreeMap<Address, InstanceStatus>,
    /// Instances created or replaced in this pass. The broker may have
    /// removed their dependents along with the old objects.
    disturbed: BTreeSet<Address>,
}

impl<'e, 's> Pass<'e, 's> {
    fn new(registry: &'e Registry, plan: &'e ApplyPlan, state: &'s mut TrackedState) -> Self {
        let statuses = plan
            .steps
            .iter()
            .map(|step| {
                let status = match step.action {
                    Action::Create => InstanceStatus::Planned,
                    _ => InstanceStatus::Created,
                };
                (step.address.clone(), status)
            })
            .collect();

        Self {
            registry,
            plan,
            state,
            statuses,
            disturbed: BTreeSet::new(),
        }
    }

    fn finish(self, summary: ExecuteSummary, failure: Option<Error>) -> ApplyReport {
        ApplyReport {
            summary,
            statuses: self.statuses,
            failure,
        }
    }

    fn run(&mut self, step: &Step) -> Result<ApplyResult> {
        let address = &step.address;
        match step.action {
            Action::Create => self.create(address),
            Action::Update => {
                if !self.still_exists(address)? {
                    return self.recreate(address);
                }
                self.update(address)
            }
            Action::Replace { order } => self.replace(address, order),
            Action::NoOp => {
                if !self.still_exists(address)? {
                    return self.recreate(address);
                }
                self.refresh_record(address)?;
                Ok(ApplyResult::NoChange)
            }
            Action::Destroy => self.destroy(address),
        }
    }

    fn handler(&self, kind: &str) -> Result<&'e dyn Lifecycle> {
        self.registry.get(kind)
    }

    fn instance(&self, address: &Address) -> Result<&'e ResolvedInstance> {
        self.plan
            .instances
            .get(address)
            .ok_or_else(|| Error::NotPlanned {
                address: address.clone(),
            })
    }

    fn tracked_id(&self, address: &Address) -> Result<String> {
        self.state
            .get(address)
            .map(|t| t.id.clone())
            .ok_or_else(|| Error::NotPlanned {
                address: address.clone(),
            })
    }

    fn advance(&mut self, address: &Address, to: InstanceStatus) -> Result<()> {
        let from = self
            .statuses
            .get(address)
            .copied()
            .unwrap_or(InstanceStatus::Planned);
        if !from.can_transition_to(to) {
            return Err(Error::InvalidTransition {
                address: address.clone(),
                from,
                to,
            });
        }
        self.statuses.insert(address.clone(), to);
        Ok(())
    }

    fn mark_failed(&mut self, address: &Address) {
        if self.advance(address, InstanceStatus::Failed).is_ok() {
            self.state.set_status(address, InstanceStatus::Failed);
        }
    }

    /// Delete the objects interrupted replacements left behind.
    fn remove_leftovers(&mut self, summary: &mut ExecuteSummary) -> Result<()> {
        let plan = self.plan;
        for (address, ids) in &plan.leftovers {
            for id in ids {
                let result = match self.remove_replaced(address, id)? {
                    Deletion::Deleted => ApplyResult::Destroyed,
                    Deletion::AlreadyAbsent => ApplyResult::AlreadyAbsent,
                };
                summary.add_result(&result);
            }
        }
        Ok(())
    }

    /// Delete an object `address` replaced, then forget its ID.
    ///
    /// On failure the ID stays in state so the next pass retries it.
    fn remove_replaced(&mut self, address: &Address, id: &str) -> Result<Deletion> {
        let handler = self.handler(&address.kind)?;
        let deletion = handler
            .exists(id)
            .and_then(|exists| {
                if exists {
                    handler.delete(id)
                } else {
                    Ok(Deletion::AlreadyAbsent)
                }
            })
            .map_err(|e| {
                Error::instance(
                    address,
                    Phase::Delete,
                    e.context(format!("removing replaced object {id}")),
                )
            })?;

        if let Some(tracked) = self.state.instances.get_mut(address) {
            tracked.replaced_ids.retain(|r| r != id);
        }
        log::info!("Removed {id}, replaced by {address}: {deletion:?}");
        Ok(deletion)
    }

    /// Record a successful create or update.
    fn record(&mut self, address: &Address, id: String) -> Result<()> {
        let instance = self.instance(address)?;
        self.state.record(
            address.clone(),
            TrackedInstance {
                kind: address.kind.clone(),
                id,
                attributes: instance.attributes.clone(),
                depends_on: instance.depends_on.clone(),
                status: InstanceStatus::Created,
                replaced_ids: Vec::new(),
                updated_at: None,
            },
        );
        Ok(())
    }

    /// Keep a failed create visible in state, without an ID.
    fn record_failed_create(&mut self, address: &Address) -> Result<()> {
        let instance = self.instance(address)?;
        self.state.record(
            address.clone(),
            TrackedInstance {
                kind: address.kind.clone(),
                id: String::new(),
                attributes: instance.attributes.clone(),
                depends_on: instance.depends_on.clone(),
                status: InstanceStatus::Failed,
                replaced_ids: Vec::new(),
                updated_at: None,
            },
        );
        Ok(())
    }

    /// Planned -> Creating -> Created, returning the new ID.
    fn call_create(&mut self, address: &Address) -> Result<String> {
        self.advance(address, InstanceStatus::Creating)?;
        let handler = self.handler(&address.kind)?;
        let instance = self.instance(address)?;

        match handler.create(instance) {
            Ok(id) => {
                self.advance(address, InstanceStatus::Created)?;
                self.disturbed.insert(address.clone());
                log::info!("Created {address} ({id})");
                Ok(id)
            }
            Err(e) => {
                self.mark_failed(address);
                Err(Error::instance(address, Phase::Create, e))
            }
        }
    }

    /// Created -> Destroying -> Destroyed, skipping the delete if the object
    /// is already gone.
    fn call_delete(&mut self, address: &Address, kind: &str, id: &str) -> Result<Deletion> {
        self.advance(address, InstanceStatus::Destroying)?;
        let handler = self.handler(kind)?;

        let deletion = match handler.exists(id) {
            Ok(false) => Ok(Deletion::AlreadyAbsent),
            Ok(true) => handler
                .delete(id)
                .map_err(|e| Error::instance(address, Phase::Delete, e)),
            Err(e) => Err(Error::instance(address, Phase::Exists, e)),
        };

        match deletion {
            Ok(deletion) => {
                self.advance(address, InstanceStatus::Destroyed)?;
                log::info!("Destroyed {address} ({id}): {deletion:?}");
                Ok(deletion)
            }
            Err(e) => {
                self.mark_failed(address);
                Err(e)
            }
        }
    }

    fn create(&mut self, address: &Address) -> Result<ApplyResult> {
        match self.call_create(address) {
            Ok(id) => {
                self.record(address, id)?;
                Ok(ApplyResult::Created)
            }
            Err(e) => {
                self.record_failed_create(address)?;
                Err(e)
            }
        }
    }

    fn update(&mut self, address: &Address) -> Result<ApplyResult> {
        let id = self.tracked_id(address)?;
        self.advance(address, InstanceStatus::Updating)?;
        let handler = self.handler(&address.kind)?;
        let instance = self.instance(address)?;

        if let Err(e) = handler.update(&id, instance) {
            self.mark_failed(address);
            return Err(Error::instance(address, Phase::Update, e));
        }

        self.advance(address, InstanceStatus::Created)?;
        self.record(address, id)?;
        Ok(ApplyResult::Updated)
    }

    fn replace(&mut self, address: &Address, order: ReplaceOrder) -> Result<ApplyResult> {
        let old_id = self.tracked_id(address)?;

        match order {
            ReplaceOrder::DestroyFirst => {
                self.call_delete(address, &address.kind, &old_id)?;
                self.state.remove(address);
                // the replacement is a new instance
                self.statuses.insert(address.clone(), InstanceStatus::Planned);
                self.create(address)?;
            }
            ReplaceOrder::CreateFirst => {
                self.statuses.insert(address.clone(), InstanceStatus::Planned);
                let new_id = self.call_create(address)?;
                self.record(address, new_id)?;
                if let Some(tracked) = self.state.instances.get_mut(address) {
                    tracked.replaced_ids.push(old_id.clone());
                }
                self.remove_replaced(address, &old_id)?;
            }
        }

        self.disturbed.insert(address.clone());
        Ok(ApplyResult::Replaced)
    }

    fn destroy(&mut self, address: &Address) -> Result<ApplyResult> {
        let Some(tracked) = self.state.get(address) else {
            return Ok(ApplyResult::AlreadyAbsent);
        };
        let (kind, id) = (tracked.kind.clone(), tracked.id.clone());

        if id.is_empty() {
            self.state.remove(address);
            return Ok(ApplyResult::AlreadyAbsent);
        }

        if let Some(holder) = self.holder(address, &kind, &id) {
            log::info!("{address} ({id}) is also held by {holder}; keeping the object");
            self.advance(address, InstanceStatus::Destroying)?;
            self.advance(address, InstanceStatus::Destroyed)?;
            self.state.remove(address);
            return Ok(ApplyResult::Released);
        }

        let deletion = self.call_delete(address, &kind, &id)?;
        self.state.remove(address);
        Ok(match deletion {
            Deletion::Deleted => ApplyResult::Destroyed,
            Deletion::AlreadyAbsent => ApplyResult::AlreadyAbsent,
        })
    }

    /// Another tracked or declared instance that holds the object `id`.
    fn holder(&self, address: &Address, kind: &str, id: &str) -> Option<Address> {
        if let Some(tracked) = self.state.holders(address, kind, id).next() {
            return Some(tracked.clone());
        }
        let handler = self.registry.get(kind).ok()?;
        self.plan
            .instances
            .iter()
            .find(|(other, instance)| {
                *other != address
                    && other.kind == kind
                    && handler.planned_id(&instance.attributes).as_deref() == Some(id)
            })
            .map(|(other, _)| other.clone())
    }

    /// Whether a tracked instance survived changes to its dependencies.
    ///
    /// Only checked when a dependency was created or replaced in this pass.
    fn still_exists(&mut self, address: &Address) -> Result<bool> {
        let instance = self.instance(address)?;
        if instance.depends_on.is_disjoint(&self.disturbed) {
            return Ok(true);
        }

        let id = self.tracked_id(address)?;
        let handler = self.handler(&address.kind)?;
        let exists = handler
            .exists(&id)
            .map_err(|e| Error::instance(address, Phase::Exists, e))?;
        if !exists {
            log::warn!("{address} ({id}) was removed along with a dependency; re-creating");
        }
        Ok(exists)
    }

    fn recreate(&mut self, address: &Address) -> Result<ApplyResult> {
        self.state.remove(address);
        self.statuses.insert(address.clone(), InstanceStatus::Planned);
        self.create(address)
    }

    /// Keep dependencies of an unchanged instance current.
    fn refresh_record(&mut self, address: &Address) -> Result<()> {
        let instance = self.instance(address)?;
        if let Some(tracked) = self.state.instances.get_mut(address) {
            tracked.depends_on = instance.depends_on.clone();
            tracked.status = InstanceStatus::Created;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{AutoConfirm, AutoDecline, NoProgress};
    use crate::types::{Attributes, Value};
    use anyhow::Result as AnyResult;
    use std::sync::{Arc, Mutex};

    /// In-memory store shared by test handlers. Deleting a parent deletes
    /// every object whose `parent` attribute names it.
    #[derive(Default)]
    struct Store {
        objects: BTreeMap<String, Attributes>,
        calls: Vec<String>,
        fail_create: Option<String>,
        fail_delete: Option<String>,
    }

    struct Handler {
        kind: &'static str,
        store: Arc<Mutex<Store>>,
    }

    impl Lifecycle for Handler {
        fn kind(&self) -> &'static str {
            self.kind
        }

        fn normalize(&self, attributes: Attributes) -> AnyResult<Attributes> {
            crate::resource::require_str(&attributes, "name")?;
            Ok(attributes)
        }

        fn mutable_attributes(&self) -> &'static [&'static str] {
            &["label"]
        }

        fn planned_id(&self, attributes: &Attributes) -> Option<String> {
            attributes.get("name").map(ToString::to_string)
        }

        fn create(&self, instance: &ResolvedInstance) -> AnyResult<String> {
            let name = instance.str_attr("name")?.to_string();
            let mut store = self.store.lock().unwrap();
            store.calls.push(format!("create {name}"));
            if store.fail_create.as_deref() == Some(name.as_str()) {
                anyhow::bail!("rejected");
            }
            store.objects.insert(name.clone(), instance.attributes.clone());
            Ok(name)
        }

        fn read(&self, id: &str) -> AnyResult<Option<Attributes>> {
            Ok(self.store.lock().unwrap().objects.get(id).cloned())
        }

        fn update(&self, id: &str, instance: &ResolvedInstance) -> AnyResult<()> {
            let mut store = self.store.lock().unwrap();
            store.calls.push(format!("update {id}"));
            store.objects.insert(id.to_string(), instance.attributes.clone());
            Ok(())
        }

        fn delete(&self, id: &str) -> AnyResult<Deletion> {
            let mut store = self.store.lock().unwrap();
            store.calls.push(format!("delete {id}"));
            if store.fail_delete.as_deref() == Some(id) {
                anyhow::bail!("in use");
            }
            if store.objects.remove(id).is_none() {
                return Ok(Deletion::AlreadyAbsent);
            }
            store
                .objects
                .retain(|_, attrs| attrs.get("parent").and_then(Value::as_str) != Some(id));
            Ok(Deletion::Deleted)
        }
    }

    fn engine(store: &Arc<Mutex<Store>>) -> Engine {
        Engine::new(Registry::new().with(Box::new(Handler {
            kind: "thing",
            store: Arc::clone(store),
        })))
    }

    fn decl(name: &str, attrs: &[(&str, &str)]) -> Declaration {
        let mut attributes: Attributes = attrs
            .iter()
            .map(|(k, v)| ((*k).to_string(), Value::from(*v)))
            .collect();
        attributes
            .entry("name".to_string())
            .or_insert_with(|| Value::from(name));
        Declaration::new(Address::new("thing", name), attributes)
    }

    fn addr(name: &str) -> Address {
        Address::new("thing", name)
    }

    fn calls(store: &Arc<Mutex<Store>>) -> Vec<String> {
        store.lock().unwrap().calls.clone()
    }

    fn apply(
        engine: &Engine,
        decls: &[Declaration],
        state: &mut TrackedState,
    ) -> Result<ApplyReport> {
        engine.apply(
            decls,
            state,
            &ExecuteOptions::default(),
            &mut NoProgress,
            &mut AutoConfirm,
        )
    }

    fn parent_child() -> Vec<Declaration> {
        vec![
            decl("child", &[("parent", "${thing.parent.name}")]),
            decl("parent", &[]),
        ]
    }

    #[test]
    fn test_apply_creates_in_order_and_tracks() {
        let store = Arc::default();
        let engine = engine(&store);
        let mut state = TrackedState::new();

        let report = apply(&engine, &parent_child(), &mut state).unwrap();

        assert!(report.is_success());
        assert_eq!(report.summary.created, 2);
        assert_eq!(calls(&store), vec!["create parent", "create child"]);
        assert_eq!(state.get(&addr("child")).unwrap().id, "child");
        assert!(state
            .get(&addr("child"))
            .unwrap()
            .depends_on
            .contains(&addr("parent")));
        assert_eq!(report.status(&addr("child")), Some(InstanceStatus::Created));
    }

    #[test]
    fn test_second_apply_is_a_no_op() {
        let store = Arc::default();
        let engine = engine(&store);
        let mut state = TrackedState::new();

        apply(&engine, &parent_child(), &mut state).unwrap();
        store.lock().unwrap().calls.clear();

        let report = apply(&engine, &parent_child(), &mut state).unwrap();
        assert_eq!(report.summary.total_changes(), 0);
        assert!(calls(&store).is_empty());
    }

    #[test]
    fn test_destroy_is_reverse_order_and_empties_state() {
        let store = Arc::default();
        let engine = engine(&store);
        let mut state = TrackedState::new();
        apply(&engine, &parent_child(), &mut state).unwrap();
        store.lock().unwrap().calls.clear();

        let report = engine
            .destroy(
                &mut state,
                &ExecuteOptions::default(),
                &mut NoProgress,
                &mut AutoConfirm,
            )
            .unwrap();

        assert!(report.is_success());
        assert_eq!(calls(&store), vec!["delete child", "delete parent"]);
        assert!(state.is_empty());
        assert_eq!(report.status(&addr("parent")), Some(InstanceStatus::Destroyed));
    }

    #[test]
    fn test_destroy_skips_objects_removed_by_cascade() {
        let store: Arc<Mutex<Store>> = Arc::default();
        let engine = engine(&store);
        let mut state = TrackedState::new();
        apply(&engine, &parent_child(), &mut state).unwrap();

        // remove the child out of band
        store.lock().unwrap().objects.remove("child");
        store.lock().unwrap().calls.clear();

        let report = engine
            .destroy(
                &mut state,
                &ExecuteOptions::default(),
                &mut NoProgress,
                &mut AutoConfirm,
            )
            .unwrap();

        assert_eq!(report.summary.destroyed, 1);
        assert_eq!(calls(&store), vec!["delete parent"]);
    }

    #[test]
    fn test_drift_is_recreated() {
        let store: Arc<Mutex<Store>> = Arc::default();
        let engine = engine(&store);
        let mut state = TrackedState::new();
        apply(&engine, &parent_child(), &mut state).unwrap();

        store.lock().unwrap().objects.remove("child");
        store.lock().unwrap().calls.clear();

        let report = apply(&engine, &parent_child(), &mut state).unwrap();
        assert_eq!(report.summary.created, 1);
        assert_eq!(calls(&store), vec!["create child"]);
    }

    #[test]
    fn test_replace_recreates_cascaded_dependents() {
        let store: Arc<Mutex<Store>> = Arc::default();
        let engine = engine(&store);
        let mut state = TrackedState::new();
        apply(&engine, &parent_child(), &mut state).unwrap();
        store.lock().unwrap().calls.clear();

        // immutable change on the parent, same identity: destroy first, which
        // takes the child with it
        let decls = vec![
            decl("child", &[("parent", "${thing.parent.name}")]),
            decl("parent", &[("flavor", "new")]),
        ];
        let report = apply(&engine, &decls, &mut state).unwrap();

        assert!(report.is_success());
        assert_eq!(report.summary.replaced, 1);
        assert_eq!(report.summary.created, 1);
        assert_eq!(
            calls(&store),
            vec!["delete parent", "create parent", "create child"]
        );
        assert!(store.lock().unwrap().objects.contains_key("child"));
    }

    #[test]
    fn test_update_in_place() {
        let store: Arc<Mutex<Store>> = Arc::default();
        let engine = engine(&store);
        let mut state = TrackedState::new();
        apply(&engine, &[decl("a", &[])], &mut state).unwrap();
        store.lock().unwrap().calls.clear();

        let report = apply(&engine, &[decl("a", &[("label", "x")])], &mut state).unwrap();

        assert_eq!(report.summary.updated, 1);
        assert_eq!(calls(&store), vec!["update a"]);
        assert_eq!(
            state.get(&addr("a")).unwrap().attributes["label"],
            Value::from("x")
        );
    }

    #[test]
    fn test_rename_creates_before_destroying() {
        let store: Arc<Mutex<Store>> = Arc::default();
        let engine = engine(&store);
        let mut state = TrackedState::new();
        apply(&engine, &[decl("a", &[])], &mut state).unwrap();
        store.lock().unwrap().calls.clear();

        let report = apply(&engine, &[decl("a", &[("name", "b")])], &mut state).unwrap();

        assert_eq!(report.summary.replaced, 1);
        assert_eq!(calls(&store), vec!["create b", "delete a"]);
        assert_eq!(state.get(&addr("a")).unwrap().id, "b");
    }

    #[test]
    fn test_failure_halts_and_keeps_completed() {
        let store: Arc<Mutex<Store>> = Arc::default();
        store.lock().unwrap().fail_create = Some("b".to_string());
        let engine = engine(&store);
        let mut state = TrackedState::new();

        let decls = vec![
            decl("a", &[]),
            decl("b", &[("parent", "${thing.a.name}")]),
            decl("c", &[("parent", "${thing.b.name}")]),
        ];
        let report = apply(&engine, &decls, &mut state).unwrap();

        assert_eq!(report.status(&addr("a")), Some(InstanceStatus::Created));
        assert_eq!(report.status(&addr("b")), Some(InstanceStatus::Failed));
        assert_eq!(report.status(&addr("c")), Some(InstanceStatus::Planned));
        assert_eq!(calls(&store), vec!["create a", "create b"]);

        assert!(state.get(&addr("a")).unwrap().has_id());
        assert_eq!(state.get(&addr("b")).unwrap().status, InstanceStatus::Failed);
        assert!(state.get(&addr("c")).is_none());

        let err = report.into_result().unwrap_err();
        assert_eq!(err.address(), Some(&addr("b")));
        assert_eq!(err.phase(), Some(Phase::Create));
    }

    fn destroy_all(engine: &Engine, state: &mut TrackedState) -> ApplyReport {
        engine
            .destroy(
                state,
                &ExecuteOptions::default(),
                &mut NoProgress,
                &mut AutoConfirm,
            )
            .unwrap()
    }

    #[test]
    fn test_failed_delete_keeps_instance_tracked() {
        let store: Arc<Mutex<Store>> = Arc::default();
        let engine = engine(&store);
        let mut state = TrackedState::new();
        apply(&engine, &parent_child(), &mut state).unwrap();
        store.lock().unwrap().fail_delete = Some("parent".to_string());
        store.lock().unwrap().calls.clear();

        let report = destroy_all(&engine, &mut state);

        assert_eq!(calls(&store), vec!["delete child", "delete parent"]);
        assert_eq!(report.status(&addr("child")), Some(InstanceStatus::Destroyed));
        assert_eq!(report.status(&addr("parent")), Some(InstanceStatus::Failed));
        assert!(state.get(&addr("child")).is_none());
        let parent = state.get(&addr("parent")).unwrap();
        assert_eq!(parent.id, "parent");
        assert_eq!(parent.status, InstanceStatus::Failed);

        let err = report.into_result().unwrap_err();
        assert_eq!(err.address(), Some(&addr("parent")));
        assert_eq!(err.phase(), Some(Phase::Delete));

        // the next pass picks it up again
        store.lock().unwrap().fail_delete = None;
        let report = destroy_all(&engine, &mut state);
        assert!(report.is_success());
        assert!(state.is_empty());
        assert!(store.lock().unwrap().objects.is_empty());
    }

    #[test]
    fn test_replaced_object_is_retried_until_deleted() {
        let store: Arc<Mutex<Store>> = Arc::default();
        let engine = engine(&store);
        let mut state = TrackedState::new();
        apply(&engine, &[decl("a", &[])], &mut state).unwrap();
        store.lock().unwrap().fail_delete = Some("a".to_string());
        store.lock().unwrap().calls.clear();

        let renamed = [decl("a", &[("name", "b")])];
        let report = apply(&engine, &renamed, &mut state).unwrap();

        assert_eq!(calls(&store), vec!["create b", "delete a"]);
        let err = report.into_result().unwrap_err();
        assert_eq!(err.address(), Some(&addr("a")));
        assert_eq!(err.phase(), Some(Phase::Delete));
        let tracked = state.get(&addr("a")).unwrap();
        assert_eq!(tracked.id, "b");
        assert_eq!(tracked.replaced_ids, vec!["a".to_string()]);

        store.lock().unwrap().fail_delete = None;
        store.lock().unwrap().calls.clear();
        let report = apply(&engine, &renamed, &mut state).unwrap();

        assert!(report.is_success());
        assert_eq!(report.summary.destroyed, 1);
        assert_eq!(calls(&store), vec!["delete a"]);
        assert!(state.get(&addr("a")).unwrap().replaced_ids.is_empty());
        let live: Vec<String> = store.lock().unwrap().objects.keys().cloned().collect();
        assert_eq!(live, vec!["b"]);

        store.lock().unwrap().calls.clear();
        let report = apply(&engine, &renamed, &mut state).unwrap();
        assert_eq!(report.summary.total_changes(), 0);
        assert!(calls(&store).is_empty());
    }

    #[test]
    fn test_replaced_object_gone_out_of_band_is_forgotten() {
        let store: Arc<Mutex<Store>> = Arc::default();
        let engine = engine(&store);
        let mut state = TrackedState::new();
        apply(&engine, &[decl("a", &[])], &mut state).unwrap();
        store.lock().unwrap().fail_delete = Some("a".to_string());
        let renamed = [decl("a", &[("name", "b")])];
        apply(&engine, &renamed, &mut state).unwrap();

        store.lock().unwrap().objects.remove("a");
        store.lock().unwrap().calls.clear();
        let plan = engine.plan(&renamed, &mut state).unwrap();

        assert!(plan.leftovers.is_empty());
        assert!(!plan.has_changes());
        assert!(state.get(&addr("a")).unwrap().replaced_ids.is_empty());
        assert!(calls(&store).is_empty());
    }

    #[test]
    fn test_orphan_sharing_a_tracked_id_is_released() {
        let store: Arc<Mutex<Store>> = Arc::default();
        let engine = engine(&store);
        let mut state = TrackedState::new();
        let both = [
            decl("first", &[("name", "shared")]),
            decl("second", &[("name", "shared")]),
        ];
        apply(&engine, &both, &mut state).unwrap();
        assert_eq!(state.get(&addr("second")).unwrap().id, "shared");
        store.lock().unwrap().calls.clear();

        let report = apply(&engine, &both[..1], &mut state).unwrap();

        assert!(report.is_success());
        assert_eq!(report.status(&addr("second")), Some(InstanceStatus::Destroyed));
        assert_eq!(report.summary.destroyed, 0);
        assert!(calls(&store).is_empty());
        assert!(store.lock().unwrap().objects.contains_key("shared"));
        assert!(state.get(&addr("second")).is_none());
        assert_eq!(state.get(&addr("first")).unwrap().id, "shared");

        let report = destroy_all(&engine, &mut state);
        assert_eq!(report.summary.destroyed, 1);
        assert_eq!(calls(&store), vec!["delete shared"]);
    }

    #[test]
    fn test_orphan_sharing_a_declared_id_is_released() {
        let store: Arc<Mutex<Store>> = Arc::default();
        let engine = engine(&store);
        let mut state = TrackedState::new();
        apply(&engine, &[decl("old", &[("name", "x")])], &mut state).unwrap();
        store.lock().unwrap().calls.clear();

        apply(&engine, &[decl("new", &[("name", "x")])], &mut state).unwrap();

        assert_eq!(calls(&store), vec!["create x"]);
        assert!(state.get(&addr("old")).is_none());
        assert_eq!(state.get(&addr("new")).unwrap().id, "x");
    }

    #[test]
    fn test_orphans_destroyed_before_creates() {
        let store: Arc<Mutex<Store>> = Arc::default();
        let engine = engine(&store);
        let mut state = TrackedState::new();
        apply(&engine, &[decl("old", &[])], &mut state).unwrap();
        store.lock().unwrap().calls.clear();

        apply(&engine, &[decl("new", &[])], &mut state).unwrap();

        assert_eq!(calls(&store), vec!["delete old", "create new"]);
        assert!(state.get(&addr("old")).is_none());
    }

    #[test]
    fn test_cycle_makes_no_calls() {
        let store: Arc<Mutex<Store>> = Arc::default();
        let engine = engine(&store);
        let decls = vec![
            decl("a", &[("parent", "${thing.b.name}")]),
            decl("b", &[("parent", "${thing.a.name}")]),
        ];

        let err = apply(&engine, &decls, &mut TrackedState::new()).unwrap_err();
        assert!(matches!(err, Error::CyclicDependency { .. }));
        assert!(calls(&store).is_empty());
    }

    #[test]
    fn test_dry_run_and_decline_make_no_calls() {
        let store: Arc<Mutex<Store>> = Arc::default();
        let engine = engine(&store);
        let mut state = TrackedState::new();

        let report = engine
            .apply(
                &parent_child(),
                &mut state,
                &ExecuteOptions { dry_run: true },
                &mut NoProgress,
                &mut AutoConfirm,
            )
            .unwrap();
        assert_eq!(report.summary.total(), 0);

        let report = engine
            .apply(
                &parent_child(),
                &mut state,
                &ExecuteOptions::default(),
                &mut NoProgress,
                &mut AutoDecline,
            )
            .unwrap();
        assert_eq!(report.summary.skipped, 2);

        assert!(calls(&store).is_empty());
        assert!(state.is_empty());
    }

    #[test]
    fn test_error_chain() {
        let err = Error::instance(&addr("a"), Phase::Delete, anyhow::anyhow!("gone wrong"));
        assert_eq!(error_chain(&err), "thing.a: delete failed: gone wrong");
    }
}
