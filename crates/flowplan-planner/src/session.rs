//! Planning sessions.
//!
//! A session accumulates statements into one plan, keeps the alias table,
//! resolves locations to absolute form as statements are registered and, once
//! per batch, adds Store -> Load ordering edges for loads that read what a
//! store in the same batch writes.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use flowplan_core::error::{Error, Result};
use flowplan_core::id::NodeId;
use flowplan_core::storage::{LocationResolver, PathResolver};
use flowplan_operators::{LogicalPlan, OperatorKind};
use tracing::{debug, info};
use uuid::Uuid;

use crate::builder::PlanBuilder;
use crate::dsl::yaml::Statement;

/// Correlates log events of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub struct Session {
    id: SessionId,
    builder: PlanBuilder,
    resolver: Arc<dyn LocationResolver + Send + Sync>,
    current_dir: String,
    stores: Vec<NodeId>,
    compiled: bool,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("current_dir", &self.current_dir)
            .field("operators", &self.builder.plan().len())
            .field("compiled", &self.compiled)
            .finish()
    }
}

impl Session {
    /// Session resolving relative locations against `current_dir`.
    pub fn new(current_dir: impl Into<String>) -> Self {
        Self {
            id: SessionId::new(),
            builder: PlanBuilder::new(),
            resolver: Arc::new(PathResolver),
            current_dir: current_dir.into(),
            stores: Vec::new(),
            compiled: false,
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn LocationResolver + Send + Sync>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn current_dir(&self) -> &str {
        &self.current_dir
    }

    pub fn plan(&self) -> &LogicalPlan {
        self.builder.plan()
    }

    /// Callers that rewrite the plan should follow up with `refresh_aliases`.
    pub fn plan_mut(&mut self) -> &mut LogicalPlan {
        self.builder.plan_mut()
    }

    /// Drop or rebind aliases and stores whose operators no longer exist.
    pub fn refresh_aliases(&mut self) -> usize {
        let changed = self.builder.refresh_aliases();
        let plan = self.builder.plan();
        self.stores.retain(|s| plan.contains(*s));
        if changed > 0 {
            debug!(session = %self.id, changed, "refreshed alias table");
        }
        changed
    }

    pub fn into_plan(self) -> LogicalPlan {
        self.builder.into_plan()
    }

    pub fn builder(&self) -> &PlanBuilder {
        &self.builder
    }

    pub fn node(&self, alias: &str) -> Result<NodeId> {
        self.builder.node(alias)
    }

    pub fn stores(&self) -> &[NodeId] {
        &self.stores
    }

    pub fn is_compiled(&self) -> bool {
        self.compiled
    }

    fn absolute(&self, location: &str) -> Result<String> {
        self.resolver
            .relative_to_absolute_path(location, &self.current_dir)
    }

    /// Add one statement. Returns the operators it created.
    pub fn register(&mut self, stmt: &Statement) -> Result<Vec<NodeId>> {
        self.compiled = false;
        let ids = match stmt {
            Statement::Load {
                alias,
                path,
                schema,
            } => {
                let location = self.absolute(path)?;
                let schema = match schema {
                    Some(fields) => Some(crate::dsl::yaml::to_schema(fields)?),
                    None => None,
                };
                vec![self.builder.load(alias, &location, schema)?]
            }
            Statement::Store { input, path } => {
                let location = self.absolute(path)?;
                let id = self.builder.store(input, &location)?;
                self.stores.push(id);
                vec![id]
            }
            other => crate::dsl::yaml::apply(&mut self.builder, other)?,
        };
        debug!(session = %self.id, created = ids.len(), "registered statement");
        Ok(ids)
    }

    /// Finish the current batch: add Store -> Load edges for every load that
    /// reads a location a store writes, unless the load already reaches that
    /// store (which would close a cycle). Returns the number of edges added.
    pub fn compile_batch(&mut self) -> Result<usize> {
        let plan = self.builder.plan_mut();
        let mut loads = Vec::new();
        let mut stores = Vec::new();
        for (id, op) in plan.iter() {
            match &op.kind {
                OperatorKind::Load(l) => loads.push((id, l.location.clone())),
                OperatorKind::Store(s) => stores.push((id, s.location.clone())),
                _ => {}
            }
        }

        let mut added = 0;
        for (load, load_path) in &loads {
            for (store, store_path) in &stores {
                if load_path != store_path || plan.graph().is_connected(*store, *load) {
                    continue;
                }
                if plan.graph().path_exists(*load, *store) {
                    debug!(load = %load, store = %store, "skipping dependency that would close a cycle");
                    continue;
                }
                plan.connect(*store, *load)?;
                added += 1;
            }
        }
        self.compiled = true;
        info!(session = %self.id, dependencies = added, "compiled batch");
        Ok(added)
    }

    /// Independent deep copy with a fresh session id and the alias table
    /// remapped onto the copied operators.
    pub fn snapshot(&self) -> Result<Session> {
        let (plan, map) = self.builder.plan().clone_with_map()?;
        let aliases = remap(&self.builder.live_aliases(), &map)?;
        let stores = self
            .stores
            .iter()
            .map(|s| map.get(s).copied().ok_or(Error::UnknownNode(*s)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Session {
            id: SessionId::new(),
            builder: PlanBuilder::from_parts(plan, aliases),
            resolver: Arc::clone(&self.resolver),
            current_dir: self.current_dir.clone(),
            stores,
            compiled: self.compiled,
        })
    }

    /// Copy of the sub-plan `alias` depends on: the aliased operator and its
    /// ancestors, including stores it waits on.
    pub fn plan_for_alias(&self, alias: &str) -> Result<LogicalPlan> {
        let target = self.node(alias)?;
        let (mut plan, map) = self.builder.plan().clone_with_map()?;
        let target = *map.get(&target).ok_or(Error::UnknownNode(target))?;
        let keep: HashSet<NodeId> = plan.graph().ancestors(target).into_iter().collect();

        for id in plan.graph().reverse_topological_order()? {
            if keep.contains(&id) {
                continue;
            }
            for p in plan.predecessors(id).to_vec() {
                plan.disconnect(p, id)?;
            }
            for s in plan.successors(id).to_vec() {
                plan.disconnect(id, s)?;
            }
            plan.remove(id)?;
        }
        Ok(plan)
    }

    /// Whether `alias` feeds a Store somewhere in the plan.
    pub fn is_stored(&self, alias: &str) -> Result<bool> {
        let id = self.node(alias)?;
        let plan = self.builder.plan();
        Ok(self.stores.iter().any(|s| plan.graph().path_exists(id, *s)))
    }
}

fn remap(
    aliases: &HashMap<String, NodeId>,
    map: &HashMap<NodeId, NodeId>,
) -> Result<HashMap<String, NodeId>> {
    aliases
        .iter()
        .map(|(a, id)| {
            map.get(id)
                .map(|n| (a.clone(), *n))
                .ok_or(Error::UnknownNode(*id))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowplan_core::schema::{DataType, FieldSchema, Schema};
    use flowplan_operators::{Expr, OperatorType};

    fn ints(names: &[&str]) -> Schema {
        Schema::new(
            names
                .iter()
                .map(|n| FieldSchema::new(*n, DataType::Int))
                .collect(),
        )
    }

    fn load(alias: &str, path: &str) -> Statement {
        Statement::Load {
            alias: alias.into(),
            path: path.into(),
            schema: None,
        }
    }

    fn store(input: &str, path: &str) -> Statement {
        Statement::Store {
            input: input.into(),
            path: path.into(),
        }
    }

    #[test]
    fn store_then_load_of_same_location_adds_dependency() {
        let mut s = Session::new("/work");
        s.register(&load("a", "in")).unwrap();
        s.register(&store("a", "tmp/x")).unwrap();
        s.register(&load("b", "/work/tmp/./x")).unwrap();
        s.register(&store("b", "out")).unwrap();

        assert_eq!(s.compile_batch().unwrap(), 1);
        assert!(s.is_compiled());
        let b = s.node("b").unwrap();
        let preds = s.plan().predecessors(b).to_vec();
        assert_eq!(preds.len(), 1);
        assert_eq!(s.plan().op_type(preds[0]).unwrap(), OperatorType::Store);
        s.plan().validate().unwrap();

        // idempotent
        assert_eq!(s.compile_batch().unwrap(), 0);
    }

    #[test]
    fn dependency_that_would_close_a_cycle_is_skipped() {
        let mut s = Session::new("/work");
        s.register(&load("a", "loop")).unwrap();
        s.register(&store("a", "loop")).unwrap();
        assert_eq!(s.compile_batch().unwrap(), 0);
        assert!(!s.plan().graph().has_cycle());
    }

    #[test]
    fn snapshot_is_independent() {
        let mut s = Session::new("/work");
        s.builder
            .load("a", "/in", Some(ints(&["x"])))
            .unwrap();
        let snap = s.snapshot().unwrap();
        assert_ne!(snap.id(), s.id());

        s.builder
            .filter("f", "a", Expr::named("x").gt(Expr::lit(1)))
            .unwrap();
        assert_eq!(s.plan().len(), 2);
        assert_eq!(snap.plan().len(), 1);
        let a = snap.node("a").unwrap();
        assert!(snap.plan().contains(a));
    }

    #[test]
    fn plan_for_alias_keeps_only_ancestors() {
        let mut s = Session::new("/work");
        s.builder.load("a", "/in", Some(ints(&["x"]))).unwrap();
        s.builder
            .filter("f", "a", Expr::named("x").gt(Expr::lit(1)))
            .unwrap();
        s.builder
            .filter("g", "a", Expr::named("x").lt(Expr::lit(0)))
            .unwrap();
        s.register(&store("g", "out")).unwrap();

        let sub = s.plan_for_alias("f").unwrap();
        assert_eq!(sub.len(), 2);
        sub.validate().unwrap();
        assert_eq!(s.plan().len(), 4);
        assert!(s.is_stored("g").unwrap());
        assert!(!s.is_stored("f").unwrap());
    }

    #[test]
    fn aliases_follow_operators_merged_away() {
        let mut s = Session::new("/work");
        s.builder.load("a", "/in", Some(ints(&["x"]))).unwrap();
        let upper = s
            .builder
            .filter("b", "a", Expr::named("x").gt(Expr::lit(1)))
            .unwrap();
        let lower = s
            .builder
            .filter("c", "b", Expr::named("x").lt(Expr::lit(9)))
            .unwrap();
        s.register(&store("c", "out")).unwrap();

        // rewrite the way filter merging does: drop the lower filter, the
        // upper one takes over its alias
        s.plan_mut().remove_and_reconnect(lower).unwrap();
        s.plan_mut().operator_mut(upper).unwrap().alias = Some("c".into());

        assert_eq!(s.node("c").unwrap(), upper);
        let sub = s.plan_for_alias("c").unwrap();
        assert_eq!(sub.len(), 2);
        assert!(s.snapshot().is_ok());

        assert_eq!(s.refresh_aliases(), 1);
        assert_eq!(s.builder().aliases().get("c"), Some(&upper));
        assert_eq!(s.refresh_aliases(), 0);
        assert!(s.is_stored("c").unwrap());
    }
}
