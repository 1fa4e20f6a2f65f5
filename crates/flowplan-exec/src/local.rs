//! Local reference engine.
//!
//! Interprets a logical plan one operator at a time over fully materialized
//! relations. It is meant for checking results on small datasets, not for
//! throughput.

use std::collections::{BTreeSet, HashMap, HashSet};

use flowplan_core::id::NodeId;
use flowplan_core::storage::StorageAdapter;
use flowplan_core::types::{cmp_tuples, Tuple, Value};
use flowplan_operators::{
    ExpressionPlan, ForEach, Join, JoinType, Load, LogicalPlan, Operator, OperatorKind,
    OperatorType, Sort,
};
use tracing::{debug, debug_span, trace, warn};

use crate::engine::{ExecError, ExecutionEngine, JobHandle, PhysicalPlan, Stage};
use crate::eval::{eval, holds};
use crate::memory_storage::MemoryStorage;

#[derive(Debug, Clone, Default)]
pub struct LocalEngine {
    storage: MemoryStorage,
}

impl LocalEngine {
    pub fn new(storage: MemoryStorage) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &MemoryStorage {
        &self.storage
    }

    fn run_stage(&self, physical: &PhysicalPlan, stage: &Stage) -> Result<Vec<Tuple>, ExecError> {
        let plan = &physical.plan;
        let mut results: HashMap<NodeId, Vec<Tuple>> = HashMap::new();
        for id in &stage.operators {
            let op = plan.operator(*id)?;
            let inputs = plan
                .data_inputs(*id)
                .iter()
                .map(|p| {
                    results
                        .get(p)
                        .map(Vec::as_slice)
                        .ok_or_else(|| ExecError::Invalid(format!("input {p} of {id} not evaluated")))
                })
                .collect::<Result<Vec<_>, _>>()?;
            let out = self
                .eval_operator(physical, *id, op, &inputs)
                .map_err(|e| e.at(op.describe()))?;
            trace!(operator = %op.describe(), rows = out.len(), "evaluated");
            results.insert(*id, out);
        }
        results
            .remove(&stage.store)
            .ok_or_else(|| ExecError::Invalid(format!("store {} not evaluated", stage.store)))
    }

    fn eval_operator(
        &self,
        physical: &PhysicalPlan,
        id: NodeId,
        op: &Operator,
        inputs: &[&[Tuple]],
    ) -> Result<Vec<Tuple>, ExecError> {
        let first = || {
            inputs
                .first()
                .copied()
                .ok_or_else(|| ExecError::Invalid("missing input".into()))
        };
        match &op.kind {
            OperatorKind::Load(load) => self.load(load),
            OperatorKind::Store(store) => {
                let rows = first()?.to_vec();
                let mut adapter = self.storage.clone();
                adapter.set_location(&store.location)?;
                adapter.write(rows.clone())?;
                Ok(rows)
            }
            OperatorKind::Filter(f) => filter(first()?, &f.predicate),
            OperatorKind::SplitOutput(s) => filter(first()?, &s.condition),
            OperatorKind::Split => Ok(first()?.to_vec()),
            OperatorKind::ForEach(fe) => foreach(first()?, fe),
            OperatorKind::Join(j) => {
                let widths: Vec<Option<usize>> = physical
                    .plan
                    .predecessors(id)
                    .iter()
                    .map(|p| physical.widths.get(p).copied())
                    .collect();
                join(inputs, j, &widths)
            }
            OperatorKind::Cross => {
                let mut acc: Vec<Tuple> = vec![Vec::new()];
                for rel in inputs {
                    let mut next = Vec::with_capacity(acc.len() * rel.len());
                    for l in &acc {
                        for r in rel.iter() {
                            next.push(concat(l, r));
                        }
                    }
                    acc = next;
                }
                Ok(acc)
            }
            OperatorKind::Union(_) => Ok(inputs.iter().flat_map(|rel| rel.iter().cloned()).collect()),
            OperatorKind::Distinct => Ok(distinct(first()?)),
            OperatorKind::Sort(s) => sort(first()?, s),
            OperatorKind::Limit(n) => Ok(first()?
                .iter()
                .take(usize::try_from(*n).unwrap_or(usize::MAX))
                .cloned()
                .collect()),
        }
    }

    fn load(&self, load: &Load) -> Result<Vec<Tuple>, ExecError> {
        let mut adapter = self.storage.clone();
        adapter.set_location(&load.location)?;
        if let Some(schema) = &load.declared {
            adapter.check_schema(schema)?;
        }
        let mut rows = adapter.read()?;
        if let Some(required) = &load.required_map_keys {
            for row in &mut rows {
                for (column, keys) in required {
                    if let Some(Value::Map(m)) = row.get_mut(*column) {
                        m.retain(|k, _| keys.contains(k));
                    }
                }
            }
        }
        Ok(rows)
    }
}

fn concat(a: &[Value], b: &[Value]) -> Tuple {
    a.iter().chain(b).cloned().collect()
}

fn filter(rows: &[Tuple], predicate: &ExpressionPlan) -> Result<Vec<Tuple>, ExecError> {
    let mut out = Vec::new();
    for row in rows {
        if holds(predicate, &[row])? {
            out.push(row.clone());
        }
    }
    Ok(out)
}

/// Flattening a tuple splices its fields; flattening a bag emits one row per
/// element (none for an empty bag); other values are kept as they are.
fn foreach(rows: &[Tuple], fe: &ForEach) -> Result<Vec<Tuple>, ExecError> {
    let mut out = Vec::new();
    for row in rows {
        let mut partial: Vec<Tuple> = vec![Vec::with_capacity(fe.items.len())];
        for item in &fe.items {
            let v = eval(&item.expr, &[row])?;
            match (item.flatten, v) {
                (true, Value::Tuple(fields)) => {
                    for p in &mut partial {
                        p.extend(fields.iter().cloned());
                    }
                }
                (true, Value::Bag(elements)) => {
                    partial = partial
                        .iter()
                        .flat_map(|p| elements.iter().map(move |e| concat(p, e)))
                        .collect();
                }
                (_, v) => {
                    for p in &mut partial {
                        p.push(v.clone());
                    }
                }
            }
        }
        out.extend(partial);
    }
    Ok(out)
}

fn join_keys(
    keys: &[ExpressionPlan],
    input: usize,
    arity: usize,
    row: &[Value],
) -> Result<Vec<Value>, ExecError> {
    let empty: &[Value] = &[];
    let mut ctx = vec![empty; arity];
    ctx[input] = row;
    keys.iter().map(|k| eval(k, &ctx)).collect()
}

fn keys_match(a: &[Value], b: &[Value]) -> bool {
    !a.iter().chain(b).any(Value::is_null) && cmp_tuples(a, b).is_eq()
}

fn join(inputs: &[&[Tuple]], j: &Join, widths: &[Option<usize>]) -> Result<Vec<Tuple>, ExecError> {
    let arity = inputs.len();
    if j.keys.len() != arity {
        return Err(ExecError::Invalid(format!(
            "{} key lists for {arity} join inputs",
            j.keys.len()
        )));
    }
    let mut keyed: Vec<Vec<(Vec<Value>, &Tuple)>> = Vec::with_capacity(arity);
    for (i, rel) in inputs.iter().enumerate() {
        keyed.push(
            rel.iter()
                .map(|row| Ok((join_keys(&j.keys[i], i, arity, row)?, row)))
                .collect::<Result<Vec<_>, ExecError>>()?,
        );
    }

    if j.join_type == JoinType::Inner {
        let mut acc: Vec<(Vec<Value>, Tuple)> = keyed
            .first()
            .map(|rows| rows.iter().map(|(k, r)| (k.clone(), (*r).clone())).collect())
            .unwrap_or_default();
        for rel in keyed.iter().skip(1) {
            let mut next = Vec::new();
            for (k, l) in &acc {
                for (k2, r) in rel {
                    if keys_match(k, k2) {
                        next.push((k.clone(), concat(l, r)));
                    }
                }
            }
            acc = next;
        }
        return Ok(acc.into_iter().map(|(_, r)| r).collect());
    }

    let [left, right] = keyed.as_slice() else {
        return Err(ExecError::Invalid("outer joins take exactly two inputs".into()));
    };
    let width = |i: usize, rel: &[(Vec<Value>, &Tuple)]| {
        widths
            .get(i)
            .copied()
            .flatten()
            .or_else(|| rel.first().map(|(_, r)| r.len()))
            .unwrap_or(0)
    };
    let left_nulls = vec![Value::Null; width(0, left.as_slice())];
    let right_nulls = vec![Value::Null; width(1, right.as_slice())];
    let keep_left = matches!(j.join_type, JoinType::Left | JoinType::Full);
    let keep_right = matches!(j.join_type, JoinType::Right | JoinType::Full);

    let mut out = Vec::new();
    let mut right_matched = vec![false; right.len()];
    for (k, l) in left {
        let mut matched = false;
        for (idx, (k2, r)) in right.iter().enumerate() {
            if keys_match(k, k2) {
                matched = true;
                right_matched[idx] = true;
                out.push(concat(l, r));
            }
        }
        if !matched && keep_left {
            out.push(concat(l, &right_nulls));
        }
    }
    if keep_right {
        for ((_, r), matched) in right.iter().zip(&right_matched) {
            if !matched {
                out.push(concat(&left_nulls, r));
            }
        }
    }
    Ok(out)
}

/// First occurrence wins; output keeps input order.
fn distinct(rows: &[Tuple]) -> Vec<Tuple> {
    let mut seen: Vec<&Tuple> = Vec::new();
    let mut out = Vec::new();
    for row in rows {
        match seen.binary_search_by(|s| cmp_tuples(s, row)) {
            Ok(_) => {}
            Err(pos) => {
                seen.insert(pos, row);
                out.push(row.clone());
            }
        }
    }
    out
}

fn sort(rows: &[Tuple], s: &Sort) -> Result<Vec<Tuple>, ExecError> {
    let mut keyed = rows
        .iter()
        .map(|row| {
            let keys = s
                .keys
                .iter()
                .map(|k| eval(&k.expr, &[row]))
                .collect::<Result<Vec<_>, _>>()?;
            Ok((keys, row))
        })
        .collect::<Result<Vec<_>, ExecError>>()?;
    keyed.sort_by(|(a, _), (b, _)| {
        a.iter()
            .zip(b)
            .zip(&s.keys)
            .map(|((x, y), key)| {
                let ord = x.total_cmp(y);
                if key.ascending {
                    ord
                } else {
                    ord.reverse()
                }
            })
            .find(|o| o.is_ne())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    Ok(keyed.into_iter().map(|(_, r)| r.clone()).collect())
}

impl ExecutionEngine for LocalEngine {
    fn compile(&self, plan: &LogicalPlan) -> Result<PhysicalPlan, ExecError> {
        plan.validate()?;
        let mut plan = plan.clone();
        let order = plan.graph().topological_order()?;

        let mut widths = HashMap::new();
        for id in &order {
            if let Some(schema) = plan.schema(*id)? {
                widths.insert(*id, schema.len());
            }
        }

        let mut stores = Vec::new();
        for id in &order {
            if plan.op_type(*id)? == OperatorType::Store {
                stores.push(*id);
            }
        }
        let stage_of: HashMap<NodeId, usize> =
            stores.iter().enumerate().map(|(i, s)| (*s, i)).collect();

        let mut stages = Vec::with_capacity(stores.len());
        for store in &stores {
            let mut members = HashSet::new();
            let mut stack = vec![*store];
            while let Some(n) = stack.pop() {
                if members.insert(n) {
                    stack.extend(plan.data_inputs(n));
                }
            }
            let operators: Vec<NodeId> = order
                .iter()
                .filter(|n| members.contains(n))
                .copied()
                .collect();
            let mut depends_on: BTreeSet<usize> = BTreeSet::new();
            for n in &operators {
                if plan.op_type(*n)? == OperatorType::Load {
                    depends_on.extend(plan.predecessors(*n).iter().filter_map(|p| stage_of.get(p)));
                }
            }
            let location = plan
                .operator(*store)?
                .location()
                .map(str::to_string)
                .ok_or_else(|| ExecError::Invalid(format!("store {store} has no location")))?;
            stages.push(Stage {
                store: *store,
                location,
                operators,
                depends_on: depends_on.into_iter().collect(),
            });
        }
        debug!(stages = stages.len(), operators = plan.len(), "compiled plan");
        Ok(PhysicalPlan {
            plan,
            stages,
            widths,
        })
    }

    fn execute(&self, physical: &PhysicalPlan) -> Result<Vec<JobHandle>, ExecError> {
        let mut handles: Vec<JobHandle> = Vec::with_capacity(physical.stages.len());
        for stage in &physical.stages {
            let span = debug_span!("job", location = %stage.location);
            let _guard = span.enter();

            let blocked = stage
                .depends_on
                .iter()
                .filter_map(|d| handles.get(*d))
                .find(|h| !h.is_completed())
                .map(|h| h.location.clone());
            if let Some(upstream) = blocked {
                warn!(upstream = %upstream, "skipping job, upstream did not complete");
                handles.push(JobHandle::pending(
                    stage,
                    format!("upstream job for '{upstream}' did not complete"),
                ));
                continue;
            }

            match self.run_stage(physical, stage) {
                Ok(records) => {
                    debug!(records = records.len(), "job completed");
                    handles.push(JobHandle::completed(stage, records));
                }
                Err(e) => {
                    warn!(error = %e, "job failed, cleaning up output");
                    self.storage.cleanup_on_failure(&stage.location)?;
                    handles.push(JobHandle::failed(stage, e.to_string()));
                }
            }
        }
        Ok(handles)
    }
}
