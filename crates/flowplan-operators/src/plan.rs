//! The logical plan: an operator graph of relational operators plus the uid
//! generator that owns column identities for this plan.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

use flowplan_core::error::{Error, Result};
use flowplan_core::graph::OperatorGraph;
use flowplan_core::hash::{hash_str, Hash256};
use flowplan_core::id::{NodeId, Uid, UidGenerator};
use flowplan_core::schema::Schema;
use tracing::trace;

use crate::derive::derive_schema;
use crate::expression::ExpressionPlan;
use crate::operator::{Operator, OperatorKind, OperatorType};

#[derive(Debug, Clone, Default)]
pub struct LogicalPlan {
    graph: OperatorGraph<Operator>,
    uids: UidGenerator,
}

impl LogicalPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_uid_generator(uids: UidGenerator) -> Self {
        Self {
            graph: OperatorGraph::new(),
            uids,
        }
    }

    pub fn graph(&self) -> &OperatorGraph<Operator> {
        &self.graph
    }

    pub fn uid_generator(&self) -> &UidGenerator {
        &self.uids
    }

    pub fn next_uid(&mut self) -> Uid {
        self.uids.next_uid()
    }

    pub fn len(&self) -> usize {
        self.graph.len()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.is_empty()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.graph.contains(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.graph.ids()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Operator)> + '_ {
        self.graph.iter()
    }

    /// Add an operator, giving its declared and computed columns their uids.
    pub fn add(&mut self, mut op: Operator) -> NodeId {
        op.assign_uids(&mut self.uids);
        op.reset_schema();
        self.graph.add(op)
    }

    /// Remove an unconnected operator.
    pub fn remove(&mut self, id: NodeId) -> Result<Operator> {
        self.graph.remove(id)
    }

    pub fn operator(&self, id: NodeId) -> Result<&Operator> {
        self.graph.node(id)
    }

    /// Mutable access. The operator and everything downstream of it lose
    /// their memoized schemas.
    pub fn operator_mut(&mut self, id: NodeId) -> Result<&mut Operator> {
        if !self.graph.contains(id) {
            return Err(Error::UnknownNode(id));
        }
        self.invalidate(id);
        self.graph.node_mut(id)
    }

    pub fn op_type(&self, id: NodeId) -> Result<OperatorType> {
        Ok(self.operator(id)?.op_type())
    }

    pub fn predecessors(&self, id: NodeId) -> &[NodeId] {
        self.graph.predecessors(id)
    }

    pub fn successors(&self, id: NodeId) -> &[NodeId] {
        self.graph.successors(id)
    }

    pub fn sources(&self) -> Vec<NodeId> {
        self.graph.sources()
    }

    pub fn sinks(&self) -> Vec<NodeId> {
        self.graph.sinks()
    }

    /// Inputs whose rows flow into `id`. Edges into a Load are store/load
    /// ordering dependencies, not data.
    pub fn data_inputs(&self, id: NodeId) -> Vec<NodeId> {
        match self.graph.get(id).map(Operator::op_type) {
            Some(OperatorType::Load) | None => Vec::new(),
            Some(_) => self.graph.predecessors(id).to_vec(),
        }
    }

    /// Last operator (in insertion order) named `alias`.
    pub fn find_alias(&self, alias: &str) -> Option<NodeId> {
        self.graph
            .iter()
            .filter(|(_, op)| op.alias.as_deref() == Some(alias))
            .map(|(id, _)| id)
            .last()
    }

    pub fn connect(&mut self, from: NodeId, to: NodeId) -> Result<()> {
        self.check_connect(from, to)?;
        self.graph.connect(from, to)?;
        self.invalidate(to);
        Ok(())
    }

    pub fn connect_at(
        &mut self,
        from: NodeId,
        from_pos: usize,
        to: NodeId,
        to_pos: usize,
    ) -> Result<()> {
        self.check_connect(from, to)?;
        self.graph.connect_at(from, from_pos, to, to_pos)?;
        self.invalidate(to);
        Ok(())
    }

    pub fn disconnect(&mut self, from: NodeId, to: NodeId) -> Result<(usize, usize)> {
        let slots = self.graph.disconnect(from, to)?;
        self.invalidate(to);
        Ok(slots)
    }

    /// Splice the unconnected `node` into the edge `pred -> succ`.
    pub fn insert_between(&mut self, pred: NodeId, node: NodeId, succ: NodeId) -> Result<()> {
        self.graph.insert_between(pred, node, succ)?;
        self.invalidate(node);
        Ok(())
    }

    /// Remove a single-input operator, wiring its input to its outputs.
    pub fn remove_and_reconnect(&mut self, id: NodeId) -> Result<Operator> {
        let succs = self.graph.successors(id).to_vec();
        self.invalidate(id);
        let op = self.graph.remove_and_reconnect(id)?;
        for s in succs {
            self.invalidate(s);
        }
        Ok(op)
    }

    /// Detach a single-input operator from its position, wiring its input to
    /// its outputs. The operator stays in the plan, unconnected.
    pub fn splice_out(&mut self, id: NodeId) -> Result<()> {
        let succs = self.graph.successors(id).to_vec();
        self.invalidate(id);
        self.graph.splice_out(id)?;
        for s in succs {
            self.invalidate(s);
        }
        Ok(())
    }

    fn check_connect(&self, from: NodeId, to: NodeId) -> Result<()> {
        let from_op = self.operator(from)?;
        let to_op = self.operator(to)?;
        match (from_op.op_type(), to_op.op_type()) {
            (OperatorType::Store, OperatorType::Load) => Ok(()),
            (_, OperatorType::Load) => Err(Error::Plan(format!(
                "{} cannot feed {}: loads only depend on stores",
                from_op.describe(),
                to_op.describe()
            ))),
            (OperatorType::Store, _) => Err(Error::Plan(format!(
                "{} has no data output for {}",
                from_op.describe(),
                to_op.describe()
            ))),
            (_, t) if !t.allows_multiple_inputs() && !self.graph.predecessors(to).is_empty() => {
                Err(Error::Plan(format!(
                    "{} accepts a single input",
                    to_op.describe()
                )))
            }
            _ => Ok(()),
        }
    }

    /// Drop memoized schemas of `id` and everything downstream.
    pub fn invalidate(&mut self, id: NodeId) {
        for n in self.graph.descendants(id) {
            if let Some(op) = self.graph.get_mut(n) {
                op.reset_schema();
            }
        }
    }

    pub fn invalidate_all(&mut self) {
        let ids: Vec<NodeId> = self.graph.ids().collect();
        for id in ids {
            if let Some(op) = self.graph.get_mut(id) {
                op.reset_schema();
            }
        }
    }

    /// Output schema of `id`, derived on first request and memoized.
    ///
    /// Upstream schemas that are not yet known are derived first, in
    /// dependency order, with an explicit work stack.
    pub fn schema(&mut self, id: NodeId) -> Result<Option<Schema>> {
        let op = self.graph.node(id)?;
        if op.is_schema_computed() {
            return Ok(op.schema.clone());
        }
        for n in self.pending_schemas(id)? {
            self.derive_one(n)?;
        }
        Ok(self.graph.node(id)?.schema.clone())
    }

    /// Post-order over the not-yet-derived data ancestors of `id`, ending with `id`.
    fn pending_schemas(&self, id: NodeId) -> Result<Vec<NodeId>> {
        let mut order = Vec::new();
        let mut entered = HashSet::new();
        let mut stack = vec![(id, false)];
        while let Some((n, finished)) = stack.pop() {
            if finished {
                order.push(n);
                continue;
            }
            if !entered.insert(n) {
                continue;
            }
            stack.push((n, true));
            for p in self.data_inputs(n).into_iter().rev() {
                if !entered.contains(&p) && !self.graph.node(p)?.is_schema_computed() {
                    stack.push((p, false));
                }
            }
        }
        Ok(order)
    }

    fn derive_one(&mut self, id: NodeId) -> Result<()> {
        let preds = self.data_inputs(id);
        let mut inputs = Vec::with_capacity(preds.len());
        let mut aliases = Vec::with_capacity(preds.len());
        for p in &preds {
            let input = self.graph.node(*p)?;
            if !input.is_schema_computed() {
                return Err(Error::Invariant(format!(
                    "schema of {p} needed by {id} is not derived (cycle?)"
                )));
            }
            inputs.push(input.schema.clone());
            aliases.push(input.alias.clone());
        }
        let op = self.graph.node_mut(id)?;
        let schema = derive_schema(op, &inputs, &aliases, &mut self.uids)?;
        trace!(node = %id, operator = %op.describe(), known = schema.is_some(), "derived schema");
        op.schema = schema;
        op.schema_computed = true;
        Ok(())
    }

    /// Derive every schema in topological order.
    pub fn resolve_schemas(&mut self) -> Result<()> {
        for id in self.graph.topological_order()? {
            self.schema(id)?;
        }
        Ok(())
    }

    /// Schemas of the data inputs of `id`, in input order.
    pub fn input_schemas(&mut self, id: NodeId) -> Result<Vec<Option<Schema>>> {
        self.data_inputs(id)
            .into_iter()
            .map(|p| self.schema(p))
            .collect()
    }

    /// Uid of `$column` of input `input` as seen by `owner`.
    pub fn projected_uid(&mut self, owner: NodeId, input: usize, column: usize) -> Result<Option<Uid>> {
        let Some(&pred) = self.data_inputs(owner).get(input) else {
            return Ok(None);
        };
        Ok(self
            .schema(pred)?
            .and_then(|s| s.field(column).map(|f| f.uid)))
    }

    /// Uids read by `expr` when evaluated inside `owner`; `None` if any of
    /// them cannot be resolved.
    pub fn expression_uids(
        &mut self,
        owner: NodeId,
        expr: &ExpressionPlan,
    ) -> Result<Option<BTreeSet<Uid>>> {
        let mut out = BTreeSet::new();
        for (input, column) in expr.projections() {
            match self.projected_uid(owner, input, column)? {
                Some(uid) => {
                    out.insert(uid);
                }
                None => return Ok(None),
            }
        }
        Ok(Some(out))
    }

    /// Structural checks: edge bookkeeping, acyclicity, input arity,
    /// store/load edges and expression sub-plans.
    pub fn validate(&self) -> Result<()> {
        self.graph.check_consistency()?;
        self.graph.topological_order()?;
        for (id, op) in self.graph.iter() {
            let t = op.op_type();
            let preds = self.graph.predecessors(id);
            if t == OperatorType::Load {
                for p in preds {
                    if self.op_type(*p)? != OperatorType::Store {
                        return Err(Error::Plan(format!(
                            "{} depends on a non-store operator {p}",
                            op.describe()
                        )));
                    }
                }
                continue;
            }
            if preds.len() < t.min_inputs() {
                return Err(Error::MissingInput {
                    operator: op.describe(),
                    position: preds.len(),
                });
            }
            if preds.len() > 1 && !t.allows_multiple_inputs() {
                return Err(Error::Plan(format!(
                    "{} has {} inputs but accepts one",
                    op.describe(),
                    preds.len()
                )));
            }
            if t == OperatorType::Store {
                for s in self.graph.successors(id) {
                    if self.op_type(*s)? != OperatorType::Load {
                        return Err(Error::Plan(format!(
                            "{} feeds non-load operator {s}",
                            op.describe()
                        )));
                    }
                }
            }
            if let OperatorKind::Join(j) = &op.kind {
                if j.keys.len() != preds.len() {
                    return Err(Error::Plan(format!(
                        "{} has key lists for {} inputs but {} inputs",
                        op.describe(),
                        j.keys.len(),
                        preds.len()
                    )));
                }
            }
            for expr in op.expressions() {
                expr.validate()?;
                if let Some((input, _)) = expr.projections().iter().find(|(i, _)| *i >= preds.len()) {
                    return Err(Error::Plan(format!(
                        "{} reads input #{input} but has {} inputs",
                        op.describe(),
                        preds.len()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Equal operators in the same positional topology.
    pub fn is_equal(&self, other: &LogicalPlan) -> bool {
        self.graph.is_equal(&other.graph)
    }

    /// Deep copy with fresh node keys plus the old -> new key map. The copy
    /// continues the same uid space.
    pub fn clone_with_map(&self) -> Result<(LogicalPlan, HashMap<NodeId, NodeId>)> {
        let (graph, map) = self.graph.clone_with_map()?;
        Ok((
            LogicalPlan {
                graph,
                uids: self.uids.clone(),
            },
            map,
        ))
    }

    /// Content hash of the plan's canonical text, independent of node keys.
    pub fn fingerprint(&self) -> Result<Hash256> {
        Ok(hash_str(&self.canonical_text()?))
    }

    fn canonical_text(&self) -> Result<String> {
        let order = self.graph.topological_order()?;
        let index: HashMap<NodeId, usize> = order.iter().enumerate().map(|(i, n)| (*n, i)).collect();
        let mut out = String::new();
        for (i, id) in order.iter().enumerate() {
            let inputs: Vec<String> = self
                .graph
                .predecessors(*id)
                .iter()
                .map(|p| index[p].to_string())
                .collect();
            out.push_str(&format!(
                "{i}: {} <- [{}]\n",
                self.graph.node(*id)?,
                inputs.join(",")
            ));
        }
        Ok(out)
    }
}

impl fmt::Display for LogicalPlan {
    /// One operator per line in topological order, inputs by line number.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.canonical_text() {
            Ok(s) => f.write_str(&s),
            Err(e) => write!(f, "<invalid plan: {e}>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::Expr;
    use crate::operator::{GenerateItem, JoinType};
    use flowplan_core::schema::{DataType, FieldSchema};

    fn ab_schema() -> Schema {
        Schema::new(vec![
            FieldSchema::new("x", DataType::Int),
            FieldSchema::new("y", DataType::CharArray),
        ])
    }

    fn filter(e: Expr) -> Operator {
        Operator::filter(ExpressionPlan::from_expr(&e).unwrap())
    }

    #[test]
    fn load_filter_store_schema_passes_through() {
        let mut plan = LogicalPlan::new();
        let a = plan.add(Operator::load("a", Some(ab_schema())).with_alias("A"));
        let f = plan.add(filter(Expr::col(0).gt(Expr::lit(1))).with_alias("B"));
        let s = plan.add(Operator::store("out"));
        plan.connect(a, f).unwrap();
        plan.connect(f, s).unwrap();
        plan.validate().unwrap();

        let load_schema = plan.schema(a).unwrap().unwrap();
        let store_schema = plan.schema(s).unwrap().unwrap();
        assert_eq!(load_schema, store_schema);
        assert_eq!(load_schema.uids(), vec![Uid::new(1), Uid::new(2)]);
        assert!(plan.operator(f).unwrap().is_schema_computed());
    }

    #[test]
    fn long_filter_chain_derives_schema_without_recursion() {
        let mut plan = LogicalPlan::new();
        let mut last = plan.add(Operator::load("a", Some(ab_schema())));
        for _ in 0..20_000 {
            let f = plan.add(filter(Expr::col(0).gt(Expr::lit(1))));
            plan.connect(last, f).unwrap();
            last = f;
        }
        let out = plan.schema(last).unwrap().unwrap();
        assert_eq!(out.uids(), vec![Uid::new(1), Uid::new(2)]);
        plan.resolve_schemas().unwrap();
        plan.validate().unwrap();
    }

    #[test]
    fn foreach_tolerates_equal_aliases_from_flattening_only() {
        let bag = FieldSchema::new("b", DataType::Bag)
            .with_nested(Schema::new(vec![FieldSchema::new("x", DataType::Int)]));
        let project = |i| ExpressionPlan::from_expr(&Expr::col(i)).unwrap();

        let mut plan = LogicalPlan::new();
        let a = plan.add(Operator::load("a", Some(Schema::new(vec![bag]))));
        let twice = plan.add(Operator::foreach(vec![
            GenerateItem::new(project(0)).flattened(),
            GenerateItem::new(project(0)).flattened(),
        ]));
        plan.connect(a, twice).unwrap();
        let out = plan.schema(twice).unwrap().unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out.fields[0].alias.as_deref(), Some("b::x"));
        assert_eq!(out.fields[1].alias.as_deref(), Some("b::x"));

        let mixed = plan.add(Operator::foreach(vec![
            GenerateItem::new(project(0)).flattened(),
            GenerateItem::new(ExpressionPlan::from_expr(&Expr::lit(1)).unwrap()).with_alias("b::x"),
        ]));
        plan.connect(a, mixed).unwrap();
        assert!(matches!(
            plan.schema(mixed),
            Err(Error::DuplicateSchemaAlias { .. })
        ));
    }

    #[test]
    fn single_input_operators_reject_a_second_input() {
        let mut plan = LogicalPlan::new();
        let a = plan.add(Operator::load("a", None));
        let b = plan.add(Operator::load("b", None));
        let f = plan.add(filter(Expr::lit(true)));
        plan.connect(a, f).unwrap();
        assert!(plan.connect(b, f).is_err());
        assert!(plan.connect(f, a).is_err());
    }

    #[test]
    fn connect_invalidates_downstream_schemas() {
        let mut plan = LogicalPlan::new();
        let a = plan.add(Operator::load("a", Some(ab_schema())));
        let b = plan.add(Operator::load("b", None));
        let f = plan.add(filter(Expr::lit(true)));
        plan.connect(a, f).unwrap();
        assert!(plan.schema(f).unwrap().is_some());

        plan.disconnect(a, f).unwrap();
        assert!(!plan.operator(f).unwrap().is_schema_computed());
        plan.connect(b, f).unwrap();
        assert!(plan.schema(f).unwrap().is_none());
    }

    #[test]
    fn union_schema_is_merged_and_keeps_its_uids() {
        let mut plan = LogicalPlan::new();
        let a = plan.add(Operator::load("a", Some(ab_schema())));
        let b = plan.add(Operator::load("b", Some(ab_schema())));
        let u = plan.add(Operator::union());
        plan.connect(a, u).unwrap();
        plan.connect(b, u).unwrap();

        let s1 = plan.schema(u).unwrap().unwrap();
        let a_uids = plan.schema(a).unwrap().unwrap().uids();
        let b_uids = plan.schema(b).unwrap().unwrap().uids();
        assert!(s1.uids().iter().all(|u| !a_uids.contains(u) && !b_uids.contains(u)));
        assert_eq!(s1.fields[0].parents, vec![a_uids[0], b_uids[0]]);

        plan.invalidate_all();
        let s2 = plan.schema(u).unwrap().unwrap();
        assert_eq!(s1.uids(), s2.uids());
    }

    #[test]
    fn union_with_unknown_input_is_unknown() {
        let mut plan = LogicalPlan::new();
        let a = plan.add(Operator::load("a", Some(ab_schema())));
        let b = plan.add(Operator::load("b", None));
        let u = plan.add(Operator::union());
        plan.connect(a, u).unwrap();
        plan.connect(b, u).unwrap();
        assert!(plan.schema(u).unwrap().is_none());
    }

    #[test]
    fn cross_prefixes_aliased_inputs() {
        let mut plan = LogicalPlan::new();
        let a = plan.add(
            Operator::load(
                "a",
                Some(Schema::new(vec![FieldSchema::new("x", DataType::Int)])),
            )
            .with_alias("A"),
        );
        let b = plan.add(
            Operator::load(
                "b",
                Some(Schema::new(vec![FieldSchema::new("x", DataType::Int)])),
            )
            .with_alias("B"),
        );
        let c = plan.add(Operator::cross());
        plan.connect(a, c).unwrap();
        plan.connect(b, c).unwrap();
        let schema = plan.schema(c).unwrap().unwrap();
        let names: Vec<&str> = schema.fields.iter().map(|f| f.alias_or_empty()).collect();
        assert_eq!(names, vec!["A::x", "B::x"]);
        assert_eq!(schema.index_of("A::x"), Some(0));
        assert_eq!(schema.index_of("x"), None);
    }

    #[test]
    fn self_cross_with_same_alias_is_a_duplicate() {
        let mut plan = LogicalPlan::new();
        let a = plan.add(Operator::load("a", Some(ab_schema())).with_alias("A"));
        let f = plan.add(filter(Expr::lit(true)).with_alias("A"));
        let c = plan.add(Operator::cross());
        plan.connect(a, f).unwrap();
        plan.connect(a, c).unwrap();
        plan.connect(f, c).unwrap();
        let err = plan.schema(c).unwrap_err();
        assert!(matches!(err, Error::DuplicateSchemaAlias { .. }));
    }

    #[test]
    fn foreach_keeps_projected_uids_and_types_computed_columns() {
        let mut plan = LogicalPlan::new();
        let a = plan.add(Operator::load("a", Some(ab_schema())));
        let items = vec![
            GenerateItem::new(ExpressionPlan::from_expr(&Expr::col(1)).unwrap()),
            GenerateItem::new(
                ExpressionPlan::from_expr(&Expr::col(0).arith(
                    crate::expression::ArithOp::Add,
                    Expr::lit(1),
                ))
                .unwrap(),
            )
            .with_alias("x1"),
        ];
        let fe = plan.add(Operator::foreach(items));
        plan.connect(a, fe).unwrap();
        let input = plan.schema(a).unwrap().unwrap();
        let out = plan.schema(fe).unwrap().unwrap();
        assert_eq!(out.fields[0].uid, input.fields[1].uid);
        assert_eq!(out.fields[0].alias.as_deref(), Some("y"));
        assert_eq!(out.fields[1].data_type, DataType::Int);
        assert_eq!(out.fields[1].parents, vec![input.fields[0].uid]);
        assert!(!input.uids().contains(&out.fields[1].uid));
    }

    #[test]
    fn foreach_flatten_of_tuple_expands_nested_fields() {
        let inner = Schema::new(vec![
            FieldSchema::new("p", DataType::Int),
            FieldSchema::new("q", DataType::Int),
        ]);
        let schema = Schema::new(vec![
            FieldSchema::new("t", DataType::Tuple).with_nested(inner),
            FieldSchema::new("z", DataType::Int),
        ]);
        let mut plan = LogicalPlan::new();
        let a = plan.add(Operator::load("a", Some(schema)));
        let fe = plan.add(Operator::foreach(vec![GenerateItem::new(
            ExpressionPlan::from_expr(&Expr::col(0)).unwrap(),
        )
        .flattened()]));
        plan.connect(a, fe).unwrap();
        let input = plan.schema(a).unwrap().unwrap();
        let out = plan.schema(fe).unwrap().unwrap();
        let names: Vec<&str> = out.fields.iter().map(|f| f.alias_or_empty()).collect();
        assert_eq!(names, vec!["t::p", "t::q"]);
        assert_eq!(out.fields[0].parents, vec![input.fields[0].uid]);
    }

    #[test]
    fn foreach_duplicate_output_aliases_are_rejected() {
        let mut plan = LogicalPlan::new();
        let a = plan.add(Operator::load("a", Some(ab_schema())));
        let fe = plan.add(Operator::foreach(vec![
            GenerateItem::new(ExpressionPlan::from_expr(&Expr::col(0)).unwrap()),
            GenerateItem::new(ExpressionPlan::from_expr(&Expr::col(1)).unwrap()).with_alias("x"),
        ]));
        plan.connect(a, fe).unwrap();
        assert!(matches!(
            plan.schema(fe),
            Err(Error::DuplicateSchemaAlias { .. })
        ));
    }

    #[test]
    fn validate_reports_missing_join_input() {
        let mut plan = LogicalPlan::new();
        let a = plan.add(Operator::load("a", Some(ab_schema())));
        let j = plan.add(Operator::join(
            JoinType::Inner,
            vec![vec![ExpressionPlan::from_expr(&Expr::col(0)).unwrap()]],
        ));
        plan.connect(a, j).unwrap();
        assert!(matches!(plan.validate(), Err(Error::MissingInput { .. })));
    }

    #[test]
    fn clone_is_equal_and_independent() {
        let mut plan = LogicalPlan::new();
        let a = plan.add(Operator::load("a", Some(ab_schema())).with_alias("A"));
        let f = plan.add(filter(Expr::col(0).gt(Expr::lit(1))));
        plan.connect(a, f).unwrap();
        let (mut copy, map) = plan.clone_with_map().unwrap();
        assert!(plan.is_equal(&copy));
        assert_eq!(plan.fingerprint().unwrap(), copy.fingerprint().unwrap());

        let extra = copy.add(Operator::store("out"));
        copy.connect(map[&f], extra).unwrap();
        assert!(!plan.is_equal(&copy));
        assert_eq!(plan.len(), 2);
    }
}
