//! Programmatic plan construction with alias-based column resolution.

use std::collections::HashMap;

use flowplan_core::error::{Error, Result};
use flowplan_core::id::NodeId;
use flowplan_core::schema::Schema;
use flowplan_operators::{
    Expr, ExpressionPlan, GenerateItem, JoinType, LogicalPlan, Operator, SortKey,
};

/// One `GENERATE` item before resolution.
#[derive(Debug, Clone)]
pub struct ItemSpec {
    pub expr: Expr,
    pub flatten: bool,
    pub alias: Option<String>,
}

impl ItemSpec {
    pub fn new(expr: Expr) -> Self {
        Self {
            expr,
            flatten: false,
            alias: None,
        }
    }

    pub fn flattened(mut self) -> Self {
        self.flatten = true;
        self
    }

    pub fn named(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }
}

/// Builds a `LogicalPlan` statement by statement. Every statement names its
/// inputs by alias; re-using an alias rebinds it to the newest operator.
#[derive(Debug, Clone, Default)]
pub struct PlanBuilder {
    plan: LogicalPlan,
    aliases: HashMap<String, NodeId>,
}

impl PlanBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_parts(plan: LogicalPlan, aliases: HashMap<String, NodeId>) -> Self {
        Self { plan, aliases }
    }

    pub fn plan(&self) -> &LogicalPlan {
        &self.plan
    }

    pub fn plan_mut(&mut self) -> &mut LogicalPlan {
        &mut self.plan
    }

    pub fn into_plan(self) -> LogicalPlan {
        self.plan
    }

    pub fn aliases(&self) -> &HashMap<String, NodeId> {
        &self.aliases
    }

    /// Operator currently bound to `alias`.
    pub fn node(&self, alias: &str) -> Result<NodeId> {
        self.lookup(alias, "script")
    }

    /// A binding whose operator was rewritten away falls back to the operator
    /// now carrying the alias.
    fn lookup(&self, alias: &str, operator: &str) -> Result<NodeId> {
        let unknown = || Error::UnknownAlias {
            alias: alias.to_string(),
            operator: operator.to_string(),
        };
        match self.aliases.get(alias) {
            Some(id) if self.plan.contains(*id) => Ok(*id),
            Some(_) => self.plan.find_alias(alias).ok_or_else(unknown),
            None => Err(unknown()),
        }
    }

    /// The alias table with stale bindings re-resolved against the plan;
    /// aliases no operator carries any more are left out.
    pub fn live_aliases(&self) -> HashMap<String, NodeId> {
        self.aliases
            .iter()
            .filter_map(|(alias, id)| {
                if self.plan.contains(*id) {
                    Some((alias.clone(), *id))
                } else {
                    self.plan.find_alias(alias).map(|n| (alias.clone(), n))
                }
            })
            .collect()
    }

    /// Rebind aliases after the plan was rewritten in place (for example by
    /// the optimizer). Returns how many bindings changed or were dropped.
    pub fn refresh_aliases(&mut self) -> usize {
        let live = self.live_aliases();
        let changed = self
            .aliases
            .iter()
            .filter(|(alias, id)| live.get(*alias) != Some(*id))
            .count();
        self.aliases = live;
        changed
    }

    fn bind(&mut self, alias: &str, id: NodeId) {
        self.aliases.insert(alias.to_string(), id);
    }

    /// Resolve `expr` against the schemas of `inputs` and build its plan.
    fn compile(&mut self, expr: Expr, inputs: &[NodeId], operator: &str) -> Result<ExpressionPlan> {
        let schemas = inputs
            .iter()
            .map(|i| self.plan.schema(*i))
            .collect::<Result<Vec<Option<Schema>>>>()?;
        ExpressionPlan::from_expr(&expr.resolve(&schemas, operator)?)
    }

    fn add_unary(&mut self, alias: &str, input: NodeId, op: Operator) -> Result<NodeId> {
        let id = self.plan.add(op.with_alias(alias));
        self.plan.connect(input, id)?;
        self.bind(alias, id);
        Ok(id)
    }

    fn add_nary(&mut self, alias: &str, inputs: &[NodeId], op: Operator) -> Result<NodeId> {
        let id = self.plan.add(op.with_alias(alias));
        for input in inputs {
            self.plan.connect(*input, id)?;
        }
        self.bind(alias, id);
        Ok(id)
    }

    pub fn load(&mut self, alias: &str, location: &str, schema: Option<Schema>) -> Result<NodeId> {
        let id = self
            .plan
            .add(Operator::load(location, schema).with_alias(alias));
        self.bind(alias, id);
        Ok(id)
    }

    pub fn filter(&mut self, alias: &str, input: &str, predicate: Expr) -> Result<NodeId> {
        let describe = format!("Filter '{alias}'");
        let input = self.lookup(input, &describe)?;
        let predicate = self.compile(predicate, &[input], &describe)?;
        self.add_unary(alias, input, Operator::filter(predicate))
    }

    pub fn foreach(&mut self, alias: &str, input: &str, items: Vec<ItemSpec>) -> Result<NodeId> {
        let describe = format!("ForEach '{alias}'");
        let input = self.lookup(input, &describe)?;
        let mut generate = Vec::with_capacity(items.len());
        for spec in items {
            let mut item = GenerateItem::new(self.compile(spec.expr, &[input], &describe)?);
            item.flatten = spec.flatten;
            item.alias = spec.alias;
            generate.push(item);
        }
        let id = self.add_unary(alias, input, Operator::foreach(generate))?;
        // surface duplicate output names at the statement that causes them
        self.plan.schema(id)?;
        Ok(id)
    }

    /// `inputs` pairs each input alias with its join key expressions.
    pub fn join(
        &mut self,
        alias: &str,
        inputs: &[(&str, Vec<Expr>)],
        join_type: JoinType,
    ) -> Result<NodeId> {
        let describe = format!("Join '{alias}'");
        let ids = inputs
            .iter()
            .map(|(a, _)| self.lookup(a, &describe))
            .collect::<Result<Vec<_>>>()?;
        let mut keys = Vec::with_capacity(inputs.len());
        for (i, (_, exprs)) in inputs.iter().enumerate() {
            let mut per_input = Vec::with_capacity(exprs.len());
            for e in exprs {
                per_input.push(self.compile(e.clone().on_input(i), &ids, &describe)?);
            }
            keys.push(per_input);
        }
        if keys.iter().map(Vec::len).collect::<std::collections::HashSet<_>>().len() > 1 {
            return Err(Error::Plan(format!(
                "{describe} has join key lists of different lengths"
            )));
        }
        let id = self.add_nary(alias, &ids, Operator::join(join_type, keys))?;
        self.plan.schema(id)?;
        Ok(id)
    }

    pub fn cross(&mut self, alias: &str, inputs: &[&str]) -> Result<NodeId> {
        let describe = format!("Cross '{alias}'");
        let ids = self.lookup_all(inputs, &describe)?;
        let id = self.add_nary(alias, &ids, Operator::cross())?;
        self.plan.schema(id)?;
        Ok(id)
    }

    pub fn union(&mut self, alias: &str, inputs: &[&str]) -> Result<NodeId> {
        let describe = format!("Union '{alias}'");
        let ids = self.lookup_all(inputs, &describe)?;
        self.add_nary(alias, &ids, Operator::union())
    }

    fn lookup_all(&self, inputs: &[&str], describe: &str) -> Result<Vec<NodeId>> {
        inputs.iter().map(|a| self.lookup(a, describe)).collect()
    }

    pub fn distinct(&mut self, alias: &str, input: &str) -> Result<NodeId> {
        let input = self.lookup(input, &format!("Distinct '{alias}'"))?;
        self.add_unary(alias, input, Operator::distinct())
    }

    /// A Split feeding one SplitOutput per `(alias, condition)` branch.
    pub fn split(&mut self, input: &str, branches: Vec<(String, Expr)>) -> Result<Vec<NodeId>> {
        let input = self.lookup(input, "Split")?;
        let split = self.plan.add(Operator::split());
        self.plan.connect(input, split)?;
        let mut out = Vec::with_capacity(branches.len());
        for (alias, cond) in branches {
            let describe = format!("SplitOutput '{alias}'");
            let condition = self.compile(cond, &[split], &describe)?;
            out.push(self.add_unary(&alias, split, Operator::split_output(condition))?);
        }
        Ok(out)
    }

    /// `keys` pairs an expression with `ascending`.
    pub fn sort(&mut self, alias: &str, input: &str, keys: Vec<(Expr, bool)>) -> Result<NodeId> {
        let describe = format!("Sort '{alias}'");
        let input = self.lookup(input, &describe)?;
        let mut sort_keys = Vec::with_capacity(keys.len());
        for (e, ascending) in keys {
            sort_keys.push(SortKey {
                expr: self.compile(e, &[input], &describe)?,
                ascending,
            });
        }
        self.add_unary(alias, input, Operator::sort(sort_keys))
    }

    pub fn limit(&mut self, alias: &str, input: &str, count: u64) -> Result<NodeId> {
        let input = self.lookup(input, &format!("Limit '{alias}'"))?;
        self.add_unary(alias, input, Operator::limit(count))
    }

    /// Stores are sinks and are not bound to an alias.
    pub fn store(&mut self, input: &str, location: &str) -> Result<NodeId> {
        let input = self.lookup(input, &format!("Store '{location}'"))?;
        let id = self.plan.add(Operator::store(location));
        self.plan.connect(input, id)?;
        Ok(id)
    }
}
