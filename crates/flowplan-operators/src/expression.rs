//! Expression sub-plans.
//!
//! Every relational operator that evaluates expressions owns private
//! `ExpressionPlan`s: small DAGs whose single source is the root of the
//! expression and whose edges point from an operator to its operands, in
//! operand order. Plans are never shared between relational operators; moving
//! an expression somewhere else always goes through a deep copy.
//!
//! `Expr` is the owned tree form used to build and print plans.

use std::fmt;

use flowplan_core::error::{Error, Result};
use flowplan_core::graph::{OperatorGraph, StructuralEq};
use flowplan_core::id::NodeId;
use flowplan_core::schema::{DataType, Schema};
use flowplan_core::types::Value;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    pub fn symbol(self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl ArithOp {
    pub fn symbol(self) -> &'static str {
        match self {
            ArithOp::Add => "+",
            ArithOp::Sub => "-",
            ArithOp::Mul => "*",
            ArithOp::Div => "/",
            ArithOp::Mod => "%",
        }
    }
}

/// A node of an expression sub-plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExprOp {
    Constant(Value),
    /// Column `column` of input `input` of the owning relational operator.
    Project {
        input: usize,
        column: usize,
        alias: Option<String>,
    },
    /// `map#'key'`; operand 0 is the map.
    MapLookup { key: String },
    Not,
    IsNull,
    Negative,
    And,
    Or,
    Compare(CompareOp),
    Arithmetic(ArithOp),
}

impl ExprOp {
    pub fn arity(&self) -> usize {
        match self {
            ExprOp::Constant(_) | ExprOp::Project { .. } => 0,
            ExprOp::MapLookup { .. } | ExprOp::Not | ExprOp::IsNull | ExprOp::Negative => 1,
            ExprOp::And | ExprOp::Or | ExprOp::Compare(_) | ExprOp::Arithmetic(_) => 2,
        }
    }
}

impl StructuralEq for ExprOp {
    fn structurally_eq(&self, other: &Self) -> bool {
        match (self, other) {
            // aliases are display hints only
            (
                ExprOp::Project { input: a, column: b, .. },
                ExprOp::Project { input: c, column: d, .. },
            ) => a == c && b == d,
            _ => self == other,
        }
    }
}

/// Owned expression tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Const(Value),
    Col {
        input: usize,
        column: usize,
        alias: Option<String>,
    },
    /// Column referenced by alias (or `$n`), resolved against input schemas
    /// before it can become a plan.
    Named { input: usize, name: String },
    MapLookup { map: Box<Expr>, key: String },
    Not(Box<Expr>),
    IsNull(Box<Expr>),
    Neg(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Cmp(CompareOp, Box<Expr>, Box<Expr>),
    Arith(ArithOp, Box<Expr>, Box<Expr>),
}

impl Expr {
    pub fn lit(v: impl Into<Value>) -> Expr {
        Expr::Const(v.into())
    }

    pub fn col(column: usize) -> Expr {
        Expr::Col {
            input: 0,
            column,
            alias: None,
        }
    }

    pub fn col_of(input: usize, column: usize) -> Expr {
        Expr::Col {
            input,
            column,
            alias: None,
        }
    }

    pub fn named(name: impl Into<String>) -> Expr {
        Expr::Named {
            input: 0,
            name: name.into(),
        }
    }

    pub fn named_of(input: usize, name: impl Into<String>) -> Expr {
        Expr::Named {
            input,
            name: name.into(),
        }
    }

    pub fn lookup(self, key: impl Into<String>) -> Expr {
        Expr::MapLookup {
            map: Box::new(self),
            key: key.into(),
        }
    }

    pub fn and(self, other: Expr) -> Expr {
        Expr::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Expr) -> Expr {
        Expr::Or(Box::new(self), Box::new(other))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Expr {
        Expr::Not(Box::new(self))
    }

    pub fn is_null(self) -> Expr {
        Expr::IsNull(Box::new(self))
    }

    pub fn cmp(self, op: CompareOp, other: Expr) -> Expr {
        Expr::Cmp(op, Box::new(self), Box::new(other))
    }

    pub fn equals(self, other: Expr) -> Expr {
        self.cmp(CompareOp::Eq, other)
    }

    pub fn gt(self, other: Expr) -> Expr {
        self.cmp(CompareOp::Gt, other)
    }

    pub fn lt(self, other: Expr) -> Expr {
        self.cmp(CompareOp::Lt, other)
    }

    pub fn arith(self, op: ArithOp, other: Expr) -> Expr {
        Expr::Arith(op, Box::new(self), Box::new(other))
    }

    /// The same expression reading input `input` instead.
    pub fn on_input(self, input: usize) -> Expr {
        let r = |e: Box<Expr>| Box::new(e.on_input(input));
        match self {
            Expr::Col { column, alias, .. } => Expr::Col {
                input,
                column,
                alias,
            },
            Expr::Named { name, .. } => Expr::Named { input, name },
            Expr::MapLookup { map, key } => Expr::MapLookup { map: r(map), key },
            Expr::Not(e) => Expr::Not(r(e)),
            Expr::IsNull(e) => Expr::IsNull(r(e)),
            Expr::Neg(e) => Expr::Neg(r(e)),
            Expr::And(a, b) => Expr::And(r(a), r(b)),
            Expr::Or(a, b) => Expr::Or(r(a), r(b)),
            Expr::Cmp(op, a, b) => Expr::Cmp(op, r(a), r(b)),
            Expr::Arith(op, a, b) => Expr::Arith(op, r(a), r(b)),
            c @ Expr::Const(_) => c,
        }
    }

    /// Replace every `Named` reference with a positional column.
    ///
    /// `$n` always resolves positionally; other names need a known input
    /// schema. `operator` names the owner in error messages.
    pub fn resolve(self, inputs: &[Option<Schema>], operator: &str) -> Result<Expr> {
        let r = |e: Box<Expr>| -> Result<Box<Expr>> { Ok(Box::new(e.resolve(inputs, operator)?)) };
        Ok(match self {
            Expr::Named { input, name } => {
                let unknown = || Error::UnknownAlias {
                    alias: name.clone(),
                    operator: operator.to_string(),
                };
                if let Some(pos) = name.strip_prefix('$').and_then(|n| n.parse::<usize>().ok()) {
                    let alias = inputs
                        .get(input)
                        .and_then(Option::as_ref)
                        .and_then(|s| s.field(pos))
                        .and_then(|f| f.alias.clone());
                    return Ok(Expr::Col {
                        input,
                        column: pos,
                        alias,
                    });
                }
                let schema = inputs
                    .get(input)
                    .and_then(Option::as_ref)
                    .ok_or_else(unknown)?;
                let column = schema.index_of(&name).ok_or_else(unknown)?;
                Expr::Col {
                    input,
                    column,
                    alias: Some(name),
                }
            }
            Expr::MapLookup { map, key } => Expr::MapLookup { map: r(map)?, key },
            Expr::Not(e) => Expr::Not(r(e)?),
            Expr::IsNull(e) => Expr::IsNull(r(e)?),
            Expr::Neg(e) => Expr::Neg(r(e)?),
            Expr::And(a, b) => Expr::And(r(a)?, r(b)?),
            Expr::Or(a, b) => Expr::Or(r(a)?, r(b)?),
            Expr::Cmp(op, a, b) => Expr::Cmp(op, r(a)?, r(b)?),
            Expr::Arith(op, a, b) => Expr::Arith(op, r(a)?, r(b)?),
            other @ (Expr::Const(_) | Expr::Col { .. }) => other,
        })
    }
}

/// How a projected column is used inside an expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnUse {
    /// The whole value is needed.
    Whole { input: usize, column: usize },
    /// Only `map#'key'` is read.
    MapKey {
        input: usize,
        column: usize,
        key: String,
    },
}

#[derive(Debug, Clone, Default)]
pub struct ExpressionPlan {
    graph: OperatorGraph<ExprOp>,
}

impl ExpressionPlan {
    pub fn from_expr(expr: &Expr) -> Result<Self> {
        let mut graph = OperatorGraph::new();
        add_tree(&mut graph, expr)?;
        Ok(Self { graph })
    }

    pub fn constant(v: impl Into<Value>) -> Self {
        let mut graph = OperatorGraph::new();
        graph.add(ExprOp::Constant(v.into()));
        Self { graph }
    }

    pub fn graph(&self) -> &OperatorGraph<ExprOp> {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut OperatorGraph<ExprOp> {
        &mut self.graph
    }

    /// The single source of the plan.
    pub fn root(&self) -> Result<NodeId> {
        match self.graph.sources().as_slice() {
            [root] => Ok(*root),
            [] => Err(Error::Plan("expression plan is empty".into())),
            many => Err(Error::Plan(format!(
                "expression plan has {} roots",
                many.len()
            ))),
        }
    }

    pub fn root_op(&self) -> Result<&ExprOp> {
        self.graph.node(self.root()?)
    }

    pub fn operands(&self, id: NodeId) -> &[NodeId] {
        self.graph.successors(id)
    }

    /// One root, acyclic, each node with as many operands as its kind needs.
    pub fn validate(&self) -> Result<()> {
        self.root()?;
        self.graph.topological_order()?;
        for (id, op) in self.graph.iter() {
            let n = self.operands(id).len();
            if n != op.arity() {
                return Err(Error::Plan(format!(
                    "expression node {op:?} has {n} operands, expected {}",
                    op.arity()
                )));
            }
        }
        Ok(())
    }

    pub fn to_expr(&self) -> Result<Expr> {
        self.expr_at(self.root()?)
    }

    fn expr_at(&self, id: NodeId) -> Result<Expr> {
        let ops = self.operands(id);
        let child = |i: usize| -> Result<Box<Expr>> {
            let c = ops.get(i).ok_or_else(|| {
                Error::Plan(format!("expression node {id} is missing operand {i}"))
            })?;
            Ok(Box::new(self.expr_at(*c)?))
        };
        Ok(match self.graph.node(id)? {
            ExprOp::Constant(v) => Expr::Const(v.clone()),
            ExprOp::Project {
                input,
                column,
                alias,
            } => Expr::Col {
                input: *input,
                column: *column,
                alias: alias.clone(),
            },
            ExprOp::MapLookup { key } => Expr::MapLookup {
                map: child(0)?,
                key: key.clone(),
            },
            ExprOp::Not => Expr::Not(child(0)?),
            ExprOp::IsNull => Expr::IsNull(child(0)?),
            ExprOp::Negative => Expr::Neg(child(0)?),
            ExprOp::And => Expr::And(child(0)?, child(1)?),
            ExprOp::Or => Expr::Or(child(0)?, child(1)?),
            ExprOp::Compare(op) => Expr::Cmp(*op, child(0)?, child(1)?),
            ExprOp::Arithmetic(op) => Expr::Arith(*op, child(0)?, child(1)?),
        })
    }

    /// Deep copy of the sub-expression rooted at `id`.
    pub fn subtree(&self, id: NodeId) -> Result<ExpressionPlan> {
        let (graph, _) = self.graph.copy_reachable(id)?;
        Ok(Self { graph })
    }

    /// `AND(left, right)` built from copies; neither input is touched.
    pub fn conjunction(left: &ExpressionPlan, right: &ExpressionPlan) -> Result<ExpressionPlan> {
        let mut graph = OperatorGraph::new();
        let and = graph.add(ExprOp::And);
        let l = graph.absorb_reachable(&left.graph, left.root()?)?;
        let r = graph.absorb_reachable(&right.graph, right.root()?)?;
        graph.connect(and, l)?;
        graph.connect(and, r)?;
        Ok(Self { graph })
    }

    /// Copies of both operands when the root is `AND`.
    pub fn split_conjunction(&self) -> Result<Option<(ExpressionPlan, ExpressionPlan)>> {
        let root = self.root()?;
        if !matches!(self.graph.node(root)?, ExprOp::And) {
            return Ok(None);
        }
        match self.operands(root) {
            [l, r] => Ok(Some((self.subtree(*l)?, self.subtree(*r)?))),
            other => Err(Error::Plan(format!(
                "AND node has {} operands",
                other.len()
            ))),
        }
    }

    pub fn is_conjunction(&self) -> bool {
        matches!(self.root_op(), Ok(ExprOp::And))
    }

    /// Number of nested `AND`s along the root's left/right spine.
    pub fn and_depth(&self) -> usize {
        fn depth(p: &ExpressionPlan, id: NodeId) -> usize {
            match p.graph.get(id) {
                Some(ExprOp::And) => {
                    1 + p
                        .operands(id)
                        .iter()
                        .map(|c| depth(p, *c))
                        .max()
                        .unwrap_or(0)
                }
                _ => 0,
            }
        }
        self.root().map(|r| depth(self, r)).unwrap_or(0)
    }

    /// `(input, column)` of the plan when it is nothing but a projection.
    pub fn as_projection(&self) -> Option<(usize, usize)> {
        if self.graph.len() != 1 {
            return None;
        }
        match self.root_op() {
            Ok(ExprOp::Project { input, column, .. }) => Some((*input, *column)),
            _ => None,
        }
    }

    /// Every `(input, column)` the plan reads, in node order.
    pub fn projections(&self) -> Vec<(usize, usize)> {
        self.graph
            .iter()
            .filter_map(|(_, op)| match op {
                ExprOp::Project { input, column, .. } => Some((*input, *column)),
                _ => None,
            })
            .collect()
    }

    /// How each projection is consumed: under a map lookup (per key) or whole.
    pub fn column_uses(&self) -> Vec<ColumnUse> {
        let mut out = Vec::new();
        for (id, op) in self.graph.iter() {
            let ExprOp::Project { input, column, .. } = op else {
                continue;
            };
            let parents = self.graph.predecessors(id);
            if parents.is_empty() {
                out.push(ColumnUse::Whole {
                    input: *input,
                    column: *column,
                });
            }
            for p in parents {
                match self.graph.get(*p) {
                    Some(ExprOp::MapLookup { key }) => out.push(ColumnUse::MapKey {
                        input: *input,
                        column: *column,
                        key: key.clone(),
                    }),
                    _ => out.push(ColumnUse::Whole {
                        input: *input,
                        column: *column,
                    }),
                }
            }
        }
        out
    }

    /// Re-point every projection; `f(input, column)` returns the new column.
    pub fn remap_columns<F>(&mut self, mut f: F) -> Result<()>
    where
        F: FnMut(usize, usize) -> Result<usize>,
    {
        let ids: Vec<NodeId> = self.graph.ids().collect();
        for id in ids {
            if let ExprOp::Project { input, column, .. } = self.graph.node_mut(id)? {
                *column = f(*input, *column)?;
            }
        }
        Ok(())
    }

    /// Static result type given the owner's input schemas.
    pub fn result_type(&self, inputs: &[Option<Schema>]) -> DataType {
        self.root()
            .map(|r| self.type_at(r, inputs))
            .unwrap_or(DataType::ByteArray)
    }

    fn type_at(&self, id: NodeId, inputs: &[Option<Schema>]) -> DataType {
        let operand = |i: usize| {
            self.operands(id)
                .get(i)
                .map(|c| self.type_at(*c, inputs))
                .unwrap_or(DataType::ByteArray)
        };
        match self.graph.get(id) {
            Some(ExprOp::Constant(v)) => v.data_type().unwrap_or(DataType::ByteArray),
            Some(ExprOp::Project { input, column, .. }) => inputs
                .get(*input)
                .and_then(Option::as_ref)
                .and_then(|s| s.field(*column))
                .map(|f| f.data_type)
                .unwrap_or(DataType::ByteArray),
            Some(ExprOp::MapLookup { .. }) => DataType::ByteArray,
            Some(ExprOp::Not | ExprOp::IsNull | ExprOp::And | ExprOp::Or | ExprOp::Compare(_)) => {
                DataType::Boolean
            }
            Some(ExprOp::Negative) => operand(0),
            Some(ExprOp::Arithmetic(_)) => match operand(0).merge(operand(1)) {
                Some(t) if t.is_numeric() => t,
                _ => DataType::Double,
            },
            None => DataType::ByteArray,
        }
    }

    /// Same shape and node contents; keys are irrelevant.
    pub fn is_equal(&self, other: &ExpressionPlan) -> bool {
        self.graph.is_equal(&other.graph)
    }

    fn fmt_node(&self, id: NodeId, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ops = self.operands(id);
        let operand = |i: usize, f: &mut fmt::Formatter<'_>| match ops.get(i) {
            Some(c) => self.fmt_node(*c, f),
            None => f.write_str("?"),
        };
        match self.graph.get(id) {
            Some(ExprOp::Constant(v)) => fmt_value(v, f),
            Some(ExprOp::Project {
                input,
                column,
                alias,
            }) => match (input, alias) {
                (0, Some(a)) => f.write_str(a),
                (0, None) => write!(f, "${column}"),
                (i, Some(a)) => write!(f, "[{i}]{a}"),
                (i, None) => write!(f, "[{i}]${column}"),
            },
            Some(ExprOp::MapLookup { key }) => {
                operand(0, f)?;
                write!(f, "#'{key}'")
            }
            Some(ExprOp::Not) => {
                f.write_str("NOT ")?;
                operand(0, f)
            }
            Some(ExprOp::IsNull) => {
                operand(0, f)?;
                f.write_str(" IS NULL")
            }
            Some(ExprOp::Negative) => {
                f.write_str("-")?;
                operand(0, f)
            }
            Some(op @ (ExprOp::And | ExprOp::Or | ExprOp::Compare(_) | ExprOp::Arithmetic(_))) => {
                let symbol = match op {
                    ExprOp::And => "AND",
                    ExprOp::Or => "OR",
                    ExprOp::Compare(c) => c.symbol(),
                    ExprOp::Arithmetic(a) => a.symbol(),
                    _ => "?",
                };
                f.write_str("(")?;
                operand(0, f)?;
                write!(f, " {symbol} ")?;
                operand(1, f)?;
                f.write_str(")")
            }
            None => f.write_str("?"),
        }
    }
}

impl StructuralEq for ExpressionPlan {
    fn structurally_eq(&self, other: &Self) -> bool {
        self.is_equal(other)
    }
}

impl fmt::Display for ExpressionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.root() {
            Ok(r) => self.fmt_node(r, f),
            Err(_) => f.write_str("<invalid expression>"),
        }
    }
}

fn fmt_value(v: &Value, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match v {
        Value::Null => f.write_str("null"),
        Value::Boolean(b) => write!(f, "{b}"),
        Value::Int(i) => write!(f, "{i}"),
        Value::Long(l) => write!(f, "{l}L"),
        Value::Float(x) => write!(f, "{x}F"),
        Value::Double(d) => write!(f, "{d:?}"),
        Value::CharArray(s) => write!(f, "'{s}'"),
        other => write!(f, "{other:?}"),
    }
}

fn add_tree(g: &mut OperatorGraph<ExprOp>, e: &Expr) -> Result<NodeId> {
    let (op, children): (ExprOp, Vec<&Expr>) = match e {
        Expr::Const(v) => (ExprOp::Constant(v.clone()), vec![]),
        Expr::Col {
            input,
            column,
            alias,
        } => (
            ExprOp::Project {
                input: *input,
                column: *column,
                alias: alias.clone(),
            },
            vec![],
        ),
        Expr::Named { name, .. } => {
            return Err(Error::Plan(format!(
                "column '{name}' must be resolved before building an expression plan"
            )))
        }
        Expr::MapLookup { map, key } => (ExprOp::MapLookup { key: key.clone() }, vec![map]),
        Expr::Not(x) => (ExprOp::Not, vec![x]),
        Expr::IsNull(x) => (ExprOp::IsNull, vec![x]),
        Expr::Neg(x) => (ExprOp::Negative, vec![x]),
        Expr::And(a, b) => (ExprOp::And, vec![a, b]),
        Expr::Or(a, b) => (ExprOp::Or, vec![a, b]),
        Expr::Cmp(op, a, b) => (ExprOp::Compare(*op), vec![a, b]),
        Expr::Arith(op, a, b) => (ExprOp::Arithmetic(*op), vec![a, b]),
    };
    let id = g.add(op);
    for c in children {
        let cid = add_tree(g, c)?;
        g.connect(id, cid)?;
    }
    Ok(id)
}
