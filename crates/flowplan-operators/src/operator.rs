//! Relational operators of a logical plan.
//!
//! An `Operator` is a node payload inside the plan's `OperatorGraph`. Its
//! inputs are the node's predecessors in edge order; it carries its own
//! expression sub-plans and a memoized output schema that the plan computes
//! on demand.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use flowplan_core::graph::StructuralEq;
use flowplan_core::id::{Uid, UidGenerator};
use flowplan_core::schema::Schema;
use serde::{Deserialize, Serialize};

use crate::expression::ExpressionPlan;

/// Fieldless operator kind, used for capability queries and patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperatorType {
    Load,
    Store,
    Filter,
    Join,
    ForEach,
    Union,
    Cross,
    Distinct,
    Split,
    SplitOutput,
    Sort,
    Limit,
}

impl OperatorType {
    pub fn name(self) -> &'static str {
        match self {
            OperatorType::Load => "Load",
            OperatorType::Store => "Store",
            OperatorType::Filter => "Filter",
            OperatorType::Join => "Join",
            OperatorType::ForEach => "ForEach",
            OperatorType::Union => "Union",
            OperatorType::Cross => "Cross",
            OperatorType::Distinct => "Distinct",
            OperatorType::Split => "Split",
            OperatorType::SplitOutput => "SplitOutput",
            OperatorType::Sort => "Sort",
            OperatorType::Limit => "Limit",
        }
    }

    pub fn parse(s: &str) -> Option<OperatorType> {
        let all = [
            OperatorType::Load,
            OperatorType::Store,
            OperatorType::Filter,
            OperatorType::Join,
            OperatorType::ForEach,
            OperatorType::Union,
            OperatorType::Cross,
            OperatorType::Distinct,
            OperatorType::Split,
            OperatorType::SplitOutput,
            OperatorType::Sort,
            OperatorType::Limit,
        ];
        all.into_iter().find(|t| t.name().eq_ignore_ascii_case(s))
    }

    /// Whether more than one data input may be connected.
    pub fn allows_multiple_inputs(self) -> bool {
        matches!(
            self,
            OperatorType::Join | OperatorType::Cross | OperatorType::Union
        )
    }

    /// Minimum number of data inputs for a well-formed plan.
    pub fn min_inputs(self) -> usize {
        match self {
            OperatorType::Load => 0,
            OperatorType::Join | OperatorType::Cross => 2,
            _ => 1,
        }
    }

    /// Output schema equals the single input's.
    pub fn is_pass_through(self) -> bool {
        matches!(
            self,
            OperatorType::Filter
                | OperatorType::Distinct
                | OperatorType::Split
                | OperatorType::SplitOutput
                | OperatorType::Sort
                | OperatorType::Limit
                | OperatorType::Store
        )
    }
}

impl StructuralEq for OperatorType {
    fn structurally_eq(&self, other: &Self) -> bool {
        self == other
    }
}

impl fmt::Display for OperatorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinType {
    #[default]
    Inner,
    Left,
    Right,
    Full,
}

#[derive(Debug, Clone)]
pub struct Load {
    pub location: String,
    /// User-declared schema; `None` means the schema is unknown.
    pub declared: Option<Schema>,
    /// Map columns (by position) that only need the listed keys. Absent
    /// entries, or no annotation at all, mean every key is needed.
    pub required_map_keys: Option<BTreeMap<usize, BTreeSet<String>>>,
}

#[derive(Debug, Clone)]
pub struct Store {
    pub location: String,
}

#[derive(Debug, Clone)]
pub struct Filter {
    pub predicate: ExpressionPlan,
}

#[derive(Debug, Clone)]
pub struct Join {
    pub join_type: JoinType,
    /// Key expressions per input; projections inside `keys[i]` read input `i`.
    pub keys: Vec<Vec<ExpressionPlan>>,
}

/// One output column of a `ForEach`.
#[derive(Debug, Clone)]
pub struct GenerateItem {
    pub expr: ExpressionPlan,
    pub flatten: bool,
    pub alias: Option<String>,
    /// Identity of the computed column. Plain projections keep their input's
    /// uid instead.
    pub uid: Uid,
}

impl GenerateItem {
    pub fn new(expr: ExpressionPlan) -> Self {
        Self {
            expr,
            flatten: false,
            alias: None,
            uid: Uid::new(0),
        }
    }

    pub fn flattened(mut self) -> Self {
        self.flatten = true;
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct ForEach {
    pub items: Vec<GenerateItem>,
}

#[derive(Debug, Clone, Default)]
pub struct Union {
    /// Output uids, allocated on first schema computation and kept stable.
    pub output_uids: Vec<Uid>,
}

#[derive(Debug, Clone)]
pub struct SplitOutput {
    pub condition: ExpressionPlan,
}

#[derive(Debug, Clone)]
pub struct SortKey {
    pub expr: ExpressionPlan,
    pub ascending: bool,
}

#[derive(Debug, Clone)]
pub struct Sort {
    pub keys: Vec<SortKey>,
}

#[derive(Debug, Clone)]
pub enum OperatorKind {
    Load(Load),
    Store(Store),
    Filter(Filter),
    Join(Join),
    ForEach(ForEach),
    Union(Union),
    Cross,
    Distinct,
    Split,
    SplitOutput(SplitOutput),
    Sort(Sort),
    Limit(u64),
}

#[derive(Debug, Clone)]
pub struct Operator {
    pub alias: Option<String>,
    pub kind: OperatorKind,
    pub(crate) schema: Option<Schema>,
    pub(crate) schema_computed: bool,
}

impl Operator {
    pub fn new(kind: OperatorKind) -> Self {
        Self {
            alias: None,
            kind,
            schema: None,
            schema_computed: false,
        }
    }

    pub fn load(location: impl Into<String>, declared: Option<Schema>) -> Self {
        Self::new(OperatorKind::Load(Load {
            location: location.into(),
            declared,
            required_map_keys: None,
        }))
    }

    pub fn store(location: impl Into<String>) -> Self {
        Self::new(OperatorKind::Store(Store {
            location: location.into(),
        }))
    }

    pub fn filter(predicate: ExpressionPlan) -> Self {
        Self::new(OperatorKind::Filter(Filter { predicate }))
    }

    pub fn foreach(items: Vec<GenerateItem>) -> Self {
        Self::new(OperatorKind::ForEach(ForEach { items }))
    }

    pub fn join(join_type: JoinType, keys: Vec<Vec<ExpressionPlan>>) -> Self {
        Self::new(OperatorKind::Join(Join { join_type, keys }))
    }

    pub fn union() -> Self {
        Self::new(OperatorKind::Union(Union::default()))
    }

    pub fn cross() -> Self {
        Self::new(OperatorKind::Cross)
    }

    pub fn distinct() -> Self {
        Self::new(OperatorKind::Distinct)
    }

    pub fn split() -> Self {
        Self::new(OperatorKind::Split)
    }

    pub fn split_output(condition: ExpressionPlan) -> Self {
        Self::new(OperatorKind::SplitOutput(SplitOutput { condition }))
    }

    pub fn sort(keys: Vec<SortKey>) -> Self {
        Self::new(OperatorKind::Sort(Sort { keys }))
    }

    pub fn limit(n: u64) -> Self {
        Self::new(OperatorKind::Limit(n))
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn op_type(&self) -> OperatorType {
        match &self.kind {
            OperatorKind::Load(_) => OperatorType::Load,
            OperatorKind::Store(_) => OperatorType::Store,
            OperatorKind::Filter(_) => OperatorType::Filter,
            OperatorKind::Join(_) => OperatorType::Join,
            OperatorKind::ForEach(_) => OperatorType::ForEach,
            OperatorKind::Union(_) => OperatorType::Union,
            OperatorKind::Cross => OperatorType::Cross,
            OperatorKind::Distinct => OperatorType::Distinct,
            OperatorKind::Split => OperatorType::Split,
            OperatorKind::SplitOutput(_) => OperatorType::SplitOutput,
            OperatorKind::Sort(_) => OperatorType::Sort,
            OperatorKind::Limit(_) => OperatorType::Limit,
        }
    }

    /// `Filter 'B'`, or just the kind when unnamed.
    pub fn describe(&self) -> String {
        match &self.alias {
            Some(a) => format!("{} '{a}'", self.op_type()),
            None => self.op_type().to_string(),
        }
    }

    pub fn predicate(&self) -> Option<&ExpressionPlan> {
        match &self.kind {
            OperatorKind::Filter(f) => Some(&f.predicate),
            _ => None,
        }
    }

    pub fn predicate_mut(&mut self) -> Option<&mut ExpressionPlan> {
        match &mut self.kind {
            OperatorKind::Filter(f) => Some(&mut f.predicate),
            _ => None,
        }
    }

    /// Expression sub-plans owned by this operator.
    pub fn expressions(&self) -> Vec<&ExpressionPlan> {
        match &self.kind {
            OperatorKind::Filter(f) => vec![&f.predicate],
            OperatorKind::Join(j) => j.keys.iter().flatten().collect(),
            OperatorKind::ForEach(fe) => fe.items.iter().map(|i| &i.expr).collect(),
            OperatorKind::SplitOutput(s) => vec![&s.condition],
            OperatorKind::Sort(s) => s.keys.iter().map(|k| &k.expr).collect(),
            _ => Vec::new(),
        }
    }

    pub fn expressions_mut(&mut self) -> Vec<&mut ExpressionPlan> {
        match &mut self.kind {
            OperatorKind::Filter(f) => vec![&mut f.predicate],
            OperatorKind::Join(j) => j.keys.iter_mut().flatten().collect(),
            OperatorKind::ForEach(fe) => fe.items.iter_mut().map(|i| &mut i.expr).collect(),
            OperatorKind::SplitOutput(s) => vec![&mut s.condition],
            OperatorKind::Sort(s) => s.keys.iter_mut().map(|k| &mut k.expr).collect(),
            _ => Vec::new(),
        }
    }

    /// Replace placeholder (zero) uids owned by this operator.
    pub fn assign_uids(&mut self, uids: &mut UidGenerator) {
        match &mut self.kind {
            OperatorKind::Load(l) => {
                if let Some(s) = &mut l.declared {
                    if s.all_uids().iter().any(|u| u.get() == 0) {
                        s.assign_uids(uids);
                    }
                }
            }
            OperatorKind::ForEach(fe) => {
                for item in &mut fe.items {
                    if item.uid.get() == 0 {
                        item.uid = uids.next_uid();
                    }
                }
            }
            _ => {}
        }
    }

    pub fn location(&self) -> Option<&str> {
        match &self.kind {
            OperatorKind::Load(l) => Some(&l.location),
            OperatorKind::Store(s) => Some(&s.location),
            _ => None,
        }
    }

    /// Memoized schema, if already computed.
    pub fn cached_schema(&self) -> Option<&Schema> {
        if self.schema_computed {
            self.schema.as_ref()
        } else {
            None
        }
    }

    pub fn is_schema_computed(&self) -> bool {
        self.schema_computed
    }

    pub(crate) fn reset_schema(&mut self) {
        self.schema = None;
        self.schema_computed = false;
    }

    /// One-line parameter summary for plan printing.
    pub fn params(&self) -> String {
        let list = |v: Vec<String>| v.join(", ");
        match &self.kind {
            OperatorKind::Load(l) => {
                let mut s = format!("'{}'", l.location);
                if let Some(schema) = &l.declared {
                    s.push_str(&format!(" AS {schema}"));
                }
                if let Some(keys) = &l.required_map_keys {
                    let cols: Vec<String> = keys
                        .iter()
                        .map(|(c, k)| {
                            let k: Vec<&str> = k.iter().map(String::as_str).collect();
                            format!("${c}[{}]", k.join(","))
                        })
                        .collect();
                    s.push_str(&format!(" KEYS {}", list(cols)));
                }
                s
            }
            OperatorKind::Store(st) => format!("'{}'", st.location),
            OperatorKind::Filter(f) => f.predicate.to_string(),
            OperatorKind::Join(j) => {
                let per_input: Vec<String> = j
                    .keys
                    .iter()
                    .map(|ks| format!("({})", list(ks.iter().map(|k| k.to_string()).collect())))
                    .collect();
                format!("{:?} BY {}", j.join_type, list(per_input))
            }
            OperatorKind::ForEach(fe) => list(
                fe.items
                    .iter()
                    .map(|i| {
                        let mut s = if i.flatten {
                            format!("FLATTEN({})", i.expr)
                        } else {
                            i.expr.to_string()
                        };
                        if let Some(a) = &i.alias {
                            s.push_str(&format!(" AS {a}"));
                        }
                        s
                    })
                    .collect(),
            ),
            OperatorKind::SplitOutput(s) => s.condition.to_string(),
            OperatorKind::Sort(s) => list(
                s.keys
                    .iter()
                    .map(|k| format!("{} {}", k.expr, if k.ascending { "ASC" } else { "DESC" }))
                    .collect(),
            ),
            OperatorKind::Limit(n) => n.to_string(),
            OperatorKind::Union(_)
            | OperatorKind::Cross
            | OperatorKind::Distinct
            | OperatorKind::Split => String::new(),
        }
    }
}

fn exprs_eq(a: &[ExpressionPlan], b: &[ExpressionPlan]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.is_equal(y))
}

impl StructuralEq for Operator {
    /// Same alias and parameters. Schema caches and uid bookkeeping are
    /// ignored.
    fn structurally_eq(&self, other: &Self) -> bool {
        if self.alias != other.alias {
            return false;
        }
        match (&self.kind, &other.kind) {
            (OperatorKind::Load(a), OperatorKind::Load(b)) => {
                a.location == b.location
                    && a.required_map_keys == b.required_map_keys
                    && match (&a.declared, &b.declared) {
                        (Some(x), Some(y)) => x.shape_eq(y),
                        (None, None) => true,
                        _ => false,
                    }
            }
            (OperatorKind::Store(a), OperatorKind::Store(b)) => a.location == b.location,
            (OperatorKind::Filter(a), OperatorKind::Filter(b)) => {
                a.predicate.is_equal(&b.predicate)
            }
            (OperatorKind::Join(a), OperatorKind::Join(b)) => {
                a.join_type == b.join_type
                    && a.keys.len() == b.keys.len()
                    && a.keys.iter().zip(&b.keys).all(|(x, y)| exprs_eq(x, y))
            }
            (OperatorKind::ForEach(a), OperatorKind::ForEach(b)) => {
                a.items.len() == b.items.len()
                    && a.items.iter().zip(&b.items).all(|(x, y)| {
                        x.flatten == y.flatten && x.alias == y.alias && x.expr.is_equal(&y.expr)
                    })
            }
            (OperatorKind::SplitOutput(a), OperatorKind::SplitOutput(b)) => {
                a.condition.is_equal(&b.condition)
            }
            (OperatorKind::Sort(a), OperatorKind::Sort(b)) => {
                a.keys.len() == b.keys.len()
                    && a.keys
                        .iter()
                        .zip(&b.keys)
                        .all(|(x, y)| x.ascending == y.ascending && x.expr.is_equal(&y.expr))
            }
            (OperatorKind::Limit(a), OperatorKind::Limit(b)) => a == b,
            (OperatorKind::Union(_), OperatorKind::Union(_))
            | (OperatorKind::Cross, OperatorKind::Cross)
            | (OperatorKind::Distinct, OperatorKind::Distinct)
            | (OperatorKind::Split, OperatorKind::Split) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(a) = &self.alias {
            write!(f, "{a} = ")?;
        }
        write!(f, "{}", self.op_type())?;
        let params = self.params();
        if !params.is_empty() {
            write!(f, " {params}")?;
        }
        Ok(())
    }
}
