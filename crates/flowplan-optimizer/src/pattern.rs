//! Structural patterns over a logical plan.
//!
//! A pattern is itself an operator graph, but of fieldless `OperatorType`s.
//! It must have exactly one source (the anchor) from which every pattern node
//! is reachable. A plan node matches the anchor when its type agrees and, for
//! every pattern edge, the plan node has a successor of the right type in the
//! same output slot.

use std::collections::{HashMap, HashSet};

use flowplan_core::error::{Error, Result};
use flowplan_core::graph::OperatorGraph;
use flowplan_core::id::NodeId;
use flowplan_operators::{LogicalPlan, OperatorType};

#[derive(Debug, Clone, Default)]
pub struct Pattern {
    graph: OperatorGraph<OperatorType>,
}

impl Pattern {
    pub fn new() -> Self {
        Self::default()
    }

    /// A single-node pattern.
    pub fn leaf(t: OperatorType) -> Result<Self> {
        Self::chain(&[t])
    }

    /// `types[0] -> types[1] -> ...`, each edge in output slot 0.
    pub fn chain(types: &[OperatorType]) -> Result<Self> {
        let mut pattern = Self::new();
        let mut prev: Option<NodeId> = None;
        for t in types {
            let id = pattern.add(*t);
            if let Some(p) = prev {
                pattern.connect(p, id)?;
            }
            prev = Some(id);
        }
        Ok(pattern)
    }

    pub fn add(&mut self, t: OperatorType) -> NodeId {
        self.graph.add(t)
    }

    pub fn connect(&mut self, from: NodeId, to: NodeId) -> Result<()> {
        self.graph
            .connect(from, to)
            .map_err(|e| Error::Pattern(e.to_string()))
    }

    pub fn graph(&self) -> &OperatorGraph<OperatorType> {
        &self.graph
    }

    pub fn len(&self) -> usize {
        self.graph.len()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.is_empty()
    }

    /// The anchor node, after checking the pattern is well formed.
    pub fn root(&self) -> Result<NodeId> {
        let root = match self.graph.sources().as_slice() {
            [r] => *r,
            [] if self.graph.is_empty() => return Err(Error::Pattern("pattern is empty".into())),
            [] => return Err(Error::Pattern("pattern has no source".into())),
            many => {
                return Err(Error::Pattern(format!(
                    "pattern has {} sources, expected one",
                    many.len()
                )))
            }
        };
        if self.graph.has_cycle() {
            return Err(Error::Pattern("pattern contains a cycle".into()));
        }
        if self.graph.descendants(root).len() != self.graph.len() {
            return Err(Error::Pattern(
                "pattern is not connected to its source".into(),
            ));
        }
        Ok(root)
    }

    pub fn validate(&self) -> Result<()> {
        self.root().map(|_| ())
    }

    /// Try to match with the anchor mapped to `anchor`.
    pub fn match_at(&self, plan: &LogicalPlan, anchor: NodeId) -> Result<Option<Match>> {
        let root = self.root()?;
        let mut state = MatchState::default();
        if !self.bind(plan, root, anchor, &mut state) {
            return Ok(None);
        }
        let nodes = self
            .graph
            .ids()
            .map(|p| state.bound.get(&p).copied())
            .collect::<Option<Vec<_>>>();
        Ok(nodes.map(|nodes| Match { nodes }))
    }

    /// All matches, anchors visited in topological order. With `scope`, only
    /// anchors inside it are tried.
    pub fn find_matches(&self, plan: &LogicalPlan, scope: Option<&[NodeId]>) -> Result<Vec<Match>> {
        self.validate()?;
        let order = plan.graph().topological_order()?;
        let mut out = Vec::new();
        for anchor in order {
            if let Some(scope) = scope {
                if !scope.contains(&anchor) {
                    continue;
                }
            }
            if let Some(m) = self.match_at(plan, anchor)? {
                out.push(m);
            }
        }
        Ok(out)
    }

    fn bind(&self, plan: &LogicalPlan, pnode: NodeId, node: NodeId, state: &mut MatchState) -> bool {
        if let Some(existing) = state.bound.get(&pnode) {
            return *existing == node;
        }
        if state.used.contains(&node) {
            return false;
        }
        let (Some(want), Ok(have)) = (self.graph.get(pnode), plan.op_type(node)) else {
            return false;
        };
        if *want != have {
            return false;
        }
        state.bound.insert(pnode, node);
        state.used.insert(node);

        let plan_succs = plan.successors(node);
        for (slot, psucc) in self.graph.successors(pnode).iter().enumerate() {
            match plan_succs.get(slot) {
                Some(s) if self.bind(plan, *psucc, *s, state) => {}
                _ => return false,
            }
        }
        true
    }
}

#[derive(Default)]
struct MatchState {
    bound: HashMap<NodeId, NodeId>,
    used: HashSet<NodeId>,
}

/// Plan nodes bound to the pattern's nodes, in pattern insertion order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    pub nodes: Vec<NodeId>,
}

impl Match {
    pub fn get(&self, i: usize) -> Result<NodeId> {
        self.nodes
            .get(i)
            .copied()
            .ok_or_else(|| Error::Pattern(format!("match has no node #{i}")))
    }

    pub fn anchor(&self) -> Result<NodeId> {
        self.get(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowplan_operators::{Expr, ExpressionPlan, Operator};

    fn filter() -> Operator {
        Operator::filter(ExpressionPlan::from_expr(&Expr::lit(true)).unwrap())
    }

    #[test]
    fn chain_matches_positionally() {
        let mut plan = LogicalPlan::new();
        let l = plan.add(Operator::load("in", None));
        let f1 = plan.add(filter());
        let f2 = plan.add(filter());
        let s = plan.add(Operator::store("out"));
        plan.connect(l, f1).unwrap();
        plan.connect(f1, f2).unwrap();
        plan.connect(f2, s).unwrap();

        let p = Pattern::chain(&[OperatorType::Filter, OperatorType::Filter]).unwrap();
        let matches = p.find_matches(&plan, None).unwrap();
        assert_eq!(matches, vec![Match { nodes: vec![f1, f2] }]);

        let scoped = p.find_matches(&plan, Some(&[f2, s])).unwrap();
        assert!(scoped.is_empty());
    }

    #[test]
    fn malformed_patterns_are_rejected() {
        assert!(matches!(Pattern::new().validate(), Err(Error::Pattern(_))));

        let mut two_sources = Pattern::new();
        let a = two_sources.add(OperatorType::Filter);
        let b = two_sources.add(OperatorType::Filter);
        let c = two_sources.add(OperatorType::Union);
        two_sources.connect(a, c).unwrap();
        two_sources.connect(b, c).unwrap();
        assert!(matches!(two_sources.validate(), Err(Error::Pattern(_))));

        let plan = LogicalPlan::new();
        assert!(two_sources.find_matches(&plan, None).is_err());
    }

    #[test]
    fn chain_builds_a_rooted_path_and_reports_bad_edges() {
        let mut p = Pattern::chain(&[OperatorType::ForEach, OperatorType::Filter]).unwrap();
        assert_eq!(p.len(), 2);
        let root = p.root().unwrap();
        let tail = p.graph().successors(root)[0];
        assert!(matches!(p.connect(root, tail), Err(Error::Pattern(_))));
        assert!(matches!(p.connect(root, NodeId::new(99)), Err(Error::Pattern(_))));
        assert_eq!(Pattern::leaf(OperatorType::Filter).unwrap().len(), 1);
    }

    #[test]
    fn type_mismatch_does_not_match() {
        let mut plan = LogicalPlan::new();
        let l = plan.add(Operator::load("in", None));
        let f = plan.add(filter());
        plan.connect(l, f).unwrap();
        let p = Pattern::chain(&[OperatorType::ForEach, OperatorType::Filter]).unwrap();
        assert!(p.find_matches(&plan, None).unwrap().is_empty());
        assert!(p.match_at(&plan, l).unwrap().is_none());
    }
}
