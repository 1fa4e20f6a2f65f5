//! Generic DAG container with ordered, positional edges.
//!
//! Nodes live in an arena keyed by `NodeId`; insertion order is kept so every
//! traversal is deterministic. Edges are stored twice (successor lists and
//! predecessor lists) because positions are meaningful: input 0 of a join is
//! its left side, operand 0 of a comparison is its left-hand side, and so on.
//!
//! Membership is by key, never by content. Content comparison only happens in
//! [`OperatorGraph::is_equal`], which pattern tests and plan assertions use.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::error::{Error, Result};
use crate::id::NodeId;

/// Content equality that ignores identity (keys) and cached derived state.
pub trait StructuralEq {
    fn structurally_eq(&self, other: &Self) -> bool;
}

#[derive(Debug, Clone)]
pub struct OperatorGraph<T> {
    nodes: HashMap<NodeId, T>,
    order: Vec<NodeId>,
    succs: HashMap<NodeId, Vec<NodeId>>,
    preds: HashMap<NodeId, Vec<NodeId>>,
    next_id: u64,
}

impl<T> Default for OperatorGraph<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> OperatorGraph<T> {
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            order: Vec::new(),
            succs: HashMap::new(),
            preds: HashMap::new(),
            next_id: 0,
        }
    }

    /// Add a node with no edges and return its freshly allocated key.
    pub fn add(&mut self, value: T) -> NodeId {
        let id = NodeId::new(self.next_id);
        self.next_id += 1;
        self.nodes.insert(id, value);
        self.order.push(id);
        id
    }

    /// Add a node under a caller-chosen key.
    pub fn insert(&mut self, id: NodeId, value: T) -> Result<()> {
        if self.nodes.contains_key(&id) {
            return Err(Error::DuplicateNode(id));
        }
        self.next_id = self.next_id.max(id.get() + 1);
        self.nodes.insert(id, value);
        self.order.push(id);
        Ok(())
    }

    /// Remove a node. The caller must disconnect every incident edge first.
    pub fn remove(&mut self, id: NodeId) -> Result<T> {
        if !self.nodes.contains_key(&id) {
            return Err(Error::UnknownNode(id));
        }
        let incident = self.predecessors(id).len() + self.successors(id).len();
        if incident > 0 {
            return Err(Error::InvalidState(format!(
                "cannot remove {id}: it still has {incident} incident edge(s)"
            )));
        }
        self.succs.remove(&id);
        self.preds.remove(&id);
        self.order.retain(|n| *n != id);
        self.nodes.remove(&id).ok_or(Error::UnknownNode(id))
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn get(&self, id: NodeId) -> Option<&T> {
        self.nodes.get(&id)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut T> {
        self.nodes.get_mut(&id)
    }

    pub fn node(&self, id: NodeId) -> Result<&T> {
        self.nodes.get(&id).ok_or(Error::UnknownNode(id))
    }

    pub fn node_mut(&mut self, id: NodeId) -> Result<&mut T> {
        self.nodes.get_mut(&id).ok_or(Error::UnknownNode(id))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Keys in insertion order.
    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.order.iter().copied()
    }

    /// Nodes in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &T)> + '_ {
        self.order
            .iter()
            .filter_map(move |id| self.nodes.get(id).map(|n| (*id, n)))
    }

    /// Append an edge at the end of `from`'s outputs and `to`'s inputs.
    pub fn connect(&mut self, from: NodeId, to: NodeId) -> Result<()> {
        let from_pos = self.successors(from).len();
        let to_pos = self.predecessors(to).len();
        self.connect_at(from, from_pos, to, to_pos)
    }

    /// Insert an edge at explicit output/input slots.
    pub fn connect_at(
        &mut self,
        from: NodeId,
        from_pos: usize,
        to: NodeId,
        to_pos: usize,
    ) -> Result<()> {
        for id in [from, to] {
            if !self.contains(id) {
                return Err(Error::UnknownNode(id));
            }
        }
        if from == to {
            return Err(Error::InvalidState(format!("self edge on {from}")));
        }
        if self.is_connected(from, to) {
            return Err(Error::InvalidState(format!(
                "{from} is already connected to {to}"
            )));
        }
        let outs = self.succs.entry(from).or_default();
        if from_pos > outs.len() {
            return Err(Error::InvalidState(format!(
                "output slot {from_pos} out of range for {from} ({} outputs)",
                outs.len()
            )));
        }
        let ins_len = self.preds.get(&to).map_or(0, Vec::len);
        if to_pos > ins_len {
            return Err(Error::InvalidState(format!(
                "input slot {to_pos} out of range for {to} ({ins_len} inputs)"
            )));
        }
        outs.insert(from_pos, to);
        self.preds.entry(to).or_default().insert(to_pos, from);
        Ok(())
    }

    /// Remove an edge, returning the `(from_pos, to_pos)` slots it occupied.
    pub fn disconnect(&mut self, from: NodeId, to: NodeId) -> Result<(usize, usize)> {
        let from_pos = self
            .succs
            .get(&from)
            .and_then(|s| s.iter().position(|n| *n == to))
            .ok_or(Error::NotConnected { from, to })?;
        let to_pos = self
            .preds
            .get(&to)
            .and_then(|p| p.iter().position(|n| *n == from))
            .ok_or(Error::NotConnected { from, to })?;
        if let Some(s) = self.succs.get_mut(&from) {
            s.remove(from_pos);
        }
        if let Some(p) = self.preds.get_mut(&to) {
            p.remove(to_pos);
        }
        Ok((from_pos, to_pos))
    }

    pub fn is_connected(&self, from: NodeId, to: NodeId) -> bool {
        self.successors(from).contains(&to)
    }

    pub fn predecessors(&self, id: NodeId) -> &[NodeId] {
        self.preds.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn successors(&self, id: NodeId) -> &[NodeId] {
        self.succs.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn sources(&self) -> Vec<NodeId> {
        self.ids()
            .filter(|id| self.predecessors(*id).is_empty())
            .collect()
    }

    pub fn sinks(&self) -> Vec<NodeId> {
        self.ids()
            .filter(|id| self.successors(*id).is_empty())
            .collect()
    }

    /// True if `to` is reachable from `from` following successor edges.
    /// A node reaches itself.
    pub fn path_exists(&self, from: NodeId, to: NodeId) -> bool {
        let mut seen = HashSet::new();
        let mut stack = vec![from];
        while let Some(n) = stack.pop() {
            if n == to {
                return true;
            }
            if seen.insert(n) {
                stack.extend(self.successors(n).iter().copied());
            }
        }
        false
    }

    /// Every node reachable from `start` (inclusive) following successors.
    pub fn descendants(&self, start: NodeId) -> Vec<NodeId> {
        self.walk(start, |g, n| g.successors(n))
    }

    /// Every node reaching `start` (inclusive) following predecessors.
    pub fn ancestors(&self, start: NodeId) -> Vec<NodeId> {
        self.walk(start, |g, n| g.predecessors(n))
    }

    fn walk<'a, F>(&'a self, start: NodeId, next: F) -> Vec<NodeId>
    where
        F: Fn(&'a Self, NodeId) -> &'a [NodeId],
    {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        let mut stack = vec![start];
        while let Some(n) = stack.pop() {
            if !self.contains(n) || !seen.insert(n) {
                continue;
            }
            out.push(n);
            // push in reverse so that the first edge is visited first
            stack.extend(next(self, n).iter().rev().copied());
        }
        out
    }

    /// Kahn's algorithm with insertion-order tie breaking.
    pub fn topological_order(&self) -> Result<Vec<NodeId>> {
        let mut in_degree: HashMap<NodeId, usize> = self
            .ids()
            .map(|id| (id, self.predecessors(id).len()))
            .collect();
        let mut ready: VecDeque<NodeId> = self.sources().into_iter().collect();
        let mut out = Vec::with_capacity(self.len());

        while let Some(n) = ready.pop_front() {
            out.push(n);
            for s in self.successors(n) {
                if let Some(deg) = in_degree.get_mut(s) {
                    *deg -= 1;
                    if *deg == 0 {
                        ready.push_back(*s);
                    }
                }
            }
        }

        if out.len() != self.len() {
            return Err(Error::InvalidState(format!(
                "graph contains a cycle ({} of {} nodes ordered)",
                out.len(),
                self.len()
            )));
        }
        Ok(out)
    }

    /// Sinks first, sources last.
    pub fn reverse_topological_order(&self) -> Result<Vec<NodeId>> {
        let mut order = self.topological_order()?;
        order.reverse();
        Ok(order)
    }

    pub fn has_cycle(&self) -> bool {
        self.topological_order().is_err()
    }

    /// Check that both edge maps agree and reference member nodes only.
    pub fn check_consistency(&self) -> Result<()> {
        for (from, outs) in &self.succs {
            if !self.contains(*from) && !outs.is_empty() {
                return Err(Error::InvalidState(format!(
                    "edge source {from} is not a member"
                )));
            }
            for to in outs {
                if !self.contains(*to) {
                    return Err(Error::InvalidState(format!(
                        "edge {from} -> {to} targets a non-member"
                    )));
                }
                if !self.predecessors(*to).contains(from) {
                    return Err(Error::InvalidState(format!(
                        "edge {from} -> {to} missing from predecessor list"
                    )));
                }
            }
        }
        for (to, ins) in &self.preds {
            for from in ins {
                if !self.successors(*from).contains(to) {
                    return Err(Error::InvalidState(format!(
                        "edge {from} -> {to} missing from successor list"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Splice `node` (already a member, unconnected) into the edge `pred -> succ`,
    /// keeping the slots the old edge occupied.
    pub fn insert_between(&mut self, pred: NodeId, node: NodeId, succ: NodeId) -> Result<()> {
        let (from_pos, to_pos) = self.disconnect(pred, succ)?;
        self.connect_at(pred, from_pos, node, self.predecessors(node).len())?;
        self.connect_at(node, self.successors(node).len(), succ, to_pos)
    }

    /// Remove a node with at most one input, wiring its input to each of its
    /// outputs in the slots the node occupied.
    pub fn remove_and_reconnect(&mut self, node: NodeId) -> Result<T> {
        self.splice_out(node)?;
        self.remove(node)
    }

    /// Like `remove_and_reconnect`, but the node stays a member with no edges.
    pub fn splice_out(&mut self, node: NodeId) -> Result<()> {
        if !self.contains(node) {
            return Err(Error::UnknownNode(node));
        }
        let preds = self.predecessors(node).to_vec();
        if preds.len() > 1 {
            return Err(Error::InvalidState(format!(
                "cannot splice out {node}: it has {} inputs",
                preds.len()
            )));
        }
        let succs = self.successors(node).to_vec();
        let pred_slot = match preds.first() {
            Some(p) => Some((*p, self.disconnect(*p, node)?.0)),
            None => None,
        };
        for (i, s) in succs.iter().enumerate() {
            let (_, to_pos) = self.disconnect(node, *s)?;
            if let Some((p, from_pos)) = pred_slot {
                self.connect_at(p, from_pos + i, *s, to_pos)?;
            }
        }
        Ok(())
    }
}

impl<T: Clone> OperatorGraph<T> {
    /// Copy every node reachable from `root` in `src` into `self` under fresh
    /// keys, rebuilding edges among the copied nodes. Returns the new root.
    pub fn absorb_reachable(&mut self, src: &OperatorGraph<T>, root: NodeId) -> Result<NodeId> {
        let reachable = src.descendants(root);
        if reachable.is_empty() {
            return Err(Error::UnknownNode(root));
        }
        let mut map = HashMap::with_capacity(reachable.len());
        for old in &reachable {
            let value = src.node(*old)?.clone();
            map.insert(*old, self.add(value));
        }
        for old in &reachable {
            for s in src.successors(*old) {
                if let (Some(a), Some(b)) = (map.get(old), map.get(s)) {
                    self.connect(*a, *b)?;
                }
            }
        }
        map.get(&root).copied().ok_or(Error::UnknownNode(root))
    }

    /// New graph containing the sub-DAG reachable from `root`.
    pub fn copy_reachable(&self, root: NodeId) -> Result<(OperatorGraph<T>, NodeId)> {
        let mut g = OperatorGraph::new();
        let new_root = g.absorb_reachable(self, root)?;
        Ok((g, new_root))
    }

    /// Deep copy under fresh keys, returning the identity map old -> new.
    pub fn clone_with_map(&self) -> Result<(OperatorGraph<T>, HashMap<NodeId, NodeId>)> {
        let mut g = OperatorGraph::new();
        let mut map = HashMap::with_capacity(self.len());
        for (id, value) in self.iter() {
            map.insert(id, g.add(value.clone()));
        }
        for id in self.ids() {
            for s in self.successors(id) {
                g.connect(map[&id], map[s])?;
            }
        }
        // predecessor order is not implied by successor iteration order
        for id in self.ids() {
            let ordered: Vec<NodeId> = self.predecessors(id).iter().map(|p| map[p]).collect();
            g.preds.insert(map[&id], ordered);
        }
        Ok((g, map))
    }
}

/// Node correspondence built up while comparing two graphs.
#[derive(Debug, Clone, Default)]
struct Mapping {
    forward: HashMap<NodeId, NodeId>,
    backward: HashMap<NodeId, NodeId>,
}

impl<T: StructuralEq> OperatorGraph<T> {
    /// Same node contents and same positional topology, regardless of keys
    /// and of the order nodes were added in. Sources are paired by trying
    /// each unused candidate, backtracking when a pairing fails later.
    pub fn is_equal(&self, other: &OperatorGraph<T>) -> bool {
        if self.len() != other.len() {
            return false;
        }
        let (a_src, b_src) = (self.sources(), other.sources());
        if a_src.len() != b_src.len() {
            return false;
        }
        let mut used = vec![false; b_src.len()];
        self.pair_sources(other, &a_src, &b_src, &mut used, Mapping::default())
    }

    fn pair_sources(
        &self,
        other: &OperatorGraph<T>,
        a_src: &[NodeId],
        b_src: &[NodeId],
        used: &mut [bool],
        mapping: Mapping,
    ) -> bool {
        let Some((&a, rest)) = a_src.split_first() else {
            return self.positions_agree(other, &mapping);
        };
        for (i, &b) in b_src.iter().enumerate() {
            if used[i] {
                continue;
            }
            let mut trial = mapping.clone();
            if !self.extend_mapping(other, a, b, &mut trial) {
                continue;
            }
            used[i] = true;
            if self.pair_sources(other, rest, b_src, used, trial) {
                return true;
            }
            used[i] = false;
        }
        false
    }

    /// Map `a -> b` and everything downstream of them slot by slot.
    fn extend_mapping(
        &self,
        other: &OperatorGraph<T>,
        a: NodeId,
        b: NodeId,
        mapping: &mut Mapping,
    ) -> bool {
        let mut stack = vec![(a, b)];
        while let Some((a, b)) = stack.pop() {
            match (mapping.forward.get(&a), mapping.backward.get(&b)) {
                (Some(mapped), _) if *mapped != b => return false,
                (Some(_), _) => continue,
                (None, Some(_)) => return false,
                (None, None) => {}
            }
            let (Some(na), Some(nb)) = (self.get(a), other.get(b)) else {
                return false;
            };
            if !na.structurally_eq(nb) {
                return false;
            }
            let (sa, sb) = (self.successors(a), other.successors(b));
            if sa.len() != sb.len() || self.predecessors(a).len() != other.predecessors(b).len()
            {
                return false;
            }
            mapping.forward.insert(a, b);
            mapping.backward.insert(b, a);
            stack.extend(sa.iter().copied().zip(sb.iter().copied()));
        }
        true
    }

    fn positions_agree(&self, other: &OperatorGraph<T>, mapping: &Mapping) -> bool {
        if mapping.forward.len() != self.len() {
            return false;
        }
        mapping.forward.iter().all(|(a, b)| {
            self.predecessors(*a)
                .iter()
                .map(|p| mapping.forward.get(p))
                .eq(other.predecessors(*b).iter().map(Some))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    impl StructuralEq for &'static str {
        fn structurally_eq(&self, other: &Self) -> bool {
            self == other
        }
    }

    fn diamond() -> (OperatorGraph<&'static str>, [NodeId; 4]) {
        let mut g = OperatorGraph::new();
        let a = g.add("a");
        let b = g.add("b");
        let c = g.add("c");
        let d = g.add("d");
        g.connect(a, b).unwrap();
        g.connect(a, c).unwrap();
        g.connect(b, d).unwrap();
        g.connect(c, d).unwrap();
        (g, [a, b, c, d])
    }

    #[test]
    fn sources_and_sinks() {
        let (g, [a, _, _, d]) = diamond();
        assert_eq!(g.sources(), vec![a]);
        assert_eq!(g.sinks(), vec![d]);
    }

    #[test]
    fn remove_requires_disconnect() {
        let (mut g, [a, b, ..]) = diamond();
        assert!(matches!(g.remove(b), Err(Error::InvalidState(_))));
        g.disconnect(a, b).unwrap();
        let d = g.successors(b)[0];
        g.disconnect(b, d).unwrap();
        assert_eq!(g.remove(b).unwrap(), "b");
        assert!(!g.contains(b));
    }

    #[test]
    fn disconnect_reports_positions_and_missing_edges() {
        let (mut g, [a, b, c, d]) = diamond();
        assert_eq!(g.disconnect(c, d).unwrap(), (0, 1));
        assert!(matches!(
            g.disconnect(c, d),
            Err(Error::NotConnected { .. })
        ));
        assert_eq!(g.disconnect(a, b).unwrap(), (0, 0));
        assert_eq!(g.successors(a), &[c]);
    }

    #[test]
    fn connect_then_disconnect_restores_lists() {
        let (mut g, [a, b, c, d]) = diamond();
        let before_succ = g.successors(a).to_vec();
        let before_pred = g.predecessors(d).to_vec();
        let e = g.add("e");
        g.connect_at(a, 1, e, 0).unwrap();
        g.connect_at(e, 0, d, 1).unwrap();
        assert_eq!(g.successors(a), &[b, e, c]);
        assert_eq!(g.predecessors(d), &[b, e, c]);
        assert_eq!(g.disconnect(e, d).unwrap(), (0, 1));
        assert_eq!(g.disconnect(a, e).unwrap(), (1, 0));
        assert_eq!(g.successors(a), before_succ.as_slice());
        assert_eq!(g.predecessors(d), before_pred.as_slice());
    }

    #[test]
    fn duplicate_edges_and_nodes_are_rejected() {
        let (mut g, [a, b, ..]) = diamond();
        assert!(matches!(g.connect(a, b), Err(Error::InvalidState(_))));
        assert!(matches!(g.insert(a, "x"), Err(Error::DuplicateNode(_))));
        assert!(matches!(g.connect_at(a, 9, b, 0), Err(Error::InvalidState(_))));
    }

    #[test]
    fn topological_order_is_deterministic_and_detects_cycles() {
        let (mut g, [a, b, c, d]) = diamond();
        assert_eq!(g.topological_order().unwrap(), vec![a, b, c, d]);
        assert_eq!(g.reverse_topological_order().unwrap(), vec![d, c, b, a]);
        assert!(g.path_exists(a, d));
        assert!(!g.path_exists(d, a));
        g.connect(d, a).unwrap();
        assert!(g.has_cycle());
    }

    #[test]
    fn insert_between_and_remove_and_reconnect_keep_slots() {
        let (mut g, [a, b, c, d]) = diamond();
        let x = g.add("x");
        g.insert_between(c, x, d).unwrap();
        assert_eq!(g.predecessors(d), &[b, x]);
        assert_eq!(g.predecessors(x), &[c]);
        assert_eq!(g.remove_and_reconnect(x).unwrap(), "x");
        assert_eq!(g.predecessors(d), &[b, c]);
        assert_eq!(g.successors(c), &[d]);
        g.check_consistency().unwrap();
    }

    #[test]
    fn clone_with_map_is_equal_and_independent() {
        let (g, [a, ..]) = diamond();
        let (mut h, map) = g.clone_with_map().unwrap();
        assert!(h.is_equal(&g));
        let extra = h.add("e");
        h.connect(map[&a], extra).unwrap();
        assert!(!h.is_equal(&g));
        assert_eq!(g.len(), 4);
    }

    #[test]
    fn is_equal_respects_positions() {
        let mut g = OperatorGraph::new();
        let l = g.add("l");
        let r = g.add("r");
        let j = g.add("j");
        g.connect(l, j).unwrap();
        g.connect(r, j).unwrap();

        let mut h = OperatorGraph::new();
        let l2 = h.add("l");
        let r2 = h.add("r");
        let j2 = h.add("j");
        h.connect(r2, j2).unwrap();
        h.connect(l2, j2).unwrap();
        assert!(!g.is_equal(&h));
    }

    #[test]
    fn is_equal_ignores_source_insertion_order() {
        let mut g = OperatorGraph::new();
        let l = g.add("l");
        let r = g.add("r");
        let j = g.add("j");
        g.connect(l, j).unwrap();
        g.connect(r, j).unwrap();

        let mut h = OperatorGraph::new();
        let r2 = h.add("r");
        let l2 = h.add("l");
        let j2 = h.add("j");
        h.connect(l2, j2).unwrap();
        h.connect(r2, j2).unwrap();
        assert!(g.is_equal(&h));
        assert!(h.is_equal(&g));

        // identical sources: only the pairing that keeps slots lines up
        let mut a = OperatorGraph::new();
        let (x, y, u) = (a.add("s"), a.add("s"), a.add("u"));
        let t = a.add("t");
        a.connect(x, u).unwrap();
        a.connect(y, u).unwrap();
        a.connect(y, t).unwrap();
        let mut b = OperatorGraph::new();
        let (y2, x2, u2) = (b.add("s"), b.add("s"), b.add("u"));
        let t2 = b.add("t");
        b.connect(x2, u2).unwrap();
        b.connect(y2, u2).unwrap();
        b.connect(y2, t2).unwrap();
        assert!(a.is_equal(&b));
    }

    #[test]
    fn copy_reachable_takes_only_the_subtree() {
        let (g, [_, b, ..]) = diamond();
        let (sub, root) = g.copy_reachable(b).unwrap();
        assert_eq!(sub.len(), 2);
        assert_eq!(sub.node(root).unwrap(), &"b");
        assert_eq!(sub.successors(root).len(), 1);
    }
}
