//! Map-key pruning annotations for loads.
//!
//! Walks the plan from sinks to sources collecting, per column uid, the map
//! keys that are ever looked up, and the uids whose whole value is needed.
//! Each Load then learns which keys of its map columns are required. A
//! column that is needed whole anywhere is never pruned.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use flowplan_core::error::Result;
use flowplan_core::id::{NodeId, Uid};
use flowplan_core::schema::DataType;
use flowplan_operators::{ColumnUse, LogicalPlan, OperatorKind, OperatorType};
use tracing::{debug, info};

/// Required keys per map column of one Load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapKeyAnnotation {
    pub load: NodeId,
    pub keys: BTreeMap<usize, BTreeSet<String>>,
}

#[derive(Debug, Default)]
struct Requirements {
    keys: HashMap<Uid, BTreeSet<String>>,
    whole: HashSet<Uid>,
}

impl Requirements {
    fn require_whole(&mut self, uids: impl IntoIterator<Item = Uid>) {
        self.whole.extend(uids);
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MapKeysPruneHelper;

impl MapKeysPruneHelper {
    /// Compute annotations without touching the plan. `None` when some
    /// schema on the way is unknown, in which case nothing may be pruned.
    pub fn analyze(&self, plan: &mut LogicalPlan) -> Result<Option<Vec<MapKeyAnnotation>>> {
        let mut req = Requirements::default();
        let order = plan.graph().reverse_topological_order()?;

        for id in &order {
            let id = *id;
            let op_type = plan.op_type(id)?;
            match op_type {
                OperatorType::Store | OperatorType::Distinct => {
                    // rows leave the plan, or are compared, in full
                    for input in plan.input_schemas(id)? {
                        let Some(schema) = input else {
                            debug!(node = %id, "unknown schema, skipping map-key pruning");
                            return Ok(None);
                        };
                        req.require_whole(schema.all_uids());
                    }
                }
                OperatorType::Union => {
                    let Some(schema) = plan.schema(id)? else {
                        return Ok(None);
                    };
                    for field in &schema.fields {
                        if req.whole.contains(&field.uid) {
                            req.require_whole(field.parents.iter().copied());
                        }
                        if let Some(keys) = req.keys.get(&field.uid).cloned() {
                            for p in &field.parents {
                                req.keys.entry(*p).or_default().extend(keys.iter().cloned());
                            }
                        }
                    }
                }
                _ => {}
            }

            let exprs: Vec<_> = plan
                .operator(id)?
                .expressions()
                .into_iter()
                .cloned()
                .collect();
            for expr in exprs {
                for usage in expr.column_uses() {
                    let (input, column) = match &usage {
                        ColumnUse::Whole { input, column } => (*input, *column),
                        ColumnUse::MapKey { input, column, .. } => (*input, *column),
                    };
                    let Some(uid) = plan.projected_uid(id, input, column)? else {
                        debug!(node = %id, "unresolved column, skipping map-key pruning");
                        return Ok(None);
                    };
                    match usage {
                        ColumnUse::Whole { .. } => {
                            req.whole.insert(uid);
                        }
                        ColumnUse::MapKey { key, .. } => {
                            req.keys.entry(uid).or_default().insert(key);
                        }
                    }
                }
            }
        }

        let mut annotations = Vec::new();
        for id in order.iter().rev() {
            if plan.op_type(*id)? != OperatorType::Load {
                continue;
            }
            let Some(schema) = plan.schema(*id)? else {
                continue;
            };
            let mut keys = BTreeMap::new();
            for (i, field) in schema.fields.iter().enumerate() {
                if field.data_type != DataType::Map || req.whole.contains(&field.uid) {
                    continue;
                }
                if let Some(k) = req.keys.get(&field.uid) {
                    keys.insert(i, k.clone());
                }
            }
            if !keys.is_empty() {
                annotations.push(MapKeyAnnotation { load: *id, keys });
            }
        }
        Ok(Some(annotations))
    }

    /// Analyze and attach the annotations to their loads. Returns how many
    /// loads were annotated.
    pub fn run(&self, plan: &mut LogicalPlan) -> Result<usize> {
        let Some(annotations) = self.analyze(plan)? else {
            return Ok(0);
        };
        for a in &annotations {
            if let OperatorKind::Load(load) = &mut plan.operator_mut(a.load)?.kind {
                load.required_map_keys = Some(a.keys.clone());
            }
        }
        if !annotations.is_empty() {
            info!(loads = annotations.len(), "annotated loads with required map keys");
        }
        Ok(annotations.len())
    }
}
