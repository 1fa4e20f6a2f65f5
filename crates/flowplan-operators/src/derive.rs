//! Output schema derivation for each operator kind.
//!
//! `None` means the schema is unknown. Derivation reads only the operator's
//! own parameters and the already-derived schemas of its data inputs; the
//! plan memoizes the result.

use std::collections::{HashMap, HashSet};

use flowplan_core::error::{Error, Result};
use flowplan_core::id::{Uid, UidGenerator};
use flowplan_core::schema::{merge_schemas, FieldSchema, Schema};

use crate::operator::{ForEach, Operator, OperatorKind, Union};

pub(crate) fn derive_schema(
    op: &mut Operator,
    inputs: &[Option<Schema>],
    input_aliases: &[Option<String>],
    uids: &mut UidGenerator,
) -> Result<Option<Schema>> {
    let describe = op.describe();
    match &mut op.kind {
        OperatorKind::Load(l) => Ok(l.declared.clone()),
        OperatorKind::Union(u) => Ok(union_schema(u, inputs, uids)),
        OperatorKind::Cross | OperatorKind::Join(_) => {
            concat_schema(inputs, input_aliases, &describe)
        }
        OperatorKind::ForEach(fe) => foreach_schema(fe, inputs, &describe),
        OperatorKind::Store(_)
        | OperatorKind::Filter(_)
        | OperatorKind::Distinct
        | OperatorKind::Split
        | OperatorKind::SplitOutput(_)
        | OperatorKind::Sort(_)
        | OperatorKind::Limit(_) => Ok(inputs.first().cloned().flatten()),
    }
}

/// Positional merge of all inputs. Output fields get uids of their own,
/// stable across recomputation, with the merged input fields as parents.
fn union_schema(u: &mut Union, inputs: &[Option<Schema>], uids: &mut UidGenerator) -> Option<Schema> {
    let known: Vec<&Schema> = inputs.iter().map(Option::as_ref).collect::<Option<_>>()?;
    let (first, rest) = known.split_first()?;
    let mut merged = (*first).clone();
    for s in rest {
        merged = merge_schemas(&merged, s)?;
    }

    if u.output_uids.len() != merged.len() {
        u.output_uids = (0..merged.len()).map(|_| uids.next_uid()).collect();
    }
    for (i, field) in merged.fields.iter_mut().enumerate() {
        field.uid = u.output_uids[i];
        let mut parents: Vec<Uid> = Vec::with_capacity(known.len());
        for s in &known {
            if let Some(f) = s.field(i) {
                if !parents.contains(&f.uid) {
                    parents.push(f.uid);
                }
            }
        }
        field.parents = parents;
    }
    Some(merged)
}

/// Concatenation for Cross and Join. Fields of an aliased input are renamed
/// `input::field`; those names must be unique.
fn concat_schema(
    inputs: &[Option<Schema>],
    input_aliases: &[Option<String>],
    describe: &str,
) -> Result<Option<Schema>> {
    let mut fields = Vec::new();
    let mut qualified = HashSet::new();
    for (i, input) in inputs.iter().enumerate() {
        let Some(schema) = input else {
            return Ok(None);
        };
        let prefix = input_aliases.get(i).cloned().flatten();
        for f in &schema.fields {
            let mut f = f.clone();
            if let (Some(p), Some(a)) = (&prefix, &f.alias) {
                let name = format!("{p}::{a}");
                if !qualified.insert(name.clone()) {
                    return Err(Error::DuplicateSchemaAlias {
                        alias: name,
                        operator: describe.to_string(),
                    });
                }
                f.alias = Some(name);
            }
            fields.push(f);
        }
    }
    Ok(Some(Schema::new(fields)))
}

fn foreach_schema(
    fe: &ForEach,
    inputs: &[Option<Schema>],
    describe: &str,
) -> Result<Option<Schema>> {
    let input = inputs.first().cloned().flatten();
    let mut fields: Vec<FieldSchema> = Vec::new();
    // parallel to `fields`: true when the field was produced by flattening
    let mut flattened: Vec<bool> = Vec::new();

    for item in &fe.items {
        if let Some((_, column)) = item.expr.as_projection() {
            let Some(schema) = &input else {
                return Ok(None);
            };
            let field = schema.field(column).ok_or_else(|| {
                Error::Schema(format!(
                    "{describe} projects column ${column} but its input has {} columns",
                    schema.len()
                ))
            })?;
            if item.flatten && field.data_type.is_nested() {
                let Some(nested) = &field.nested else {
                    return Ok(None);
                };
                for inner in &nested.fields {
                    let mut f = inner.clone();
                    f.alias = match (&field.alias, &inner.alias) {
                        (Some(o), Some(i)) => Some(format!("{o}::{i}")),
                        (None, a) => a.clone(),
                        (Some(_), None) => None,
                    };
                    f.parents = vec![field.uid];
                    fields.push(f);
                    flattened.push(true);
                }
            } else {
                let mut f = field.clone();
                if item.alias.is_some() {
                    f.alias = item.alias.clone();
                }
                fields.push(f);
                flattened.push(false);
            }
            continue;
        }

        let projected = item.expr.projections();
        if !projected.is_empty() && input.is_none() {
            return Ok(None);
        }
        let data_type = item.expr.result_type(inputs);
        if item.flatten && data_type.is_nested() {
            return Ok(None);
        }
        let mut parents = Vec::new();
        if let Some(schema) = &input {
            for (_, column) in projected {
                if let Some(f) = schema.field(column) {
                    if !parents.contains(&f.uid) {
                        parents.push(f.uid);
                    }
                }
            }
        }
        fields.push(FieldSchema {
            alias: item.alias.clone(),
            data_type,
            nested: None,
            uid: item.uid,
            parents,
        });
        flattened.push(false);
    }

    // equal aliases are tolerated only when every holder came from flattening
    let mut seen: HashMap<&str, bool> = HashMap::new();
    for (f, from_flatten) in fields.iter().zip(&flattened) {
        let Some(alias) = f.alias.as_deref() else {
            continue;
        };
        match seen.get(alias).copied() {
            Some(true) if *from_flatten => {}
            Some(_) => {
                return Err(Error::DuplicateSchemaAlias {
                    alias: alias.to_string(),
                    operator: describe.to_string(),
                });
            }
            None => {
                seen.insert(alias, *from_flatten);
            }
        }
    }
    Ok(Some(Schema::new(fields)))
}
