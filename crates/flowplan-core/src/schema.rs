//! Logical schema types with field-level lineage.
//!
//! Every `FieldSchema` carries a `uid` naming the logical column and the uids of
//! the field(s) it was derived from (`parents`). Pass-through operators keep
//! fields untouched; operators that create columns allocate new uids and record
//! where they came from. Pruning passes rely on that lineage, so computed
//! schemas must always fill it in.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::id::{Uid, UidGenerator};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    ByteArray,
    Boolean,
    Int,
    Long,
    Float,
    Double,
    DateTime,
    CharArray,
    BigInteger,
    BigDecimal,
    Map,
    Tuple,
    Bag,
}

impl DataType {
    pub fn is_numeric(self) -> bool {
        self.numeric_rank().is_some()
    }

    pub fn is_complex(self) -> bool {
        matches!(self, DataType::Map | DataType::Tuple | DataType::Bag)
    }

    /// Types that may carry a nested schema.
    pub fn is_nested(self) -> bool {
        matches!(self, DataType::Tuple | DataType::Bag)
    }

    fn numeric_rank(self) -> Option<u8> {
        match self {
            DataType::Int => Some(0),
            DataType::Long => Some(1),
            DataType::Float => Some(2),
            DataType::Double => Some(3),
            DataType::BigInteger => Some(4),
            DataType::BigDecimal => Some(5),
            _ => None,
        }
    }

    /// Merge two field types. Equal types merge to themselves, numerics widen,
    /// bytearray yields to the other side, everything else is incompatible.
    pub fn merge(self, other: DataType) -> Option<DataType> {
        if self == other {
            return Some(self);
        }
        if let (Some(a), Some(b)) = (self.numeric_rank(), other.numeric_rank()) {
            return Some(if a >= b { self } else { other });
        }
        match (self, other) {
            (DataType::ByteArray, t) | (t, DataType::ByteArray) => Some(t),
            _ => None,
        }
    }

    pub fn parse(s: &str) -> Option<DataType> {
        let t = match s.trim().to_ascii_lowercase().as_str() {
            "bytearray" | "bytes" => DataType::ByteArray,
            "boolean" | "bool" => DataType::Boolean,
            "int" | "integer" => DataType::Int,
            "long" => DataType::Long,
            "float" => DataType::Float,
            "double" => DataType::Double,
            "datetime" => DataType::DateTime,
            "chararray" | "string" => DataType::CharArray,
            "biginteger" => DataType::BigInteger,
            "bigdecimal" => DataType::BigDecimal,
            "map" => DataType::Map,
            "tuple" => DataType::Tuple,
            "bag" => DataType::Bag,
            _ => return None,
        };
        Some(t)
    }

    pub fn name(self) -> &'static str {
        match self {
            DataType::ByteArray => "bytearray",
            DataType::Boolean => "boolean",
            DataType::Int => "int",
            DataType::Long => "long",
            DataType::Float => "float",
            DataType::Double => "double",
            DataType::DateTime => "datetime",
            DataType::CharArray => "chararray",
            DataType::BigInteger => "biginteger",
            DataType::BigDecimal => "bigdecimal",
            DataType::Map => "map",
            DataType::Tuple => "tuple",
            DataType::Bag => "bag",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub alias: Option<String>,
    pub data_type: DataType,
    /// Inner schema of a tuple, or tuple schema of a bag's elements.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nested: Option<Schema>,
    pub uid: Uid,
    /// Uids of the fields this one was derived from; empty at a source.
    #[serde(default)]
    pub parents: Vec<Uid>,
}

impl FieldSchema {
    /// A field with a placeholder uid; `Schema::assign_uids` replaces it.
    pub fn new(alias: impl Into<String>, data_type: DataType) -> Self {
        Self {
            alias: Some(alias.into()),
            data_type,
            nested: None,
            uid: Uid::new(0),
            parents: Vec::new(),
        }
    }

    pub fn anonymous(data_type: DataType) -> Self {
        Self {
            alias: None,
            data_type,
            nested: None,
            uid: Uid::new(0),
            parents: Vec::new(),
        }
    }

    pub fn with_nested(mut self, nested: Schema) -> Self {
        self.nested = Some(nested);
        self
    }

    pub fn with_uid(mut self, uid: Uid) -> Self {
        self.uid = uid;
        self
    }

    pub fn with_parents(mut self, parents: Vec<Uid>) -> Self {
        self.parents = parents;
        self
    }

    pub fn alias_or_empty(&self) -> &str {
        self.alias.as_deref().unwrap_or("")
    }

    /// The name a field is matched by: the full alias, or the part after the
    /// last `::` disambiguation prefix.
    pub fn matches_alias(&self, name: &str) -> bool {
        match &self.alias {
            Some(a) if a == name => true,
            Some(a) => a.rsplit("::").next() == Some(name) && a.contains("::"),
            None => false,
        }
    }
}

impl fmt::Display for FieldSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(a) = &self.alias {
            write!(f, "{a}:")?;
        }
        write!(f, "{}", self.data_type)?;
        if let Some(n) = &self.nested {
            write!(f, "{n}")?;
        }
        write!(f, "#{}", self.uid.get())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub fields: Vec<FieldSchema>,
}

impl Schema {
    pub fn new(fields: Vec<FieldSchema>) -> Self {
        Self { fields }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field(&self, idx: usize) -> Option<&FieldSchema> {
        self.fields.get(idx)
    }

    /// Position of the field with the given alias. Exact matches win over
    /// suffix matches on `input::field` names; ambiguous suffixes yield `None`.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        if let Some(i) = self
            .fields
            .iter()
            .position(|f| f.alias.as_deref() == Some(name))
        {
            return Some(i);
        }
        let mut hits = self
            .fields
            .iter()
            .enumerate()
            .filter(|(_, f)| f.matches_alias(name))
            .map(|(i, _)| i);
        match (hits.next(), hits.next()) {
            (Some(i), None) => Some(i),
            _ => None,
        }
    }

    pub fn index_of_uid(&self, uid: Uid) -> Option<usize> {
        self.fields.iter().position(|f| f.uid == uid)
    }

    pub fn uids(&self) -> Vec<Uid> {
        self.fields.iter().map(|f| f.uid).collect()
    }

    /// Top-level and nested uids.
    pub fn all_uids(&self) -> Vec<Uid> {
        let mut out = Vec::new();
        for f in &self.fields {
            out.push(f.uid);
            if let Some(n) = &f.nested {
                out.extend(n.all_uids());
            }
        }
        out
    }

    /// Give every field (recursively) a fresh uid.
    pub fn assign_uids(&mut self, uids: &mut UidGenerator) {
        for f in &mut self.fields {
            f.uid = uids.next_uid();
            if let Some(n) = &mut f.nested {
                n.assign_uids(uids);
            }
        }
    }

    /// First alias that appears more than once, ignoring unnamed fields.
    pub fn duplicate_alias(&self) -> Option<&str> {
        let mut seen = std::collections::HashSet::new();
        self.fields
            .iter()
            .filter_map(|f| f.alias.as_deref())
            .find(|a| !seen.insert(*a))
    }

    /// Same aliases, types and nesting, ignoring uids and lineage.
    pub fn shape_eq(&self, other: &Schema) -> bool {
        self.fields.len() == other.fields.len()
            && self.fields.iter().zip(&other.fields).all(|(a, b)| {
                a.alias == b.alias
                    && a.data_type == b.data_type
                    && match (&a.nested, &b.nested) {
                        (Some(x), Some(y)) => x.shape_eq(y),
                        (None, None) => true,
                        _ => false,
                    }
            })
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{field}")?;
        }
        f.write_str(")")
    }
}

/// Positionally merge two field schemas. Nested schemas merge recursively; a
/// nested side that is unknown makes the merged nesting unknown.
pub fn merge_field(a: &FieldSchema, b: &FieldSchema) -> Option<FieldSchema> {
    let data_type = a.data_type.merge(b.data_type)?;
    let nested = match (&a.nested, &b.nested) {
        (Some(x), Some(y)) => Some(merge_schemas(x, y)?),
        _ => None,
    };
    // disagreeing aliases resolve to the first input's, even when it is unnamed
    Some(FieldSchema {
        alias: a.alias.clone(),
        data_type,
        nested,
        uid: a.uid,
        parents: Vec::new(),
    })
}

/// Positional merge of two schemas; `None` when arity or any type differs
/// incompatibly.
pub fn merge_schemas(a: &Schema, b: &Schema) -> Option<Schema> {
    if a.len() != b.len() {
        return None;
    }
    a.fields
        .iter()
        .zip(&b.fields)
        .map(|(x, y)| merge_field(x, y))
        .collect::<Option<Vec<_>>>()
        .map(Schema::new)
}
