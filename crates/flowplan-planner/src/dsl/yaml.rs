//! YAML script front end.
//!
//! Example:
//! ```yaml
//! optimizer:
//!   max_iterations: 50
//! statements:
//!   - op: load
//!     alias: users
//!     path: data/users
//!     schema:
//!       - { name: name,  type: chararray }
//!       - { name: age,   type: int }
//!       - { name: props, type: map }
//!   - op: filter
//!     alias: adults
//!     input: users
//!     by: { gt: [ { col: age }, 17 ] }
//!   - op: foreach
//!     alias: out
//!     input: adults
//!     generate:
//!       - { expr: { col: name } }
//!       - { expr: { lookup: [ { col: props }, city ] }, as: city }
//!   - op: store
//!     input: out
//!     path: out/adults
//! ```
//!
//! Expressions are single-key maps (`{and: [a, b]}`, `{col: age}`,
//! `{int: 3}`) or bare scalars, which are literals.

use flowplan_core::config::OptimizerConfig;
use flowplan_core::error::{Error, Result};
use flowplan_core::id::NodeId;
use flowplan_core::schema::{DataType, FieldSchema, Schema};
use flowplan_core::types::Value;
use flowplan_operators::{ArithOp, CompareOp, Expr, JoinType};
use serde::{Deserialize, Serialize};
use serde_yaml::Value as Yaml;

use crate::builder::{ItemSpec, PlanBuilder};
use crate::session::Session;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Script {
    /// Overrides applied on top of the environment's optimizer settings.
    #[serde(default)]
    pub optimizer: Option<Yaml>,
    pub statements: Vec<Statement>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Statement {
    Load {
        alias: String,
        path: String,
        #[serde(default)]
        schema: Option<Vec<FieldDef>>,
    },
    Filter {
        alias: String,
        input: String,
        by: Yaml,
    },
    Foreach {
        alias: String,
        input: String,
        generate: Vec<GenerateDef>,
    },
    Join {
        alias: String,
        inputs: Vec<JoinInputDef>,
        #[serde(default, rename = "type")]
        join_type: JoinType,
    },
    Cross {
        alias: String,
        inputs: Vec<String>,
    },
    Union {
        alias: String,
        inputs: Vec<String>,
    },
    Distinct {
        alias: String,
        input: String,
    },
    Split {
        input: String,
        into: Vec<SplitBranchDef>,
    },
    Sort {
        alias: String,
        input: String,
        by: Vec<SortKeyDef>,
    },
    Limit {
        alias: String,
        input: String,
        count: u64,
    },
    Store {
        input: String,
        path: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    /// Inner fields of a tuple, or of a bag's tuples.
    #[serde(default)]
    pub fields: Option<Vec<FieldDef>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateDef {
    pub expr: Yaml,
    #[serde(default)]
    pub flatten: bool,
    #[serde(default, rename = "as")]
    pub alias: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinInputDef {
    pub input: String,
    pub by: Vec<Yaml>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitBranchDef {
    pub alias: String,
    #[serde(rename = "if")]
    pub condition: Yaml,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SortKeyDef {
    pub expr: Yaml,
    #[serde(default)]
    pub desc: bool,
}

pub fn to_schema(fields: &[FieldDef]) -> Result<Schema> {
    fields
        .iter()
        .map(|f| {
            let data_type = DataType::parse(&f.data_type).ok_or_else(|| {
                Error::Schema(format!("unknown type '{}' for field '{}'", f.data_type, f.name))
            })?;
            let mut field = FieldSchema::new(f.name.clone(), data_type);
            if let Some(inner) = &f.fields {
                field = field.with_nested(to_schema(inner)?);
            }
            Ok(field)
        })
        .collect::<Result<Vec<_>>>()
        .map(Schema::new)
}

fn bad_expr(v: &Yaml, why: &str) -> Error {
    let text = serde_yaml::to_string(v).unwrap_or_default();
    Error::Plan(format!("invalid expression ({why}): {}", text.trim()))
}

fn operands<const N: usize>(v: &Yaml, arg: &Yaml) -> Result<[Expr; N]> {
    let items = arg
        .as_sequence()
        .filter(|s| s.len() == N)
        .ok_or_else(|| bad_expr(v, &format!("expected {N} operands")))?;
    let parsed = items.iter().map(parse_expr).collect::<Result<Vec<_>>>()?;
    parsed
        .try_into()
        .map_err(|_| bad_expr(v, "operand count"))
}

/// Turn a YAML expression into an (unresolved) `Expr`.
pub fn parse_expr(v: &Yaml) -> Result<Expr> {
    match v {
        Yaml::Null => Ok(Expr::Const(Value::Null)),
        Yaml::Bool(b) => Ok(Expr::lit(*b)),
        Yaml::Number(n) => number(v, n),
        Yaml::String(s) => Ok(Expr::lit(s.as_str())),
        Yaml::Mapping(m) if m.len() == 1 => {
            let Some((key, arg)) = m.iter().next() else {
                return Err(bad_expr(v, "empty mapping"));
            };
            let key = key.as_str().ok_or_else(|| bad_expr(v, "operator must be a string"))?;
            let binary = |f: fn(Expr, Expr) -> Expr| -> Result<Expr> {
                let [a, b] = operands::<2>(v, arg)?;
                Ok(f(a, b))
            };
            match key {
                "col" => match arg {
                    Yaml::String(name) => Ok(Expr::named(name.as_str())),
                    Yaml::Number(n) => n
                        .as_u64()
                        .map(|i| Expr::named(format!("${i}")))
                        .ok_or_else(|| bad_expr(v, "column position")),
                    _ => Err(bad_expr(v, "column reference")),
                },
                "int" => arg
                    .as_i64()
                    .and_then(|i| i32::try_from(i).ok())
                    .map(Expr::lit)
                    .ok_or_else(|| bad_expr(v, "int literal")),
                "long" => arg
                    .as_i64()
                    .map(Expr::lit)
                    .ok_or_else(|| bad_expr(v, "long literal")),
                "double" => arg
                    .as_f64()
                    .map(Expr::lit)
                    .ok_or_else(|| bad_expr(v, "double literal")),
                "float" => arg
                    .as_f64()
                    .map(|f| Expr::Const(Value::Float(f as f32)))
                    .ok_or_else(|| bad_expr(v, "float literal")),
                "str" | "chararray" => arg
                    .as_str()
                    .map(Expr::lit)
                    .ok_or_else(|| bad_expr(v, "string literal")),
                "bool" => arg
                    .as_bool()
                    .map(Expr::lit)
                    .ok_or_else(|| bad_expr(v, "boolean literal")),
                "null" => Ok(Expr::Const(Value::Null)),
                "not" => Ok(parse_expr(arg)?.not()),
                "is_null" => Ok(parse_expr(arg)?.is_null()),
                "neg" => Ok(Expr::Neg(Box::new(parse_expr(arg)?))),
                "and" => binary(Expr::and),
                "or" => binary(Expr::or),
                "eq" => binary(|a, b| a.cmp(CompareOp::Eq, b)),
                "ne" => binary(|a, b| a.cmp(CompareOp::Ne, b)),
                "lt" => binary(|a, b| a.cmp(CompareOp::Lt, b)),
                "le" => binary(|a, b| a.cmp(CompareOp::Le, b)),
                "gt" => binary(|a, b| a.cmp(CompareOp::Gt, b)),
                "ge" => binary(|a, b| a.cmp(CompareOp::Ge, b)),
                "add" => binary(|a, b| a.arith(ArithOp::Add, b)),
                "sub" => binary(|a, b| a.arith(ArithOp::Sub, b)),
                "mul" => binary(|a, b| a.arith(ArithOp::Mul, b)),
                "div" => binary(|a, b| a.arith(ArithOp::Div, b)),
                "mod" => binary(|a, b| a.arith(ArithOp::Mod, b)),
                "lookup" => {
                    let items = arg
                        .as_sequence()
                        .filter(|s| s.len() == 2)
                        .ok_or_else(|| bad_expr(v, "lookup takes [map, key]"))?;
                    let key = items[1]
                        .as_str()
                        .ok_or_else(|| bad_expr(v, "map key must be a string"))?;
                    Ok(parse_expr(&items[0])?.lookup(key))
                }
                other => Err(bad_expr(v, &format!("unknown operator '{other}'"))),
            }
        }
        _ => Err(bad_expr(v, "expected a scalar or a single-key map")),
    }
}

fn number(v: &Yaml, n: &serde_yaml::Number) -> Result<Expr> {
    if let Some(i) = n.as_i64() {
        return Ok(match i32::try_from(i) {
            Ok(small) => Expr::lit(small),
            Err(_) => Expr::lit(i),
        });
    }
    n.as_f64()
        .map(Expr::lit)
        .ok_or_else(|| bad_expr(v, "number out of range"))
}

/// Apply one statement to a builder, locations taken as written.
pub fn apply(builder: &mut PlanBuilder, stmt: &Statement) -> Result<Vec<NodeId>> {
    let one = |id: NodeId| vec![id];
    Ok(match stmt {
        Statement::Load {
            alias,
            path,
            schema,
        } => {
            let schema = schema.as_deref().map(to_schema).transpose()?;
            one(builder.load(alias, path, schema)?)
        }
        Statement::Filter { alias, input, by } => one(builder.filter(alias, input, parse_expr(by)?)?),
        Statement::Foreach {
            alias,
            input,
            generate,
        } => {
            let items = generate
                .iter()
                .map(|g| {
                    Ok(ItemSpec {
                        expr: parse_expr(&g.expr)?,
                        flatten: g.flatten,
                        alias: g.alias.clone(),
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            one(builder.foreach(alias, input, items)?)
        }
        Statement::Join {
            alias,
            inputs,
            join_type,
        } => {
            let keyed = inputs
                .iter()
                .map(|i| {
                    let keys = i.by.iter().map(parse_expr).collect::<Result<Vec<_>>>()?;
                    Ok((i.input.as_str(), keys))
                })
                .collect::<Result<Vec<_>>>()?;
            one(builder.join(alias, &keyed, *join_type)?)
        }
        Statement::Cross { alias, inputs } => {
            let names: Vec<&str> = inputs.iter().map(String::as_str).collect();
            one(builder.cross(alias, &names)?)
        }
        Statement::Union { alias, inputs } => {
            let names: Vec<&str> = inputs.iter().map(String::as_str).collect();
            one(builder.union(alias, &names)?)
        }
        Statement::Distinct { alias, input } => one(builder.distinct(alias, input)?),
        Statement::Split { input, into } => {
            let branches = into
                .iter()
                .map(|b| Ok((b.alias.clone(), parse_expr(&b.condition)?)))
                .collect::<Result<Vec<_>>>()?;
            builder.split(input, branches)?
        }
        Statement::Sort { alias, input, by } => {
            let keys = by
                .iter()
                .map(|k| Ok((parse_expr(&k.expr)?, !k.desc)))
                .collect::<Result<Vec<_>>>()?;
            one(builder.sort(alias, input, keys)?)
        }
        Statement::Limit {
            alias,
            input,
            count,
        } => one(builder.limit(alias, input, *count)?),
        Statement::Store { input, path } => one(builder.store(input, path)?),
    })
}

/// Environment settings with the script's `optimizer:` block laid on top.
pub fn optimizer_config(overrides: Option<&Yaml>) -> Result<OptimizerConfig> {
    let base = OptimizerConfig::from_env();
    let Some(overrides) = overrides else {
        return Ok(base);
    };
    let Yaml::Mapping(over) = overrides else {
        return Err(Error::Config("optimizer block must be a mapping".into()));
    };
    let mut merged = serde_yaml::to_value(&base).map_err(|e| Error::Config(e.to_string()))?;
    if let Yaml::Mapping(m) = &mut merged {
        for (k, v) in over {
            m.insert(k.clone(), v.clone());
        }
    }
    let config: OptimizerConfig =
        serde_yaml::from_value(merged).map_err(|e| Error::Config(e.to_string()))?;
    config.validate()?;
    Ok(config)
}

#[derive(Debug)]
pub struct ParsedScript {
    pub session: Session,
    pub config: OptimizerConfig,
}

/// Parse a script into a fresh session rooted at `current_dir`.
pub fn parse_script(src: &str, current_dir: &str) -> Result<ParsedScript> {
    parse_script_into(src, Session::new(current_dir))
}

/// Parse a script into `session` and compile the batch.
pub fn parse_script_into(src: &str, mut session: Session) -> Result<ParsedScript> {
    let doc: Script =
        serde_yaml::from_str(src).map_err(|e| Error::Plan(format!("script: {e}")))?;
    let config = optimizer_config(doc.optimizer.as_ref())?;
    for stmt in &doc.statements {
        session.register(stmt)?;
    }
    session.compile_batch()?;
    Ok(ParsedScript { session, config })
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowplan_core::config::RescanPolicy;
    use flowplan_operators::OperatorType;

    const SCRIPT: &str = r#"
optimizer:
  max_iterations: 7
  rescan: whole
statements:
  - op: load
    alias: users
    path: data/users
    schema:
      - { name: name, type: chararray }
      - { name: age, type: int }
      - { name: props, type: map }
  - op: filter
    alias: adults
    input: users
    by: { and: [ { gt: [ { col: age }, 17 ] }, { not: { is_null: { col: name } } } ] }
  - op: foreach
    alias: out
    input: adults
    generate:
      - { expr: { col: name } }
      - { expr: { lookup: [ { col: props }, city ] }, as: city }
  - op: store
    input: out
    path: out/adults
"#;

    #[test]
    fn parses_statements_and_optimizer_block() {
        let parsed = parse_script(SCRIPT, "/work").unwrap();
        assert_eq!(parsed.config.max_iterations, 7);
        assert_eq!(parsed.config.rescan, RescanPolicy::Whole);

        let session = parsed.session;
        let plan = session.plan();
        assert_eq!(plan.len(), 4);
        plan.validate().unwrap();
        let users = session.node("users").unwrap();
        assert_eq!(
            plan.operator(users).unwrap().location(),
            Some("/work/data/users")
        );
        assert_eq!(session.stores().len(), 1);
        let adults = session.node("adults").unwrap();
        assert_eq!(plan.op_type(adults).unwrap(), OperatorType::Filter);
        assert_eq!(
            plan.operator(adults).unwrap().predicate().unwrap().to_string(),
            "((age > 17) AND NOT name IS NULL)"
        );
    }

    #[test]
    fn expressions_parse_from_yaml() {
        let y: Yaml = serde_yaml::from_str("{ add: [ { col: 0 }, { long: 5 } ] }").unwrap();
        assert_eq!(
            parse_expr(&y).unwrap(),
            Expr::named("$0").arith(ArithOp::Add, Expr::lit(5i64))
        );
        let bad: Yaml = serde_yaml::from_str("{ frobnicate: 1 }").unwrap();
        assert!(parse_expr(&bad).is_err());
        let arity: Yaml = serde_yaml::from_str("{ gt: [ 1 ] }").unwrap();
        assert!(parse_expr(&arity).is_err());
    }

    #[test]
    fn unknown_input_alias_fails() {
        let src = r#"
statements:
  - op: filter
    alias: b
    input: nope
    by: true
"#;
        let err = parse_script(src, "/work").unwrap_err();
        assert!(matches!(err, Error::UnknownAlias { .. }));
    }

    #[test]
    fn invalid_optimizer_block_is_a_config_error() {
        let src = "optimizer:\n  max_iterations: 0\nstatements: []\n";
        assert!(matches!(parse_script(src, "/w"), Err(Error::Config(_))));
    }
}
