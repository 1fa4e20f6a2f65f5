//! Front end for flowplan: building plans statement by statement, YAML
//! scripts, planning sessions and explain listings.
#![forbid(unsafe_code)]

pub mod builder;
pub mod dsl;
pub mod explain;
pub mod session;

pub use builder::{ItemSpec, PlanBuilder};
pub use dsl::yaml::{parse_expr, parse_script, parse_script_into, ParsedScript, Script, Statement};
pub use explain::{explain, explain_rows, ExplainRow};
pub use session::{Session, SessionId};
