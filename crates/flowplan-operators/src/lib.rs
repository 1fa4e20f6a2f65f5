//! Relational operators, expression sub-plans and the logical plan that ties
//! them together.

#![forbid(unsafe_code)]

mod derive;
pub mod expression;
pub mod operator;
pub mod plan;

pub use expression::{ArithOp, ColumnUse, CompareOp, Expr, ExprOp, ExpressionPlan};
pub use operator::{
    Filter, ForEach, GenerateItem, Join, JoinType, Load, Operator, OperatorKind, OperatorType,
    Sort, SortKey, SplitOutput, Store, Union,
};
pub use plan::LogicalPlan;
