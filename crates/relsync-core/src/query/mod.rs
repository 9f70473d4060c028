//! Query building: the predicate mini-language, filters, and SELECT with
//! typed joins.

mod filter;
mod predicate;
pub(crate) mod render;
mod select;

pub use filter::Filter;
pub use predicate::{Arg, Operator, Predicate};
pub use select::{Join, JoinBuilder, JoinCondition, JoinKind, Part, ResultColumn, Select};
