//! Schema synchronization: column diffing and convergence planning.

mod diff;
mod plan;

pub use diff::{ansi_default_equality, ColumnDiff, DefaultEquality, NullAction, TypeAction};
pub use plan::{Planner, SyncPlan, ViewStep};
