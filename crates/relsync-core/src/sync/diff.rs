//! Column diffing.
//!
//! A [`ColumnDiff`] compares the physical column found in the database
//! (`as_is`) with the projection of the logical column (`to_be`) and tells
//! the planner which actions converge them.

use std::fmt;

use tracing::trace;

use crate::dialect::Dialect;
use crate::error::{Error, Result};
use crate::physical::{PhysicalColumn, PhysicalType};

/// How a column's type or definition must change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeAction {
    /// In-place change, typically a widening.
    Alter,
    /// Drop and rebuild, migrating data for stored columns.
    Recreate,
}

/// How a column's nullability must change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullAction {
    /// Make the column nullable.
    Set,
    /// Make the column NOT NULL, backfilling NULLs from the default first.
    Unset,
}

impl NullAction {
    /// Action turning `as_is` nullability into `to_be`.
    #[must_use]
    pub const fn between(as_is: bool, to_be: bool) -> Option<Self> {
        match (as_is, to_be) {
            (false, true) => Some(Self::Set),
            (true, false) => Some(Self::Unset),
            _ => None,
        }
    }
}

/// Compares the stored default of a column with the desired one.
pub type DefaultEquality = fn(&PhysicalColumn, &PhysicalColumn) -> bool;

/// Exact comparison: equal texts, or both absent.
#[must_use]
pub fn ansi_default_equality(as_is: &PhysicalColumn, to_be: &PhysicalColumn) -> bool {
    as_is.default == to_be.default
}

/// The actions converging one column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ColumnDiff {
    /// Type or definition change.
    pub type_action: Option<TypeAction>,
    /// Nullability change.
    pub null_action: Option<NullAction>,
    /// Whether the comment differs.
    pub comment_changed: bool,
}

impl ColumnDiff {
    /// Diffs `as_is` against `to_be` for `table`.
    ///
    /// # Errors
    ///
    /// [`Error::NotNullWithoutDefault`] when the column must become NOT NULL
    /// but has no default to backfill existing rows with.
    pub fn compute(
        table: &str,
        as_is: &PhysicalColumn,
        to_be: &PhysicalColumn,
        dialect: &dyn Dialect,
    ) -> Result<Self> {
        let null_action = NullAction::between(as_is.nullable, to_be.nullable);
        if null_action == Some(NullAction::Unset) && to_be.default.is_none() {
            return Err(Error::NotNullWithoutDefault {
                table: table.to_owned(),
                column: to_be.name.clone(),
            });
        }

        let mut type_action = if as_is.is_virtual == to_be.is_virtual {
            dialect.type_action(as_is.ty, to_be.ty)
        } else {
            Some(TypeAction::Recreate)
        };
        if type_action.is_none() && as_is.ty == to_be.ty && is_shorter(as_is, to_be) {
            type_action = Some(TypeAction::Alter);
        }
        if type_action.is_none() && !(dialect.default_equality())(as_is, to_be) {
            type_action = Some(if to_be.is_virtual {
                TypeAction::Recreate
            } else {
                TypeAction::Alter
            });
        }

        let diff = Self {
            type_action,
            null_action,
            comment_changed: dialect.supports_comments() && as_is.remark != to_be.remark,
        };
        trace!(table, column = %to_be.name, %diff, "Diffed column");
        Ok(diff)
    }

    /// Whether nothing needs to change.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.type_action.is_none() && self.null_action.is_none() && !self.comment_changed
    }
}

impl fmt::Display for ColumnDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{type: {:?}, null: {:?}, comment: {}}}",
            self.type_action, self.null_action, self.comment_changed
        )
    }
}

fn is_shorter(as_is: &PhysicalColumn, to_be: &PhysicalColumn) -> bool {
    if as_is.ty == PhysicalType::Numeric && to_be.ty == PhysicalType::Numeric {
        return as_is.length < to_be.length || as_is.precision < to_be.precision;
    }
    as_is.length < to_be.length
}
