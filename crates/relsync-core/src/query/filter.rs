//! Filters: a column plus a predicate, optionally OR-ed with alternatives.

use std::sync::OnceLock;

use regex::Regex;

use super::predicate::{Arg, Predicate};
use crate::error::{Error, Result};
use crate::model::BoundTable;

fn filter_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([a-z][a-z0-9_]*)\s*(.*)$").expect("valid filter regex"))
}

/// A condition on one column of a query part.
#[derive(Debug, Clone)]
pub struct Filter {
    column: String,
    predicate: Predicate,
    join_local: bool,
    alternatives: Vec<Filter>,
}

impl Filter {
    /// Parses `"<column> <tail>"` against `table`.
    ///
    /// # Errors
    ///
    /// Fails when the text does not start with a column name, when the
    /// column is unknown or when the tail is malformed.
    pub fn parse(table: &BoundTable, src: &str, args: Vec<Arg>) -> Result<Self> {
        let caps = filter_re()
            .captures(src)
            .ok_or_else(|| Error::InvalidFilter(src.to_owned()))?;
        let (name, tail) = (&caps[1], &caps[2]);
        let predicate = Predicate::parse(tail, args)?;
        Self::with_predicate(table, name, predicate)
    }

    /// Applies a prebuilt predicate to a column of `table`.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownColumn`] when the column does not exist.
    pub fn with_predicate(table: &BoundTable, column: &str, predicate: Predicate) -> Result<Self> {
        let column = table.require_column(column)?.name().to_owned();
        Ok(Self {
            column,
            predicate,
            join_local: false,
            alternatives: Vec::new(),
        })
    }

    /// Filtered column.
    #[must_use]
    pub fn column(&self) -> &str {
        &self.column
    }

    /// The condition.
    #[must_use]
    pub const fn predicate(&self) -> &Predicate {
        &self.predicate
    }

    /// Whether the filter only narrows the rows matched by its LEFT JOIN.
    #[must_use]
    pub const fn is_join_local(&self) -> bool {
        self.join_local
    }

    /// Alternatives OR-ed with this filter.
    #[must_use]
    pub fn alternatives(&self) -> &[Self] {
        &self.alternatives
    }

    /// See [`Predicate::is_off`].
    #[must_use]
    pub fn is_off(&self) -> bool {
        self.predicate.is_off()
    }

    pub(crate) const fn local(mut self) -> Self {
        self.join_local = true;
        self
    }

    pub(crate) fn push_alternative(&mut self, alternative: Self) {
        self.alternatives.push(alternative);
    }
}

/// The AND-chain of filters of one query part.
///
/// Filters that are off are dropped on insertion; an OR alternative added
/// after a dropped filter is dropped with it.
#[derive(Debug, Clone, Default)]
pub(crate) struct FilterChain {
    filters: Vec<Filter>,
    last_dropped: bool,
}

impl FilterChain {
    pub(crate) fn and(&mut self, filter: Filter) {
        self.last_dropped = filter.is_off();
        if !self.last_dropped {
            self.filters.push(filter);
        }
    }

    pub(crate) fn or(&mut self, table: &BoundTable, alternative: Filter) -> Result<()> {
        if self.last_dropped || alternative.is_off() {
            return Ok(());
        }
        let last = self.filters.last_mut().ok_or_else(|| {
            Error::InvalidFilter(format!(
                "OR without a preceding filter on {}",
                table.name()
            ))
        })?;
        last.push_alternative(alternative);
        Ok(())
    }

    pub(crate) fn filters(&self) -> &[Filter] {
        &self.filters
    }
}
