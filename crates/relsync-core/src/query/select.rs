//! SELECT builder with typed joins.
//!
//! ```rust
//! use relsync_core::dialect::{Dialect, OracleDialect};
//! use relsync_core::model::{id_column, Column, ColumnType, Model, Table};
//!
//! let mut model = Model::new();
//! model.add(
//!     Table::new("orgs", "")
//!         .pk(id_column(ColumnType::Integer))?
//!         .col(Column::new("label", ColumnType::String))?,
//! )?;
//! model.add(
//!     Table::new("users", "")
//!         .pk(id_column(ColumnType::Integer))?
//!         .ref_col(Column::reference("id_org", "orgs"))?
//!         .col(Column::new("label", ColumnType::String))?,
//! )?;
//! let dialect = OracleDialect::new();
//! let schema = model.compile(&dialect)?;
//!
//! let select = schema
//!     .select("users", &["AS u", "label"])?
//!     .and("label LIKE %?%", "ann")?
//!     .to_one(schema.table("orgs")?, &["AS o", "label"])?
//!     .on()?;
//! let st = dialect.select_statement(&select)?;
//! assert_eq!(
//!     st.sql(),
//!     "SELECT u.label \"label\",o.label \"o.label\" FROM users u \
//!      INNER JOIN orgs o ON u.id_org=o.id WHERE u.label LIKE ?"
//! );
//! # Ok::<(), relsync_core::Error>(())
//! ```

use std::sync::Arc;

use super::filter::{Filter, FilterChain};
use super::predicate::{Arg, Predicate};
use crate::error::{Error, Result};
use crate::model::{BoundColumn, BoundTable};
use crate::value::ToSqlValue;

/// A result column with its optional label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultColumn {
    name: String,
    label: Option<String>,
}

impl ResultColumn {
    fn parse(table: &BoundTable, src: &str) -> Result<Self> {
        let (name, label) = match src.split_once(" AS ") {
            Some((name, label)) => (name.trim(), Some(label.trim().to_owned())),
            None => (src.trim(), None),
        };
        let column = table.require_column(name)?;
        Ok(Self {
            name: column.name().to_owned(),
            label,
        })
    }

    /// Column name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Explicit label.
    #[must_use]
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }
}

/// A table taking part in a query: the main table or a joined one.
#[derive(Debug, Clone)]
pub struct Part {
    table: Arc<BoundTable>,
    alias: String,
    columns: Vec<ResultColumn>,
    chain: FilterChain,
}

impl Part {
    /// `names` may start with `"AS alias"`, then `"*"` for every column,
    /// then any number of `"column"` or `"column AS label"`.
    fn new(table: Arc<BoundTable>, names: &[&str]) -> Result<Self> {
        let mut rest = names;
        let mut alias = table.name().to_owned();
        if let Some(a) = rest.first().and_then(|n| n.strip_prefix("AS ")) {
            alias = a.trim().to_owned();
            rest = &rest[1..];
        }
        let mut columns = Vec::new();
        if rest.first() == Some(&"*") {
            columns.extend(table.columns().map(|c| ResultColumn {
                name: c.name().to_owned(),
                label: None,
            }));
            rest = &rest[1..];
        }
        for name in rest {
            columns.push(ResultColumn::parse(&table, name)?);
        }
        Ok(Self {
            table,
            alias,
            columns,
            chain: FilterChain::default(),
        })
    }

    /// The table.
    #[must_use]
    pub const fn table(&self) -> &Arc<BoundTable> {
        &self.table
    }

    /// Alias, the table name unless set with `"AS alias"`.
    #[must_use]
    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Result columns.
    #[must_use]
    pub fn columns(&self) -> &[ResultColumn] {
        &self.columns
    }

    /// Filters that were not dropped.
    #[must_use]
    pub fn filters(&self) -> &[Filter] {
        self.chain.filters()
    }

    fn and(&mut self, src: &str, args: Vec<Arg>, join_local: bool) -> Result<()> {
        let filter = Filter::parse(&self.table, src, args)?;
        self.chain
            .and(if join_local { filter.local() } else { filter });
        Ok(())
    }

    fn and_predicate(&mut self, column: &str, predicate: Predicate) -> Result<()> {
        self.chain
            .and(Filter::with_predicate(&self.table, column, predicate)?);
        Ok(())
    }

    fn or(&mut self, src: &str, args: Vec<Arg>) -> Result<()> {
        let alternative = Filter::parse(&self.table, src, args)?;
        self.chain.or(&self.table, alternative)
    }
}

/// How a joined table relates to the rest of the query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    /// The query points at one row of the joined table.
    ToOne,
    /// Rows of the joined table point back at the query.
    ToMany,
}

/// The ON condition of a join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinCondition {
    /// Raw SQL given as a hint.
    Raw(String),
    /// `left_alias.left_column=right_alias.right_column`.
    Columns {
        /// Alias on the referencing side.
        left_alias: String,
        /// Reference column.
        left_column: String,
        /// Alias on the referenced side.
        right_alias: String,
        /// Referenced primary key column.
        right_column: String,
    },
}

impl JoinCondition {
    /// SQL text of the condition.
    #[must_use]
    pub fn sql(&self) -> String {
        match self {
            Self::Raw(sql) => sql.clone(),
            Self::Columns {
                left_alias,
                left_column,
                right_alias,
                right_column,
            } => format!("{left_alias}.{left_column}={right_alias}.{right_column}"),
        }
    }
}

/// A resolved join.
#[derive(Debug, Clone)]
pub struct Join {
    part: Part,
    kind: JoinKind,
    inner: bool,
    condition: JoinCondition,
}

impl Join {
    /// The joined part.
    #[must_use]
    pub const fn part(&self) -> &Part {
        &self.part
    }

    /// Relationship direction.
    #[must_use]
    pub const fn kind(&self) -> JoinKind {
        self.kind
    }

    /// ON condition.
    #[must_use]
    pub const fn condition(&self) -> &JoinCondition {
        &self.condition
    }

    /// Whether the join renders as INNER: requested so, or carrying a
    /// filter that is not join-local.
    #[must_use]
    pub fn is_inner(&self) -> bool {
        self.inner || self.part.filters().iter().any(|f| !f.is_join_local())
    }
}

/// A SELECT over one table plus joins.
#[derive(Debug, Clone)]
pub struct Select {
    part: Part,
    joins: Vec<Join>,
    order: Option<String>,
    offset: u64,
    limit: Option<u64>,
}

impl Select {
    /// Starts a query. See [`Part`] for the syntax of `names`.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownColumn`] for a column missing from `table`.
    pub fn new(table: Arc<BoundTable>, names: &[&str]) -> Result<Self> {
        Ok(Self {
            part: Part::new(table, names)?,
            joins: Vec::new(),
            order: None,
            offset: 0,
            limit: None,
        })
    }

    /// Every column of the row whose scalar primary key is `id`.
    ///
    /// # Errors
    ///
    /// [`Error::VectorPrimaryKey`] unless the key has exactly one column.
    pub fn by_id(table: Arc<BoundTable>, id: impl ToSqlValue) -> Result<Self> {
        let pk = table.scalar_pk()?.name().to_owned();
        Self::new(table, &["*"])?.and(&pk, id)
    }

    /// The `id` and `label` of every row, ordered by label.
    ///
    /// # Errors
    ///
    /// Fails when the table has no scalar primary key or no `label` column.
    pub fn vocabulary(table: Arc<BoundTable>) -> Result<Self> {
        let pk = format!("{} AS id", table.scalar_pk()?.name());
        Ok(Self::new(table, &[&pk, "label"])?.order_by("label"))
    }

    /// Adds a filter with one argument.
    ///
    /// # Errors
    ///
    /// Fails on a malformed filter or an unknown column.
    pub fn and(self, src: &str, value: impl ToSqlValue) -> Result<Self> {
        self.filter(src, vec![Arg::value(value)])
    }

    /// Adds a filter with several arguments (`BETWEEN`, `IN`).
    ///
    /// # Errors
    ///
    /// Fails on a malformed filter or an unknown column.
    pub fn and_all<I, V>(self, src: &str, values: I) -> Result<Self>
    where
        I: IntoIterator<Item = V>,
        V: ToSqlValue,
    {
        self.filter(src, values.into_iter().map(Arg::value).collect())
    }

    /// Adds a filter without arguments (`IS NULL`).
    ///
    /// # Errors
    ///
    /// Fails on a malformed filter or an unknown column.
    pub fn and_is(self, src: &str) -> Result<Self> {
        self.filter(src, Vec::new())
    }

    /// Adds an `IN` filter over a subquery.
    ///
    /// # Errors
    ///
    /// Fails on a malformed filter or an unknown column.
    pub fn and_in(self, src: &str, subquery: Self) -> Result<Self> {
        self.filter(src, vec![Arg::from(subquery)])
    }

    /// Adds a filter with arbitrary arguments.
    ///
    /// # Errors
    ///
    /// Fails on a malformed filter or an unknown column.
    pub fn filter(mut self, src: &str, args: Vec<Arg>) -> Result<Self> {
        self.part.and(src, args, false)?;
        Ok(self)
    }

    /// Adds a prebuilt predicate on `column`.
    ///
    /// # Errors
    ///
    /// Fails on an unknown column.
    pub fn and_predicate(mut self, column: &str, predicate: Predicate) -> Result<Self> {
        self.part.and_predicate(column, predicate)?;
        Ok(self)
    }

    /// OR-s an alternative onto the last filter.
    ///
    /// # Errors
    ///
    /// Fails on a malformed filter, an unknown column, or when no filter
    /// precedes.
    pub fn or(mut self, src: &str, value: impl ToSqlValue) -> Result<Self> {
        self.part.or(src, vec![Arg::value(value)])?;
        Ok(self)
    }

    /// Appends an ORDER BY term.
    #[must_use]
    pub fn order_by(mut self, order: &str) -> Self {
        match &mut self.order {
            Some(o) => {
                o.push(',');
                o.push_str(order);
            }
            None => self.order = Some(order.to_owned()),
        }
        self
    }

    /// Restricts the result to `limit` rows after skipping `offset`.
    #[must_use]
    pub const fn limit(mut self, offset: u64, limit: u64) -> Self {
        self.offset = offset;
        self.limit = Some(limit);
        self
    }

    /// Joins a table this query references (INNER).
    ///
    /// # Errors
    ///
    /// [`Error::UnknownColumn`] for a column missing from `table`.
    pub fn to_one(self, table: Arc<BoundTable>, names: &[&str]) -> Result<JoinBuilder> {
        JoinBuilder::new(self, table, names, JoinKind::ToOne, true)
    }

    /// Joins a table this query may reference (LEFT).
    ///
    /// # Errors
    ///
    /// [`Error::UnknownColumn`] for a column missing from `table`.
    pub fn to_maybe_one(self, table: Arc<BoundTable>, names: &[&str]) -> Result<JoinBuilder> {
        JoinBuilder::new(self, table, names, JoinKind::ToOne, false)
    }

    /// Joins a table referencing this query (INNER).
    ///
    /// # Errors
    ///
    /// [`Error::UnknownColumn`] for a column missing from `table`.
    pub fn to_several(self, table: Arc<BoundTable>, names: &[&str]) -> Result<JoinBuilder> {
        JoinBuilder::new(self, table, names, JoinKind::ToMany, true)
    }

    /// Joins a table that may reference this query (LEFT).
    ///
    /// # Errors
    ///
    /// [`Error::UnknownColumn`] for a column missing from `table`.
    pub fn to_some(self, table: Arc<BoundTable>, names: &[&str]) -> Result<JoinBuilder> {
        JoinBuilder::new(self, table, names, JoinKind::ToMany, false)
    }

    /// The main part.
    #[must_use]
    pub const fn part(&self) -> &Part {
        &self.part
    }

    /// The main table.
    #[must_use]
    pub const fn table(&self) -> &Arc<BoundTable> {
        &self.part.table
    }

    /// Joins in declaration order.
    #[must_use]
    pub fn joins(&self) -> &[Join] {
        &self.joins
    }

    /// ORDER BY clause without the keywords.
    #[must_use]
    pub fn order(&self) -> Option<&str> {
        self.order.as_deref()
    }

    /// `(offset, limit)` when paginated.
    #[must_use]
    pub fn page(&self) -> Option<(u64, u64)> {
        self.limit.map(|limit| (self.offset, limit))
    }

    fn parts(&self) -> impl Iterator<Item = &Part> {
        std::iter::once(&self.part).chain(self.joins.iter().map(|j| &j.part))
    }

    fn part_by_alias(&self, alias: &str, joined: &str) -> Result<&Part> {
        self.parts()
            .find(|p| p.alias == alias)
            .ok_or_else(|| join_error(joined, format!("no part aliased {alias}")))
    }
}

fn join_error(table: &str, message: impl Into<String>) -> Error {
    Error::JoinResolution {
        table: table.to_owned(),
        message: message.into(),
    }
}

/// A join under construction; finish it with [`JoinBuilder::on`].
#[derive(Debug, Clone)]
pub struct JoinBuilder {
    select: Select,
    part: Part,
    kind: JoinKind,
    inner: bool,
}

impl JoinBuilder {
    fn new(
        select: Select,
        table: Arc<BoundTable>,
        names: &[&str],
        kind: JoinKind,
        inner: bool,
    ) -> Result<Self> {
        Ok(Self {
            select,
            part: Part::new(table, names)?,
            kind,
            inner,
        })
    }

    /// Adds a join-local filter: it narrows the matched rows but keeps a
    /// LEFT JOIN outer.
    ///
    /// # Errors
    ///
    /// Fails on a malformed filter or an unknown column.
    pub fn when(mut self, src: &str, value: impl ToSqlValue) -> Result<Self> {
        self.part.and(src, vec![Arg::value(value)], true)?;
        Ok(self)
    }

    /// Join-local filter without arguments.
    ///
    /// # Errors
    ///
    /// Fails on a malformed filter or an unknown column.
    pub fn when_is(mut self, src: &str) -> Result<Self> {
        self.part.and(src, Vec::new(), true)?;
        Ok(self)
    }

    /// Adds a filter on the joined table; the join becomes INNER.
    ///
    /// # Errors
    ///
    /// Fails on a malformed filter or an unknown column.
    pub fn and(self, src: &str, value: impl ToSqlValue) -> Result<Self> {
        self.filter(src, vec![Arg::value(value)])
    }

    /// Filter on the joined table without arguments.
    ///
    /// # Errors
    ///
    /// Fails on a malformed filter or an unknown column.
    pub fn and_is(self, src: &str) -> Result<Self> {
        self.filter(src, Vec::new())
    }

    /// Filter on the joined table with arbitrary arguments.
    ///
    /// # Errors
    ///
    /// Fails on a malformed filter or an unknown column.
    pub fn filter(mut self, src: &str, args: Vec<Arg>) -> Result<Self> {
        self.part.and(src, args, false)?;
        Ok(self)
    }

    /// OR-s an alternative onto the last filter of the joined table.
    ///
    /// # Errors
    ///
    /// Fails on a malformed filter or when no filter precedes.
    pub fn or(mut self, src: &str, value: impl ToSqlValue) -> Result<Self> {
        self.part.or(src, vec![Arg::value(value)])?;
        Ok(self)
    }

    /// Completes the join, inferring the condition from references.
    ///
    /// # Errors
    ///
    /// [`Error::JoinResolution`] when no reference or several candidate
    /// references connect the tables.
    pub fn on(self) -> Result<Select> {
        self.on_hint("")
    }

    /// Completes the join using `hint`.
    ///
    /// A hint containing `=` is used verbatim as the ON condition. For a
    /// to-one join the hint is `"[alias.]reference"`, naming the
    /// referencing column in the query; for a to-many join it is
    /// `"reference [alias]"`, naming the column of the joined table and the
    /// part it points to.
    ///
    /// # Errors
    ///
    /// [`Error::JoinResolution`] on a malformed hint or when the condition
    /// cannot be resolved.
    pub fn on_hint(self, hint: &str) -> Result<Select> {
        let hint = hint.trim();
        let condition = if hint.contains('=') {
            JoinCondition::Raw(hint.to_owned())
        } else {
            match self.kind {
                JoinKind::ToOne => self.resolve_to_one(hint)?,
                JoinKind::ToMany => self.resolve_to_many(hint)?,
            }
        };
        let Self {
            mut select,
            part,
            kind,
            inner,
        } = self;
        select.joins.push(Join {
            part,
            kind,
            inner,
            condition,
        });
        Ok(select)
    }

    fn resolve_to_one(&self, hint: &str) -> Result<JoinCondition> {
        let target = self.part.table.name();
        let target_pk = self.part.table.scalar_pk()?.name().to_owned();
        let (alias, reference) = match hint.split('.').collect::<Vec<_>>().as_slice() {
            [reference] => ("", *reference),
            [alias, reference] => (*alias, *reference),
            _ => return Err(join_error(target, format!("Invalid join hint: {hint}"))),
        };
        let candidates: Vec<&Part> = if alias.is_empty() {
            self.select.parts().collect()
        } else {
            vec![self.select.part_by_alias(alias, target)?]
        };
        for part in candidates {
            if let Some(column) = find_reference(part, reference, target)? {
                return Ok(JoinCondition::Columns {
                    left_alias: part.alias.clone(),
                    left_column: column,
                    right_alias: self.part.alias.clone(),
                    right_column: target_pk,
                });
            }
        }
        Err(join_error(target, format!("reference to {target} not found")))
    }

    fn resolve_to_many(&self, hint: &str) -> Result<JoinCondition> {
        let joined = &self.part.table;
        let mut words = hint.split_whitespace();
        let (reference, alias) = (words.next(), words.next());
        if words.next().is_some() {
            return Err(join_error(joined.name(), format!("Invalid join hint: {hint}")));
        }

        let column = match reference {
            Some(name) => {
                let column = joined.require_column(name)?;
                if column.reference().is_none() {
                    return Err(join_error(
                        joined.name(),
                        format!("{}.{name} is not a reference", joined.name()),
                    ));
                }
                column
            }
            None => {
                let found: Vec<&BoundColumn> = joined
                    .references()
                    .filter(|(_, t)| self.select.parts().any(|p| p.table.name() == *t))
                    .map(|(c, _)| c)
                    .collect();
                match found.as_slice() {
                    [] => {
                        return Err(join_error(
                            joined.name(),
                            "no reference to any previous table",
                        ))
                    }
                    [one] => *one,
                    many => {
                        let names: Vec<&str> =
                            many.iter().copied().map(BoundColumn::name).collect();
                        return Err(join_error(
                            joined.name(),
                            format!(
                                "Ambiguous ref: {} in {}",
                                names.join(", "),
                                joined.name()
                            ),
                        ));
                    }
                }
            }
        };
        let target = column.reference().unwrap_or_default();

        let to_part = match alias {
            Some(alias) => self.select.part_by_alias(alias, joined.name())?,
            None => self
                .select
                .parts()
                .find(|p| p.table.name() == target)
                .ok_or_else(|| join_error(joined.name(), format!("reference to {target} not found")))?,
        };
        if to_part.table.name() != target {
            return Err(join_error(
                joined.name(),
                format!("{} does not reference {}", column.name(), to_part.alias),
            ));
        }

        Ok(JoinCondition::Columns {
            left_alias: self.part.alias.clone(),
            left_column: column.name().to_owned(),
            right_alias: to_part.alias.clone(),
            right_column: to_part.table.scalar_pk()?.name().to_owned(),
        })
    }
}

/// The reference column of `part` pointing at `target`, by name or, when
/// `name` is empty, by scanning all columns.
fn find_reference(part: &Part, name: &str, target: &str) -> Result<Option<String>> {
    if !name.is_empty() {
        return match part.table.column(name) {
            None => Ok(None),
            Some(c) if c.reference() == Some(target) => Ok(Some(c.name().to_owned())),
            Some(c) => Err(join_error(
                target,
                format!("{}.{} is not a reference to {target}", part.alias, c.name()),
            )),
        };
    }
    let found: Vec<&str> = part
        .table
        .references()
        .filter(|(_, t)| *t == target)
        .map(|(c, _)| c.name())
        .collect();
    match found.as_slice() {
        [] => Ok(None),
        [one] => Ok(Some((*one).to_owned())),
        many => Err(join_error(
            target,
            format!("Ambiguous ref: {} in {}", many.join(", "), part.table.name()),
        )),
    }
}
