//! Logical tables, views, keys, triggers and procedures.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::column::{Column, ColumnType};
use crate::error::{Error, Result};
use crate::value::Record;

/// A named, ordered list of column parts, each `"column"` or `"column DESC"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Key {
    /// Key name, unique within the table.
    pub name: String,
    /// Column parts in index order.
    pub parts: Vec<String>,
    /// Whether the index enforces uniqueness.
    #[serde(default)]
    pub unique: bool,
}

impl Key {
    /// Creates a non-unique key.
    #[must_use]
    pub fn new<I, S>(name: impl Into<String>, parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into().to_lowercase(),
            parts: parts.into_iter().map(Into::into).collect(),
            unique: false,
        }
    }

    /// Marks the key unique.
    #[must_use]
    pub const fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// A row-level trigger: timing and event (`"BEFORE INSERT OR UPDATE"`)
/// plus the body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    /// Name derived from the timing/event text.
    pub name: String,
    /// Timing and triggering event.
    pub when: String,
    /// Trigger body.
    pub what: String,
}

impl Trigger {
    /// Creates a trigger named after its timing/event text.
    #[must_use]
    pub fn new(when: impl Into<String>, what: impl Into<String>) -> Self {
        let when = when.into();
        Self {
            name: when.trim().replace(' ', "_").to_lowercase(),
            when,
            what: what.into(),
        }
    }
}

/// A stored procedure, always created or replaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Procedure {
    /// Procedure name.
    pub name: String,
    /// Parameter list without parentheses, empty for none.
    #[serde(default)]
    pub params: String,
    /// Procedure body.
    pub body: String,
}

impl Procedure {
    /// Creates a procedure.
    #[must_use]
    pub fn new(name: impl Into<String>, params: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            name: name.into().to_lowercase(),
            params: params.into(),
            body: body.into(),
        }
    }
}

/// Visibility scope of a temporary table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TemporaryScope {
    /// Definition shared by all sessions.
    Global,
    /// Definition private to the session.
    Private,
}

/// What happens to the rows of a temporary table on commit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OnCommit {
    /// Rows are removed at commit.
    #[default]
    Delete,
    /// Rows survive until the session ends.
    Preserve,
}

/// Temporary-table semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Temporality {
    /// Scope of the definition.
    pub scope: TemporaryScope,
    /// Row lifetime.
    #[serde(default)]
    pub on_commit: OnCommit,
}

/// Whether a relation is stored or a named query.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TableKind {
    /// Ordinary stored table.
    #[default]
    Base,
    /// Temporary table.
    Temporary(Temporality),
    /// View defined by its SQL text.
    View {
        /// The query.
        sql: String,
    },
}

/// A logical table or view description.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    pub(crate) name: String,
    pub(crate) remark: String,
    pub(crate) columns: IndexMap<String, Column>,
    pub(crate) pk: Vec<String>,
    pub(crate) keys: IndexMap<String, Key>,
    pub(crate) triggers: IndexMap<String, Trigger>,
    pub(crate) data: Vec<Record>,
    pub(crate) kind: TableKind,
}

impl Table {
    /// Creates a stored table.
    #[must_use]
    pub fn new(name: impl AsRef<str>, remark: impl Into<String>) -> Self {
        Self {
            name: name.as_ref().to_lowercase(),
            remark: remark.into(),
            ..Self::default()
        }
    }

    /// Creates a view over `sql`. Its columns describe the result set.
    #[must_use]
    pub fn view(name: impl AsRef<str>, remark: impl Into<String>, sql: impl Into<String>) -> Self {
        let mut view = Self::new(name, remark);
        view.kind = TableKind::View { sql: sql.into() };
        view
    }

    /// Makes the table temporary.
    #[must_use]
    pub fn temporary(mut self, temporality: Temporality) -> Self {
        self.kind = TableKind::Temporary(temporality);
        self
    }

    /// Adds a column and appends it to the primary key.
    ///
    /// # Errors
    ///
    /// Fails when a column with the same name already exists.
    pub fn pk(self, column: Column) -> Result<Self> {
        let name = column.name.clone();
        let mut table = self.col(column)?;
        table.pk.push(name);
        Ok(table)
    }

    /// Adds a column.
    ///
    /// # Errors
    ///
    /// Fails when a column with the same name already exists.
    pub fn col(mut self, column: Column) -> Result<Self> {
        if self.columns.contains_key(&column.name) {
            return Err(Error::InvalidModel(format!(
                "{}.{} is already set",
                self.name, column.name
            )));
        }
        self.columns.insert(column.name.clone(), column);
        Ok(self)
    }

    /// Adds a reference column to `target` and a non-unique key of the same
    /// name over it.
    ///
    /// # Errors
    ///
    /// Fails when a column with the same name already exists.
    pub fn ref_col(self, column: Column) -> Result<Self> {
        let name = column.name.clone();
        let table = self.col(column)?;
        Ok(table.key(Key::new(name.clone(), [name])))
    }

    /// Adds a reference column without an index.
    ///
    /// # Errors
    ///
    /// Fails when a column with the same name already exists.
    pub fn fk(self, column: Column) -> Result<Self> {
        self.col(column)
    }

    /// Adds a key.
    #[must_use]
    pub fn key(mut self, key: Key) -> Self {
        self.keys.insert(key.name.clone(), key);
        self
    }

    /// Adds a unique key.
    #[must_use]
    pub fn unique(self, key: Key) -> Self {
        self.key(key.unique())
    }

    /// Adds a static data row, upserted on every synchronization.
    #[must_use]
    pub fn item(mut self, row: Record) -> Self {
        self.data.push(row);
        self
    }

    /// Adds a row-level trigger.
    #[must_use]
    pub fn trigger(mut self, when: impl Into<String>, what: impl Into<String>) -> Self {
        let trigger = Trigger::new(when, what);
        self.triggers.insert(trigger.name.clone(), trigger);
        self
    }

    /// Table name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Table comment.
    #[must_use]
    pub fn remark(&self) -> &str {
        &self.remark
    }

    /// Columns in definition order.
    #[must_use]
    pub const fn columns(&self) -> &IndexMap<String, Column> {
        &self.columns
    }

    /// Primary key column names.
    #[must_use]
    pub fn pk_columns(&self) -> &[String] {
        &self.pk
    }

    /// Relation kind.
    #[must_use]
    pub const fn kind(&self) -> &TableKind {
        &self.kind
    }

    /// Whether this is a view.
    #[must_use]
    pub const fn is_view(&self) -> bool {
        matches!(self.kind, TableKind::View { .. })
    }
}

/// Shorthand for an `id` primary key column of the given type.
#[must_use]
pub fn id_column(ty: ColumnType) -> Column {
    Column::new("id", ty).remark("Key")
}
