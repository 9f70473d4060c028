//! Physical schema: what the database actually has, or what a logical
//! column compiles to for one dialect.
//!
//! Names are kept lower-cased; lookups are case-insensitive.

use std::fmt;

use indexmap::IndexMap;
use serde::Serialize;

use crate::model::Trigger;

/// Storage type as seen by the database driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PhysicalType {
    /// Exact numeric with length and scale.
    Numeric,
    /// Integer.
    Integer,
    /// Floating point.
    Real,
    /// Bounded character string.
    Varchar,
    /// Fixed-width character string.
    Char,
    /// Character large object.
    Clob,
    /// Binary large object.
    Blob,
    /// Date (with time of day on some vendors).
    Date,
    /// Timestamp.
    Timestamp,
    /// Bounded binary string.
    Varbinary,
    /// Anything the catalog reports that is not listed above.
    Other,
}

impl PhysicalType {
    /// Whether values of this type are read back as character data.
    #[must_use]
    pub const fn is_character(self) -> bool {
        matches!(self, Self::Varchar | Self::Char | Self::Clob)
    }
}

/// A physical column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhysicalColumn {
    /// Column name.
    pub name: String,
    /// Storage type.
    #[serde(rename = "type")]
    pub ty: PhysicalType,
    /// Length, 0 when not applicable.
    pub length: u32,
    /// Scale, 0 when not applicable.
    pub precision: u32,
    /// Whether NULL is allowed.
    pub nullable: bool,
    /// Default expression text, or the formula of a virtual column.
    pub default: Option<String>,
    /// Comment.
    pub remark: String,
    /// Whether the column is computed.
    #[serde(rename = "virtual")]
    pub is_virtual: bool,
    /// Referenced table, when a foreign key exists.
    pub reference: Option<String>,
    /// Foreign key constraint name.
    pub fk: Option<String>,
}

impl PhysicalColumn {
    /// Creates a NOT NULL column without length.
    #[must_use]
    pub fn new(ty: PhysicalType, name: impl AsRef<str>) -> Self {
        Self {
            name: name.as_ref().to_lowercase(),
            ty,
            length: 0,
            precision: 0,
            nullable: false,
            default: None,
            remark: String::new(),
            is_virtual: false,
            reference: None,
            fk: None,
        }
    }

    /// Sets length and scale.
    #[must_use]
    pub const fn sized(mut self, length: u32, precision: u32) -> Self {
        self.length = length;
        self.precision = precision;
        self
    }
}

impl fmt::Display for PhysicalColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:?}", self.name, self.ty)?;
        if self.length > 0 {
            write!(f, "[{}", self.length)?;
            if self.precision > 0 {
                write!(f, ",{}", self.precision)?;
            }
            f.write_str("]")?;
        }
        if let Some(def) = &self.default {
            write!(f, " def={def}")?;
        }
        if self.is_virtual {
            f.write_str(" virtual")?;
        }
        f.write_str(if self.nullable { " NULL" } else { " NOT NULL" })
    }
}

/// One column of an index.
#[derive(Debug, Clone, Serialize)]
pub struct KeyPart {
    /// Indexed column.
    pub column: String,
    /// Descending sort.
    pub desc: bool,
}

impl PartialEq for KeyPart {
    fn eq(&self, other: &Self) -> bool {
        self.column.eq_ignore_ascii_case(&other.column) && self.desc == other.desc
    }
}

impl Eq for KeyPart {}

/// A physical index.
#[derive(Debug, Clone, Serialize)]
pub struct PhysicalKey {
    /// Index name as known to the database.
    pub name: String,
    /// Uniqueness.
    pub unique: bool,
    /// Parts in order.
    pub parts: Vec<KeyPart>,
}

impl PartialEq for PhysicalKey {
    fn eq(&self, other: &Self) -> bool {
        self.unique == other.unique
            && self.name.eq_ignore_ascii_case(&other.name)
            && self.parts == other.parts
    }
}

impl Eq for PhysicalKey {}

impl fmt::Display for PhysicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.unique { "UNIQUE " } else { "NONUNIQUE " })?;
        write!(f, "{}: [", self.name)?;
        for (i, part) in self.parts.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{} {}", part.column, if part.desc { "DESC" } else { "ASC" })?;
        }
        f.write_str("]")
    }
}

/// A physical table or view.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PhysicalTable {
    /// Table name.
    pub name: String,
    /// Comment.
    pub remark: String,
    /// Columns in catalog order.
    pub columns: IndexMap<String, PhysicalColumn>,
    /// Primary key column names.
    pub pk: Vec<String>,
    /// Indexes by lower-cased name.
    pub keys: IndexMap<String, PhysicalKey>,
    /// Row-level triggers by name.
    pub triggers: IndexMap<String, Trigger>,
    /// Query text when the relation is a view.
    pub view_sql: Option<String>,
}

impl PhysicalTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new(name: impl AsRef<str>) -> Self {
        Self {
            name: name.as_ref().to_lowercase(),
            ..Self::default()
        }
    }

    /// Creates an empty view.
    #[must_use]
    pub fn view(name: impl AsRef<str>, sql: impl Into<String>) -> Self {
        Self {
            view_sql: Some(sql.into()),
            ..Self::new(name)
        }
    }

    /// Adds a column.
    pub fn add_column(&mut self, column: PhysicalColumn) {
        self.columns.insert(column.name.clone(), column);
    }

    /// Adds an index.
    pub fn add_key(&mut self, key: PhysicalKey) {
        self.keys.insert(key.name.to_lowercase(), key);
    }

    /// Column by case-insensitive name.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&PhysicalColumn> {
        self.columns.get(&name.to_lowercase())
    }

    /// Mutable column by case-insensitive name.
    pub fn column_mut(&mut self, name: &str) -> Option<&mut PhysicalColumn> {
        self.columns.get_mut(&name.to_lowercase())
    }

    /// Index by case-insensitive name.
    #[must_use]
    pub fn key(&self, name: &str) -> Option<&PhysicalKey> {
        self.keys.get(&name.to_lowercase())
    }

    /// Whether this relation is a view.
    #[must_use]
    pub const fn is_view(&self) -> bool {
        self.view_sql.is_some()
    }
}

/// The schema as introspected from a live database.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PhysicalModel {
    /// Tables and views by lower-cased name.
    pub tables: IndexMap<String, PhysicalTable>,
}

impl PhysicalModel {
    /// Creates an empty model.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a table or view.
    pub fn add(&mut self, table: PhysicalTable) {
        self.tables.insert(table.name.clone(), table);
    }

    /// Table or view by case-insensitive name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&PhysicalTable> {
        self.tables.get(&name.to_lowercase())
    }

    /// Mutable table or view by case-insensitive name.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut PhysicalTable> {
        self.tables.get_mut(&name.to_lowercase())
    }

    /// Stored comment of a column, if the column exists.
    #[must_use]
    pub fn remark(&self, table: &str, column: &str) -> Option<&str> {
        self.get(table)
            .and_then(|t| t.column(column))
            .map(|c| c.remark.as_str())
    }
}
