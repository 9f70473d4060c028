//! Logical column definitions.

use serde::{Deserialize, Serialize};

use crate::value::SqlValue;

/// Vendor-neutral scalar column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ColumnType {
    /// Exact numeric with length and scale.
    Numeric,
    /// Monetary amount.
    Money,
    /// Integer number.
    Integer,
    /// Point in time with sub-second precision.
    Timestamp,
    /// Date and time of day.
    Datetime,
    /// Calendar date.
    Date,
    /// 16-byte identifier.
    Uuid,
    /// Short binary string.
    Binary,
    /// Flag.
    Boolean,
    /// Bounded character string.
    String,
    /// Unbounded character data.
    Text,
    /// Large binary object.
    Blob,
}

/// Default value of a column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultValue {
    /// The current date/time at insertion.
    Now,
    /// A freshly generated UUID.
    NewUuid,
    /// An empty large binary object.
    EmptyBlob,
    /// Numeric constant in plain decimal notation.
    Number(String),
    /// Boolean constant, stored as 1/0.
    Bool(bool),
    /// Character constant.
    Text(String),
    /// Formula of a virtual (computed) column.
    Virtual(String),
}

impl DefaultValue {
    /// Numeric constant default.
    #[must_use]
    pub fn number(n: impl ToString) -> Self {
        Self::Number(n.to_string())
    }

    /// Whether this default makes the column virtual.
    #[must_use]
    pub const fn is_virtual(&self) -> bool {
        matches!(self, Self::Virtual(_))
    }

    /// The SQL literal of a constant default, or `None` for generators and
    /// virtual formulas whose rendering depends on the dialect.
    #[must_use]
    pub fn const_sql(&self) -> Option<String> {
        match self {
            Self::Number(n) => Some(n.clone()),
            Self::Bool(b) => Some(String::from(if *b { "1" } else { "0" })),
            Self::Text(s) => Some(SqlValue::Text(s.clone()).to_sql_inline()),
            Self::Now | Self::NewUuid | Self::EmptyBlob | Self::Virtual(_) => None,
        }
    }

    /// The application-level value of a constant default, used when
    /// a default is itself bound as a parameter.
    #[must_use]
    pub fn value(&self) -> SqlValue {
        match self {
            Self::Number(n) => n.parse().map_or_else(|_| SqlValue::Decimal(n.clone()), SqlValue::Int),
            Self::Bool(b) => SqlValue::Int(i64::from(*b)),
            Self::Text(s) => SqlValue::Text(s.clone()),
            Self::EmptyBlob => SqlValue::Text(String::new()),
            Self::Now | Self::NewUuid | Self::Virtual(_) => SqlValue::Null,
        }
    }
}

/// What determines a column's type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnKind {
    /// An explicitly typed column.
    Scalar(ColumnType),
    /// A reference: type and length come from the target table's
    /// single-column primary key once the model is compiled.
    Reference {
        /// Target table name.
        target: String,
    },
}

/// A logical column.
///
/// Columns are NOT NULL unless [`Column::nullable`] is called. Names are
/// stored lower-cased.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub(crate) name: String,
    pub(crate) kind: ColumnKind,
    pub(crate) length: u32,
    pub(crate) precision: u32,
    pub(crate) nullable: bool,
    pub(crate) default: Option<DefaultValue>,
    pub(crate) remark: String,
}

impl Column {
    /// Creates a typed column.
    #[must_use]
    pub fn new(name: impl AsRef<str>, ty: ColumnType) -> Self {
        Self::with_kind(name.as_ref(), ColumnKind::Scalar(ty))
    }

    /// Creates a reference to the primary key of `target`.
    #[must_use]
    pub fn reference(name: impl AsRef<str>, target: impl Into<String>) -> Self {
        Self::with_kind(
            name.as_ref(),
            ColumnKind::Reference {
                target: target.into().to_lowercase(),
            },
        )
    }

    fn with_kind(name: &str, kind: ColumnKind) -> Self {
        Self {
            name: name.to_lowercase(),
            kind,
            length: 0,
            precision: 0,
            nullable: false,
            default: None,
            remark: String::new(),
        }
    }

    /// Sets the length (characters, digits or bytes depending on type).
    #[must_use]
    pub const fn length(mut self, length: u32) -> Self {
        self.length = length;
        self
    }

    /// Sets the scale of a numeric column.
    #[must_use]
    pub const fn precision(mut self, precision: u32) -> Self {
        self.precision = precision;
        self
    }

    /// Allows NULL.
    #[must_use]
    pub const fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Sets the default value.
    #[must_use]
    pub fn default_value(mut self, default: DefaultValue) -> Self {
        self.default = Some(default);
        self
    }

    /// Makes this a virtual column computed from `expression`.
    #[must_use]
    pub fn virtual_expr(self, expression: impl Into<String>) -> Self {
        self.default_value(DefaultValue::Virtual(expression.into()))
    }

    /// Sets the comment.
    #[must_use]
    pub fn remark(mut self, remark: impl Into<String>) -> Self {
        self.remark = remark.into();
        self
    }

    /// Column name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Type source of the column.
    #[must_use]
    pub const fn kind(&self) -> &ColumnKind {
        &self.kind
    }

    /// Declared length, 0 when unset.
    #[must_use]
    pub const fn declared_length(&self) -> u32 {
        self.length
    }

    /// Declared scale, 0 when unset.
    #[must_use]
    pub const fn declared_precision(&self) -> u32 {
        self.precision
    }

    /// Whether NULL is allowed.
    #[must_use]
    pub const fn is_nullable(&self) -> bool {
        self.nullable
    }

    /// Default value, if any.
    #[must_use]
    pub const fn default(&self) -> Option<&DefaultValue> {
        self.default.as_ref()
    }

    /// Comment text.
    #[must_use]
    pub fn comment(&self) -> &str {
        &self.remark
    }

    /// Whether this column is a reference.
    #[must_use]
    pub const fn is_reference(&self) -> bool {
        matches!(self.kind, ColumnKind::Reference { .. })
    }
}
