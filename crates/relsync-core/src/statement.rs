//! Parameterized statement buffer.
//!
//! A [`Statement`] accumulates SQL text and, in parallel, the values bound
//! to its placeholders together with the physical type of the column each
//! value targets. It is the only way user data reaches the database.

use std::fmt;

use crate::physical::PhysicalType;
use crate::value::SqlValue;

/// A bound parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    /// The value.
    pub value: SqlValue,
    /// Type of the target column, when known.
    pub ty: Option<PhysicalType>,
}

impl Param {
    /// Creates a parameter targeting a column of type `ty`.
    #[must_use]
    pub const fn typed(value: SqlValue, ty: PhysicalType) -> Self {
        Self {
            value,
            ty: Some(ty),
        }
    }

    /// Creates a parameter with no declared target type.
    #[must_use]
    pub const fn untyped(value: SqlValue) -> Self {
        Self { value, ty: None }
    }
}

/// Size limits applied when parameters are printed to the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogLimits {
    /// Longest printed value; longer ones are cut and suffixed with `...`.
    pub max_param_len: usize,
    /// Above this many characters the parameter list is not printed.
    pub max_total_len: usize,
}

impl Default for LogLimits {
    fn default() -> Self {
        Self {
            max_param_len: 40,
            max_total_len: 10_000,
        }
    }
}

/// SQL text plus its bound parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Statement {
    sql: String,
    params: Vec<Param>,
}

impl Statement {
    /// Creates a statement from static text.
    #[must_use]
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Reassembles a statement from text and parameters.
    #[must_use]
    pub fn from_parts(sql: impl Into<String>, params: Vec<Param>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    /// Appends text.
    pub fn push_str(&mut self, sql: &str) {
        self.sql.push_str(sql);
    }

    /// Appends a character.
    pub fn push(&mut self, c: char) {
        self.sql.push(c);
    }

    /// Appends text containing exactly one placeholder and binds `value`.
    pub fn push_param(&mut self, sql: &str, value: SqlValue, ty: Option<PhysicalType>) {
        self.sql.push_str(sql);
        self.params.push(Param { value, ty });
    }

    /// Appends another statement, text and parameters.
    pub fn append(&mut self, other: Self) {
        self.sql.push_str(&other.sql);
        self.params.extend(other.params);
    }

    /// Last character of the text.
    #[must_use]
    pub fn last_char(&self) -> Option<char> {
        self.sql.chars().last()
    }

    /// Replaces the last character, typically a trailing comma.
    pub fn set_last_char(&mut self, c: char) {
        if self.sql.pop().is_some() {
            self.sql.push(c);
        }
    }

    /// The SQL text.
    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Bound parameters in placeholder order.
    #[must_use]
    pub fn params(&self) -> &[Param] {
        &self.params
    }

    /// Bound values in placeholder order.
    #[must_use]
    pub fn values(&self) -> Vec<SqlValue> {
        self.params.iter().map(|p| p.value.clone()).collect()
    }

    /// Whether the statement has no text.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sql.is_empty()
    }

    /// Splits into text and parameters.
    #[must_use]
    pub fn into_parts(self) -> (String, Vec<Param>) {
        (self.sql, self.params)
    }

    /// Renders the statement for logging within `limits`.
    #[must_use]
    pub fn display(&self, limits: LogLimits) -> String {
        format_for_log(&self.sql, self.params.iter().map(|p| &p.value), limits)
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display(LogLimits::default()))
    }
}

impl From<String> for Statement {
    fn from(sql: String) -> Self {
        Self::new(sql)
    }
}

impl From<&str> for Statement {
    fn from(sql: &str) -> Self {
        Self::new(sql)
    }
}

/// Formats SQL followed by its parameters: `SQL ["text",1,NULL]`.
#[must_use]
pub fn format_for_log<'a>(
    sql: &str,
    values: impl IntoIterator<Item = &'a SqlValue>,
    limits: LogLimits,
) -> String {
    let mut params = String::new();
    for value in values {
        params.push(if params.is_empty() { '[' } else { ',' });
        log_param(&mut params, value, limits.max_param_len);
    }
    if params.is_empty() {
        return sql.to_owned();
    }
    params.push(']');
    if params.len() > limits.max_total_len {
        return format!("{sql}[LOTS OF PARAMS]");
    }
    format!("{sql} {params}")
}

fn log_param(out: &mut String, value: &SqlValue, max_len: usize) {
    let s = match value {
        SqlValue::Null => {
            out.push_str("NULL");
            return;
        }
        SqlValue::Int(_) | SqlValue::Float(_) | SqlValue::Bool(_) | SqlValue::Decimal(_) => {
            out.push_str(&value.to_loose_string());
            return;
        }
        other => other.to_loose_string(),
    };
    let is_long = s.chars().count() > max_len;
    out.push('"');
    for c in s.chars().take(if is_long { max_len.saturating_sub(1) } else { max_len }) {
        match c {
            '\n' | '\r' => out.push(' '),
            '"' => out.push('\''),
            c => out.push(c),
        }
    }
    out.push_str(if is_long { "...\"" } else { "\"" });
}
