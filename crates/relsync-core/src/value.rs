//! SQL values, records and loose coercions.
//!
//! Values never reach the SQL text: statements carry them as bound
//! parameters. [`SqlValue::to_sql_inline`] exists only for static model
//! defaults and diagnostics.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A SQL value that can be used as a parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlValue {
    /// NULL value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Integer value.
    Int(i64),
    /// Float value.
    Float(f64),
    /// Text value.
    Text(String),
    /// Binary blob value.
    Blob(Vec<u8>),
    /// Exact numeric too wide for `i64`, kept in its plain textual form.
    Decimal(String),
}

/// A row or a record to write: column names in declaration order.
pub type Record = IndexMap<String, SqlValue>;

/// Builds a [`Record`] from `name => value` pairs.
///
/// ```rust
/// use relsync_core::record;
///
/// let r = record! { "id" => 1, "label" => "x" };
/// assert_eq!(r.len(), 2);
/// ```
#[macro_export]
macro_rules! record {
    () => { $crate::value::Record::new() };
    ($($name:expr => $value:expr),+ $(,)?) => {{
        let mut r = $crate::value::Record::new();
        $( r.insert(::std::string::String::from($name), $crate::value::ToSqlValue::to_sql_value($value)); )+
        r
    }};
}

impl SqlValue {
    /// Returns the SQL representation for inline use (escaped).
    ///
    /// **Warning**: Prefer using parameterized queries instead.
    #[must_use]
    pub fn to_sql_inline(&self) -> String {
        match self {
            Self::Null => String::from("NULL"),
            Self::Bool(b) => String::from(if *b { "1" } else { "0" }),
            Self::Int(n) => format!("{n}"),
            Self::Float(f) => format!("{f}"),
            Self::Decimal(d) => d.clone(),
            Self::Text(s) => {
                let escaped = s.replace('\'', "''");
                format!("'{escaped}'")
            }
            Self::Blob(b) => format!("X'{}'", hex_upper(b)),
        }
    }

    /// Returns `true` for [`SqlValue::Null`].
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Loose truthiness: NULL, `0`, `""`, `"0"`, `"false"` and `"N"` are false.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(b) => *b,
            Self::Int(n) => *n != 0,
            Self::Float(f) => *f != 0.0,
            Self::Decimal(d) => d.trim_start_matches(['0', '.', '-']).chars().any(|c| c != '0'),
            Self::Text(s) => !matches!(s.as_str(), "" | "0" | "false" | "N"),
            Self::Blob(b) => !b.is_empty(),
        }
    }

    /// Loose string form: NULL becomes the empty string.
    #[must_use]
    pub fn to_loose_string(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Bool(b) => String::from(if *b { "1" } else { "0" }),
            Self::Int(n) => n.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Decimal(d) | Self::Text(d) => d.clone(),
            Self::Blob(b) => hex_upper(b),
        }
    }

    /// Loose integer form. Text and decimals are parsed, truncating any
    /// fractional part; anything unparsable yields `None`.
    #[must_use]
    pub fn to_i64(&self) -> Option<i64> {
        match self {
            Self::Null | Self::Blob(_) => None,
            Self::Bool(b) => Some(i64::from(*b)),
            Self::Int(n) => Some(*n),
            #[allow(clippy::cast_possible_truncation)]
            Self::Float(f) => Some(f.trunc() as i64),
            Self::Decimal(s) | Self::Text(s) => {
                let s = s.trim();
                let int_part = s.split('.').next().unwrap_or(s);
                int_part.parse().ok()
            }
        }
    }

    /// Loose equality used when comparing records read back from the
    /// database with records that were written: values are equal when
    /// their loose string forms are.
    #[must_use]
    pub fn loose_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Null, _) | (_, Self::Null) => false,
            _ => self.to_loose_string() == other.to_loose_string(),
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            other => f.write_str(&other.to_loose_string()),
        }
    }
}

pub(crate) fn hex_upper(bytes: &[u8]) -> String {
    use fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02X}");
    }
    out
}

/// Trait for types that can be converted to SQL values.
pub trait ToSqlValue {
    /// Converts the value to a `SqlValue`.
    fn to_sql_value(self) -> SqlValue;
}

impl ToSqlValue for SqlValue {
    fn to_sql_value(self) -> SqlValue {
        self
    }
}

impl ToSqlValue for &SqlValue {
    fn to_sql_value(self) -> SqlValue {
        self.clone()
    }
}

impl ToSqlValue for bool {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Bool(self)
    }
}

impl ToSqlValue for i64 {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Int(self)
    }
}

impl ToSqlValue for i32 {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Int(i64::from(self))
    }
}

impl ToSqlValue for u32 {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Int(i64::from(self))
    }
}

impl ToSqlValue for f64 {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Float(self)
    }
}

impl ToSqlValue for String {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Text(self)
    }
}

impl ToSqlValue for &str {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Text(String::from(self))
    }
}

impl ToSqlValue for &String {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Text(self.clone())
    }
}

impl ToSqlValue for uuid::Uuid {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Text(self.hyphenated().to_string())
    }
}

impl<T: ToSqlValue> ToSqlValue for Option<T> {
    fn to_sql_value(self) -> SqlValue {
        match self {
            Some(v) => v.to_sql_value(),
            None => SqlValue::Null,
        }
    }
}

impl ToSqlValue for Vec<u8> {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Blob(self)
    }
}

impl ToSqlValue for &[u8] {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Blob(self.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sql_value_inline_text_escaping() {
        assert_eq!(
            SqlValue::Text(String::from("O'Brien")).to_sql_inline(),
            "'O''Brien'"
        );
        assert_eq!(SqlValue::Null.to_sql_inline(), "NULL");
        assert_eq!(SqlValue::Bool(true).to_sql_inline(), "1");
    }

    #[test]
    fn test_sql_value_inline_blob() {
        assert_eq!(
            SqlValue::Blob(vec![0x48, 0x45, 0x4C, 0x4C, 0x4F]).to_sql_inline(),
            "X'48454C4C4F'"
        );
    }

    #[test]
    fn test_truthiness() {
        assert!(!SqlValue::Null.is_truthy());
        assert!(!SqlValue::Text(String::new()).is_truthy());
        assert!(!SqlValue::Text("0".into()).is_truthy());
        assert!(!SqlValue::Text("N".into()).is_truthy());
        assert!(!SqlValue::Int(0).is_truthy());
        assert!(!SqlValue::Decimal("0.00".into()).is_truthy());
        assert!(SqlValue::Decimal("0.50".into()).is_truthy());
        assert!(SqlValue::Text("yes".into()).is_truthy());
        assert!(SqlValue::Int(-1).is_truthy());
    }

    #[test]
    fn test_loose_conversions() {
        assert_eq!(SqlValue::Null.to_loose_string(), "");
        assert_eq!(SqlValue::Text(" 42 ".into()).to_i64(), Some(42));
        assert_eq!(SqlValue::Decimal("17.9".into()).to_i64(), Some(17));
        assert_eq!(SqlValue::Text("abc".into()).to_i64(), None);
        assert!(SqlValue::Int(7).loose_eq(&SqlValue::Text("7".into())));
        assert!(!SqlValue::Null.loose_eq(&SqlValue::Text(String::new())));
    }

    #[test]
    fn test_record_macro_keeps_order() {
        let r = record! { "id" => 1, "label" => "x", "qty" => 5 };
        let names: Vec<&str> = r.keys().map(String::as_str).collect();
        assert_eq!(names, ["id", "label", "qty"]);
        assert_eq!(r["label"], SqlValue::Text("x".into()));
    }

    #[test]
    fn test_untagged_deserialization() {
        let v: Vec<SqlValue> = serde_json::from_str(r#"[null, true, 3, 2.5, "s"]"#).unwrap();
        assert_eq!(
            v,
            vec![
                SqlValue::Null,
                SqlValue::Bool(true),
                SqlValue::Int(3),
                SqlValue::Float(2.5),
                SqlValue::Text("s".into())
            ]
        );
    }
}
