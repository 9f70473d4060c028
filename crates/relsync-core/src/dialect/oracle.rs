//! Oracle dialect.

use super::{require_upsert_key, Dialect};
use crate::dml::{Batch, TableWrite};
use crate::error::{Error, Result};
use crate::model::{BoundTable, ColumnType, DefaultValue};
use crate::physical::{PhysicalColumn, PhysicalType};
use crate::statement::{Param, Statement};
use crate::sync::{ansi_default_equality, ColumnDiff, DefaultEquality, TypeAction};
use crate::value::SqlValue;

const LEN_INTEGER: u32 = 10;
const LEN_VARCHAR: u32 = 4000;
const LEN_MONEY: u32 = 15;
const PRC_MONEY: u32 = 2;
const MAX_IDENTIFIER: usize = 30;

const OLD: &str = "\"__old\"";
const NEW: &str = "\"__new\"";

/// Oracle dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct OracleDialect;

impl OracleDialect {
    /// Creates a new Oracle dialect.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// `MERGE INTO` skeleton shared by row upserts and table merges.
    fn merge_sql(table: &str, source: &str, columns: &[String], key: &[String]) -> String {
        let on: Vec<String> = key.iter().map(|k| format!("{OLD}.{k}={NEW}.{k}")).collect();
        let mut sql = format!(
            "MERGE INTO {table} {OLD} USING ({source}) {NEW} ON ({})",
            on.join(" AND ")
        );
        let set: Vec<String> = columns
            .iter()
            .filter(|c| !key.contains(*c))
            .map(|c| format!("{c}={NEW}.{c}"))
            .collect();
        if !set.is_empty() {
            sql.push_str(" WHEN MATCHED THEN UPDATE SET ");
            sql.push_str(&set.join(","));
        }
        let values: Vec<String> = columns.iter().map(|c| format!("{NEW}.{c}")).collect();
        sql.push_str(&format!(
            " WHEN NOT MATCHED THEN INSERT ({}) VALUES ({})",
            columns.join(","),
            values.join(",")
        ));
        sql
    }
}

/// Removes double quotes and spaces outside string literals.
fn squeeze(expression: &str) -> String {
    let mut out = String::with_capacity(expression.len());
    let mut in_literal = false;
    for c in expression.chars() {
        if c == '\'' {
            in_literal = !in_literal;
        }
        if in_literal || (c != '"' && c != ' ') {
            out.push(c);
        }
    }
    out
}

/// Oracle pads stored defaults with a trailing space and rewrites virtual
/// formulas: quoting, spacing and an implicit `TO_CHAR` are ignored.
fn oracle_default_equality(as_is: &PhysicalColumn, to_be: &PhysicalColumn) -> bool {
    if ansi_default_equality(as_is, to_be) {
        return true;
    }
    let (Some(stored), Some(wanted)) = (as_is.default.as_deref(), to_be.default.as_deref()) else {
        return false;
    };
    if stored.len() == wanted.len() + 1 && stored.ends_with(' ') && stored.starts_with(wanted) {
        return true;
    }
    if !to_be.is_virtual {
        return false;
    }
    let wanted = wanted
        .trim()
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .unwrap_or(wanted);
    let (stored, wanted) = (squeeze(stored), squeeze(wanted));
    stored == wanted || stored == format!("TO_CHAR({wanted})")
}

impl Dialect for OracleDialect {
    fn name(&self) -> &'static str {
        "oracle"
    }

    fn canonical(&self, ty: ColumnType, length: u32, precision: u32) -> (ColumnType, u32, u32) {
        let or = |value: u32, default: u32| if value == 0 { default } else { value };
        match ty {
            ColumnType::Boolean => (ColumnType::Numeric, 1, 0),
            ColumnType::Integer => (ColumnType::Integer, or(length, LEN_INTEGER), 0),
            ColumnType::Money => (
                ColumnType::Numeric,
                or(length, LEN_MONEY),
                or(precision, PRC_MONEY),
            ),
            ColumnType::String if length <= LEN_VARCHAR => {
                (ColumnType::String, or(length, LEN_VARCHAR), 0)
            }
            ColumnType::String => (ColumnType::Text, 0, 0),
            other => (other, length, precision),
        }
    }

    fn basic_physical(
        &self,
        name: &str,
        ty: ColumnType,
        length: u32,
        precision: u32,
    ) -> PhysicalColumn {
        match ty {
            ColumnType::Blob => PhysicalColumn::new(PhysicalType::Blob, name),
            ColumnType::Text => PhysicalColumn::new(PhysicalType::Clob, name),
            ColumnType::Date | ColumnType::Datetime => PhysicalColumn::new(PhysicalType::Date, name),
            ColumnType::Timestamp => PhysicalColumn::new(PhysicalType::Timestamp, name),
            ColumnType::Numeric | ColumnType::Money | ColumnType::Integer | ColumnType::Boolean => {
                PhysicalColumn::new(PhysicalType::Numeric, name).sized(length, precision)
            }
            ColumnType::String => PhysicalColumn::new(PhysicalType::Varchar, name).sized(length, 0),
            ColumnType::Uuid => PhysicalColumn::new(PhysicalType::Varbinary, name).sized(16, 0),
            ColumnType::Binary => PhysicalColumn::new(PhysicalType::Varbinary, name).sized(length, 0),
        }
    }

    fn type_name(&self, ty: PhysicalType) -> &'static str {
        match ty {
            PhysicalType::Numeric | PhysicalType::Integer => "NUMBER",
            PhysicalType::Real => "BINARY_DOUBLE",
            PhysicalType::Varchar | PhysicalType::Other => "VARCHAR2",
            PhysicalType::Char => "CHAR",
            PhysicalType::Clob => "CLOB",
            PhysicalType::Blob => "BLOB",
            PhysicalType::Date => "DATE",
            PhysicalType::Timestamp => "TIMESTAMP",
            PhysicalType::Varbinary => "RAW",
        }
    }

    fn default_sql(&self, default: &DefaultValue, ty: PhysicalType) -> Result<String> {
        match default {
            DefaultValue::EmptyBlob => Ok(String::from("EMPTY_BLOB()")),
            DefaultValue::NewUuid => Ok(String::from("SYS_GUID()")),
            DefaultValue::Now => match ty {
                PhysicalType::Date => Ok(String::from("SYSDATE")),
                PhysicalType::Timestamp => Ok(String::from("CURRENT_TIMESTAMP")),
                other => Err(Error::Unsupported {
                    dialect: self.name(),
                    what: format!("current time as default of a {other:?} column"),
                }),
            },
            DefaultValue::Virtual(expression) => Ok(expression.clone()),
            constant => Ok(constant.const_sql().unwrap_or_default()),
        }
    }

    fn type_action(&self, as_is: PhysicalType, to_be: PhysicalType) -> Option<TypeAction> {
        match (as_is, to_be) {
            (a, b) if a == b => None,
            (PhysicalType::Timestamp, PhysicalType::Date)
            | (PhysicalType::Clob, PhysicalType::Varchar) => None,
            _ => Some(TypeAction::Recreate),
        }
    }

    fn default_equality(&self) -> DefaultEquality {
        oracle_default_equality
    }

    fn max_identifier_len(&self) -> Option<usize> {
        Some(MAX_IDENTIFIER)
    }

    fn virtual_clause(&self, expression: &str) -> String {
        format!(" AS ({expression})")
    }

    fn alter_column(&self, table: &str, column: &PhysicalColumn, _tmp: &str) -> Vec<Statement> {
        vec![Statement::new(format!(
            "ALTER TABLE {table} MODIFY ({} {})",
            column.name,
            self.column_definition(column, false)
        ))]
    }

    fn rebuilds_column(&self, diff: &ColumnDiff) -> bool {
        diff.type_action == Some(TypeAction::Recreate)
    }

    fn set_nullable(
        &self,
        table: &str,
        column: &PhysicalColumn,
        nullable: bool,
        _tmp: &str,
    ) -> Vec<Statement> {
        vec![Statement::new(format!(
            "ALTER TABLE {table} MODIFY ({} {})",
            column.name,
            if nullable { "NULL" } else { "NOT NULL" }
        ))]
    }

    fn create_view(&self, name: &str, sql: &str) -> Vec<Statement> {
        vec![Statement::new(format!(
            "CREATE OR REPLACE FORCE VIEW {name} AS {sql}"
        ))]
    }

    fn insert_returning(&self, write: &TableWrite<'_>, _key: &str) -> Result<Statement> {
        Err(Error::Unsupported {
            dialect: self.name(),
            what: format!("INSERT ... RETURNING into {}", write.table().name()),
        })
    }

    fn upsert(&self, write: &TableWrite<'_>) -> Result<Batch> {
        require_upsert_key(self.name(), write)?;
        let columns = write.all_columns();
        let select: Vec<String> = columns.iter().map(|c| format!("? {c}")).collect();
        let source = format!("SELECT {} FROM DUAL", select.join(","));
        let sql = Self::merge_sql(
            write.table().name(),
            &source,
            &columns,
            write.key_columns(),
        );
        Ok(Batch::new(sql, write.rows(&columns)))
    }

    fn merge_table(&self, target: &BoundTable, source: &str, key: &[String]) -> Result<Statement> {
        if key.is_empty() {
            return Err(Error::Unsupported {
                dialect: self.name(),
                what: format!("merge into {} without a key", target.name()),
            });
        }
        let columns: Vec<String> = target
            .columns()
            .filter(|c| !c.is_virtual())
            .map(|c| c.name().to_owned())
            .collect();
        Ok(Statement::new(Self::merge_sql(
            target.name(),
            &format!("SELECT * FROM {source}"),
            &columns,
            key,
        )))
    }

    fn paginate(&self, inner: Statement, offset: u64, limit: u64) -> Statement {
        let int = |n: u64| {
            Param::typed(
                SqlValue::Int(i64::try_from(n).unwrap_or(i64::MAX)),
                PhysicalType::Integer,
            )
        };
        let (sql, mut params) = inner.into_parts();
        params.push(int(offset.saturating_add(limit)));
        params.push(int(offset));
        Statement::from_parts(
            format!(
                "SELECT * FROM(SELECT rownum rnum, a.* FROM({sql}) a WHERE rownum <= ?) WHERE rnum > ?"
            ),
            params,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dml::KeySpec;
    use crate::model::{id_column, Column, Key, Model, OnCommit, Table, Temporality, TemporaryScope};
    use crate::record;

    fn schema() -> crate::model::Schema {
        let mut m = Model::new();
        m.add(
            Table::new("items", "Items")
                .pk(id_column(ColumnType::Integer))
                .unwrap()
                .col(Column::new("label", ColumnType::String).length(80))
                .unwrap()
                .col(Column::new("price", ColumnType::Money).nullable())
                .unwrap()
                .col(Column::new("active", ColumnType::Boolean).default_value(DefaultValue::Bool(true)))
                .unwrap()
                .col(Column::new("stamp", ColumnType::Timestamp).default_value(DefaultValue::Now))
                .unwrap()
                .unique(Key::new("label", ["label", "stamp DESC"])),
        )
        .unwrap();
        m.add(
            Table::new("scratch", "")
                .temporary(Temporality {
                    scope: TemporaryScope::Global,
                    on_commit: OnCommit::Preserve,
                })
                .pk(id_column(ColumnType::Uuid))
                .unwrap(),
        )
        .unwrap();
        m.compile(&OracleDialect::new()).unwrap()
    }

    #[test]
    fn test_canonical_types() {
        let d = OracleDialect::new();
        assert_eq!(d.canonical(ColumnType::Boolean, 0, 0), (ColumnType::Numeric, 1, 0));
        assert_eq!(d.canonical(ColumnType::Integer, 0, 0), (ColumnType::Integer, 10, 0));
        assert_eq!(d.canonical(ColumnType::Money, 0, 0), (ColumnType::Numeric, 15, 2));
        assert_eq!(d.canonical(ColumnType::String, 0, 0), (ColumnType::String, 4000, 0));
        assert_eq!(d.canonical(ColumnType::String, 5000, 0), (ColumnType::Text, 0, 0));
    }

    #[test]
    fn test_create_table() {
        let d = OracleDialect::new();
        let s = schema();
        let sts = d.create_table(&s.table("items").unwrap());
        assert_eq!(
            sts[0].sql(),
            "CREATE TABLE items (id NUMBER(10,0) DEFAULT NULL NOT NULL,\
             label VARCHAR2(80) DEFAULT NULL NOT NULL,\
             price NUMBER(15,2) DEFAULT NULL,\
             active NUMBER(1,0) DEFAULT 1 NOT NULL,\
             stamp TIMESTAMP DEFAULT CURRENT_TIMESTAMP NOT NULL)"
        );
        assert_eq!(sts[1].sql(), "ALTER TABLE items ADD PRIMARY KEY (id)");
    }

    #[test]
    fn test_temporary_table() {
        let d = OracleDialect::new();
        let sts = d.create_table(&schema().table("scratch").unwrap());
        assert_eq!(
            sts[0].sql(),
            "CREATE GLOBAL TEMPORARY TABLE scratch (id RAW(16) DEFAULT NULL NOT NULL) \
             ON COMMIT PRESERVE ROWS"
        );
    }

    #[test]
    fn test_key_naming() {
        let d = OracleDialect::new();
        let s = schema();
        let items = s.table("items").unwrap();
        let key = d.physical_key(&items, &items.keys()["label"]).unwrap();
        assert_eq!(key.name, "ix_items_label");
        assert!(key.unique);
        assert!(key.parts[1].desc);
        assert_eq!(
            d.create_key("items", &key).sql(),
            "CREATE UNIQUE INDEX ix_items_label ON items(label,stamp DESC)"
        );

        let long = d.object_name("ix", "a_rather_long_table_name", "and_a_long_key");
        assert_eq!(long.len(), 30);
        assert!(long.starts_with("ix_"));
        let digest = format!("{:X}", md5::compute("ix_a_rather_long_table_name_and_a_long_key"));
        assert_eq!(&long[3..], &digest[..27]);
    }

    #[test]
    fn test_merge_upsert() {
        let d = OracleDialect::new();
        let s = schema();
        let items = s.table("items").unwrap();
        let records = [record! { "id" => 1, "label" => "x" }];
        let w = TableWrite::new(&items, &records, &KeySpec::Primary).unwrap();
        let batch = d.upsert(&w).unwrap();
        assert_eq!(
            batch.sql(),
            "MERGE INTO items \"__old\" USING (SELECT ? label,? id FROM DUAL) \"__new\" \
             ON (\"__old\".id=\"__new\".id) \
             WHEN MATCHED THEN UPDATE SET label=\"__new\".label \
             WHEN NOT MATCHED THEN INSERT (label,id) VALUES (\"__new\".label,\"__new\".id)"
        );
        assert_eq!(batch.rows()[0].len(), 2);
    }

    #[test]
    fn test_merge_without_non_key_columns() {
        let d = OracleDialect::new();
        let s = schema();
        let items = s.table("items").unwrap();
        let records = [record! { "id" => 1 }];
        let w = TableWrite::new(&items, &records, &KeySpec::Primary).unwrap();
        let sql = d.upsert(&w).unwrap().sql().to_owned();
        assert!(!sql.contains("WHEN MATCHED"));
        let none = TableWrite::new(&items, &records, &KeySpec::None).unwrap();
        assert!(matches!(d.upsert(&none), Err(Error::Unsupported { .. })));
    }

    #[test]
    fn test_merge_table() {
        let d = OracleDialect::new();
        let s = schema();
        let st = d
            .merge_table(&s.table("scratch").unwrap(), "stage_scratch", &["id".into()])
            .unwrap();
        assert_eq!(
            st.sql(),
            "MERGE INTO scratch \"__old\" USING (SELECT * FROM stage_scratch) \"__new\" \
             ON (\"__old\".id=\"__new\".id) \
             WHEN NOT MATCHED THEN INSERT (id) VALUES (\"__new\".id)"
        );
    }

    #[test]
    fn test_pagination() {
        let d = OracleDialect::new();
        let st = d.paginate(Statement::new("SELECT id FROM items"), 20, 10);
        assert_eq!(
            st.sql(),
            "SELECT * FROM(SELECT rownum rnum, a.* FROM(SELECT id FROM items) a \
             WHERE rownum <= ?) WHERE rnum > ?"
        );
        assert_eq!(st.values(), [SqlValue::Int(30), SqlValue::Int(20)]);
    }

    #[test]
    fn test_default_equality() {
        let eq = OracleDialect::new().default_equality();
        let mut stored = PhysicalColumn::new(PhysicalType::Numeric, "qty");
        let mut wanted = stored.clone();
        stored.default = Some("0 ".into());
        wanted.default = Some("0".into());
        assert!(eq(&stored, &wanted));

        stored.default = Some("TO_CHAR(\"A\"||' x '||\"B\")".into());
        wanted.default = Some("(A || ' x ' || B)".into());
        wanted.is_virtual = true;
        assert!(eq(&stored, &wanted));

        stored.default = Some("A+1".into());
        assert!(!eq(&stored, &wanted));
    }

    #[test]
    fn test_type_actions() {
        let d = OracleDialect::new();
        assert_eq!(d.type_action(PhysicalType::Numeric, PhysicalType::Numeric), None);
        assert_eq!(d.type_action(PhysicalType::Timestamp, PhysicalType::Date), None);
        assert_eq!(
            d.type_action(PhysicalType::Varchar, PhysicalType::Numeric),
            Some(TypeAction::Recreate)
        );
    }

    #[test]
    fn test_defaults() {
        let d = OracleDialect::new();
        assert_eq!(d.default_sql(&DefaultValue::Now, PhysicalType::Date).unwrap(), "SYSDATE");
        assert_eq!(
            d.default_sql(&DefaultValue::NewUuid, PhysicalType::Varbinary).unwrap(),
            "SYS_GUID()"
        );
        assert!(d.default_sql(&DefaultValue::Now, PhysicalType::Varchar).is_err());
        assert_eq!(
            d.default_sql(&DefaultValue::Text("it's".into()), PhysicalType::Varchar).unwrap(),
            "'it''s'"
        );
    }
}
