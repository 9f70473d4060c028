//! SQLite dialect.
//!
//! SQLite has dynamic typing with type affinity; declared types are kept
//! readable (`VARCHAR(80)`, `NUMERIC(15,2)`, `BLOB(16)`) so that the catalog
//! reports back what the model asked for. Temporality, comments and
//! post-hoc foreign keys are not expressible and are skipped.
//!
//! Column changes go through a temporary column and `DROP COLUMN`, which
//! SQLite refuses for primary key columns.

use super::{require_upsert_key, Dialect};
use crate::dml::{Batch, TableWrite};
use crate::error::{Error, Result};
use crate::model::{BoundTable, ColumnType, DefaultValue, Procedure, Trigger};
use crate::physical::{PhysicalColumn, PhysicalType};
use crate::statement::{Param, Statement};
use crate::sync::{ansi_default_equality, ColumnDiff, DefaultEquality};
use crate::value::SqlValue;

const LEN_VARCHAR: u32 = 255;
const LEN_MONEY: u32 = 15;
const PRC_MONEY: u32 = 2;
const LEN_UUID: u32 = 36;

/// SQLite dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl SqliteDialect {
    /// Creates a new SQLite dialect.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn on_conflict(key: &[String], columns: &[String]) -> String {
        let set: Vec<String> = columns
            .iter()
            .filter(|c| !key.contains(*c))
            .map(|c| format!("{c}=excluded.{c}"))
            .collect();
        let action = if set.is_empty() {
            String::from("DO NOTHING")
        } else {
            format!("DO UPDATE SET {}", set.join(","))
        };
        format!(" ON CONFLICT ({}) {action}", key.join(","))
    }
}

/// The catalog does not report generated-column formulas.
fn sqlite_default_equality(as_is: &PhysicalColumn, to_be: &PhysicalColumn) -> bool {
    ansi_default_equality(as_is, to_be) || (to_be.is_virtual && as_is.default.is_none())
}

impl Dialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn canonical(&self, ty: ColumnType, length: u32, precision: u32) -> (ColumnType, u32, u32) {
        let or = |value: u32, default: u32| if value == 0 { default } else { value };
        match ty {
            ColumnType::Boolean => (ColumnType::Numeric, 1, 0),
            ColumnType::Money => (
                ColumnType::Numeric,
                or(length, LEN_MONEY),
                or(precision, PRC_MONEY),
            ),
            ColumnType::String => (ColumnType::String, or(length, LEN_VARCHAR), 0),
            ColumnType::Integer => (ColumnType::Integer, 0, 0),
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
            ColumnType::Integer => PhysicalColumn::new(PhysicalType::Integer, name),
            ColumnType::Numeric | ColumnType::Money | ColumnType::Boolean => {
                PhysicalColumn::new(PhysicalType::Numeric, name).sized(length, precision)
            }
            ColumnType::String => PhysicalColumn::new(PhysicalType::Varchar, name).sized(length, 0),
            ColumnType::Text => PhysicalColumn::new(PhysicalType::Clob, name),
            ColumnType::Blob => PhysicalColumn::new(PhysicalType::Blob, name),
            ColumnType::Date | ColumnType::Datetime => PhysicalColumn::new(PhysicalType::Date, name),
            ColumnType::Timestamp => PhysicalColumn::new(PhysicalType::Timestamp, name),
            ColumnType::Uuid => {
                PhysicalColumn::new(PhysicalType::Varchar, name).sized(LEN_UUID, 0)
            }
            ColumnType::Binary => PhysicalColumn::new(PhysicalType::Varbinary, name).sized(length, 0),
        }
    }

    fn type_name(&self, ty: PhysicalType) -> &'static str {
        match ty {
            PhysicalType::Numeric => "NUMERIC",
            PhysicalType::Integer => "INTEGER",
            PhysicalType::Real => "REAL",
            PhysicalType::Varchar => "VARCHAR",
            PhysicalType::Char => "CHAR",
            PhysicalType::Clob | PhysicalType::Other => "TEXT",
            // BLOB keeps blob affinity; a length marks it as bounded.
            PhysicalType::Blob | PhysicalType::Varbinary => "BLOB",
            PhysicalType::Date => "DATE",
            PhysicalType::Timestamp => "TIMESTAMP",
        }
    }

    fn default_sql(&self, default: &DefaultValue, _ty: PhysicalType) -> Result<String> {
        match default {
            DefaultValue::Now => Ok(String::from("CURRENT_TIMESTAMP")),
            DefaultValue::EmptyBlob => Ok(String::from("X''")),
            DefaultValue::NewUuid => Err(Error::Unsupported {
                dialect: self.name(),
                what: String::from("generated UUID defaults"),
            }),
            DefaultValue::Virtual(expression) => Ok(expression.clone()),
            constant => Ok(constant.const_sql().unwrap_or_default()),
        }
    }

    fn supports_comments(&self) -> bool {
        false
    }

    fn default_equality(&self) -> DefaultEquality {
        sqlite_default_equality
    }

    fn virtual_clause(&self, expression: &str) -> String {
        format!(" GENERATED ALWAYS AS ({expression}) VIRTUAL")
    }

    fn create_table(&self, table: &BoundTable) -> Vec<Statement> {
        let mut defs: Vec<String> = table
            .columns()
            .map(|c| format!("{} {}", c.name(), self.column_definition(c.physical(), true)))
            .collect();
        if !table.pk().is_empty() {
            defs.push(format!("PRIMARY KEY ({})", table.pk().join(",")));
        }
        vec![Statement::new(format!(
            "CREATE TABLE {} ({})",
            table.name(),
            defs.join(",")
        ))]
    }

    fn set_nullable(
        &self,
        table: &str,
        column: &PhysicalColumn,
        nullable: bool,
        tmp: &str,
    ) -> Vec<Statement> {
        let mut column = column.clone();
        column.nullable = nullable;
        self.recreate_column(table, &column, tmp)
    }

    fn rebuilds_column(&self, diff: &ColumnDiff) -> bool {
        diff.type_action.is_some() || diff.null_action.is_some()
    }

    fn add_foreign_key(&self, _table: &str, _column: &str, _target: &str) -> Option<Statement> {
        None
    }

    fn create_view(&self, name: &str, sql: &str) -> Vec<Statement> {
        vec![
            Statement::new(format!("DROP VIEW IF EXISTS {name}")),
            Statement::new(format!("CREATE VIEW {name} AS {sql}")),
        ]
    }

    fn create_trigger(&self, table: &str, trigger: &Trigger) -> Vec<Statement> {
        let name = self.trigger_name(table, trigger);
        vec![
            Statement::new(format!("DROP TRIGGER IF EXISTS {name}")),
            Statement::new(format!(
                "CREATE TRIGGER {name} {} ON {table} FOR EACH ROW {}",
                trigger.when, trigger.what
            )),
        ]
    }

    fn create_procedure(&self, procedure: &Procedure) -> Result<Vec<Statement>> {
        Err(Error::Unsupported {
            dialect: self.name(),
            what: format!("stored procedure {}", procedure.name),
        })
    }

    fn upsert(&self, write: &TableWrite<'_>) -> Result<Batch> {
        require_upsert_key(self.name(), write)?;
        let columns = write.all_columns();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({}){}",
            write.table().name(),
            columns.join(","),
            vec!["?"; columns.len()].join(","),
            Self::on_conflict(write.key_columns(), &columns)
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
        let list = columns.join(",");
        // WHERE true disambiguates ON CONFLICT from a join constraint.
        Ok(Statement::new(format!(
            "INSERT INTO {} ({list}) SELECT {list} FROM {source} WHERE true{}",
            target.name(),
            Self::on_conflict(key, &columns)
        )))
    }

    fn truncate(&self, table: &str) -> Statement {
        Statement::new(format!("DELETE FROM {table}"))
    }

    fn delete_alias(&self, alias: &str) -> String {
        format!(" AS {alias}")
    }

    fn paginate(&self, inner: Statement, offset: u64, limit: u64) -> Statement {
        let int = |n: u64| {
            Param::typed(
                SqlValue::Int(i64::try_from(n).unwrap_or(i64::MAX)),
                PhysicalType::Integer,
            )
        };
        let (mut sql, mut params) = inner.into_parts();
        sql.push_str(" LIMIT ? OFFSET ?");
        params.push(int(limit));
        params.push(int(offset));
        Statement::from_parts(sql, params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dml::KeySpec;
    use crate::model::{id_column, Column, Model, Table};
    use crate::record;

    fn schema() -> crate::model::Schema {
        let mut m = Model::new();
        m.add(
            Table::new("items", "Items")
                .pk(id_column(ColumnType::Integer))
                .unwrap()
                .col(Column::new("label", ColumnType::String))
                .unwrap()
                .col(Column::new("qty", ColumnType::Integer).default_value(DefaultValue::number(0)))
                .unwrap()
                .col(Column::new("twice", ColumnType::Integer).virtual_expr("qty * 2"))
                .unwrap()
                .trigger("AFTER INSERT", "BEGIN SELECT 1; END"),
        )
        .unwrap();
        m.compile(&SqliteDialect::new()).unwrap()
    }

    #[test]
    fn test_create_table_with_inline_key() {
        let d = SqliteDialect::new();
        let sts = d.create_table(&schema().table("items").unwrap());
        assert_eq!(sts.len(), 1);
        assert_eq!(
            sts[0].sql(),
            "CREATE TABLE items (id INTEGER DEFAULT NULL NOT NULL,\
             label VARCHAR(255) DEFAULT NULL NOT NULL,\
             qty INTEGER DEFAULT 0 NOT NULL,\
             twice INTEGER GENERATED ALWAYS AS (qty * 2) VIRTUAL,\
             PRIMARY KEY (id))"
        );
    }

    #[test]
    fn test_upsert_on_conflict() {
        let d = SqliteDialect::new();
        let s = schema();
        let items = s.table("items").unwrap();
        let records = [record! { "id" => 1, "label" => "a", "qty" => 3 }];
        let w = TableWrite::new(&items, &records, &KeySpec::Primary).unwrap();
        assert_eq!(
            d.upsert(&w).unwrap().sql(),
            "INSERT INTO items (label,qty,id) VALUES (?,?,?) \
             ON CONFLICT (id) DO UPDATE SET label=excluded.label,qty=excluded.qty"
        );

        let only_key = [record! { "id" => 1 }];
        let w = TableWrite::new(&items, &only_key, &KeySpec::Primary).unwrap();
        assert!(d.upsert(&w).unwrap().sql().ends_with("ON CONFLICT (id) DO NOTHING"));
    }

    #[test]
    fn test_merge_table() {
        let d = SqliteDialect::new();
        let st = d
            .merge_table(&schema().table("items").unwrap(), "stage", &["id".into()])
            .unwrap();
        assert_eq!(
            st.sql(),
            "INSERT INTO items (id,label,qty) SELECT id,label,qty FROM stage WHERE true \
             ON CONFLICT (id) DO UPDATE SET label=excluded.label,qty=excluded.qty"
        );
    }

    #[test]
    fn test_pagination() {
        let st = SqliteDialect::new().paginate(Statement::new("SELECT * FROM items"), 5, 10);
        assert_eq!(st.sql(), "SELECT * FROM items LIMIT ? OFFSET ?");
        assert_eq!(st.values(), [SqlValue::Int(10), SqlValue::Int(5)]);
    }

    #[test]
    fn test_unsupported_constructs() {
        let d = SqliteDialect::new();
        assert!(d.comment_table("items", "x").is_none());
        assert!(d.add_foreign_key("items", "id_org", "orgs").is_none());
        assert!(d.create_procedure(&Procedure::new("p", "", "BEGIN NULL; END;")).is_err());
        assert!(d.default_sql(&DefaultValue::NewUuid, PhysicalType::Varchar).is_err());
    }

    #[test]
    fn test_trigger_and_view_are_replaced() {
        let d = SqliteDialect::new();
        let s = schema();
        let items = s.table("items").unwrap();
        let trigger = &items.triggers()["after_insert"];
        let sts = d.create_trigger("items", trigger);
        assert_eq!(sts[0].sql(), "DROP TRIGGER IF EXISTS tr_items_after_insert");
        assert_eq!(
            sts[1].sql(),
            "CREATE TRIGGER tr_items_after_insert AFTER INSERT ON items FOR EACH ROW BEGIN SELECT 1; END"
        );
        let sts = d.create_view("vw", "SELECT 1");
        assert_eq!(sts[0].sql(), "DROP VIEW IF EXISTS vw");
    }

    #[test]
    fn test_recreate_stored_column() {
        let d = SqliteDialect::new();
        let s = schema();
        let qty = s.table("items").unwrap().column("qty").unwrap().physical().clone();
        let sts = d.set_nullable("items", &qty, true, "tmp_1");
        let sql: Vec<&str> = sts.iter().map(Statement::sql).collect();
        assert_eq!(
            sql,
            [
                "ALTER TABLE items ADD tmp_1 INTEGER DEFAULT 0",
                "UPDATE items SET tmp_1 = qty",
                "ALTER TABLE items DROP COLUMN qty",
                "ALTER TABLE items RENAME COLUMN tmp_1 TO qty",
            ]
        );
    }

    #[test]
    fn test_virtual_default_equality() {
        let eq = SqliteDialect::new().default_equality();
        let stored = PhysicalColumn::new(PhysicalType::Integer, "twice");
        let mut wanted = stored.clone();
        wanted.default = Some("qty * 2".into());
        wanted.is_virtual = true;
        assert!(eq(&stored, &wanted));
        wanted.is_virtual = false;
        assert!(!eq(&stored, &wanted));
    }
}
