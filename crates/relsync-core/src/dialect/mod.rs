//! SQL dialects.
//!
//! [`Dialect`] carries an ANSI baseline in its provided methods; each
//! vendor overrides type mapping, pagination, upsert syntax and the DDL
//! forms it spells differently. The synchronization planner and the query
//! builder only ever see `&dyn Dialect`.

mod oracle;
mod sqlite;

pub use oracle::OracleDialect;
pub use sqlite::SqliteDialect;

use crate::dml::{Batch, TableWrite};
use crate::error::{Error, Result};
use crate::model::{BoundTable, ColumnType, DefaultValue, Key, Procedure, Temporality, Trigger};
use crate::physical::{KeyPart, PhysicalColumn, PhysicalKey, PhysicalType};
use crate::query::{render, Predicate, Select};
use crate::statement::{Param, Statement};
use crate::sync::{ansi_default_equality, ColumnDiff, DefaultEquality, TypeAction};
use crate::value::{hex_upper, SqlValue};

/// Result-set metadata of one column, as reported by the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMeta {
    /// Column label.
    pub name: String,
    /// Declared type.
    pub ty: PhysicalType,
    /// Declared length, 0 when unknown.
    pub length: u32,
    /// Declared scale, 0 when unknown.
    pub scale: u32,
}

/// Escapes a comment into a SQL string literal.
#[must_use]
pub fn quote_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// A vendor-specific SQL rendering and type-mapping strategy.
pub trait Dialect: Send + Sync + std::fmt::Debug {
    /// Dialect name, used in logs and errors.
    fn name(&self) -> &'static str;

    // ---- type mapping ----

    /// Maps a logical type to the subset this vendor stores natively,
    /// applying default lengths.
    fn canonical(&self, ty: ColumnType, length: u32, precision: u32) -> (ColumnType, u32, u32);

    /// The physical column a canonical logical column compiles to.
    fn basic_physical(
        &self,
        name: &str,
        ty: ColumnType,
        length: u32,
        precision: u32,
    ) -> PhysicalColumn;

    /// Type keyword for DDL.
    fn type_name(&self, ty: PhysicalType) -> &'static str;

    /// SQL text of a default value for a column of type `ty`.
    ///
    /// # Errors
    ///
    /// [`Error::Unsupported`] for generators the vendor cannot express.
    fn default_sql(&self, default: &DefaultValue, ty: PhysicalType) -> Result<String>;

    /// Whether tables and columns carry comments.
    fn supports_comments(&self) -> bool {
        true
    }

    /// What converting a column from `as_is` to `to_be` requires.
    fn type_action(&self, as_is: PhysicalType, to_be: PhysicalType) -> Option<TypeAction> {
        (as_is != to_be).then_some(TypeAction::Recreate)
    }

    /// How stored default texts are compared with desired ones.
    fn default_equality(&self) -> DefaultEquality {
        ansi_default_equality
    }

    /// Longest identifier the vendor accepts, if limited.
    fn max_identifier_len(&self) -> Option<usize> {
        None
    }

    /// Name of a schema object derived from its table: `<prefix>_<table>_<name>`,
    /// replaced by `<prefix>_<md5 hex>` when over the identifier limit.
    fn object_name(&self, prefix: &str, table: &str, name: &str) -> String {
        let full = format!("{prefix}_{table}_{name}");
        match self.max_identifier_len() {
            Some(max) if full.len() > max => {
                let digest = format!("{:X}", md5::compute(full.as_bytes()));
                let keep = max.saturating_sub(prefix.len() + 1).min(digest.len());
                format!("{prefix}_{}", &digest[..keep])
            }
            _ => full,
        }
    }

    /// Physical form of a logical key.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownColumn`] for a part naming a missing column.
    fn physical_key(&self, table: &BoundTable, key: &Key) -> Result<PhysicalKey> {
        let parts = key
            .parts
            .iter()
            .map(|part| {
                let name = part.split_whitespace().next().unwrap_or_default();
                let column = table.require_column(name)?;
                Ok(KeyPart {
                    column: column.name().to_owned(),
                    desc: part.to_uppercase().ends_with(" DESC"),
                })
            })
            .collect::<Result<_>>()?;
        Ok(PhysicalKey {
            name: self.object_name("ix", table.name(), &key.name),
            unique: key.unique,
            parts,
        })
    }

    /// Name of a trigger in the database.
    fn trigger_name(&self, table: &str, trigger: &Trigger) -> String {
        self.object_name("tr", table, &trigger.name)
    }

    // ---- DDL ----

    /// `(length[,scale])` for types that take one.
    fn dimension(&self, column: &PhysicalColumn) -> String {
        match column.ty {
            PhysicalType::Numeric if column.length > 0 => {
                format!("({},{})", column.length, column.precision)
            }
            PhysicalType::Varchar | PhysicalType::Char | PhysicalType::Varbinary
                if column.length > 0 =>
            {
                format!("({})", column.length)
            }
            _ => String::new(),
        }
    }

    /// Clause declaring a computed column.
    fn virtual_clause(&self, expression: &str) -> String {
        format!(" GENERATED ALWAYS AS ({expression})")
    }

    /// Column definition after the name: type, default or formula, and
    /// `NOT NULL` when `with_null` is set.
    fn column_definition(&self, column: &PhysicalColumn, with_null: bool) -> String {
        let mut def = format!("{}{}", self.type_name(column.ty), self.dimension(column));
        match &column.default {
            Some(expression) if column.is_virtual => def.push_str(&self.virtual_clause(expression)),
            Some(expression) => {
                def.push_str(" DEFAULT ");
                def.push_str(expression);
            }
            None => def.push_str(" DEFAULT NULL"),
        }
        if with_null && !column.nullable {
            def.push_str(" NOT NULL");
        }
        def
    }

    /// Keywords around `TABLE` for a temporary table: the prefix replaces
    /// `CREATE ` and the suffix follows the column list.
    fn temporary_clauses(&self, temporality: &Temporality) -> (String, String) {
        use crate::model::{OnCommit, TemporaryScope};
        let scope = match temporality.scope {
            TemporaryScope::Global => "GLOBAL",
            TemporaryScope::Private => "PRIVATE",
        };
        let rows = match temporality.on_commit {
            OnCommit::Delete => "DELETE",
            OnCommit::Preserve => "PRESERVE",
        };
        (
            format!("CREATE {scope} TEMPORARY "),
            format!(" ON COMMIT {rows} ROWS"),
        )
    }

    /// `CREATE TABLE` followed by the primary key.
    fn create_table(&self, table: &BoundTable) -> Vec<Statement> {
        let (prefix, suffix) = match table.kind() {
            crate::model::TableKind::Temporary(t) => self.temporary_clauses(t),
            _ => (String::from("CREATE "), String::new()),
        };
        let columns: Vec<String> = table
            .columns()
            .map(|c| format!("{} {}", c.name(), self.column_definition(c.physical(), true)))
            .collect();
        let mut statements = vec![Statement::new(format!(
            "{prefix}TABLE {} ({}){suffix}",
            table.name(),
            columns.join(",")
        ))];
        if !table.pk().is_empty() {
            statements.push(Statement::new(format!(
                "ALTER TABLE {} ADD PRIMARY KEY ({})",
                table.name(),
                table.pk().join(",")
            )));
        }
        statements
    }

    /// Adds a column to an existing table.
    fn add_column(&self, table: &str, column: &PhysicalColumn) -> Vec<Statement> {
        vec![Statement::new(format!(
            "ALTER TABLE {table} ADD {} {}",
            column.name,
            self.column_definition(column, true)
        ))]
    }

    /// Drops a column.
    fn drop_column(&self, table: &str, column: &str) -> Statement {
        Statement::new(format!("ALTER TABLE {table} DROP COLUMN {column}"))
    }

    /// Widens a column in place.
    fn alter_column(&self, table: &str, column: &PhysicalColumn, tmp: &str) -> Vec<Statement> {
        self.recreate_column(table, column, tmp)
    }

    /// Makes a column nullable or NOT NULL.
    fn set_nullable(
        &self,
        table: &str,
        column: &PhysicalColumn,
        nullable: bool,
        _tmp: &str,
    ) -> Vec<Statement> {
        let action = if nullable { "DROP" } else { "SET" };
        vec![Statement::new(format!(
            "ALTER TABLE {table} ALTER COLUMN {} {action} NOT NULL",
            column.name
        ))]
    }

    /// Backfills NULLs from the column default before it becomes NOT NULL.
    fn fill_nulls(&self, table: &str, column: &PhysicalColumn) -> Option<Statement> {
        let def = column.default.as_ref()?;
        Some(Statement::new(format!(
            "UPDATE {table} SET {name} = {def} WHERE {name} IS NULL",
            name = column.name
        )))
    }

    /// Rebuilds a column: a virtual one is dropped and added again, a
    /// stored one is migrated through the temporary column `tmp`.
    fn recreate_column(&self, table: &str, column: &PhysicalColumn, tmp: &str) -> Vec<Statement> {
        if column.is_virtual {
            let mut statements = vec![self.drop_column(table, &column.name)];
            statements.extend(self.add_column(table, column));
            return statements;
        }
        let mut temporary = column.clone();
        temporary.name = tmp.to_owned();
        let mut statements = self.add_column(table, &temporary);
        statements.push(Statement::new(format!(
            "UPDATE {table} SET {tmp} = {}",
            column.name
        )));
        statements.push(self.drop_column(table, &column.name));
        statements.push(Statement::new(format!(
            "ALTER TABLE {table} RENAME COLUMN {tmp} TO {}",
            column.name
        )));
        statements
    }

    /// Whether converging `diff` drops the column at some point. Indexes
    /// on such a column are dropped before and created again after.
    fn rebuilds_column(&self, diff: &ColumnDiff) -> bool {
        diff.type_action.is_some()
    }

    /// `COMMENT ON TABLE`, when comments are supported.
    fn comment_table(&self, table: &str, remark: &str) -> Option<Statement> {
        self.supports_comments().then(|| {
            Statement::new(format!(
                "COMMENT ON TABLE {table} IS {}",
                quote_literal(remark)
            ))
        })
    }

    /// `COMMENT ON COLUMN`, when comments are supported.
    fn comment_column(&self, table: &str, column: &str, remark: &str) -> Option<Statement> {
        self.supports_comments().then(|| {
            Statement::new(format!(
                "COMMENT ON COLUMN {table}.{column} IS {}",
                quote_literal(remark)
            ))
        })
    }

    /// `CREATE [UNIQUE] INDEX`.
    fn create_key(&self, table: &str, key: &PhysicalKey) -> Statement {
        let parts: Vec<String> = key
            .parts
            .iter()
            .map(|p| {
                if p.desc {
                    format!("{} DESC", p.column)
                } else {
                    p.column.clone()
                }
            })
            .collect();
        Statement::new(format!(
            "CREATE {}INDEX {} ON {table}({})",
            if key.unique { "UNIQUE " } else { "" },
            key.name,
            parts.join(",")
        ))
    }

    /// `DROP INDEX`.
    fn drop_key(&self, _table: &str, key: &PhysicalKey) -> Statement {
        Statement::new(format!("DROP INDEX {}", key.name))
    }

    /// Foreign key for a reference column, or `None` when the vendor
    /// cannot add one after table creation.
    fn add_foreign_key(&self, table: &str, column: &str, target: &str) -> Option<Statement> {
        Some(Statement::new(format!(
            "ALTER TABLE {table} ADD FOREIGN KEY ({column}) REFERENCES {target}"
        )))
    }

    /// Creates or replaces a view.
    fn create_view(&self, name: &str, sql: &str) -> Vec<Statement> {
        vec![Statement::new(format!(
            "CREATE OR REPLACE VIEW {name} AS {sql}"
        ))]
    }

    /// View text as compared between model and catalog.
    fn normalize_view_sql(&self, sql: &str) -> String {
        sql.trim()
            .trim_end_matches(';')
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Creates or replaces a row-level trigger.
    fn create_trigger(&self, table: &str, trigger: &Trigger) -> Vec<Statement> {
        vec![Statement::new(format!(
            "CREATE OR REPLACE TRIGGER {} {} ON {table} FOR EACH ROW {}",
            self.trigger_name(table, trigger),
            trigger.when,
            trigger.what
        ))]
    }

    /// Creates or replaces a stored procedure.
    ///
    /// # Errors
    ///
    /// [`Error::Unsupported`] when the vendor has no stored procedures.
    fn create_procedure(&self, procedure: &Procedure) -> Result<Vec<Statement>> {
        let params = if procedure.params.trim().is_empty() {
            String::new()
        } else {
            format!(" ({})", procedure.params)
        };
        Ok(vec![Statement::new(format!(
            "CREATE OR REPLACE PROCEDURE {}{params} AS {}",
            procedure.name, procedure.body
        ))])
    }

    // ---- DML ----

    /// `INSERT` of every column present in the records.
    fn insert(&self, write: &TableWrite<'_>) -> Batch {
        let columns = write.all_columns();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            write.table().name(),
            columns.join(","),
            vec!["?"; columns.len()].join(",")
        );
        Batch::new(sql, write.rows(&columns))
    }

    /// `INSERT` of one record returning the generated `key` column.
    ///
    /// # Errors
    ///
    /// [`Error::Unsupported`] when the vendor has no `RETURNING` clause
    /// usable without out-parameters.
    fn insert_returning(&self, write: &TableWrite<'_>, key: &str) -> Result<Statement> {
        let batch = self.insert(write);
        let row = batch.rows().first().cloned().unwrap_or_default();
        Ok(Statement::from_parts(
            format!("{} RETURNING {key}", batch.sql()),
            row,
        ))
    }

    /// `UPDATE ... SET non-key WHERE key`.
    ///
    /// # Errors
    ///
    /// [`Error::EmptyUpdate`] when there are no non-key columns and
    /// [`Error::MissingKey`] when a record lacks a key column.
    fn update(&self, write: &TableWrite<'_>) -> Result<Batch> {
        if write.non_key_columns().is_empty() {
            return Err(Error::EmptyUpdate(write.table().name().to_owned()));
        }
        write.require_keys()?;
        let set: Vec<String> = write
            .non_key_columns()
            .iter()
            .map(|c| format!("{c}=?"))
            .collect();
        let mut sql = format!("UPDATE {} SET {}", write.table().name(), set.join(","));
        if !write.key_columns().is_empty() {
            let key: Vec<String> = write
                .key_columns()
                .iter()
                .map(|c| format!("{c}=?"))
                .collect();
            sql.push_str(" WHERE ");
            sql.push_str(&key.join(" AND "));
        }
        Ok(Batch::new(sql, write.rows(&write.all_columns())))
    }

    /// Insert-or-update keyed by the key columns.
    ///
    /// # Errors
    ///
    /// [`Error::MissingKey`] when a record lacks a key column and
    /// [`Error::Unsupported`] when the key is empty.
    fn upsert(&self, write: &TableWrite<'_>) -> Result<Batch>;

    /// Server-side upsert of every row of `source` into `target`.
    ///
    /// # Errors
    ///
    /// Fails when the key is empty.
    fn merge_table(&self, target: &BoundTable, source: &str, key: &[String]) -> Result<Statement>;

    /// Removes every row of a table.
    fn truncate(&self, table: &str) -> Statement {
        Statement::new(format!("TRUNCATE TABLE {table}"))
    }

    // ---- queries ----

    /// Wraps a query so that it yields at most `limit` rows after `offset`.
    fn paginate(&self, inner: Statement, offset: u64, limit: u64) -> Statement;

    /// Renders a SELECT.
    ///
    /// # Errors
    ///
    /// Fails on an invalid predicate argument or an unrenderable subquery.
    fn select_statement(&self, select: &Select) -> Result<Statement> {
        render::select(self, select)
    }

    /// Renders `SELECT COUNT(*)` over the same rows without pagination,
    /// keeping inner joins only.
    ///
    /// # Errors
    ///
    /// As [`Dialect::select_statement`].
    fn count_statement(&self, select: &Select) -> Result<Statement> {
        render::count(self, select)
    }

    /// Text introducing a table alias after `DELETE FROM table`.
    fn delete_alias(&self, alias: &str) -> String {
        format!(" {alias}")
    }

    /// Renders a DELETE of the rows a query selects.
    ///
    /// # Errors
    ///
    /// [`Error::VectorPrimaryKey`] when joins are present and the key is
    /// not scalar.
    fn delete_statement(&self, select: &Select) -> Result<Statement> {
        render::delete(self, select)
    }

    /// Appends the operator part of a predicate and binds its arguments.
    ///
    /// # Errors
    ///
    /// Fails when a subquery argument is used with an operator other
    /// than IN.
    fn render_predicate(
        &self,
        st: &mut Statement,
        predicate: &Predicate,
        column: &PhysicalColumn,
    ) -> Result<()> {
        render::predicate(self, st, predicate, column)
    }

    // ---- values ----

    /// Canonical application value of a column read from a result set.
    fn read_value(&self, meta: &ColumnMeta, value: SqlValue) -> SqlValue {
        read_canonical(meta, value)
    }

    /// Value actually sent for a parameter.
    fn bind_value(&self, param: &Param) -> SqlValue {
        match (&param.value, param.ty) {
            (SqlValue::Bool(b), _) => SqlValue::Int(i64::from(*b)),
            (SqlValue::Text(s), Some(PhysicalType::Varbinary)) => uuid::Uuid::parse_str(s)
                .map_or_else(
                    |_| param.value.clone(),
                    |u| SqlValue::Text(hex_upper(u.as_bytes())),
                ),
            (value, _) => value.clone(),
        }
    }
}

/// Fails unless `write` has a non-empty key carried by every record.
pub(crate) fn require_upsert_key(dialect: &'static str, write: &TableWrite<'_>) -> Result<()> {
    if write.key_columns().is_empty() {
        return Err(Error::Unsupported {
            dialect,
            what: format!("upsert into {} without a key", write.table().name()),
        });
    }
    write.require_keys()
}

/// The read rules shared by the shipped dialects: NULL character data
/// reads as `""`, whole numbers that fit 18 digits as integers, 16-byte
/// binaries as UUIDs and other binaries as hex.
#[must_use]
pub fn read_canonical(meta: &ColumnMeta, value: SqlValue) -> SqlValue {
    match (meta.ty, value) {
        (ty, SqlValue::Null) if ty.is_character() => SqlValue::Text(String::new()),
        (_, SqlValue::Null) => SqlValue::Null,
        (PhysicalType::Numeric, SqlValue::Decimal(d)) if meta.scale == 0 => {
            let digits = d.trim_start_matches('-');
            if !d.contains('.') && digits.len() <= 18 {
                d.parse().map_or(SqlValue::Decimal(d), SqlValue::Int)
            } else {
                SqlValue::Decimal(d)
            }
        }
        (PhysicalType::Varbinary | PhysicalType::Blob, SqlValue::Blob(b)) if b.len() == 16 => {
            uuid::Uuid::from_slice(&b).map_or_else(
                |_| SqlValue::Text(hex_upper(&b)),
                |u| SqlValue::Text(u.hyphenated().to_string()),
            )
        }
        (PhysicalType::Varbinary, SqlValue::Blob(b)) => SqlValue::Text(hex_upper(&b)),
        (_, SqlValue::Bool(b)) => SqlValue::Int(i64::from(b)),
        (_, value) => value,
    }
}
