//! Oracle catalog: the `USER_*` dictionary views.
//!
//! After a synchronization, views and triggers left invalid by the order
//! in which objects were created are recompiled; any remaining
//! compilation error fails the run.

use std::collections::BTreeSet;

use async_trait::async_trait;
use relsync_core::model::{Schema, Trigger};
use relsync_core::physical::{
    KeyPart, PhysicalColumn, PhysicalKey, PhysicalModel, PhysicalTable, PhysicalType,
};
use relsync_core::{Param, Record, SqlValue, Statement};
use tracing::{debug, info, warn};

use super::{size, stored_default, text, Catalog};
use crate::error::{Result, SyncError};
use crate::executor::Executor;

const TABLES: &str = "SELECT t.table_name, c.comments FROM user_tables t \
    LEFT JOIN user_tab_comments c ON c.table_name = t.table_name \
    WHERE t.table_name NOT LIKE 'BIN$%' ORDER BY t.table_name";

const VIEWS: &str = "SELECT v.view_name, v.text, c.comments FROM user_views v \
    LEFT JOIN user_tab_comments c ON c.table_name = v.view_name ORDER BY v.view_name";

const COLUMNS: &str = "SELECT c.table_name, c.column_name, c.data_type, c.data_length, \
    c.data_precision, c.data_scale, c.char_length, c.nullable, c.data_default, \
    c.virtual_column, m.comments FROM user_tab_cols c \
    LEFT JOIN user_col_comments m ON m.table_name = c.table_name AND m.column_name = c.column_name \
    WHERE c.hidden_column = 'NO' ORDER BY c.table_name, c.column_id";

const PRIMARY_KEYS: &str = "SELECT cc.table_name, cc.column_name FROM user_constraints k \
    JOIN user_cons_columns cc ON cc.constraint_name = k.constraint_name \
    WHERE k.constraint_type = 'P' ORDER BY cc.table_name, cc.position";

const FOREIGN_KEYS: &str = "SELECT k.constraint_name, cc.table_name, cc.column_name, \
    r.table_name AS target FROM user_constraints k \
    JOIN user_cons_columns cc ON cc.constraint_name = k.constraint_name \
    JOIN user_constraints r ON r.constraint_name = k.r_constraint_name \
    WHERE k.constraint_type = 'R'";

const INDEXES: &str = "SELECT i.table_name, i.index_name, i.uniqueness, c.column_name, c.descend \
    FROM user_indexes i JOIN user_ind_columns c ON c.index_name = i.index_name \
    WHERE NOT EXISTS (SELECT 1 FROM user_constraints k \
    WHERE k.constraint_type = 'P' AND k.index_name = i.index_name) \
    ORDER BY i.index_name, c.column_position";

const TRIGGERS: &str = "SELECT trigger_name, table_name, trigger_type, triggering_event, \
    trigger_body FROM user_triggers WHERE base_object_type = 'TABLE'";

const INVALID: &str = "SELECT object_name FROM user_objects \
    WHERE object_type = ? AND status = 'INVALID' ORDER BY object_name";

const ERRORS: &str = "SELECT name, type, line, text FROM user_errors ORDER BY name, sequence";

/// Reads the schema of the connected Oracle user.
#[derive(Debug, Clone, Copy, Default)]
pub struct OracleCatalog;

impl OracleCatalog {
    /// Creates the catalog.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

/// Physical column from a `USER_TAB_COLS` row.
fn column(row: &Record) -> PhysicalColumn {
    let data_type = text(row, "data_type").to_uppercase();
    let (ty, length, scale) = match data_type.as_str() {
        "NUMBER" => (
            PhysicalType::Numeric,
            size(row, "data_precision"),
            size(row, "data_scale"),
        ),
        "FLOAT" | "BINARY_FLOAT" | "BINARY_DOUBLE" => (PhysicalType::Real, 0, 0),
        "VARCHAR2" | "NVARCHAR2" => (PhysicalType::Varchar, size(row, "char_length"), 0),
        "CHAR" | "NCHAR" => (PhysicalType::Char, size(row, "char_length"), 0),
        "CLOB" | "NCLOB" | "LONG" => (PhysicalType::Clob, 0, 0),
        "BLOB" => (PhysicalType::Blob, 0, 0),
        "RAW" => (PhysicalType::Varbinary, size(row, "data_length"), 0),
        "DATE" => (PhysicalType::Date, 0, 0),
        t if t.starts_with("TIMESTAMP") => (PhysicalType::Timestamp, 0, 0),
        _ => (PhysicalType::Other, 0, 0),
    };
    let mut column = PhysicalColumn::new(ty, text(row, "column_name")).sized(length, scale);
    column.nullable = text(row, "nullable") == "Y";
    column.default = stored_default(&text(row, "data_default"));
    column.remark = text(row, "comments");
    column.is_virtual = text(row, "virtual_column") == "YES";
    column
}

/// `BEFORE EACH ROW` + `INSERT OR UPDATE` → `BEFORE INSERT OR UPDATE`.
fn trigger_when(trigger_type: &str, event: &str) -> String {
    let timing = trigger_type
        .trim()
        .trim_end_matches("EACH ROW")
        .trim_end_matches("STATEMENT")
        .trim();
    format!("{timing} {}", event.trim())
}

impl OracleCatalog {
    async fn invalid(&self, exec: &mut Executor, object_type: &str) -> Result<BTreeSet<String>> {
        let st = Statement::from_parts(
            INVALID,
            vec![Param::untyped(SqlValue::Text(object_type.to_owned()))],
        );
        Ok(exec
            .get_list(&st)
            .await?
            .iter()
            .map(|r| text(r, "object_name").to_lowercase())
            .collect())
    }

    /// Runs a statement whose failure is checked later through the
    /// object status.
    async fn attempt(&self, exec: &mut Executor, sql: String) {
        if let Err(e) = exec.execute(&Statement::new(sql)).await {
            debug!(error = %e, "Compilation attempt failed");
        }
    }

    async fn recompile_views(&self, exec: &mut Executor, schema: &Schema) -> Result<()> {
        let mut invalid = self.invalid(exec, "VIEW").await?;
        let mut previous: Option<BTreeSet<String>> = None;
        while !invalid.is_empty() && previous.as_ref() != Some(&invalid) {
            for view in &invalid {
                info!(view = %view, "Recompiling view");
                self.attempt(exec, format!("ALTER VIEW {view} COMPILE")).await;
                self.recomment(exec, schema, view).await?;
            }
            previous = Some(std::mem::take(&mut invalid));
            invalid = self.invalid(exec, "VIEW").await?;
        }
        Ok(())
    }

    async fn recomment(&self, exec: &mut Executor, schema: &Schema, view: &str) -> Result<()> {
        let Some(table) = schema.get(view) else {
            return Ok(());
        };
        let dialect = exec.dialect_arc();
        let mut statements = Vec::new();
        if !table.remark().is_empty() {
            statements.extend(dialect.comment_table(table.name(), table.remark()));
        }
        for c in table.columns().filter(|c| !c.remark().is_empty()) {
            statements.extend(dialect.comment_column(table.name(), c.name(), c.remark()));
        }
        for st in &statements {
            exec.execute(st).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Catalog for OracleCatalog {
    async fn load(&self, exec: &mut Executor) -> Result<PhysicalModel> {
        let mut model = PhysicalModel::new();
        for row in exec.get_list(&Statement::new(TABLES)).await? {
            let mut table = PhysicalTable::new(text(&row, "table_name"));
            table.remark = text(&row, "comments");
            model.add(table);
        }
        for row in exec.get_list(&Statement::new(VIEWS)).await? {
            let mut view = PhysicalTable::view(text(&row, "view_name"), text(&row, "text"));
            view.remark = text(&row, "comments");
            model.add(view);
        }
        for row in exec.get_list(&Statement::new(COLUMNS)).await? {
            if let Some(table) = model.get_mut(&text(&row, "table_name")) {
                table.add_column(column(&row));
            }
        }
        for row in exec.get_list(&Statement::new(PRIMARY_KEYS)).await? {
            if let Some(table) = model.get_mut(&text(&row, "table_name")) {
                table.pk.push(text(&row, "column_name").to_lowercase());
            }
        }
        for row in exec.get_list(&Statement::new(FOREIGN_KEYS)).await? {
            let Some(table) = model.get_mut(&text(&row, "table_name")) else {
                continue;
            };
            if let Some(column) = table.column_mut(&text(&row, "column_name")) {
                column.reference = Some(text(&row, "target").to_lowercase());
                column.fk = Some(text(&row, "constraint_name").to_lowercase());
            }
        }
        for row in exec.get_list(&Statement::new(INDEXES)).await? {
            let Some(table) = model.get_mut(&text(&row, "table_name")) else {
                continue;
            };
            let name = text(&row, "index_name").to_lowercase();
            let part = KeyPart {
                column: text(&row, "column_name").to_lowercase(),
                desc: text(&row, "descend") == "DESC",
            };
            match table.keys.get_mut(&name) {
                Some(key) => key.parts.push(part),
                None => table.add_key(PhysicalKey {
                    name,
                    unique: text(&row, "uniqueness") == "UNIQUE",
                    parts: vec![part],
                }),
            }
        }
        for row in exec.get_list(&Statement::new(TRIGGERS)).await? {
            if let Some(table) = model.get_mut(&text(&row, "table_name")) {
                let name = text(&row, "trigger_name").to_lowercase();
                let trigger = Trigger {
                    name: name.clone(),
                    when: trigger_when(&text(&row, "trigger_type"), &text(&row, "triggering_event")),
                    what: text(&row, "trigger_body"),
                };
                table.triggers.insert(name, trigger);
            }
        }
        debug!(objects = model.tables.len(), "Loaded Oracle catalog");
        Ok(model)
    }

    async fn post_check(&self, exec: &mut Executor, schema: &Schema) -> Result<()> {
        exec.execute(&Statement::new("PURGE RECYCLEBIN")).await?;
        self.recompile_views(exec, schema).await?;
        for trigger in self.invalid(exec, "TRIGGER").await? {
            info!(trigger = %trigger, "Recompiling trigger");
            self.attempt(exec, format!("ALTER TRIGGER {trigger} COMPILE")).await;
        }

        let errors = exec.get_list(&Statement::new(ERRORS)).await?;
        for e in &errors {
            warn!(
                object = %text(e, "name"),
                kind = %text(e, "type"),
                line = %text(e, "line"),
                "{}",
                text(e, "text")
            );
        }
        match errors.first() {
            None => Ok(()),
            Some(first) => Err(SyncError::Convergence {
                object: text(first, "name").to_lowercase(),
                message: format!(
                    "{} error(s), first at line {}: {}",
                    errors.len(),
                    text(first, "line"),
                    text(first, "text").trim()
                ),
            }),
        }
    }
}
