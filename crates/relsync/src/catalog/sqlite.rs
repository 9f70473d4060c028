//! SQLite catalog: `sqlite_master` and the table-valued pragmas.

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use relsync_core::model::Trigger;
use relsync_core::physical::{
    KeyPart, PhysicalColumn, PhysicalKey, PhysicalModel, PhysicalTable, PhysicalType,
};
use relsync_core::{Param, SqlValue, Statement};
use tracing::debug;

use super::{size, stored_default, text, Catalog};
use crate::error::Result;
use crate::executor::Executor;

/// Reads the schema of a SQLite database.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteCatalog;

impl SqliteCatalog {
    /// Creates the catalog.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

fn with_name(sql: &str, name: &str) -> Statement {
    Statement::from_parts(sql, vec![Param::untyped(SqlValue::Text(name.to_owned()))])
}

/// Physical type of a declared column type such as `VARCHAR(80)` or
/// `NUMERIC(15,2)`.
fn declared_type(declared: &str) -> (PhysicalType, u32, u32) {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"^\s*([A-Za-z][A-Za-z0-9_ ]*?)\s*(?:\(\s*(\d+)\s*(?:,\s*(\d+)\s*)?\))?(?:\s|$)")
            .expect("valid declared type regex")
    });
    let Some(caps) = re.captures(declared) else {
        return (PhysicalType::Other, 0, 0);
    };
    let base = caps[1].to_uppercase();
    let number = |i: usize| {
        caps.get(i)
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(0)
    };
    let (length, scale) = (number(2), number(3));
    let ty = match base.split_whitespace().next().unwrap_or_default() {
        "VARCHAR" | "NVARCHAR" | "VARCHAR2" => PhysicalType::Varchar,
        "CHAR" | "NCHAR" | "CHARACTER" => PhysicalType::Char,
        "NUMERIC" | "DECIMAL" | "NUMBER" => PhysicalType::Numeric,
        "INTEGER" | "INT" | "BIGINT" | "SMALLINT" => PhysicalType::Integer,
        "REAL" | "FLOAT" | "DOUBLE" => PhysicalType::Real,
        "TEXT" | "CLOB" => PhysicalType::Clob,
        "BLOB" if length > 0 => PhysicalType::Varbinary,
        "BLOB" => PhysicalType::Blob,
        "DATE" => PhysicalType::Date,
        "TIMESTAMP" | "DATETIME" => PhysicalType::Timestamp,
        _ => PhysicalType::Other,
    };
    (ty, length, scale)
}

/// The query of a `CREATE VIEW` statement.
fn view_query(sql: &str) -> String {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"(?is)^\s*CREATE\s+(?:TEMP\s+|TEMPORARY\s+)?VIEW\s+(?:IF\s+NOT\s+EXISTS\s+)?\S+\s+AS\s+(.*)$")
            .expect("valid view regex")
    });
    re.captures(sql)
        .and_then(|c| c.get(1))
        .map_or_else(|| sql.to_owned(), |m| m.as_str().to_owned())
}

/// Timing/event and body of a `CREATE TRIGGER` statement.
fn trigger_parts(sql: &str) -> Option<(String, String)> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(
            r"(?is)^\s*CREATE\s+(?:TEMP\s+|TEMPORARY\s+)?TRIGGER\s+(?:IF\s+NOT\s+EXISTS\s+)?\S+\s+(.*?)\s+ON\s+\S+\s+(?:FOR\s+EACH\s+ROW\s+)?(.*)$",
        )
        .expect("valid trigger regex")
    });
    let caps = re.captures(sql)?;
    Some((caps[1].to_owned(), caps[2].to_owned()))
}

impl SqliteCatalog {
    async fn columns(&self, exec: &mut Executor, table: &mut PhysicalTable) -> Result<()> {
        let rows = exec
            .get_list(&with_name(
                "SELECT name, type, \"notnull\", dflt_value, pk, hidden \
                 FROM pragma_table_xinfo(?) ORDER BY cid",
                &table.name,
            ))
            .await?;
        let mut pk: Vec<(u32, String)> = Vec::new();
        for row in rows {
            let (ty, length, scale) = declared_type(&text(&row, "type"));
            let mut column = PhysicalColumn::new(ty, text(&row, "name")).sized(length, scale);
            column.nullable = size(&row, "notnull") == 0;
            column.default = stored_default(&text(&row, "dflt_value"));
            column.is_virtual = matches!(size(&row, "hidden"), 2 | 3);
            let position = size(&row, "pk");
            if position > 0 {
                pk.push((position, column.name.clone()));
            }
            table.add_column(column);
        }
        pk.sort();
        table.pk = pk.into_iter().map(|(_, name)| name).collect();
        Ok(())
    }

    async fn keys(&self, exec: &mut Executor, table: &mut PhysicalTable) -> Result<()> {
        let indexes = exec
            .get_list(&with_name(
                "SELECT name, \"unique\", origin FROM pragma_index_list(?)",
                &table.name,
            ))
            .await?;
        for index in indexes {
            let name = text(&index, "name");
            if text(&index, "origin") == "pk" || name.starts_with("sqlite_autoindex") {
                continue;
            }
            let parts = exec
                .get_list(&with_name(
                    "SELECT name, \"desc\" FROM pragma_index_xinfo(?) WHERE key = 1 ORDER BY seqno",
                    &name,
                ))
                .await?
                .iter()
                .map(|p| KeyPart {
                    column: text(p, "name").to_lowercase(),
                    desc: size(p, "desc") == 1,
                })
                .collect();
            table.add_key(PhysicalKey {
                name: name.to_lowercase(),
                unique: size(&index, "unique") == 1,
                parts,
            });
        }
        Ok(())
    }

    async fn foreign_keys(&self, exec: &mut Executor, table: &mut PhysicalTable) -> Result<()> {
        let rows = exec
            .get_list(&with_name(
                "SELECT id, \"from\", \"table\" FROM pragma_foreign_key_list(?)",
                &table.name,
            ))
            .await?;
        for row in rows {
            if let Some(column) = table.column_mut(&text(&row, "from")) {
                column.reference = Some(text(&row, "table").to_lowercase());
                column.fk = Some(format!("fk_{}", text(&row, "id")));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Catalog for SqliteCatalog {
    async fn load(&self, exec: &mut Executor) -> Result<PhysicalModel> {
        let objects = exec
            .get_list(&Statement::new(
                "SELECT type, name, sql FROM sqlite_master \
                 WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%' ORDER BY rowid",
            ))
            .await?;
        let mut model = PhysicalModel::new();
        for object in objects {
            let name = text(&object, "name");
            let mut table = if text(&object, "type") == "view" {
                PhysicalTable::view(&name, view_query(&text(&object, "sql")))
            } else {
                PhysicalTable::new(&name)
            };
            self.columns(exec, &mut table).await?;
            if !table.is_view() {
                self.keys(exec, &mut table).await?;
                self.foreign_keys(exec, &mut table).await?;
            }
            model.add(table);
        }

        let triggers = exec
            .get_list(&Statement::new(
                "SELECT name, tbl_name, sql FROM sqlite_master WHERE type = 'trigger'",
            ))
            .await?;
        for row in triggers {
            let Some((when, what)) = trigger_parts(&text(&row, "sql")) else {
                continue;
            };
            if let Some(table) = model.get_mut(&text(&row, "tbl_name")) {
                let name = text(&row, "name").to_lowercase();
                table
                    .triggers
                    .insert(name.clone(), Trigger { name, when, what });
            }
        }
        debug!(objects = model.tables.len(), "Loaded SQLite catalog");
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declared_types() {
        assert_eq!(declared_type("VARCHAR(80)"), (PhysicalType::Varchar, 80, 0));
        assert_eq!(declared_type("NUMERIC(15,2)"), (PhysicalType::Numeric, 15, 2));
        assert_eq!(declared_type("numeric(1, 0)"), (PhysicalType::Numeric, 1, 0));
        assert_eq!(declared_type("INTEGER"), (PhysicalType::Integer, 0, 0));
        assert_eq!(declared_type("BLOB(16)"), (PhysicalType::Varbinary, 16, 0));
        assert_eq!(declared_type("BLOB"), (PhysicalType::Blob, 0, 0));
        assert_eq!(declared_type("TEXT"), (PhysicalType::Clob, 0, 0));
        assert_eq!(
            declared_type("TEXT GENERATED ALWAYS"),
            (PhysicalType::Clob, 0, 0)
        );
        assert_eq!(declared_type(""), (PhysicalType::Other, 0, 0));
    }

    #[test]
    fn test_view_query_is_stripped() {
        assert_eq!(
            view_query("CREATE VIEW v AS SELECT id FROM t"),
            "SELECT id FROM t"
        );
        assert_eq!(
            view_query("create view if not exists v as\nSELECT 1"),
            "SELECT 1"
        );
    }

    #[test]
    fn test_trigger_parts() {
        let (when, what) = trigger_parts(
            "CREATE TRIGGER tr_t_before_insert BEFORE INSERT ON t FOR EACH ROW BEGIN SELECT 1; END",
        )
        .unwrap();
        assert_eq!(when, "BEFORE INSERT");
        assert_eq!(what, "BEGIN SELECT 1; END");
    }
}
