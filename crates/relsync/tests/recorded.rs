//! Statement sequences checked against a recording connection.

mod common;

use std::sync::Arc;

use async_trait::async_trait;
use common::{compile, directory, items, row, text, Recorder};
use relsync::catalog::{Catalog, OracleCatalog};
use relsync::sync::SchemaSync;
use relsync::{Executor, SyncError};
use relsync_core::dialect::{OracleDialect, SqliteDialect};
use relsync_core::model::{id_column, Column, ColumnType, Model, Table};
use relsync_core::physical::PhysicalModel;
use relsync_core::{record, SqlValue};

/// A database with nothing in it.
struct EmptyCatalog;

#[async_trait]
impl Catalog for EmptyCatalog {
    async fn load(&self, _exec: &mut Executor) -> relsync::Result<PhysicalModel> {
        Ok(PhysicalModel::new())
    }
}

/// Two views, the first reading from the second.
fn layered_views() -> Model {
    let mut model = Model::new();
    model
        .add(
            Table::new("t", "")
                .pk(id_column(ColumnType::Integer))
                .unwrap(),
        )
        .unwrap()
        .add(
            Table::view("vw_top", "", "SELECT id FROM vw_base")
                .col(Column::new("id", ColumnType::Integer))
                .unwrap(),
        )
        .unwrap()
        .add(
            Table::view("vw_base", "", "SELECT id FROM t")
                .col(Column::new("id", ColumnType::Integer))
                .unwrap(),
        )
        .unwrap();
    model
}

// ===================================================================
// View passes
// ===================================================================

#[tokio::test]
async fn test_failed_view_is_retried() {
    let recorder = Recorder::new();
    let dialect = Arc::new(SqliteDialect::new());
    let mut exec = recorder.executor(dialect.clone());
    let schema = compile(&layered_views(), dialect.as_ref());
    recorder.fail("CREATE VIEW vw_top", 1);

    SchemaSync::new(&schema, &EmptyCatalog)
        .run(&mut exec)
        .await
        .unwrap();

    let creates: Vec<String> = recorder
        .sqls()
        .into_iter()
        .filter(|s| s.starts_with("CREATE VIEW"))
        .collect();
    assert_eq!(
        creates,
        [
            "CREATE VIEW vw_top AS SELECT id FROM vw_base",
            "CREATE VIEW vw_base AS SELECT id FROM t",
            "CREATE VIEW vw_top AS SELECT id FROM vw_base",
        ]
    );
}

#[tokio::test]
async fn test_view_without_progress_aborts() {
    let recorder = Recorder::new();
    let dialect = Arc::new(SqliteDialect::new());
    let mut exec = recorder.executor(dialect.clone());
    let schema = compile(&layered_views(), dialect.as_ref());
    recorder.fail("CREATE VIEW vw_top", usize::MAX);

    let err = SchemaSync::new(&schema, &EmptyCatalog)
        .run(&mut exec)
        .await
        .unwrap_err();

    match err {
        SyncError::Convergence { object, message } => {
            assert_eq!(object, "vw_top");
            assert!(message.contains("scripted failure"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(
        recorder.sqls().last().map(String::as_str),
        Some("CREATE VIEW vw_top AS SELECT id FROM vw_base")
    );
}

#[tokio::test]
async fn test_table_failure_aborts_the_run() {
    let recorder = Recorder::new();
    let dialect = Arc::new(SqliteDialect::new());
    let mut exec = recorder.executor(dialect.clone());
    let schema = compile(&directory(), dialect.as_ref());
    recorder.fail("CREATE TABLE users", 1);

    let err = SchemaSync::new(&schema, &EmptyCatalog)
        .run(&mut exec)
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Statement { .. }));
    assert!(err.to_string().contains("CREATE TABLE users"));
    assert!(!recorder.sqls().iter().any(|s| s.starts_with("CREATE INDEX")));
}

#[tokio::test]
async fn test_dry_run_returns_the_plan_unexecuted() {
    let recorder = Recorder::new();
    let dialect = Arc::new(SqliteDialect::new());
    let mut exec = recorder.executor(dialect.clone());
    let schema = compile(&directory(), dialect.as_ref());

    let plan = SchemaSync::new(&schema, &EmptyCatalog)
        .dry_run(true)
        .run(&mut exec)
        .await
        .unwrap();

    assert!(recorder.sqls().is_empty());
    assert!(plan.ddl().any(|st| st.sql().starts_with("CREATE TABLE users")));
    assert!(plan.to_string().contains("CREATE VIEW vw_active_users"));
}

// ===================================================================
// Oracle post-check
// ===================================================================

fn oracle_views() -> Model {
    let mut model = Model::new();
    model
        .add(
            Table::view("vw_orgs", "Organisations", "SELECT 1 id FROM dual")
                .col(Column::new("id", ColumnType::Integer).remark("Key"))
                .unwrap(),
        )
        .unwrap();
    model
}

#[tokio::test]
async fn test_oracle_recompiles_invalid_views() {
    let recorder = Recorder::new();
    let dialect = Arc::new(OracleDialect::new());
    let mut exec = recorder.executor(dialect.clone());
    let schema = compile(&oracle_views(), dialect.as_ref());
    recorder.respond(
        "SELECT object_name FROM user_objects",
        vec![row(&[("OBJECT_NAME", text("VW_ORGS"))])],
    );

    OracleCatalog::new()
        .post_check(&mut exec, &schema)
        .await
        .unwrap();

    let sqls = recorder.sqls();
    assert_eq!(sqls[0], "PURGE RECYCLEBIN");
    assert!(sqls.contains(&String::from("ALTER VIEW vw_orgs COMPILE")));
    assert!(sqls.contains(&String::from(
        "COMMENT ON TABLE vw_orgs IS 'Organisations'"
    )));
    assert!(sqls.contains(&String::from("COMMENT ON COLUMN vw_orgs.id IS 'Key'")));
    assert_eq!(
        recorder
            .params()
            .iter()
            .filter(|p| p.first() == Some(&text("VIEW")))
            .count(),
        2
    );
}

#[tokio::test]
async fn test_oracle_compiler_errors_fail_the_run() {
    let recorder = Recorder::new();
    let dialect = Arc::new(OracleDialect::new());
    let mut exec = recorder.executor(dialect.clone());
    let schema = compile(&oracle_views(), dialect.as_ref());
    recorder.respond(
        "SELECT name, type, line, text FROM user_errors",
        vec![row(&[
            ("NAME", text("TR_ORGS_BEFORE_INSERT")),
            ("TYPE", text("TRIGGER")),
            ("LINE", SqlValue::Int(3)),
            ("TEXT", text("PLS-00103: Encountered the symbol \"END\"")),
        ])],
    );

    let err = OracleCatalog::new()
        .post_check(&mut exec, &schema)
        .await
        .unwrap_err();

    match err {
        SyncError::Convergence { object, message } => {
            assert_eq!(object, "tr_orgs_before_insert");
            assert!(message.contains("line 3"));
            assert!(message.contains("PLS-00103"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

// ===================================================================
// Mutations
// ===================================================================

#[tokio::test]
async fn test_dupsert_deletes_outside_the_batch() {
    let recorder = Recorder::new();
    let dialect = Arc::new(SqliteDialect::new());
    let mut exec = recorder.executor(dialect.clone());
    let schema = compile(&items(), dialect.as_ref());

    exec.dupsert(
        &schema.table("items").unwrap(),
        &record! { "parent_id" => 7 },
        &[
            record! { "id" => 1, "code" => "a" },
            record! { "id" => 2, "code" => "b" },
        ],
        "code",
    )
    .await
    .unwrap();

    let sqls = recorder.sqls();
    assert!(sqls[0].starts_with("DELETE FROM items WHERE"));
    assert!(sqls[0].contains("items.parent_id=?"));
    assert!(sqls[0].contains("NOT(items.code IN(?,?))"));
    assert_eq!(
        recorder.params()[0],
        [SqlValue::Int(7), text("a"), text("b")]
    );
    assert_eq!(sqls.len(), 3);
    assert!(sqls[1].contains("ON CONFLICT (code,parent_id)"));
}

#[tokio::test]
async fn test_failed_statement_keeps_the_sql() {
    let recorder = Recorder::new();
    let dialect = Arc::new(SqliteDialect::new());
    let mut exec = recorder.executor(dialect.clone());
    let schema = compile(&items(), dialect.as_ref());
    recorder.fail("INSERT INTO items", 1);

    let err = exec
        .insert(
            &schema.table("items").unwrap(),
            &[record! { "id" => 4, "code" => "line\nbreak" }],
        )
        .await
        .unwrap_err();

    let sql = match &err {
        SyncError::Statement { sql, .. } => sql.clone(),
        other => panic!("unexpected error: {other}"),
    };
    assert_eq!(sql, "INSERT INTO items (id,code) VALUES (?,?) [4,\"line break\"]");
    assert!(err.database_error().is_some());
}
