//! Planning a synchronization as the model evolves between releases.

mod common;

use common::{converged, directory, sqls};
use relsync_core::dialect::{Dialect, OracleDialect, SqliteDialect};
use relsync_core::model::{id_column, Column, ColumnType, DefaultValue, Model, Table};
use relsync_core::physical::PhysicalModel;
use relsync_core::record;
use relsync_core::sync::Planner;

/// The directory model one release later: a teams table with seed data
/// and a view over active users.
fn next_release() -> Model {
    let mut model = directory();
    model
        .add(
            Table::new("teams", "Teams")
                .pk(id_column(ColumnType::Integer))
                .unwrap()
                .ref_col(Column::reference("id_org", "orgs"))
                .unwrap()
                .col(
                    Column::new("label", ColumnType::String)
                        .length(60)
                        .default_value(DefaultValue::Text(String::new())),
                )
                .unwrap()
                .item(record! { "id" => 1, "id_org" => 1, "label" => "Core" }),
        )
        .unwrap()
        .add(
            Table::view(
                "vw_active_users",
                "Active users",
                "SELECT id, label FROM users WHERE active = 1",
            )
            .col(Column::new("id", ColumnType::Integer))
            .unwrap()
            .col(Column::new("label", ColumnType::String).length(80))
            .unwrap(),
        )
        .unwrap();
    model
}

// ===================================================================
// First installation
// ===================================================================

#[test]
fn empty_sqlite_database_gets_every_table() {
    let dialect = SqliteDialect::new();
    let schema = directory().compile(&dialect).unwrap();
    let plan = Planner::new(&schema, &dialect)
        .plan(&PhysicalModel::new())
        .unwrap();

    assert_eq!(
        sqls(&plan.tables),
        [
            "CREATE TABLE orgs (id INTEGER DEFAULT NULL NOT NULL,\
             label VARCHAR(80) DEFAULT NULL NOT NULL,\
             active NUMERIC(1,0) DEFAULT 1 NOT NULL,PRIMARY KEY (id))",
            "CREATE TABLE users (id INTEGER DEFAULT NULL NOT NULL,\
             id_org INTEGER DEFAULT NULL,\
             label VARCHAR(80) DEFAULT NULL NOT NULL,\
             active NUMERIC(1,0) DEFAULT 1 NOT NULL,\
             email VARCHAR(120) DEFAULT NULL,PRIMARY KEY (id))",
            "CREATE TABLE roles (id INTEGER DEFAULT NULL NOT NULL,\
             label VARCHAR(40) DEFAULT NULL NOT NULL,PRIMARY KEY (id))",
            "CREATE TABLE user_roles (id INTEGER DEFAULT NULL NOT NULL,\
             id_user INTEGER DEFAULT NULL NOT NULL,\
             id_role INTEGER DEFAULT NULL NOT NULL,PRIMARY KEY (id))",
        ]
    );
    assert_eq!(
        sqls(&plan.keys),
        [
            "CREATE INDEX ix_users_id_org ON users(id_org)",
            "CREATE UNIQUE INDEX ix_users_email ON users(email)",
            "CREATE INDEX ix_user_roles_id_user ON user_roles(id_user)",
            "CREATE INDEX ix_user_roles_id_role ON user_roles(id_role)",
        ]
    );
    assert!(plan.foreign_keys.is_empty());
    assert!(plan.views.is_empty());
}

#[test]
fn empty_oracle_database_gets_foreign_keys_last() {
    let dialect = OracleDialect::new();
    let schema = directory().compile(&dialect).unwrap();
    let plan = Planner::new(&schema, &dialect)
        .plan(&PhysicalModel::new())
        .unwrap();

    assert!(sqls(&plan.tables).contains(&"COMMENT ON COLUMN orgs.label IS 'Name'"));
    assert_eq!(
        sqls(&plan.foreign_keys),
        [
            "ALTER TABLE users ADD FOREIGN KEY (id_org) REFERENCES orgs",
            "ALTER TABLE user_roles ADD FOREIGN KEY (id_user) REFERENCES users",
            "ALTER TABLE user_roles ADD FOREIGN KEY (id_role) REFERENCES roles",
        ]
    );
}

// ===================================================================
// Upgrades
// ===================================================================

#[test]
fn next_release_only_adds_what_is_new() {
    let dialect = SqliteDialect::new();
    let installed = directory().compile(&dialect).unwrap();
    let physical = converged(&installed, &dialect);

    let schema = next_release().compile(&dialect).unwrap();
    let plan = Planner::new(&schema, &dialect).plan(&physical).unwrap();

    assert_eq!(
        sqls(&plan.tables),
        ["CREATE TABLE teams (id INTEGER DEFAULT NULL NOT NULL,\
          id_org INTEGER DEFAULT NULL NOT NULL,\
          label VARCHAR(60) DEFAULT '' NOT NULL,PRIMARY KEY (id))"]
    );
    assert_eq!(
        sqls(&plan.keys),
        ["CREATE INDEX ix_teams_id_org ON teams(id_org)"]
    );
    assert_eq!(plan.views.len(), 1);
    assert_eq!(
        sqls(&plan.views[0].statements),
        [
            "DROP VIEW IF EXISTS vw_active_users",
            "CREATE VIEW vw_active_users AS SELECT id, label FROM users WHERE active = 1",
        ]
    );

    assert_eq!(plan.data.len(), 1);
    let seed = &plan.data[0];
    assert!(seed.sql().starts_with("INSERT INTO teams ("));
    assert!(seed
        .sql()
        .ends_with("ON CONFLICT (id) DO UPDATE SET id_org=excluded.id_org,label=excluded.label"));
    assert_eq!(seed.len(), 1);
}

#[test]
fn next_release_on_oracle_queues_the_new_foreign_key_only() {
    let dialect = OracleDialect::new();
    let installed = directory().compile(&dialect).unwrap();
    let physical = converged(&installed, &dialect);

    let schema = next_release().compile(&dialect).unwrap();
    let plan = Planner::new(&schema, &dialect).plan(&physical).unwrap();

    assert_eq!(
        sqls(&plan.foreign_keys),
        ["ALTER TABLE teams ADD FOREIGN KEY (id_org) REFERENCES orgs"]
    );
    assert_eq!(
        sqls(&plan.views[0].statements),
        [
            "CREATE OR REPLACE FORCE VIEW vw_active_users AS \
             SELECT id, label FROM users WHERE active = 1",
            "COMMENT ON TABLE vw_active_users IS 'Active users'",
        ]
    );
    assert!(plan.data[0]
        .sql()
        .starts_with("MERGE INTO teams \"__old\" USING (SELECT ? id_org,? label,? id FROM DUAL)"));
}

#[test]
fn drifted_columns_are_repaired_in_definition_order() {
    let dialect = SqliteDialect::new();
    let schema = directory().compile(&dialect).unwrap();
    let mut physical = converged(&schema, &dialect);
    let users = physical.get_mut("users").unwrap();
    users.columns.shift_remove("email");
    users.column_mut("label").unwrap().length = 40;

    let plan = Planner::new(&schema, &dialect)
        .tmp_column("tmp_1")
        .plan(&physical)
        .unwrap();
    assert_eq!(
        sqls(&plan.tables),
        [
            "ALTER TABLE users ADD tmp_1 VARCHAR(80) DEFAULT NULL NOT NULL",
            "UPDATE users SET tmp_1 = label",
            "ALTER TABLE users DROP COLUMN label",
            "ALTER TABLE users RENAME COLUMN tmp_1 TO label",
            "ALTER TABLE users ADD email VARCHAR(120) DEFAULT NULL",
        ]
    );
    assert!(plan.keys.is_empty());
}

#[test]
fn rebuilt_column_keeps_its_index() {
    let dialect = SqliteDialect::new();
    let schema = directory().compile(&dialect).unwrap();
    let mut physical = converged(&schema, &dialect);
    let users = physical.get_mut("users").unwrap();
    users.column_mut("email").unwrap().nullable = false;
    users.column_mut("id_org").unwrap().nullable = false;

    let plan = Planner::new(&schema, &dialect)
        .tmp_column("tmp_1")
        .plan(&physical)
        .unwrap();
    let tables = sqls(&plan.tables);
    assert_eq!(tables[0], "DROP INDEX ix_users_id_org");
    let email = tables
        .iter()
        .position(|s| *s == "DROP INDEX ix_users_email")
        .unwrap();
    assert_eq!(tables[email + 1], "ALTER TABLE users ADD tmp_1 VARCHAR(120) DEFAULT NULL");
    assert_eq!(tables[email + 3], "ALTER TABLE users DROP COLUMN email");
    assert_eq!(
        sqls(&plan.keys),
        [
            "CREATE INDEX ix_users_id_org ON users(id_org)",
            "CREATE UNIQUE INDEX ix_users_email ON users(email)",
        ]
    );
}

#[test]
fn every_release_converges() {
    for dialect in [&OracleDialect::new() as &dyn Dialect, &SqliteDialect::new()] {
        for model in [directory(), next_release()] {
            let schema = model.compile(dialect).unwrap();
            let physical = converged(&schema, dialect);
            let plan = Planner::new(&schema, dialect).plan(&physical).unwrap();
            assert!(plan.is_converged(), "{}:\n{plan}", dialect.name());
        }
    }
}

#[test]
fn dry_run_listing_groups_phases() {
    let dialect = SqliteDialect::new();
    let installed = directory().compile(&dialect).unwrap();
    let physical = converged(&installed, &dialect);
    let schema = next_release().compile(&dialect).unwrap();
    let listing = Planner::new(&schema, &dialect)
        .plan(&physical)
        .unwrap()
        .to_string();

    let tables = listing.find("-- tables").unwrap();
    let keys = listing.find("-- keys").unwrap();
    let data = listing.find("-- data").unwrap();
    let views = listing.find("-- views").unwrap();
    assert!(tables < keys && keys < data && data < views);
    assert!(!listing.contains("-- foreign keys"));
    assert!(listing.contains("CREATE TABLE teams"));
}
