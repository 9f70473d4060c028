#![allow(dead_code)]

use std::sync::Arc;

use relsync_core::dialect::Dialect;
use relsync_core::model::{
    id_column, BoundTable, Column, ColumnType, DefaultValue, Key, Model, Schema, Table,
};
use relsync_core::physical::PhysicalModel;
use relsync_core::{Param, SqlValue, Statement};

/// Organisations, their users and a many-to-many link to roles.
pub fn directory() -> Model {
    let mut model = Model::new();
    model
        .add(
            Table::new("orgs", "Organisations")
                .pk(id_column(ColumnType::Integer))
                .unwrap()
                .col(Column::new("label", ColumnType::String).length(80).remark("Name"))
                .unwrap()
                .col(
                    Column::new("active", ColumnType::Boolean)
                        .default_value(DefaultValue::Bool(true)),
                )
                .unwrap(),
        )
        .unwrap()
        .add(
            Table::new("users", "Users")
                .pk(id_column(ColumnType::Integer))
                .unwrap()
                .ref_col(Column::reference("id_org", "orgs").nullable())
                .unwrap()
                .col(Column::new("label", ColumnType::String).length(80))
                .unwrap()
                .col(
                    Column::new("active", ColumnType::Boolean)
                        .default_value(DefaultValue::Bool(true)),
                )
                .unwrap()
                .col(Column::new("email", ColumnType::String).length(120).nullable())
                .unwrap()
                .unique(Key::new("email", ["email"])),
        )
        .unwrap()
        .add(
            Table::new("roles", "Roles")
                .pk(id_column(ColumnType::Integer))
                .unwrap()
                .col(Column::new("label", ColumnType::String).length(40))
                .unwrap(),
        )
        .unwrap()
        .add(
            Table::new("user_roles", "Role grants")
                .pk(id_column(ColumnType::Integer))
                .unwrap()
                .ref_col(Column::reference("id_user", "users"))
                .unwrap()
                .ref_col(Column::reference("id_role", "roles"))
                .unwrap(),
        )
        .unwrap();
    model
}

pub fn compile(dialect: &dyn Dialect) -> Schema {
    directory()
        .compile(dialect)
        .unwrap_or_else(|e| panic!("Failed to compile fixture model: {e}"))
}

pub fn table(schema: &Schema, name: &str) -> Arc<BoundTable> {
    schema
        .table(name)
        .unwrap_or_else(|e| panic!("Missing table {name}: {e}"))
}

pub fn text(s: &str) -> SqlValue {
    SqlValue::Text(s.to_owned())
}

pub fn values(st: &Statement) -> Vec<SqlValue> {
    st.params().iter().map(|p: &Param| p.value.clone()).collect()
}

pub fn sqls(statements: &[Statement]) -> Vec<&str> {
    statements.iter().map(Statement::sql).collect()
}

/// What a database fully synchronized with `schema` reports, indexes
/// included.
pub fn converged(schema: &Schema, dialect: &dyn Dialect) -> PhysicalModel {
    let mut physical = schema.physical_model();
    for table in schema.tables() {
        let target = physical
            .get_mut(table.name())
            .unwrap_or_else(|| panic!("{} not projected", table.name()));
        for key in table.keys().values() {
            target.add_key(dialect.physical_key(table, key).unwrap());
        }
    }
    physical
}
