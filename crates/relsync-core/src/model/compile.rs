//! Two-phase build: a [`Model`] compiles into an immutable [`Schema`] whose
//! columns carry their resolved type and physical projection.

use std::sync::{Arc, OnceLock};

use indexmap::IndexMap;
use regex::Regex;
use tracing::debug;

use super::column::{ColumnKind, ColumnType, DefaultValue};
use super::table::{Key, Procedure, TableKind, Trigger};
use super::{Model, Table};
use crate::dialect::Dialect;
use crate::error::{Error, Result};
use crate::physical::{PhysicalColumn, PhysicalModel, PhysicalTable};
use crate::query::Select;
use crate::value::Record;

/// A column with its type resolved and its physical projection attached.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundColumn {
    name: String,
    ty: ColumnType,
    length: u32,
    precision: u32,
    nullable: bool,
    default: Option<DefaultValue>,
    remark: String,
    reference: Option<String>,
    physical: PhysicalColumn,
}

impl BoundColumn {
    /// Column name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Canonical logical type.
    #[must_use]
    pub const fn column_type(&self) -> ColumnType {
        self.ty
    }

    /// Canonical length.
    #[must_use]
    pub const fn length(&self) -> u32 {
        self.length
    }

    /// Canonical scale.
    #[must_use]
    pub const fn precision(&self) -> u32 {
        self.precision
    }

    /// Whether NULL is allowed.
    #[must_use]
    pub const fn is_nullable(&self) -> bool {
        self.nullable
    }

    /// Logical default.
    #[must_use]
    pub const fn default(&self) -> Option<&DefaultValue> {
        self.default.as_ref()
    }

    /// Comment.
    #[must_use]
    pub fn remark(&self) -> &str {
        &self.remark
    }

    /// Target table of a reference column.
    #[must_use]
    pub fn reference(&self) -> Option<&str> {
        self.reference.as_deref()
    }

    /// The column as the dialect renders it.
    #[must_use]
    pub const fn physical(&self) -> &PhysicalColumn {
        &self.physical
    }

    /// Whether the column is computed.
    #[must_use]
    pub const fn is_virtual(&self) -> bool {
        self.physical.is_virtual
    }
}

/// A compiled table or view.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundTable {
    name: String,
    remark: String,
    columns: IndexMap<String, BoundColumn>,
    pk: Vec<String>,
    keys: IndexMap<String, Key>,
    triggers: IndexMap<String, Trigger>,
    data: Vec<Record>,
    kind: TableKind,
}

impl BoundTable {
    /// Table name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Table comment.
    #[must_use]
    pub fn remark(&self) -> &str {
        &self.remark
    }

    /// Columns in definition order.
    pub fn columns(&self) -> impl Iterator<Item = &BoundColumn> {
        self.columns.values()
    }

    /// Column by case-insensitive name.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&BoundColumn> {
        self.columns.get(&name.to_lowercase())
    }

    /// Column by name, failing when absent.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownColumn`] when the table has no such column.
    pub fn require_column(&self, name: &str) -> Result<&BoundColumn> {
        self.column(name).ok_or_else(|| Error::UnknownColumn {
            table: self.name.clone(),
            column: name.to_owned(),
        })
    }

    /// Primary key column names.
    #[must_use]
    pub fn pk(&self) -> &[String] {
        &self.pk
    }

    /// The single primary key column.
    ///
    /// # Errors
    ///
    /// [`Error::VectorPrimaryKey`] when the key is empty or spans several
    /// columns.
    pub fn scalar_pk(&self) -> Result<&BoundColumn> {
        match self.pk.as_slice() {
            [one] => self.require_column(one),
            _ => Err(Error::VectorPrimaryKey(self.name.clone())),
        }
    }

    /// Keys by name.
    #[must_use]
    pub const fn keys(&self) -> &IndexMap<String, Key> {
        &self.keys
    }

    /// Row-level triggers by name.
    #[must_use]
    pub const fn triggers(&self) -> &IndexMap<String, Trigger> {
        &self.triggers
    }

    /// Static data rows.
    #[must_use]
    pub fn data(&self) -> &[Record] {
        &self.data
    }

    /// Relation kind.
    #[must_use]
    pub const fn kind(&self) -> &TableKind {
        &self.kind
    }

    /// Whether this is a view.
    #[must_use]
    pub const fn is_view(&self) -> bool {
        matches!(self.kind, TableKind::View { .. })
    }

    /// Whether this is a temporary table.
    #[must_use]
    pub const fn is_temporary(&self) -> bool {
        matches!(self.kind, TableKind::Temporary(_))
    }

    /// Query text of a view.
    #[must_use]
    pub fn view_sql(&self) -> Option<&str> {
        match &self.kind {
            TableKind::View { sql } => Some(sql),
            _ => None,
        }
    }

    /// Reference columns with their targets, in definition order.
    pub fn references(&self) -> impl Iterator<Item = (&BoundColumn, &str)> {
        self.columns
            .values()
            .filter_map(|c| c.reference().map(|target| (c, target)))
    }

    /// The physical table this definition compiles to, without indexes.
    #[must_use]
    pub fn physical_table(&self) -> PhysicalTable {
        let mut table = match &self.kind {
            TableKind::View { sql } => PhysicalTable::view(&self.name, sql.clone()),
            _ => PhysicalTable::new(&self.name),
        };
        table.remark.clone_from(&self.remark);
        table.pk.clone_from(&self.pk);
        for column in self.columns.values() {
            table.add_column(column.physical.clone());
        }
        table
    }
}

/// A compiled model: immutable and shareable.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    tables: IndexMap<String, Arc<BoundTable>>,
    procedures: Vec<Procedure>,
}

impl Schema {
    /// Table or view by case-insensitive name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<BoundTable>> {
        self.tables.get(&name.to_lowercase())
    }

    /// Table or view by name, failing when absent.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownTable`] when nothing is registered under `name`.
    pub fn table(&self, name: &str) -> Result<Arc<BoundTable>> {
        self.get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownTable(name.to_owned()))
    }

    /// Tables and views in registration order.
    pub fn tables(&self) -> impl Iterator<Item = &Arc<BoundTable>> {
        self.tables.values()
    }

    /// Procedures in registration order.
    #[must_use]
    pub fn procedures(&self) -> &[Procedure] {
        &self.procedures
    }

    /// Whether `name` is a view of this schema.
    #[must_use]
    pub fn is_view(&self, name: &str) -> bool {
        self.get(name).is_some_and(|t| t.is_view())
    }

    /// Starts a query against `table`. See [`Select::new`].
    ///
    /// # Errors
    ///
    /// Fails when the table or one of the columns is unknown.
    pub fn select(&self, table: &str, columns: &[&str]) -> Result<Select> {
        Select::new(self.table(table)?, columns)
    }

    /// The physical model this schema compiles to, as a fully converged
    /// database would report it.
    #[must_use]
    pub fn physical_model(&self) -> PhysicalModel {
        let mut model = PhysicalModel::new();
        for table in self.tables.values() {
            model.add(table.physical_table());
        }
        model
    }
}

pub(super) fn compile(model: &Model, dialect: &dyn Dialect) -> Result<Schema> {
    let mut tables = IndexMap::new();
    for table in model.tables.values() {
        let bound = bind_table(model, table, dialect)?;
        tables.insert(bound.name.clone(), Arc::new(bound));
    }
    Ok(Schema {
        tables,
        procedures: model.procedures.values().cloned().collect(),
    })
}

fn bind_table(model: &Model, table: &Table, dialect: &dyn Dialect) -> Result<BoundTable> {
    let mut columns = IndexMap::with_capacity(table.columns.len());
    for column in table.columns.values() {
        let (ty, length, precision, reference) = match &column.kind {
            ColumnKind::Scalar(ty) => (*ty, column.length, column.precision, None),
            ColumnKind::Reference { target } => {
                let (ty, length, precision) =
                    resolve_reference(model, &table.name, &column.name, target)?;
                (ty, length, precision, Some(target.clone()))
            }
        };
        let (ty, length, precision) = dialect.canonical(ty, length, precision);

        let mut physical = dialect.basic_physical(&column.name, ty, length, precision);
        physical.remark.clone_from(&column.remark);
        physical.nullable = column.nullable;
        physical.reference.clone_from(&reference);
        match &column.default {
            Some(DefaultValue::Virtual(expression)) => {
                physical.default = Some(expression.clone());
                physical.is_virtual = true;
                physical.nullable = true;
            }
            Some(default) => physical.default = Some(dialect.default_sql(default, physical.ty)?),
            None => {}
        }

        columns.insert(
            column.name.clone(),
            BoundColumn {
                name: column.name.clone(),
                ty,
                length,
                precision,
                nullable: physical.nullable,
                default: column.default.clone(),
                remark: column.remark.clone(),
                reference,
                physical,
            },
        );
    }

    resolve_virtual_formulas(&table.name, &mut columns);

    for key in table.keys.values() {
        for part in &key.parts {
            let name = part.split_whitespace().next().unwrap_or_default();
            if !columns.contains_key(&name.to_lowercase()) {
                return Err(Error::UnknownColumn {
                    table: table.name.clone(),
                    column: name.to_owned(),
                });
            }
        }
    }

    Ok(BoundTable {
        name: table.name.clone(),
        remark: table.remark.clone(),
        columns,
        pk: table.pk.clone(),
        keys: table.keys.clone(),
        triggers: table.triggers.clone(),
        data: table.data.clone(),
        kind: table.kind.clone(),
    })
}

/// Follows a chain of references to the scalar primary key at its end.
fn resolve_reference(
    model: &Model,
    table: &str,
    column: &str,
    target: &str,
) -> Result<(ColumnType, u32, u32)> {
    let mut current = target;
    for _ in 0..=model.tables.len() {
        let target_table = model
            .tables
            .get(current)
            .ok_or_else(|| Error::UnresolvedReference {
                table: table.to_owned(),
                column: column.to_owned(),
                target: current.to_owned(),
            })?;
        let [pk] = target_table.pk.as_slice() else {
            return Err(Error::VectorPrimaryKey(current.to_owned()));
        };
        let pk_column = &target_table.columns[pk.as_str()];
        match &pk_column.kind {
            ColumnKind::Scalar(ty) => return Ok((*ty, pk_column.length, pk_column.precision)),
            ColumnKind::Reference { target } => current = target,
        }
    }
    Err(Error::InvalidModel(format!(
        "reference cycle starting at {table}.{column}"
    )))
}

/// Inlines `"NAME"` mentions of other virtual columns into each virtual
/// formula, at most once per virtual column.
fn resolve_virtual_formulas(table: &str, columns: &mut IndexMap<String, BoundColumn>) {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r#"("[A-Za-z_][A-Za-z0-9_]*")"#).expect("valid quoted identifier regex")
    });
    let names: Vec<String> = columns
        .values()
        .filter(|c| c.physical.is_virtual)
        .map(|c| c.name.clone())
        .collect();

    for _ in 0..names.len() {
        let mut found = false;
        for name in &names {
            let formulas: IndexMap<String, String> = names
                .iter()
                .filter_map(|n| {
                    let def = columns[n.as_str()].physical.default.clone()?;
                    Some((format!("\"{}\"", n.to_uppercase()), def))
                })
                .collect();
            let Some(def) = columns[name.as_str()].physical.default.clone() else {
                continue;
            };
            let mut resolved = def.clone();
            for m in re.find_iter(&def) {
                if let Some(formula) = formulas.get(&m.as_str().to_uppercase()) {
                    resolved = resolved.replace(m.as_str(), formula);
                    found = true;
                }
            }
            if resolved != def {
                debug!(table, column = %name, from = %def, to = %resolved, "Resolved virtual formula");
                if let Some(column) = columns.get_mut(name.as_str()) {
                    column.physical.default = Some(resolved);
                }
            }
        }
        if !found {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::OracleDialect;
    use crate::model::{id_column, Column};
    use crate::physical::PhysicalType;

    fn model() -> Model {
        let mut m = Model::new();
        m.add(
            Table::new("orgs", "Organisations")
                .pk(id_column(ColumnType::Integer))
                .unwrap()
                .col(Column::new("label", ColumnType::String).length(255))
                .unwrap(),
        )
        .unwrap();
        m.add(
            Table::new("users", "Users")
                .pk(id_column(ColumnType::Uuid))
                .unwrap()
                .ref_col(Column::reference("id_org", "orgs").nullable())
                .unwrap()
                .col(Column::new("amount", ColumnType::Money))
                .unwrap()
                .col(Column::new("qty", ColumnType::Integer).default_value(DefaultValue::number(0)))
                .unwrap()
                .col(Column::new("total", ColumnType::Numeric).virtual_expr("\"AMOUNT\" * \"QTY\""))
                .unwrap()
                .col(Column::new("total2", ColumnType::Numeric).virtual_expr("\"TOTAL\" * 2"))
                .unwrap(),
        )
        .unwrap();
        m
    }

    #[test]
    fn test_reference_inherits_target_pk_type() {
        let schema = model().compile(&OracleDialect::new()).unwrap();
        let users = schema.table("users").unwrap();
        let r = users.column("id_org").unwrap();
        assert_eq!(r.column_type(), ColumnType::Integer);
        assert_eq!(r.reference(), Some("orgs"));
        assert_eq!(r.physical().ty, PhysicalType::Numeric);
        assert_eq!((r.physical().length, r.physical().precision), (10, 0));
        assert!(r.is_nullable());
    }

    #[test]
    fn test_unknown_reference_target() {
        let mut m = Model::new();
        m.add(
            Table::new("t", "")
                .pk(id_column(ColumnType::Integer))
                .unwrap()
                .ref_col(Column::reference("id_x", "missing"))
                .unwrap(),
        )
        .unwrap();
        let err = m.compile(&OracleDialect::new()).unwrap_err();
        assert!(matches!(err, Error::UnresolvedReference { .. }));
    }

    #[test]
    fn test_reference_to_vector_pk_is_rejected() {
        let mut m = Model::new();
        m.add(
            Table::new("pairs", "")
                .pk(Column::new("a", ColumnType::Integer))
                .unwrap()
                .pk(Column::new("b", ColumnType::Integer))
                .unwrap(),
        )
        .unwrap();
        m.add(Table::new("t", "").ref_col(Column::reference("id_pair", "pairs")).unwrap())
            .unwrap();
        let err = m.compile(&OracleDialect::new()).unwrap_err();
        assert_eq!(err, Error::VectorPrimaryKey("pairs".into()));
    }

    #[test]
    fn test_virtual_formulas_are_inlined() {
        let schema = model().compile(&OracleDialect::new()).unwrap();
        let users = schema.table("users").unwrap();
        let total2 = users.column("total2").unwrap();
        assert!(total2.is_virtual());
        assert!(total2.is_nullable());
        assert_eq!(
            total2.physical().default.as_deref(),
            Some("\"AMOUNT\" * \"QTY\" * 2")
        );
    }

    #[test]
    fn test_physical_default_rendered_by_dialect() {
        let schema = model().compile(&OracleDialect::new()).unwrap();
        let qty = schema.table("users").unwrap();
        assert_eq!(qty.column("qty").unwrap().physical().default.as_deref(), Some("0"));
    }

    #[test]
    fn test_key_on_unknown_column() {
        let mut m = Model::new();
        m.add(
            Table::new("t", "")
                .pk(id_column(ColumnType::Integer))
                .unwrap()
                .key(Key::new("by_code", ["code DESC"])),
        )
        .unwrap();
        let err = m.compile(&OracleDialect::new()).unwrap_err();
        assert!(matches!(err, Error::UnknownColumn { column, .. } if column == "code"));
    }

    #[test]
    fn test_physical_model_projection() {
        let schema = model().compile(&OracleDialect::new()).unwrap();
        let phys = schema.physical_model();
        let users = phys.get("USERS").unwrap();
        assert_eq!(users.pk, ["id"]);
        assert_eq!(users.columns.len(), 6);
        assert_eq!(users.column("id").unwrap().ty, PhysicalType::Varbinary);
    }
}
