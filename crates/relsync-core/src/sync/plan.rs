//! Synchronization planning.
//!
//! The [`Planner`] walks the compiled model against an introspected
//! [`PhysicalModel`] and produces a [`SyncPlan`]: the statements that
//! converge the database, grouped into the phases they must run in.
//! Planning is pure; executing the phases (and retrying views) is up to
//! the caller.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use super::diff::{ColumnDiff, NullAction, TypeAction};
use crate::dialect::Dialect;
use crate::dml::{Batch, KeySpec, TableWrite};
use crate::error::Result;
use crate::model::{BoundTable, Procedure, Schema};
use crate::physical::{PhysicalColumn, PhysicalModel, PhysicalTable};
use crate::statement::Statement;

/// Statements (re)creating one view, retried as a unit.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewStep {
    /// View name.
    pub name: String,
    /// Statements in order: creation, then comments.
    pub statements: Vec<Statement>,
}

/// A reference whose foreign key is created once all tables exist.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingRef {
    table: String,
    column: String,
    target: String,
    temporary: bool,
}

/// Everything a synchronization run executes, by phase.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncPlan {
    /// Table creation and column changes, with their comments.
    pub tables: Vec<Statement>,
    /// Index creation and rebuilds.
    pub keys: Vec<Statement>,
    /// Static data upserts.
    pub data: Vec<Batch>,
    /// View (re)creation, retried until all views compile.
    pub views: Vec<ViewStep>,
    /// Deferred foreign keys.
    pub foreign_keys: Vec<Statement>,
    /// Triggers and procedures, always created or replaced.
    pub routines: Vec<Statement>,
}

impl SyncPlan {
    /// Whether the schema already matches: no table, key, view or foreign
    /// key statement is planned. Data and routines are always applied.
    #[must_use]
    pub fn is_converged(&self) -> bool {
        self.tables.is_empty()
            && self.keys.is_empty()
            && self.views.is_empty()
            && self.foreign_keys.is_empty()
    }

    /// The structural statements in execution order, views included.
    pub fn ddl(&self) -> impl Iterator<Item = &Statement> {
        self.tables
            .iter()
            .chain(&self.keys)
            .chain(self.views.iter().flat_map(|v| &v.statements))
            .chain(&self.foreign_keys)
    }
}

impl fmt::Display for SyncPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        section(f, "tables", &self.tables)?;
        section(f, "keys", &self.keys)?;
        section(f, "data", &self.data)?;
        let views: Vec<&Statement> = self.views.iter().flat_map(|v| &v.statements).collect();
        section(f, "views", views)?;
        section(f, "foreign keys", &self.foreign_keys)?;
        section(f, "routines", &self.routines)
    }
}

fn section<I>(f: &mut fmt::Formatter<'_>, title: &str, items: I) -> fmt::Result
where
    I: IntoIterator,
    I::Item: fmt::Display,
{
    let mut items = items.into_iter().peekable();
    if items.peek().is_none() {
        return Ok(());
    }
    writeln!(f, "-- {title}")?;
    for item in items {
        writeln!(f, "{item};")?;
    }
    Ok(())
}

/// Plans the convergence of a compiled model for one dialect.
#[derive(Debug, Clone)]
pub struct Planner<'a> {
    schema: &'a Schema,
    dialect: &'a dyn Dialect,
    tmp: String,
}

impl<'a> Planner<'a> {
    /// Creates a planner. Stored columns are rebuilt through a temporary
    /// column named `tmp_<epoch millis>`.
    #[must_use]
    pub fn new(schema: &'a Schema, dialect: &'a dyn Dialect) -> Self {
        Self {
            schema,
            dialect,
            tmp: format!("tmp_{}", chrono::Utc::now().timestamp_millis()),
        }
    }

    /// Overrides the temporary column name.
    #[must_use]
    pub fn tmp_column(mut self, name: impl Into<String>) -> Self {
        self.tmp = name.into();
        self
    }

    /// Plans the whole model, procedures included.
    ///
    /// # Errors
    ///
    /// Fails on a precondition violation (NOT NULL without default), on
    /// static data lacking key values, or on a construct the dialect cannot
    /// express.
    pub fn plan(&self, physical: &PhysicalModel) -> Result<SyncPlan> {
        let tables: Vec<Arc<BoundTable>> = self.schema.tables().cloned().collect();
        self.build(physical, &tables, self.schema.procedures())
    }

    /// Plans only the named tables and views.
    ///
    /// # Errors
    ///
    /// [`crate::Error::UnknownTable`] for a name missing from the model, and
    /// everything [`Planner::plan`] can fail with.
    pub fn plan_tables(&self, physical: &PhysicalModel, names: &[&str]) -> Result<SyncPlan> {
        let tables = names
            .iter()
            .map(|name| self.schema.table(name))
            .collect::<Result<Vec<_>>>()?;
        self.build(physical, &tables, &[])
    }

    fn build(
        &self,
        physical: &PhysicalModel,
        relations: &[Arc<BoundTable>],
        procedures: &[Procedure],
    ) -> Result<SyncPlan> {
        let (views, tables): (Vec<_>, Vec<_>) = relations.iter().partition(|t| t.is_view());
        let mut plan = SyncPlan::default();
        let mut refs = Vec::new();
        let mut dropped: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

        for table in &tables {
            match physical.get(table.name()) {
                None => self.create_table(&mut plan, table, &mut refs),
                Some(as_is) => {
                    let keys = dropped.entry(table.name().to_owned()).or_default();
                    self.update_table(&mut plan, as_is, table, &mut refs, keys)?;
                }
            }
        }

        for table in &tables {
            let keys = dropped.get(table.name());
            self.plan_keys(&mut plan, physical.get(table.name()), table, keys)?;
        }

        for table in &tables {
            if table.data().is_empty() {
                continue;
            }
            let write = TableWrite::new(table, table.data(), &KeySpec::Primary)?;
            plan.data.push(self.dialect.upsert(&write)?);
        }

        for view in &views {
            if let Some(step) = self.plan_view(physical.get(view.name()), view) {
                plan.views.push(step);
            }
        }

        for r in refs {
            if r.temporary || self.schema.is_view(&r.target) {
                continue;
            }
            if let Some(st) = self.dialect.add_foreign_key(&r.table, &r.column, &r.target) {
                debug!(table = %r.table, column = %r.column, "Planning foreign key");
                plan.foreign_keys.push(st);
            }
        }

        for table in &tables {
            for trigger in table.triggers().values() {
                plan.routines
                    .extend(self.dialect.create_trigger(table.name(), trigger));
            }
        }
        for procedure in procedures {
            plan.routines.extend(self.dialect.create_procedure(procedure)?);
        }

        Ok(plan)
    }

    fn create_table(&self, plan: &mut SyncPlan, table: &BoundTable, refs: &mut Vec<PendingRef>) {
        info!(table = %table.name(), "Creating table");
        plan.tables.extend(self.dialect.create_table(table));
        if !table.remark().is_empty() {
            plan.tables
                .extend(self.dialect.comment_table(table.name(), table.remark()));
        }
        for column in table.columns() {
            if let Some(target) = column.reference() {
                refs.push(pending(table, column.name(), target));
            }
            if !column.remark().is_empty() {
                plan.tables.extend(self.dialect.comment_column(
                    table.name(),
                    column.name(),
                    column.remark(),
                ));
            }
        }
    }

    fn update_table(
        &self,
        plan: &mut SyncPlan,
        as_is: &PhysicalTable,
        table: &BoundTable,
        refs: &mut Vec<PendingRef>,
        dropped_keys: &mut BTreeSet<String>,
    ) -> Result<()> {
        let stored = table.columns().filter(|c| !c.is_virtual());
        let computed = table.columns().filter(|c| c.is_virtual());
        for column in stored.chain(computed) {
            let to_be = column.physical();
            match as_is.column(column.name()) {
                None => {
                    info!(table = %table.name(), column = %column.name(), "Adding column");
                    plan.tables
                        .extend(self.dialect.add_column(table.name(), to_be));
                    if !to_be.remark.is_empty() {
                        plan.tables.extend(self.dialect.comment_column(
                            table.name(),
                            &to_be.name,
                            &to_be.remark,
                        ));
                    }
                    if let Some(target) = column.reference() {
                        refs.push(pending(table, column.name(), target));
                    }
                }
                Some(existing) => {
                    let name = table.name();
                    self.update_column(plan, name, as_is, existing, to_be, dropped_keys)?;
                }
            }
        }
        if as_is.remark != table.remark() {
            plan.tables
                .extend(self.dialect.comment_table(table.name(), table.remark()));
        }
        Ok(())
    }

    fn update_column(
        &self,
        plan: &mut SyncPlan,
        table: &str,
        physical: &PhysicalTable,
        as_is: &PhysicalColumn,
        to_be: &PhysicalColumn,
        dropped_keys: &mut BTreeSet<String>,
    ) -> Result<()> {
        let diff = ColumnDiff::compute(table, as_is, to_be, self.dialect)?;
        if diff.is_empty() {
            return Ok(());
        }
        info!(table, column = %to_be.name, %diff, "Updating column");
        let d = self.dialect;
        if d.rebuilds_column(&diff) {
            for key in physical.keys.values() {
                let indexed = key
                    .parts
                    .iter()
                    .any(|p| p.column.eq_ignore_ascii_case(&to_be.name));
                if indexed && dropped_keys.insert(key.name.to_lowercase()) {
                    debug!(table, key = %key, "Dropping key around column rebuild");
                    plan.tables.push(d.drop_key(table, key));
                }
            }
        }
        match diff.null_action {
            Some(NullAction::Set) => plan.tables.extend(d.set_nullable(table, to_be, true, &self.tmp)),
            Some(NullAction::Unset) => {
                plan.tables.extend(d.fill_nulls(table, to_be));
                plan.tables.extend(d.set_nullable(table, to_be, false, &self.tmp));
            }
            None => {}
        }
        match diff.type_action {
            Some(TypeAction::Alter) => plan.tables.extend(d.alter_column(table, to_be, &self.tmp)),
            Some(TypeAction::Recreate) => {
                plan.tables.extend(d.recreate_column(table, to_be, &self.tmp));
            }
            None => {}
        }
        if diff.comment_changed {
            plan.tables
                .extend(d.comment_column(table, &to_be.name, &to_be.remark));
        }
        Ok(())
    }

    fn plan_keys(
        &self,
        plan: &mut SyncPlan,
        as_is: Option<&PhysicalTable>,
        table: &BoundTable,
        dropped: Option<&BTreeSet<String>>,
    ) -> Result<()> {
        for key in table.keys().values() {
            let to_be = self.dialect.physical_key(table, key)?;
            let gone = dropped.is_some_and(|d| d.contains(&to_be.name.to_lowercase()));
            match as_is.filter(|_| !gone).and_then(|t| t.key(&to_be.name)) {
                None => {
                    debug!(table = %table.name(), key = %to_be, "Creating key");
                    plan.keys.push(self.dialect.create_key(table.name(), &to_be));
                }
                Some(existing) if *existing != to_be => {
                    debug!(table = %table.name(), from = %existing, to = %to_be, "Recreating key");
                    plan.keys.push(self.dialect.drop_key(table.name(), &to_be));
                    plan.keys.push(self.dialect.create_key(table.name(), &to_be));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    fn plan_view(&self, as_is: Option<&PhysicalTable>, view: &BoundTable) -> Option<ViewStep> {
        let sql = view.view_sql()?;
        let d = self.dialect;
        let stale = as_is
            .and_then(|t| t.view_sql.as_deref())
            .is_none_or(|stored| d.normalize_view_sql(stored) != d.normalize_view_sql(sql));
        let mut statements = Vec::new();
        if stale {
            info!(view = %view.name(), "Creating view");
            statements.extend(d.create_view(view.name(), sql));
        }
        let table_remark = as_is.map_or("", |t| t.remark.as_str());
        if (stale && !view.remark().is_empty()) || (!stale && table_remark != view.remark()) {
            statements.extend(d.comment_table(view.name(), view.remark()));
        }
        for column in view.columns() {
            let stored = as_is.and_then(|t| t.column(column.name())).map(|c| c.remark.as_str());
            let changed = if stale {
                !column.remark().is_empty()
            } else {
                stored.unwrap_or("") != column.remark()
            };
            if changed {
                statements.extend(d.comment_column(view.name(), column.name(), column.remark()));
            }
        }
        (!statements.is_empty()).then(|| ViewStep {
            name: view.name().to_owned(),
            statements,
        })
    }
}

fn pending(table: &BoundTable, column: &str, target: &str) -> PendingRef {
    PendingRef {
        table: table.name().to_owned(),
        column: column.to_owned(),
        target: target.to_owned(),
        temporary: table.is_temporary(),
    }
}
