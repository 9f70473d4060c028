//! Schema synchronization runner.
//!
//! Loads the catalog, plans the convergence and executes the plan phase by
//! phase: tables, keys, static data, views, foreign keys, routines, then
//! the catalog's post-check. Any failing statement aborts the run, except
//! for views, which are retried until every view compiles or a pass makes
//! no progress.

use relsync_core::model::Schema;
use relsync_core::sync::{Planner, SyncPlan, ViewStep};
use relsync_core::Statement;
use tracing::{debug, info, warn};

use crate::catalog::Catalog;
use crate::error::{Result, SyncError};
use crate::executor::Executor;

/// Converges a database onto a compiled schema.
pub struct SchemaSync<'a> {
    schema: &'a Schema,
    catalog: &'a dyn Catalog,
    dry_run: bool,
    only: Vec<String>,
    tmp_column: Option<String>,
}

impl<'a> SchemaSync<'a> {
    /// Synchronizes every table, view and procedure of `schema`.
    #[must_use]
    pub fn new(schema: &'a Schema, catalog: &'a dyn Catalog) -> Self {
        Self {
            schema,
            catalog,
            dry_run: false,
            only: Vec::new(),
            tmp_column: None,
        }
    }

    /// Returns the plan from [`SchemaSync::run`] without executing it.
    #[must_use]
    pub const fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Restricts the run to the named tables and views.
    #[must_use]
    pub fn only<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.only = names.into_iter().map(Into::into).collect();
        self
    }

    /// Name of the temporary column used to rebuild stored columns.
    #[must_use]
    pub fn tmp_column(mut self, name: impl Into<String>) -> Self {
        self.tmp_column = Some(name.into());
        self
    }

    /// Introspects the database and plans the convergence.
    ///
    /// # Errors
    ///
    /// Fails when the catalog cannot be read or planning hits a model or
    /// precondition error.
    pub async fn plan(&self, exec: &mut Executor) -> Result<SyncPlan> {
        let physical = self.catalog.load(exec).await?;
        let dialect = exec.dialect_arc();
        let mut planner = Planner::new(self.schema, dialect.as_ref());
        if let Some(tmp) = &self.tmp_column {
            planner = planner.tmp_column(tmp.clone());
        }
        let plan = if self.only.is_empty() {
            planner.plan(&physical)?
        } else {
            let names: Vec<&str> = self.only.iter().map(String::as_str).collect();
            planner.plan_tables(&physical, &names)?
        };
        Ok(plan)
    }

    /// Plans and executes the convergence, returning the executed plan.
    ///
    /// # Errors
    ///
    /// Fails on the first failing statement, with
    /// [`SyncError::Convergence`] when views do not compile or the
    /// post-check finds invalid objects.
    pub async fn run(&self, exec: &mut Executor) -> Result<SyncPlan> {
        let plan = self.plan(exec).await?;
        if self.dry_run {
            info!(statements = plan.ddl().count(), "Dry run, nothing executed");
            return Ok(plan);
        }
        if plan.is_converged() {
            info!("Schema is up to date");
        }

        phase(exec, "tables", &plan.tables).await?;
        phase(exec, "keys", &plan.keys).await?;
        for batch in &plan.data {
            exec.execute_batch(batch).await?;
        }
        self.views(exec, &plan.views).await?;
        phase(exec, "foreign keys", &plan.foreign_keys).await?;
        phase(exec, "routines", &plan.routines).await?;
        self.catalog.post_check(exec, self.schema).await?;

        info!(
            statements = plan.ddl().count() + plan.routines.len(),
            "Synchronization complete"
        );
        Ok(plan)
    }

    /// Runs every view step, retrying failed ones in further passes.
    async fn views(&self, exec: &mut Executor, views: &[ViewStep]) -> Result<()> {
        let mut pending: Vec<&ViewStep> = views.iter().collect();
        let mut pass = 0;
        while !pending.is_empty() {
            pass += 1;
            let mut failed = Vec::new();
            let mut last_error = None;
            for step in &pending {
                match run_step(exec, step).await {
                    Ok(()) => debug!(view = %step.name, pass, "View created"),
                    Err(e) => {
                        warn!(view = %step.name, pass, error = %e, "View failed, will retry");
                        failed.push(*step);
                        last_error = Some((step.name.clone(), e));
                    }
                }
            }
            if failed.len() == pending.len() || pass >= views.len() {
                if let Some((object, e)) = last_error {
                    return Err(SyncError::Convergence {
                        object,
                        message: e.to_string(),
                    });
                }
            }
            pending = failed;
        }
        Ok(())
    }
}

async fn run_step(exec: &mut Executor, step: &ViewStep) -> Result<()> {
    for st in &step.statements {
        exec.execute(st).await?;
    }
    Ok(())
}

async fn phase(exec: &mut Executor, name: &str, statements: &[Statement]) -> Result<()> {
    if statements.is_empty() {
        return Ok(());
    }
    info!(phase = name, statements = statements.len(), "Applying");
    for st in statements {
        exec.execute(st).await?;
    }
    Ok(())
}
