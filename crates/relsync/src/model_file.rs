//! JSON model files.
//!
//! ```json
//! {
//!   "tables": [
//!     {
//!       "name": "orgs",
//!       "remark": "Organizations",
//!       "columns": [
//!         { "name": "id", "type": "INTEGER", "pk": true },
//!         { "name": "label", "type": "STRING", "length": 80 }
//!       ],
//!       "data": [ { "id": 1, "label": "Root" } ]
//!     }
//!   ]
//! }
//! ```

use std::path::Path;

use relsync_core::model::{
    Column, ColumnType, DefaultValue, Key, Model, Procedure, Table, Temporality,
};
use relsync_core::Record;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A whole model file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelFile {
    /// Tables and views.
    #[serde(default)]
    pub tables: Vec<TableDef>,
    /// Stored procedures.
    #[serde(default)]
    pub procedures: Vec<Procedure>,
}

/// A table or view.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableDef {
    pub name: String,
    #[serde(default)]
    pub remark: String,
    /// Query text; makes this a view.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temporary: Option<Temporality>,
    #[serde(default)]
    pub columns: Vec<ColumnDef>,
    #[serde(default)]
    pub keys: Vec<Key>,
    #[serde(default)]
    pub triggers: Vec<TriggerDef>,
    /// Static rows, upserted on every synchronization.
    #[serde(default)]
    pub data: Vec<Record>,
}

/// A column. Either `type` or `references` must be set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub ty: Option<ColumnType>,
    /// Target table of a reference column.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub references: Option<String>,
    /// Whether a reference column gets an index of its own name.
    #[serde(default = "default_true")]
    pub index: bool,
    #[serde(default)]
    pub pk: bool,
    #[serde(default)]
    pub length: u32,
    #[serde(default)]
    pub precision: u32,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<DefaultValue>,
    #[serde(default)]
    pub remark: String,
}

/// A row-level trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerDef {
    /// Timing and event, e.g. `BEFORE INSERT`.
    pub when: String,
    pub what: String,
}

const fn default_true() -> bool {
    true
}

impl ColumnDef {
    fn column(&self) -> relsync_core::Result<Column> {
        let mut column = match (&self.references, self.ty) {
            (Some(target), _) => Column::reference(&self.name, target),
            (None, Some(ty)) => Column::new(&self.name, ty),
            (None, None) => {
                return Err(relsync_core::Error::InvalidModel(format!(
                    "column {} needs a type or a reference",
                    self.name
                )))
            }
        };
        column = column.length(self.length).precision(self.precision);
        if self.nullable {
            column = column.nullable();
        }
        if let Some(default) = &self.default {
            column = column.default_value(default.clone());
        }
        Ok(column.remark(self.remark.clone()))
    }
}

impl TableDef {
    fn table(&self) -> relsync_core::Result<Table> {
        let mut table = match &self.sql {
            Some(sql) => Table::view(&self.name, self.remark.clone(), sql.clone()),
            None => Table::new(&self.name, self.remark.clone()),
        };
        if let Some(temporality) = self.temporary {
            table = table.temporary(temporality);
        }
        for c in &self.columns {
            let column = c.column()?;
            table = if c.pk {
                table.pk(column)?
            } else if c.references.is_some() && c.index {
                table.ref_col(column)?
            } else if c.references.is_some() {
                table.fk(column)?
            } else {
                table.col(column)?
            };
        }
        for key in &self.keys {
            table = table.key(key.clone());
        }
        for t in &self.triggers {
            table = table.trigger(t.when.clone(), t.what.clone());
        }
        for row in &self.data {
            table = table.item(row.clone());
        }
        Ok(table)
    }
}

impl ModelFile {
    /// Parses a model file.
    ///
    /// # Errors
    ///
    /// I/O and JSON errors.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Builds the logical model.
    ///
    /// # Errors
    ///
    /// Fails on duplicate columns, duplicate tables or a column with
    /// neither type nor reference.
    pub fn into_model(self) -> Result<Model> {
        let mut model = Model::new();
        for t in &self.tables {
            model.add(t.table()?)?;
        }
        for p in self.procedures {
            model.procedure(p);
        }
        Ok(model)
    }
}
