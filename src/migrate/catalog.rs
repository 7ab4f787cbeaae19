use std::collections::{HashMap, HashSet};

use crate::core::{Result, Value};
use crate::result::QueryResult;
use crate::session::Session;

pub(crate) const TABLES_SQL: &str = "SELECT table_name::text AS table_name FROM information_schema.tables \
     WHERE table_schema = current_schema()";

pub(crate) const COLUMNS_SQL: &str = "SELECT table_name::text AS table_name, column_name::text AS column_name \
     FROM information_schema.columns WHERE table_schema = current_schema()";

pub(crate) const CONSTRAINTS_SQL: &str = "SELECT constraint_name::text AS constraint_name \
     FROM information_schema.table_constraints WHERE constraint_schema = current_schema()";

pub(crate) const INDEXES_SQL: &str =
    "SELECT indexname::text AS index_name FROM pg_indexes WHERE schemaname = current_schema()";

pub(crate) const IMMEDIATE_KEYS_SQL: &str = "SELECT rel.relname::text AS table_name, con.conname::text AS constraint_name \
     FROM pg_constraint con \
     JOIN pg_class rel ON rel.oid = con.conrelid \
     JOIN pg_namespace nsp ON nsp.oid = rel.relnamespace \
     WHERE con.contype = 'f' AND NOT con.condeferrable AND nsp.nspname = current_schema()";

/// Snapshot of what already exists in the current schema.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    tables: HashSet<String>,
    columns: HashMap<String, HashSet<String>>,
    constraints: HashSet<String>,
    indexes: HashSet<String>,
    immediate_foreign_keys: Vec<(String, String)>,
}

impl Catalog {
    pub async fn load(session: &Session) -> Result<Self> {
        let (tables, columns, constraints, indexes, immediate) = futures::try_join!(
            session.query_raw(TABLES_SQL, &[]),
            session.query_raw(COLUMNS_SQL, &[]),
            session.query_raw(CONSTRAINTS_SQL, &[]),
            session.query_raw(INDEXES_SQL, &[]),
            session.query_raw(IMMEDIATE_KEYS_SQL, &[]),
        )?;
        Ok(Self::from_results(&tables, &columns, &constraints, &indexes, &immediate))
    }

    /// Builds the snapshot from the rows of the five introspection queries.
    pub(crate) fn from_results(
        tables: &QueryResult,
        columns: &QueryResult,
        constraints: &QueryResult,
        indexes: &QueryResult,
        immediate: &QueryResult,
    ) -> Self {
        let mut catalog = Catalog {
            tables: text_column(tables, "table_name").into_iter().collect(),
            constraints: text_column(constraints, "constraint_name").into_iter().collect(),
            indexes: text_column(indexes, "index_name").into_iter().collect(),
            ..Catalog::default()
        };
        for (table, column) in text_pairs(columns, "table_name", "column_name") {
            catalog.columns.entry(table).or_default().insert(column);
        }
        catalog.immediate_foreign_keys = text_pairs(immediate, "table_name", "constraint_name");
        catalog
    }

    pub fn table_exists(&self, table: &str) -> bool {
        self.tables.contains(table)
    }

    pub fn has_column(&self, table: &str, column: &str) -> bool {
        self.columns
            .get(table)
            .is_some_and(|columns| columns.contains(column))
    }

    pub fn has_constraint(&self, name: &str) -> bool {
        self.constraints.contains(name)
    }

    pub fn has_index(&self, name: &str) -> bool {
        self.indexes.contains(name)
    }

    /// Foreign keys checked immediately, as `(table, constraint)`.
    pub fn immediate_foreign_keys(&self) -> &[(String, String)] {
        &self.immediate_foreign_keys
    }
}

fn text_column(result: &QueryResult, column: &str) -> Vec<String> {
    result
        .column_values(column)
        .into_iter()
        .filter_map(|value| match value {
            Value::Text(text) => Some(text),
            _ => None,
        })
        .collect()
}

fn text_pairs(result: &QueryResult, first: &str, second: &str) -> Vec<(String, String)> {
    text_column(result, first)
        .into_iter()
        .zip(text_column(result, second))
        .collect()
}
