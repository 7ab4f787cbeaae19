//! Constraints and indexes implied by the registered entities.

use crate::core::naming::{foreign_key_name, index_name, primary_key_name, quote_ident, unique_name};
use crate::schema::IndexKind;

/// What happens to referencing rows when the referenced row goes away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnDelete {
    Cascade,
    SetNull,
    NoAction,
}

impl OnDelete {
    fn as_sql(&self) -> &'static str {
        match self {
            Self::Cascade => "CASCADE",
            Self::SetNull => "SET NULL",
            Self::NoAction => "NO ACTION",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    PrimaryKey {
        table: String,
        columns: Vec<String>,
    },
    ForeignKey {
        table: String,
        columns: Vec<String>,
        references: String,
        referenced_columns: Vec<String>,
        on_delete: OnDelete,
    },
    Unique {
        table: String,
        columns: Vec<String>,
    },
    Index {
        table: String,
        columns: Vec<String>,
        kind: IndexKind,
    },
}

impl Constraint {
    pub fn primary_key(table: &str, columns: &[&str]) -> Self {
        Self::PrimaryKey {
            table: table.to_string(),
            columns: to_owned(columns),
        }
    }

    pub fn foreign_key(table: &str, columns: &[&str], references: &str, referenced: &[&str], on_delete: OnDelete) -> Self {
        Self::ForeignKey {
            table: table.to_string(),
            columns: to_owned(columns),
            references: references.to_string(),
            referenced_columns: to_owned(referenced),
            on_delete,
        }
    }

    pub fn unique(table: &str, columns: &[&str]) -> Self {
        Self::Unique {
            table: table.to_string(),
            columns: to_owned(columns),
        }
    }

    pub fn index(table: &str, columns: &[&str], kind: IndexKind) -> Self {
        Self::Index {
            table: table.to_string(),
            columns: to_owned(columns),
            kind,
        }
    }

    pub fn table(&self) -> &str {
        match self {
            Self::PrimaryKey { table, .. }
            | Self::ForeignKey { table, .. }
            | Self::Unique { table, .. }
            | Self::Index { table, .. } => table,
        }
    }

    /// Deterministic name, also used to look the constraint up in the catalog.
    pub fn name(&self) -> String {
        match self {
            Self::PrimaryKey { table, .. } => primary_key_name(table),
            Self::ForeignKey { table, columns, .. } => foreign_key_name(table, &as_refs(columns)),
            Self::Unique { table, columns } => unique_name(table, &as_refs(columns)),
            Self::Index { table, columns, .. } => index_name(table, &as_refs(columns)),
        }
    }

    /// Indexes live in `pg_indexes`; everything else is a table constraint.
    pub fn is_index(&self) -> bool {
        matches!(self, Self::Index { .. })
    }

    /// Apply order: keys referenced by foreign keys must exist first.
    pub(crate) fn rank(&self) -> u8 {
        match self {
            Self::PrimaryKey { .. } => 0,
            Self::Unique { .. } => 1,
            Self::Index { .. } => 2,
            Self::ForeignKey { .. } => 3,
        }
    }

    pub fn to_ddl(&self) -> String {
        let name = quote_ident(&self.name());
        let table = quote_ident(self.table());
        match self {
            Self::PrimaryKey { columns, .. } => {
                format!("ALTER TABLE {} ADD CONSTRAINT {} PRIMARY KEY ({})", table, name, column_list(columns))
            }
            Self::Unique { columns, .. } => {
                format!("ALTER TABLE {} ADD CONSTRAINT {} UNIQUE ({})", table, name, column_list(columns))
            }
            Self::Index { columns, kind, .. } => {
                format!("CREATE INDEX {} ON {} USING {} ({})", name, table, kind.as_sql(), column_list(columns))
            }
            Self::ForeignKey {
                columns,
                references,
                referenced_columns,
                on_delete,
                ..
            } => {
                let on_update = if *on_delete == OnDelete::Cascade { " ON UPDATE CASCADE" } else { "" };
                format!(
                    "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE {}{} DEFERRABLE INITIALLY DEFERRED",
                    table,
                    name,
                    column_list(columns),
                    quote_ident(references),
                    column_list(referenced_columns),
                    on_delete.as_sql(),
                    on_update
                )
            }
        }
    }
}

fn to_owned(columns: &[&str]) -> Vec<String> {
    columns.iter().map(|column| column.to_string()).collect()
}

fn as_refs(columns: &[String]) -> Vec<&str> {
    columns.iter().map(String::as_str).collect()
}

fn column_list(columns: &[String]) -> String {
    columns
        .iter()
        .map(|column| quote_ident(column))
        .collect::<Vec<_>>()
        .join(", ")
}
