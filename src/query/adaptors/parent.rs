use crate::registry::{EntityDescriptor, Registry};
use crate::sql::{ColumnRef, Condition, JoinKind, Select, TableRef};

use super::Adaptor;

/// Joins every ancestor table so inherited fields resolve through the
/// table that stores them.
pub struct ParentAdaptor {
    table: String,
    ancestors: Vec<(String, Vec<String>)>,
}

impl ParentAdaptor {
    pub fn new(registry: &Registry, descriptor: &EntityDescriptor) -> Self {
        let ancestors = registry
            .ancestors(descriptor)
            .iter()
            .map(|ancestor| {
                let columns = ancestor
                    .columns()
                    .into_iter()
                    .filter(|column| *column != "id")
                    .map(str::to_string)
                    .collect();
                (ancestor.table_name().to_string(), columns)
            })
            .collect();
        Self {
            table: descriptor.table_name().to_string(),
            ancestors,
        }
    }
}

impl Adaptor for ParentAdaptor {
    fn name(&self) -> &str {
        "parent"
    }

    fn prepare(&self, select: &mut Select) {
        for (table, columns) in &self.ancestors {
            select.join(
                JoinKind::Inner,
                TableRef::new(table),
                Condition::ColumnsEqual(ColumnRef::new(table, "id"), ColumnRef::new(&self.table, "id")),
            );
            for column in columns {
                select.aliased_column(ColumnRef::new(table, column));
            }
        }
    }
}
