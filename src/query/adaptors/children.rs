use std::sync::Arc;

use crate::registry::{EntityDescriptor, Registry};
use crate::result::Records;
use crate::sql::{ColumnRef, Condition, JoinKind, Select, TableRef};

use super::Adaptor;

/// Left-joins every descendant table and picks each row's concrete type
/// from the discriminator column.
pub struct ChildrenAdaptor {
    entity: String,
    table: String,
    discriminator: Option<String>,
    descendants: Vec<(String, Vec<String>)>,
}

impl ChildrenAdaptor {
    pub fn new(registry: &Registry, descriptor: &EntityDescriptor) -> Self {
        let descendants = registry
            .descendants(descriptor)
            .iter()
            .map(|child| {
                let columns = child
                    .columns()
                    .into_iter()
                    .filter(|column| *column != "id")
                    .map(str::to_string)
                    .collect();
                (child.table_name().to_string(), columns)
            })
            .collect();
        Self {
            entity: descriptor.name().to_string(),
            table: descriptor.table_name().to_string(),
            discriminator: descriptor.discriminator_column(),
            descendants,
        }
    }
}

impl Adaptor for ChildrenAdaptor {
    fn name(&self) -> &str {
        "children"
    }

    fn prepare(&self, select: &mut Select) {
        for (table, columns) in &self.descendants {
            select.join(
                JoinKind::Left,
                TableRef::new(table),
                Condition::ColumnsEqual(ColumnRef::new(table, "id"), ColumnRef::new(&self.table, "id")),
            );
            for column in columns {
                select.aliased_column(ColumnRef::new(table, column));
            }
        }
    }

    fn resolve_type(&self, records: &Records, registry: &Registry) -> Option<Arc<EntityDescriptor>> {
        let column = self.discriminator.as_deref()?;
        let name = records.get(&self.table)?.get(column)?.as_str()?;
        if name == self.entity || !registry.is_kind_of(name, &self.entity) {
            return None;
        }
        registry.get(name).ok()
    }
}
