use crate::core::naming::sanitize_name;
use crate::schema::{Field, Schema};

/// Registered entity: its table and the schema split into the part stored
/// in its own table and the full shape inherited through its ancestors.
#[derive(Debug)]
pub struct EntityDescriptor {
    pub(crate) name: String,
    pub(crate) table: String,
    pub(crate) own_schema: Schema,
    pub(crate) schema: Schema,
    pub(crate) parent: Option<String>,
    pub(crate) children: Vec<String>,
    pub(crate) discriminator_key: Option<String>,
}

impl EntityDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    /// Fields stored in this entity's table.
    pub fn own_schema(&self) -> &Schema {
        &self.own_schema
    }

    /// Own fields merged over every ancestor's.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    pub fn children(&self) -> &[String] {
        &self.children
    }

    pub fn has_parent(&self) -> bool {
        self.parent.is_some()
    }

    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    pub fn discriminator_key(&self) -> Option<&str> {
        self.discriminator_key.as_deref()
    }

    pub fn discriminator_column(&self) -> Option<String> {
        self.discriminator_key.as_deref().map(sanitize_name)
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.schema.get(name)
    }

    pub fn has_embedded_fields(&self) -> bool {
        self.schema.fields().any(Field::is_nested)
    }

    /// Column list of this entity's table, `id` first.
    pub fn columns(&self) -> Vec<&str> {
        let mut columns: Vec<&str> = vec!["id"];
        columns.extend(
            self.own_schema
                .column_fields()
                .filter(|field| field.name() != "id")
                .map(Field::column_name),
        );
        columns
    }
}
