//! Entity-level operations.

use std::sync::Arc;

use serde_json::{Value as JsonValue, json};
use tracing::{Level, event};

use crate::core::{OrmError, Result, Value};
use crate::document::Document;
use crate::query::Query;
use crate::registry::EntityDescriptor;
use crate::session::Session;
use crate::sql::{ColumnRef, Condition, Delete, Statement, Update};

/// Static surface of one registered entity, bound to a session.
#[derive(Clone)]
pub struct Model<'a> {
    session: &'a Session,
    descriptor: Arc<EntityDescriptor>,
}

impl<'a> Model<'a> {
    pub(crate) fn new(session: &'a Session, descriptor: Arc<EntityDescriptor>) -> Self {
        Self { session, descriptor }
    }

    pub fn name(&self) -> &str {
        self.descriptor.name()
    }

    pub fn descriptor(&self) -> &Arc<EntityDescriptor> {
        &self.descriptor
    }

    pub fn session(&self) -> &'a Session {
        self.session
    }

    /// Unsaved document built from `raw`.
    pub fn new_document(&self, raw: &JsonValue) -> Result<Document> {
        Document::build(self.session.registry().clone(), self.descriptor.clone(), raw)
    }

    /// Builds and saves a document.
    pub async fn create(&self, raw: &JsonValue) -> Result<Document> {
        let mut document = self.new_document(raw)?;
        document.save(self.session).await?;
        Ok(document)
    }

    pub fn query(&self) -> Result<Query<'a>> {
        Query::new(self.session, self.descriptor.clone())
    }

    pub fn find(&self, filter: &JsonValue) -> Result<Query<'a>> {
        self.query()?.filter(filter)
    }

    pub async fn find_one(&self, filter: &JsonValue) -> Result<Option<Document>> {
        self.find(filter)?.one().await
    }

    pub async fn find_by_id(&self, id: i64) -> Result<Option<Document>> {
        self.find(&json!({ "id": id }))?.one().await
    }

    pub async fn count(&self, filter: &JsonValue) -> Result<u64> {
        self.find(filter)?.count().await
    }

    /// Sets `changes` on every matching row and returns how many rows matched.
    ///
    /// Each change goes to the table that stores its field; the matching ids
    /// are read first so a change to a filtered field cannot affect which
    /// rows the other tables update.
    pub async fn update(&self, filter: &JsonValue, changes: &JsonValue) -> Result<u64> {
        let changes = changes
            .as_object()
            .ok_or_else(|| OrmError::usage("update() expects an object of changes"))?;
        let registry = self.session.registry();

        let mut per_table: Vec<(String, Vec<(String, Value)>)> = Vec::new();
        for (name, raw) in changes {
            let field = self.descriptor.field(name).ok_or_else(|| OrmError::UnknownField {
                entity: self.descriptor.name().to_string(),
                field: name.clone(),
            })?;
            if name == "id" || !field.has_column() || Some(name.as_str()) == self.descriptor.discriminator_key() {
                return Err(OrmError::usage(format!("Field '{}' cannot be updated in bulk", name)));
            }
            let value = if raw.is_null() {
                Value::Null
            } else {
                field
                    .field_type()
                    .and_then(|field_type| field_type.cast(raw))
                    .ok_or_else(|| OrmError::usage(format!("Invalid value for field '{}': {}", name, raw)))?
            };
            let owner = registry
                .owner_of(&self.descriptor, name)
                .unwrap_or_else(|| self.descriptor.clone());
            let table = owner.table_name().to_string();
            let column = (field.column_name().to_string(), value);
            match per_table.iter_mut().find(|(t, _)| *t == table) {
                Some((_, assignments)) => assignments.push(column),
                None => per_table.push((table, vec![column])),
            }
        }
        if per_table.is_empty() {
            return Ok(0);
        }

        let descriptor = self.descriptor.clone();
        self.session
            .with_transaction(|tx| async move {
                let ids_select = Query::new(&tx, descriptor)?.filter(filter)?.id_select();
                let ids: Vec<Value> = tx
                    .fetch(&Statement::Select(ids_select))
                    .await?
                    .rows
                    .into_iter()
                    .filter_map(|row| row.into_iter().next())
                    .collect();
                if ids.is_empty() {
                    return Ok(0);
                }
                let mut updated = 0;
                for (table, assignments) in per_table {
                    let update = Update {
                        selection: Some(Condition::is_in(ColumnRef::new(&table, "id"), ids.clone())),
                        table,
                        assignments,
                    };
                    updated = updated.max(tx.run(&Statement::Update(update)).await?);
                }
                Ok(updated)
            })
            .await
            .map_err(OrmError::into_conflict)
    }

    /// Deletes every matching row and returns the number deleted.
    ///
    /// Rows are deleted from the root table of the hierarchy; descendant and
    /// embedded rows follow through their cascading foreign keys.
    pub async fn remove(&self, filter: &JsonValue) -> Result<u64> {
        let empty = match filter {
            JsonValue::Null => true,
            JsonValue::Object(object) => object.is_empty(),
            _ => false,
        };
        if empty {
            return Err(OrmError::usage(format!(
                "remove() on '{}' requires a filter",
                self.descriptor.name()
            )));
        }

        let root = self.session.registry().root_of(&self.descriptor);
        let matching = self.find(filter)?.id_select();
        let delete = Delete {
            table: root.table_name().to_string(),
            selection: Some(Condition::InSelect {
                column: ColumnRef::new(root.table_name(), "id"),
                select: Box::new(matching),
                negated: false,
            }),
        };
        let removed = self.session.run(&Statement::Delete(delete)).await?;
        event!(Level::INFO, entity = %self.descriptor.name(), removed, "documents removed");
        Ok(removed)
    }

    /// Invokes a registered static.
    pub async fn call(&self, name: &str, args: Vec<JsonValue>) -> Result<JsonValue> {
        let callable = self
            .descriptor
            .schema()
            .get_static(name)
            .cloned()
            .ok_or_else(|| OrmError::usage(format!("'{}' has no static '{}'", self.descriptor.name(), name)))?;
        callable(self.clone(), args).await
    }
}
