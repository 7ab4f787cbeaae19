//! Persistence lifecycle of documents.
//!
//! `save` validates, runs hooks and upserts the document across every table
//! of its lineage, then saves embedded items, all in one transaction.
//! `remove` deletes the root row and lets cascading keys remove the rest.

mod hooks;

use async_recursion::async_recursion;
use tracing::{Instrument, Level, event, info_span};

use crate::core::{OrmError, Result, Value};
use crate::document::{Document, FieldValue};
use crate::query::adaptors::{Adaptor, PopulateAdaptor};
use crate::registry::Relation;
use crate::schema::{Field, Hook};
use crate::session::Session;
use crate::sql::{ColumnRef, Condition, Delete, Insert, Statement, Update};

use hooks::{run_post_hooks, run_pre_hooks};

impl Document {
    /// Validates and writes the document.
    ///
    /// Nothing is written when validation or a pre hook fails. A failed
    /// write rolls the transaction back and restores the in-memory state;
    /// unique violations surface as [`OrmError::Conflict`]. Post hooks run
    /// after the write and their failures are only logged.
    #[async_recursion]
    pub async fn save(&mut self, session: &Session) -> Result<()> {
        let span = info_span!("document.save", entity = %self.entity_name(), id = ?self.id());
        async move {
            let creating = self.is_new;
            run_pre_hooks(self, session, Hook::Validate).await?;
            self.validate()?;
            run_post_hooks(self, session, Hook::Validate).await;
            run_pre_hooks(self, session, Hook::Save).await?;
            if creating {
                run_pre_hooks(self, session, Hook::Create).await?;
            }

            let backup = self.clone();
            let document = &mut *self;
            let written = session
                .with_transaction(|tx| async move { upsert(document, &tx).await })
                .await;
            if let Err(err) = written {
                *self = backup;
                event!(Level::ERROR, error = %err, "save failed");
                return Err(err.into_conflict());
            }
            self.snapshot();
            event!(Level::DEBUG, id = ?self.id(), created = creating, "document saved");

            if creating {
                run_post_hooks(self, session, Hook::Create).await;
            }
            run_post_hooks(self, session, Hook::Save).await;
            Ok(())
        }
        .instrument(span)
        .await
    }

    /// Deletes the document. Unsaved documents are left alone.
    ///
    /// The document keeps its id and data but counts as new again, so a
    /// later save inserts it anew.
    pub async fn remove(&mut self, session: &Session) -> Result<()> {
        if self.is_new {
            return Ok(());
        }
        let id = self
            .id()
            .ok_or_else(|| OrmError::usage("Persisted document has no id"))?;
        let span = info_span!("document.remove", entity = %self.entity_name(), id);
        async move {
            run_pre_hooks(self, session, Hook::Remove).await?;
            let root = self.registry().root_of(self.descriptor());
            let delete = Delete {
                table: root.table_name().to_string(),
                selection: Some(Condition::eq(ColumnRef::new(root.table_name(), "id"), id)),
            };
            session.run(&Statement::Delete(delete)).await?;
            self.is_new = true;
            event!(Level::DEBUG, "document removed");
            run_post_hooks(self, session, Hook::Remove).await;
            Ok(())
        }
        .instrument(span)
        .await
    }

    /// Links `other` through the junction table of a many-to-many `field`.
    /// Linking an already linked pair changes nothing.
    pub async fn associate(&mut self, field: &str, other: &Document, session: &Session) -> Result<()> {
        let link = self.junction_link(field, other)?;
        let insert = Insert {
            table: link.junction.clone(),
            columns: vec![link.owner_column.clone(), link.target_column.clone()],
            values: vec![Value::Integer(link.owner_id), Value::Integer(link.target_id)],
            returning: None,
            ignore_conflicts: true,
        };
        match session.run(&Statement::Insert(insert)).await {
            Ok(_) => {}
            Err(OrmError::Database(err)) if err.is_unique_violation() => {}
            Err(err) => return Err(err),
        }

        let list = self.list_mut(field)?;
        if !list.contains_id(link.target_id) {
            list.push(other.clone())?;
        }
        self.sync_original(field);
        Ok(())
    }

    /// Removes the junction row linking `other` through `field`.
    pub async fn dissociate(&mut self, field: &str, other: &Document, session: &Session) -> Result<()> {
        let link = self.junction_link(field, other)?;
        let delete = Delete {
            selection: Some(Condition::all(vec![
                Condition::eq(ColumnRef::new(&link.junction, &link.owner_column), link.owner_id),
                Condition::eq(ColumnRef::new(&link.junction, &link.target_column), link.target_id),
            ])),
            table: link.junction,
        };
        session.run(&Statement::Delete(delete)).await?;

        if let Some(FieldValue::List(list)) = self.data.get_mut(field) {
            list.retain_ids(|id| id != Some(link.target_id));
        }
        self.sync_original(field);
        Ok(())
    }

    /// Loads the related documents of `field` into this document.
    pub async fn populate(&mut self, field: &str, session: &Session) -> Result<()> {
        let adaptor = PopulateAdaptor::follow_up(self.registry(), self.descriptor(), field)?;
        let assignments = adaptor.fetch(session, std::slice::from_ref(self)).await?;
        let unchanged = !self.is_modified(field);
        for assignment in assignments {
            self.data.insert(assignment.field, assignment.value);
        }
        if unchanged {
            self.sync_original(field);
        }
        Ok(())
    }

    fn sync_original(&mut self, field: &str) {
        match self.data.get(field) {
            Some(value) => {
                self.original.insert(field.to_string(), value.clone());
            }
            None => {
                self.original.remove(field);
            }
        }
    }

    fn junction_link(&self, field: &str, other: &Document) -> Result<JunctionLink> {
        let relation = self.registry().relation(self.descriptor(), field)?;
        let Relation::ManyToMany {
            target,
            junction,
            owner_column,
            target_column,
        } = relation
        else {
            return Err(OrmError::usage(format!(
                "Field '{}' of '{}' is not a many-to-many relation",
                field,
                self.entity_name()
            )));
        };
        if !other.is_instance_of(target.name()) {
            return Err(OrmError::usage(format!(
                "Field '{}' links '{}', got '{}'",
                field,
                target.name(),
                other.entity_name()
            )));
        }
        match (self.id(), other.id()) {
            (Some(owner_id), Some(target_id)) if !self.is_new && !other.is_new => Ok(JunctionLink {
                junction,
                owner_column,
                target_column,
                owner_id,
                target_id,
            }),
            _ => Err(OrmError::usage("Both documents must be saved before they can be linked")),
        }
    }
}

struct JunctionLink {
    junction: String,
    owner_column: String,
    target_column: String,
    owner_id: i64,
    target_id: i64,
}

/// Column value of `field`: populated references are reduced to their id.
fn column_value(document: &Document, field: &Field) -> Value {
    match document.get(field.name()) {
        Some(FieldValue::Scalar(value)) => value.clone(),
        Some(FieldValue::Document(related)) => Value::from(related.id()),
        Some(FieldValue::List(_)) | None => Value::Null,
    }
}

/// Writes every lineage table of `document`, root first, then saves its
/// embedded items.
async fn upsert(document: &mut Document, tx: &Session) -> Result<()> {
    let registry = document.registry().clone();
    let lineage = registry.lineage(document.descriptor());
    let entity_name = document.entity_name().to_string();
    let mut id = document.id();

    for owner in &lineage {
        let discriminator = owner.discriminator_key();
        let mut columns = Vec::new();
        let mut values = Vec::new();
        for field in owner.own_schema().column_fields() {
            if field.name() == "id" {
                continue;
            }
            let is_discriminator = Some(field.name()) == discriminator;
            let value = if is_discriminator {
                Value::Text(entity_name.clone())
            } else {
                column_value(document, field)
            };
            if document.is_new {
                if value.is_null() {
                    continue;
                }
            } else if is_discriminator || !document.is_modified(field.name()) {
                continue;
            }
            columns.push(field.column_name().to_string());
            values.push(value);
        }

        let table = owner.table_name().to_string();
        match (document.is_new, id) {
            (true, None) => {
                let insert = Insert {
                    table,
                    columns,
                    values,
                    returning: Some("id".to_string()),
                    ignore_conflicts: false,
                };
                let result = tx.fetch(&Statement::Insert(insert)).await?;
                let generated = result
                    .scalar()
                    .and_then(Value::as_i64)
                    .ok_or_else(|| OrmError::usage(format!("Insert into '{}' returned no id", owner.table_name())))?;
                id = Some(generated);
            }
            (true, Some(existing)) => {
                columns.insert(0, "id".to_string());
                values.insert(0, Value::Integer(existing));
                let insert = Insert {
                    table,
                    columns,
                    values,
                    returning: None,
                    ignore_conflicts: false,
                };
                tx.run(&Statement::Insert(insert)).await?;
            }
            (false, Some(existing)) => {
                if columns.is_empty() {
                    continue;
                }
                let update = Update {
                    selection: Some(Condition::eq(ColumnRef::new(&table, "id"), existing)),
                    table,
                    assignments: columns.into_iter().zip(values).collect(),
                };
                tx.run(&Statement::Update(update)).await?;
            }
            (false, None) => {
                return Err(OrmError::usage(format!(
                    "Persisted '{}' document has no id",
                    entity_name
                )));
            }
        }
    }

    let id = id.ok_or_else(|| OrmError::usage("Save produced no id"))?;
    document.set_id(id);
    document.is_new = false;

    let embedded: Vec<String> = document
        .schema()
        .fields()
        .filter(|field| field.is_nested())
        .map(|field| field.name().to_string())
        .collect();
    for name in embedded {
        let Relation::Embedded { back_ref, .. } = registry.relation(document.descriptor(), &name)? else {
            continue;
        };
        if let Some(FieldValue::List(items)) = document.data.get_mut(&name) {
            for item in items.iter_mut() {
                item.data
                    .insert(back_ref.clone(), FieldValue::Scalar(Value::Integer(id)));
                item.save(tx).await?;
            }
        }
    }
    Ok(())
}
