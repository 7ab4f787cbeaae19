//! Relation adaptors.
//!
//! Each adaptor handles one relation shape. While the statement is built it
//! may add joins and columns; after rows come back it may pick the concrete
//! type of a row, merge joined columns into the document, or fetch related
//! rows with further queries.

mod children;
mod nested;
mod parent;
mod populate;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::core::{Result, Value};
use crate::document::{Document, DocumentList, FieldValue};
use crate::query::Query;
use crate::registry::{EntityDescriptor, Registry};
use crate::result::Records;
use crate::session::Session;
use crate::sql::Select;

pub use children::ChildrenAdaptor;
pub use nested::NestedAdaptor;
pub use parent::ParentAdaptor;
pub use populate::PopulateAdaptor;

/// Value fetched for the document at `index`.
#[derive(Debug, Clone)]
pub struct Assignment {
    pub index: usize,
    pub field: String,
    pub value: FieldValue,
}

#[async_trait]
pub trait Adaptor: Send + Sync {
    fn name(&self) -> &str;

    /// Adds joins and columns to the statement.
    fn prepare(&self, _select: &mut Select) {}

    /// Concrete entity a row represents, if this adaptor can tell.
    fn resolve_type(&self, _records: &Records, _registry: &Registry) -> Option<Arc<EntityDescriptor>> {
        None
    }

    /// Folds joined columns of a row into its document.
    fn merge(&self, _records: &Records, _document: &mut Document) -> Result<()> {
        Ok(())
    }

    /// Whether [`Adaptor::fetch`] has to run after the main statement.
    fn needs_round_trip(&self) -> bool {
        false
    }

    async fn fetch(&self, _session: &Session, _documents: &[Document]) -> Result<Vec<Assignment>> {
        Ok(Vec::new())
    }
}

/// Ids of `documents`, deduplicated, in first-seen order.
pub(crate) fn owner_ids<'d>(documents: impl IntoIterator<Item = &'d Document>) -> Vec<i64> {
    let mut ids = Vec::new();
    for id in documents.into_iter().filter_map(Document::id) {
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    ids
}

/// Loads `target` rows whose `back_ref` points at one of `owners` and hands
/// each owner its group; owners without rows get an empty list.
pub(crate) async fn load_by_back_ref(
    session: &Session,
    target: &Arc<EntityDescriptor>,
    back_ref: &str,
    field: &str,
    owners: &[(usize, i64)],
) -> Result<Vec<Assignment>> {
    if owners.is_empty() {
        return Ok(Vec::new());
    }
    let mut ids: Vec<i64> = owners.iter().map(|(_, id)| *id).collect();
    ids.sort_unstable();
    ids.dedup();
    let items = Query::new(session, target.clone())?
        .where_in(back_ref, ids.into_iter().map(Value::Integer).collect())?
        .execute()
        .await?;

    let mut grouped: HashMap<i64, Vec<Document>> = HashMap::new();
    for item in items {
        if let Some(owner) = item.get(back_ref).and_then(FieldValue::ref_id) {
            grouped.entry(owner).or_default().push(item);
        }
    }

    let registry = session.registry();
    Ok(owners
        .iter()
        .map(|(index, id)| Assignment {
            index: *index,
            field: field.to_string(),
            value: FieldValue::List(DocumentList::from_documents(
                registry.clone(),
                target.clone(),
                grouped.get(id).cloned().unwrap_or_default(),
            )),
        })
        .collect())
}
