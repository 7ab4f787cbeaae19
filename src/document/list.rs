use std::fmt;
use std::sync::Arc;

use serde_json::Value as JsonValue;

use crate::core::{OrmError, Result};
use crate::registry::{EntityDescriptor, Registry};

use super::Document;

/// Element accepted by [`DocumentList`]: a typed document or raw data
/// coerced into one.
pub enum ListItem {
    Document(Document),
    Data(JsonValue),
}

impl From<Document> for ListItem {
    fn from(document: Document) -> Self {
        Self::Document(document)
    }
}

impl From<JsonValue> for ListItem {
    fn from(data: JsonValue) -> Self {
        Self::Data(data)
    }
}

/// Collection of documents of one entity type.
#[derive(Clone)]
pub struct DocumentList {
    registry: Arc<Registry>,
    descriptor: Arc<EntityDescriptor>,
    items: Vec<Document>,
}

impl DocumentList {
    pub(crate) fn new(registry: Arc<Registry>, descriptor: Arc<EntityDescriptor>) -> Self {
        Self {
            registry,
            descriptor,
            items: Vec::new(),
        }
    }

    pub(crate) fn from_documents(
        registry: Arc<Registry>,
        descriptor: Arc<EntityDescriptor>,
        items: Vec<Document>,
    ) -> Self {
        Self {
            registry,
            descriptor,
            items,
        }
    }

    /// Casts raw input element-wise; elements that do not coerce are dropped.
    pub(crate) fn from_json(registry: Arc<Registry>, descriptor: Arc<EntityDescriptor>, items: &[JsonValue]) -> Self {
        let mut list = Self::new(registry, descriptor);
        list.items = items
            .iter()
            .filter_map(|item| list.coerce(ListItem::Data(item.clone())).ok())
            .collect();
        list
    }

    pub fn entity_name(&self) -> &str {
        self.descriptor.name()
    }

    pub fn push(&mut self, item: impl Into<ListItem>) -> Result<()> {
        let document = self.coerce(item.into())?;
        self.items.push(document);
        Ok(())
    }

    pub fn insert(&mut self, index: usize, item: impl Into<ListItem>) -> Result<()> {
        if index > self.items.len() {
            return Err(OrmError::usage(format!(
                "Index {} out of bounds for list of length {}",
                index,
                self.items.len()
            )));
        }
        let document = self.coerce(item.into())?;
        self.items.insert(index, document);
        Ok(())
    }

    pub fn remove_at(&mut self, index: usize) -> Option<Document> {
        if index < self.items.len() {
            Some(self.items.remove(index))
        } else {
            None
        }
    }

    pub(crate) fn retain_ids(&mut self, keep: impl Fn(Option<i64>) -> bool) {
        self.items.retain(|item| keep(item.id()));
    }

    pub fn get(&self, index: usize) -> Option<&Document> {
        self.items.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Document> {
        self.items.get_mut(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Document> {
        self.items.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Document> {
        self.items.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Ids of the persisted elements.
    pub fn ids(&self) -> Vec<i64> {
        self.items.iter().filter_map(Document::id).collect()
    }

    pub fn contains_id(&self, id: i64) -> bool {
        self.items.iter().any(|item| item.id() == Some(id))
    }

    fn coerce(&self, item: ListItem) -> Result<Document> {
        match item {
            ListItem::Document(document) => {
                if self.registry.is_kind_of(document.entity_name(), self.descriptor.name()) {
                    Ok(document)
                } else {
                    Err(OrmError::usage(format!(
                        "Cannot add '{}' to a list of '{}'",
                        document.entity_name(),
                        self.descriptor.name()
                    )))
                }
            }
            ListItem::Data(JsonValue::Number(id)) => {
                let id = id
                    .as_i64()
                    .ok_or_else(|| OrmError::usage(format!("Invalid id {} for '{}'", id, self.descriptor.name())))?;
                Ok(Document::reference_stub(
                    self.registry.clone(),
                    self.descriptor.clone(),
                    id,
                ))
            }
            ListItem::Data(data @ JsonValue::Object(_)) => {
                Document::build(self.registry.clone(), self.descriptor.clone(), &data)
            }
            ListItem::Data(other) => Err(OrmError::usage(format!(
                "Cannot coerce {} into '{}'",
                other,
                self.descriptor.name()
            ))),
        }
    }
}

impl<'a> IntoIterator for &'a DocumentList {
    type Item = &'a Document;
    type IntoIter = std::slice::Iter<'a, Document>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl fmt::Debug for DocumentList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentList")
            .field("entity", &self.descriptor.name())
            .field("items", &self.items)
            .finish()
    }
}
