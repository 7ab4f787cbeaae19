//! In-memory entity instances.

mod list;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value as JsonValue};

use crate::core::{OrmError, Result, ValidationError, Value};
use crate::registry::{EntityDescriptor, Registry};
use crate::schema::validation::collect_errors;
use crate::schema::{Field, FieldKind, Schema};
use crate::types::FieldType;

pub use list::{DocumentList, ListItem};

/// Value held by one field of a document.
#[derive(Debug, Clone)]
pub enum FieldValue {
    Scalar(Value),
    /// Populated single reference.
    Document(Box<Document>),
    List(DocumentList),
}

impl FieldValue {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Scalar(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_document(&self) -> Option<&Document> {
        match self {
            Self::Document(document) => Some(document),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&DocumentList> {
        match self {
            Self::List(list) => Some(list),
            _ => None,
        }
    }

    /// Referenced id, whether stored raw or as a populated document.
    pub fn ref_id(&self) -> Option<i64> {
        match self {
            Self::Scalar(value) => value.as_i64(),
            Self::Document(document) => document.id(),
            Self::List(_) => None,
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            Self::Scalar(value) => value.to_json(),
            Self::Document(document) => document.to_object(),
            Self::List(list) => JsonValue::Array(list.iter().map(Document::to_object).collect()),
        }
    }
}

/// One entity instance: a field map plus its last persisted snapshot.
#[derive(Clone)]
pub struct Document {
    registry: Arc<Registry>,
    descriptor: Arc<EntityDescriptor>,
    pub(crate) is_new: bool,
    pub(crate) data: BTreeMap<String, FieldValue>,
    pub(crate) original: BTreeMap<String, FieldValue>,
}

impl Document {
    /// New, unsaved document: defaults first, then the cast input.
    ///
    /// Input keys that are not fields are discarded and values that do not
    /// cast to the field's type are skipped.
    pub fn build(registry: Arc<Registry>, descriptor: Arc<EntityDescriptor>, raw: &JsonValue) -> Result<Self> {
        let mut document = Self {
            registry,
            descriptor,
            is_new: true,
            data: BTreeMap::new(),
            original: BTreeMap::new(),
        };
        let defaults: Vec<(String, JsonValue)> = document
            .schema()
            .fields()
            .filter_map(|field| field.default().map(|d| (field.name().to_string(), d.resolve())))
            .collect();
        for (name, value) in defaults {
            document.assign(&name, &value)?;
        }
        if let Some(input) = raw.as_object() {
            for (name, value) in input {
                if document.schema().has(name) {
                    document.assign(name, value)?;
                }
            }
        }
        Ok(document)
    }

    /// Persisted document built from stored column values.
    pub(crate) fn hydrate(
        registry: Arc<Registry>,
        descriptor: Arc<EntityDescriptor>,
        data: BTreeMap<String, FieldValue>,
    ) -> Self {
        Self {
            registry,
            descriptor,
            is_new: false,
            original: data.clone(),
            data,
        }
    }

    /// Persisted document known only by id.
    pub(crate) fn reference_stub(registry: Arc<Registry>, descriptor: Arc<EntityDescriptor>, id: i64) -> Self {
        let mut data = BTreeMap::new();
        data.insert("id".to_string(), FieldValue::Scalar(Value::Integer(id)));
        Self::hydrate(registry, descriptor, data)
    }

    pub fn id(&self) -> Option<i64> {
        self.data.get("id").and_then(FieldValue::ref_id)
    }

    pub fn is_new(&self) -> bool {
        self.is_new
    }

    pub fn entity_name(&self) -> &str {
        self.descriptor.name()
    }

    pub fn descriptor(&self) -> &Arc<EntityDescriptor> {
        &self.descriptor
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Full schema of the concrete entity.
    pub fn schema(&self) -> &Schema {
        self.descriptor.schema()
    }

    pub fn is_instance_of(&self, entity: &str) -> bool {
        self.registry.is_kind_of(self.descriptor.name(), entity)
    }

    /// Raw stored value.
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.data.get(name)
    }

    /// Scalar value of a field with its getter modifier applied; a populated
    /// reference yields its id.
    pub fn value(&self, name: &str) -> Option<Value> {
        let value = match self.data.get(name)? {
            FieldValue::Scalar(value) => value.clone(),
            FieldValue::Document(document) => Value::from(document.id()),
            FieldValue::List(_) => return None,
        };
        match self.schema().modifier(name).and_then(|m| m.getter.as_ref()) {
            Some(getter) => Some(getter(&value)),
            None => Some(value),
        }
    }

    pub fn document(&self, name: &str) -> Option<&Document> {
        self.data.get(name).and_then(FieldValue::as_document)
    }

    pub fn list(&self, name: &str) -> Option<&DocumentList> {
        self.data.get(name).and_then(FieldValue::as_list)
    }

    /// Collection of a multi-valued field, created empty on first access.
    pub fn list_mut(&mut self, name: &str) -> Result<&mut DocumentList> {
        let target = match self.field(name)?.kind() {
            FieldKind::Many { target, .. } => target.clone(),
            _ => {
                return Err(OrmError::usage(format!(
                    "Field '{}' of '{}' is not a collection",
                    name,
                    self.entity_name()
                )));
            }
        };
        if !matches!(self.data.get(name), Some(FieldValue::List(_))) {
            let descriptor = self.registry.get(&target)?;
            self.data.insert(
                name.to_string(),
                FieldValue::List(DocumentList::new(self.registry.clone(), descriptor)),
            );
        }
        match self.data.get_mut(name) {
            Some(FieldValue::List(list)) => Ok(list),
            _ => Err(OrmError::usage(format!("Field '{}' is not a collection", name))),
        }
    }

    /// Assigns a field (or a virtual with a setter) from raw input.
    ///
    /// `null` clears the field. A value that does not cast to the field's
    /// type leaves the current value untouched.
    pub fn set(&mut self, name: &str, value: impl Into<JsonValue>) -> Result<()> {
        let value = value.into();
        if self.schema().has(name) {
            return self.assign(name, &value);
        }
        let setter = self
            .schema()
            .virtual_field(name)
            .and_then(|v| v.setter.clone());
        match setter {
            Some(setter) => setter(self, value),
            None => Err(self.unknown_field(name)),
        }
    }

    /// Stores a populated instance in a reference field.
    pub fn set_document(&mut self, name: &str, related: Document) -> Result<()> {
        let target = match self.field(name)?.kind() {
            FieldKind::Ref { target } => target.clone(),
            _ => {
                return Err(OrmError::usage(format!(
                    "Field '{}' of '{}' is not a single reference",
                    name,
                    self.entity_name()
                )));
            }
        };
        if !related.is_instance_of(&target) {
            return Err(OrmError::usage(format!(
                "Field '{}' expects '{}', got '{}'",
                name,
                target,
                related.entity_name()
            )));
        }
        self.data.insert(name.to_string(), FieldValue::Document(Box::new(related)));
        Ok(())
    }

    pub fn unset(&mut self, name: &str) -> Option<FieldValue> {
        self.data.remove(name)
    }

    pub fn get_virtual(&self, name: &str) -> Result<JsonValue> {
        let getter = self
            .schema()
            .virtual_field(name)
            .and_then(|v| v.getter.clone())
            .ok_or_else(|| self.unknown_field(name))?;
        Ok(getter(self))
    }

    /// Invokes a named instance method.
    pub fn call(&self, method: &str, args: &[JsonValue]) -> Result<JsonValue> {
        let method_fn = self
            .schema()
            .get_method(method)
            .cloned()
            .ok_or_else(|| OrmError::usage(format!("'{}' has no method '{}'", self.entity_name(), method)))?;
        method_fn(self, args)
    }

    /// Plain JSON copy of the stored data. Virtuals are not included.
    pub fn to_object(&self) -> JsonValue {
        let object: Map<String, JsonValue> = self
            .data
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect();
        JsonValue::Object(object)
    }

    pub fn validate(&self) -> Result<()> {
        let mut details = Vec::new();
        collect_errors(self, "", None, &mut details);
        if details.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::new(details).into())
        }
    }

    /// Whether `name` differs from the last persisted snapshot.
    pub fn is_modified(&self, name: &str) -> bool {
        if self.is_new {
            return true;
        }
        match self.schema().get(name) {
            Some(field) => !same_value(field, self.data.get(name), self.original.get(name)),
            None => false,
        }
    }

    /// Whether any field differs from the last persisted snapshot.
    pub fn has_changes(&self) -> bool {
        self.is_new || self.schema().fields().any(|field| self.is_modified(field.name()))
    }

    pub(crate) fn set_id(&mut self, id: i64) {
        self.data.insert("id".to_string(), FieldValue::Scalar(Value::Integer(id)));
    }

    pub(crate) fn snapshot(&mut self) {
        for value in self.data.values_mut() {
            if let FieldValue::List(list) = value {
                for item in list.iter_mut() {
                    item.snapshot();
                }
            }
        }
        self.original = self.data.clone();
    }

    fn field(&self, name: &str) -> Result<&Field> {
        self.schema().get(name).ok_or_else(|| self.unknown_field(name))
    }

    fn unknown_field(&self, name: &str) -> OrmError {
        OrmError::UnknownField {
            entity: self.entity_name().to_string(),
            field: name.to_string(),
        }
    }

    fn assign(&mut self, name: &str, raw: &JsonValue) -> Result<()> {
        if raw.is_null() {
            self.data.remove(name);
            return Ok(());
        }
        let kind = self.field(name)?.kind().clone();
        let cast = match kind {
            FieldKind::Scalar(field_type) => field_type.cast(raw).map(FieldValue::Scalar),
            FieldKind::Ref { .. } => FieldType::Integer.cast(raw).map(FieldValue::Scalar),
            FieldKind::Many { target, .. } => match raw.as_array() {
                Some(items) => {
                    let descriptor = self.registry.get(&target)?;
                    Some(FieldValue::List(DocumentList::from_json(
                        self.registry.clone(),
                        descriptor,
                        items,
                    )))
                }
                None => None,
            },
        };
        let Some(mut value) = cast else {
            return Ok(());
        };
        if let FieldValue::Scalar(scalar) = &value {
            if let Some(setter) = self.schema().modifier(name).and_then(|m| m.setter.as_ref()) {
                value = FieldValue::Scalar(setter(scalar));
            }
        }
        self.data.insert(name.to_string(), value);
        Ok(())
    }
}

/// Type-aware equality between a current and a snapshot value.
fn same_value(field: &Field, current: Option<&FieldValue>, original: Option<&FieldValue>) -> bool {
    match (current, original) {
        (None, None) => true,
        (Some(FieldValue::Scalar(a)), Some(FieldValue::Scalar(b))) => match field.field_type() {
            Some(field_type) => field_type.is_equal(a, b),
            None => a == b,
        },
        (Some(FieldValue::List(a)), Some(FieldValue::List(b))) => {
            a.len() == b.len()
                && a.iter().zip(b.iter()).all(|(x, y)| {
                    x.id().is_some() && x.id() == y.id() && !x.has_changes()
                })
        }
        (Some(a), Some(b)) => match (a.ref_id(), b.ref_id()) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        },
        _ => false,
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("entity", &self.descriptor.name())
            .field("is_new", &self.is_new)
            .field("data", &self.data)
            .finish()
    }
}
