//! Entity registration.
//!
//! A [`RegistryBuilder`] collects model and discriminator declarations and
//! produces an immutable [`Registry`]. Relation declarations are checked
//! while building so a malformed shape fails before any query runs.

mod descriptor;

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Arc;

use serde_json::Value as JsonValue;
use tracing::debug;

use crate::core::naming::{junction_table_name, sanitize_name};
use crate::core::{OrmError, Result};
use crate::document::Document;
use crate::schema::{DEFAULT_DISCRIMINATOR_KEY, Field, FieldKind, Schema};
use crate::types::FieldType;

pub use descriptor::EntityDescriptor;

/// Width of discriminator columns.
pub const DISCRIMINATOR_SIZE: usize = 63;

/// How a relation field is resolved.
#[derive(Debug, Clone)]
pub enum Relation {
    /// Single reference stored in the owner's column.
    Single { target: Arc<EntityDescriptor> },
    /// Owned collection; `back_ref` on the target points at the owner.
    Embedded {
        target: Arc<EntityDescriptor>,
        back_ref: String,
    },
    /// Collection linked through a single reference on the target.
    OneToMany {
        target: Arc<EntityDescriptor>,
        back_ref: String,
    },
    /// Collection linked through a junction table.
    ManyToMany {
        target: Arc<EntityDescriptor>,
        junction: String,
        owner_column: String,
        target_column: String,
    },
}

impl Relation {
    pub fn target(&self) -> &Arc<EntityDescriptor> {
        match self {
            Self::Single { target }
            | Self::Embedded { target, .. }
            | Self::OneToMany { target, .. }
            | Self::ManyToMany { target, .. } => target,
        }
    }
}

#[derive(Debug)]
pub struct Registry {
    entities: BTreeMap<String, Arc<EntityDescriptor>>,
    order: Vec<String>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub fn get(&self, name: &str) -> Result<Arc<EntityDescriptor>> {
        self.entities
            .get(name)
            .cloned()
            .ok_or_else(|| OrmError::UnknownEntity(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entities.contains_key(name)
    }

    /// Descriptors in registration order.
    pub fn entities(&self) -> impl Iterator<Item = &Arc<EntityDescriptor>> {
        self.order.iter().filter_map(|name| self.entities.get(name))
    }

    /// Builds a new document of `entity` from raw input.
    pub fn create(self: &Arc<Self>, entity: &str, raw: &JsonValue) -> Result<Document> {
        let descriptor = self.get(entity)?;
        Document::build(self.clone(), descriptor, raw)
    }

    /// Ancestors, nearest first.
    pub fn ancestors(&self, descriptor: &EntityDescriptor) -> Vec<Arc<EntityDescriptor>> {
        let mut ancestors = Vec::new();
        let mut parent = descriptor.parent.clone();
        while let Some(name) = parent {
            match self.entities.get(&name) {
                Some(found) => {
                    parent = found.parent.clone();
                    ancestors.push(found.clone());
                }
                None => break,
            }
        }
        ancestors
    }

    /// Root ancestor first, `descriptor` last.
    pub fn lineage(&self, descriptor: &Arc<EntityDescriptor>) -> Vec<Arc<EntityDescriptor>> {
        let mut lineage = self.ancestors(descriptor);
        lineage.reverse();
        lineage.push(descriptor.clone());
        lineage
    }

    pub fn root_of(&self, descriptor: &Arc<EntityDescriptor>) -> Arc<EntityDescriptor> {
        self.ancestors(descriptor)
            .pop()
            .unwrap_or_else(|| descriptor.clone())
    }

    /// Every descendant, breadth first.
    pub fn descendants(&self, descriptor: &EntityDescriptor) -> Vec<Arc<EntityDescriptor>> {
        let mut found = Vec::new();
        let mut queue: VecDeque<String> = descriptor.children.iter().cloned().collect();
        while let Some(name) = queue.pop_front() {
            if let Some(child) = self.entities.get(&name) {
                queue.extend(child.children.iter().cloned());
                found.push(child.clone());
            }
        }
        found
    }

    /// True when `candidate` is `entity` or one of its descendants.
    pub fn is_kind_of(&self, candidate: &str, entity: &str) -> bool {
        if candidate == entity {
            return true;
        }
        match self.entities.get(candidate) {
            Some(descriptor) => self.ancestors(descriptor).iter().any(|a| a.name == entity),
            None => false,
        }
    }

    /// The descriptor in `descriptor`'s lineage whose table stores `field`.
    pub fn owner_of(&self, descriptor: &Arc<EntityDescriptor>, field: &str) -> Option<Arc<EntityDescriptor>> {
        if descriptor.own_schema.has(field) {
            return Some(descriptor.clone());
        }
        self.ancestors(descriptor)
            .into_iter()
            .find(|ancestor| ancestor.own_schema.has(field))
    }

    /// Single reference field on `target` pointing at `owner`.
    fn back_reference(&self, target: &EntityDescriptor, owner: &EntityDescriptor) -> Option<String> {
        target
            .schema
            .fields()
            .find(|field| matches!(field.kind(), FieldKind::Ref { target } if target == &owner.name))
            .map(|field| field.name().to_string())
    }

    /// Classifies a relation field of `descriptor`.
    pub fn relation(&self, descriptor: &Arc<EntityDescriptor>, field_name: &str) -> Result<Relation> {
        let field = descriptor.schema.get(field_name).ok_or_else(|| OrmError::UnknownField {
            entity: descriptor.name.clone(),
            field: field_name.to_string(),
        })?;
        let owner = self
            .owner_of(descriptor, field_name)
            .unwrap_or_else(|| descriptor.clone());
        let lookup = |target: &str| {
            self.entities.get(target).cloned().ok_or_else(|| {
                OrmError::relation(&owner.name, field_name, format!("unknown entity '{}'", target))
            })
        };

        match field.kind() {
            FieldKind::Scalar(_) => Err(OrmError::relation(
                &owner.name,
                field_name,
                "field is not a relation",
            )),
            FieldKind::Ref { target } => Ok(Relation::Single {
                target: lookup(target)?,
            }),
            FieldKind::Many { target, embedded: true } => {
                let target = lookup(target)?;
                let back_ref = self.back_reference(&target, &owner).ok_or_else(|| {
                    OrmError::relation(
                        &owner.name,
                        field_name,
                        format!("embedded entity '{}' has no reference back to '{}'", target.name, owner.name),
                    )
                })?;
                Ok(Relation::Embedded { target, back_ref })
            }
            FieldKind::Many { target, embedded: false } => {
                let target = lookup(target)?;
                if let Some(back_ref) = self.back_reference(&target, &owner) {
                    return Ok(Relation::OneToMany { target, back_ref });
                }
                if target.table == owner.table {
                    return Err(OrmError::relation(
                        &owner.name,
                        field_name,
                        "self-referencing many-to-many relations are not supported",
                    ));
                }
                Ok(Relation::ManyToMany {
                    junction: junction_table_name(&owner.table, &target.table),
                    owner_column: owner.table.clone(),
                    target_column: target.table.clone(),
                    target,
                })
            }
        }
    }

    /// A target that can be folded into a query as a plain join.
    pub fn is_flat(&self, descriptor: &EntityDescriptor) -> bool {
        !descriptor.has_parent() && !descriptor.has_children() && !descriptor.has_embedded_fields()
    }
}

struct PendingEntity {
    name: String,
    schema: Schema,
    parent: Option<String>,
}

/// Collects declarations; nothing is checked until [`RegistryBuilder::build`].
#[derive(Default)]
pub struct RegistryBuilder {
    pending: Vec<PendingEntity>,
}

impl RegistryBuilder {
    pub fn model(mut self, name: &str, schema: Schema) -> Self {
        self.pending.push(PendingEntity {
            name: name.to_string(),
            schema,
            parent: None,
        });
        self
    }

    /// Declares `name` as a concrete descendant of `parent`.
    pub fn discriminator(mut self, parent: &str, name: &str, schema: Schema) -> Self {
        self.pending.push(PendingEntity {
            name: name.to_string(),
            schema,
            parent: Some(parent.to_string()),
        });
        self
    }

    pub fn build(self) -> Result<Arc<Registry>> {
        let mut seen = HashSet::new();
        for entity in &self.pending {
            if entity.schema.has("id") {
                return Err(OrmError::usage(format!("Entity '{}' declares reserved field 'id'", entity.name)));
            }
            if let Some(parent) = &entity.parent {
                if !seen.contains(parent.as_str()) {
                    return Err(OrmError::UnknownEntity(parent.clone()));
                }
            }
            if !seen.insert(entity.name.as_str()) {
                return Err(OrmError::usage(format!("Entity '{}' is registered twice", entity.name)));
            }
        }

        let keys = self.discriminator_keys();
        let mut built: BTreeMap<String, EntityDescriptor> = BTreeMap::new();
        let mut order = Vec::new();

        for entity in self.pending {
            let key = keys.get(&root_name(&entity.name, &built, entity.parent.as_deref())).cloned();
            let mut own = entity.schema;
            let id_type = if entity.parent.is_some() { FieldType::Integer } else { FieldType::Id };
            own.add_field("id", Field::new(id_type));
            if let Some(key) = &key {
                own.add_field(
                    key,
                    Field::string_sized(DISCRIMINATOR_SIZE).default_value(entity.name.clone()),
                );
            }
            check_columns(&entity.name, &own)?;

            let schema = match &entity.parent {
                Some(parent) => {
                    let parent_descriptor = built
                        .get_mut(parent)
                        .ok_or_else(|| OrmError::UnknownEntity(parent.clone()))?;
                    parent_descriptor.children.push(entity.name.clone());
                    parent_descriptor.schema.extend(&own)
                }
                None => Schema::new().extend(&own),
            };

            debug!(entity = %entity.name, parent = ?entity.parent, "registered entity");
            order.push(entity.name.clone());
            built.insert(
                entity.name.clone(),
                EntityDescriptor {
                    table: sanitize_name(&entity.name),
                    name: entity.name,
                    own_schema: own,
                    schema,
                    parent: entity.parent,
                    children: Vec::new(),
                    discriminator_key: key,
                },
            );
        }

        let registry = Registry {
            entities: built.into_iter().map(|(name, d)| (name, Arc::new(d))).collect(),
            order,
        };
        registry.check_relations()?;
        Ok(Arc::new(registry))
    }

    /// Discriminator key per hierarchy root, for roots that have descendants.
    fn discriminator_keys(&self) -> BTreeMap<String, String> {
        let mut parents: BTreeMap<&str, &str> = BTreeMap::new();
        for entity in &self.pending {
            if let Some(parent) = &entity.parent {
                parents.insert(entity.name.as_str(), parent.as_str());
            }
        }
        let root = |name: &str| {
            let mut current = name.to_string();
            while let Some(parent) = parents.get(current.as_str()) {
                current = parent.to_string();
            }
            current
        };

        let mut keys = BTreeMap::new();
        for entity in &self.pending {
            if entity.parent.is_none() {
                continue;
            }
            let root_name = root(&entity.name);
            let declared = self
                .pending
                .iter()
                .find(|e| e.name == root_name)
                .and_then(|e| e.schema.get_discriminator_key())
                .or_else(|| entity.schema.get_discriminator_key())
                .unwrap_or(DEFAULT_DISCRIMINATOR_KEY);
            keys.entry(root_name).or_insert_with(|| declared.to_string());
        }
        keys
    }
}

fn root_name(name: &str, built: &BTreeMap<String, EntityDescriptor>, parent: Option<&str>) -> String {
    let mut current = match parent {
        Some(parent) => parent.to_string(),
        None => return name.to_string(),
    };
    while let Some(next) = built.get(&current).and_then(|d| d.parent.clone()) {
        current = next;
    }
    current
}

fn check_columns(entity: &str, schema: &Schema) -> Result<()> {
    let mut columns = HashSet::new();
    for field in schema.column_fields() {
        if !columns.insert(field.column_name()) {
            return Err(OrmError::usage(format!(
                "Field '{}' of '{}' maps to a column used by another field",
                field.name(),
                entity
            )));
        }
    }
    for composite in schema.composites() {
        for name in &composite.fields {
            match schema.get(name) {
                Some(field) if field.has_column() => {}
                _ => {
                    return Err(OrmError::UnknownField {
                        entity: entity.to_string(),
                        field: name.clone(),
                    });
                }
            }
        }
    }
    Ok(())
}

impl Registry {
    fn check_relations(&self) -> Result<()> {
        for descriptor in self.entities() {
            for field in descriptor.own_schema.fields() {
                if field.ref_target().is_some() {
                    self.relation(descriptor, field.name())?;
                }
            }
        }
        Ok(())
    }
}
