use std::sync::Arc;

use async_trait::async_trait;
use futures::future::try_join_all;

use crate::core::Result;
use crate::document::Document;
use crate::registry::{EntityDescriptor, Registry, Relation};
use crate::schema::FieldKind;
use crate::session::Session;

use super::{Adaptor, Assignment, load_by_back_ref};

struct EmbeddedField {
    field: String,
    target: Arc<EntityDescriptor>,
    back_ref: String,
}

impl EmbeddedField {
    fn held_by(&self, document: &Document) -> bool {
        matches!(
            document.schema().get(&self.field).map(|field| field.kind()),
            Some(FieldKind::Many { target, embedded: true }) if target == self.target.name()
        )
    }
}

/// Loads embedded collections of the queried entity and of every
/// descendant it may materialize as.
pub struct NestedAdaptor {
    fields: Vec<EmbeddedField>,
}

impl NestedAdaptor {
    /// `None` when no entity in the hierarchy below `descriptor` embeds anything.
    pub fn new(registry: &Registry, descriptor: &Arc<EntityDescriptor>) -> Result<Option<Self>> {
        let mut owners = vec![descriptor.clone()];
        owners.extend(registry.descendants(descriptor));

        let mut fields: Vec<EmbeddedField> = Vec::new();
        for owner in &owners {
            for field in owner.schema().fields().filter(|field| field.is_nested()) {
                if let Relation::Embedded { target, back_ref } = registry.relation(owner, field.name())? {
                    let known = fields
                        .iter()
                        .any(|f| f.field == field.name() && f.target.name() == target.name());
                    if !known {
                        fields.push(EmbeddedField {
                            field: field.name().to_string(),
                            target,
                            back_ref,
                        });
                    }
                }
            }
        }

        Ok(if fields.is_empty() { None } else { Some(Self { fields }) })
    }
}

#[async_trait]
impl Adaptor for NestedAdaptor {
    fn name(&self) -> &str {
        "nested"
    }

    fn needs_round_trip(&self) -> bool {
        true
    }

    async fn fetch(&self, session: &Session, documents: &[Document]) -> Result<Vec<Assignment>> {
        let loads = self.fields.iter().map(|embedded| async move {
            let owners: Vec<(usize, i64)> = documents
                .iter()
                .enumerate()
                .filter(|(_, document)| embedded.held_by(document))
                .filter_map(|(index, document)| document.id().map(|id| (index, id)))
                .collect();
            load_by_back_ref(session, &embedded.target, &embedded.back_ref, &embedded.field, &owners).await
        });
        let batches = try_join_all(loads).await?;
        Ok(batches.into_iter().flatten().collect())
    }
}
