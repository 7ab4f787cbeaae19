use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::core::naming::fit_identifier;
use crate::core::{OrmError, Result, Value};
use crate::document::{Document, DocumentList, FieldValue};
use crate::query::Query;
use crate::query::reify::decode_record;
use crate::registry::{EntityDescriptor, Registry, Relation};
use crate::result::Records;
use crate::session::Session;
use crate::sql::{ColumnRef, Condition, JoinKind, Select, Statement, TableRef};

use super::{Adaptor, Assignment, load_by_back_ref, owner_ids};

/// Resolves a reference field into related documents.
///
/// A single reference to a flat target is folded into the main statement as
/// a left join. Everything else is loaded after the main statement: single
/// references by id, one-to-many and embedded collections by back
/// reference, many-to-many collections through the junction table.
pub struct PopulateAdaptor {
    registry: Arc<Registry>,
    field: String,
    owner_table: String,
    column: String,
    relation: Relation,
    joined: bool,
    alias: String,
}

impl PopulateAdaptor {
    pub fn new(registry: &Arc<Registry>, descriptor: &Arc<EntityDescriptor>, field: &str) -> Result<Self> {
        Self::build(registry, descriptor, field, true)
    }

    /// Never joins; used when populating documents that are already loaded.
    pub fn follow_up(registry: &Arc<Registry>, descriptor: &Arc<EntityDescriptor>, field: &str) -> Result<Self> {
        Self::build(registry, descriptor, field, false)
    }

    fn build(
        registry: &Arc<Registry>,
        descriptor: &Arc<EntityDescriptor>,
        field: &str,
        allow_join: bool,
    ) -> Result<Self> {
        let relation = registry.relation(descriptor, field)?;
        let owner = registry
            .owner_of(descriptor, field)
            .unwrap_or_else(|| descriptor.clone());
        let column = descriptor
            .field(field)
            .map(|f| f.column_name().to_string())
            .ok_or_else(|| OrmError::UnknownField {
                entity: descriptor.name().to_string(),
                field: field.to_string(),
            })?;
        let joined = allow_join && matches!(&relation, Relation::Single { target } if registry.is_flat(target));
        let alias = fit_identifier(&format!("{}__{}", relation.target().table_name(), column));
        Ok(Self {
            registry: registry.clone(),
            field: field.to_string(),
            owner_table: owner.table_name().to_string(),
            column,
            relation,
            joined,
            alias,
        })
    }

    pub fn is_joined(&self) -> bool {
        self.joined
    }

    async fn fetch_single(
        &self,
        session: &Session,
        target: &Arc<EntityDescriptor>,
        documents: &[Document],
    ) -> Result<Vec<Assignment>> {
        let refs: Vec<(usize, i64)> = documents
            .iter()
            .enumerate()
            .filter_map(|(index, document)| {
                document
                    .get(&self.field)
                    .and_then(FieldValue::ref_id)
                    .map(|id| (index, id))
            })
            .collect();
        if refs.is_empty() {
            return Ok(Vec::new());
        }
        let mut ids: Vec<i64> = refs.iter().map(|(_, id)| *id).collect();
        ids.sort_unstable();
        ids.dedup();

        let related = Query::new(session, target.clone())?
            .where_in("id", ids.into_iter().map(Value::Integer).collect())?
            .execute()
            .await?;
        let by_id: HashMap<i64, Document> = related
            .into_iter()
            .filter_map(|document| document.id().map(|id| (id, document)))
            .collect();

        Ok(refs
            .into_iter()
            .filter_map(|(index, id)| {
                by_id.get(&id).map(|document| Assignment {
                    index,
                    field: self.field.clone(),
                    value: FieldValue::Document(Box::new(document.clone())),
                })
            })
            .collect())
    }

    async fn fetch_linked(
        &self,
        session: &Session,
        target: &Arc<EntityDescriptor>,
        junction: &str,
        owner_column: &str,
        target_column: &str,
        documents: &[Document],
    ) -> Result<Vec<Assignment>> {
        let owners: Vec<(usize, i64)> = documents
            .iter()
            .enumerate()
            .filter_map(|(index, document)| document.id().map(|id| (index, id)))
            .collect();
        if owners.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<Value> = owner_ids(documents).into_iter().map(Value::Integer).collect();
        let owner_ref = ColumnRef::new(junction, owner_column);
        let target_ref = ColumnRef::new(junction, target_column);

        let mut links = Select::from(TableRef::new(junction));
        links
            .column(owner_ref.clone())
            .column(target_ref.clone())
            .filter(Condition::is_in(owner_ref.clone(), ids.clone()));
        let links = Statement::Select(links);

        let mut candidates = Select::from(TableRef::new(junction));
        candidates
            .column(target_ref)
            .filter(Condition::is_in(owner_ref, ids));
        let related = Query::new(session, target.clone())?.where_condition(Condition::InSelect {
            column: ColumnRef::new(target.table_name(), "id"),
            select: Box::new(candidates),
            negated: false,
        });

        let (links, related) = futures::try_join!(session.fetch(&links), related.execute())?;
        let by_id: HashMap<i64, Document> = related
            .into_iter()
            .filter_map(|document| document.id().map(|id| (id, document)))
            .collect();

        let mut grouped: HashMap<i64, Vec<Document>> = HashMap::new();
        for row in &links.rows {
            let (Some(owner), Some(linked)) = (
                row.first().and_then(Value::as_i64),
                row.get(1).and_then(Value::as_i64),
            ) else {
                continue;
            };
            let Some(document) = by_id.get(&linked) else {
                continue;
            };
            let group = grouped.entry(owner).or_default();
            if !group.iter().any(|d| d.id() == Some(linked)) {
                group.push(document.clone());
            }
        }

        Ok(owners
            .into_iter()
            .map(|(index, id)| Assignment {
                index,
                field: self.field.clone(),
                value: FieldValue::List(DocumentList::from_documents(
                    self.registry.clone(),
                    target.clone(),
                    grouped.remove(&id).unwrap_or_default(),
                )),
            })
            .collect())
    }
}

#[async_trait]
impl Adaptor for PopulateAdaptor {
    fn name(&self) -> &str {
        "populate"
    }

    fn prepare(&self, select: &mut Select) {
        if !self.joined {
            return;
        }
        let target = self.relation.target();
        select.join(
            JoinKind::Left,
            TableRef::aliased(target.table_name(), &self.alias),
            Condition::ColumnsEqual(
                ColumnRef::new(&self.alias, "id"),
                ColumnRef::new(&self.owner_table, &self.column),
            ),
        );
        for column in target.columns() {
            select.aliased_column(ColumnRef::new(&self.alias, column));
        }
    }

    fn merge(&self, records: &Records, document: &mut Document) -> Result<()> {
        if !self.joined {
            return Ok(());
        }
        let Some(record) = records.get(&self.alias) else {
            return Ok(());
        };
        if record.get("id").is_none_or(Value::is_null) {
            return Ok(());
        }
        let target = self.relation.target();
        let related = Document::hydrate(self.registry.clone(), target.clone(), decode_record(target, record));
        document
            .data
            .insert(self.field.clone(), FieldValue::Document(Box::new(related)));
        Ok(())
    }

    fn needs_round_trip(&self) -> bool {
        !self.joined
    }

    async fn fetch(&self, session: &Session, documents: &[Document]) -> Result<Vec<Assignment>> {
        match &self.relation {
            Relation::Single { target } => self.fetch_single(session, target, documents).await,
            Relation::Embedded { target, back_ref } | Relation::OneToMany { target, back_ref } => {
                let owners: Vec<(usize, i64)> = documents
                    .iter()
                    .enumerate()
                    .filter_map(|(index, document)| document.id().map(|id| (index, id)))
                    .collect();
                load_by_back_ref(session, target, back_ref, &self.field, &owners).await
            }
            Relation::ManyToMany {
                target,
                junction,
                owner_column,
                target_column,
            } => {
                self.fetch_linked(session, target, junction, owner_column, target_column, documents)
                    .await
            }
        }
    }
}
