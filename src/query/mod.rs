//! Query builder.
//!
//! A [`Query`] is bound to one entity. On construction it attaches the
//! adaptors its shape needs: ancestors are joined, descendants left-joined
//! and resolved through the discriminator, embedded collections loaded
//! after the main statement. Filters, sorting, paging and projections are
//! chained onto it; [`Query::execute`] runs it once.

pub mod adaptors;
pub(crate) mod reify;

use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;

use futures::future::{BoxFuture, try_join_all};
use serde_json::Value as JsonValue;
use tracing::{Level, event};

use crate::core::{OrmError, Result, Value};
use crate::document::Document;
use crate::filter::{self, ColumnResolver};
use crate::registry::{EntityDescriptor, Registry};
use crate::session::Session;
use crate::sql::{ColumnRef, Condition, OrderBy, Select, Statement, TableRef};
use crate::types::FieldType;

use adaptors::{Adaptor, ChildrenAdaptor, NestedAdaptor, ParentAdaptor, PopulateAdaptor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl From<i64> for Direction {
    /// Negative numbers sort descending.
    fn from(value: i64) -> Self {
        if value < 0 { Self::Desc } else { Self::Asc }
    }
}

impl FromStr for Direction {
    type Err = OrmError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" | "ascending" | "1" => Ok(Self::Asc),
            "desc" | "descending" | "-1" => Ok(Self::Desc),
            other => Err(OrmError::usage(format!("Invalid sort direction '{}'", other))),
        }
    }
}

/// Resolves field names against an entity, its ancestors and its descendants.
pub(crate) struct FieldResolver<'r> {
    registry: &'r Registry,
    descriptor: &'r Arc<EntityDescriptor>,
}

impl<'r> FieldResolver<'r> {
    pub(crate) fn new(registry: &'r Registry, descriptor: &'r Arc<EntityDescriptor>) -> Self {
        Self { registry, descriptor }
    }
}

impl ColumnResolver for FieldResolver<'_> {
    fn resolve(&self, field: &str) -> Result<(ColumnRef, Option<FieldType>)> {
        let owner = self
            .registry
            .owner_of(self.descriptor, field)
            .or_else(|| {
                self.registry
                    .descendants(self.descriptor)
                    .into_iter()
                    .find(|child| child.own_schema().has(field))
            })
            .ok_or_else(|| OrmError::UnknownField {
                entity: self.descriptor.name().to_string(),
                field: field.to_string(),
            })?;
        let definition = owner.own_schema().get(field).ok_or_else(|| OrmError::UnknownField {
            entity: owner.name().to_string(),
            field: field.to_string(),
        })?;
        if !definition.has_column() {
            return Err(OrmError::usage(format!(
                "Field '{}' of '{}' is a collection and cannot be filtered or sorted on",
                field,
                owner.name()
            )));
        }
        Ok((
            ColumnRef::new(owner.table_name(), definition.column_name()),
            definition.field_type(),
        ))
    }
}

pub struct Query<'a> {
    session: &'a Session,
    descriptor: Arc<EntityDescriptor>,
    conditions: Vec<Condition>,
    adaptors: Vec<Box<dyn Adaptor>>,
    populated: HashSet<String>,
    projection: Option<Vec<ColumnRef>>,
    order_by: Vec<OrderBy>,
    skip: Option<u64>,
    limit: Option<u64>,
}

impl std::fmt::Debug for Query<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("skip", &self.skip)
            .field("limit", &self.limit)
            .finish_non_exhaustive()
    }
}

impl<'a> Query<'a> {
    pub fn new(session: &'a Session, descriptor: Arc<EntityDescriptor>) -> Result<Self> {
        let registry = session.registry().clone();
        let mut adaptors: Vec<Box<dyn Adaptor>> = Vec::new();
        if descriptor.has_parent() {
            adaptors.push(Box::new(ParentAdaptor::new(&registry, &descriptor)));
        }
        if descriptor.has_children() {
            adaptors.push(Box::new(ChildrenAdaptor::new(&registry, &descriptor)));
        }
        if let Some(nested) = NestedAdaptor::new(&registry, &descriptor)? {
            adaptors.push(Box::new(nested));
        }

        let auto: Vec<String> = descriptor
            .schema()
            .fields()
            .filter(|field| field.is_auto_populate())
            .map(|field| field.name().to_string())
            .collect();

        let mut query = Self {
            session,
            descriptor,
            conditions: Vec::new(),
            adaptors,
            populated: HashSet::new(),
            projection: None,
            order_by: Vec::new(),
            skip: None,
            limit: None,
        };
        for field in auto {
            query = query.populate(&field)?;
        }
        Ok(query)
    }

    pub fn descriptor(&self) -> &Arc<EntityDescriptor> {
        &self.descriptor
    }

    fn resolver(&self) -> FieldResolver<'_> {
        FieldResolver::new(self.session.registry(), &self.descriptor)
    }

    /// Adds the conditions of a `$`-operator filter document.
    pub fn filter(mut self, filter: &JsonValue) -> Result<Self> {
        let conditions = filter::translate(filter, &self.resolver())?;
        self.conditions.extend(conditions);
        Ok(self)
    }

    /// Adds a condition built by `predicate`, which resolves field names to columns.
    pub fn where_fn<F>(mut self, predicate: F) -> Result<Self>
    where
        F: FnOnce(&dyn ColumnResolver) -> Result<Condition>,
    {
        let condition = predicate(&self.resolver())?;
        self.conditions.push(condition);
        Ok(self)
    }

    pub(crate) fn where_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub(crate) fn where_in(self, field: &str, values: Vec<Value>) -> Result<Self> {
        let (column, _) = self.resolver().resolve(field)?;
        Ok(self.where_condition(Condition::is_in(column, values)))
    }

    /// Loads the related documents of `field` with the results. Requesting
    /// the same field twice has no further effect.
    pub fn populate(mut self, field: &str) -> Result<Self> {
        if self.populated.contains(field) {
            return Ok(self);
        }
        let registry = self.session.registry().clone();
        let definition = self.descriptor.field(field).ok_or_else(|| OrmError::UnknownField {
            entity: self.descriptor.name().to_string(),
            field: field.to_string(),
        })?;
        // embedded collections are always loaded
        if !definition.is_nested() {
            let adaptor = PopulateAdaptor::new(&registry, &self.descriptor, field)?;
            self.adaptors.push(Box::new(adaptor));
        } else {
            registry.relation(&self.descriptor, field)?;
        }
        self.populated.insert(field.to_string());
        Ok(self)
    }

    /// Sorts by `key`; a leading `-` sorts descending.
    pub fn sort(self, key: &str) -> Result<Self> {
        match key.strip_prefix('-') {
            Some(field) => self.sort_by(field, Direction::Desc),
            None => self.sort_by(key.trim_start_matches('+'), Direction::Asc),
        }
    }

    pub fn sort_by(mut self, field: &str, direction: impl Into<Direction>) -> Result<Self> {
        let (column, _) = self.resolver().resolve(field)?;
        self.order_by.push(OrderBy {
            column,
            descending: direction.into() == Direction::Desc,
        });
        Ok(self)
    }

    pub fn skip(mut self, count: u64) -> Self {
        self.skip = Some(count);
        self
    }

    pub fn limit(mut self, count: u64) -> Self {
        self.limit = Some(count);
        self
    }

    /// Restricts the loaded columns to `fields`; ids and discriminators are always loaded.
    pub fn columns(mut self, fields: &[&str]) -> Result<Self> {
        let resolver = self.resolver();
        let columns = fields
            .iter()
            .map(|field| resolver.resolve(field).map(|(column, _)| column))
            .collect::<Result<Vec<_>>>()?;
        self.projection = Some(columns);
        Ok(self)
    }

    fn hierarchy_tables(&self) -> HashSet<String> {
        let registry = self.session.registry();
        registry
            .lineage(&self.descriptor)
            .into_iter()
            .chain(registry.descendants(&self.descriptor))
            .map(|d| d.table_name().to_string())
            .collect()
    }

    /// The SELECT this query runs.
    pub(crate) fn finalize(&self) -> Select {
        let table = self.descriptor.table_name();
        let mut select = Select::from(TableRef::new(table));
        for column in self.descriptor.columns() {
            select.aliased_column(ColumnRef::new(table, column));
        }
        for adaptor in &self.adaptors {
            adaptor.prepare(&mut select);
        }

        if let Some(projection) = &self.projection {
            let hierarchy = self.hierarchy_tables();
            let discriminator = self.descriptor.discriminator_column();
            select.projection.retain(|item| {
                !hierarchy.contains(&item.column.source)
                    || item.column.column == "id"
                    || Some(&item.column.column) == discriminator.as_ref()
                    || projection.contains(&item.column)
            });
        }

        select.selection = self.conditions.clone();
        select.order_by = if self.order_by.is_empty() {
            vec![OrderBy {
                column: ColumnRef::new(table, "id"),
                descending: false,
            }]
        } else {
            self.order_by.clone()
        };
        select.limit = self.limit;
        select.offset = self.skip;
        select
    }

    /// Statement selecting only the ids of matching rows.
    pub(crate) fn id_select(&self) -> Select {
        let table = self.descriptor.table_name();
        let mut select = self.finalize();
        select.projection.clear();
        select.column(ColumnRef::new(table, "id"));
        select.order_by.clear();
        select
    }

    /// SQL text and parameters of the main statement.
    pub fn to_sql(&self) -> (String, Vec<Value>) {
        Statement::Select(self.finalize()).to_sql()
    }

    /// Runs the query and reassembles the matching documents.
    pub fn execute(self) -> BoxFuture<'a, Result<Vec<Document>>> {
        Box::pin(async move {
            let registry = self.session.registry().clone();
            let select = self.finalize();
            let sources = select.sources();
            let result = self.session.fetch(&Statement::Select(select)).await?;
            let mut documents = result
                .records(&sources)
                .iter()
                .map(|records| reify::to_document(&registry, &self.descriptor, &self.adaptors, records))
                .collect::<Result<Vec<_>>>()?;

            let fetches = self
                .adaptors
                .iter()
                .filter(|adaptor| adaptor.needs_round_trip())
                .map(|adaptor| adaptor.fetch(self.session, &documents));
            let batches = try_join_all(fetches).await?;
            for assignment in batches.into_iter().flatten() {
                if let Some(document) = documents.get_mut(assignment.index) {
                    document.data.insert(assignment.field, assignment.value);
                }
            }
            for document in &mut documents {
                document.snapshot();
            }

            event!(
                Level::DEBUG,
                entity = %self.descriptor.name(),
                rows = documents.len(),
                "query executed"
            );
            Ok(documents)
        })
    }

    /// First matching document.
    pub async fn one(mut self) -> Result<Option<Document>> {
        self.limit = Some(1);
        Ok(self.execute().await?.into_iter().next())
    }

    /// Number of matching rows.
    pub async fn count(self) -> Result<u64> {
        let mut select = self.finalize();
        select.count = true;
        select.projection.clear();
        let result = self.session.fetch(&Statement::Select(select)).await?;
        let count = result.scalar().and_then(Value::as_i64).unwrap_or(0);
        Ok(u64::try_from(count).unwrap_or(0))
    }
}
