use std::collections::HashSet;
use std::sync::Arc;

use tracing::{Instrument, Level, event, info_span};

use crate::core::naming::quote_ident;
use crate::core::{OrmError, Result};
use crate::registry::{EntityDescriptor, Registry, Relation};
use crate::schema::FieldKind;
use crate::session::Session;

use super::catalog::Catalog;
use super::constraint::{Constraint, OnDelete};
use super::ReconcileReport;

/// Physical layout of one table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSpec {
    pub name: String,
    /// `(column, definition)`, `id` first.
    pub columns: Vec<(String, String)>,
}

impl TableSpec {
    fn create_ddl(&self) -> String {
        let columns = self
            .columns
            .iter()
            .map(|(name, definition)| format!("{} {}", quote_ident(name), definition))
            .collect::<Vec<_>>()
            .join(", ");
        format!("CREATE TABLE {} ({})", quote_ident(&self.name), columns)
    }
}

/// Everything the registry implies, independent of the live database.
#[derive(Debug, Clone, Default)]
pub struct SchemaPlan {
    pub tables: Vec<TableSpec>,
    pub constraints: Vec<Constraint>,
}

impl SchemaPlan {
    /// Fails on relations that cannot be laid out before touching the database.
    pub fn from_registry(registry: &Registry) -> Result<Self> {
        let mut plan = SchemaPlan::default();
        let mut junctions = HashSet::new();

        for descriptor in registry.entities() {
            plan.tables.push(entity_table(descriptor));
            plan.entity_constraints(registry, descriptor)?;

            for field in descriptor.own_schema().fields().filter(|f| f.is_multi() && !f.is_nested()) {
                if let Relation::ManyToMany {
                    junction,
                    owner_column,
                    target_column,
                    target,
                } = registry.relation(descriptor, field.name())?
                {
                    if !junctions.insert(junction.clone()) {
                        continue;
                    }
                    let mut sides = [
                        (owner_column, descriptor.table_name().to_string()),
                        (target_column, target.table_name().to_string()),
                    ];
                    sides.sort();
                    plan.tables.push(TableSpec {
                        name: junction.clone(),
                        columns: sides
                            .iter()
                            .map(|(column, _)| (column.clone(), "integer".to_string()))
                            .collect(),
                    });
                    plan.push(Constraint::primary_key(&junction, &[sides[0].0.as_str(), sides[1].0.as_str()]));
                    for (column, table) in &sides {
                        plan.push(Constraint::foreign_key(&junction, &[column.as_str()], table, &["id"], OnDelete::Cascade));
                    }
                }
            }
        }

        plan.constraints.sort_by_key(Constraint::rank);
        Ok(plan)
    }

    fn entity_constraints(&mut self, registry: &Registry, descriptor: &Arc<EntityDescriptor>) -> Result<()> {
        let table = descriptor.table_name();
        self.push(Constraint::primary_key(table, &["id"]));

        for field in descriptor.own_schema().column_fields() {
            let column = field.column_name();
            if let FieldKind::Ref { .. } = field.kind() {
                let Relation::Single { target } = registry.relation(descriptor, field.name())? else {
                    return Err(OrmError::relation(descriptor.name(), field.name(), "expected a single reference"));
                };
                let on_delete = if field.is_cascade() || embeds(&target, descriptor) {
                    OnDelete::Cascade
                } else if field.is_required() {
                    OnDelete::NoAction
                } else {
                    OnDelete::SetNull
                };
                self.push(Constraint::foreign_key(table, &[column], target.table_name(), &["id"], on_delete));
            }
            let constraints = field.constraints();
            if constraints.unique {
                self.push(Constraint::unique(table, &[column]));
            } else if let Some(kind) = constraints.index {
                self.push(Constraint::index(table, &[column], kind));
            }
        }

        if let Some(discriminator) = descriptor.discriminator_column() {
            let keys = ["id", discriminator.as_str()];
            if descriptor.has_children() || descriptor.has_parent() {
                self.push(Constraint::unique(table, &keys));
            }
            if let Some(parent) = descriptor.parent() {
                let parent = registry.get(parent)?;
                self.push(Constraint::foreign_key(table, &keys, parent.table_name(), &keys, OnDelete::Cascade));
            }
        }

        for composite in descriptor.own_schema().composites() {
            let columns = composite
                .fields
                .iter()
                .map(|name| {
                    descriptor
                        .own_schema()
                        .get(name)
                        .map(|field| field.column_name())
                        .ok_or_else(|| OrmError::UnknownField {
                            entity: descriptor.name().to_string(),
                            field: name.clone(),
                        })
                })
                .collect::<Result<Vec<_>>>()?;
            if composite.unique {
                self.push(Constraint::unique(table, &columns));
            } else {
                self.push(Constraint::index(table, &columns, composite.kind));
            }
        }
        Ok(())
    }

    fn push(&mut self, constraint: Constraint) {
        let name = constraint.name();
        if !self.constraints.iter().any(|existing| existing.name() == name) {
            self.constraints.push(constraint);
        }
    }

    /// Statements that bring `catalog` in line with the plan.
    pub fn diff(&self, catalog: &Catalog) -> Vec<String> {
        let mut statements = Vec::new();
        for table in &self.tables {
            if !catalog.table_exists(&table.name) {
                statements.push(table.create_ddl());
                continue;
            }
            for (column, definition) in &table.columns {
                if !catalog.has_column(&table.name, column) {
                    statements.push(format!(
                        "ALTER TABLE {} ADD COLUMN {} {}",
                        quote_ident(&table.name),
                        quote_ident(column),
                        definition
                    ));
                }
            }
        }

        for constraint in &self.constraints {
            let name = constraint.name();
            let exists = if constraint.is_index() {
                catalog.has_index(&name)
            } else {
                catalog.has_constraint(&name)
            };
            if !exists {
                statements.push(constraint.to_ddl());
            }
        }

        for (table, name) in catalog.immediate_foreign_keys() {
            statements.push(format!(
                "ALTER TABLE {} ALTER CONSTRAINT {} DEFERRABLE INITIALLY DEFERRED",
                quote_ident(table),
                quote_ident(name)
            ));
        }
        statements
    }
}

/// `owner` embeds `descriptor` through one of its collections.
fn embeds(owner: &EntityDescriptor, descriptor: &EntityDescriptor) -> bool {
    owner.schema().fields().any(|field| {
        matches!(field.kind(), FieldKind::Many { target, embedded: true } if target == descriptor.name())
    })
}

fn entity_table(descriptor: &EntityDescriptor) -> TableSpec {
    let columns = descriptor
        .columns()
        .into_iter()
        .filter_map(|column| {
            let field = descriptor.own_schema().field_by_column(column)?;
            let definition = field.field_type()?.column_definition();
            Some((column.to_string(), definition))
        })
        .collect();
    TableSpec {
        name: descriptor.table_name().to_string(),
        columns,
    }
}

/// Creates missing tables, columns, constraints and indexes for every
/// registered entity. Existing objects are matched by name and left alone,
/// so running it against an up-to-date database issues no DDL.
pub struct Reconciler<'a> {
    session: &'a Session,
}

impl<'a> Reconciler<'a> {
    pub fn new(session: &'a Session) -> Self {
        Self { session }
    }

    pub async fn run(self) -> Result<ReconcileReport> {
        let span = info_span!("schema.sync");
        async move {
            let plan = SchemaPlan::from_registry(self.session.registry())?;
            let catalog = Catalog::load(self.session).await?;
            let statements = plan.diff(&catalog);

            if !statements.is_empty() {
                let pending = statements.clone();
                self.session
                    .with_transaction(|tx| async move {
                        for statement in &pending {
                            event!(Level::DEBUG, ddl = %statement, "applying");
                            tx.execute_raw(statement, &[]).await?;
                        }
                        Ok(())
                    })
                    .await?;
            }

            event!(
                Level::INFO,
                tables = plan.tables.len(),
                constraints = plan.constraints.len(),
                applied = statements.len(),
                "schema reconciled"
            );
            Ok(ReconcileReport { statements })
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Value;
    use crate::core::naming::MAX_IDENTIFIER_LEN;
    use crate::result::QueryResult;
    use crate::schema::{Field, IndexKind, Schema};

    fn registry() -> Arc<Registry> {
        Registry::builder()
            .model("Widget", Schema::new().field("height", Field::integer().index()))
            .discriminator("Widget", "Gadget", Schema::new().field("weight", Field::integer()))
            .model(
                "Point",
                Schema::new()
                    .field("line", Field::reference("Line"))
                    .field("x", Field::integer())
                    .field("y", Field::integer())
                    .unique_together(&["x", "y"]),
            )
            .model("Line", Schema::new().field("points", Field::embedded("Point")))
            .model("Student", Schema::new().field("courses", Field::many("Course")))
            .model(
                "Course",
                Schema::new()
                    .field("students", Field::many("Student"))
                    .field("code", Field::string().unique())
                    .field("room", Field::text().index_kind(IndexKind::Hash)),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn test_table_layout() {
        let plan = SchemaPlan::from_registry(&registry()).unwrap();
        let names: Vec<_> = plan.tables.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["widget", "gadget", "point", "line", "student", "course_student", "course"]);

        let widget = &plan.tables[0];
        assert_eq!(
            widget.create_ddl(),
            "CREATE TABLE \"widget\" (\"id\" serial, \"height\" integer, \"type\" varchar(63))"
        );
        let gadget = &plan.tables[1];
        assert_eq!(gadget.columns[0], ("id".to_string(), "integer".to_string()));
        let junction = &plan.tables[5];
        assert_eq!(
            junction.columns,
            vec![("course".to_string(), "integer".to_string()), ("student".to_string(), "integer".to_string())]
        );
    }

    #[test]
    fn test_constraint_set() {
        let plan = SchemaPlan::from_registry(&registry()).unwrap();
        let names: Vec<String> = plan.constraints.iter().map(Constraint::name).collect();
        for expected in [
            "widget_pkey",
            "widget_height_index",
            "widget_id_type_unique",
            "gadget_id_type_unique",
            "gadget_id_type_foreign",
            "point_line_foreign",
            "point_x_y_unique",
            "course_code_unique",
            "course_room_index",
            "course_student_pkey",
            "course_student_course_foreign",
            "course_student_student_foreign",
        ] {
            assert!(names.contains(&expected.to_string()), "missing {expected}");
        }
        // one junction even though both sides declare the relation
        assert_eq!(names.iter().filter(|n| n.as_str() == "course_student_pkey").count(), 1);

        let point_line = plan
            .constraints
            .iter()
            .find(|c| c.name() == "point_line_foreign")
            .unwrap();
        assert!(matches!(point_line, Constraint::ForeignKey { on_delete: OnDelete::Cascade, .. }));

        // keys before the foreign keys that reference them
        let first_foreign = plan.constraints.iter().position(|c| c.rank() == 3).unwrap();
        assert!(plan.constraints[..first_foreign].iter().all(|c| c.rank() < 3));
    }

    #[test]
    fn test_diff_against_empty_catalog_emits_everything() {
        let plan = SchemaPlan::from_registry(&registry()).unwrap();
        let empty = plan.diff(&Catalog::default());
        assert!(empty.iter().any(|s| s.starts_with("CREATE TABLE \"course_student\"")));
        assert_eq!(
            empty.len(),
            plan.tables.len() + plan.constraints.len()
        );
    }

    /// Name as the server keeps it: cut at the identifier limit.
    fn stored(name: &str) -> Value {
        Value::Text(name[..name.len().min(MAX_IDENTIFIER_LEN)].to_string())
    }

    fn single(column: &str, names: Vec<Value>) -> QueryResult {
        QueryResult::new(vec![column.into()], names.into_iter().map(|name| vec![name]).collect())
    }

    #[test]
    fn test_long_names_are_found_in_catalog_after_creation() {
        let registry = Registry::builder()
            .model(
                "ShippingAddressVerificationRecord",
                Schema::new()
                    .field("customerAccountReferenceCode", Field::reference("CustomerAccount").required())
                    .field("verificationProviderIdentifier", Field::string().unique())
                    .field("verificationRequestedTimestamp", Field::date().index()),
            )
            .model("CustomerAccount", Schema::new().field("records", Field::many("ShippingAddressVerificationRecord")))
            .model("ParcelLockerLocation", Schema::new().field("records", Field::many("ShippingAddressVerificationRecordArchive")))
            .model("ShippingAddressVerificationRecordArchive", Schema::new().field("note", Field::text()))
            .build()
            .unwrap();
        let plan = SchemaPlan::from_registry(&registry).unwrap();

        let names: Vec<String> = plan.constraints.iter().map(Constraint::name).collect();
        assert!(names.iter().all(|name| name.len() <= MAX_IDENTIFIER_LEN), "{names:?}");
        assert!(plan.tables.iter().all(|table| table.name.len() <= MAX_IDENTIFIER_LEN));

        let tables = single("table_name", plan.tables.iter().map(|t| stored(&t.name)).collect());
        let columns = QueryResult::new(
            vec!["table_name".into(), "column_name".into()],
            plan.tables
                .iter()
                .flat_map(|t| t.columns.iter().map(move |(column, _)| vec![stored(&t.name), stored(column)]))
                .collect(),
        );
        let constraints = single(
            "constraint_name",
            plan.constraints.iter().filter(|c| !c.is_index()).map(|c| stored(&c.name())).collect(),
        );
        let indexes = single(
            "index_name",
            plan.constraints.iter().filter(|c| c.is_index()).map(|c| stored(&c.name())).collect(),
        );
        let immediate = QueryResult::new(vec!["table_name".into(), "constraint_name".into()], Vec::new());
        let catalog = Catalog::from_results(&tables, &columns, &constraints, &indexes, &immediate);

        assert_eq!(plan.diff(&catalog), Vec::<String>::new());
    }
}
