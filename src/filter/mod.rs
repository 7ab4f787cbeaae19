//! Translation of `$`-operator filter documents into SQL conditions.
//!
//! A filter is a JSON object mapping field names to either a plain value
//! (equality), an array (membership), `null` (IS NULL) or an object of
//! operators such as `{"$gte": 3, "$lt": 10}`. A top-level `$or` holds an
//! array of such filters.

pub mod operators;

use lazy_static::lazy_static;
use serde_json::Value as JsonValue;
use tracing::trace;

use crate::core::{OrmError, Result, Value};
use crate::sql::{ColumnRef, CompareOp, Condition};
use crate::types::FieldType;

use operators::{ComparisonOperator, ExistsOperator, InOperator, LikeOperator};

/// Maps a field name to the column it is read from and its type.
pub trait ColumnResolver {
    fn resolve(&self, field: &str) -> Result<(ColumnRef, Option<FieldType>)>;
}

/// Handler for one `$` operator.
pub trait FilterOperator: Send + Sync {
    fn name(&self) -> &'static str;

    fn build(&self, column: ColumnRef, operand: &JsonValue, field_type: Option<&FieldType>) -> Result<Condition>;
}

pub struct OperatorRegistry {
    operators: Vec<Box<dyn FilterOperator>>,
}

impl OperatorRegistry {
    pub fn new() -> Self {
        Self { operators: Vec::new() }
    }

    pub fn register(&mut self, operator: Box<dyn FilterOperator>) {
        trace!(operator = operator.name(), "registered filter operator");
        self.operators.push(operator);
    }

    pub fn with_default_operators() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(ComparisonOperator::new("$eq", CompareOp::Eq)));
        registry.register(Box::new(ComparisonOperator::new("$ne", CompareOp::Ne)));
        registry.register(Box::new(ComparisonOperator::new("$gt", CompareOp::Gt)));
        registry.register(Box::new(ComparisonOperator::new("$gte", CompareOp::Gte)));
        registry.register(Box::new(ComparisonOperator::new("$lt", CompareOp::Lt)));
        registry.register(Box::new(ComparisonOperator::new("$lte", CompareOp::Lte)));
        registry.register(Box::new(InOperator::new(false)));
        registry.register(Box::new(InOperator::new(true)));
        registry.register(Box::new(ExistsOperator));
        registry.register(Box::new(LikeOperator));
        registry
    }

    pub fn find(&self, name: &str) -> Option<&dyn FilterOperator> {
        self.operators
            .iter()
            .find(|operator| operator.name() == name)
            .map(|boxed| &**boxed)
    }

    fn operator(&self, name: &str) -> Result<&dyn FilterOperator> {
        self.find(name)
            .ok_or_else(|| OrmError::usage(format!("Unknown filter operator '{}'", name)))
    }

    /// Conditions for a filter document; `null` or `{}` yields none.
    pub fn translate(&self, filter: &JsonValue, resolver: &dyn ColumnResolver) -> Result<Vec<Condition>> {
        let object = match filter {
            JsonValue::Null => return Ok(Vec::new()),
            JsonValue::Object(object) => object,
            other => return Err(OrmError::usage(format!("Filter must be an object, got {}", other))),
        };

        let mut conditions = Vec::new();
        for (key, operand) in object {
            if key == "$or" {
                let groups = operand
                    .as_array()
                    .ok_or_else(|| OrmError::usage("$or expects an array of filters"))?;
                let alternatives = groups
                    .iter()
                    .map(|group| self.translate(group, resolver).map(Condition::all))
                    .collect::<Result<Vec<_>>>()?;
                conditions.push(Condition::any(alternatives));
                continue;
            }
            if key.starts_with('$') {
                return Err(OrmError::usage(format!("Unknown filter operator '{}'", key)));
            }

            let (column, field_type) = resolver.resolve(key)?;
            let field_type = field_type.as_ref();
            match operand {
                JsonValue::Object(ops) if !ops.is_empty() && ops.keys().all(|k| k.starts_with('$')) => {
                    for (op, value) in ops {
                        conditions.push(self.operator(op)?.build(column.clone(), value, field_type)?);
                    }
                }
                JsonValue::Array(_) => {
                    conditions.push(self.operator("$in")?.build(column, operand, field_type)?);
                }
                _ => {
                    conditions.push(self.operator("$eq")?.build(column, operand, field_type)?);
                }
            }
        }
        Ok(conditions)
    }
}

impl Default for OperatorRegistry {
    fn default() -> Self {
        Self::with_default_operators()
    }
}

lazy_static! {
    static ref DEFAULT_OPERATORS: OperatorRegistry = OperatorRegistry::with_default_operators();
}

/// Translates `filter` with the built-in operators.
pub fn translate(filter: &JsonValue, resolver: &dyn ColumnResolver) -> Result<Vec<Condition>> {
    DEFAULT_OPERATORS.translate(filter, resolver)
}

/// Casts a filter operand through the field's type, or infers a value when
/// the column is untyped.
pub(crate) fn cast_operand(operand: &JsonValue, field_type: Option<&FieldType>) -> Result<Value> {
    let cast = match field_type {
        Some(field_type) => field_type.cast(operand),
        None => match operand {
            JsonValue::Bool(b) => Some(Value::Boolean(*b)),
            JsonValue::Number(n) => n.as_i64().map(Value::Integer).or_else(|| n.as_f64().map(Value::Float)),
            JsonValue::String(s) => Some(Value::Text(s.clone())),
            _ => None,
        },
    };
    cast.ok_or_else(|| OrmError::usage(format!("Cannot use {} as a filter value", operand)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Widgets;

    impl ColumnResolver for Widgets {
        fn resolve(&self, field: &str) -> Result<(ColumnRef, Option<FieldType>)> {
            match field {
                "id" => Ok((ColumnRef::new("widget", "id"), Some(FieldType::Id))),
                "height" => Ok((ColumnRef::new("widget", "height"), Some(FieldType::Integer))),
                "name" => Ok((ColumnRef::new("widget", "name"), Some(FieldType::string()))),
                _ => Err(OrmError::UnknownField {
                    entity: "Widget".into(),
                    field: field.into(),
                }),
            }
        }
    }

    fn col(name: &str) -> ColumnRef {
        ColumnRef::new("widget", name)
    }

    #[test]
    fn test_plain_values() {
        let conditions = translate(&json!({"height": "5", "name": null}), &Widgets).unwrap();
        assert_eq!(
            conditions,
            vec![
                Condition::eq(col("height"), 5),
                Condition::is_null(col("name")),
            ]
        );
    }

    #[test]
    fn test_operator_object() {
        let conditions = translate(&json!({"height": {"$gte": 2, "$lt": 9}}), &Widgets).unwrap();
        assert_eq!(
            conditions,
            vec![
                Condition::compare(col("height"), CompareOp::Gte, 2),
                Condition::compare(col("height"), CompareOp::Lt, 9),
            ]
        );
    }

    #[test]
    fn test_membership_and_existence() {
        let conditions = translate(
            &json!({"id": [1, 2], "name": {"$exists": true, "$ne": null}, "height": {"$nin": []}}),
            &Widgets,
        )
        .unwrap();
        assert_eq!(
            conditions,
            vec![
                Condition::In {
                    column: col("height"),
                    values: vec![],
                    negated: true,
                },
                Condition::is_in(col("id"), vec![Value::Integer(1), Value::Integer(2)]),
                Condition::not_null(col("name")),
                Condition::not_null(col("name")),
            ]
        );
    }

    #[test]
    fn test_or_groups() {
        let conditions = translate(
            &json!({"$or": [{"height": 1}, {"name": {"$like": "wid%"}, "height": 3}]}),
            &Widgets,
        )
        .unwrap();
        assert_eq!(
            conditions,
            vec![Condition::Or(vec![
                Condition::eq(col("height"), 1),
                Condition::And(vec![
                    Condition::eq(col("height"), 3),
                    Condition::Like {
                        column: col("name"),
                        pattern: "wid%".into(),
                    },
                ]),
            ])]
        );
    }

    #[test]
    fn test_errors() {
        assert!(matches!(
            translate(&json!({"height": {"$near": 1}}), &Widgets),
            Err(OrmError::Usage(_))
        ));
        assert!(matches!(
            translate(&json!({"weight": 1}), &Widgets),
            Err(OrmError::UnknownField { .. })
        ));
        assert!(matches!(
            translate(&json!({"height": "tall"}), &Widgets),
            Err(OrmError::Usage(_))
        ));
        assert!(matches!(translate(&json!([1]), &Widgets), Err(OrmError::Usage(_))));
        assert!(translate(&JsonValue::Null, &Widgets).unwrap().is_empty());
    }
}
