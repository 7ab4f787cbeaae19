use serde_json::Value as JsonValue;

use crate::core::{OrmError, Result, Value};
use crate::sql::{ColumnRef, CompareOp, Condition};
use crate::types::FieldType;

use super::{FilterOperator, cast_operand};

/// `$eq`, `$ne`, `$gt`, `$gte`, `$lt`, `$lte`.
pub struct ComparisonOperator {
    name: &'static str,
    op: CompareOp,
}

impl ComparisonOperator {
    pub fn new(name: &'static str, op: CompareOp) -> Self {
        Self { name, op }
    }
}

impl FilterOperator for ComparisonOperator {
    fn name(&self) -> &'static str {
        self.name
    }

    fn build(&self, column: ColumnRef, operand: &JsonValue, field_type: Option<&FieldType>) -> Result<Condition> {
        if operand.is_null() {
            return match self.op {
                CompareOp::Eq => Ok(Condition::is_null(column)),
                CompareOp::Ne => Ok(Condition::not_null(column)),
                _ => Err(OrmError::usage(format!("{} does not accept null", self.name))),
            };
        }
        Ok(Condition::compare(column, self.op, cast_operand(operand, field_type)?))
    }
}

/// `$in` and `$nin`.
pub struct InOperator {
    negated: bool,
}

impl InOperator {
    pub fn new(negated: bool) -> Self {
        Self { negated }
    }
}

impl FilterOperator for InOperator {
    fn name(&self) -> &'static str {
        if self.negated { "$nin" } else { "$in" }
    }

    fn build(&self, column: ColumnRef, operand: &JsonValue, field_type: Option<&FieldType>) -> Result<Condition> {
        let items = operand
            .as_array()
            .ok_or_else(|| OrmError::usage(format!("{} expects an array", self.name())))?;
        let values = items
            .iter()
            .map(|item| cast_operand(item, field_type))
            .collect::<Result<Vec<Value>>>()?;
        Ok(Condition::In {
            column,
            values,
            negated: self.negated,
        })
    }
}

/// `$exists: bool`.
pub struct ExistsOperator;

impl FilterOperator for ExistsOperator {
    fn name(&self) -> &'static str {
        "$exists"
    }

    fn build(&self, column: ColumnRef, operand: &JsonValue, _field_type: Option<&FieldType>) -> Result<Condition> {
        match operand.as_bool() {
            Some(true) => Ok(Condition::not_null(column)),
            Some(false) => Ok(Condition::is_null(column)),
            None => Err(OrmError::usage("$exists expects a boolean")),
        }
    }
}

/// `$like` with a SQL `LIKE` pattern.
pub struct LikeOperator;

impl FilterOperator for LikeOperator {
    fn name(&self) -> &'static str {
        "$like"
    }

    fn build(&self, column: ColumnRef, operand: &JsonValue, _field_type: Option<&FieldType>) -> Result<Condition> {
        let pattern = operand
            .as_str()
            .ok_or_else(|| OrmError::usage("$like expects a string pattern"))?;
        Ok(Condition::Like {
            column,
            pattern: pattern.to_string(),
        })
    }
}
