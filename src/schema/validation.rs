use std::collections::HashMap;

use crate::core::naming::template;
use crate::core::{ValidationDetail, Value};
use crate::document::{Document, FieldValue};
use crate::registry::Relation;

use super::{Field, FieldKind};

const DEFAULT_VALIDATOR_MESSAGE: &str = "Validation failed on {FIELD}: {VALUE}";

/// Appends every failed check of `document` to `details`.
///
/// Field paths are prefixed with `prefix`; `skip` names a field that is not
/// checked (the back-reference of an embedded item, stamped on save).
pub(crate) fn collect_errors(
    document: &Document,
    prefix: &str,
    skip: Option<&str>,
    details: &mut Vec<ValidationDetail>,
) {
    for field in document.schema().fields() {
        if skip == Some(field.name()) {
            continue;
        }
        let path = format!("{}{}", prefix, field.name());
        match document.get(field.name()) {
            None => {
                if field.is_required() {
                    details.push(ValidationDetail {
                        message: format!("Field {} is required", path),
                        field: path,
                        value: None,
                    });
                }
            }
            Some(FieldValue::Scalar(value)) => check_scalar(field, &path, value, details),
            Some(FieldValue::Document(related)) => {
                collect_errors(related, &format!("{}.", path), None, details);
            }
            Some(FieldValue::List(items)) => {
                if !field.is_nested() {
                    continue;
                }
                let back_ref = match document.registry().relation(document.descriptor(), field.name()) {
                    Ok(Relation::Embedded { back_ref, .. }) => Some(back_ref),
                    _ => None,
                };
                for (index, item) in items.iter().enumerate() {
                    collect_errors(item, &format!("{}.{}.", path, index), back_ref.as_deref(), details);
                }
            }
        }
    }
}

fn check_scalar(field: &Field, path: &str, value: &Value, details: &mut Vec<ValidationDetail>) {
    let valid = match field.kind() {
        FieldKind::Scalar(field_type) => field_type.is_valid(value),
        FieldKind::Ref { .. } => matches!(value, Value::Integer(id) if i32::try_from(*id).is_ok()),
        FieldKind::Many { .. } => true,
    };
    if !valid {
        details.push(failure(path, value, format!("Invalid value of field {}: {}", path, value)));
        return;
    }

    if let Some(choices) = field.choices() {
        let field_type = field.field_type();
        let allowed = choices.iter().any(|choice| match &field_type {
            Some(ty) => ty.is_equal(choice, value),
            None => choice == value,
        });
        if !allowed {
            let listed: Vec<String> = choices.iter().map(|c| c.to_string()).collect();
            details.push(failure(
                path,
                value,
                format!("Field {} must be one of [{}]: {}", path, listed.join(", "), value),
            ));
            return;
        }
    }

    if let Some(validator) = &field.validator {
        if !(validator.check)(value) {
            let mut values = HashMap::new();
            values.insert("VALUE", value.to_string());
            values.insert("FIELD", path.to_string());
            let message = validator.message.as_deref().unwrap_or(DEFAULT_VALIDATOR_MESSAGE);
            details.push(failure(path, value, template(message, &values)));
        }
    }
}

fn failure(path: &str, value: &Value, message: String) -> ValidationDetail {
    ValidationDetail {
        field: path.to_string(),
        value: Some(value.to_json()),
        message,
    }
}
