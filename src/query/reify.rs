use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::core::{Result, Value};
use crate::document::{Document, FieldValue};
use crate::registry::{EntityDescriptor, Registry};
use crate::result::Records;

use super::adaptors::Adaptor;

/// Field values of `descriptor`'s own columns found in one sub-record.
pub(crate) fn decode_record(
    descriptor: &EntityDescriptor,
    record: &HashMap<String, Value>,
) -> BTreeMap<String, FieldValue> {
    let mut data = BTreeMap::new();
    for field in descriptor.own_schema().column_fields() {
        let Some(stored) = record.get(field.column_name()) else {
            continue;
        };
        let decoded = match field.field_type() {
            Some(field_type) => field_type.decode(stored.clone()),
            None => Some(stored.clone()).filter(|v| !v.is_null()),
        };
        if let Some(value) = decoded {
            data.insert(field.name().to_string(), FieldValue::Scalar(value));
        }
    }
    data
}

/// Builds one document from a split row.
///
/// The first adaptor that recognizes a discriminator picks the concrete
/// type; every table in that type's lineage contributes its columns, and
/// sub-records of unrelated descendants are ignored.
pub(crate) fn to_document(
    registry: &Arc<Registry>,
    descriptor: &Arc<EntityDescriptor>,
    adaptors: &[Box<dyn Adaptor>],
    records: &Records,
) -> Result<Document> {
    let concrete = adaptors
        .iter()
        .find_map(|adaptor| adaptor.resolve_type(records, registry))
        .unwrap_or_else(|| descriptor.clone());

    let mut data = BTreeMap::new();
    for owner in registry.lineage(&concrete) {
        if let Some(record) = records.get(owner.table_name()) {
            data.extend(decode_record(&owner, record));
        }
    }

    let mut document = Document::hydrate(registry.clone(), concrete, data);
    for adaptor in adaptors {
        adaptor.merge(records, &mut document)?;
    }
    Ok(document)
}
