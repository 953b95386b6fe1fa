//! Record-level encode/decode for each value kind.

use tracing::{debug, warn};
use trove_record::{canonical, Record};

use crate::error::{PoolError, PoolResult};
use crate::node::{adopt, Node, ObjectRef};
use crate::resolver::{Decoder, Encoder};
use crate::value::{OrderedMap, Value};

/// Encode an object's persisted fields, in declaration order.
pub(crate) fn encode_object(encoder: &mut Encoder<'_>, node: &ObjectRef) -> PoolResult<Record> {
    encoder.enter(node)?;
    let slots = node.snapshot();
    let entries = node
        .schema()
        .persisted_fields()
        .map(|(index, field)| {
            let value = encoder.encode_field(&slots[index], field.lazy)?;
            Ok((field.name.to_string(), value))
        })
        .collect::<PoolResult<Vec<_>>>();
    encoder.leave();

    Ok(Record::Object {
        type_name: node.type_name().to_string(),
        entries: entries?,
    })
}

pub(crate) fn encode_list(
    encoder: &mut Encoder<'_>,
    items: &[Value],
    lazy: bool,
) -> PoolResult<Record> {
    let values = items
        .iter()
        .map(|item| encoder.encode_field(item, lazy))
        .collect::<PoolResult<Vec<_>>>()?;
    Ok(Record::Array { values })
}

pub(crate) fn encode_map(
    encoder: &mut Encoder<'_>,
    map: &OrderedMap,
    lazy: bool,
) -> PoolResult<Record> {
    let entries = map
        .iter()
        .map(|(key, item)| Ok((key.to_string(), encoder.encode_field(item, lazy)?)))
        .collect::<PoolResult<Vec<_>>>()?;
    Ok(Record::Map { entries })
}

/// Decode a nested record into a value. Objects come back without a pid.
pub(crate) fn decode_record(decoder: &mut Decoder<'_>, record: &Record) -> PoolResult<Value> {
    match record {
        Record::Object { type_name, entries } => {
            let node = new_object(decoder, type_name)?;
            decode_object_into(decoder, &node, entries)?;
            Ok(Value::Object(node))
        }
        Record::Array { values } => {
            let items = values
                .iter()
                .map(|value| decoder.decode_field(value))
                .collect::<PoolResult<Vec<_>>>()?;
            Ok(Value::List(items))
        }
        Record::Map { entries } => {
            let mut map = OrderedMap::new();
            for (key, value) in entries {
                map.insert(key.clone(), decoder.decode_field(value)?);
            }
            Ok(Value::Map(map))
        }
        Record::Bytes { bytes } => Ok(Value::Bytes(bytes.clone())),
        Record::Json { json_string } => canonical::parse(json_string)
            .map(Value::Json)
            .map_err(|e| PoolError::malformed(decoder.key(), format!("bad jsonString: {e}"))),
    }
}

/// An empty instance of the registered schema named `type_name`.
pub(crate) fn new_object(decoder: &Decoder<'_>, type_name: &str) -> PoolResult<ObjectRef> {
    let schema = decoder
        .pool()
        .registry()
        .get(type_name)
        .ok_or_else(|| PoolError::UnknownRecordType {
            type_name: type_name.to_string(),
        })?;
    Ok(Node::new(schema, decoder.pool().downgrade()))
}

/// Fill `node` from a record's entries.
///
/// Entries naming fields that are not declared persisted are dropped;
/// declared fields absent from the record keep their default. Both count
/// as schema drift.
pub(crate) fn decode_object_into(
    decoder: &mut Decoder<'_>,
    node: &ObjectRef,
    entries: &[(String, trove_record::RefValue)],
) -> PoolResult<()> {
    let schema = node.schema();
    let mut seen = vec![false; schema.fields.len()];

    for (name, encoded) in entries {
        match schema.field_index(name) {
            Some(index) if schema.fields[index].persisted => {
                let value = decoder.decode_field(encoded)?;
                if !schema.fields[index].lazy {
                    adopt(&value, node);
                }
                node.load_slot(index, value);
                seen[index] = true;
            }
            _ => {
                warn!(
                    key = decoder.key(),
                    type_name = schema.type_name,
                    field = %name,
                    "dropping stored field not in schema"
                );
                decoder.mark_drift();
            }
        }
    }

    for (index, field) in schema.persisted_fields() {
        if !seen[index] {
            debug!(
                key = decoder.key(),
                type_name = schema.type_name,
                field = field.name,
                "stored record lacks field; using default"
            );
            decoder.mark_drift();
        }
    }
    Ok(())
}
