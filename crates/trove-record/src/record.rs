use std::collections::HashSet;

use serde_json::{Map, Value};
use trove_types::Pid;

use crate::canonical;
use crate::error::{RecordError, RecordResult};

/// Type tag of ordered-list records.
pub const ARRAY_TYPE: &str = "Array";
/// Type tag of ordered-map records.
pub const MAP_TYPE: &str = "Map";
/// Type tag of byte-buffer records.
pub const BYTES_TYPE: &str = "Bytes";
/// Type tag of opaque JSON records.
pub const JSON_TYPE: &str = "Json";

/// Type tags owned by the built-in container records. Object schemas may
/// not use them.
pub const RESERVED_TYPES: [&str; 4] = [ARRAY_TYPE, MAP_TYPE, BYTES_TYPE, JSON_TYPE];

/// The single key of a pointer wrapper: `{"*": "<pid>"}`.
pub const POINTER_KEY: &str = "*";

/// The flat, type-tagged form of one stored value.
#[derive(Clone, Debug, PartialEq)]
pub enum Record {
    /// A schema-described object: persisted fields in declaration order.
    Object {
        type_name: String,
        entries: Vec<(String, RefValue)>,
    },
    /// An ordered list.
    Array { values: Vec<RefValue> },
    /// A string-keyed map in insertion order.
    Map { entries: Vec<(String, RefValue)> },
    /// A byte buffer.
    Bytes { bytes: Vec<u8> },
    /// An opaque JSON value, stored as canonical JSON text.
    Json { json_string: String },
}

/// A value as it appears inside a record.
#[derive(Clone, Debug, PartialEq)]
pub enum RefValue {
    /// `null`, a boolean, a number, or a string, stored as itself.
    Scalar(Value),
    /// A pointer wrapper naming another stored record.
    Pointer(Pid),
    /// A nested record embedded in its owner.
    Inline(Box<Record>),
}

impl Record {
    /// The record's `type` tag.
    pub fn type_name(&self) -> &str {
        match self {
            Self::Object { type_name, .. } => type_name,
            Self::Array { .. } => ARRAY_TYPE,
            Self::Map { .. } => MAP_TYPE,
            Self::Bytes { .. } => BYTES_TYPE,
            Self::Json { .. } => JSON_TYPE,
        }
    }

    /// Build a JSON record holding `value` in canonical form.
    pub fn json(value: &Value) -> Self {
        Self::Json {
            json_string: canonical::to_string(value),
        }
    }

    /// The JSON form of this record.
    pub fn to_json(&self) -> Value {
        let mut out = Map::new();
        out.insert("type".into(), Value::String(self.type_name().to_string()));
        match self {
            Self::Object { entries, .. } | Self::Map { entries } => {
                out.insert("entries".into(), entries_to_json(entries));
            }
            Self::Array { values } => {
                out.insert(
                    "values".into(),
                    Value::Array(values.iter().map(RefValue::to_json).collect()),
                );
            }
            Self::Bytes { bytes } => {
                out.insert("length".into(), Value::from(bytes.len()));
                out.insert(
                    "bytes".into(),
                    Value::Array(bytes.iter().map(|b| Value::from(*b)).collect()),
                );
            }
            Self::Json { json_string } => {
                out.insert("jsonString".into(), Value::String(json_string.clone()));
            }
        }
        Value::Object(out)
    }

    /// Parse a record from its JSON form.
    pub fn from_json(value: &Value) -> RecordResult<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| RecordError::malformed("record is not a JSON object"))?;
        let type_name = object
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| RecordError::malformed("record has no string `type`"))?;

        match type_name {
            ARRAY_TYPE => {
                let values = required(object, "values", type_name)?
                    .as_array()
                    .ok_or_else(|| RecordError::malformed("`values` is not an array"))?
                    .iter()
                    .map(RefValue::from_json)
                    .collect::<RecordResult<Vec<_>>>()?;
                Ok(Self::Array { values })
            }
            MAP_TYPE => Ok(Self::Map {
                entries: entries_from_json(required(object, "entries", type_name)?)?,
            }),
            BYTES_TYPE => bytes_from_json(object),
            JSON_TYPE => {
                let json_string = required(object, "jsonString", type_name)?
                    .as_str()
                    .ok_or_else(|| RecordError::malformed("`jsonString` is not a string"))?
                    .to_string();
                Ok(Self::Json { json_string })
            }
            _ => Ok(Self::Object {
                type_name: type_name.to_string(),
                entries: entries_from_json(required(object, "entries", type_name)?)?,
            }),
        }
    }

    /// Canonical JSON bytes of this record, as written to a store.
    pub fn to_bytes(&self) -> Vec<u8> {
        canonical::to_vec(&self.to_json())
    }

    /// Parse a record from stored bytes.
    pub fn from_bytes(bytes: &[u8]) -> RecordResult<Self> {
        let value: Value = serde_json::from_slice(bytes)?;
        Self::from_json(&value)
    }

    /// Every pid this record points at, including through nested inline
    /// records, in order of first appearance.
    pub fn pointers(&self) -> Vec<Pid> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        self.collect_pointers(&mut seen, &mut out);
        out
    }

    fn collect_pointers(&self, seen: &mut HashSet<Pid>, out: &mut Vec<Pid>) {
        let refs: Box<dyn Iterator<Item = &RefValue>> = match self {
            Self::Object { entries, .. } | Self::Map { entries } => {
                Box::new(entries.iter().map(|(_, v)| v))
            }
            Self::Array { values } => Box::new(values.iter()),
            Self::Bytes { .. } | Self::Json { .. } => return,
        };
        for value in refs {
            match value {
                RefValue::Pointer(pid) => {
                    if seen.insert(pid.clone()) {
                        out.push(pid.clone());
                    }
                }
                RefValue::Inline(record) => record.collect_pointers(seen, out),
                RefValue::Scalar(_) => {}
            }
        }
    }
}

impl RefValue {
    /// The JSON form of this reference value.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Scalar(value) => value.clone(),
            Self::Pointer(pid) => {
                let mut wrapper = Map::new();
                wrapper.insert(POINTER_KEY.into(), Value::String(pid.to_string()));
                Value::Object(wrapper)
            }
            Self::Inline(record) => record.to_json(),
        }
    }

    /// Parse a reference value from its JSON form.
    ///
    /// Objects are either a pointer wrapper or a nested record; bare arrays
    /// are rejected because lists are always stored as `Array` records.
    pub fn from_json(value: &Value) -> RecordResult<Self> {
        match value {
            Value::Object(object) if object.contains_key(POINTER_KEY) => {
                if object.len() != 1 {
                    return Err(RecordError::malformed(
                        "pointer wrapper has keys besides `*`",
                    ));
                }
                let raw = object[POINTER_KEY]
                    .as_str()
                    .ok_or_else(|| RecordError::malformed("pointer target is not a string"))?;
                let pid = Pid::parse(raw)
                    .map_err(|e| RecordError::malformed(format!("bad pointer target: {e}")))?;
                Ok(Self::Pointer(pid))
            }
            Value::Object(_) => Ok(Self::Inline(Box::new(Record::from_json(value)?))),
            Value::Array(_) => Err(RecordError::malformed(
                "bare array in record; lists must be Array records",
            )),
            scalar => Ok(Self::Scalar(scalar.clone())),
        }
    }

    /// Canonical JSON bytes of this value. Used for the root key, which
    /// holds a pointer wrapper.
    pub fn to_bytes(&self) -> Vec<u8> {
        canonical::to_vec(&self.to_json())
    }

    /// Parse a reference value from stored bytes.
    pub fn from_bytes(bytes: &[u8]) -> RecordResult<Self> {
        let value: Value = serde_json::from_slice(bytes)?;
        Self::from_json(&value)
    }
}

fn required<'a>(object: &'a Map<String, Value>, key: &str, type_name: &str) -> RecordResult<&'a Value> {
    object
        .get(key)
        .ok_or_else(|| RecordError::malformed(format!("{type_name} record has no `{key}`")))
}

fn entries_to_json(entries: &[(String, RefValue)]) -> Value {
    Value::Array(
        entries
            .iter()
            .map(|(key, value)| Value::Array(vec![Value::String(key.clone()), value.to_json()]))
            .collect(),
    )
}

fn entries_from_json(value: &Value) -> RecordResult<Vec<(String, RefValue)>> {
    let items = value
        .as_array()
        .ok_or_else(|| RecordError::malformed("`entries` is not an array"))?;
    items
        .iter()
        .map(|item| match item.as_array().map(Vec::as_slice) {
            Some([Value::String(key), value]) => Ok((key.clone(), RefValue::from_json(value)?)),
            _ => Err(RecordError::malformed(
                "entry is not a [string, value] pair",
            )),
        })
        .collect()
}

fn bytes_from_json(object: &Map<String, Value>) -> RecordResult<Record> {
    let declared = required(object, "length", BYTES_TYPE)?
        .as_u64()
        .ok_or_else(|| RecordError::malformed("`length` is not an unsigned integer"))?
        as usize;
    let items = required(object, "bytes", BYTES_TYPE)?
        .as_array()
        .ok_or_else(|| RecordError::malformed("`bytes` is not an array"))?;
    if items.len() != declared {
        return Err(RecordError::LengthMismatch {
            declared,
            actual: items.len(),
        });
    }
    let bytes = items
        .iter()
        .map(|item| {
            item.as_u64()
                .and_then(|n| u8::try_from(n).ok())
                .ok_or_else(|| RecordError::malformed(format!("{item} is not a byte value")))
        })
        .collect::<RecordResult<Vec<u8>>>()?;
    Ok(Record::Bytes { bytes })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn pid(s: &str) -> Pid {
        Pid::parse(s).unwrap()
    }

    #[test]
    fn object_record_shape() {
        let record = Record::Object {
            type_name: "Note".into(),
            entries: vec![
                ("title".into(), RefValue::Scalar(json!("hello"))),
                ("next".into(), RefValue::Pointer(pid("p1"))),
            ],
        };
        assert_eq!(
            record.to_json(),
            json!({"type": "Note", "entries": [["title", "hello"], ["next", {"*": "p1"}]]})
        );
        assert_eq!(
            String::from_utf8(record.to_bytes()).unwrap(),
            r#"{"entries":[["title","hello"],["next",{"*":"p1"}]],"type":"Note"}"#
        );
    }

    #[test]
    fn container_records_parse() {
        let value = json!({
            "type": "Array",
            "values": [1, {"type": "Map", "entries": [["k", null]]}, {"type": "Bytes", "length": 2, "bytes": [0, 255]}]
        });
        let record = Record::from_json(&value).unwrap();
        let Record::Array { values } = &record else {
            panic!("expected array record");
        };
        assert_eq!(values.len(), 3);
        assert_eq!(values[0], RefValue::Scalar(json!(1)));
        assert!(matches!(&values[2], RefValue::Inline(r) if **r == Record::Bytes { bytes: vec![0, 255] }));
        assert_eq!(record.to_json(), value);
    }

    #[test]
    fn bytes_length_mismatch_is_rejected() {
        let value = json!({"type": "Bytes", "length": 3, "bytes": [1, 2]});
        let err = Record::from_json(&value).unwrap_err();
        assert!(matches!(
            err,
            RecordError::LengthMismatch {
                declared: 3,
                actual: 2
            }
        ));
    }

    #[test]
    fn out_of_range_byte_is_malformed() {
        let value = json!({"type": "Bytes", "length": 1, "bytes": [256]});
        assert!(matches!(
            Record::from_json(&value),
            Err(RecordError::Malformed { .. })
        ));
    }

    #[test]
    fn missing_type_is_malformed() {
        assert!(Record::from_json(&json!({"entries": []})).is_err());
        assert!(Record::from_json(&json!([1, 2])).is_err());
    }

    #[test]
    fn pointer_wrapper_validation() {
        assert_eq!(
            RefValue::from_json(&json!({"*": "abc"})).unwrap(),
            RefValue::Pointer(pid("abc"))
        );
        assert!(RefValue::from_json(&json!({"*": "abc", "x": 1})).is_err());
        assert!(RefValue::from_json(&json!({"*": 5})).is_err());
        assert!(RefValue::from_json(&json!({"*": "bad/pid"})).is_err());
        assert!(RefValue::from_json(&json!([1])).is_err());
    }

    #[test]
    fn json_record_is_canonical() {
        let a = Record::json(&json!({"b": 1, "a": [true, {"d": null, "c": "x"}]}));
        let b = Record::json(&json!({"a": [true, {"c": "x", "d": null}], "b": 1}));
        assert_eq!(a, b);
        assert_eq!(a.to_bytes(), b.to_bytes());
        let Record::Json { json_string } = a else {
            panic!("expected json record");
        };
        assert_eq!(json_string, r#"{"a":[true,{"c":"x","d":null}],"b":1}"#);
    }

    #[test]
    fn pointers_walk_nested_records_once() {
        let record = Record::Object {
            type_name: "Folder".into(),
            entries: vec![
                ("first".into(), RefValue::Pointer(pid("a"))),
                (
                    "children".into(),
                    RefValue::Inline(Box::new(Record::Array {
                        values: vec![
                            RefValue::Pointer(pid("b")),
                            RefValue::Pointer(pid("a")),
                            RefValue::Scalar(json!("not a pointer")),
                        ],
                    })),
                ),
            ],
        };
        assert_eq!(record.pointers(), vec![pid("a"), pid("b")]);
        assert!(Record::Bytes { bytes: vec![1] }.pointers().is_empty());
    }

    #[test]
    fn root_pointer_bytes() {
        let root = RefValue::Pointer(pid("r1"));
        assert_eq!(root.to_bytes(), br#"{"*":"r1"}"#.to_vec());
        assert_eq!(RefValue::from_bytes(&root.to_bytes()).unwrap(), root);
    }

    fn arb_scalar() -> BoxedStrategy<RefValue> {
        prop_oneof![
            Just(RefValue::Scalar(Value::Null)),
            any::<bool>().prop_map(|b| RefValue::Scalar(Value::Bool(b))),
            any::<i64>().prop_map(|n| RefValue::Scalar(Value::from(n))),
            "[a-z ]{0,6}".prop_map(|s| RefValue::Scalar(Value::String(s))),
            "[a-z0-9]{1,6}".prop_map(|s| RefValue::Pointer(Pid::parse(&s).unwrap())),
        ]
        .boxed()
    }

    fn arb_record() -> impl Strategy<Value = Record> {
        let leaf = prop_oneof![
            prop::collection::vec(any::<u8>(), 0..6).prop_map(|bytes| Record::Bytes { bytes }),
            prop::collection::vec(arb_scalar(), 0..4).prop_map(|values| Record::Array { values }),
        ];
        leaf.prop_recursive(3, 24, 4, |inner| {
            let value = prop_oneof![
                arb_scalar(),
                inner.prop_map(|r| RefValue::Inline(Box::new(r))),
            ]
            .boxed();
            prop_oneof![
                prop::collection::vec(value.clone(), 0..4).prop_map(|values| Record::Array { values }),
                prop::collection::vec(("[a-z]{1,4}", value.clone()), 0..4)
                    .prop_map(|entries| Record::Map { entries }),
                prop::collection::vec(("[a-z]{1,4}", value), 0..4).prop_map(|entries| {
                    Record::Object {
                        type_name: "Thing".into(),
                        entries,
                    }
                }),
            ]
        })
    }

    proptest! {
        #[test]
        fn stored_bytes_parse_back_to_the_record(record in arb_record()) {
            let bytes = record.to_bytes();
            let parsed = Record::from_bytes(&bytes).unwrap();
            prop_assert_eq!(parsed.to_bytes(), bytes);
            prop_assert_eq!(parsed, record);
        }
    }
}
