//! Field-level encode/decode: decides whether a value is written inline in
//! its owner's record or as a pointer to its own record.
//!
//! A field's objects are written as pointers exactly when the field is
//! declared lazy. Unloaded lazy references are always written back as
//! pointers, whatever field they sit in.

use std::sync::Arc;

use serde_json::Number;
use trove_record::{Record, RefValue};
use trove_types::Pid;

use crate::codec;
use crate::error::{PoolError, PoolResult};
use crate::lazy::LazyProxy;
use crate::node::ObjectRef;
use crate::pool::ObjectPool;
use crate::value::Value;

/// Encodes one object graph into records.
pub(crate) struct Encoder<'a> {
    pool: &'a ObjectPool,
    /// Objects currently being written inline, outermost first.
    inline_stack: Vec<usize>,
}

impl<'a> Encoder<'a> {
    pub(crate) fn new(pool: &'a ObjectPool) -> Self {
        Self {
            pool,
            inline_stack: Vec::new(),
        }
    }

    /// Encode a field value as it appears inside its owner's record.
    pub(crate) fn encode_field(&mut self, value: &Value, lazy: bool) -> PoolResult<RefValue> {
        match value {
            Value::Object(node) if lazy => Ok(RefValue::Pointer(self.pointer_to(node))),
            Value::Object(node) => Ok(inline(codec::encode_object(self, node)?)),
            Value::Lazy(proxy) => Ok(RefValue::Pointer(proxy.pid().clone())),
            Value::Null => Ok(RefValue::Scalar(serde_json::Value::Null)),
            Value::Bool(b) => Ok(RefValue::Scalar(serde_json::Value::Bool(*b))),
            Value::Int(n) => Ok(RefValue::Scalar(serde_json::Value::from(*n))),
            Value::Float(n) => Number::from_f64(*n)
                .map(|n| RefValue::Scalar(serde_json::Value::Number(n)))
                .ok_or(PoolError::NonFiniteNumber { value: *n }),
            Value::String(s) => Ok(RefValue::Scalar(serde_json::Value::String(s.clone()))),
            Value::Bytes(bytes) => Ok(inline(Record::Bytes {
                bytes: bytes.clone(),
            })),
            Value::Json(json) => Ok(inline(Record::json(json))),
            Value::List(items) => Ok(inline(codec::encode_list(self, items, lazy)?)),
            Value::Map(map) => Ok(inline(codec::encode_map(self, map, lazy)?)),
        }
    }

    /// Push `node` onto the inline stack, failing if it is already there.
    pub(crate) fn enter(&mut self, node: &ObjectRef) -> PoolResult<()> {
        let addr = Arc::as_ptr(node) as usize;
        if self.inline_stack.contains(&addr) {
            return Err(PoolError::InlineCycle {
                type_name: node.type_name(),
            });
        }
        self.inline_stack.push(addr);
        Ok(())
    }

    pub(crate) fn leave(&mut self) {
        self.inline_stack.pop();
    }

    /// Pid of a pointer target. Targets without a stored record are queued
    /// for the current flush.
    fn pointer_to(&mut self, node: &ObjectRef) -> Pid {
        let pid = self.pool.allocate_pid(node);
        if node.stored_digest().is_none() {
            self.pool.mark_dirty(node);
        }
        pid
    }
}

fn inline(record: Record) -> RefValue {
    RefValue::Inline(Box::new(record))
}

/// Decodes records loaded under one store key.
pub(crate) struct Decoder<'a> {
    pool: &'a ObjectPool,
    key: &'a str,
    drifted: bool,
}

impl<'a> Decoder<'a> {
    pub(crate) fn new(pool: &'a ObjectPool, key: &'a str) -> Self {
        Self {
            pool,
            key,
            drifted: false,
        }
    }

    pub(crate) fn pool(&self) -> &ObjectPool {
        self.pool
    }

    /// Store key of the record being decoded, for errors and logs.
    pub(crate) fn key(&self) -> &str {
        self.key
    }

    /// Note that a decoded record did not match its schema.
    pub(crate) fn mark_drift(&mut self) {
        self.drifted = true;
    }

    pub(crate) fn drifted(&self) -> bool {
        self.drifted
    }

    /// Decode a field value. Pointers become unloaded lazy references;
    /// nothing is fetched.
    pub(crate) fn decode_field(&mut self, value: &RefValue) -> PoolResult<Value> {
        match value {
            RefValue::Pointer(pid) => Ok(Value::Lazy(LazyProxy::new(
                pid.clone(),
                self.pool.downgrade(),
            ))),
            RefValue::Scalar(json) => self.decode_scalar(json),
            RefValue::Inline(record) => codec::decode_record(self, record),
        }
    }

    fn decode_scalar(&self, json: &serde_json::Value) -> PoolResult<Value> {
        match json {
            serde_json::Value::Null => Ok(Value::Null),
            serde_json::Value::Bool(b) => Ok(Value::Bool(*b)),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Ok(Value::Int(i)),
                None => n
                    .as_f64()
                    .map(Value::Float)
                    .ok_or_else(|| PoolError::malformed(self.key, format!("unrepresentable number {n}"))),
            },
            serde_json::Value::String(s) => Ok(Value::String(s.clone())),
            other => Err(PoolError::malformed(
                self.key,
                format!("unexpected JSON {other} in scalar position"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{memory_pool, NOTE};
    use serde_json::json;

    #[test]
    fn lazy_field_objects_become_pointers() {
        let (pool, _) = memory_pool();
        let target = pool.create(&NOTE).unwrap();
        let mut encoder = Encoder::new(&pool);

        let encoded = encoder.encode_field(&Value::from(&target), true).unwrap();
        let pid = target.pid().cloned().expect("pointer target gets a pid");
        assert_eq!(encoded, RefValue::Pointer(pid.clone()));
        assert_eq!(pool.dirty_pids(), vec![pid]);
    }

    #[test]
    fn non_lazy_field_objects_are_inline() {
        let (pool, _) = memory_pool();
        let target = pool.create(&NOTE).unwrap();
        let mut encoder = Encoder::new(&pool);

        let encoded = encoder.encode_field(&Value::from(&target), false).unwrap();
        assert!(matches!(&encoded, RefValue::Inline(r) if r.type_name() == "Note"));
        assert!(target.pid().is_none());
    }

    #[test]
    fn lists_in_lazy_fields_hold_pointers() {
        let (pool, _) = memory_pool();
        let a = pool.create(&NOTE).unwrap();
        let mut encoder = Encoder::new(&pool);

        let list = Value::List(vec![Value::from(&a), Value::Int(3)]);
        let RefValue::Inline(record) = encoder.encode_field(&list, true).unwrap() else {
            panic!("lists are inline records");
        };
        let Record::Array { values } = *record else {
            panic!("expected array record");
        };
        assert!(matches!(values[0], RefValue::Pointer(_)));
        assert_eq!(values[1], RefValue::Scalar(json!(3)));
    }

    #[test]
    fn unloaded_reference_stays_a_pointer_in_any_field() {
        let (pool, _) = memory_pool();
        let pid = Pid::generate();
        let proxy = LazyProxy::new(pid.clone(), pool.downgrade());
        let mut encoder = Encoder::new(&pool);
        assert_eq!(
            encoder.encode_field(&Value::Lazy(proxy), false).unwrap(),
            RefValue::Pointer(pid)
        );
    }

    #[test]
    fn non_finite_float_is_rejected() {
        let (pool, _) = memory_pool();
        let mut encoder = Encoder::new(&pool);
        assert!(matches!(
            encoder.encode_field(&Value::Float(f64::INFINITY), false),
            Err(PoolError::NonFiniteNumber { .. })
        ));
    }

    #[test]
    fn pointers_decode_to_lazy_without_fetching() {
        let (pool, store) = memory_pool();
        let pid = Pid::generate();
        let mut decoder = Decoder::new(&pool, "k");
        let value = decoder.decode_field(&RefValue::Pointer(pid.clone())).unwrap();
        assert_eq!(value.as_lazy().unwrap().pid(), &pid);
        assert_eq!(store.total_gets(), 0);
    }

    #[test]
    fn numbers_keep_int_float_distinction() {
        let (pool, _) = memory_pool();
        let mut decoder = Decoder::new(&pool, "k");
        assert_eq!(
            decoder.decode_field(&RefValue::Scalar(json!(7))).unwrap(),
            Value::Int(7)
        );
        assert_eq!(
            decoder.decode_field(&RefValue::Scalar(json!(7.0))).unwrap(),
            Value::Float(7.0)
        );
    }
}
