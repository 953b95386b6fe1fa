use std::collections::HashMap;

use trove_record::RESERVED_TYPES;

use crate::error::{PoolError, PoolResult};
use crate::value::Value;

/// Builds a field's initial value.
pub type DefaultFn = fn() -> Value;

/// Static persistence metadata for one field of a storable type.
///
/// Declared in a `const` table, so the resolver never inspects values at
/// runtime to decide how a field is stored:
///
/// ```
/// use trove_pool::{FieldDescriptor, Schema, Value};
///
/// const FIELDS: &[FieldDescriptor] = &[
///     FieldDescriptor::persisted("title"),
///     FieldDescriptor::persisted("tags").with_default(|| Value::List(Vec::new())),
///     FieldDescriptor::lazy("parent"),
///     FieldDescriptor::transient("scratch"),
/// ];
/// static NOTE: Schema = Schema::new("Note", FIELDS);
/// assert_eq!(NOTE.field_index("parent"), Some(2));
/// ```
#[derive(Debug, Clone, Copy)]
pub struct FieldDescriptor {
    pub name: &'static str,
    /// Written to the store.
    pub persisted: bool,
    /// Stored objects are written as pointers instead of inline.
    pub lazy: bool,
    /// Initial value; `Null` when absent.
    pub default: Option<DefaultFn>,
}

impl FieldDescriptor {
    /// A persisted field stored inline.
    pub const fn persisted(name: &'static str) -> Self {
        Self {
            name,
            persisted: true,
            lazy: false,
            default: None,
        }
    }

    /// A persisted field whose objects are stored by pointer and loaded on
    /// first access.
    pub const fn lazy(name: &'static str) -> Self {
        Self {
            name,
            persisted: true,
            lazy: true,
            default: None,
        }
    }

    /// An in-memory-only field.
    pub const fn transient(name: &'static str) -> Self {
        Self {
            name,
            persisted: false,
            lazy: false,
            default: None,
        }
    }

    pub const fn with_default(mut self, default: DefaultFn) -> Self {
        self.default = Some(default);
        self
    }

    /// A fresh initial value for this field.
    pub fn default_value(&self) -> Value {
        self.default.map(|make| make()).unwrap_or(Value::Null)
    }
}

/// The field table of one storable type.
#[derive(Debug)]
pub struct Schema {
    /// Written as the record's `type` tag.
    pub type_name: &'static str,
    pub fields: &'static [FieldDescriptor],
}

impl Schema {
    pub const fn new(type_name: &'static str, fields: &'static [FieldDescriptor]) -> Self {
        Self { type_name, fields }
    }

    /// Position of `name` in the field table.
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|field| field.name == name)
    }

    pub fn field(&self, name: &str) -> Option<&'static FieldDescriptor> {
        self.fields.iter().find(|field| field.name == name)
    }

    /// Persisted fields with their slot index, in declaration order.
    pub fn persisted_fields(&self) -> impl Iterator<Item = (usize, &'static FieldDescriptor)> {
        self.fields
            .iter()
            .enumerate()
            .filter(|(_, field)| field.persisted)
    }
}

/// Schemas a pool can decode, keyed by type name.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<&'static str, &'static Schema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `schema`. Registering the same schema twice is a no-op;
    /// a different schema under a taken name is rejected.
    pub fn register(&mut self, schema: &'static Schema) -> PoolResult<()> {
        if RESERVED_TYPES.contains(&schema.type_name) {
            return Err(PoolError::ReservedTypeName {
                type_name: schema.type_name,
            });
        }
        match self.schemas.get(schema.type_name) {
            Some(existing) if std::ptr::eq(*existing, schema) => Ok(()),
            Some(_) => Err(PoolError::DuplicateSchema {
                type_name: schema.type_name,
            }),
            None => {
                self.schemas.insert(schema.type_name, schema);
                Ok(())
            }
        }
    }

    pub fn get(&self, type_name: &str) -> Option<&'static Schema> {
        self.schemas.get(type_name).copied()
    }

    /// Returns `true` if this exact schema is registered.
    pub fn contains(&self, schema: &'static Schema) -> bool {
        self.get(schema.type_name)
            .is_some_and(|existing| std::ptr::eq(existing, schema))
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    /// Registered type names, sorted.
    pub fn type_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.schemas.keys().copied().collect();
        names.sort_unstable();
        names
    }
}
