//! Per-attribute value transforms.
//!
//! A transform is a pure function from the raw value (plus the attribute, its
//! entity, and the record built so far) to the value to store. Components
//! resolve transform ids once at start and keep the [`Transform`] handle.

use crate::model::{Attribute, Entity};
use crate::record::EntityData;
use crate::value::Value;
use indexmap::IndexMap;
use std::fmt;
use std::sync::Arc;

/// Arguments passed to a transform.
pub struct TransformInput<'a> {
    pub value: &'a Value,
    pub attribute: &'a Attribute,
    pub entity: &'a Entity,
    /// The record as built so far (attributes at lower ordinals).
    pub record: &'a EntityData,
}

type TransformFn = dyn Fn(&TransformInput<'_>) -> Result<Value, String> + Send + Sync;

/// A resolved, cheaply clonable transform.
#[derive(Clone)]
pub struct Transform {
    id: String,
    func: Arc<TransformFn>,
}

impl Transform {
    pub fn new<F>(id: impl Into<String>, func: F) -> Self
    where
        F: Fn(&TransformInput<'_>) -> Result<Value, String> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            func: Arc::new(func),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn apply(&self, input: &TransformInput<'_>) -> Result<Value, TransformError> {
        (self.func)(input).map_err(|reason| TransformError {
            transform: self.id.clone(),
            attribute: input.attribute.id.clone(),
            reason,
        })
    }
}

impl fmt::Debug for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transform").field("id", &self.id).finish()
    }
}

/// A transform raised while processing a record. Fatal for the batch.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("transform '{transform}' failed on attribute '{attribute}': {reason}")]
pub struct TransformError {
    pub transform: String,
    pub attribute: String,
    pub reason: String,
}

/// Transforms available to a flow, by id.
#[derive(Clone, Default)]
pub struct TransformRegistry {
    transforms: IndexMap<String, Transform>,
}

impl TransformRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding the built-in transforms.
    ///
    /// - `trim`: strip surrounding whitespace from strings
    /// - `upper` / `lower`: change the case of strings
    /// - `null_if_blank`: map blank strings to null
    /// - `integer`: parse strings as `i64` (null stays null)
    /// - `required`: fail on null
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("trim", |i| Ok(map_str(i.value, |s| s.trim().to_string())));
        registry.register("upper", |i| Ok(map_str(i.value, str::to_uppercase)));
        registry.register("lower", |i| Ok(map_str(i.value, str::to_lowercase)));
        registry.register("null_if_blank", |i| {
            Ok(match i.value.as_str() {
                Some(s) if s.trim().is_empty() => Value::Null,
                _ => i.value.clone(),
            })
        });
        registry.register("integer", |i| match i.value {
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|e| format!("'{}' is not an integer: {}", s, e)),
            other => Ok(other.clone()),
        });
        registry.register("required", |i| {
            if i.value.is_null() {
                Err("value is required".to_string())
            } else {
                Ok(i.value.clone())
            }
        });
        registry
    }

    /// Register a transform, replacing any previous one with the same id.
    pub fn register<F>(&mut self, id: impl Into<String>, func: F)
    where
        F: Fn(&TransformInput<'_>) -> Result<Value, String> + Send + Sync + 'static,
    {
        let transform = Transform::new(id, func);
        self.transforms.insert(transform.id.clone(), transform);
    }

    pub fn get(&self, id: &str) -> Option<Transform> {
        self.transforms.get(id).cloned()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.transforms.keys().map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }
}

fn map_str(value: &Value, f: impl FnOnce(&str) -> String) -> Value {
    match value {
        Value::String(s) => Value::String(f(s)),
        other => other.clone(),
    }
}
