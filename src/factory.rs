//! Mock data factory.
//!
//! A [`MockDefinition`] is a tree of generators describing a record field by
//! field. The factory evaluates the tree into JSON objects, applies
//! positional overrides and deserializes the result into the target type.

use crate::error::DefinitionError;
use rand::Rng;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Zero-argument value producer.
pub type Producer = Arc<dyn Fn() -> Value + Send + Sync>;

/// How many elements an array generator produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArraySize {
    Fixed(usize),
    /// Uniform in `[min, max]`
    Range { min: usize, max: usize },
}

impl ArraySize {
    fn resolve(&self) -> usize {
        match *self {
            ArraySize::Fixed(n) => n,
            ArraySize::Range { min, max } if max > min => rand::thread_rng().gen_range(min..=max),
            ArraySize::Range { min, .. } => min,
        }
    }
}

/// One node of a generator tree.
#[derive(Clone)]
pub enum Generator {
    /// Leaf producer
    Value(Producer),
    /// Nested object
    Object(MockDefinition),
    /// Repeated element
    Array {
        element: Box<Generator>,
        size: ArraySize,
    },
}

impl Generator {
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        Generator::Value(Arc::new(f))
    }

    /// Evaluate the node.
    pub fn generate(&self) -> Value {
        match self {
            Generator::Value(producer) => producer(),
            Generator::Object(definition) => Value::Object(definition.generate_record()),
            Generator::Array { element, size } => {
                Value::Array((0..size.resolve()).map(|_| element.generate()).collect())
            }
        }
    }
}

impl From<MockDefinition> for Generator {
    fn from(definition: MockDefinition) -> Self {
        Generator::Object(definition)
    }
}

impl fmt::Debug for Generator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Generator::Value(_) => f.write_str("Value(..)"),
            Generator::Object(definition) => f.debug_tuple("Object").field(definition).finish(),
            Generator::Array { element, size } => f
                .debug_struct("Array")
                .field("element", element)
                .field("size", size)
                .finish(),
        }
    }
}

/// Ordered field generators for one record shape.
#[derive(Debug, Clone, Default)]
pub struct MockDefinition {
    fields: Vec<(String, Generator)>,
}

impl MockDefinition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: impl Into<String>, generator: impl Into<Generator>) -> Self {
        self.fields.push((name.into(), generator.into()));
        self
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    fn generate_record(&self) -> Map<String, Value> {
        self.fields
            .iter()
            .map(|(name, generator)| (name.clone(), generator.generate()))
            .collect()
    }
}

/// Generates records of type `T` from a definition.
pub struct MockFactory<T> {
    definition: MockDefinition,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for MockFactory<T> {
    fn clone(&self) -> Self {
        Self {
            definition: self.definition.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for MockFactory<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockFactory")
            .field("definition", &self.definition)
            .finish()
    }
}

impl<T: DeserializeOwned> MockFactory<T> {
    pub fn new(definition: MockDefinition) -> Self {
        Self {
            definition,
            _marker: PhantomData,
        }
    }

    pub fn definition(&self) -> &MockDefinition {
        &self.definition
    }

    /// Generate `count` raw records.
    ///
    /// `overrides[i]`, when present, is shallow-merged over record `i`.
    pub fn generate_values(&self, count: usize, overrides: &[Value]) -> Result<Vec<Value>, DefinitionError> {
        (0..count)
            .map(|i| {
                let mut record = self.definition.generate_record();
                if let Some(patch) = overrides.get(i) {
                    merge_override(&mut record, patch)?;
                }
                Ok(Value::Object(record))
            })
            .collect()
    }

    /// Generate `count` typed records.
    pub fn generate(&self, count: usize, overrides: &[Value]) -> Result<Vec<T>, DefinitionError> {
        self.generate_values(count, overrides)?
            .into_iter()
            .map(|value| {
                serde_json::from_value(value).map_err(|e| DefinitionError::Shape(e.to_string()))
            })
            .collect()
    }
}

fn merge_override(record: &mut Map<String, Value>, patch: &Value) -> Result<(), DefinitionError> {
    match patch {
        Value::Object(fields) => {
            for (key, value) in fields {
                record.insert(key.clone(), value.clone());
            }
            Ok(())
        }
        Value::Null => Ok(()),
        other => Err(DefinitionError::Shape(format!(
            "override must be a JSON object, got {}",
            other
        ))),
    }
}
