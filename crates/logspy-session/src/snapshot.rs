//! Depth-bounded materialization of live debuggee objects.
//!
//! The debuggee offers no cycle detection and hands out a fresh handle for
//! every fetch, so the depth bound is what guarantees termination: once it is
//! reached, nested objects collapse into [`OBJECT_PLACEHOLDER`].

use futures::{FutureExt, future::BoxFuture};
use logspy_core::{Debuggee, PropertyDescriptor, RemoteObject, ValueKind};
use serde_json::{Map, Value};

/// Nesting levels captured by default.
pub const DEFAULT_MAX_DEPTH: usize = 5;

/// Stands in for an object below the depth bound.
pub const OBJECT_PLACEHOLDER: &str = "<object>";

/// Stands in for a callable.
pub const FUNCTION_PLACEHOLDER: &str = "<function>";

/// Stands in for an object whose properties could not be fetched.
pub const UNAVAILABLE_PLACEHOLDER: &str = "<unavailable>";

/// Walks an object graph through the debuggee protocol.
pub struct Snapshotter<'a, D: ?Sized> {
    debuggee: &'a D,
    max_depth: usize,
}

impl<'a, D> Snapshotter<'a, D>
where
    D: Debuggee + ?Sized,
{
    #[must_use]
    pub const fn new(debuggee: &'a D, max_depth: usize) -> Self {
        Self {
            debuggee,
            max_depth,
        }
    }

    /// Materialize `object` into a plain value nested at most `max_depth` levels.
    ///
    /// Never fails: unreachable parts degrade to placeholders.
    pub async fn snapshot(&self, object: &RemoteObject) -> Value {
        if object.object_id.is_some() && !object.is_function() && self.max_depth == 0 {
            return Value::from(OBJECT_PLACEHOLDER);
        }
        self.value_at(object, 1).await
    }

    /// `level` is the nesting level `object` would occupy in the output.
    fn value_at<'s>(&'s self, object: &'s RemoteObject, level: usize) -> BoxFuture<'s, Value> {
        async move {
            if object.is_function() {
                return Value::from(FUNCTION_PLACEHOLDER);
            }
            let Some(object_id) = object.object_id.as_deref() else {
                return primitive(object);
            };

            let properties = match self.debuggee.get_properties(object_id, true).await {
                Ok(properties) => properties,
                Err(e) => {
                    tracing::warn!(%object_id, error = %e, "failed to fetch object properties");
                    return Value::from(UNAVAILABLE_PLACEHOLDER);
                }
            };

            if object.is_array() {
                let mut items = Vec::new();
                for (_, property) in array_elements(properties) {
                    items.push(self.property_value(&property, level).await);
                }
                Value::Array(items)
            } else {
                let mut fields = Map::new();
                for property in properties.into_iter().filter(|p| p.enumerable) {
                    let value = self.property_value(&property, level).await;
                    fields.insert(property.name, value);
                }
                Value::Object(fields)
            }
        }
        .boxed()
    }

    async fn property_value(&self, property: &PropertyDescriptor, level: usize) -> Value {
        let Some(value) = &property.value else {
            // accessor without a materialized value
            return Value::Null;
        };
        if value.is_function() {
            Value::from(FUNCTION_PLACEHOLDER)
        } else if value.object_id.is_some() {
            if level < self.max_depth {
                self.value_at(value, level + 1).await
            } else {
                Value::from(OBJECT_PLACEHOLDER)
            }
        } else {
            primitive(value)
        }
    }
}

/// Index properties of an array, sorted by index.
fn array_elements(properties: Vec<PropertyDescriptor>) -> Vec<(usize, PropertyDescriptor)> {
    let mut elements: Vec<_> = properties
        .into_iter()
        .filter_map(|p| p.name.parse::<usize>().ok().map(|i| (i, p)))
        .collect();
    elements.sort_by_key(|(i, _)| *i);
    elements
}

fn primitive(object: &RemoteObject) -> Value {
    if let Some(value) = &object.value {
        return value.clone();
    }
    if let Some(raw) = &object.unserializable_value {
        return Value::from(raw.as_str());
    }
    match object.kind {
        ValueKind::Symbol | ValueKind::Bigint => object
            .description
            .as_deref()
            .map_or(Value::Null, Value::from),
        _ => Value::Null,
    }
}

/// Maximum object/array nesting of a plain value.
#[must_use]
pub fn nesting_depth(value: &Value) -> usize {
    match value {
        Value::Object(fields) => 1 + fields.values().map(nesting_depth).max().unwrap_or(0),
        Value::Array(items) => 1 + items.iter().map(nesting_depth).max().unwrap_or(0),
        _ => 0,
    }
}
