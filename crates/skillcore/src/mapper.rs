//! Declarative mapping from a run's accumulated context to a skill's input.
//!
//! Mappers are data rather than closures so that workflow definitions can be
//! persisted and reloaded, and so the composer can see which context keys a
//! step reads before anything runs.

use crate::run::{RunContext, TRIGGER_KEY};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputMapper {
    /// The whole context object, keyed by step.
    #[default]
    Context,
    /// Only the trigger payload.
    Trigger,
    /// An object built field by field.
    Fields { fields: BTreeMap<String, Binding> },
}

/// Source of one input field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Binding {
    /// Dot path into the context, e.g. `enrich.summary` or `trigger.photos.0`.
    From(String),
    /// A constant.
    Value(Value),
}

impl InputMapper {
    pub fn fields() -> Self {
        InputMapper::Fields {
            fields: BTreeMap::new(),
        }
    }

    /// Bind `field` to the context value at `path`.
    pub fn bind(self, field: impl Into<String>, path: impl Into<String>) -> Self {
        self.with_binding(field.into(), Binding::From(path.into()))
    }

    /// Bind `field` to a constant.
    pub fn constant(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with_binding(field.into(), Binding::Value(value.into()))
    }

    fn with_binding(self, field: String, binding: Binding) -> Self {
        let mut fields = match self {
            InputMapper::Fields { fields } => fields,
            _ => BTreeMap::new(),
        };
        fields.insert(field, binding);
        InputMapper::Fields { fields }
    }

    /// Build the skill input from the current context.
    ///
    /// Paths that do not resolve are left out of the input; the skill's input
    /// schema decides whether that is acceptable.
    pub fn apply(&self, context: &RunContext) -> Value {
        match self {
            InputMapper::Context => context.to_value(),
            InputMapper::Trigger => context.get(TRIGGER_KEY).cloned().unwrap_or(Value::Null),
            InputMapper::Fields { fields } => {
                let mut input = Map::new();
                for (field, binding) in fields {
                    match binding {
                        Binding::From(path) => {
                            if let Some(value) = context.lookup(path) {
                                input.insert(field.clone(), value.clone());
                            }
                        }
                        Binding::Value(value) => {
                            input.insert(field.clone(), value.clone());
                        }
                    }
                }
                Value::Object(input)
            }
        }
    }

    /// Context keys (step namespaces) this mapper reads by name.
    pub fn reads(&self) -> Vec<&str> {
        match self {
            InputMapper::Context => Vec::new(),
            InputMapper::Trigger => vec![TRIGGER_KEY],
            InputMapper::Fields { fields } => {
                let mut keys: Vec<&str> = fields
                    .values()
                    .filter_map(|binding| match binding {
                        Binding::From(path) => Some(namespace(path)),
                        Binding::Value(_) => None,
                    })
                    .collect();
                keys.sort_unstable();
                keys.dedup();
                keys
            }
        }
    }
}

/// First segment of a dot path
pub fn namespace(path: &str) -> &str {
    path.split('.').next().unwrap_or(path)
}

/// Walk `segments` into `value`; numeric segments index arrays.
pub fn walk<'a>(value: &'a Value, segments: &[&str]) -> Option<&'a Value> {
    segments.iter().try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(*segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}
