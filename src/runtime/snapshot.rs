//! Serializable mirror of runtime state for the persistence collaborator.
//!
//! Runtime types never derive serde; they are converted to the
//! `Serialized*` shapes here and back. Storage format and save scheduling
//! belong to the collaborator.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::runtime::evaluator::Evaluator;
use crate::runtime::stream::{Stream, StreamId};
use crate::runtime::value::{Exception, ExceptionKind, Value};
use crate::tree::NodeId;

/// A serializable representation of a [`Value`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SerializedValue {
    None,
    Bool(bool),
    Number { value: f64, unit: String },
    Text(String),
    List(Vec<SerializedValue>),
    /// Entry tuples, because serialized maps want orderable, non-string keys.
    Map(Vec<(SerializedValue, SerializedValue)>),
    Structure {
        name: String,
        fields: Vec<(String, SerializedValue)>,
    },
    Stream(String),
    Exception {
        kind: String,
        detail: Option<String>,
        node: u32,
    },
}

impl SerializedValue {
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::None => SerializedValue::None,
            Value::Bool(value) => SerializedValue::Bool(*value),
            Value::Number(value, unit) => SerializedValue::Number {
                value: value.0,
                unit: unit.as_str().to_string(),
            },
            Value::Text(text) => SerializedValue::Text(text.to_string()),
            Value::List(items) => {
                SerializedValue::List(items.iter().map(Self::from_value).collect())
            }
            Value::Map(entries) => SerializedValue::Map(
                entries
                    .iter()
                    .map(|(key, value)| (Self::from_value(key), Self::from_value(value)))
                    .collect(),
            ),
            Value::Structure(structure) => SerializedValue::Structure {
                name: structure.name.to_string(),
                fields: structure
                    .fields
                    .iter()
                    .map(|(field, value)| (field.to_string(), Self::from_value(value)))
                    .collect(),
            },
            Value::Stream(id) => SerializedValue::Stream(id.to_string()),
            Value::Exception(exception) => {
                let (kind, detail) = match &exception.kind {
                    ExceptionKind::UnresolvedName(name) => {
                        ("unresolved-name", Some(name.to_string()))
                    }
                    ExceptionKind::UnknownProperty(name) => {
                        ("unknown-property", Some(name.to_string()))
                    }
                    other => (other.label(), None),
                };
                SerializedValue::Exception {
                    kind: kind.to_string(),
                    detail,
                    node: exception.node.0,
                }
            }
        }
    }

    pub fn to_value(&self) -> Result<Value, EngineError> {
        Ok(match self {
            SerializedValue::None => Value::None,
            SerializedValue::Bool(value) => Value::Bool(*value),
            SerializedValue::Number { value, unit } => Value::number_with_unit(*value, unit),
            SerializedValue::Text(text) => Value::text(text.as_str()),
            SerializedValue::List(items) => Value::list(
                items
                    .iter()
                    .map(Self::to_value)
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            SerializedValue::Map(entries) => Value::map(
                entries
                    .iter()
                    .map(|(key, value)| Ok((key.to_value()?, value.to_value()?)))
                    .collect::<Result<Vec<_>, EngineError>>()?,
            ),
            SerializedValue::Structure { name, fields } => Value::structure(
                name.as_str(),
                fields
                    .iter()
                    .map(|(field, value)| Ok((field.as_str(), value.to_value()?)))
                    .collect::<Result<Vec<_>, EngineError>>()?,
            ),
            SerializedValue::Stream(id) => Value::Stream(
                StreamId::from_string(id)
                    .ok_or_else(|| EngineError::Snapshot(format!("bad stream id `{id}`")))?,
            ),
            SerializedValue::Exception { kind, detail, node } => {
                let kind = match (kind.as_str(), detail) {
                    ("unresolved-name", Some(name)) => {
                        ExceptionKind::UnresolvedName(name.as_str().into())
                    }
                    ("unknown-property", Some(name)) => {
                        ExceptionKind::UnknownProperty(name.as_str().into())
                    }
                    ("expected-boolean", _) => ExceptionKind::ExpectedBoolean,
                    ("expected-value", _) => ExceptionKind::ExpectedValue,
                    ("expected-list", _) => ExceptionKind::ExpectedList,
                    ("expected-map", _) => ExceptionKind::ExpectedMap,
                    ("expected-number", _) => ExceptionKind::ExpectedNumber,
                    ("expected-structure", _) => ExceptionKind::ExpectedStructure,
                    ("expected-function", _) => ExceptionKind::ExpectedFunction,
                    ("expected-stream", _) => ExceptionKind::ExpectedStream,
                    (other, _) => {
                        return Err(EngineError::Snapshot(format!(
                            "unknown exception kind `{other}`"
                        )));
                    }
                };
                Value::Exception(Arc::new(Exception {
                    kind,
                    node: NodeId(*node),
                }))
            }
        })
    }
}

/// Persisted state of one live stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamSnapshot {
    pub node: u32,
    pub id: String,
    pub definition: String,
    pub on: bool,
    pub config: Vec<SerializedValue>,
    pub history: Vec<(u64, SerializedValue)>,
    pub cursor: Option<u64>,
}

/// A snapshot of the reactive state of a running program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluatorSnapshot {
    /// Version for migration support.
    pub version: u32,
    pub tick: u64,
    pub latest: Option<SerializedValue>,
    pub streams: Vec<StreamSnapshot>,
}

impl EvaluatorSnapshot {
    /// Current snapshot version.
    pub const VERSION: u32 = 1;

    pub fn capture(evaluator: &Evaluator) -> Self {
        let mut streams: Vec<StreamSnapshot> = evaluator
            .streams()
            .iter()
            .map(|(node, stream)| StreamSnapshot {
                node: node.0,
                id: stream.id.to_string(),
                definition: stream.definition().name.to_string(),
                on: stream.is_on(),
                config: stream.config().iter().map(SerializedValue::from_value).collect(),
                history: stream
                    .history()
                    .iter()
                    .map(|(tick, value)| (*tick, SerializedValue::from_value(value)))
                    .collect(),
                cursor: stream.cursor(),
            })
            .collect();
        streams.sort_by_key(|stream| stream.node);
        Self {
            version: Self::VERSION,
            tick: evaluator.tick(),
            latest: evaluator.latest().map(SerializedValue::from_value),
            streams,
        }
    }

    /// Rebuild stream histories onto an evaluator whose catalog still knows
    /// every referenced definition.
    pub fn restore(&self, evaluator: &mut Evaluator) -> Result<(), EngineError> {
        for snapshot in &self.streams {
            let definition = evaluator
                .registry()
                .stream_definition(&snapshot.definition)
                .cloned()
                .ok_or_else(|| {
                    EngineError::UnknownStreamDefinition(snapshot.definition.clone())
                })?;
            let id = StreamId::from_string(&snapshot.id).ok_or_else(|| {
                EngineError::Snapshot(format!("bad stream id `{}`", snapshot.id))
            })?;
            let config = snapshot
                .config
                .iter()
                .map(SerializedValue::to_value)
                .collect::<Result<Vec<_>, _>>()?;
            let history = snapshot
                .history
                .iter()
                .map(|(tick, value)| Ok((*tick, value.to_value()?)))
                .collect::<Result<Vec<_>, EngineError>>()?;
            let stream = Stream::restore(id, definition, snapshot.on, config, history, snapshot.cursor);
            evaluator.restore_stream(NodeId(snapshot.node), stream);
        }
        evaluator.set_tick(self.tick);
        evaluator.set_latest(
            self.latest
                .as_ref()
                .map(SerializedValue::to_value)
                .transpose()?,
        );
        Ok(())
    }
}
