//! Immutable runtime values.
//!
//! Every value supports structural equality and a canonical textual form.
//! Failures are ordinary values: an `Exception` propagates up the value
//! stack like any result until the driver observes it.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use indexmap::IndexMap;
use ordered_float::OrderedFloat;

use crate::analysis::types::{Type, Unit, UnknownReason};
use crate::runtime::stream::StreamId;
use crate::tree::NodeId;

/// A named-field record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructureValue {
    pub name: Arc<str>,
    pub fields: IndexMap<Arc<str>, Value>,
}

/// An impossible state observed by a step.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Exception {
    pub kind: ExceptionKind,
    pub node: NodeId,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ExceptionKind {
    UnresolvedName(Arc<str>),
    ExpectedBoolean,
    /// A bind was evaluated with no value supplied.
    ExpectedValue,
    UnknownProperty(Arc<str>),
    ExpectedList,
    ExpectedMap,
    ExpectedNumber,
    ExpectedStructure,
    ExpectedFunction,
    ExpectedStream,
}

impl ExceptionKind {
    pub fn label(&self) -> &'static str {
        match self {
            ExceptionKind::UnresolvedName(_) => "unresolved-name",
            ExceptionKind::ExpectedBoolean => "expected-boolean",
            ExceptionKind::ExpectedValue => "expected-value",
            ExceptionKind::UnknownProperty(_) => "unknown-property",
            ExceptionKind::ExpectedList => "expected-list",
            ExceptionKind::ExpectedMap => "expected-map",
            ExceptionKind::ExpectedNumber => "expected-number",
            ExceptionKind::ExpectedStructure => "expected-structure",
            ExceptionKind::ExpectedFunction => "expected-function",
            ExceptionKind::ExpectedStream => "expected-stream",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    None,
    Bool(bool),
    /// Unit-carrying number with total ordering.
    Number(OrderedFloat<f64>, Unit),
    Text(Arc<str>),
    /// Ordered list.
    List(Arc<Vec<Value>>),
    /// Key-unique map preserving insertion order.
    Map(Arc<IndexMap<Value, Value>>),
    Structure(Arc<StructureValue>),
    /// Handle to a live stream; sampled at reference sites.
    Stream(StreamId),
    Exception(Arc<Exception>),
}

impl Value {
    pub fn bool(value: bool) -> Self {
        Value::Bool(value)
    }

    pub fn number(value: f64) -> Self {
        Value::Number(OrderedFloat(value), Unit::none())
    }

    pub fn number_with_unit(value: f64, unit: &str) -> Self {
        Value::Number(OrderedFloat(value), Unit::of(unit))
    }

    pub fn text(value: impl Into<Arc<str>>) -> Self {
        Value::Text(value.into())
    }

    pub fn list(items: impl IntoIterator<Item = Value>) -> Self {
        Value::List(Arc::new(items.into_iter().collect()))
    }

    pub fn map(entries: impl IntoIterator<Item = (Value, Value)>) -> Self {
        Value::Map(Arc::new(entries.into_iter().collect()))
    }

    pub fn structure(
        name: impl Into<Arc<str>>,
        fields: impl IntoIterator<Item = (impl Into<Arc<str>>, Value)>,
    ) -> Self {
        Value::Structure(Arc::new(StructureValue {
            name: name.into(),
            fields: fields
                .into_iter()
                .map(|(field, value)| (field.into(), value))
                .collect(),
        }))
    }

    pub fn exception(kind: ExceptionKind, node: NodeId) -> Self {
        Value::Exception(Arc::new(Exception { kind, node }))
    }

    pub fn is_exception(&self) -> bool {
        matches!(self, Value::Exception(_))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(value, _) => Some(value.0),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&IndexMap<Value, Value>> {
        match self {
            Value::Map(entries) => Some(entries),
            _ => None,
        }
    }

    pub fn as_structure(&self) -> Option<&StructureValue> {
        match self {
            Value::Structure(structure) => Some(structure),
            _ => None,
        }
    }

    pub fn get_field(&self, name: &str) -> Option<&Value> {
        self.as_structure()?.fields.get(name)
    }

    /// The static type this value inhabits.
    pub fn type_of(&self) -> Type {
        match self {
            Value::None => Type::None,
            Value::Bool(_) => Type::Bool,
            Value::Number(_, unit) => Type::Number(unit.clone()),
            Value::Text(_) => Type::Text,
            Value::List(items) => {
                let item = items
                    .iter()
                    .map(Value::type_of)
                    .reduce(Type::union)
                    .unwrap_or(Type::Any);
                Type::list(item)
            }
            Value::Map(entries) => {
                let key = entries
                    .keys()
                    .map(Value::type_of)
                    .reduce(Type::union)
                    .unwrap_or(Type::Any);
                let value = entries
                    .values()
                    .map(Value::type_of)
                    .reduce(Type::union)
                    .unwrap_or(Type::Any);
                Type::map(key, value)
            }
            Value::Structure(structure) => Type::Structure {
                name: structure.name.clone(),
                fields: structure
                    .fields
                    .iter()
                    .map(|(field, value)| (field.clone(), value.type_of()))
                    .collect(),
            },
            Value::Stream(_) => Type::stream(Type::Any),
            Value::Exception(_) => Type::Unknown(UnknownReason::Missing),
        }
    }

    /// Canonical textual form.
    pub fn to_text(&self) -> String {
        match self {
            Value::None => "ø".to_string(),
            Value::Bool(true) => "⊤".to_string(),
            Value::Bool(false) => "⊥".to_string(),
            Value::Number(value, unit) => format!("{}{unit}", value.0),
            Value::Text(text) => format!("\"{text}\""),
            Value::List(items) => {
                let parts: Vec<String> = items.iter().map(Value::to_text).collect();
                format!("[{}]", parts.join(" "))
            }
            Value::Map(entries) => {
                if entries.is_empty() {
                    return "{:}".to_string();
                }
                let parts: Vec<String> = entries
                    .iter()
                    .map(|(key, value)| format!("{}:{}", key.to_text(), value.to_text()))
                    .collect();
                format!("{{{}}}", parts.join(" "))
            }
            Value::Structure(structure) => {
                let parts: Vec<String> = structure
                    .fields
                    .iter()
                    .map(|(field, value)| format!("{field}: {}", value.to_text()))
                    .collect();
                format!("{}({})", structure.name, parts.join(" "))
            }
            Value::Stream(id) => format!("…{id}"),
            Value::Exception(exception) => format!("!{}", exception.kind.label()),
        }
    }
}

// Maps compare order-insensitively, so their hash folds entry hashes with an
// order-independent combine.
impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::None => {}
            Value::Bool(value) => value.hash(state),
            Value::Number(value, unit) => {
                value.hash(state);
                unit.hash(state);
            }
            Value::Text(text) => text.hash(state),
            Value::List(items) => {
                for item in items.iter() {
                    item.hash(state);
                }
            }
            Value::Map(entries) => {
                let mut combined: u64 = 0;
                for entry in entries.iter() {
                    let mut entry_state = std::hash::DefaultHasher::new();
                    entry.hash(&mut entry_state);
                    combined ^= entry_state.finish();
                }
                combined.hash(state);
            }
            Value::Structure(structure) => {
                structure.name.hash(state);
                let mut combined: u64 = 0;
                for field in structure.fields.iter() {
                    let mut field_state = std::hash::DefaultHasher::new();
                    field.hash(&mut field_state);
                    combined ^= field_state.finish();
                }
                combined.hash(state);
            }
            Value::Stream(id) => id.hash(state),
            Value::Exception(exception) => exception.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

/// List and map operations. All referentially pure: the receiver is never
/// mutated, new values share unchanged parts. `None` means the receiver had
/// the wrong shape; the caller raises the matching exception.
impl Value {
    /// 1-based access: zero is absence, negatives wrap from the end, indexes
    /// past either end clamp to the nearest element.
    pub fn item_at(&self, index: f64) -> Option<Value> {
        let items = self.as_list()?;
        let length = items.len() as i64;
        // Clamp before the cast so extreme indexes cannot overflow negation.
        let index = index.trunc().clamp(-1e15, 1e15) as i64;
        let item = if length == 0 || index == 0 {
            Value::None
        } else if index < 0 {
            let back = (-index - 1) % length;
            items[(length - 1 - back) as usize].clone()
        } else if index > length {
            items[(length - 1) as usize].clone()
        } else {
            items[(index - 1) as usize].clone()
        };
        Some(item)
    }

    pub fn appended(&self, item: Value) -> Option<Value> {
        let items = self.as_list()?;
        let mut next = items.to_vec();
        next.push(item);
        Some(Value::List(Arc::new(next)))
    }

    pub fn length(&self) -> Option<Value> {
        match self {
            Value::List(items) => Some(Value::number(items.len() as f64)),
            Value::Text(text) => Some(Value::number(text.chars().count() as f64)),
            _ => None,
        }
    }

    pub fn first(&self) -> Option<Value> {
        let items = self.as_list()?;
        Some(items.first().cloned().unwrap_or(Value::None))
    }

    pub fn last(&self) -> Option<Value> {
        let items = self.as_list()?;
        Some(items.last().cloned().unwrap_or(Value::None))
    }

    pub fn reversed(&self) -> Option<Value> {
        let items = self.as_list()?;
        Some(Value::list(items.iter().rev().cloned()))
    }

    /// Map set: replaces an existing key in place, appends a new one.
    pub fn with_entry(&self, key: Value, value: Value) -> Option<Value> {
        let mut next = self.as_map()?.clone();
        next.insert(key, value);
        Some(Value::Map(Arc::new(next)))
    }

    /// Map unset: removes only the given key, preserving order.
    pub fn without_key(&self, key: &Value) -> Option<Value> {
        let mut next = self.as_map()?.clone();
        next.shift_remove(key);
        Some(Value::Map(Arc::new(next)))
    }

    /// Map remove: drops every entry carrying the given value.
    pub fn without_value(&self, value: &Value) -> Option<Value> {
        let entries = self.as_map()?;
        Some(Value::map(
            entries
                .iter()
                .filter(|(_, entry)| *entry != value)
                .map(|(key, entry)| (key.clone(), entry.clone())),
        ))
    }

    /// Keeps matching entries in original key order.
    pub fn filtered(&self, keep: impl Fn(&Value, &Value) -> bool) -> Option<Value> {
        let entries = self.as_map()?;
        Some(Value::map(
            entries
                .iter()
                .filter(|(key, value)| keep(key, value))
                .map(|(key, value)| (key.clone(), value.clone())),
        ))
    }

    /// Transforms every entry's value in original key order.
    pub fn translated(&self, transform: impl Fn(&Value, &Value) -> Value) -> Option<Value> {
        let entries = self.as_map()?;
        Some(Value::map(
            entries
                .iter()
                .map(|(key, value)| (key.clone(), transform(key, value))),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_equality_ignores_insertion_order() {
        let a = Value::map([
            (Value::number(1.0), Value::text("a")),
            (Value::number(2.0), Value::text("b")),
        ]);
        let b = Value::map([
            (Value::number(2.0), Value::text("b")),
            (Value::number(1.0), Value::text("a")),
        ]);
        assert_eq!(a, b);

        let mut a_state = std::hash::DefaultHasher::new();
        let mut b_state = std::hash::DefaultHasher::new();
        a.hash(&mut a_state);
        b.hash(&mut b_state);
        assert_eq!(a_state.finish(), b_state.finish());
    }

    #[test]
    fn canonical_text_forms() {
        assert_eq!(Value::None.to_text(), "ø");
        assert_eq!(Value::bool(true).to_text(), "⊤");
        assert_eq!(Value::number_with_unit(5.0, "m").to_text(), "5m");
        assert_eq!(
            Value::list([Value::number(1.0), Value::number(2.0)]).to_text(),
            "[1 2]"
        );
        assert_eq!(Value::map([]).to_text(), "{:}");
        assert_eq!(
            Value::map([(Value::number(1.0), Value::text("a"))]).to_text(),
            "{1:\"a\"}"
        );
    }
}
