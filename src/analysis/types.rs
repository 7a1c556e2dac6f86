//! The type lattice used by resolution and conflict detection.

use std::fmt;
use std::sync::Arc;

/// Unit tag on a number. The empty unit is unitless.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Unit(Arc<str>);

impl Unit {
    pub fn none() -> Self {
        Self(Arc::from(""))
    }

    pub fn of(unit: &str) -> Self {
        Self(Arc::from(unit))
    }

    pub fn is_none(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Why a type could not be computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnknownReason {
    /// The node was re-entered while its own type was being computed.
    Cycle,
    /// A referenced name had no lexical or catalog definition.
    Unresolved,
    /// The node carries no type information (e.g. a valueless bind).
    Missing,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Type {
    Bool,
    Number(Unit),
    Text,
    None,
    List(Box<Type>),
    Map(Box<Type>, Box<Type>),
    Structure {
        name: Arc<str>,
        fields: Vec<(Arc<str>, Type)>,
    },
    Stream(Box<Type>),
    Function {
        inputs: Vec<Type>,
        output: Box<Type>,
    },
    Table(Vec<(Arc<str>, Type)>),
    Union(Box<Type>, Box<Type>),
    /// Catalog wildcard: accepts anything resolvable.
    Any,
    Unknown(UnknownReason),
}

impl Type {
    pub fn list(item: Type) -> Self {
        Type::List(Box::new(item))
    }

    pub fn map(key: Type, value: Type) -> Self {
        Type::Map(Box::new(key), Box::new(value))
    }

    pub fn stream(value: Type) -> Self {
        Type::Stream(Box::new(value))
    }

    pub fn function(inputs: Vec<Type>, output: Type) -> Self {
        Type::Function {
            inputs,
            output: Box::new(output),
        }
    }

    pub fn union(a: Type, b: Type) -> Self {
        if a.accepts(&b) {
            a
        } else if b.accepts(&a) {
            b
        } else {
            Type::Union(Box::new(a), Box::new(b))
        }
    }

    pub fn number() -> Self {
        Type::Number(Unit::none())
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Type::Unknown(_))
    }

    /// Whether a value of type `other` is acceptable where `self` is expected.
    /// Unknown accepts nothing and is accepted by nothing.
    pub fn accepts(&self, other: &Type) -> bool {
        match (self, other) {
            (Type::Unknown(_), _) | (_, Type::Unknown(_)) => false,
            (Type::Any, _) => true,
            (_, Type::Union(a, b)) => self.accepts(a) && self.accepts(b),
            (Type::Union(a, b), _) => a.accepts(other) || b.accepts(other),
            (Type::Bool, Type::Bool) => true,
            (Type::Number(unit), Type::Number(other_unit)) => unit == other_unit,
            (Type::Text, Type::Text) => true,
            (Type::None, Type::None) => true,
            (Type::List(item), Type::List(other_item)) => item.accepts(other_item),
            (Type::Map(key, value), Type::Map(other_key, other_value)) => {
                key.accepts(other_key) && value.accepts(other_value)
            }
            // Structures are nominal.
            (Type::Structure { name, .. }, Type::Structure { name: other, .. }) => name == other,
            (Type::Stream(value), Type::Stream(other_value)) => value.accepts(other_value),
            (
                Type::Function { inputs, output },
                Type::Function {
                    inputs: other_inputs,
                    output: other_output,
                },
            ) => {
                inputs.len() == other_inputs.len()
                    && inputs
                        .iter()
                        .zip(other_inputs)
                        .all(|(input, other)| input.accepts(other))
                    && output.accepts(other_output)
            }
            (Type::Table(columns), Type::Table(other_columns)) => {
                columns.len() == other_columns.len()
                    && columns.iter().zip(other_columns).all(
                        |((name, column), (other_name, other_column))| {
                            name == other_name && column.accepts(other_column)
                        },
                    )
            }
            _ => false,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Bool => f.write_str("?"),
            Type::Number(unit) => write!(f, "#{unit}"),
            Type::Text => f.write_str("''"),
            Type::None => f.write_str("ø"),
            Type::List(item) => write!(f, "[{item}]"),
            Type::Map(key, value) => write!(f, "{{{key}:{value}}}"),
            Type::Structure { name, .. } => f.write_str(name),
            Type::Stream(value) => write!(f, "…{value}"),
            Type::Function { inputs, output } => {
                f.write_str("ƒ(")?;
                for (position, input) in inputs.iter().enumerate() {
                    if position > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{input}")?;
                }
                write!(f, ") {output}")
            }
            Type::Table(columns) => {
                f.write_str("⎡")?;
                for (position, (name, column)) in columns.iter().enumerate() {
                    if position > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{name}•{column}")?;
                }
                f.write_str("⎦")
            }
            Type::Union(a, b) => write!(f, "{a}|{b}"),
            Type::Any => f.write_str("*"),
            Type::Unknown(reason) => match reason {
                UnknownReason::Cycle => f.write_str("!cycle"),
                UnknownReason::Unresolved => f.write_str("!unresolved"),
                UnknownReason::Missing => f.write_str("!missing"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unions_accept_either_side() {
        let union = Type::union(Type::Bool, Type::None);
        assert!(union.accepts(&Type::Bool));
        assert!(union.accepts(&Type::None));
        assert!(!union.accepts(&Type::Text));
    }

    #[test]
    fn numbers_require_matching_units() {
        let ms = Type::Number(Unit::of("ms"));
        assert!(ms.accepts(&Type::Number(Unit::of("ms"))));
        assert!(!ms.accepts(&Type::number()));
    }

    #[test]
    fn unknown_is_accepted_by_nothing() {
        assert!(!Type::Any.accepts(&Type::Unknown(UnknownReason::Cycle)));
        assert!(!Type::Unknown(UnknownReason::Cycle).accepts(&Type::Bool));
    }
}
