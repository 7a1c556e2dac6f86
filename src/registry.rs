//! The native/shared declaration catalog.
//!
//! A read-only, name-keyed lookup of native functions, shared values and
//! stream definitions. The catalog's contents belong to collaborators; the
//! engine only queries it, and it is always passed in explicitly, never
//! reached through process-wide state. `with_builtins` ships the small
//! default catalog the engine's own tests consume.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use rand::Rng;

use crate::analysis::types::{Type, Unit};
use crate::runtime::stream::{StreamDefinition, StreamInput};
use crate::runtime::value::{ExceptionKind, Value};
use crate::tree::NodeId;

/// The shape a member native is addressed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BaseType {
    None,
    Bool,
    Number,
    Text,
    List,
    Map,
    Structure,
    Table,
    Stream,
}

impl BaseType {
    pub fn of_type(ty: &Type) -> Option<BaseType> {
        match ty {
            Type::None => Some(BaseType::None),
            Type::Bool => Some(BaseType::Bool),
            Type::Number(_) => Some(BaseType::Number),
            Type::Text => Some(BaseType::Text),
            Type::List(_) => Some(BaseType::List),
            Type::Map(_, _) => Some(BaseType::Map),
            Type::Structure { .. } => Some(BaseType::Structure),
            Type::Table(_) => Some(BaseType::Table),
            Type::Stream(_) => Some(BaseType::Stream),
            _ => None,
        }
    }

    pub fn of_value(value: &Value) -> Option<BaseType> {
        match value {
            Value::None => Some(BaseType::None),
            Value::Bool(_) => Some(BaseType::Bool),
            Value::Number(_, _) => Some(BaseType::Number),
            Value::Text(_) => Some(BaseType::Text),
            Value::List(_) => Some(BaseType::List),
            Value::Map(_) => Some(BaseType::Map),
            Value::Structure(_) => Some(BaseType::Structure),
            Value::Stream(_) => Some(BaseType::Stream),
            Value::Exception(_) => None,
        }
    }
}

/// One invocation of a native function.
pub struct NativeCall<'a> {
    pub node: NodeId,
    pub subject: Option<&'a Value>,
    pub inputs: &'a [Value],
}

impl NativeCall<'_> {
    pub fn input(&self, position: usize) -> Value {
        self.inputs
            .get(position)
            .cloned()
            .unwrap_or(Value::exception(ExceptionKind::ExpectedValue, self.node))
    }
}

type NativeBody = Box<dyn Fn(&NativeCall) -> Value + Send + Sync>;

pub struct NativeFunction {
    pub name: Arc<str>,
    pub inputs: Vec<(Arc<str>, Type)>,
    pub output: Type,
    pub body: NativeBody,
}

impl NativeFunction {
    pub fn signature(&self) -> Type {
        Type::function(
            self.inputs.iter().map(|(_, ty)| ty.clone()).collect(),
            self.output.clone(),
        )
    }
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFunction")
            .field("name", &self.name)
            .field("inputs", &self.inputs)
            .field("output", &self.output)
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct Registry {
    functions: HashMap<Arc<str>, Arc<NativeFunction>>,
    members: HashMap<(BaseType, Arc<str>), Arc<NativeFunction>>,
    streams: HashMap<Arc<str>, Arc<StreamDefinition>>,
    shares: HashMap<Arc<str>, Value>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The default catalog: list/map/text members plus the time, button and
    /// random input streams.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_list_members();
        registry.register_map_members();
        registry.register_text_members();
        registry.register_stream(time_definition());
        registry.register_stream(button_definition());
        registry.register_stream(random_definition());
        registry
    }

    pub fn register_function(&mut self, function: NativeFunction) {
        self.functions
            .insert(function.name.clone(), Arc::new(function));
    }

    pub fn register_member(&mut self, base: BaseType, function: NativeFunction) {
        self.members
            .insert((base, function.name.clone()), Arc::new(function));
    }

    pub fn register_stream(&mut self, definition: StreamDefinition) {
        self.streams
            .insert(definition.name.clone(), Arc::new(definition));
    }

    pub fn register_share(&mut self, name: &str, value: Value) {
        self.shares.insert(Arc::from(name), value);
    }

    pub fn function(&self, name: &str) -> Option<&Arc<NativeFunction>> {
        self.functions.get(name)
    }

    pub fn member(&self, base: BaseType, name: &str) -> Option<&Arc<NativeFunction>> {
        self.members.get(&(base, Arc::from(name)))
    }

    pub fn stream_definition(&self, name: &str) -> Option<&Arc<StreamDefinition>> {
        self.streams.get(name)
    }

    pub fn shared(&self, name: &str) -> Option<&Value> {
        self.shares.get(name)
    }

    fn register_list_members(&mut self) {
        self.register_member(
            BaseType::List,
            NativeFunction {
                name: "add".into(),
                inputs: vec![("item".into(), Type::Any)],
                output: Type::list(Type::Any),
                body: Box::new(|call| {
                    expect_subject(call, BaseType::List, |subject| {
                        subject.appended(call.input(0))
                    })
                }),
            },
        );
        self.register_member(
            BaseType::List,
            NativeFunction {
                name: "length".into(),
                inputs: Vec::new(),
                output: Type::number(),
                body: Box::new(|call| {
                    expect_subject(call, BaseType::List, |subject| subject.length())
                }),
            },
        );
        self.register_member(
            BaseType::List,
            NativeFunction {
                name: "first".into(),
                inputs: Vec::new(),
                output: Type::union(Type::Any, Type::None),
                body: Box::new(|call| {
                    expect_subject(call, BaseType::List, |subject| subject.first())
                }),
            },
        );
        self.register_member(
            BaseType::List,
            NativeFunction {
                name: "last".into(),
                inputs: Vec::new(),
                output: Type::union(Type::Any, Type::None),
                body: Box::new(|call| expect_subject(call, BaseType::List, |subject| subject.last())),
            },
        );
        self.register_member(
            BaseType::List,
            NativeFunction {
                name: "reversed".into(),
                inputs: Vec::new(),
                output: Type::list(Type::Any),
                body: Box::new(|call| {
                    expect_subject(call, BaseType::List, |subject| subject.reversed())
                }),
            },
        );
    }

    fn register_map_members(&mut self) {
        self.register_member(
            BaseType::Map,
            NativeFunction {
                name: "set".into(),
                inputs: vec![("key".into(), Type::Any), ("value".into(), Type::Any)],
                output: Type::map(Type::Any, Type::Any),
                body: Box::new(|call| {
                    expect_subject(call, BaseType::Map, |subject| {
                        subject.with_entry(call.input(0), call.input(1))
                    })
                }),
            },
        );
        self.register_member(
            BaseType::Map,
            NativeFunction {
                name: "unset".into(),
                inputs: vec![("key".into(), Type::Any)],
                output: Type::map(Type::Any, Type::Any),
                body: Box::new(|call| {
                    expect_subject(call, BaseType::Map, |subject| {
                        subject.without_key(&call.input(0))
                    })
                }),
            },
        );
        self.register_member(
            BaseType::Map,
            NativeFunction {
                name: "remove".into(),
                inputs: vec![("value".into(), Type::Any)],
                output: Type::map(Type::Any, Type::Any),
                body: Box::new(|call| {
                    expect_subject(call, BaseType::Map, |subject| {
                        subject.without_value(&call.input(0))
                    })
                }),
            },
        );
    }

    fn register_text_members(&mut self) {
        self.register_member(
            BaseType::Text,
            NativeFunction {
                name: "length".into(),
                inputs: Vec::new(),
                output: Type::number(),
                body: Box::new(|call| {
                    expect_subject(call, BaseType::Text, |subject| subject.length())
                }),
            },
        );
    }
}

fn expect_subject(
    call: &NativeCall,
    base: BaseType,
    operation: impl Fn(&Value) -> Option<Value>,
) -> Value {
    let kind = match base {
        BaseType::List => ExceptionKind::ExpectedList,
        BaseType::Map => ExceptionKind::ExpectedMap,
        BaseType::Number => ExceptionKind::ExpectedNumber,
        _ => ExceptionKind::ExpectedValue,
    };
    match call.subject {
        Some(subject) => operation(subject).unwrap_or(Value::exception(kind, call.node)),
        None => Value::exception(kind, call.node),
    }
}

/// Timer ticks, in milliseconds.
fn time_definition() -> StreamDefinition {
    StreamDefinition {
        name: "time".into(),
        inputs: Vec::new(),
        value_type: Type::Number(Unit::of("ms")),
        initial: Box::new(|_| Value::number_with_unit(0.0, "ms")),
        react: Box::new(|_, raw| {
            raw.as_number()
                .map(|elapsed| Value::number_with_unit(elapsed, "ms"))
        }),
        sample: None,
    }
}

/// Input toggle. The optional `down` configuration filters which edges are
/// recorded; unconfigured buttons record both.
fn button_definition() -> StreamDefinition {
    StreamDefinition {
        name: "button".into(),
        inputs: vec![StreamInput {
            name: "down".into(),
            ty: Type::union(Type::Bool, Type::None),
            default: Some(Value::None),
        }],
        value_type: Type::Bool,
        initial: Box::new(|_| Value::bool(true)),
        react: Box::new(|config, raw| {
            let down = raw.as_bool()?;
            match config.first() {
                Some(Value::Bool(wanted)) if *wanted != down => None,
                _ => Some(Value::bool(down)),
            }
        }),
        sample: None,
    }
}

/// Random draws. Continuously sampling: reading it at the present records a
/// fresh draw without waking the evaluator.
fn random_definition() -> StreamDefinition {
    StreamDefinition {
        name: "random".into(),
        inputs: vec![
            StreamInput {
                name: "min".into(),
                ty: Type::union(Type::number(), Type::None),
                default: Some(Value::None),
            },
            StreamInput {
                name: "max".into(),
                ty: Type::union(Type::number(), Type::None),
                default: Some(Value::None),
            },
        ],
        value_type: Type::number(),
        initial: Box::new(draw),
        react: Box::new(|_, _| None),
        sample: Some(Box::new(draw)),
    }
}

fn draw(config: &[Value]) -> Value {
    let min = config.first().and_then(Value::as_number);
    let max = config.get(1).and_then(Value::as_number);
    let roll: f64 = rand::thread_rng().gen_range(0.0..1.0);
    let drawn = match (min, max) {
        // No range: [0, 1).
        (None, None) => roll,
        (None, Some(max)) => roll * max,
        (Some(min), None) => roll * min,
        // Both bounds: integer in [min, max].
        (Some(min), Some(max)) => {
            let min = min.ceil();
            let max = max.floor();
            (roll * (max - min + 1.0)).floor() + min
        }
    };
    Value::number(drawn)
}
