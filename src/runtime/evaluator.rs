//! The stack machine.
//!
//! Executes a compiled step sequence, integrating stream histories and
//! supporting rewind. Exactly one instruction sequence executes at a time;
//! external events arrive through a single ordered queue and are folded in
//! between steps, never during one.

use std::collections::HashMap;
use std::sync::Arc;

use futures_channel::mpsc::{UnboundedReceiver, UnboundedSender, unbounded};
use tracing::{debug, trace};

use crate::analysis::conflict::{Conflict, program_conflicts};
use crate::analysis::context::Context;
use crate::compiler::{Step, compile};
use crate::error::EngineError;
use crate::registry::{BaseType, NativeCall, Registry};
use crate::runtime::stream::{Stream, StreamDefinition, StreamId};
use crate::runtime::value::{ExceptionKind, Value};
use crate::tree::{NodeArena, NodeId, NodeKind};

/// A program as reconstructed by the persistence collaborator: declared
/// names plus a built tree.
#[derive(Debug, Clone)]
pub struct Source {
    pub names: Arc<str>,
    pub arena: NodeArena,
    pub root: NodeId,
}

impl Source {
    pub fn new(names: &str, arena: NodeArena, root: NodeId) -> Self {
        Self {
            names: names.into(),
            arena,
            root,
        }
    }
}

/// How many instructions one external request dispatches. The state machine
/// itself is mode-agnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Run to completion or suspension.
    Play,
    /// Single-instruction stepping.
    Step,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EvaluatorState {
    Running,
    /// A step observed an impossible state; this run is over, the process
    /// is not.
    Halted(Value),
    Finished,
}

/// An external event: appends to exactly one stream's history, or requests
/// the evaluator to advance.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    Append {
        stream: StreamId,
        value: Value,
        silent: bool,
    },
    Advance,
}

pub type EventSender = UnboundedSender<EngineEvent>;

/// One execution frame: a scope's name bindings plus the value-stack depth
/// at entry.
#[derive(Debug, Clone)]
pub struct Frame {
    pub node: NodeId,
    pub bindings: HashMap<Arc<str>, Value>,
    base: usize,
}

impl Frame {
    fn new(node: NodeId, base: usize) -> Self {
        Self {
            node,
            bindings: HashMap::new(),
            base,
        }
    }
}

/// A recorded (instruction pointer, value stack, frames) snapshot, one per
/// dispatched step. Rewinding restores these in reverse.
#[derive(Debug, Clone)]
struct Moment {
    ip: usize,
    stack: Vec<Value>,
    frames: Vec<Frame>,
    tick: u64,
}

pub struct Evaluator {
    source: Source,
    registry: Arc<Registry>,
    steps: Vec<Step>,
    ip: usize,
    stack: Vec<Value>,
    frames: Vec<Frame>,
    state: EvaluatorState,
    mode: Mode,
    /// The tick the machine is executing at; restored by rewinds.
    tick: u64,
    /// The highest tick ever started; appends always land in the present.
    present_tick: u64,
    /// Live streams, keyed by their defining node: the activation key.
    streams: HashMap<NodeId, Stream>,
    /// Replay cursor; `None` is the present.
    cursor: Option<u64>,
    history: Vec<Moment>,
    events: UnboundedReceiver<EngineEvent>,
    sender: EventSender,
    pending_wake: bool,
    latest: Option<Value>,
}

impl Evaluator {
    pub fn new(source: Source, registry: Arc<Registry>) -> Self {
        let steps = compile(&source.arena, source.root);
        let (sender, events) = unbounded();
        Self {
            source,
            registry,
            steps,
            ip: 0,
            stack: Vec::new(),
            frames: Vec::new(),
            state: EvaluatorState::Finished,
            mode: Mode::Play,
            tick: 0,
            present_tick: 0,
            streams: HashMap::new(),
            cursor: None,
            history: Vec::new(),
            events,
            sender,
            pending_wake: false,
            latest: None,
        }
    }

    pub fn source(&self) -> &Source {
        &self.source
    }

    /// Insertion access for the editor collaborator: replacement nodes must
    /// live in the program's own arena before [`Evaluator::replace`].
    pub fn arena_mut(&mut self) -> &mut NodeArena {
        &mut self.source.arena
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn state(&self) -> &EvaluatorState {
        &self.state
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// The result of the most recent run, failure values included.
    pub fn latest(&self) -> Option<&Value> {
        self.latest.as_ref()
    }

    pub fn is_in_past(&self) -> bool {
        self.cursor.is_some()
    }

    pub fn cursor(&self) -> Option<u64> {
        self.cursor
    }

    /// Handle for external producers to post events through.
    pub fn event_sender(&self) -> EventSender {
        self.sender.clone()
    }

    pub fn stream(&self, id: StreamId) -> Option<&Stream> {
        self.streams.values().find(|stream| stream.id == id)
    }

    pub fn stream_at(&self, node: NodeId) -> Option<&Stream> {
        self.streams.get(&node)
    }

    /// Static diagnostics for the current tree, computed with a fresh
    /// per-pass context.
    pub fn conflicts(&self) -> Vec<Conflict> {
        let context = Context::new(&self.source.arena, self.source.root, &self.registry);
        program_conflicts(&context)
    }

    /// Begin a run; in play mode, run it to completion or suspension.
    pub fn start(&mut self) {
        self.begin_run();
        if self.mode == Mode::Play {
            self.run();
        }
    }

    /// Begin a run and drive it to its end regardless of mode.
    pub fn evaluate(&mut self) -> Value {
        self.begin_run();
        self.run();
        self.latest.clone().unwrap_or(Value::None)
    }

    fn begin_run(&mut self) {
        self.tick = self.present_tick + 1;
        self.present_tick = self.tick;
        self.ip = 0;
        self.stack.clear();
        self.frames.clear();
        self.frames.push(Frame::new(self.source.root, 0));
        self.state = EvaluatorState::Running;
        debug!(tick = self.tick, "run started");
    }

    fn run(&mut self) {
        while matches!(self.state, EvaluatorState::Running) {
            self.step();
        }
    }

    /// Dispatch a single instruction.
    pub fn step(&mut self) -> &EvaluatorState {
        if !matches!(self.state, EvaluatorState::Running) {
            return &self.state;
        }
        if self.ip >= self.steps.len() {
            self.finish_run();
            return &self.state;
        }
        self.history.push(Moment {
            ip: self.ip,
            stack: self.stack.clone(),
            frames: self.frames.clone(),
            tick: self.tick,
        });
        let step = self.steps[self.ip].clone();
        trace!(ip = self.ip, ?step, "dispatch");
        self.ip += 1;
        match step {
            Step::Start(node) => self.node_start(node),
            Step::Finish(node) => self.node_finish(node),
            Step::StartFinish(node) => {
                self.node_start(node);
                self.node_finish(node);
            }
            Step::Jump { count, .. } => {
                self.ip += count;
            }
            Step::JumpIf {
                count,
                peek,
                yes,
                node,
            } => {
                let value = if peek {
                    self.stack.last().cloned()
                } else {
                    self.stack.pop()
                };
                match value {
                    Some(Value::Bool(test)) => {
                        if test == yes {
                            self.ip += count;
                        }
                    }
                    Some(_) => self.halt(Value::exception(ExceptionKind::ExpectedBoolean, node)),
                    None => self.halt(Value::exception(ExceptionKind::ExpectedValue, node)),
                }
            }
            Step::Halt { exception, .. } => {
                self.halt(Value::Exception(Arc::new(exception)));
            }
        }
        if matches!(self.state, EvaluatorState::Running) && self.ip >= self.steps.len() {
            self.finish_run();
        }
        &self.state
    }

    fn finish_run(&mut self) {
        let result = self.stack.pop().unwrap_or(Value::None);
        debug!(tick = self.tick, result = %result, "run finished");
        self.state = if result.is_exception() {
            EvaluatorState::Halted(result.clone())
        } else {
            EvaluatorState::Finished
        };
        self.latest = Some(result);
    }

    fn halt(&mut self, exception: Value) {
        debug!(tick = self.tick, failure = %exception, "run halted");
        self.state = EvaluatorState::Halted(exception.clone());
        self.latest = Some(exception);
    }

    fn node_start(&mut self, node: NodeId) {
        if let Some(NodeKind::Block { .. }) = self.source.arena.kind(node) {
            self.frames.push(Frame::new(node, self.stack.len()));
        }
    }

    fn node_finish(&mut self, node: NodeId) {
        let Some(kind) = self.source.arena.kind(node).cloned() else {
            return self.halt(Value::exception(ExceptionKind::ExpectedValue, node));
        };
        match kind {
            NodeKind::Literal { value } => self.stack.push(value),
            NodeKind::Name { .. } => self.stack.push(Value::None),
            NodeKind::Reference { name } => match self.resolve_value(&name, node) {
                Ok(value) => self.stack.push(value),
                Err(exception) => self.halt(exception),
            },
            NodeKind::Block { statements, .. } => {
                let base = self.frames.pop().map(|frame| frame.base).unwrap_or(0);
                let ends_with_bind = matches!(
                    statements.last().and_then(|last| self.source.arena.kind(*last)),
                    Some(NodeKind::Bind { .. }) | None
                );
                let result = if !ends_with_bind && self.stack.len() > base {
                    self.stack.pop().unwrap_or(Value::None)
                } else {
                    Value::None
                };
                self.stack.truncate(base);
                self.stack.push(result);
            }
            NodeKind::Bind { names, .. } => {
                let Some(value) = self.stack.pop() else {
                    return self.halt(Value::exception(ExceptionKind::ExpectedValue, node));
                };
                let texts: Vec<Arc<str>> = names
                    .iter()
                    .filter_map(|name| match self.source.arena.kind(*name) {
                        Some(NodeKind::Name { text }) => Some(text.clone()),
                        _ => None,
                    })
                    .collect();
                if let Some(frame) = self.frames.last_mut() {
                    for text in texts {
                        frame.bindings.insert(text, value.clone());
                    }
                }
            }
            NodeKind::Conditional { .. } => {
                // The branch left its value on the stack; the jumps did the
                // selection.
            }
            NodeKind::ListLiteral { items } => {
                let values = self.pop_operands(items.len());
                self.stack.push(Value::list(values));
            }
            NodeKind::MapLiteral { keys, .. } => {
                let mut flat = self.pop_operands(keys.len() * 2);
                let mut entries = Vec::with_capacity(keys.len());
                while flat.len() >= 2 {
                    let value = flat.pop().unwrap_or(Value::None);
                    let key = flat.pop().unwrap_or(Value::None);
                    entries.push((key, value));
                }
                entries.reverse();
                self.stack.push(Value::map(entries));
            }
            NodeKind::StructureLiteral {
                name,
                field_names,
                field_values,
            } => {
                let values = self.pop_operands(field_values.len());
                let fields = field_names
                    .iter()
                    .filter_map(|field| match self.source.arena.kind(*field) {
                        Some(NodeKind::Name { text }) => Some(text.clone()),
                        _ => None,
                    })
                    .zip(values);
                self.stack.push(Value::structure(name, fields));
            }
            NodeKind::TableLiteral { columns, rows } => {
                let row_values = self.pop_operands(rows.len());
                let column_names: Vec<Arc<str>> = columns
                    .iter()
                    .filter_map(|column| match self.source.arena.kind(*column) {
                        Some(NodeKind::Bind { names, .. }) => {
                            names
                                .first()
                                .and_then(|name| match self.source.arena.kind(*name) {
                                    Some(NodeKind::Name { text }) => Some(text.clone()),
                                    _ => None,
                                })
                        }
                        _ => None,
                    })
                    .collect();
                let structures = row_values.into_iter().map(|row| {
                    let cells = match row {
                        Value::List(cells) => cells.to_vec(),
                        other => vec![other],
                    };
                    Value::structure(
                        "row",
                        column_names.iter().cloned().zip(cells),
                    )
                });
                self.stack.push(Value::list(structures.collect::<Vec<_>>()));
            }
            NodeKind::Row { cells } => {
                let values = self.pop_operands(cells.len());
                self.stack.push(Value::list(values));
            }
            NodeKind::PropertyReference { property, .. } => {
                let Some(subject) = self.stack.pop() else {
                    return self.halt(Value::exception(ExceptionKind::ExpectedValue, node));
                };
                let subject = self.sampled(subject, node);
                match subject.get_field(&property) {
                    Some(field) => {
                        let field = field.clone();
                        self.stack.push(field);
                    }
                    None => self.halt(Value::exception(
                        ExceptionKind::UnknownProperty(property),
                        node,
                    )),
                }
            }
            NodeKind::ListAccess { .. } => {
                let index = self.stack.pop();
                let list = self.stack.pop();
                let Some(index) = index.and_then(|value| value.as_number()) else {
                    return self.halt(Value::exception(ExceptionKind::ExpectedNumber, node));
                };
                let list = match list {
                    Some(list) => self.sampled(list, node),
                    None => return self.halt(Value::exception(ExceptionKind::ExpectedList, node)),
                };
                match list.item_at(index) {
                    Some(item) => self.stack.push(item),
                    None => self.halt(Value::exception(ExceptionKind::ExpectedList, node)),
                }
            }
            NodeKind::Evaluate { callee, inputs } => {
                let arguments = self.pop_operands(inputs.len());
                match self.source.arena.kind(callee).cloned() {
                    Some(NodeKind::PropertyReference { property, .. }) => {
                        let Some(subject) = self.stack.pop() else {
                            return self
                                .halt(Value::exception(ExceptionKind::ExpectedValue, node));
                        };
                        let subject = self.sampled(subject, node);
                        let Some(base) = BaseType::of_value(&subject) else {
                            return self
                                .halt(Value::exception(ExceptionKind::ExpectedValue, node));
                        };
                        let Some(member) = self.registry.member(base, &property).cloned() else {
                            return self.halt(Value::exception(
                                ExceptionKind::UnresolvedName(property),
                                node,
                            ));
                        };
                        let result = (member.body)(&NativeCall {
                            node,
                            subject: Some(&subject),
                            inputs: &arguments,
                        });
                        if result.is_exception() {
                            self.halt(result);
                        } else {
                            self.stack.push(result);
                        }
                    }
                    Some(NodeKind::Reference { name }) => {
                        let Some(function) = self.registry.function(&name).cloned() else {
                            return self.halt(Value::exception(
                                ExceptionKind::UnresolvedName(name),
                                node,
                            ));
                        };
                        let result = (function.body)(&NativeCall {
                            node,
                            subject: None,
                            inputs: &arguments,
                        });
                        if result.is_exception() {
                            self.halt(result);
                        } else {
                            self.stack.push(result);
                        }
                    }
                    _ => self.halt(Value::exception(ExceptionKind::ExpectedFunction, node)),
                }
            }
            NodeKind::StreamExpression { definition, inputs } => {
                let provided = self.pop_operands(inputs.len());
                let Some(found) = self.registry.stream_definition(&definition).cloned() else {
                    return self.halt(Value::exception(
                        ExceptionKind::UnresolvedName(definition),
                        node,
                    ));
                };
                let config = Self::configuration(&found, provided);
                let id = self.ensure_stream(node, found, config);
                self.stack.push(Value::Stream(id));
            }
        }
    }

    /// Pop `count` operands, restoring their evaluation order.
    fn pop_operands(&mut self, count: usize) -> Vec<Value> {
        let keep = self.stack.len().saturating_sub(count);
        self.stack.split_off(keep)
    }

    /// Fill missing configuration inputs from the definition's defaults.
    fn configuration(definition: &StreamDefinition, provided: Vec<Value>) -> Vec<Value> {
        definition
            .inputs
            .iter()
            .enumerate()
            .map(|(position, input)| {
                provided
                    .get(position)
                    .cloned()
                    .or_else(|| input.default.clone())
                    .unwrap_or(Value::None)
            })
            .collect()
    }

    /// The activation contract: construct once per defining node, route
    /// revised configuration through the update path afterwards.
    fn ensure_stream(
        &mut self,
        node: NodeId,
        definition: Arc<StreamDefinition>,
        config: Vec<Value>,
    ) -> StreamId {
        if let Some(stream) = self.streams.get_mut(&node) {
            stream.reconfigure(config);
            return stream.id;
        }
        let mut stream = Stream::new(definition, config, self.tick);
        stream.start();
        let id = stream.id;
        debug!(stream = %id, ?node, "stream activated");
        self.streams.insert(node, stream);
        id
    }

    /// Resolve a name at runtime: frames innermost-out, then the catalog.
    fn resolve_value(&mut self, name: &str, node: NodeId) -> Result<Value, Value> {
        let mut found = None;
        for frame in self.frames.iter().rev() {
            if let Some(value) = frame.bindings.get(name) {
                found = Some(value.clone());
                break;
            }
        }
        if found.is_none() {
            found = self.registry.shared(name).cloned();
        }
        if found.is_none() {
            // A catalog stream referenced bare activates with its defaults.
            if let Some(definition) = self.registry.stream_definition(name).cloned() {
                let config = Self::configuration(&definition, Vec::new());
                let id = self.ensure_stream(node, definition, config);
                found = Some(Value::Stream(id));
            }
        }
        match found {
            Some(value) => Ok(self.sampled(value, node)),
            None => Err(Value::exception(
                ExceptionKind::UnresolvedName(name.into()),
                node,
            )),
        }
    }

    /// Streams are evaluated to their values, not themselves.
    fn sampled(&mut self, value: Value, node: NodeId) -> Value {
        match value {
            Value::Stream(id) => self.sample_stream(id, node),
            other => other,
        }
    }

    fn sample_stream(&mut self, id: StreamId, node: NodeId) -> Value {
        let in_past = self.is_in_past();
        let tick = self.tick;
        match self.streams.values_mut().find(|stream| stream.id == id) {
            Some(stream) => {
                if !in_past {
                    stream.sample_present(tick);
                }
                stream.latest()
            }
            None => Value::exception(ExceptionKind::ExpectedStream, node),
        }
    }

    /// Drain the event queue. Appends are folded into stream histories;
    /// non-silent appends at the present wake a re-evaluation. Returns how
    /// many events were processed.
    pub fn pump(&mut self) -> usize {
        let mut queued = Vec::new();
        while let Ok(Some(event)) = self.events.try_next() {
            queued.push(event);
        }
        let processed = queued.len();
        for event in queued {
            match event {
                EngineEvent::Append {
                    stream,
                    value,
                    silent,
                } => {
                    // Arrivals belong to the present run they would drive,
                    // even while the machine is rewound.
                    let tick = self.present_tick + 1;
                    let in_past = self.is_in_past();
                    if let Some(live) = self.streams.values_mut().find(|live| live.id == stream) {
                        let recorded = live.react(tick, &value);
                        if recorded && !silent && !in_past {
                            self.pending_wake = true;
                        }
                    }
                }
                EngineEvent::Advance => match self.mode {
                    Mode::Play => {
                        if matches!(self.state, EvaluatorState::Running) {
                            self.run();
                        }
                    }
                    Mode::Step => {
                        self.step();
                    }
                },
            }
        }
        if self.pending_wake {
            self.pending_wake = false;
            debug!("woken by stream append");
            self.begin_run();
            if self.mode == Mode::Play {
                self.run();
            }
        }
        processed
    }

    /// Rewind one step: restore the previously recorded snapshot and move
    /// every stream's replay cursor backward in lock-step. Pending wake
    /// requests are discarded; no history is.
    pub fn step_back(&mut self) -> Result<&EvaluatorState, EngineError> {
        let moment = self.history.pop().ok_or(EngineError::NoHistory)?;
        self.ip = moment.ip;
        self.stack = moment.stack;
        self.frames = moment.frames;
        self.tick = moment.tick;
        self.cursor = Some(moment.tick);
        for stream in self.streams.values_mut() {
            stream.set_cursor(Some(moment.tick));
        }
        self.pending_wake = false;
        self.state = EvaluatorState::Running;
        Ok(&self.state)
    }

    /// Leave the past: cursors return to the present; recorded histories
    /// stay intact.
    pub fn resume_present(&mut self) {
        self.cursor = None;
        for stream in self.streams.values_mut() {
            stream.set_cursor(None);
        }
    }

    /// Apply a structural edit: recompile against the new root, reset the
    /// machine, and keep only streams whose defining expression survived.
    pub fn replace(&mut self, target: NodeId, replacement: NodeId) -> Result<NodeId, EngineError> {
        let new_root = self
            .source
            .arena
            .replace(self.source.root, target, replacement)?;
        self.source.root = new_root;
        self.steps = compile(&self.source.arena, new_root);
        let surviving: Vec<NodeId> = self
            .source
            .arena
            .descendants(new_root)
            .into_iter()
            .filter(|node| {
                matches!(
                    self.source.arena.kind(*node),
                    Some(NodeKind::StreamExpression { .. }) | Some(NodeKind::Reference { .. })
                )
            })
            .collect();
        self.streams.retain(|node, _| surviving.contains(node));
        self.ip = 0;
        self.stack.clear();
        self.frames.clear();
        self.history.clear();
        self.state = EvaluatorState::Finished;
        self.latest = None;
        self.pending_wake = false;
        self.resume_present();
        Ok(new_root)
    }

    /// Edit access for snapshot restoration.
    pub(crate) fn restore_stream(&mut self, node: NodeId, stream: Stream) {
        self.streams.insert(node, stream);
    }

    pub(crate) fn set_tick(&mut self, tick: u64) {
        self.tick = tick;
        self.present_tick = tick;
    }

    pub(crate) fn set_latest(&mut self, latest: Option<Value>) {
        self.latest = latest;
    }

    pub(crate) fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub(crate) fn streams(&self) -> &HashMap<NodeId, Stream> {
        &self.streams
    }
}
