//! Streams: tick-indexed, append-only value histories.
//!
//! A stream records what an external or simulated input produced at each
//! tick. Rewinding only repositions the replay cursor; the log is never
//! truncated, so any past moment can be re-inspected deterministically.

use std::fmt;
use std::sync::Arc;

use tracing::trace;
use ulid::Ulid;

use crate::analysis::types::Type;
use crate::runtime::value::Value;

/// Identity of a live stream instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamId(Ulid);

impl StreamId {
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    pub fn from_string(text: &str) -> Option<Self> {
        Ulid::from_string(text).ok().map(Self)
    }
}

impl Default for StreamId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// One configuration input of a stream definition.
#[derive(Debug, Clone)]
pub struct StreamInput {
    pub name: Arc<str>,
    pub ty: Type,
    pub default: Option<Value>,
}

type ConfigFn = Box<dyn Fn(&[Value]) -> Value + Send + Sync>;
type ReactFn = Box<dyn Fn(&[Value], &Value) -> Option<Value> + Send + Sync>;

/// The stream-definition contract, consumed from the native catalog.
///
/// The evaluator constructs a live [`Stream`] from a definition exactly once
/// per activation and routes revised configuration values through
/// [`Stream::reconfigure`] on every later re-evaluation of the defining
/// expression.
pub struct StreamDefinition {
    pub name: Arc<str>,
    pub inputs: Vec<StreamInput>,
    pub value_type: Type,
    /// Produces the seed value recorded at activation.
    pub initial: ConfigFn,
    /// Maps a raw external event to a recorded value, or filters it out,
    /// given the current configuration.
    pub react: ReactFn,
    /// Present-moment sampler for continuously-sampling streams: reading
    /// `latest()` at the present appends a fresh value silently.
    pub sample: Option<ConfigFn>,
}

impl fmt::Debug for StreamDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamDefinition")
            .field("name", &self.name)
            .field("inputs", &self.inputs)
            .field("value_type", &self.value_type)
            .field("sampling", &self.sample.is_some())
            .finish()
    }
}

/// A live stream: append-only history plus an independently movable replay
/// cursor. `None` cursor means the present.
#[derive(Debug)]
pub struct Stream {
    pub id: StreamId,
    definition: Arc<StreamDefinition>,
    on: bool,
    config: Vec<Value>,
    history: Vec<(u64, Value)>,
    cursor: Option<u64>,
}

impl Stream {
    pub fn new(definition: Arc<StreamDefinition>, config: Vec<Value>, tick: u64) -> Self {
        let seed = (definition.initial)(&config);
        Self {
            id: StreamId::new(),
            definition,
            on: false,
            config,
            history: vec![(tick, seed)],
            cursor: None,
        }
    }

    pub fn definition(&self) -> &Arc<StreamDefinition> {
        &self.definition
    }

    pub fn config(&self) -> &[Value] {
        &self.config
    }

    /// Idempotent lifecycle.
    pub fn start(&mut self) {
        self.on = true;
    }

    pub fn stop(&mut self) {
        self.on = false;
    }

    pub fn is_on(&self) -> bool {
        self.on
    }

    /// The update path of the definition contract: revised configuration on
    /// every re-binding while active.
    pub fn reconfigure(&mut self, config: Vec<Value>) {
        self.config = config;
    }

    /// Append a value at `tick`. Returns whether the append should wake the
    /// evaluator; `silent` suppresses the wake signal.
    pub fn add(&mut self, tick: u64, value: Value, silent: bool) -> bool {
        trace!(stream = %self.id, tick, silent, "value appended");
        self.history.push((tick, value));
        !silent
    }

    /// Route a raw external event through the definition's filter. Off
    /// streams record nothing.
    pub fn react(&mut self, tick: u64, raw: &Value) -> bool {
        if !self.on {
            return false;
        }
        let definition = self.definition.clone();
        match (definition.react)(&self.config, raw) {
            Some(value) => self.add(tick, value, false),
            None => false,
        }
    }

    /// For continuously-sampling definitions at the present: record a fresh
    /// value without waking anyone.
    pub fn sample_present(&mut self, tick: u64) {
        if self.cursor.is_some() {
            return;
        }
        let definition = self.definition.clone();
        if let Some(sample) = &definition.sample {
            let value = sample(&self.config);
            self.add(tick, value, true);
        }
    }

    /// The value at the replay cursor, or the newest recorded value when the
    /// cursor is at the present.
    pub fn latest(&self) -> Value {
        let entry = match self.cursor {
            None => self.history.last(),
            Some(cursor) => self
                .history
                .iter()
                .rev()
                .find(|(tick, _)| *tick <= cursor)
                .or_else(|| self.history.first()),
        };
        entry.map(|(_, value)| value.clone()).unwrap_or(Value::None)
    }

    /// The value recorded at or before `tick`.
    pub fn at_tick(&self, tick: u64) -> Option<&Value> {
        self.history
            .iter()
            .rev()
            .find(|(recorded, _)| *recorded <= tick)
            .map(|(_, value)| value)
    }

    pub fn set_cursor(&mut self, cursor: Option<u64>) {
        self.cursor = cursor;
    }

    pub fn cursor(&self) -> Option<u64> {
        self.cursor
    }

    pub fn history(&self) -> &[(u64, Value)] {
        &self.history
    }

    /// Rebuild a stream from persisted state.
    pub(crate) fn restore(
        id: StreamId,
        definition: Arc<StreamDefinition>,
        on: bool,
        config: Vec<Value>,
        history: Vec<(u64, Value)>,
        cursor: Option<u64>,
    ) -> Self {
        Self {
            id,
            definition,
            on,
            config,
            history,
            cursor,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counter_definition() -> Arc<StreamDefinition> {
        Arc::new(StreamDefinition {
            name: "counter".into(),
            inputs: Vec::new(),
            value_type: Type::number(),
            initial: Box::new(|_| Value::number(0.0)),
            react: Box::new(|_, raw| Some(raw.clone())),
            sample: None,
        })
    }

    #[test]
    fn cursor_reads_are_stable_under_later_appends() {
        let mut stream = Stream::new(counter_definition(), Vec::new(), 0);
        stream.start();
        stream.react(1, &Value::number(10.0));
        stream.react(2, &Value::number(20.0));

        stream.set_cursor(Some(1));
        assert_eq!(stream.latest(), Value::number(10.0));

        // Appends while the cursor is behind never change what it sees.
        stream.react(3, &Value::number(30.0));
        assert_eq!(stream.latest(), Value::number(10.0));
        assert_eq!(stream.history().len(), 4);

        stream.set_cursor(None);
        assert_eq!(stream.latest(), Value::number(30.0));
    }

    #[test]
    fn off_streams_record_nothing() {
        let mut stream = Stream::new(counter_definition(), Vec::new(), 0);
        assert!(!stream.react(1, &Value::number(1.0)));
        assert_eq!(stream.history().len(), 1);
    }
}
